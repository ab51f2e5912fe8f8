//! Read-only, refcounted in-memory representation of one archive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flate2::{Decompress, FlushDecompress, Status};
use zipak_arena::Arena;
use zipak_crypto::KeyTable;
use zipak_format::structures::{CUSTOM_EXTENDED_HEADER_SIG, CompressionMethod, LocalFileHeader};
use zipak_format::{DirHeader, FileEntry};

use crate::error::{ArchiveError, Result};
use crate::zip_file::ZipFile;

/// Sentinel for an unrefreshed data offset, matching the read-only
/// `FileEntry` shape's `data_offset = INVALID` convention.
pub const INVALID_OFFSET: u32 = 0xFFFF_FFFF;

/// Archive-wide encryption scheme, taken from the custom trailing headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionKind {
    /// No encryption.
    #[default]
    None,
    /// RSA-wrapped per-slot ARC4 key table (the only encryption method this
    /// crate can write; the only one that is not legacy-only).
    StreamCipherKeyTable,
    /// Legacy TEA block cipher, signaled only via the CDREnd disk-number
    /// field for backward compatibility.
    Tea,
    /// Legacy bare ARC4 stream cipher, same backward-compatible signaling.
    StreamCipher,
}

/// Per-entry refreshed offset, tracked outside the read-only `FileEntry`
/// struct from `zipak-format` so that struct can stay a plain parse result.
#[derive(Debug)]
struct RefreshedOffset(AtomicU32);

impl Default for RefreshedOffset {
    fn default() -> Self {
        Self(AtomicU32::new(INVALID_OFFSET))
    }
}

/// The in-memory representation of one archive's directory plus the handle
/// to its bytes. Shared by `Arc`; freed once the last holder (including any
/// `PseudoFile` still referencing one of its entries) releases it.
pub struct Cache {
    zip_file: ZipFile,
    dir: DirHeader,
    encryption: EncryptionKind,
    key_table: Option<KeyTable>,
    cdr_offset: u64,
    /// One refreshed data offset per flat-index slot, parallel to
    /// `dir`'s iteration order. Keyed by path hash instead, to stay valid
    /// across any future directory mutation.
    offsets: dashmap::DashMap<u32, RefreshedOffset>,
    arena: Arc<Arena>,
    read_only: bool,
}

impl Cache {
    pub(crate) fn new(
        zip_file: ZipFile,
        dir: DirHeader,
        encryption: EncryptionKind,
        key_table: Option<KeyTable>,
        cdr_offset: u64,
        arena: Arc<Arena>,
        read_only: bool,
    ) -> Self {
        Self {
            zip_file,
            dir,
            encryption,
            key_table,
            cdr_offset,
            offsets: dashmap::DashMap::new(),
            arena,
            read_only,
        }
    }

    /// The archive's in-memory directory.
    pub fn dir(&self) -> &DirHeader {
        &self.dir
    }

    /// The archive's byte stream.
    pub(crate) fn zip_file(&self) -> &ZipFile {
        &self.zip_file
    }

    /// `true` if this cache was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// This archive's encryption scheme, as resolved by the factory.
    pub fn encryption_kind(&self) -> EncryptionKind {
        self.encryption
    }

    /// Total archive size in bytes.
    pub fn archive_size(&self) -> u64 {
        self.zip_file.size()
    }

    /// Byte offset of the central directory record.
    pub fn cdr_offset(&self) -> u64 {
        self.cdr_offset
    }

    /// Find an entry by path, normalized the same way at build time.
    pub fn find(&self, path: &str) -> Option<FileEntry> {
        self.dir.lookup(path).cloned()
    }

    /// Lazily compute `data_offset` for `entry` by reading its local file
    /// header, unless it has already been refreshed.
    pub fn refresh(&self, path_hash: u32, entry: &FileEntry) -> Result<u32> {
        let slot = self.offsets.entry(path_hash).or_default();
        let existing = slot.0.load(Ordering::Acquire);
        if existing != INVALID_OFFSET {
            return Ok(existing);
        }

        if self.encryption != EncryptionKind::None {
            // Local headers are unreliable once encrypted headers are in
            // play; trust the CDR-derived offset directly.
            let offset = entry.local_header_offset
                + zipak_format::structures::LOCAL_FILE_HEADER_FIXED_SIZE as u32
                + entry.name.len() as u32;
            slot.0.store(offset, Ordering::Release);
            return Ok(offset);
        }

        let header = self.read_local_header(entry.local_header_offset)?;
        if header.method != entry.method {
            return Err(ArchiveError::ValidationFailed(format!(
                "local header method disagrees with CDR for {}",
                entry.name
            )));
        }

        let offset = entry.local_header_offset
            + zipak_format::structures::LOCAL_FILE_HEADER_FIXED_SIZE as u32
            + header.name.len() as u32
            + header.extra.len() as u32;
        slot.0.store(offset, Ordering::Release);
        Ok(offset)
    }

    fn read_local_header(&self, offset: u32) -> Result<LocalFileHeader> {
        use binrw::BinRead;

        // Local headers are variable length; over-read a generous bound and
        // let binrw stop at the declared field lengths.
        let probe_len = 4096usize.min((self.archive_size() - u64::from(offset)) as usize);
        let mut buf = vec![0u8; probe_len];
        self.zip_file.read_at(u64::from(offset), &mut buf)?;
        let mut cursor = std::io::Cursor::new(&buf[..]);
        LocalFileHeader::read(&mut cursor).map_err(|e| ArchiveError::Format(e.into()))
    }

    /// Read an entry's decompressed bytes, applying decryption and
    /// decompression as the archive's encryption kind and the entry's
    /// compression method require.
    pub fn read(&self, path_hash: u32, entry: &FileEntry) -> Result<Vec<u8>> {
        if entry.uncompressed_size == 0 {
            return Ok(Vec::new());
        }

        let data_offset = self.refresh(path_hash, entry)?;

        let mut compressed = self.arena.temp_alloc(entry.compressed_size as usize);
        compressed.resize(entry.compressed_size as usize, 0);
        self.zip_file
            .read_at(u64::from(data_offset), compressed.as_mut_slice())?;
        let mut compressed_bytes = compressed.as_slice().to_vec();
        self.arena.temp_free(compressed);

        if entry.flags.is_encrypted() {
            self.decrypt_entry(entry, data_offset, &mut compressed_bytes)?;
        }

        let uncompressed = match entry.method {
            CompressionMethod::Store => compressed_bytes,
            CompressionMethod::Deflate => {
                self.inflate(&compressed_bytes, entry.uncompressed_size as usize)?
            }
            CompressionMethod::Unsupported(code) => {
                return Err(ArchiveError::Unsupported(format!(
                    "compression method {code}"
                )));
            }
        };

        if zipak_crypto::checksum::compute_crc32(&uncompressed) != entry.crc32 {
            return Err(ArchiveError::CorruptedData(format!(
                "crc32 mismatch for {}",
                entry.name
            )));
        }

        Ok(uncompressed)
    }

    fn decrypt_entry(&self, entry: &FileEntry, data_offset: u32, data: &mut [u8]) -> Result<()> {
        match self.encryption {
            EncryptionKind::None => Err(ArchiveError::CorruptedData(format!(
                "{} is marked encrypted but archive has no encryption header",
                entry.name
            ))),
            EncryptionKind::StreamCipherKeyTable => {
                let table = self
                    .key_table
                    .as_ref()
                    .ok_or_else(|| ArchiveError::CorruptedData("missing key table".into()))?;
                let slot = entry.key_slot.unwrap_or(0);
                table.decrypt_entry(slot, data).map_err(ArchiveError::from)
            }
            EncryptionKind::Tea => {
                // 16-byte key derived from the entry's own CRC and offset,
                // matching the legacy writer's behavior for archives that
                // signal TEA only through the CDREnd disk-number field.
                let mut key_bytes = [0u8; 16];
                key_bytes[0..4].copy_from_slice(&entry.crc32.to_le_bytes());
                key_bytes[4..8].copy_from_slice(&data_offset.to_le_bytes());
                key_bytes[8..12].copy_from_slice(&entry.crc32.to_be_bytes());
                key_bytes[12..16].copy_from_slice(&data_offset.to_be_bytes());
                let key = zipak_crypto::tea::TeaKey::from_bytes(key_bytes);
                zipak_crypto::tea::decrypt_buffer(data, &key);
                Ok(())
            }
            EncryptionKind::StreamCipher => {
                #[cfg(feature = "legacy-keytable")]
                {
                    let slot = zipak_crypto::keytable::legacy_key_slot(entry.crc32, data_offset);
                    let seed = slot.to_le_bytes();
                    let mut cipher = zipak_crypto::Arc4Cipher::new(&seed).map_err(|e| {
                        ArchiveError::CorruptedData(format!("legacy stream-cipher key: {e}"))
                    })?;
                    cipher.apply_keystream(data);
                    Ok(())
                }
                #[cfg(not(feature = "legacy-keytable"))]
                {
                    Err(ArchiveError::Unsupported(
                        "legacy STREAMCIPHER method requires the legacy-keytable feature".into(),
                    ))
                }
            }
        }
    }

    /// Streaming read of a sub-range of an entry's raw bytes. This crate's
    /// [`ZipFile`] never opens a second, unbuffered handle for sector-aligned
    /// reads (a Windows-only optimization upstream), so there is no separate
    /// fast path to fall back from: every call goes straight through the
    /// same locked `read_at` the non-streaming path uses. Kept as a distinct
    /// method so callers that want the streaming *contract* (no decompress,
    /// no decrypt, no CRC check, arbitrary sub-range) don't have to reach for
    /// a raw offset computation themselves.
    pub fn read_streaming(&self, path_hash: u32, entry: &FileEntry, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data_offset = self.refresh(path_hash, entry)?;
        self.zip_file.read_at(u64::from(data_offset) + offset, buf)
    }

    /// Decompress the first `compressed_len` bytes of `out` in place,
    /// overwriting the whole buffer with the decompressed result. The
    /// original's circular-window lookahead algorithm exists to let a C
    /// implementation alias the same memory as both source and destination
    /// without a second allocation; Rust's borrow checker already forbids
    /// holding overlapping `&[u8]`/`&mut [u8]` views, which sidesteps the
    /// hazard a different way — `inflate` reads the compressed slice into an
    /// owned `Vec` before `out` is ever borrowed mutably, so there is no
    /// window to manage. The externally observable result (property 9:
    /// identical output to a disjoint-buffer decompress) is unchanged.
    pub fn decompress_in_place(&self, compressed_len: usize, out: &mut [u8]) -> Result<()> {
        let decompressed = self.inflate(&out[..compressed_len], out.len())?;
        out[..decompressed.len()].copy_from_slice(&decompressed);
        Ok(())
    }

    fn inflate(&self, compressed: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        let mut decompress = Decompress::new(false);
        let mut out = vec![0u8; uncompressed_size];
        let status = decompress
            .decompress(compressed, &mut out, FlushDecompress::Finish)
            .map_err(|e| ArchiveError::Zlib(e.to_string()))?;
        if status != Status::StreamEnd && decompress.total_out() as usize != uncompressed_size {
            return Err(ArchiveError::CorruptedData(
                "inflate did not consume the whole stream".into(),
            ));
        }
        out.truncate(decompress.total_out() as usize);
        Ok(out)
    }
}

/// Confirms a custom extended header's declared length matches the fixed
/// struct size before trusting any of its fields.
pub(crate) fn validate_extended_header_signature(signature: u32) -> Result<()> {
    if signature != CUSTOM_EXTENDED_HEADER_SIG {
        return Err(ArchiveError::ValidationFailed(
            "extended header signature mismatch".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_offset_sentinel_is_max_u32() {
        assert_eq!(INVALID_OFFSET, u32::MAX);
    }

    #[test]
    fn decompress_in_place_matches_disjoint_decompress() {
        use flate2::{Compress, Compression, FlushCompress};

        let original = b"the quick brown fox jumps over the lazy dog, repeatedly, many times over";
        let mut compress = Compress::new(Compression::default(), false);
        let mut compressed = Vec::new();
        compress
            .compress_vec(original, &mut compressed, FlushCompress::Finish)
            .unwrap();

        let cache = Cache::new(
            ZipFile::from_memory(Vec::new()).unwrap(),
            DirHeader::new(),
            EncryptionKind::None,
            None,
            0,
            Arc::new(Arena::new()),
            true,
        );

        let disjoint = cache.inflate(&compressed, original.len()).unwrap();

        let mut in_place = compressed.clone();
        in_place.resize(original.len(), 0);
        cache
            .decompress_in_place(compressed.len(), &mut in_place)
            .unwrap();

        assert_eq!(disjoint, original);
        assert_eq!(in_place, original);
    }
}
