//! Archive open: parse the end-of-central-directory, the central directory,
//! and any custom trailing headers, then materialize a [`Cache`].

use std::sync::Arc;

use rsa::{RsaPrivateKey, RsaPublicKey};
use zipak_arena::Arena;
use zipak_crypto::KeyTable;
use zipak_format::scan::{self, TrailingHeaders};

use crate::cache::{Cache, EncryptionKind};
use crate::error::{ArchiveError, Result};
use crate::zip_file::ZipFile;

/// Flags controlling how an archive is opened, mirroring the legacy
/// `ICryPak` open-flag bitset.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open the archive read-only; no [`crate::cache_rw::CacheRw`] is built.
    pub read_only: bool,
    /// Skip automatic compaction on close.
    pub dont_compact: bool,
    /// Load the archive's bytes into memory immediately.
    pub in_memory: bool,
    /// Treat names already as CRC-32 values rather than hashing them.
    pub filenames_as_crc32: bool,
}

/// How thoroughly to validate an archive while opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMethod {
    /// Estimate data offsets; refine lazily on first read.
    #[default]
    Fast,
    /// Read every local file header up front to confirm it matches the CDR.
    Full,
    /// `Full`, plus decompress every entry into memory for validation.
    ValidateInMemory,
    /// `Full`, plus decompress and recompute every entry's CRC-32.
    Validate,
}

const ENCRYPTION_NONE: u16 = 0;
const ENCRYPTION_STREAMCIPHER_KEYTABLE: u16 = 1;

const LEGACY_DISK_NUMBER_ENCRYPTION_MASK: u16 = 0xC000;
const LEGACY_DISK_NUMBER_NONE: u16 = 0x0000;
const LEGACY_DISK_NUMBER_TEA: u16 = 0x4000;
const LEGACY_DISK_NUMBER_STREAMCIPHER: u16 = 0x8000;

/// Open an archive from a path, parse its directory, and build a read-only
/// [`Cache`]. `private_key` is required only for archives whose trailing
/// headers signal `STREAMCIPHER_KEYTABLE` encryption. `public_key` is
/// required only for archives carrying a `CDR_SIGNED` trailing header.
pub fn open(
    path: impl AsRef<std::path::Path>,
    flags: OpenFlags,
    init: InitMethod,
    arena: Arc<Arena>,
    private_key: Option<&RsaPrivateKey>,
    public_key: Option<&RsaPublicKey>,
) -> Result<Cache> {
    let path = path.as_ref();
    let span = tracing::info_span!("cache_factory::open", path = %path.display(), ?init);
    let _guard = span.enter();

    let zip_file = ZipFile::open(path)?;
    if flags.in_memory {
        zip_file.load_to_memory()?;
    }
    let size = zip_file.size();
    let cache = build(zip_file, flags, init, arena, private_key, public_key, true)?;
    tracing::info!(size, encryption = ?cache.encryption_kind(), "archive opened");
    Ok(cache)
}

/// Build a [`Cache`] from an in-memory archive block.
pub fn open_in_memory(
    data: Vec<u8>,
    flags: OpenFlags,
    init: InitMethod,
    arena: Arc<Arena>,
    private_key: Option<&RsaPrivateKey>,
    public_key: Option<&RsaPublicKey>,
) -> Result<Cache> {
    let span = tracing::info_span!("cache_factory::open_in_memory", size = data.len(), ?init);
    let _guard = span.enter();

    let zip_file = ZipFile::from_memory(data)?;
    build(zip_file, flags, init, arena, private_key, public_key, true)
}

fn build(
    zip_file: ZipFile,
    flags: OpenFlags,
    init: InitMethod,
    arena: Arc<Arena>,
    private_key: Option<&RsaPrivateKey>,
    public_key: Option<&RsaPublicKey>,
    read_only: bool,
) -> Result<Cache> {
    let scan_result = {
        let mut reader = ArchiveCursor::new(&zip_file);
        scan::scan(&mut reader)?
    };

    let encryption = resolve_encryption_kind(scan_result.eocd.disk_number, &scan_result.trailing)?;

    let key_table = match encryption {
        EncryptionKind::StreamCipherKeyTable => {
            let header = scan_result.trailing.encryption.as_ref().ok_or_else(|| {
                ArchiveError::CorruptedData(
                    "STREAMCIPHER_KEYTABLE signaled but no encryption header present".into(),
                )
            })?;
            let private_key = private_key.ok_or_else(|| {
                ArchiveError::CorruptedData(
                    "archive requires a private key to decrypt its key table".into(),
                )
            })?;
            Some(KeyTable::decrypt(&header.encrypted_key_table, private_key)?)
        }
        _ => None,
    };

    let cdr_offset = u64::from(scan_result.eocd.cdr_offset);

    if let Some(sig_header) = &scan_result.trailing.signature {
        let key = public_key.ok_or_else(|| {
            ArchiveError::Unsupported(
                "archive carries a CDR signature but no public key was supplied to verify it"
                    .into(),
            )
        })?;
        let mut cdr_bytes = vec![0u8; scan_result.eocd.cdr_size as usize];
        zip_file.read_at(cdr_offset, &mut cdr_bytes)?;
        zipak_crypto::signature::verify(&cdr_bytes, &sig_header.signature, key)?;
    }

    if init != InitMethod::Fast {
        check_local_header_agreement(&zip_file, &scan_result.dir)?;
    }

    let _ = flags.filenames_as_crc32; // consumed by zipak_format's flat-index path when present

    let cache = Cache::new(
        zip_file,
        scan_result.dir,
        encryption,
        key_table,
        cdr_offset,
        arena,
        read_only || flags.read_only,
    );

    if init == InitMethod::Validate || init == InitMethod::ValidateInMemory {
        validate_entry_contents(&cache)?;
    }

    Ok(cache)
}

fn resolve_encryption_kind(
    disk_number: u16,
    trailing: &TrailingHeaders,
) -> Result<EncryptionKind> {
    let legacy = match disk_number & LEGACY_DISK_NUMBER_ENCRYPTION_MASK {
        LEGACY_DISK_NUMBER_NONE => EncryptionKind::None,
        LEGACY_DISK_NUMBER_TEA => EncryptionKind::Tea,
        LEGACY_DISK_NUMBER_STREAMCIPHER => EncryptionKind::StreamCipher,
        _ => {
            return Err(ArchiveError::Unsupported(
                "unknown legacy encryption indicator in disk-number field".into(),
            ));
        }
    };

    let Some(extended) = &trailing.extended else {
        return Ok(legacy);
    };

    if extended.payload.len() < 2 {
        return Err(ArchiveError::ValidationFailed(
            "extended header payload too short for encryption_kind".into(),
        ));
    }
    let declared = u16::from_le_bytes([extended.payload[0], extended.payload[1]]);
    let declared_kind = match declared {
        ENCRYPTION_NONE => EncryptionKind::None,
        ENCRYPTION_STREAMCIPHER_KEYTABLE => EncryptionKind::StreamCipherKeyTable,
        other => {
            return Err(ArchiveError::Unsupported(format!(
                "unknown encryption_kind {other} in extended header"
            )));
        }
    };

    match (legacy, declared_kind) {
        (EncryptionKind::None, kind) => Ok(kind),
        (legacy_kind, EncryptionKind::None) => Ok(legacy_kind),
        (a, b) if a == b => Ok(a),
        _ => Err(ArchiveError::CorruptedData(
            "disk-number legacy encryption indicator disagrees with extended header".into(),
        )),
    }
}

fn check_local_header_agreement(zip_file: &ZipFile, dir: &zipak_format::DirHeader) -> Result<()> {
    use binrw::BinRead;

    for (_, entry) in dir.iter_all() {
        let probe_len = 4096usize.min(
            (zip_file.size().saturating_sub(u64::from(entry.local_header_offset))) as usize,
        );
        let mut buf = vec![0u8; probe_len];
        zip_file.read_at(u64::from(entry.local_header_offset), &mut buf)?;
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let header = zipak_format::structures::LocalFileHeader::read(&mut cursor)
            .map_err(|e| ArchiveError::Format(e.into()))?;

        if header.method != entry.method {
            return Err(ArchiveError::ValidationFailed(format!(
                "local header method disagrees with CDR for {}",
                entry.name
            )));
        }
    }
    Ok(())
}

/// Decompress every entry and recompute its CRC-32, failing the whole open
/// if any entry disagrees with its directory record. `Cache::read` already
/// performs both steps on every call, so this is the same check `Validate`
/// and `ValidateInMemory` promise, run eagerly over the whole archive
/// instead of lazily per entry.
fn validate_entry_contents(cache: &Cache) -> Result<()> {
    for (name, entry) in cache.dir().iter_all() {
        let path_hash = zipak_format::path::hash(&name);
        cache.read(path_hash, entry)?;
    }
    Ok(())
}

/// Adapts [`ZipFile`]'s locked random-access API to `std::io::{Read, Seek}`
/// for the one-shot, sequential pass `zipak_format::scan` performs while
/// opening or reopening an archive.
pub(crate) struct ArchiveCursor<'a> {
    zip_file: &'a ZipFile,
    pos: u64,
}

impl<'a> ArchiveCursor<'a> {
    pub(crate) fn new(zip_file: &'a ZipFile) -> Self {
        Self { zip_file, pos: 0 }
    }
}

impl std::io::Read for ArchiveCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.zip_file.size().saturating_sub(self.pos);
        let to_read = (buf.len() as u64).min(remaining) as usize;
        if to_read == 0 {
            return Ok(0);
        }
        self.zip_file
            .read_at(self.pos, &mut buf[..to_read])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.pos += to_read as u64;
        Ok(to_read)
    }
}

impl std::io::Seek for ArchiveCursor<'_> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let size = self.zip_file.size();
        self.pos = match pos {
            std::io::SeekFrom::Start(p) => p,
            std::io::SeekFrom::End(delta) => {
                (size as i64 + delta).try_into().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start")
                })?
            }
            std::io::SeekFrom::Current(delta) => {
                (self.pos as i64 + delta).try_into().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "seek before start")
                })?
            }
        };
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn minimal_archive_bytes() -> Vec<u8> {
        use binrw::BinWrite;
        use std::io::Cursor;
        use zipak_format::structures::{
            CentralDirectoryFileHeader, CompressionMethod, EndOfCentralDirectory,
            GeneralPurposeFlags, LocalFileHeader,
        };

        let mut buf = Vec::new();
        let name = b"hello.txt".to_vec();
        let data = b"hi".to_vec();

        let local_offset = buf.len() as u32;
        let local = LocalFileHeader {
            version_needed: 20,
            flags: GeneralPurposeFlags(0),
            method: CompressionMethod::Store,
            mod_time: 0,
            mod_date: 0,
            crc32: crc32fast::hash(&data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name: name.clone(),
            extra: Vec::new(),
        };
        let mut cursor = Cursor::new(&mut buf);
        cursor.seek(SeekFrom::End(0)).unwrap();
        local.write(&mut cursor).unwrap();
        drop(cursor);
        buf.extend_from_slice(&data);

        let cdr_start = buf.len() as u32;
        let cdr = CentralDirectoryFileHeader {
            version_made_by: 20,
            version_needed: 20,
            flags: GeneralPurposeFlags(0),
            method: CompressionMethod::Store,
            mod_time: 0,
            mod_date: 0,
            crc32: crc32fast::hash(&data),
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            disk_number_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            local_header_offset: local_offset,
            name,
            extra: Vec::new(),
            comment: Vec::new(),
        };
        let mut cursor = Cursor::new(&mut buf);
        cursor.seek(SeekFrom::End(0)).unwrap();
        cdr.write(&mut cursor).unwrap();
        drop(cursor);
        let cdr_size = buf.len() as u32 - cdr_start;

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cdr_disk_number: 0,
            cdr_entries_this_disk: 1,
            cdr_entries_total: 1,
            cdr_size,
            cdr_offset: cdr_start,
            comment: Vec::new(),
        };
        let mut cursor = Cursor::new(&mut buf);
        cursor.seek(SeekFrom::End(0)).unwrap();
        eocd.write(&mut cursor).unwrap();
        buf
    }

    #[test]
    fn opens_minimal_unencrypted_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&minimal_archive_bytes()).unwrap();
        drop(f);

        let arena = Arc::new(Arena::new());
        let cache = open(&path, OpenFlags::default(), InitMethod::Fast, arena, None, None).unwrap();
        let entry = cache.find("hello.txt").unwrap();
        assert_eq!(entry.uncompressed_size, 2);

        let hash = zipak_format::path::hash("hello.txt");
        let bytes = cache.read(hash, &entry).unwrap();
        assert_eq!(bytes, b"hi");
    }

    #[test]
    fn full_init_validates_local_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");
        std::fs::write(&path, minimal_archive_bytes()).unwrap();

        let arena = Arc::new(Arena::new());
        let cache = open(&path, OpenFlags::default(), InitMethod::Full, arena, None, None).unwrap();
        assert!(cache.find("hello.txt").is_some());
    }

    #[test]
    fn validate_init_decompresses_and_checks_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");
        std::fs::write(&path, minimal_archive_bytes()).unwrap();

        let arena = Arc::new(Arena::new());
        let cache = open(&path, OpenFlags::default(), InitMethod::Validate, arena, None, None).unwrap();
        assert!(cache.find("hello.txt").is_some());
    }

    #[test]
    fn signed_archive_opens_with_matching_public_key() {
        use binrw::{BinRead, BinWrite};
        use rsa::Pkcs1v15Sign;
        use sha2::{Digest, Sha256};
        use zipak_format::structures::SignedCdrHeader;

        let mut buf = minimal_archive_bytes();
        // Peel the EOCD record back off: minimal_archive_bytes() places it
        // immediately after the CDR with no gap, but a signed archive needs
        // a SignedCdrHeader trailer sitting between the two.
        let eocd =
            zipak_format::structures::EndOfCentralDirectory::read(&mut std::io::Cursor::new(
                &buf[buf.len() - 22..],
            ))
            .unwrap();
        let cdr_start = eocd.cdr_offset as usize;
        let cdr_end = buf.len() - 22;
        let cdr_bytes = buf[cdr_start..cdr_end].to_vec();
        buf.truncate(cdr_end);

        let mut rng = rand_08::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = rsa::RsaPublicKey::from(&private_key);
        let digest = Sha256::digest(&cdr_bytes);
        let signature = private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .unwrap();

        let signed_header = SignedCdrHeader { signature };
        let mut cursor = std::io::Cursor::new(&mut buf);
        cursor.seek(SeekFrom::End(0)).unwrap();
        signed_header.write(&mut cursor).unwrap();
        drop(cursor);

        let eocd = zipak_format::structures::EndOfCentralDirectory {
            disk_number: 0,
            cdr_disk_number: 0,
            cdr_entries_this_disk: 1,
            cdr_entries_total: 1,
            cdr_size: cdr_bytes.len() as u32,
            cdr_offset: cdr_start as u32,
            comment: Vec::new(),
        };
        let mut cursor = std::io::Cursor::new(&mut buf);
        cursor.seek(SeekFrom::End(0)).unwrap();
        eocd.write(&mut cursor).unwrap();
        drop(cursor);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signed.pak");
        std::fs::write(&path, &buf).unwrap();

        let arena = Arc::new(Arena::new());
        let opened = open(
            &path,
            OpenFlags::default(),
            InitMethod::Fast,
            Arc::clone(&arena),
            None,
            Some(&public_key),
        );
        assert!(opened.is_ok());

        let missing_key = open(
            &path,
            OpenFlags::default(),
            InitMethod::Fast,
            Arc::clone(&arena),
            None,
            None,
        );
        assert!(missing_key.is_err());

        let wrong_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let wrong_public = rsa::RsaPublicKey::from(&wrong_key);
        let bad_key = open(
            &path,
            OpenFlags::default(),
            InitMethod::Fast,
            arena,
            None,
            Some(&wrong_public),
        );
        assert!(bad_key.is_err());
    }

    #[test]
    fn validate_init_rejects_archive_with_corrupted_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");
        let mut bytes = minimal_archive_bytes();
        // Flip a byte in the stored payload so the CRC-32 the CDR records no
        // longer matches the bytes on disk.
        let data_start = bytes
            .windows(2)
            .position(|w| w == b"hi")
            .expect("payload bytes present");
        bytes[data_start] = b'x';
        std::fs::write(&path, bytes).unwrap();

        let arena = Arc::new(Arena::new());
        let err = open(&path, OpenFlags::default(), InitMethod::Validate, arena, None, None).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptedData(_)));
    }
}
