//! Per-open state fronting one archive entry as a byte stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use parking_lot::Mutex;
use zipak_format::FileEntry;

use crate::cache::Cache;
use crate::error::{ArchiveError, Result};

/// `seek` origin, mirroring the POSIX `whence` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset from the start of the entry.
    Set,
    /// Offset from the current cursor.
    Current,
    /// Offset from the end of the entry.
    End,
}

const NO_PUSHBACK: u8 = 0xFF;

/// A single open view onto one entry of one [`Cache`].
///
/// The entry's decompressed bytes are materialized lazily on first read and
/// kept for the lifetime of this handle; concurrent access to the same
/// handle is the caller's responsibility (per-thread cursor discipline, per
/// the ownership rules this crate follows).
pub struct PseudoFile {
    cache: Arc<Cache>,
    entry: FileEntry,
    path_hash: u32,
    data: Mutex<Option<Arc<Vec<u8>>>>,
    cursor: AtomicI64,
    pushback: AtomicU8,
}

impl PseudoFile {
    /// Open a view onto `entry` (already resolved from `cache.find`).
    pub fn new(cache: Arc<Cache>, path_hash: u32, entry: FileEntry) -> Self {
        Self {
            cache,
            entry,
            path_hash,
            data: Mutex::new(None),
            cursor: AtomicI64::new(0),
            pushback: AtomicU8::new(NO_PUSHBACK),
        }
    }

    /// Total uncompressed size of the entry.
    pub fn size(&self) -> u64 {
        u64::from(self.entry.uncompressed_size)
    }

    /// DOS-encoded last-modified date/time pair, as stored in the archive.
    pub fn modification_time(&self) -> (u16, u16) {
        (self.entry.mod_date, self.entry.mod_time)
    }

    /// The archive this entry lives in.
    pub fn archive_path(&self) -> Option<std::path::PathBuf> {
        self.cache.zip_file().path().map(std::path::Path::to_path_buf)
    }

    fn materialize(&self) -> Result<Arc<Vec<u8>>> {
        let mut guard = self.data.lock();
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let bytes = Arc::new(self.cache.read(self.path_hash, &self.entry)?);
        *guard = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Copy up to `dst.len()` bytes starting at the current cursor,
    /// advancing it. Returns the number of bytes copied.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let pushback = self.pushback.swap(NO_PUSHBACK, Ordering::AcqRel);
        if pushback != NO_PUSHBACK {
            dst[0] = pushback;
            written = 1;
            self.cursor.fetch_add(1, Ordering::AcqRel);
        }
        if written == dst.len() {
            return Ok(written);
        }

        let data = self.materialize()?;
        let cursor = self.cursor.load(Ordering::Acquire).max(0) as usize;
        if cursor >= data.len() {
            return Ok(written);
        }
        let available = data.len() - cursor;
        let to_copy = available.min(dst.len() - written);
        dst[written..written + to_copy].copy_from_slice(&data[cursor..cursor + to_copy]);
        self.cursor
            .fetch_add(to_copy as i64, Ordering::AcqRel);
        Ok(written + to_copy)
    }

    /// Move the cursor. Any resulting position outside `[0, size]` is an
    /// error rather than being clamped.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.cursor.load(Ordering::Acquire),
            Whence::End => self.size() as i64,
        };
        let new_pos = base
            .checked_add(offset)
            .ok_or_else(|| ArchiveError::InvalidCall("seek overflow".into()))?;
        if new_pos < 0 || new_pos as u64 > self.size() {
            return Err(ArchiveError::InvalidCall(format!(
                "seek position {new_pos} out of range [0, {}]",
                self.size()
            )));
        }
        self.pushback.store(NO_PUSHBACK, Ordering::Release);
        self.cursor.store(new_pos, Ordering::Release);
        Ok(new_pos as u64)
    }

    /// Current cursor position.
    pub fn tell(&self) -> u64 {
        self.cursor.load(Ordering::Acquire).max(0) as u64
    }

    /// `true` once the cursor has reached the end of the entry.
    pub fn eof(&self) -> bool {
        self.pushback.load(Ordering::Acquire) == NO_PUSHBACK && self.tell() >= self.size()
    }

    /// Read one byte, or `None` at end of stream.
    pub fn getc(&self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = self.read(&mut byte)?;
        Ok((n == 1).then_some(byte[0]))
    }

    /// Push one byte back so the next [`Self::read`]/[`Self::getc`] returns
    /// it again. Only a single byte of pushback is supported.
    pub fn ungetc(&self, byte: u8) {
        self.cursor.fetch_sub(1, Ordering::AcqRel);
        self.pushback.store(byte, Ordering::Release);
    }

    /// Read a line (up to and including `\n`, or end of stream) into `out`,
    /// clearing it first. Returns `false` at end of stream with nothing
    /// read.
    pub fn gets(&self, out: &mut String) -> Result<bool> {
        out.clear();
        let mut any = false;
        loop {
            match self.getc()? {
                None => break,
                Some(b) => {
                    any = true;
                    out.push(b as char);
                    if b == b'\n' {
                        break;
                    }
                }
            }
        }
        Ok(any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EncryptionKind;
    use crate::zip_file::ZipFile;
    use zipak_arena::Arena;
    use zipak_format::structures::{CompressionMethod, GeneralPurposeFlags};

    fn test_file(contents: &[u8]) -> PseudoFile {
        let zip_file = ZipFile::from_memory(Vec::new()).unwrap();
        let dir = zipak_format::DirHeader::new();
        let cache = Arc::new(Cache::new(
            zip_file,
            dir,
            EncryptionKind::None,
            None,
            0,
            Arc::new(Arena::new()),
            true,
        ));
        let entry = FileEntry {
            name: "x.txt".into(),
            crc32: zipak_crypto::checksum::compute_crc32(contents),
            compressed_size: contents.len() as u32,
            uncompressed_size: contents.len() as u32,
            method: CompressionMethod::Store,
            flags: GeneralPurposeFlags(0),
            local_header_offset: 0,
            mod_date: 0,
            mod_time: 0,
            key_slot: None,
        };
        // Pretend the entry's bytes are already materialized by priming the
        // pseudo-file's cache slot directly rather than round-tripping
        // through a real archive, since these tests exercise cursor
        // behavior, not I/O.
        let pf = PseudoFile::new(cache, 0, entry);
        *pf.data.lock() = Some(Arc::new(contents.to_vec()));
        pf
    }

    #[test]
    fn read_advances_cursor() {
        let pf = test_file(b"hello world");
        let mut buf = [0u8; 5];
        assert_eq!(pf.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(pf.tell(), 5);
    }

    #[test]
    fn seek_end_then_read_returns_nothing() {
        let pf = test_file(b"abc");
        pf.seek(0, Whence::End).unwrap();
        assert!(pf.eof());
        let mut buf = [0u8; 1];
        assert_eq!(pf.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_out_of_range_is_rejected() {
        let pf = test_file(b"abc");
        assert!(pf.seek(10, Whence::Set).is_err());
    }

    #[test]
    fn ungetc_replays_last_byte() {
        let pf = test_file(b"abc");
        let first = pf.getc().unwrap().unwrap();
        pf.ungetc(first);
        let replayed = pf.getc().unwrap().unwrap();
        assert_eq!(first, replayed);
    }

    #[test]
    fn gets_reads_one_line() {
        let pf = test_file(b"line one\nline two");
        let mut buf = String::new();
        assert!(pf.gets(&mut buf).unwrap());
        assert_eq!(buf, "line one\n");
        assert!(pf.gets(&mut buf).unwrap());
        assert_eq!(buf, "line two");
    }
}
