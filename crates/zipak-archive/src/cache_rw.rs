//! Read-write archive layer: in-place/append updates, continuous-write
//! segments, removal, and compaction (`relink`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use binrw::BinWrite;
use flate2::{Compress, Compression, FlushCompress, Status};
use parking_lot::Mutex;
use zipak_arena::Arena;
use zipak_format::structures::{
    CentralDirectoryFileHeader, CompressionMethod, EndOfCentralDirectory, GeneralPurposeFlags,
    LocalFileHeader, LOCAL_FILE_HEADER_FIXED_SIZE,
};
use zipak_format::{DirHeader, FileEntry};

use crate::error::{ArchiveError, Result};
use crate::zip_file::ZipFile;

/// Maximum chunk size written per `write_at` call during `update`, matching
/// the spec's "retry on partial write" chunking.
const WRITE_CHUNK: usize = 1024 * 1024;

/// Sentinel meaning "append a new continuous segment" rather than overwrite
/// a previously reserved range.
pub const NO_SEEK_OVERWRITE: u32 = 0xFFFF_FFFF;

/// Read-write handle onto one archive's bytes and directory.
///
/// A single mutex serializes directory mutation and `ZipFile` I/O together,
/// since every write here touches both. Concurrent *readers* of the same
/// archive should use [`crate::cache::Cache`] instead; RW archives are not
/// safe for concurrent writers by convention.
pub struct CacheRw {
    zip_file: ZipFile,
    dir: Mutex<DirHeader>,
    path: PathBuf,
    arena: Arc<Arena>,
    cdr_dirty: AtomicBool,
    uncompacted: AtomicBool,
    dont_compact: bool,
    /// Current end of all entry data, i.e. where the CDR would start if
    /// written right now.
    eof_offset: AtomicU64,
    next_continuous_id: AtomicU32,
}

/// Per-entry bookkeeping `CacheRw` needs beyond the plain read-only
/// `FileEntry`: the byte range reserved for it, used to decide whether an
/// update fits in place.
#[derive(Debug, Clone, Copy)]
struct ReservedRange {
    header_offset: u32,
    /// End of the reserved region for this entry's local header + data.
    eof_offset: u32,
}

impl CacheRw {
    /// Open an existing archive for read-write access, or create a new one.
    pub fn open(path: impl AsRef<Path>, create: bool, dont_compact: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let zip_file = ZipFile::open_rw(&path, create)?;

        let dir = if zip_file.size() == 0 {
            DirHeader::new()
        } else {
            let mut reader = super::cache_factory::ArchiveCursor::new(&zip_file);
            zipak_format::scan::scan(&mut reader)?.dir
        };

        let eof_offset = if zip_file.size() == 0 {
            0
        } else {
            let mut reader = super::cache_factory::ArchiveCursor::new(&zip_file);
            zipak_format::scan::scan(&mut reader)?.eocd.cdr_offset as u64
        };

        Ok(Self {
            zip_file,
            dir: Mutex::new(dir),
            path,
            arena: Arc::new(Arena::new()),
            cdr_dirty: AtomicBool::new(false),
            uncompacted: AtomicBool::new(false),
            dont_compact,
            eof_offset: AtomicU64::new(eof_offset),
            next_continuous_id: AtomicU32::new(0),
        })
    }

    /// Add or replace an entry's contents.
    pub fn update(
        &self,
        path: &str,
        bytes: &[u8],
        method: CompressionMethod,
        level: u32,
    ) -> Result<()> {
        let compressed = match method {
            CompressionMethod::Store => bytes.to_vec(),
            CompressionMethod::Deflate => self.deflate(bytes, level)?,
            CompressionMethod::Unsupported(code) => {
                return Err(ArchiveError::Unsupported(format!(
                    "compression method {code}"
                )));
            }
        };
        let crc32 = zipak_crypto::checksum::compute_crc32(bytes);
        let (mod_date, mod_time) = dos_timestamp_now();

        let normalized = zipak_format::path::normalize(path);
        let mut dir = self.dir.lock();

        let previous_range = dir
            .lookup(&normalized)
            .map(|e| ReservedRange {
                header_offset: e.local_header_offset,
                eof_offset: e.local_header_offset
                    + LOCAL_FILE_HEADER_FIXED_SIZE as u32
                    + e.name.len() as u32
                    + e.compressed_size,
            });

        let needed = LOCAL_FILE_HEADER_FIXED_SIZE as u32
            + normalized.len() as u32
            + compressed.len() as u32;

        let header_offset = match previous_range {
            Some(range) if range.eof_offset - range.header_offset == needed => range.header_offset,
            Some(range) if range.eof_offset - range.header_offset > needed => {
                self.uncompacted.store(true, Ordering::Release);
                range.header_offset
            }
            _ => {
                self.uncompacted.store(true, Ordering::Release);
                self.eof_offset.load(Ordering::Acquire) as u32
            }
        };

        let local = LocalFileHeader {
            version_needed: 20,
            flags: GeneralPurposeFlags(0),
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size: compressed.len() as u32,
            uncompressed_size: bytes.len() as u32,
            name: normalized.as_bytes().to_vec(),
            extra: Vec::new(),
        };

        self.write_local_header_and_data(header_offset, &local, &compressed)?;

        let new_eof = header_offset as u64 + u64::from(needed);
        if new_eof > self.eof_offset.load(Ordering::Acquire) {
            self.eof_offset.store(new_eof, Ordering::Release);
        }

        dir.insert(
            &normalized,
            FileEntry {
                name: String::new(),
                crc32,
                compressed_size: compressed.len() as u32,
                uncompressed_size: bytes.len() as u32,
                method,
                flags: GeneralPurposeFlags(0),
                local_header_offset: header_offset,
                mod_date,
                mod_time,
                key_slot: None,
            },
        );

        self.cdr_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Reserve `size` zero bytes for a streaming capture that will be
    /// filled in by later calls to [`Self::update_continuous_segment`].
    /// Returns an opaque continuous-write id.
    pub fn start_continuous(&self, path: &str, size: u64) -> Result<u32> {
        let zeros = vec![0u8; size as usize];
        self.update(path, &zeros, CompressionMethod::Store, 0)?;
        Ok(self.next_continuous_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Append or overwrite a segment of a continuous-write entry. Method
    /// must remain `Store`; no compression is applied to a single segment.
    pub fn update_continuous_segment(
        &self,
        path: &str,
        bytes: &[u8],
        overwrite_seek_pos: u32,
    ) -> Result<()> {
        let dir = self.dir.lock();
        let entry = dir
            .lookup(path)
            .cloned()
            .ok_or_else(|| ArchiveError::FileNotFound(path.to_string()))?;
        drop(dir);

        if entry.method != CompressionMethod::Store {
            return Err(ArchiveError::InvalidCall(
                "continuous-write entries must use Store".into(),
            ));
        }

        let data_offset = u64::from(entry.local_header_offset)
            + LOCAL_FILE_HEADER_FIXED_SIZE as u64
            + entry.name.len() as u64;

        let write_pos = if overwrite_seek_pos == NO_SEEK_OVERWRITE {
            data_offset + u64::from(entry.compressed_size)
        } else {
            data_offset + u64::from(overwrite_seek_pos)
        };

        self.zip_file.write_at(write_pos, bytes)?;
        self.cdr_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Unlink a file from the directory. Bytes are reclaimed only by
    /// [`Self::relink`].
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let mut dir = self.dir.lock();
        dir.remove(path)
            .ok_or_else(|| ArchiveError::FileNotFound(path.to_string()))?;
        self.uncompacted.store(true, Ordering::Release);
        self.cdr_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Unlink every file under `dir_path`.
    pub fn remove_dir(&self, dir_path: &str) -> Result<()> {
        let mut dir = self.dir.lock();
        let Some(node) = dir.lookup_dir(dir_path) else {
            return Err(ArchiveError::DirNotFound(dir_path.to_string()));
        };
        let victims: Vec<String> = node
            .files
            .iter()
            .map(|f| format!("{dir_path}/{}", f.name))
            .collect();
        drop(dir);
        let mut dir = self.dir.lock();
        for v in victims {
            dir.remove(&v);
        }
        self.uncompacted.store(true, Ordering::Release);
        self.cdr_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Unlink every file in the archive.
    pub fn remove_all(&self) {
        let mut dir = self.dir.lock();
        *dir = DirHeader::new();
        self.uncompacted.store(true, Ordering::Release);
        self.cdr_dirty.store(true, Ordering::Release);
    }

    /// `true` if the archive has entries removed or relocated since the
    /// last compaction.
    pub fn is_uncompacted(&self) -> bool {
        self.uncompacted.load(Ordering::Acquire)
    }

    /// Rewrite the central directory at the current end-of-data offset
    /// without otherwise touching entry bytes.
    pub fn write_cdr(&self) -> Result<()> {
        let dir = self.dir.lock();
        let entries = dir.iter_all();
        let cdr_offset = self.eof_offset.load(Ordering::Acquire);

        let mut buf = Vec::new();
        for (name, entry) in &entries {
            let header = CentralDirectoryFileHeader {
                version_made_by: 20,
                version_needed: 20,
                flags: entry.flags,
                method: entry.method,
                mod_time: entry.mod_time,
                mod_date: entry.mod_date,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                disk_number_start: 0,
                internal_attrs: 0,
                external_attrs: 0,
                local_header_offset: entry.local_header_offset,
                name: name.as_bytes().to_vec(),
                extra: Vec::new(),
                comment: Vec::new(),
            };
            let mut cursor = std::io::Cursor::new(&mut buf);
            cursor.seek_to_end()?;
            header
                .write(&mut cursor)
                .map_err(|e| ArchiveError::Format(e.into()))?;
        }

        self.zip_file.write_at(cdr_offset, &buf)?;

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cdr_disk_number: 0,
            cdr_entries_this_disk: entries.len() as u16,
            cdr_entries_total: entries.len() as u16,
            cdr_size: buf.len() as u32,
            cdr_offset: cdr_offset as u32,
            comment: Vec::new(),
        };
        let mut eocd_buf = Vec::new();
        {
            let mut cursor = std::io::Cursor::new(&mut eocd_buf);
            eocd.write(&mut cursor)
                .map_err(|e| ArchiveError::Format(e.into()))?;
        }
        self.zip_file
            .write_at(cdr_offset + buf.len() as u64, &eocd_buf)?;
        self.zip_file.flush()?;

        self.cdr_dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Produce a tightly packed copy of the archive, reclaiming bytes left
    /// behind by removed or relocated entries, then atomically replace the
    /// original file with it.
    pub fn relink(&self) -> Result<()> {
        let dir_snapshot = self.dir.lock().clone();
        let mut entries = dir_snapshot.iter_all();
        entries.sort_by_key(|(_, e)| e.local_header_offset);

        let tmp_path = self.temp_path();
        let tmp = ZipFile::open_rw(&tmp_path, true)?;

        let mut new_dir = DirHeader::new();
        let mut cursor: u64 = 0;

        for (name, entry) in &entries {
            let data_offset = u64::from(entry.local_header_offset)
                + LOCAL_FILE_HEADER_FIXED_SIZE as u64
                + entry.name.len() as u64;
            let mut scratch = self.arena.temp_alloc(entry.compressed_size as usize);
            scratch.resize(entry.compressed_size as usize, 0);
            if let Err(e) = self.zip_file.read_at(data_offset, scratch.as_mut_slice()) {
                self.arena.temp_free(scratch);
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
            let data = scratch.as_slice().to_vec();
            self.arena.temp_free(scratch);

            let new_header_offset = cursor;
            let local = LocalFileHeader {
                version_needed: 20,
                flags: entry.flags,
                method: entry.method,
                mod_time: entry.mod_time,
                mod_date: entry.mod_date,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                name: name.as_bytes().to_vec(),
                extra: Vec::new(),
            };

            let mut header_buf = Vec::new();
            {
                let mut w = std::io::Cursor::new(&mut header_buf);
                if let Err(e) = local.write(&mut w) {
                    let _ = std::fs::remove_file(&tmp_path);
                    return Err(ArchiveError::Format(e.into()));
                }
            }
            if let Err(e) = tmp.write_at(new_header_offset, &header_buf) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
            if let Err(e) = tmp.write_at(new_header_offset + header_buf.len() as u64, &data) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }

            cursor = new_header_offset + header_buf.len() as u64 + data.len() as u64;

            new_dir.insert(
                name,
                FileEntry {
                    name: String::new(),
                    local_header_offset: new_header_offset as u32,
                    ..(*entry).clone()
                },
            );
        }

        let cdr_offset = cursor;
        let cdr_entries: Vec<_> = new_dir.iter_all();
        let mut cdr_buf = Vec::new();
        for (name, entry) in &cdr_entries {
            let header = CentralDirectoryFileHeader {
                version_made_by: 20,
                version_needed: 20,
                flags: entry.flags,
                method: entry.method,
                mod_time: entry.mod_time,
                mod_date: entry.mod_date,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                disk_number_start: 0,
                internal_attrs: 0,
                external_attrs: 0,
                local_header_offset: entry.local_header_offset,
                name: name.as_bytes().to_vec(),
                extra: Vec::new(),
                comment: Vec::new(),
            };
            let mut w = std::io::Cursor::new(&mut cdr_buf);
            w.seek_to_end()?;
            if let Err(e) = header.write(&mut w) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(ArchiveError::Format(e.into()));
            }
        }
        if let Err(e) = tmp.write_at(cdr_offset, &cdr_buf) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            cdr_disk_number: 0,
            cdr_entries_this_disk: cdr_entries.len() as u16,
            cdr_entries_total: cdr_entries.len() as u16,
            cdr_size: cdr_buf.len() as u32,
            cdr_offset: cdr_offset as u32,
            comment: Vec::new(),
        };
        let mut eocd_buf = Vec::new();
        {
            let mut w = std::io::Cursor::new(&mut eocd_buf);
            if let Err(e) = eocd.write(&mut w) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(ArchiveError::Format(e.into()));
            }
        }
        if let Err(e) = tmp.write_at(cdr_offset + cdr_buf.len() as u64, &eocd_buf) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        tmp.flush()?;
        drop(tmp);

        std::fs::remove_file(&self.path)?;
        std::fs::rename(&tmp_path, &self.path)?;

        *self.dir.lock() = new_dir;
        self.eof_offset.store(cdr_offset, Ordering::Release);
        self.uncompacted.store(false, Ordering::Release);
        self.cdr_dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Flush pending changes, compacting first unless `dont_compact` was
    /// set when this handle was opened.
    pub fn close(&self) -> Result<()> {
        if self.cdr_dirty.load(Ordering::Acquire) {
            if !self.dont_compact && self.relink().is_err() {
                self.write_cdr()?;
            } else if self.dont_compact {
                self.write_cdr()?;
            }
        }
        self.zip_file.flush()
    }

    fn temp_path(&self) -> PathBuf {
        let suffix: u32 = std::process::id() ^ (self.eof_offset.load(Ordering::Acquire) as u32);
        self.path.with_extension(format!("tmp{suffix:08x}"))
    }

    fn write_local_header_and_data(
        &self,
        offset: u32,
        header: &LocalFileHeader,
        data: &[u8],
    ) -> Result<()> {
        let mut buf = Vec::new();
        {
            let mut w = std::io::Cursor::new(&mut buf);
            header
                .write(&mut w)
                .map_err(|e| ArchiveError::Format(e.into()))?;
        }
        self.zip_file.write_at(u64::from(offset), &buf)?;

        let mut written = 0usize;
        while written < data.len() {
            let end = (written + WRITE_CHUNK).min(data.len());
            self.zip_file.write_at(
                u64::from(offset) + buf.len() as u64 + written as u64,
                &data[written..end],
            )?;
            written = end;
        }
        Ok(())
    }

    fn deflate(&self, bytes: &[u8], level: u32) -> Result<Vec<u8>> {
        let mut compress = Compress::new(Compression::new(level), false);
        let mut out = Vec::with_capacity(bytes.len());
        let status = compress
            .compress_vec(bytes, &mut out, FlushCompress::Finish)
            .map_err(|e| ArchiveError::Zlib(e.to_string()))?;
        if status != Status::StreamEnd {
            return Err(ArchiveError::Zlib("deflate did not finish".into()));
        }
        Ok(out)
    }
}

trait SeekToEnd {
    fn seek_to_end(&mut self) -> Result<()>;
}

impl<T: std::io::Write + std::io::Seek> SeekToEnd for T {
    fn seek_to_end(&mut self) -> Result<()> {
        self.seek(std::io::SeekFrom::End(0))?;
        Ok(())
    }
}

/// Convert the current wall-clock time into MS-DOS date/time fields.
fn dos_timestamp_now() -> (u16, u16) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dos_timestamp_from_unix(secs)
}

/// Proleptic Gregorian day count to (year, month, day), per Howard
/// Hinnant's `civil_from_days`. `days_since_epoch` is days since
/// 1970-01-01.
fn civil_from_days(days_since_epoch: i64) -> (i64, u32, u32) {
    let z = days_since_epoch + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097); // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32; // [1, 31]
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32; // [1, 12]
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

fn dos_timestamp_from_unix(unix_secs: u64) -> (u16, u16) {
    let days_since_epoch = (unix_secs / 86400) as i64;
    let (year, month, day) = civil_from_days(days_since_epoch);
    let year_since_1980 = year.saturating_sub(1980).clamp(0, 127) as u16;

    let secs_of_day = unix_secs % 86400;
    let hour = (secs_of_day / 3600) as u16;
    let minute = ((secs_of_day % 3600) / 60) as u16;
    let second = (secs_of_day % 60) as u16;

    let dos_date = (year_since_1980 << 9) | ((month as u16) << 5) | day as u16;
    let dos_time = (hour << 11) | (minute << 5) | (second / 2);
    (dos_date, dos_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_relink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.pak");
        let rw = CacheRw::open(&path, true, false).unwrap();

        rw.update("a.txt", b"hello", CompressionMethod::Store, 0)
            .unwrap();
        rw.update("b.txt", b"world, a longer payload", CompressionMethod::Deflate, 6)
            .unwrap();
        rw.relink().unwrap();

        let mut reader = super::super::cache_factory::ArchiveCursor::new(&rw.zip_file);
        let scanned = zipak_format::scan::scan(&mut reader).unwrap();
        assert!(scanned.dir.lookup("a.txt").is_some());
        assert!(scanned.dir.lookup("b.txt").is_some());
    }

    #[test]
    fn remove_file_then_relink_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.pak");
        let rw = CacheRw::open(&path, true, false).unwrap();
        rw.update("a.txt", b"hello", CompressionMethod::Store, 0)
            .unwrap();
        rw.remove_file("a.txt").unwrap();
        rw.relink().unwrap();

        let mut reader = super::super::cache_factory::ArchiveCursor::new(&rw.zip_file);
        let scanned = zipak_format::scan::scan(&mut reader).unwrap();
        assert!(scanned.dir.lookup("a.txt").is_none());
    }

    #[test]
    fn dos_timestamp_from_unix_is_stable() {
        let (date, time) = dos_timestamp_from_unix(0);
        assert_eq!(date >> 9, 0);
        assert_eq!(time, 0);
    }

    #[test]
    fn dos_timestamp_from_unix_matches_known_date() {
        // 2024-01-15T12:34:56Z
        let (date, time) = dos_timestamp_from_unix(1_705_322_096);
        let year = 1980 + (date >> 9);
        let month = (date >> 5) & 0x0f;
        let day = date & 0x1f;
        assert_eq!((year, month, day), (2024, 1, 15));

        let hour = time >> 11;
        let minute = (time >> 5) & 0x3f;
        let second = (time & 0x1f) * 2;
        assert_eq!((hour, minute, second), (12, 34, 56));
    }

    #[test]
    fn dos_timestamp_from_unix_handles_leap_day() {
        // 2024-02-29T00:00:00Z, a leap day the old %365/%30 approximation
        // could never land on exactly.
        let (date, _) = dos_timestamp_from_unix(1_709_164_800);
        let year = 1980 + (date >> 9);
        let month = (date >> 5) & 0x0f;
        let day = date & 0x1f;
        assert_eq!((year, month, day), (2024, 2, 29));
    }
}
