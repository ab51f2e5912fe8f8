//! Central directory discovery and parsing
//!
//! Locating the central directory means scanning backward from the end of
//! the archive for the end-of-central-directory signature (it can't be
//! found by a forward walk alone because the archive comment is
//! variable-length and may itself contain the signature bytes). Once found,
//! the CDR is read forward from `cdr_offset` and any writer-appended
//! trailing headers between the CDR and the EOCD record are recovered.

use std::io::{Read, Seek, SeekFrom};

use binrw::BinRead;

use crate::dirheader::{DirHeader, FileEntry};
use crate::error::{FormatError, Result};
use crate::structures::{
    CentralDirectoryFileHeader, CustomEncryptionHeader, CustomExtendedHeader,
    EndOfCentralDirectory, SignedCdrHeader, CENTRAL_DIR_HEADER_SIG, END_OF_CDR_SIG,
};

/// Maximum EOCD comment length allowed by the format (u16).
const MAX_COMMENT_LEN: usize = u16::MAX as usize;
/// Fixed portion of the EOCD record, not counting the comment.
const EOCD_FIXED_LEN: usize = 22;

/// Trailing headers recovered between the end of the central directory and
/// the start of the EOCD record.
#[derive(Debug, Clone, Default)]
pub struct TrailingHeaders {
    /// Stream-cipher key table, present on `STREAMCIPHER_KEYTABLE` archives.
    pub encryption: Option<CustomEncryptionHeader>,
    /// RSA signature over the central directory.
    pub signature: Option<SignedCdrHeader>,
    /// Writer-defined extended metadata.
    pub extended: Option<CustomExtendedHeader>,
}

/// Everything recovered from scanning an archive's tail.
pub struct ScanResult {
    /// Parsed directory tree and flat index.
    pub dir: DirHeader,
    /// The end-of-central-directory record itself.
    pub eocd: EndOfCentralDirectory,
    /// Any trailing headers found after the central directory.
    pub trailing: TrailingHeaders,
}

/// Scan `reader` for the end-of-central-directory record, parse the central
/// directory it points to, and build a [`DirHeader`] from it.
pub fn scan<R: Read + Seek>(reader: &mut R) -> Result<ScanResult> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let eocd_pos = find_eocd(reader, file_len)?;

    reader.seek(SeekFrom::Start(eocd_pos))?;
    let eocd = EndOfCentralDirectory::read(reader).map_err(FormatError::BinRw)?;

    if eocd.cdr_entries_this_disk != eocd.cdr_entries_total || eocd.disk_number != 0 {
        return Err(FormatError::Unsupported(
            "multi-disk archives are not supported".into(),
        ));
    }

    let cdr_start = u64::from(eocd.cdr_offset);
    let cdr_end = cdr_start + u64::from(eocd.cdr_size);
    if cdr_end > eocd_pos {
        return Err(FormatError::CdrIsCorrupt(
            "central directory overruns end-of-central-directory record".into(),
        ));
    }

    reader.seek(SeekFrom::Start(cdr_start))?;
    let mut dir = DirHeader::new();
    for _ in 0..eocd.cdr_entries_total {
        let header =
            CentralDirectoryFileHeader::read_options(reader, binrw::Endian::Little, ())
                .map_err(FormatError::BinRw)?;
        let name = String::from_utf8_lossy(&header.name).into_owned();
        dir.insert(
            &name,
            FileEntry {
                name: String::new(),
                crc32: header.crc32,
                compressed_size: header.compressed_size,
                uncompressed_size: header.uncompressed_size,
                method: header.method,
                flags: header.flags,
                local_header_offset: header.local_header_offset,
                mod_date: header.mod_date,
                mod_time: header.mod_time,
                key_slot: None,
            },
        );
    }

    let actual_cdr_end = reader.stream_position()?;
    if actual_cdr_end != cdr_end {
        return Err(FormatError::CdrIsCorrupt(format!(
            "central directory size mismatch: header said {} bytes, parsed {} bytes",
            eocd.cdr_size,
            actual_cdr_end - cdr_start
        )));
    }

    let trailing = read_trailing_headers(reader, actual_cdr_end, eocd_pos)?;

    Ok(ScanResult {
        dir,
        eocd,
        trailing,
    })
}

/// Search backward from the end of the file for the EOCD signature. The
/// search window is bounded by the maximum possible comment length so a
/// pathological archive can't force an unbounded scan.
fn find_eocd<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<u64> {
    if file_len < EOCD_FIXED_LEN as u64 {
        return Err(FormatError::NoCdr);
    }

    let window = (EOCD_FIXED_LEN + MAX_COMMENT_LEN).min(file_len as usize) as u64;
    let start = file_len - window;
    reader.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; window as usize];
    reader.read_exact(&mut buf)?;

    let sig = END_OF_CDR_SIG.to_le_bytes();
    for i in (0..=buf.len().saturating_sub(4)).rev() {
        if buf[i..i + 4] == sig {
            return Ok(start + i as u64);
        }
    }
    Err(FormatError::NoCdr)
}

fn read_trailing_headers<R: Read + Seek>(
    reader: &mut R,
    from: u64,
    to: u64,
) -> Result<TrailingHeaders> {
    let mut trailing = TrailingHeaders::default();
    if to <= from {
        return Ok(trailing);
    }

    reader.seek(SeekFrom::Start(from))?;
    while reader.stream_position()? + 4 <= to {
        let mut peek = [0u8; 4];
        let tag_pos = reader.stream_position()?;
        reader.read_exact(&mut peek)?;
        let tag = u32::from_be_bytes(peek);
        reader.seek(SeekFrom::Start(tag_pos))?;

        match tag {
            crate::structures::CUSTOM_ENCRYPTION_HEADER_SIG => {
                trailing.encryption = Some(
                    CustomEncryptionHeader::read(reader).map_err(FormatError::BinRw)?,
                );
            }
            crate::structures::SIGNED_CDR_HEADER_SIG => {
                trailing.signature =
                    Some(SignedCdrHeader::read(reader).map_err(FormatError::BinRw)?);
            }
            crate::structures::CUSTOM_EXTENDED_HEADER_SIG => {
                trailing.extended =
                    Some(CustomExtendedHeader::read(reader).map_err(FormatError::BinRw)?);
            }
            _ => {
                // Unrecognized trailing bytes before the EOCD record; stop
                // rather than mis-parse them as a header we don't know.
                break;
            }
        }
    }

    let _ = CENTRAL_DIR_HEADER_SIG; // kept for cross-module signature parity in docs
    Ok(trailing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{CompressionMethod, GeneralPurposeFlags, LocalFileHeader};
    use binrw::BinWrite;
    use std::io::Cursor;

    fn build_minimal_archive() -> Vec<u8> {
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
    fn scans_minimal_archive() {
        let buf = build_minimal_archive();
        let mut cursor = Cursor::new(buf);
        let result = scan(&mut cursor).unwrap();
        assert_eq!(result.dir.file_count(), 1);
        assert!(result.dir.lookup("hello.txt").is_some());
        assert!(result.trailing.encryption.is_none());
    }

    #[test]
    fn missing_eocd_is_reported() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(matches!(scan(&mut cursor), Err(FormatError::NoCdr)));
    }
}
