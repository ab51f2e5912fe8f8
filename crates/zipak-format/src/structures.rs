//! On-disk ZIP binary structures
//!
//! Hand-written [`BinRead`]/[`BinWrite`] implementations for the handful of
//! record types a packaged-archive reader needs: the local file header, the
//! central directory file header, the end-of-central-directory record, and
//! the small set of trailing headers the writer appends for encrypted or
//! signed archives. All multi-byte fields are little-endian, matching the
//! PKZIP APPNOTE layout; the trailing headers are big-endian, matching the
//! writer that emits them.

use binrw::io::{Read, Seek, Write};
use binrw::meta::{EndianKind, ReadEndian, WriteEndian};
use binrw::{BinRead, BinResult, BinWrite, binrw};

use crate::error::FormatError;

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4B50;
/// Central directory file header signature (`PK\x01\x02`).
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x0201_4B50;
/// End-of-central-directory record signature (`PK\x05\x06`).
pub const END_OF_CDR_SIG: u32 = 0x0605_4B50;

/// Extra field id for the NTFS timestamp block.
pub const EXTRA_NTFS_ID: u16 = 0x000A;

/// Size in bytes of the local file header's fixed-length portion, before
/// the variable-length name and extra fields.
pub const LOCAL_FILE_HEADER_FIXED_SIZE: usize = 30;

/// Trailing header id emitted after the CDR when the archive carries
/// per-file stream-cipher key table material.
pub const CUSTOM_ENCRYPTION_HEADER_SIG: u32 = 0x5243_4543; // "CECR"
/// Trailing header id emitted when the CDR itself is RSA-signed.
pub const SIGNED_CDR_HEADER_SIG: u32 = 0x5243_4453; // "SDCR"
/// Trailing header id for writer-defined extended metadata.
pub const CUSTOM_EXTENDED_HEADER_SIG: u32 = 0x5243_5845; // "EXCR"

/// Compression method stored in local/central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored, no compression.
    Store,
    /// DEFLATE.
    Deflate,
    /// Any method this reader does not implement.
    Unsupported(u16),
}

impl CompressionMethod {
    fn from_u16(v: u16) -> Self {
        match v {
            0 => Self::Store,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }

    fn to_u16(self) -> u16 {
        match self {
            Self::Store => 0,
            Self::Deflate => 8,
            Self::Unsupported(v) => v,
        }
    }
}

/// General purpose bit flags, as stored in local/central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralPurposeFlags(pub u16);

impl GeneralPurposeFlags {
    /// Bit 0: entry data is encrypted.
    pub fn is_encrypted(self) -> bool {
        self.0 & 0x0001 != 0
    }

    /// Bit 3: sizes and CRC live in a trailing data descriptor.
    pub fn has_data_descriptor(self) -> bool {
        self.0 & 0x0008 != 0
    }
}

/// Local file header (30-byte fixed portion, preceding file name/extra/data).
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flags.
    pub flags: GeneralPurposeFlags,
    /// Compression method.
    pub method: CompressionMethod,
    /// MS-DOS last modified time.
    pub mod_time: u16,
    /// MS-DOS last modified date.
    pub mod_date: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size in bytes.
    pub compressed_size: u32,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u32,
    /// File name, stored verbatim (backslash/forward-slash as written).
    pub name: Vec<u8>,
    /// Raw extra field bytes, including any NTFS timestamp block.
    pub extra: Vec<u8>,
}

impl BinRead for LocalFileHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let sig = u32::read_options(reader, binrw::Endian::Little, ())?;
        if sig != LOCAL_FILE_HEADER_SIG {
            return Err(binrw::Error::Custom {
                pos,
                err: Box::new(FormatError::DataIsCorrupt(format!(
                    "bad local file header signature: {sig:#010x}"
                ))),
            });
        }

        let version_needed = u16::read_options(reader, endian, ())?;
        let flags = GeneralPurposeFlags(u16::read_options(reader, endian, ())?);
        let method = CompressionMethod::from_u16(u16::read_options(reader, endian, ())?);
        let mod_time = u16::read_options(reader, endian, ())?;
        let mod_date = u16::read_options(reader, endian, ())?;
        let crc32 = u32::read_options(reader, endian, ())?;
        let compressed_size = u32::read_options(reader, endian, ())?;
        let uncompressed_size = u32::read_options(reader, endian, ())?;
        let name_len = u16::read_options(reader, endian, ())? as usize;
        let extra_len = u16::read_options(reader, endian, ())? as usize;

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        reader.read_exact(&mut extra)?;

        Ok(Self {
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }
}

impl ReadEndian for LocalFileHeader {
    const ENDIAN: EndianKind = EndianKind::Endian(binrw::Endian::Little);
}

impl WriteEndian for LocalFileHeader {
    const ENDIAN: EndianKind = EndianKind::Endian(binrw::Endian::Little);
}

impl BinWrite for LocalFileHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        LOCAL_FILE_HEADER_SIG.write_options(writer, binrw::Endian::Little, ())?;
        self.version_needed.write_options(writer, endian, ())?;
        self.flags.0.write_options(writer, endian, ())?;
        self.method.to_u16().write_options(writer, endian, ())?;
        self.mod_time.write_options(writer, endian, ())?;
        self.mod_date.write_options(writer, endian, ())?;
        self.crc32.write_options(writer, endian, ())?;
        self.compressed_size.write_options(writer, endian, ())?;
        self.uncompressed_size.write_options(writer, endian, ())?;
        (self.name.len() as u16).write_options(writer, endian, ())?;
        (self.extra.len() as u16).write_options(writer, endian, ())?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }
}

/// Central directory file header.
#[derive(Debug, Clone)]
pub struct CentralDirectoryFileHeader {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flags.
    pub flags: GeneralPurposeFlags,
    /// Compression method.
    pub method: CompressionMethod,
    /// MS-DOS last modified time.
    pub mod_time: u16,
    /// MS-DOS last modified date.
    pub mod_date: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size in bytes.
    pub compressed_size: u32,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u32,
    /// Disk number start (always 0, single-volume archives only).
    pub disk_number_start: u16,
    /// Internal file attributes.
    pub internal_attrs: u16,
    /// External file attributes.
    pub external_attrs: u32,
    /// Byte offset of the associated local file header.
    pub local_header_offset: u32,
    /// File name.
    pub name: Vec<u8>,
    /// Extra field bytes.
    pub extra: Vec<u8>,
    /// File comment.
    pub comment: Vec<u8>,
}

impl BinRead for CentralDirectoryFileHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let sig = u32::read_options(reader, binrw::Endian::Little, ())?;
        if sig != CENTRAL_DIR_HEADER_SIG {
            return Err(binrw::Error::Custom {
                pos,
                err: Box::new(FormatError::CdrIsCorrupt(format!(
                    "bad central directory header signature: {sig:#010x}"
                ))),
            });
        }

        let version_made_by = u16::read_options(reader, endian, ())?;
        let version_needed = u16::read_options(reader, endian, ())?;
        let flags = GeneralPurposeFlags(u16::read_options(reader, endian, ())?);
        let method = CompressionMethod::from_u16(u16::read_options(reader, endian, ())?);
        let mod_time = u16::read_options(reader, endian, ())?;
        let mod_date = u16::read_options(reader, endian, ())?;
        let crc32 = u32::read_options(reader, endian, ())?;
        let compressed_size = u32::read_options(reader, endian, ())?;
        let uncompressed_size = u32::read_options(reader, endian, ())?;
        let name_len = u16::read_options(reader, endian, ())? as usize;
        let extra_len = u16::read_options(reader, endian, ())? as usize;
        let comment_len = u16::read_options(reader, endian, ())? as usize;
        let disk_number_start = u16::read_options(reader, endian, ())?;
        let internal_attrs = u16::read_options(reader, endian, ())?;
        let external_attrs = u32::read_options(reader, endian, ())?;
        let local_header_offset = u32::read_options(reader, endian, ())?;

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        reader.read_exact(&mut extra)?;
        let mut comment = vec![0u8; comment_len];
        reader.read_exact(&mut comment)?;

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attrs,
            external_attrs,
            local_header_offset,
            name,
            extra,
            comment,
        })
    }
}

impl ReadEndian for CentralDirectoryFileHeader {
    const ENDIAN: EndianKind = EndianKind::Endian(binrw::Endian::Little);
}

impl WriteEndian for CentralDirectoryFileHeader {
    const ENDIAN: EndianKind = EndianKind::Endian(binrw::Endian::Little);
}

impl BinWrite for CentralDirectoryFileHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        CENTRAL_DIR_HEADER_SIG.write_options(writer, binrw::Endian::Little, ())?;
        self.version_made_by.write_options(writer, endian, ())?;
        self.version_needed.write_options(writer, endian, ())?;
        self.flags.0.write_options(writer, endian, ())?;
        self.method.to_u16().write_options(writer, endian, ())?;
        self.mod_time.write_options(writer, endian, ())?;
        self.mod_date.write_options(writer, endian, ())?;
        self.crc32.write_options(writer, endian, ())?;
        self.compressed_size.write_options(writer, endian, ())?;
        self.uncompressed_size.write_options(writer, endian, ())?;
        (self.name.len() as u16).write_options(writer, endian, ())?;
        (self.extra.len() as u16).write_options(writer, endian, ())?;
        (self.comment.len() as u16).write_options(writer, endian, ())?;
        self.disk_number_start.write_options(writer, endian, ())?;
        self.internal_attrs.write_options(writer, endian, ())?;
        self.external_attrs.write_options(writer, endian, ())?;
        self.local_header_offset.write_options(writer, endian, ())?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }
}

/// End-of-central-directory record.
#[binrw]
#[derive(Debug, Clone)]
#[brw(little, magic = 0x0605_4B50u32)]
pub struct EndOfCentralDirectory {
    /// Number of this disk (always 0).
    pub disk_number: u16,
    /// Disk where the central directory starts (always 0).
    pub cdr_disk_number: u16,
    /// Number of central directory records on this disk.
    pub cdr_entries_this_disk: u16,
    /// Total number of central directory records.
    pub cdr_entries_total: u16,
    /// Size in bytes of the central directory.
    pub cdr_size: u32,
    /// Offset of the start of the central directory relative to the
    /// start of the archive.
    pub cdr_offset: u32,
    /// Archive comment length.
    #[br(temp)]
    #[bw(calc = comment.len() as u16)]
    pub comment_len: u16,
    /// Archive comment.
    #[br(count = comment_len)]
    pub comment: Vec<u8>,
}

/// NTFS extra field timestamp block (tag 0x000A).
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct ExtraNtfsField {
    /// Modification time, in Win32 FILETIME ticks.
    pub mtime: u64,
    /// Access time, in Win32 FILETIME ticks.
    pub atime: u64,
    /// Creation time, in Win32 FILETIME ticks.
    pub ctime: u64,
}

/// Trailing header describing the stream-cipher key table used to decrypt
/// this archive's entries, written after the central directory.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 0x5243_4543u32)]
pub struct CustomEncryptionHeader {
    /// Asymmetrically-encrypted blob containing the IV and per-slot keys.
    #[br(temp)]
    #[bw(calc = encrypted_key_table.len() as u32)]
    pub blob_len: u32,
    #[br(count = blob_len)]
    pub encrypted_key_table: Vec<u8>,
}

/// Trailing header carrying an RSA signature over the central directory,
/// written after the central directory (and after
/// [`CustomEncryptionHeader`] when both are present).
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 0x5243_4453u32)]
pub struct SignedCdrHeader {
    /// Signature length in bytes.
    #[br(temp)]
    #[bw(calc = signature.len() as u32)]
    pub signature_len: u32,
    #[br(count = signature_len)]
    pub signature: Vec<u8>,
}

/// Writer-defined extended metadata trailing header.
#[binrw]
#[derive(Debug, Clone)]
#[brw(big, magic = 0x5243_5845u32)]
pub struct CustomExtendedHeader {
    /// Format revision of the payload below.
    pub version: u16,
    #[br(temp)]
    #[bw(calc = payload.len() as u32)]
    pub payload_len: u32,
    #[br(count = payload_len)]
    pub payload: Vec<u8>,
}
