//! Container layout (§4.K, §6): the fixed header at offset 0, the 24-byte
//! resource entry, and the placement discipline that ties everything else
//! together byte-exactly.
//!
//! # Resource entry (24 bytes, little-endian)
//! ```text
//! Offset  Size  Field
//!    0      7   size           56-bit compressed-or-stored size
//!    7      1   flags          METADATA | COMPRESSED | SPANNED
//!    8      8   offset         high 2 bits reserved, masked on read
//!   16      8   original_size  high 2 bits reserved, masked on read
//! ```
//! Invariant: if `COMPRESSED` is clear, `size == original_size` (§3).
//!
//! # Header (208 bytes, little-endian)
//! Magic, version, flags, chunk size, GUID, part number/total parts,
//! image count, boot index, and four embedded resource entries (blob
//! table, XML data, integrity table, boot metadata) — §4.K. The header is
//! always rewritten *last*, after every other resource is in place, so an
//! interrupted write cannot corrupt an existing file except by damaging
//! the header itself (§4.K, §7).

use crate::codec::CodecId;
use crate::endian::{get_u64, put_u64};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("invalid magic number — not a recognized container")]
    InvalidMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

// ── Resource entry ──────────────────────────────────────────────────────────

pub const RESOURCE_ENTRY_SIZE: usize = 24;

pub const FLAG_METADATA: u8 = 0x02;
pub const FLAG_COMPRESSED: u8 = 0x04;
pub const FLAG_SPANNED: u8 = 0x08;

/// Mask applied to `offset` and `original_size`: the top 2 bits are
/// reserved and are silently masked out on read (§9 open question — this
/// spec chooses warn-and-mask to match existing files, not reject-as-
/// corrupt).
const RESERVED_BITS_MASK: u64 = (1u64 << 62) - 1;

/// The container's universal pointer to a byte range (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceEntry {
    pub size: u64,
    pub flags: u8,
    pub offset: u64,
    pub original_size: u64,
}

impl ResourceEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
    pub fn is_metadata(&self) -> bool {
        self.flags & FLAG_METADATA != 0
    }
    pub fn is_spanned(&self) -> bool {
        self.flags & FLAG_SPANNED != 0
    }

    pub fn read(buf: &[u8; RESOURCE_ENTRY_SIZE]) -> Self {
        // size is a 56-bit little-endian value in bytes 0..7; flags is byte 7.
        let mut size_bytes = [0u8; 8];
        size_bytes[..7].copy_from_slice(&buf[0..7]);
        let size = get_u64(&size_bytes);
        let flags = buf[7];

        let raw_offset = get_u64(&buf[8..16]);
        let raw_original_size = get_u64(&buf[16..24]);

        let offset = raw_offset & RESERVED_BITS_MASK;
        let original_size = raw_original_size & RESERVED_BITS_MASK;

        if offset != raw_offset {
            log::warn!(
                "resource entry offset {raw_offset:#018x} has reserved high bits set; masked to {offset:#018x}"
            );
        }
        if original_size != raw_original_size {
            log::warn!(
                "resource entry original_size {raw_original_size:#018x} has reserved high bits set; masked to {original_size:#018x}"
            );
        }

        Self { size, flags, offset, original_size }
    }

    pub fn write(&self, buf: &mut [u8; RESOURCE_ENTRY_SIZE]) {
        let size_bytes = self.size.to_le_bytes();
        buf[0..7].copy_from_slice(&size_bytes[0..7]);
        buf[7] = self.flags;
        put_u64(&mut buf[8..16], self.offset);
        put_u64(&mut buf[16..24], self.original_size);
    }

    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let mut buf = [0u8; RESOURCE_ENTRY_SIZE];
        r.read_exact(&mut buf)?;
        Ok(Self::read(&buf))
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut buf = [0u8; RESOURCE_ENTRY_SIZE];
        self.write(&mut buf);
        w.write_all(&buf)
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

pub const MAGIC: &[u8; 8] = b"WIMARC\0\0";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 208;

pub const HDR_FLAG_COMPRESSION: u32 = 0x0000_0002;
pub const HDR_FLAG_SPANNED: u32 = 0x0000_0010;
pub const HDR_FLAG_RP_FIX: u32 = 0x0000_0080;

#[derive(Debug, Clone)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub flags: u32,
    /// Fixed at 32 KiB per §3, but carried on disk for forward
    /// compatibility the way the real format does.
    pub chunk_size: u32,
    pub guid: Uuid,
    pub part_number: u16,
    pub total_parts: u16,
    pub image_count: u32,
    pub blob_table: ResourceEntry,
    pub xml_data: ResourceEntry,
    pub boot_metadata: ResourceEntry,
    pub integrity_table: ResourceEntry,
    pub boot_index: u32,
    pub codec: Option<CodecId>,
}

impl Header {
    pub fn new() -> Self {
        Self {
            magic: *MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            chunk_size: crate::codec::CHUNK_SIZE as u32,
            guid: Uuid::new_v4(),
            part_number: 1,
            total_parts: 1,
            image_count: 0,
            blob_table: ResourceEntry::default(),
            xml_data: ResourceEntry::default(),
            boot_metadata: ResourceEntry::default(),
            integrity_table: ResourceEntry::default(),
            boot_index: 0,
            codec: None,
        }
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self, ContainerError> {
        let mut buf = [0u8; HEADER_SIZE];
        r.read_exact(&mut buf)?;

        if &buf[0..8] != MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        let mut cur = &buf[8..];
        let version = cur.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let flags = cur.read_u32::<LittleEndian>()?;
        let chunk_size = cur.read_u32::<LittleEndian>()?;

        let mut guid_bytes = [0u8; 16];
        cur.read_exact(&mut guid_bytes)?;
        let guid = Uuid::from_bytes(guid_bytes);

        let part_number = cur.read_u16::<LittleEndian>()?;
        let total_parts = cur.read_u16::<LittleEndian>()?;
        let image_count = cur.read_u32::<LittleEndian>()?;

        let blob_table = ResourceEntry::read_from(&mut cur)?;
        let xml_data = ResourceEntry::read_from(&mut cur)?;
        let boot_metadata = ResourceEntry::read_from(&mut cur)?;
        let integrity_table = ResourceEntry::read_from(&mut cur)?;

        let boot_index = cur.read_u32::<LittleEndian>()?;
        let codec_raw = cur.read_u16::<LittleEndian>()?;
        let codec = CodecId::from_u16(codec_raw);

        Ok(Self {
            magic: *MAGIC,
            version,
            flags,
            chunk_size,
            guid,
            part_number,
            total_parts,
            image_count,
            blob_table,
            xml_data,
            boot_metadata,
            integrity_table,
            boot_index,
            codec,
        })
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut body = Vec::with_capacity(HEADER_SIZE);
        body.extend_from_slice(&self.magic);
        body.write_u32::<LittleEndian>(self.version)?;
        body.write_u32::<LittleEndian>(self.flags)?;
        body.write_u32::<LittleEndian>(self.chunk_size)?;
        body.extend_from_slice(self.guid.as_bytes());
        body.write_u16::<LittleEndian>(self.part_number)?;
        body.write_u16::<LittleEndian>(self.total_parts)?;
        body.write_u32::<LittleEndian>(self.image_count)?;

        for entry in [
            &self.blob_table,
            &self.xml_data,
            &self.boot_metadata,
            &self.integrity_table,
        ] {
            let mut buf = [0u8; RESOURCE_ENTRY_SIZE];
            entry.write(&mut buf);
            body.extend_from_slice(&buf);
        }

        body.write_u32::<LittleEndian>(self.boot_index)?;
        body.write_u16::<LittleEndian>(self.codec.map(|c| c as u16).unwrap_or(0))?;

        assert!(body.len() <= HEADER_SIZE, "header body exceeds reserved size");
        body.resize(HEADER_SIZE, 0u8);
        w.write_all(&body)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_entry_round_trip() {
        let e = ResourceEntry {
            size: 12345,
            flags: FLAG_COMPRESSED,
            offset: 0xABCD_0000,
            original_size: 99999,
        };
        let mut buf = [0u8; RESOURCE_ENTRY_SIZE];
        e.write(&mut buf);
        let back = ResourceEntry::read(&buf);
        assert_eq!(e, back);
    }

    /// Scenario S6: a resource entry read from disk has
    /// `offset = 0xC000_0000_0000_0001`; the loaded entry's offset must be
    /// `0x0000_0000_0000_0001`.
    #[test]
    fn truncation_masking_s6() {
        let mut buf = [0u8; RESOURCE_ENTRY_SIZE];
        buf[7] = 0; // flags
        put_u64(&mut buf[8..16], 0xC000_0000_0000_0001);
        let e = ResourceEntry::read(&buf);
        assert_eq!(e.offset, 0x0000_0000_0000_0001);
    }

    #[test]
    fn header_round_trip() {
        let mut h = Header::new();
        h.image_count = 3;
        h.boot_index = 2;
        h.codec = Some(CodecId::Lzx);
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let back = Header::read(&buf[..]).unwrap();
        assert_eq!(back.image_count, 3);
        assert_eq!(back.boot_index, 2);
        assert_eq!(back.codec, Some(CodecId::Lzx));
        assert_eq!(back.guid, h.guid);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; HEADER_SIZE];
        assert!(matches!(Header::read(&buf[..]), Err(ContainerError::InvalidMagic)));
    }
}
