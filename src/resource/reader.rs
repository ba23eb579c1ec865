//! Chunked random-access reader (§4.D).
//!
//! The on-disk layout of a compressed resource is a chunk table followed
//! by the chunks themselves: `[ entries(total_chunks-1) ][ chunk 0 ][
//! chunk 1 ] ... [ chunk last ]`. `offsets[0] = 0` is implicit; the table
//! holds `offsets[1..=total_chunks-1]`, each relative to the end of the
//! table. A chunk whose compressed length equals its uncompressed length
//! was stored verbatim at write time and must be read back without
//! invoking the codec (§3, §6).

use super::{chunk_count, chunk_table_entry_size, ResourceError, CHUNK_SIZE};
use crate::codec::{get_codec, Codec, CodecId};
use crate::container::ResourceEntry;
use crate::endian::{get_u32, get_u64};
use std::io::{Read, Seek, SeekFrom};

/// Read `len` decompressed bytes starting at `offset` into `dst`.
///
/// `dst.len()` must equal `len`. `offset + len` must not exceed
/// `resource.original_size` (or `resource.size` for an uncompressed
/// resource, per §4.D's raw-passthrough constraint).
pub fn read<R: Read + Seek>(
    mut src: R,
    resource: &ResourceEntry,
    codec_id: CodecId,
    offset: u64,
    len: u64,
    dst: &mut [u8],
) -> Result<(), ResourceError> {
    assert_eq!(dst.len() as u64, len, "dst must be sized exactly to len");
    if len == 0 {
        return Ok(());
    }

    if !resource.is_compressed() {
        if offset + len > resource.size {
            return Err(ResourceError::OutOfRange { offset, len, bound: resource.size });
        }
        src.seek(SeekFrom::Start(resource.offset + offset))?;
        src.read_exact(dst)?;
        return Ok(());
    }

    let original_size = resource.original_size;
    if offset + len > original_size {
        return Err(ResourceError::OutOfRange { offset, len, bound: original_size });
    }

    let total_chunks = chunk_count(original_size);
    if total_chunks == 0 {
        return Ok(());
    }
    let entry_size = chunk_table_entry_size(original_size);
    let table_entry_count = total_chunks - 1;
    let chunk_table_size = table_entry_count * entry_size as u64;
    let chunks_start = resource.offset + chunk_table_size;

    let read_entry = |src: &mut R, chunk_idx: u64| -> Result<u64, ResourceError> {
        // chunk_idx is 1-based: entries()[0] is offsets[1].
        if chunk_idx == 0 {
            return Ok(0);
        }
        let pos = resource.offset + (chunk_idx - 1) * entry_size as u64;
        src.seek(SeekFrom::Start(pos))?;
        Ok(if entry_size == 4 {
            let mut b = [0u8; 4];
            src.read_exact(&mut b)?;
            get_u32(&b) as u64
        } else {
            let mut b = [0u8; 8];
            src.read_exact(&mut b)?;
            get_u64(&b)
        })
    };

    let start_chunk = offset / CHUNK_SIZE;
    let end_chunk = (offset + len - 1) / CHUNK_SIZE;

    let codec: Box<dyn Codec> = get_codec(codec_id);
    let mut scratch = Vec::new();

    for i in start_chunk..=end_chunk {
        let chunk_start_byte = i * CHUNK_SIZE;
        let uncompressed_chunk_size = if i == total_chunks - 1 {
            let rem = original_size % CHUNK_SIZE;
            if rem == 0 { CHUNK_SIZE } else { rem }
        } else {
            CHUNK_SIZE
        };
        let chunk_end_byte = chunk_start_byte + uncompressed_chunk_size;

        let this_offset = read_entry(&mut src, i)?;
        let compressed_chunk_size = if i == total_chunks - 1 {
            resource
                .size
                .checked_sub(chunk_table_size)
                .and_then(|v| v.checked_sub(this_offset))
                .ok_or_else(|| ResourceError::InvalidResource("chunk table size underflow".into()))?
        } else {
            let next_offset = read_entry(&mut src, i + 1)?;
            next_offset.checked_sub(this_offset).ok_or_else(|| {
                ResourceError::InvalidResource("chunk table entries out of order".into())
            })?
        };

        let request_start = offset.max(chunk_start_byte);
        let request_end = (offset + len).min(chunk_end_byte);
        let dst_write_start = (request_start - offset) as usize;
        let dst_write_len = (request_end - request_start) as usize;
        let whole_chunk = request_start == chunk_start_byte && request_end == chunk_end_byte;

        src.seek(SeekFrom::Start(chunks_start + this_offset))?;

        if compressed_chunk_size == uncompressed_chunk_size {
            // Stored verbatim; the codec must not be invoked (§3).
            if whole_chunk {
                src.read_exact(&mut dst[dst_write_start..dst_write_start + dst_write_len])?;
            } else {
                src.seek(SeekFrom::Current((request_start - chunk_start_byte) as i64))?;
                src.read_exact(&mut dst[dst_write_start..dst_write_start + dst_write_len])?;
            }
            continue;
        }

        let mut compressed = vec![0u8; compressed_chunk_size as usize];
        src.read_exact(&mut compressed)?;

        if whole_chunk {
            codec.decompress(&compressed, &mut dst[dst_write_start..dst_write_start + dst_write_len])?;
        } else {
            scratch.clear();
            scratch.resize(uncompressed_chunk_size as usize, 0u8);
            codec.decompress(&compressed, &mut scratch)?;
            let rel_start = (request_start - chunk_start_byte) as usize;
            let rel_end = (request_end - chunk_start_byte) as usize;
            dst[dst_write_start..dst_write_start + dst_write_len]
                .copy_from_slice(&scratch[rel_start..rel_end]);
        }
    }

    Ok(())
}

/// Convenience wrapper bundling a file handle and the archive-wide codec
/// id, mirroring how the archive facade hands resource access to callers
/// that don't want to thread both through every call.
pub struct ResourceReader<R> {
    handle: R,
    codec_id: CodecId,
}

impl<R: Read + Seek> ResourceReader<R> {
    pub fn new(handle: R, codec_id: CodecId) -> Self {
        Self { handle, codec_id }
    }

    pub fn read(
        &mut self,
        resource: &ResourceEntry,
        offset: u64,
        len: u64,
        dst: &mut [u8],
    ) -> Result<(), ResourceError> {
        read(&mut self.handle, resource, self.codec_id, offset, len, dst)
    }

    pub fn read_full(&mut self, resource: &ResourceEntry) -> Result<Vec<u8>, ResourceError> {
        let len = resource.original_size;
        let mut buf = vec![0u8; len as usize];
        self.read(resource, 0, len, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ResourceEntry, FLAG_COMPRESSED};
    use std::io::Cursor;

    /// Scenario S1: uncompressed resource, `"HELLO"`.
    #[test]
    fn s1_uncompressed_resource() {
        let data = b"HELLO".to_vec();
        let resource = ResourceEntry { size: 5, flags: 0, offset: 0, original_size: 5 };
        let mut cursor = Cursor::new(data);

        let mut dst = [0u8; 5];
        read(&mut cursor, &resource, CodecId::Lzx, 0, 5, &mut dst).unwrap();
        assert_eq!(&dst, b"HELLO");

        let mut dst = [0u8; 3];
        read(&mut cursor, &resource, CodecId::Lzx, 1, 3, &mut dst).unwrap();
        assert_eq!(&dst, b"ELL");
    }

    /// Scenario S2: compressed resource, one chunk, stored verbatim
    /// because compressed size equals uncompressed size.
    #[test]
    fn s2_compressed_single_chunk_verbatim() {
        // total_chunks = 1 -> table_entry_count = 0 -> no table at all.
        let data = b"ABCD".to_vec();
        let resource =
            ResourceEntry { size: 4, flags: FLAG_COMPRESSED, offset: 0, original_size: 4 };
        let mut cursor = Cursor::new(data);

        let mut dst = [0u8; 4];
        read(&mut cursor, &resource, CodecId::Lzx, 0, 4, &mut dst).unwrap();
        assert_eq!(&dst, b"ABCD");
    }

    /// Scenario S3: compressed resource, three chunks (two full + a
    /// 100-byte remainder), all stored verbatim so no codec is needed to
    /// exercise the chunk-table math.
    #[test]
    fn s3_three_chunks_random_access() {
        let chunk0 = vec![0xAAu8; CHUNK_SIZE as usize];
        let chunk1 = vec![0xBBu8; CHUNK_SIZE as usize];
        let chunk2 = vec![0xCCu8; 100];
        let original_size = CHUNK_SIZE * 2 + 100;

        // table_entry_count = 2, 4-byte entries since original_size < 2^32.
        let offsets = [chunk0.len() as u32, (chunk0.len() + chunk1.len()) as u32];
        let mut buf = Vec::new();
        for o in offsets {
            buf.extend_from_slice(&o.to_le_bytes());
        }
        buf.extend_from_slice(&chunk0);
        buf.extend_from_slice(&chunk1);
        buf.extend_from_slice(&chunk2);

        let resource = ResourceEntry {
            size: buf.len() as u64,
            flags: FLAG_COMPRESSED,
            offset: 0,
            original_size,
        };
        let mut cursor = Cursor::new(buf);

        // Read across the chunk0/chunk1 boundary.
        let mut dst = vec![0u8; 200];
        read(&mut cursor, &resource, CodecId::Lzx, CHUNK_SIZE - 1, 200, &mut dst).unwrap();
        assert_eq!(dst[0], 0xAA);
        assert_eq!(dst[1], 0xBB);

        // Read entirely inside chunk1.
        let mut dst2 = vec![0u8; 50];
        read(&mut cursor, &resource, CodecId::Lzx, CHUNK_SIZE + 10, 50, &mut dst2).unwrap();
        assert!(dst2.iter().all(|&b| b == 0xBB));

        // Read the final short chunk.
        let mut dst3 = vec![0u8; 100];
        read(&mut cursor, &resource, CodecId::Lzx, CHUNK_SIZE * 2, 100, &mut dst3).unwrap();
        assert!(dst3.iter().all(|&b| b == 0xCC));
    }
}
