//! Chunked resource writer (§4.E).
//!
//! Consumes a stream in 32 KiB chunks, attempts compression on each, and
//! falls back to storing a chunk verbatim whenever the codec doesn't
//! shrink it — the write-side complement of the reader's verbatim rule
//! (§3). The chunk table is buffered until the whole stream has been
//! consumed (we don't know `total_chunks - 1`'s entry width, 4 vs 8 bytes,
//! until we know `original_size`) and then written ahead of the chunk
//! bytes it describes.

use super::{chunk_table_entry_size, ResourceError, CHUNK_SIZE};
use crate::codec::Codec;
use crate::container::{ResourceEntry, FLAG_COMPRESSED};
use std::io::{Read, Seek, Write};

/// Outcome of a single `write_resource` call, beyond the resource entry
/// itself — useful for progress reporting by a caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteReport {
    pub chunks_written: u64,
    pub chunks_compressed: u64,
}

/// Write `source` as a chunked resource to `target`, returning the
/// resource entry describing the byte run just written.
///
/// `target` must be positioned at the offset the resource should begin
/// at; that position becomes `resource_entry.offset`.
pub fn write_resource<R: Read, W: Write + Seek>(
    mut source: R,
    codec: &dyn Codec,
    mut target: W,
) -> Result<(ResourceEntry, WriteReport), ResourceError> {
    let start_offset = target.stream_position()?;

    let mut chunks: Vec<(Vec<u8>, bool)> = Vec::new(); // (bytes, is_compressed)
    let mut original_size: u64 = 0;
    let mut any_compressed = false;

    loop {
        let mut buf = vec![0u8; CHUNK_SIZE as usize];
        let n = read_full_or_eof(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        original_size += n as u64;

        match codec.compress(&buf) {
            Ok(compressed) if compressed.len() < buf.len() => {
                any_compressed = true;
                chunks.push((compressed, true));
            }
            _ => chunks.push((buf, false)),
        }

        if n < CHUNK_SIZE as usize {
            break;
        }
    }

    let total_chunks = chunks.len() as u64;
    let entry_size = chunk_table_entry_size(original_size);

    if total_chunks > 1 {
        let mut running: u64 = 0;
        let mut table = Vec::with_capacity((total_chunks as usize - 1) * entry_size);
        for (bytes, _) in &chunks[..chunks.len() - 1] {
            running += bytes.len() as u64;
            if entry_size == 4 {
                table.extend_from_slice(&(running as u32).to_le_bytes());
            } else {
                table.extend_from_slice(&running.to_le_bytes());
            }
        }
        target.write_all(&table)?;
    }

    let mut written: u64 = if total_chunks > 1 {
        ((total_chunks - 1) as usize * entry_size) as u64
    } else {
        0
    };
    let mut chunks_compressed = 0u64;
    for (bytes, is_compressed) in &chunks {
        target.write_all(bytes)?;
        written += bytes.len() as u64;
        if *is_compressed {
            chunks_compressed += 1;
        }
    }

    let entry = ResourceEntry {
        size: written,
        flags: if any_compressed { FLAG_COMPRESSED } else { 0 },
        offset: start_offset,
        original_size,
    };

    Ok((
        entry,
        WriteReport { chunks_written: total_chunks, chunks_compressed },
    ))
}

/// Like `read_exact` but returns the number of bytes actually read instead
/// of erroring on a short final read at EOF.
fn read_full_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, CodecId};
    use std::io::Cursor;

    struct NeverCompresses;
    impl Codec for NeverCompresses {
        fn id(&self) -> CodecId {
            CodecId::Lzx
        }
        fn decompress(&self, _src: &[u8], _dst: &mut [u8]) -> Result<(), CodecError> {
            Err(CodecError::CompressionUnavailable)
        }
        fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::CompressionUnavailable)
        }
    }

    #[test]
    fn single_chunk_stores_verbatim_when_uncompressible() {
        let data = b"HELLO".to_vec();
        let mut out = Cursor::new(Vec::new());
        let (entry, report) = write_resource(Cursor::new(data.clone()), &NeverCompresses, &mut out).unwrap();

        assert_eq!(entry.original_size, 5);
        assert_eq!(entry.size, 5);
        assert_eq!(entry.flags, 0);
        assert_eq!(report.chunks_compressed, 0);
        assert_eq!(out.into_inner(), data);
    }

    #[test]
    fn multi_chunk_round_trips_through_reader() {
        let mut data = vec![0u8; CHUNK_SIZE as usize + 500];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut out = Cursor::new(Vec::new());
        let (entry, _) =
            write_resource(Cursor::new(data.clone()), &NeverCompresses, &mut out).unwrap();

        let mut buf = out.into_inner();
        let mut cursor = Cursor::new(&mut buf);
        let mut dst = vec![0u8; data.len()];
        super::super::reader::read(&mut cursor, &entry, CodecId::Lzx, 0, data.len() as u64, &mut dst)
            .unwrap();
        assert_eq!(dst, data);
    }

    #[test]
    fn empty_stream_yields_empty_resource() {
        let mut out = Cursor::new(Vec::new());
        let (entry, report) =
            write_resource(Cursor::new(Vec::<u8>::new()), &NeverCompresses, &mut out).unwrap();
        assert_eq!(entry.original_size, 0);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.flags, 0);
        assert_eq!(report.chunks_written, 0);
    }
}
