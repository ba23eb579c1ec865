//! The resource engine (§4.D, §4.E, §6): chunked random-access reads and
//! chunked writes over a single byte run inside the container.

pub mod reader;
pub mod writer;

pub use reader::ResourceReader;
pub use writer::{write_resource, WriteReport};

use thiserror::Error;

pub const CHUNK_SIZE: u64 = crate::codec::CHUNK_SIZE as u64;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("io error: {0}")]
    Read(#[from] std::io::Error),
    #[error("codec rejected a chunk: {0}")]
    Decompression(#[from] crate::codec::CodecError),
    #[error("chunk table malformed: {0}")]
    InvalidResource(String),
    #[error("requested range [{offset}, {offset}+{len}) exceeds resource bounds {bound}")]
    OutOfRange { offset: u64, len: u64, bound: u64 },
}

/// Number of chunks a resource of `original_size` bytes is split into.
pub fn chunk_count(original_size: u64) -> u64 {
    if original_size == 0 {
        return 0;
    }
    (original_size + CHUNK_SIZE - 1) / CHUNK_SIZE
}

/// Width in bytes of one chunk-table entry: 4 if `original_size` fits in
/// 32 bits, 8 otherwise (§3, §6).
pub fn chunk_table_entry_size(original_size: u64) -> usize {
    if original_size < (1u64 << 32) {
        4
    } else {
        8
    }
}
