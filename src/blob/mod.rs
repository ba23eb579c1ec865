//! Content-addressed blob table (§3, §4.F, §4.G): the hash-keyed
//! deduplication index tying directory-tree stream references to physical
//! byte sources.

pub mod source;
pub mod table;

pub use source::{read_blob, ReadFlags, VolumeDriver};
pub use table::BlobTable;

use crate::codec::CodecId;
use crate::container::ResourceEntry;
use crate::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("resource engine error: {0}")]
    Resource(#[from] crate::resource::ResourceError),
    #[error("blob content did not match its stored hash")]
    InvalidResourceHash,
    #[error("blob with hash {0} already present in table")]
    Collision(Hash),
    #[error("blob with hash {0} not found")]
    NotFound(Hash),
    #[error("no volume driver registered for handle {0:?}")]
    NoVolumeDriver(VolumeHandleId),
    #[error("no foreign archive registered for handle {0:?}")]
    NoForeignHandle(ForeignHandleId),
}

/// Opaque reference to another open archive, indirected through a
/// process-wide registry rather than carried as a raw pointer or
/// borrowed reference — an `IN_ANOTHER_ARCHIVE` descriptor must outlive
/// comparisons/clones that don't actually touch the foreign file (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignHandleId(pub u64);

/// Opaque reference to an open source volume, registered the same way
/// (§9). The volume driver itself is an external collaborator (§1); this
/// crate only needs a stable id to carry alongside `IN_SOURCE_VOLUME`
/// descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeHandleId(pub u64);

/// Where a blob's bytes physically live (§3's six location variants).
#[derive(Debug, Clone)]
pub enum BlobLocation {
    /// Addressed by the descriptor's `resource_entry` inside this
    /// archive's own file.
    InThisArchive,
    /// Addressed by the descriptor's `resource_entry`, but inside a
    /// different archive's file, compressed with that archive's codec.
    InAnotherArchive { foreign_handle: ForeignHandleId, codec_id: CodecId },
    /// A plain file on the host filesystem.
    InFileOnDisk { path: PathBuf },
    /// Structurally identical to `InFileOnDisk`; semantically this one is
    /// mutable scratch space the orchestrator may still rewrite.
    InStagingFile { path: PathBuf },
    /// An in-memory buffer supplied directly by the caller.
    InAttachedBuffer { data: Arc<[u8]> },
    /// A stream on a mounted source volume, read through the volume
    /// driver by volume-relative path and stream name.
    InSourceVolume {
        volume_handle: VolumeHandleId,
        volume_path: String,
        stream_name: String,
        is_reparse_point: bool,
    },
}

/// One content-addressed stream (§3).
#[derive(Debug, Clone)]
pub struct BlobDescriptor {
    pub hash: Hash,
    pub refcnt: u64,
    pub location: BlobLocation,
    /// On-disk byte-range record, meaningful when `location` is
    /// `InThisArchive` or `InAnotherArchive`.
    pub resource_entry: ResourceEntry,

    // Extraction-time scratch fields (§3), populated only while a
    // write/export operation is in flight.
    pub out_refcnt: u64,
    pub part_number: u16,
    pub output_resource_entry: ResourceEntry,
}

impl BlobDescriptor {
    pub fn new(hash: Hash, location: BlobLocation) -> Self {
        Self {
            hash,
            refcnt: 1,
            location,
            resource_entry: ResourceEntry::default(),
            out_refcnt: 0,
            part_number: 0,
            output_resource_entry: ResourceEntry::default(),
        }
    }

    pub fn in_this_archive(hash: Hash, resource_entry: ResourceEntry) -> Self {
        Self { resource_entry, ..Self::new(hash, BlobLocation::InThisArchive) }
    }

    pub fn incref(&mut self) {
        self.refcnt += 1;
    }

    /// Decrement refcnt; returns `true` if it reached zero (caller should
    /// remove the descriptor from its table) (§4.F).
    pub fn decref(&mut self) -> bool {
        debug_assert!(self.refcnt > 0, "decref on a blob with refcnt already 0");
        self.refcnt = self.refcnt.saturating_sub(1);
        self.refcnt == 0
    }
}
