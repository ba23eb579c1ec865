//! # wimarc — reference core for the .wim bootable-image container format
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every resource is addressed by a 24-byte entry: a 56-bit size, one
//!   byte of flags, a 64-bit offset, and a 64-bit original size
//! - Content is deduplicated by a 20-byte SHA-1 hash in a single archive-
//!   wide blob table; the all-zero hash is the empty-stream sentinel
//! - Compressed resources are chunked at a fixed 32 KiB; a chunk whose
//!   compressed form would not shrink it is stored verbatim instead
//! - The codec plug-in ABI (`plugin.rs`) is stable at
//!   `WIMARC_PLUGIN_ABI_VERSION = 1`
//! - The container header is always rewritten last, after every other
//!   resource is in place, so an interrupted write cannot corrupt an
//!   existing archive except by damaging the header itself

pub mod endian;
pub mod hash;
pub mod codec;
pub mod plugin;
pub mod container;
pub mod resource;
pub mod blob;
pub mod tree;
pub mod metadata;
pub mod catalog;
pub mod ingest;
pub mod xml;
pub mod orchestrator;
pub mod archive;
pub mod error;

// Flat re-exports for the most common types.
pub use archive::{ArchiveError, WimArchive};
pub use blob::{BlobDescriptor, BlobError, BlobLocation, BlobTable, ForeignHandleId, VolumeHandleId};
pub use catalog::{CatalogError, ImageCatalog, ImageMetadata};
pub use codec::{get_codec, Codec, CodecError, CodecId};
pub use container::{ContainerError, Header, ResourceEntry};
pub use error::{Result, WimError};
pub use hash::Hash;
pub use orchestrator::{add_image, delete_image, export_image, ImageSelector, OrchestratorError};
pub use tree::{DirectoryNode, SecurityDescriptorTable};
