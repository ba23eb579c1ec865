//! Top-level error type. Every subsystem defines its own `thiserror` enum
//! close to where its failures originate (§7's kind taxonomy is spread
//! across `container::ContainerError`, `codec::CodecError`,
//! `resource::ResourceError`, `blob::BlobError`, `catalog::CatalogError`,
//! `ingest::IngestError`, and `orchestrator::OrchestratorError`); this enum
//! is only the boundary a CLI or other caller actually matches on.

use crate::archive::ArchiveError;
use crate::blob::BlobError;
use crate::catalog::CatalogError;
use crate::codec::CodecError;
use crate::container::ContainerError;
use crate::ingest::IngestError;
use crate::orchestrator::OrchestratorError;
use crate::resource::ResourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WimError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WimError>;
