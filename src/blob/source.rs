//! Blob-source read dispatch (§4.G, §6): a uniform `read` over the six
//! physical locations a blob may live in, plus the streaming
//! extract-and-verify helper used by export and CLI extraction alike.

use super::{BlobDescriptor, BlobError, BlobLocation, ForeignHandleId, VolumeHandleId};
use crate::codec::CodecId;
use crate::container::ResourceEntry;
use crate::hash::StreamingHash;
use crate::tree::FileTime;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Caller-supplied read flags (§4.G, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFlags(u8);

impl ReadFlags {
    /// Borrow a handle from the archive's handle pool instead of
    /// serializing on the primary handle.
    pub const MULTITHREADED: ReadFlags = ReadFlags(0x01);

    pub const fn empty() -> Self {
        ReadFlags(0)
    }

    pub fn is_multithreaded(self) -> bool {
        self.0 & Self::MULTITHREADED.0 != 0
    }
}

impl std::ops::BitOr for ReadFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        ReadFlags(self.0 | rhs.0)
    }
}

/// Everything `read_blob`/`extract` need from the owning archive to
/// resolve the location variants that don't carry their bytes directly:
/// the primary/pooled file handles for `InThisArchive`, the foreign
/// handle registry for `InAnotherArchive`, and the volume driver registry
/// for `InSourceVolume`. Implemented by `archive::WimArchive`.
pub trait BlobSourceContext {
    fn read_in_this_archive(
        &mut self,
        resource: &ResourceEntry,
        offset: u64,
        len: u64,
        dst: &mut [u8],
        flags: ReadFlags,
    ) -> Result<(), BlobError>;

    fn read_in_another_archive(
        &mut self,
        handle: ForeignHandleId,
        codec_id: CodecId,
        resource: &ResourceEntry,
        offset: u64,
        len: u64,
        dst: &mut [u8],
    ) -> Result<(), BlobError>;

    fn read_volume_attribute(
        &self,
        handle: VolumeHandleId,
        volume_path: &str,
        stream_name: &str,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), BlobError>;

    fn volume_stream_len(
        &self,
        handle: VolumeHandleId,
        volume_path: &str,
        stream_name: &str,
    ) -> Result<u64, BlobError>;
}

/// Read `len` bytes at `offset` from whichever source `desc.location`
/// names, into `dst` (§4.G).
pub fn read_blob(
    ctx: &mut dyn BlobSourceContext,
    desc: &BlobDescriptor,
    offset: u64,
    len: u64,
    dst: &mut [u8],
    flags: ReadFlags,
) -> Result<(), BlobError> {
    match &desc.location {
        BlobLocation::InThisArchive => {
            ctx.read_in_this_archive(&desc.resource_entry, offset, len, dst, flags)
        }
        BlobLocation::InAnotherArchive { foreign_handle, codec_id } => {
            ctx.read_in_another_archive(*foreign_handle, *codec_id, &desc.resource_entry, offset, len, dst)
        }
        BlobLocation::InFileOnDisk { path } | BlobLocation::InStagingFile { path } => {
            let mut f = File::open(path)?;
            f.seek(SeekFrom::Start(offset))?;
            f.read_exact(dst)?;
            Ok(())
        }
        BlobLocation::InAttachedBuffer { data } => {
            let start = offset as usize;
            let end = start + len as usize;
            if end > data.len() {
                return Err(BlobError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "read past end of attached buffer",
                )));
            }
            dst.copy_from_slice(&data[start..end]);
            Ok(())
        }
        BlobLocation::InSourceVolume { volume_handle, volume_path, stream_name, is_reparse_point } => {
            // Reparse-point attributes carry a 4-byte tag + 4 reserved
            // bytes ahead of the logical stream (§4.G); skip them here so
            // callers always see the payload starting at logical offset 0.
            let adjusted_offset = if *is_reparse_point { offset + 8 } else { offset };
            ctx.read_volume_attribute(*volume_handle, volume_path, stream_name, adjusted_offset, dst)
        }
    }
}

fn blob_len(ctx: &dyn BlobSourceContext, desc: &BlobDescriptor) -> Result<u64, BlobError> {
    Ok(match &desc.location {
        BlobLocation::InThisArchive | BlobLocation::InAnotherArchive { .. } => {
            desc.resource_entry.original_size
        }
        BlobLocation::InFileOnDisk { path } | BlobLocation::InStagingFile { path } => {
            std::fs::metadata(path)?.len()
        }
        BlobLocation::InAttachedBuffer { data } => data.len() as u64,
        BlobLocation::InSourceVolume { volume_handle, volume_path, stream_name, is_reparse_point } => {
            let raw = ctx.volume_stream_len(*volume_handle, volume_path, stream_name)?;
            if *is_reparse_point { raw.saturating_sub(8) } else { raw }
        }
    })
}

/// Stream the whole blob through `chunk_cb`, verifying its hash once
/// every byte has been produced. `chunk_cb` returning a nonzero code
/// aborts the extraction cleanly (§5's cooperative-cancellation rule).
///
/// Errors with [`BlobError::InvalidResourceHash`] on a full-extraction
/// hash mismatch — a non-recoverable condition (§7).
pub fn extract(
    ctx: &mut dyn BlobSourceContext,
    desc: &BlobDescriptor,
    mut chunk_cb: impl FnMut(&[u8]) -> i32,
) -> Result<(), BlobError> {
    const CHUNK: u64 = crate::resource::CHUNK_SIZE;

    if desc.hash.is_empty_stream() {
        return Ok(());
    }

    let total = blob_len(ctx, desc)?;
    let mut hasher = StreamingHash::new();
    let mut pos = 0u64;
    let mut buf = vec![0u8; CHUNK as usize];

    while pos < total {
        let take = CHUNK.min(total - pos) as usize;
        let dst = &mut buf[..take];
        read_blob(ctx, desc, pos, take as u64, dst, ReadFlags::empty())?;
        hasher.update(dst);
        let rc = chunk_cb(dst);
        if rc != 0 {
            return Ok(());
        }
        pos += take as u64;
    }

    if hasher.finish() != desc.hash {
        return Err(BlobError::InvalidResourceHash);
    }
    Ok(())
}

/// One directory entry as reported by a [`VolumeDriver`] (§4.I "walk
/// inode-by-inode"). A stream is named `""` for the unnamed data stream.
#[derive(Debug, Clone)]
pub struct VolumeDirEntry {
    pub inode_number: u64,
    pub name: String,
    pub short_name: Option<String>,
    pub is_directory: bool,
    pub attributes: u32,
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub last_access_time: FileTime,
    /// `(stream name, byte length)` for every data stream on this inode;
    /// the unnamed stream (if any) is named `""` and listed first.
    pub streams: Vec<(String, u64)>,
    pub reparse_tag: Option<u32>,
    pub security_descriptor: Option<Vec<u8>>,
}

/// External collaborator for a mounted source volume (§1, §6): the only
/// operations the core requires — directory enumeration, positional
/// attribute reads, and attribute length — not a full filesystem driver.
pub trait VolumeDriver: Send + Sync {
    fn list_directory(&self, volume_path: &str) -> io::Result<Vec<VolumeDirEntry>>;

    fn read_attribute(
        &self,
        volume_path: &str,
        stream_name: &str,
        offset: u64,
        dst: &mut [u8],
    ) -> io::Result<()>;

    fn attribute_len(&self, volume_path: &str, stream_name: &str) -> io::Result<u64>;
}
