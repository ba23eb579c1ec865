//! `WimArchive` — the top-level handle (§3 "Archive (`WIMStruct`)"):
//! owns the open file, the parsed header, the live blob table, the image
//! catalog, the XML manifest, and the auxiliary handle pool concurrent
//! readers borrow from (§5).

use crate::blob::{BlobError, BlobLocation, BlobTable, ForeignHandleId};
use crate::catalog::{CatalogError, ImageCatalog};
use crate::codec::CodecId;
use crate::container::{ContainerError, Header, ResourceEntry};
use crate::hash::Hash;
use crate::metadata::{self, MetadataError};
use crate::resource::{self, ResourceError};
use crate::xml::{DefaultXmlManifest, XmlManifest};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    #[error("resource engine error: {0}")]
    Resource(#[from] ResourceError),
    #[error("blob table error: {0}")]
    Blob(#[from] BlobError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("metadata codec error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("archive has no codec recorded in its header")]
    NoCodec,
    #[error("cannot persist a blob in location {0} without an explicit resolver")]
    UnresolvableLocation(&'static str),
}

/// Per-image bookkeeping persisted alongside the blob table and catalog:
/// name, optional description, and the hash of that image's metadata
/// resource. Stored in the header's `xml_data` resource slot — the real
/// XML manifest serializer is an external collaborator (§1); this is the
/// minimal index this crate needs to reload image names on `open`.
struct ImageIndexEntry {
    name: String,
    description: Option<String>,
    metadata_hash: Hash,
}

fn encode_image_index(entries: &[ImageIndexEntry]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_all(&(entries.len() as u32).to_le_bytes())?;
    for e in entries {
        write_string(&mut buf, &e.name)?;
        match &e.description {
            Some(d) => {
                buf.write_all(&[1u8])?;
                write_string(&mut buf, d)?;
            }
            None => buf.write_all(&[0u8])?,
        }
        buf.write_all(e.metadata_hash.as_bytes())?;
    }
    Ok(buf)
}

fn decode_image_index(bytes: &[u8]) -> io::Result<Vec<ImageIndexEntry>> {
    let mut cursor = io::Cursor::new(bytes);
    let mut count_buf = [0u8; 4];
    cursor.read_exact(&mut count_buf)?;
    let count = u32::from_le_bytes(count_buf);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = read_string(&mut cursor)?;
        let mut flag = [0u8; 1];
        cursor.read_exact(&mut flag)?;
        let description = if flag[0] == 1 { Some(read_string(&mut cursor)?) } else { None };
        let mut hash_buf = [0u8; 20];
        cursor.read_exact(&mut hash_buf)?;
        out.push(ImageIndexEntry { name, description, metadata_hash: Hash(hash_buf) });
    }
    Ok(out)
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// The open archive handle (§3, §5).
pub struct WimArchive {
    path: Option<PathBuf>,
    handle: File,
    /// Extra handles for `MULTITHREADED` blob reads, guarded by one mutex
    /// and never held across I/O (§5, §9).
    pool: Mutex<Vec<File>>,
    pub header: Header,
    pub blobs: BlobTable,
    pub catalog: ImageCatalog,
    pub xml: DefaultXmlManifest,
}

impl WimArchive {
    pub fn codec_id(&self) -> Result<CodecId, ArchiveError> {
        self.header.codec.ok_or(ArchiveError::NoCodec)
    }

    /// Load `image`'s tree into memory if it isn't already, making it the
    /// current image (§4.H `select`, idempotent).
    pub fn select_image(&mut self, image: usize) -> Result<(), ArchiveError> {
        let codec_id = self.codec_id()?;
        self.catalog.select(image, &mut self.handle, &self.blobs, codec_id)?;
        Ok(())
    }

    /// Create a brand-new, empty in-memory archive backed by `path` (the
    /// file is created on first `save`).
    pub fn create(path: impl AsRef<Path>, codec_id: CodecId) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let handle = File::options().read(true).write(true).create(true).truncate(true).open(&path)?;
        let mut header = Header::new();
        header.codec = Some(codec_id);
        Ok(Self {
            path: Some(path),
            handle,
            pool: Mutex::new(Vec::new()),
            header,
            blobs: BlobTable::new(),
            catalog: ImageCatalog::new(),
            xml: DefaultXmlManifest::default(),
        })
    }

    /// Open an existing archive, loading its header, blob table, and
    /// image index (§4.K, §2 "On read").
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut handle = File::open(&path)?;
        let header = Header::read(&mut handle)?;
        let codec_id = header.codec.ok_or(ArchiveError::NoCodec)?;

        let blobs = if header.blob_table.original_size > 0 {
            let bytes = read_resource_fully(&mut handle, &header.blob_table, codec_id)?;
            BlobTable::decode(&bytes)?
        } else {
            BlobTable::new()
        };

        let mut catalog = ImageCatalog::new();
        let mut xml = DefaultXmlManifest::default();
        if header.xml_data.original_size > 0 {
            let bytes = read_resource_fully(&mut handle, &header.xml_data, codec_id)?;
            for entry in decode_image_index(&bytes)? {
                catalog.register_unloaded(entry.name.clone(), entry.metadata_hash);
                xml.add_image(&entry.name, entry.description.as_deref(), None);
            }
        }

        Ok(Self {
            path: Some(path),
            handle,
            pool: Mutex::new(Vec::new()),
            header,
            blobs,
            catalog,
            xml,
        })
    }

    /// Borrow an extra handle from the pool for a `MULTITHREADED` read,
    /// opening a fresh one (or discarding and reopening a dead one) if
    /// the pool is empty (§5, §9).
    fn borrow_pooled_handle(&self) -> Result<File, ArchiveError> {
        let mut pool = self.pool.lock().expect("handle pool mutex poisoned");
        if let Some(f) = pool.pop() {
            return Ok(f);
        }
        drop(pool);
        let path = self.path.as_ref().ok_or_else(|| {
            ArchiveError::Io(io::Error::new(io::ErrorKind::Other, "archive has no backing path"))
        })?;
        Ok(File::open(path)?)
    }

    fn return_pooled_handle(&self, f: File) {
        let mut pool = self.pool.lock().expect("handle pool mutex poisoned");
        pool.push(f);
    }

    /// Read `len` bytes at `offset` from a resource addressed within
    /// this archive, honoring the `MULTITHREADED` pooling discipline
    /// (§4.G).
    pub fn read_in_this_archive(
        &mut self,
        resource: &ResourceEntry,
        offset: u64,
        len: u64,
        dst: &mut [u8],
        multithreaded: bool,
    ) -> Result<(), ArchiveError> {
        let codec_id = self.codec_id()?;
        if multithreaded {
            let mut f = self.borrow_pooled_handle()?;
            let result = resource::reader::read(&mut f, resource, codec_id, offset, len, dst);
            self.return_pooled_handle(f);
            result?;
        } else {
            resource::reader::read(&mut self.handle, resource, codec_id, offset, len, dst)?;
        }
        Ok(())
    }

    /// Resolve every blob this archive holds as `InAnotherArchive { foreign_handle, .. }`
    /// into an in-memory buffer by reading it out of `foreign` directly,
    /// so a later `save` no longer needs the foreign archive open (§9:
    /// the handle registry lookup `IN_ANOTHER_ARCHIVE` depends on is the
    /// caller's responsibility, not global state this crate maintains).
    pub fn resolve_foreign_blobs(
        &mut self,
        foreign: &mut WimArchive,
        handle: ForeignHandleId,
    ) -> Result<(), ArchiveError> {
        let targets: Vec<(Hash, ResourceEntry)> = self
            .blobs
            .iter()
            .filter_map(|d| match &d.location {
                BlobLocation::InAnotherArchive { foreign_handle, .. } if *foreign_handle == handle => {
                    Some((d.hash, d.resource_entry))
                }
                _ => None,
            })
            .collect();

        for (hash, resource_entry) in targets {
            let mut buf = vec![0u8; resource_entry.original_size as usize];
            foreign.read_in_this_archive(&resource_entry, 0, resource_entry.original_size, &mut buf, false)?;
            let desc = self.blobs.lookup_mut(&hash).expect("hash came from this table");
            desc.location = BlobLocation::InAttachedBuffer { data: buf.into() };
        }
        Ok(())
    }

    /// Materialize every blob not yet resolved to `InThisArchive`,
    /// rewrite the blob table and image index, and rewrite the header
    /// last — the placement discipline in §4.K. Writes to a sibling
    /// temporary file and renames over the target on success, so a
    /// crash or error never leaves a half-written file in place (§7
    /// "the archive is never modified on disk unless ... a successful
    /// full write completes").
    pub fn save(&mut self) -> Result<(), ArchiveError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ArchiveError::Io(io::Error::new(io::ErrorKind::Other, "no backing path")))?;
        let tmp_path = path.with_extension("wim.tmp");
        let codec_id = self.codec_id()?;

        let mut tmp = File::options().read(true).write(true).create(true).truncate(true).open(&tmp_path)?;
        tmp.seek(SeekFrom::Start(crate::container::HEADER_SIZE as u64))?;

        let hashes: Vec<Hash> = self.blobs.iter().map(|d| d.hash).collect();
        for hash in hashes {
            self.materialize_blob(hash, &mut tmp)?;
        }

        for image in 1..=self.catalog.count() {
            let img = self.catalog.get(image)?;
            if img.loaded && img.modified {
                self.flush_image_metadata(image, &mut tmp)?;
            }
        }

        let blob_table_bytes = self.blobs.encode()?;
        let (blob_table_entry, _) =
            resource::writer::write_resource(&blob_table_bytes[..], &*crate::codec::get_codec(codec_id), &mut tmp)?;
        self.header.blob_table = blob_table_entry;

        let index_entries: Vec<ImageIndexEntry> = (1..=self.catalog.count())
            .map(|i| {
                let img = self.catalog.get(i).expect("index within count()");
                ImageIndexEntry {
                    name: img.name.clone(),
                    description: img.description.clone(),
                    metadata_hash: img.metadata_hash,
                }
            })
            .collect();
        let index_bytes = encode_image_index(&index_entries)?;
        let (xml_entry, _) =
            resource::writer::write_resource(&index_bytes[..], &*crate::codec::get_codec(codec_id), &mut tmp)?;
        self.header.xml_data = xml_entry;

        self.header.image_count = self.catalog.count() as u32;
        self.header.boot_index = self.catalog.boot_index();

        tmp.seek(SeekFrom::Start(0))?;
        self.header.write(&mut tmp)?;
        tmp.flush()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &path)?;
        self.handle = File::open(&path)?;
        self.path = Some(path);
        Ok(())
    }

    fn materialize_blob(&mut self, hash: Hash, target: &mut File) -> Result<(), ArchiveError> {
        if hash.is_empty_stream() {
            return Ok(());
        }
        let codec_id = self.codec_id()?;
        let location = self.blobs.lookup(&hash).expect("hash came from this table").location.clone();

        let bytes: Vec<u8> = match &location {
            BlobLocation::InThisArchive => {
                let resource_entry = self.blobs.lookup(&hash).unwrap().resource_entry;
                let mut buf = vec![0u8; resource_entry.original_size as usize];
                resource::reader::read(
                    &mut self.handle,
                    &resource_entry,
                    codec_id,
                    0,
                    resource_entry.original_size,
                    &mut buf,
                )?;
                buf
            }
            BlobLocation::InFileOnDisk { path } | BlobLocation::InStagingFile { path } => {
                std::fs::read(path)?
            }
            BlobLocation::InAttachedBuffer { data } => data.to_vec(),
            BlobLocation::InAnotherArchive { .. } => {
                return Err(ArchiveError::UnresolvableLocation("InAnotherArchive"))
            }
            BlobLocation::InSourceVolume { .. } => {
                return Err(ArchiveError::UnresolvableLocation("InSourceVolume"))
            }
        };

        let (entry, _) = resource::writer::write_resource(&bytes[..], &*crate::codec::get_codec(codec_id), target)?;
        let desc = self.blobs.lookup_mut(&hash).expect("hash came from this table");
        desc.resource_entry = entry;
        desc.location = BlobLocation::InThisArchive;
        Ok(())
    }

    fn flush_image_metadata(&mut self, image: usize, target: &mut File) -> Result<(), ArchiveError> {
        let codec_id = self.codec_id()?;
        let (bytes, old_hash) = {
            let img = self.catalog.get(image)?;
            (metadata::encode(&img.root, &img.security)?, img.metadata_hash)
        };
        let new_hash = Hash::of(&bytes);

        let (entry, _) = resource::writer::write_resource(&bytes[..], &*crate::codec::get_codec(codec_id), target)?;
        let mut desc = crate::blob::BlobDescriptor::in_this_archive(new_hash, entry);
        desc.resource_entry.flags |= crate::container::FLAG_METADATA;
        let _ = self.blobs.remove(&old_hash);
        // Ignore a collision: an identical empty image re-saved twice
        // legitimately shares its metadata hash.
        let _ = self.blobs.insert(desc);

        let img = self.catalog.get_mut(image)?;
        img.metadata_hash = new_hash;
        img.modified = false;
        Ok(())
    }
}

fn read_resource_fully<R: Read + Seek>(
    handle: &mut R,
    resource: &ResourceEntry,
    codec_id: CodecId,
) -> Result<Vec<u8>, ArchiveError> {
    let len = resource.original_size;
    let mut buf = vec![0u8; len as usize];
    resource::reader::read(handle, resource, codec_id, 0, len, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::ingest::{fs::ingest_fs_tree, ExclusionPatterns};
    use tempfile::tempdir;

    #[test]
    fn create_add_save_open_round_trip() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(src_dir.join("a.txt"), b"hello world").unwrap();

        let archive_path = dir.path().join("test.wim");
        let mut archive = WimArchive::create(&archive_path, CodecId::Lzx).unwrap();

        let root = ingest_fs_tree(&src_dir, &mut archive.blobs, &ExclusionPatterns::default()).unwrap();
        let index = archive.catalog.add("main".into(), root, crate::tree::SecurityDescriptorTable::new());
        archive.xml.add_image("main", None, None);
        assert_eq!(index, 1);

        archive.save().unwrap();

        let reopened = WimArchive::open(&archive_path).unwrap();
        assert_eq!(reopened.catalog.count(), 1);
        assert_eq!(reopened.catalog.get(1).unwrap().name, "main");
        // One content blob ("hello world") plus the image's own metadata blob.
        assert_eq!(reopened.blobs.len(), 2);
    }
}
