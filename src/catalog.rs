//! Image catalog (§4.H): the per-archive array of image metadata records,
//! current-image selection, and boot index.

use crate::blob::{BlobError, BlobTable};
use crate::codec::CodecId;
use crate::container::ResourceEntry;
use crate::hash::Hash;
use crate::metadata::{self, MetadataError};
use crate::resource::{reader, ResourceError};
use crate::tree::{walk_stream_refs, DirectoryNode, SecurityDescriptorTable};
use std::cell::RefCell;
use std::io::{Read, Seek};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("image index {0} is out of range")]
    ImageNotFound(usize),
    #[error("resource engine error: {0}")]
    Resource(#[from] ResourceError),
    #[error("blob table error: {0}")]
    Blob(#[from] BlobError),
    #[error("metadata resource error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("an image named {0:?} already exists in this archive")]
    ImageNameCollision(String),
    #[error("path component {0:?} is not a directory")]
    NotDir(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

/// One image's in-archive record (§3 "Image metadata").
pub struct ImageMetadata {
    pub name: String,
    pub description: Option<String>,
    pub root: Rc<RefCell<DirectoryNode>>,
    pub security: SecurityDescriptorTable,
    /// Hash of this image's own serialized metadata resource, i.e. the
    /// key under which its blob descriptor lives in the archive's blob
    /// table.
    pub metadata_hash: Hash,
    /// True once the tree has been read into memory (lazily loaded by
    /// `select`, always true for a freshly `add`ed image).
    pub loaded: bool,
    /// True if the in-memory tree is newer than the stored resource.
    pub modified: bool,
}

impl ImageMetadata {
    fn unloaded(name: String, metadata_hash: Hash) -> Self {
        Self {
            name,
            description: None,
            root: DirectoryNode::new_root(),
            security: SecurityDescriptorTable::new(),
            metadata_hash,
            loaded: false,
            modified: false,
        }
    }
}

#[derive(Default)]
pub struct ImageCatalog {
    images: Vec<ImageMetadata>,
    current_image: Option<usize>,
    boot_index: u32,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.images.len()
    }

    pub fn boot_index(&self) -> u32 {
        self.boot_index
    }

    pub fn current_image(&self) -> Option<usize> {
        self.current_image
    }

    pub fn get(&self, image: usize) -> Result<&ImageMetadata, CatalogError> {
        self.images.get(image.wrapping_sub(1)).ok_or(CatalogError::ImageNotFound(image))
    }

    pub fn get_mut(&mut self, image: usize) -> Result<&mut ImageMetadata, CatalogError> {
        self.images.get_mut(image.wrapping_sub(1)).ok_or(CatalogError::ImageNotFound(image))
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.images.iter().position(|i| i.name == name).map(|i| i + 1)
    }

    /// Register an already-built image record loaded from a header
    /// record on archive open, before any tree has been paged in.
    pub fn register_unloaded(&mut self, name: String, metadata_hash: Hash) -> usize {
        self.images.push(ImageMetadata::unloaded(name, metadata_hash));
        self.images.len()
    }

    /// Load and decompress an image's metadata resource if it isn't
    /// already in memory, then make it `current_image` (§4.H, idempotent).
    pub fn select<R: Read + Seek>(
        &mut self,
        image: usize,
        handle: &mut R,
        blobs: &BlobTable,
        codec_id: CodecId,
    ) -> Result<(), CatalogError> {
        {
            let entry = self.get_mut(image)?;
            if !entry.loaded {
                let resource_entry = blob_resource_entry(blobs, entry.metadata_hash)?;
                let bytes = decompress_resource(handle, &resource_entry, codec_id)?;
                let (root, security) = metadata::decode(&bytes)?;
                entry.root = root;
                entry.security = security;
                entry.loaded = true;
            }
        }
        self.current_image = Some(image);
        Ok(())
    }

    /// Append a freshly ingested image, returning its 1-based index
    /// (§4.H).
    pub fn add(&mut self, name: String, root: Rc<RefCell<DirectoryNode>>, security: SecurityDescriptorTable) -> usize {
        self.images.push(ImageMetadata {
            name,
            description: None,
            root,
            security,
            metadata_hash: Hash::ZERO,
            loaded: true,
            modified: true,
        });
        self.images.len()
    }

    /// Remove `image`, decrementing blob refcounts for every stream it
    /// references and for its own metadata blob, then shifting the array
    /// down and adjusting the boot index (§4.H).
    pub fn delete(&mut self, image: usize, blobs: &mut BlobTable) -> Result<ImageMetadata, CatalogError> {
        if image == 0 || image > self.images.len() {
            return Err(CatalogError::ImageNotFound(image));
        }
        let entry = &self.images[image - 1];

        let mut hashes = Vec::new();
        walk_stream_refs(&entry.root, &mut |h| hashes.push(h));
        for h in hashes {
            let _ = blobs.decref(&h);
        }
        if !entry.metadata_hash.is_empty_stream() {
            let _ = blobs.decref(&entry.metadata_hash);
        }

        let removed = self.images.remove(image - 1);

        if self.boot_index as usize == image {
            self.boot_index = 0;
        } else if self.boot_index as usize > image {
            self.boot_index -= 1;
        }

        // Every index above the deleted one just shifted down by one, so
        // whatever `current_image` pointed at no longer names the same
        // image; §4.J says delete clears it rather than try to re-map it.
        self.current_image = None;

        Ok(removed)
    }

    /// Walk `path` (slash-separated, relative to the image root) down the
    /// tree, erroring if a non-leaf component isn't a directory.
    pub fn resolve(&self, image: usize, path: &str) -> Result<Rc<RefCell<DirectoryNode>>, CatalogError> {
        let entry = self.get(image)?;
        let mut current = Rc::clone(&entry.root);
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.borrow().is_directory() {
                return Err(CatalogError::NotDir(current.borrow().name.clone()));
            }
            let next = current
                .borrow()
                .children
                .iter()
                .find(|c| c.borrow().name == part)
                .cloned()
                .ok_or_else(|| CatalogError::InvalidParam(format!("no such path component {part:?}")))?;
            current = next;
        }
        Ok(current)
    }

    pub fn set_boot(&mut self, image: usize) -> Result<(), CatalogError> {
        if image > self.images.len() {
            return Err(CatalogError::ImageNotFound(image));
        }
        self.boot_index = image as u32;
        Ok(())
    }
}

fn blob_resource_entry(blobs: &BlobTable, hash: Hash) -> Result<ResourceEntry, CatalogError> {
    let desc = blobs.lookup(&hash).ok_or(BlobError::NotFound(hash))?;
    Ok(desc.resource_entry)
}

fn decompress_resource<R: Read + Seek>(
    handle: &mut R,
    resource: &ResourceEntry,
    codec_id: CodecId,
) -> Result<Vec<u8>, CatalogError> {
    let len = resource.original_size;
    let mut buf = vec![0u8; len as usize];
    reader::read(handle, resource, codec_id, 0, len, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DirectoryNode;

    fn fresh_image(cat: &mut ImageCatalog, name: &str) -> usize {
        cat.add(name.to_string(), DirectoryNode::new_root(), SecurityDescriptorTable::new())
    }

    /// §8 property 8 / S8: boot-index adjustment on delete.
    #[test]
    fn boot_index_rule() {
        let mut cat = ImageCatalog::new();
        fresh_image(&mut cat, "a");
        fresh_image(&mut cat, "b");
        fresh_image(&mut cat, "c");
        cat.set_boot(2).unwrap();

        let mut blobs = BlobTable::new();
        cat.delete(3, &mut blobs).unwrap();
        assert_eq!(cat.boot_index(), 2, "deleting after boot image leaves it unchanged");

        let mut cat2 = ImageCatalog::new();
        fresh_image(&mut cat2, "a");
        fresh_image(&mut cat2, "b");
        fresh_image(&mut cat2, "c");
        cat2.set_boot(2).unwrap();
        let mut blobs2 = BlobTable::new();
        cat2.delete(1, &mut blobs2).unwrap();
        assert_eq!(cat2.boot_index(), 1, "deleting before boot image decrements it");

        let mut cat3 = ImageCatalog::new();
        fresh_image(&mut cat3, "a");
        fresh_image(&mut cat3, "b");
        cat3.set_boot(2).unwrap();
        let mut blobs3 = BlobTable::new();
        cat3.delete(2, &mut blobs3).unwrap();
        assert_eq!(cat3.boot_index(), 0, "deleting the boot image clears it");
    }

    #[test]
    fn delete_shifts_array_and_clears_current() {
        let mut cat = ImageCatalog::new();
        fresh_image(&mut cat, "a");
        fresh_image(&mut cat, "b");
        cat.current_image = Some(1);
        let mut blobs = BlobTable::new();
        cat.delete(1, &mut blobs).unwrap();
        assert_eq!(cat.count(), 1);
        assert_eq!(cat.get(1).unwrap().name, "b");
        assert!(cat.current_image().is_none());
    }
}
