//! Export / delete / add orchestration (§4.J): the only layer that moves
//! blobs between two archives or mutates an archive's image catalog as a
//! single logical step.

use crate::archive::{ArchiveError, WimArchive};
use crate::blob::{BlobDescriptor, BlobError, BlobLocation, ForeignHandleId};
use crate::catalog::CatalogError;
use crate::hash::Hash;
use crate::ingest::{fs::ingest_fs_tree, ExclusionPatterns, IngestError};
use crate::tree::{link_child, walk_stream_refs, DirectoryNode, NamedStream, SecurityDescriptorTable};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("blob table error: {0}")]
    Blob(#[from] BlobError),
    #[error("bootable export requested but the source archive has no boot image")]
    SourceHasNoBootImage,
}

/// Which image(s) an operation targets (§4.J "or `ALL`").
#[derive(Debug, Clone, Copy)]
pub enum ImageSelector {
    Index(usize),
    All,
}

/// Export one image, or every image, from `src` into `dest` (§4.J).
///
/// `foreign_handle` is the id `dest`'s newly created `IN_ANOTHER_ARCHIVE`
/// descriptors will carry; resolving it back to `src` for an eventual read
/// is the caller's responsibility (§9 "process-wide handle indirection").
/// `name`/`description` only apply to a single-image export — exporting
/// `ALL` always keeps each image's own name.
pub fn export_image(
    src: &mut WimArchive,
    selector: ImageSelector,
    dest: &mut WimArchive,
    foreign_handle: ForeignHandleId,
    name: Option<String>,
    description: Option<String>,
    bootable: bool,
) -> Result<(), OrchestratorError> {
    match selector {
        ImageSelector::Index(i) => export_single(src, i, dest, foreign_handle, name, description, bootable),
        ImageSelector::All => {
            if bootable && src.catalog.boot_index() == 0 {
                return Err(OrchestratorError::SourceHasNoBootImage);
            }
            let count = src.catalog.count();
            for i in 1..=count {
                let is_boot_image = src.catalog.boot_index() as usize == i;
                export_single(src, i, dest, foreign_handle, None, None, bootable && is_boot_image)?;
            }
            Ok(())
        }
    }
}

fn export_single(
    src: &mut WimArchive,
    src_image: usize,
    dest: &mut WimArchive,
    foreign_handle: ForeignHandleId,
    name: Option<String>,
    description: Option<String>,
    bootable: bool,
) -> Result<(), OrchestratorError> {
    src.select_image(src_image)?;
    let src_codec = src.codec_id()?;

    let (resolved_name, src_description) = {
        let img = src.catalog.get(src_image)?;
        (name.unwrap_or_else(|| img.name.clone()), img.description.clone())
    };
    if dest.catalog.find_by_name(&resolved_name).is_some() {
        return Err(CatalogError::ImageNameCollision(resolved_name).into());
    }

    // Pass 1: count how many stream references this image makes to each
    // blob (a blob shared by two files in the same image must land in
    // `dest` with a matching refcnt, not one per distinct hash), then
    // incref once per unique hash on the source side to pin it against
    // concurrent removal while the copy is in flight (§4.J).
    let mut counts: HashMap<Hash, u64> = HashMap::new();
    {
        let img = src.catalog.get(src_image)?;
        walk_stream_refs(&img.root, &mut |h| *counts.entry(h).or_insert(0) += 1);
    }
    for h in counts.keys() {
        src.blobs.incref(h)?;
    }

    // Pass 2: stage new dest-side descriptors without mutating dest yet, so
    // a mid-pass failure leaves dest untouched and only the source-side
    // increfs need undoing (§4.J "buffer new descriptors in a staging
    // list, splice on success"). A descriptor staged here is created once
    // per unique hash, carrying the full reference count up front.
    let stage_result: Result<Vec<BlobDescriptor>, OrchestratorError> = (|| {
        let mut staged = Vec::new();
        for (h, count) in &counts {
            if dest.blobs.contains(h) {
                continue;
            }
            let resource_entry = src
                .blobs
                .lookup(h)
                .expect("hash was just increffed on the source side")
                .resource_entry;
            let mut desc = BlobDescriptor::new(
                *h,
                BlobLocation::InAnotherArchive { foreign_handle, codec_id: src_codec },
            );
            desc.resource_entry = resource_entry;
            desc.refcnt = *count;
            staged.push(desc);
        }
        Ok(staged)
    })();

    let staged = match stage_result {
        Ok(staged) => staged,
        Err(e) => {
            for h in counts.keys() {
                let _ = src.blobs.decref(h);
            }
            return Err(e);
        }
    };

    for (h, count) in &counts {
        if dest.blobs.contains(h) {
            for _ in 0..*count {
                dest.blobs.incref(h)?;
            }
        }
    }
    for desc in staged {
        dest.blobs.insert(desc)?;
    }

    // The pass-1 incref only pinned these blobs against concurrent removal
    // while the copy was in flight; dest now holds its own independent
    // reference (either a fresh descriptor or its own incref above), so
    // src's refcount settles back to what it was before this export.
    for h in counts.keys() {
        let _ = src.blobs.decref(h);
    }

    let (root, security) = {
        let img = src.catalog.get(src_image)?;
        (clone_tree(&img.root), img.security.clone())
    };
    let new_index = dest.catalog.add(resolved_name.clone(), root, security);
    let effective_description = description.or(src_description);
    dest.xml.add_image(&resolved_name, effective_description.as_deref(), None);

    if bootable {
        dest.catalog.set_boot(new_index)?;
    }

    Ok(())
}

/// Delete one image, or every image, from `archive` (§4.J). `ALL` repeats
/// "delete image 1" so each step sees correctly adjusted boot indices.
pub fn delete_image(archive: &mut WimArchive, selector: ImageSelector) -> Result<(), OrchestratorError> {
    match selector {
        ImageSelector::Index(i) => delete_one(archive, i),
        ImageSelector::All => {
            while archive.catalog.count() > 0 {
                delete_one(archive, 1)?;
            }
            Ok(())
        }
    }
}

fn delete_one(archive: &mut WimArchive, image: usize) -> Result<(), OrchestratorError> {
    archive.select_image(image)?;
    archive.catalog.delete(image, &mut archive.blobs)?;
    archive.xml.delete_image(image);
    Ok(())
}

/// Ingest `source_dir` as a brand-new image (§4.J).
pub fn add_image(
    archive: &mut WimArchive,
    name: String,
    source_dir: &Path,
    exclusions: &ExclusionPatterns,
    bootable: bool,
) -> Result<usize, OrchestratorError> {
    if name.is_empty() {
        return Err(CatalogError::InvalidParam("image name must not be empty".into()).into());
    }
    if archive.catalog.find_by_name(&name).is_some() {
        return Err(CatalogError::ImageNameCollision(name).into());
    }

    let root = ingest_fs_tree(source_dir, &mut archive.blobs, exclusions)?;
    let index = archive.catalog.add(name.clone(), root, SecurityDescriptorTable::new());
    archive.xml.add_image(&name, None, None);

    if bootable {
        archive.catalog.set_boot(index)?;
    }
    Ok(index)
}

/// Deep-copy a tree: export gives each archive its own independently
/// owned nodes rather than sharing `Rc`s across archives (§9 "cyclic
/// ownership is absent by design").
fn clone_tree(node: &Rc<RefCell<DirectoryNode>>) -> Rc<RefCell<DirectoryNode>> {
    let n = node.borrow();
    let cloned = Rc::new(RefCell::new(DirectoryNode {
        name: n.name.clone(),
        attributes: n.attributes,
        timestamps: n.timestamps,
        security_id: n.security_id,
        unnamed_stream: n.unnamed_stream,
        named_streams: n.named_streams.iter().map(|s| NamedStream { name: s.name.clone(), hash: s.hash }).collect(),
        short_name: n.short_name.clone(),
        reparse: n.reparse.clone(),
        children: Vec::new(),
        parent: None,
    }));
    let children: Vec<_> = n.children.iter().map(clone_tree).collect();
    drop(n);
    for child in children {
        link_child(&cloned, child);
    }
    cloned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use tempfile::tempdir;

    fn archive_with_one_image(dir: &Path, file_name: &str, contents: &[u8], image_name: &str) -> WimArchive {
        let src_dir = dir.join(format!("src-{image_name}"));
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(src_dir.join(file_name), contents).unwrap();

        let archive_path = dir.join(format!("{image_name}.wim"));
        let mut archive = WimArchive::create(&archive_path, CodecId::Lzx).unwrap();
        add_image(&mut archive, image_name.to_string(), &src_dir, &ExclusionPatterns::default(), false).unwrap();
        archive
    }

    /// S5: an image with two files sharing one blob exports cleanly, and
    /// the shared blob's refcnt in `dest` matches the number of
    /// references (§8 property 4), not the number of distinct hashes.
    #[test]
    fn export_image_with_internally_deduplicated_blob() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src-shared");
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(src_dir.join("a.txt"), b"same bytes").unwrap();
        std::fs::write(src_dir.join("b.txt"), b"same bytes").unwrap();

        let src_path = dir.path().join("shared.wim");
        let mut src = WimArchive::create(&src_path, CodecId::Lzx).unwrap();
        add_image(&mut src, "main".to_string(), &src_dir, &ExclusionPatterns::default(), false).unwrap();
        assert_eq!(src.blobs.len(), 1, "both files should dedup to one blob in src");
        assert_eq!(src.blobs.iter().next().unwrap().refcnt, 2);

        let mut dest = WimArchive::create(dir.path().join("dest.wim"), CodecId::Lzx).unwrap();
        export_image(&mut src, ImageSelector::Index(1), &mut dest, ForeignHandleId(1), None, None, false).unwrap();

        assert_eq!(dest.catalog.count(), 1);
        assert_eq!(dest.blobs.len(), 1);
        assert_eq!(dest.blobs.iter().next().unwrap().refcnt, 2);
        // The source side settles back to its pre-export refcnt.
        assert_eq!(src.blobs.iter().next().unwrap().refcnt, 2);
    }

    /// S5: export then delete from the source leaves the exported copy
    /// in `dest` with its blob refcount intact.
    #[test]
    fn export_then_delete_source_keeps_dest_intact() {
        let dir = tempdir().unwrap();
        let mut src = archive_with_one_image(dir.path(), "a.txt", b"shared contents", "main");
        let mut dest = WimArchive::create(dir.path().join("dest.wim"), CodecId::Lzx).unwrap();

        export_image(&mut src, ImageSelector::Index(1), &mut dest, ForeignHandleId(1), None, None, false).unwrap();
        assert_eq!(dest.catalog.count(), 1);
        assert_eq!(dest.blobs.len(), 1);

        delete_image(&mut src, ImageSelector::Index(1)).unwrap();
        assert_eq!(src.catalog.count(), 0);
        assert!(src.blobs.is_empty());

        // S7: dest is unaffected by the source's deletion.
        assert_eq!(dest.catalog.count(), 1);
        assert_eq!(dest.blobs.len(), 1);
        assert_eq!(dest.blobs.iter().next().unwrap().refcnt, 1);
    }

    #[test]
    fn export_rejects_name_collision() {
        let dir = tempdir().unwrap();
        let mut src = archive_with_one_image(dir.path(), "a.txt", b"one", "main");
        let mut dest = archive_with_one_image(dir.path(), "b.txt", b"two", "main");

        let err = export_image(&mut src, ImageSelector::Index(1), &mut dest, ForeignHandleId(1), None, None, false)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Catalog(CatalogError::ImageNameCollision(_))));
    }

    #[test]
    fn delete_all_repeats_until_empty() {
        let dir = tempdir().unwrap();
        let mut archive = archive_with_one_image(dir.path(), "a.txt", b"one", "first");
        add_image(
            &mut archive,
            "second".to_string(),
            dir.path(),
            &ExclusionPatterns::new(["/src-first/*".to_string()]),
            false,
        )
        .unwrap();
        assert_eq!(archive.catalog.count(), 2);

        delete_image(&mut archive, ImageSelector::All).unwrap();
        assert_eq!(archive.catalog.count(), 0);
    }

    #[test]
    fn add_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let mut archive = archive_with_one_image(dir.path(), "a.txt", b"one", "main");
        let err = add_image(&mut archive, "main".to_string(), dir.path(), &ExclusionPatterns::default(), false)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Catalog(CatalogError::ImageNameCollision(_))));
    }
}
