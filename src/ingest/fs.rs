//! Ingest from a POSIX-like filesystem tree (§4.I).

use super::{ExclusionPatterns, IngestError};
use crate::blob::{BlobDescriptor, BlobLocation, BlobTable};
use crate::container::ResourceEntry;
use crate::hash::{Hash, StreamingHash};
use crate::tree::{link_child, DirectoryNode, FileTime, Timestamps, FILE_ATTRIBUTE_DIRECTORY};
use std::cell::RefCell;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

const STREAM_HASH_CHUNK: usize = 64 * 1024;

/// Walk `root_path` depth-first, hashing every regular file with a
/// streaming hash and deduplicating through `blobs`. Returns the root
/// directory node of the resulting tree.
pub fn ingest_fs_tree(
    root_path: &Path,
    blobs: &mut BlobTable,
    exclusions: &ExclusionPatterns,
) -> Result<Rc<RefCell<DirectoryNode>>, IngestError> {
    let root = DirectoryNode::new_root();
    populate_fs_timestamps(&root, &fs::symlink_metadata(root_path)?)?;
    walk(root_path, &root, blobs, exclusions, "")?;
    Ok(root)
}

fn walk(
    dir_path: &Path,
    parent: &Rc<RefCell<DirectoryNode>>,
    blobs: &mut BlobTable,
    exclusions: &ExclusionPatterns,
    logical_prefix: &str,
) -> Result<(), IngestError> {
    let mut entries: Vec<_> = fs::read_dir(dir_path)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let logical_path = format!("{logical_prefix}/{name}");
        if exclusions.is_excluded(&logical_path) {
            log::debug!("skipping excluded path {logical_path}");
            continue;
        }

        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;

        if meta.is_dir() {
            let node = DirectoryNode::new_child(name, FILE_ATTRIBUTE_DIRECTORY);
            populate_fs_timestamps(&node, &meta)?;
            link_child(parent, Rc::clone(&node));
            walk(&path, &node, blobs, exclusions, &logical_path)?;
        } else {
            let node = DirectoryNode::new_child(name, 0);
            populate_fs_timestamps(&node, &meta)?;

            let hash = if meta.len() == 0 {
                Hash::ZERO
            } else {
                let hash = hash_file(&path)?;
                match blobs.lookup_mut(&hash) {
                    Some(desc) => desc.incref(),
                    None => {
                        let mut desc = BlobDescriptor::new(
                            hash,
                            BlobLocation::InFileOnDisk { path: path.clone() },
                        );
                        desc.resource_entry = ResourceEntry {
                            original_size: meta.len(),
                            ..ResourceEntry::default()
                        };
                        blobs.insert(desc)?;
                    }
                }
                hash
            };
            node.borrow_mut().unnamed_stream = Some(hash);
            link_child(parent, node);
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<Hash, IngestError> {
    let mut f = fs::File::open(path)?;
    let mut hasher = StreamingHash::new();
    let mut buf = [0u8; STREAM_HASH_CHUNK];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

fn populate_fs_timestamps(
    node: &Rc<RefCell<DirectoryNode>>,
    meta: &fs::Metadata,
) -> Result<(), IngestError> {
    let to_filetime = |t: std::io::Result<SystemTime>| -> FileTime {
        t.ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| FileTime::from_unix_timestamp(d.as_secs() as i64))
            .unwrap_or_default()
    };
    node.borrow_mut().timestamps = Timestamps {
        creation_time: to_filetime(meta.created()),
        last_write_time: to_filetime(meta.modified()),
        last_access_time: to_filetime(meta.accessed()),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::full_path;
    use tempfile::tempdir;

    #[test]
    fn dedups_identical_files_by_hash() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![7u8; 1000]).unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![7u8; 1000]).unwrap();

        let mut blobs = BlobTable::new();
        let root = ingest_fs_tree(dir.path(), &mut blobs, &ExclusionPatterns::default()).unwrap();

        assert_eq!(root.borrow().children.len(), 2);
        assert_eq!(blobs.len(), 1, "S4: identical content dedups to one descriptor");
        let hash = root.borrow().children[0].borrow().unnamed_stream.unwrap();
        assert_eq!(blobs.lookup(&hash).unwrap().refcnt, 2);
    }

    #[test]
    fn nested_directories_produce_correct_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), b"x").unwrap();

        let mut blobs = BlobTable::new();
        let root = ingest_fs_tree(dir.path(), &mut blobs, &ExclusionPatterns::default()).unwrap();
        let sub = &root.borrow().children[0];
        let file = &sub.borrow().children[0];
        assert_eq!(full_path(file), "/sub/file.txt");
    }

    #[test]
    fn empty_file_gets_sentinel_hash() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), b"").unwrap();

        let mut blobs = BlobTable::new();
        let root = ingest_fs_tree(dir.path(), &mut blobs, &ExclusionPatterns::default()).unwrap();
        let hash = root.borrow().children[0].borrow().unnamed_stream.unwrap();
        assert!(hash.is_empty_stream());
        assert!(blobs.is_empty());
    }
}
