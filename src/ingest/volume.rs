//! Ingest from a source volume with rich NT-style metadata (§4.I).
//!
//! The volume itself is an external collaborator (§1); this module only
//! consumes the [`VolumeDriver`] contract (§6 "blob-source plug-ins").

use super::{ExclusionPatterns, IngestError};
use crate::blob::source::{VolumeDirEntry, VolumeDriver};
use crate::blob::{BlobDescriptor, BlobLocation, BlobTable, VolumeHandleId};
use crate::container::ResourceEntry;
use crate::hash::{Hash, StreamingHash};
use crate::tree::{
    link_child, DirectoryNode, SecurityDescriptorTable, Timestamps, FILE_ATTRIBUTE_REPARSE_POINT,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeDriverError {
    #[error("volume driver io error: {0}")]
    Io(#[from] std::io::Error),
}

const ATTR_READ_CHUNK: u64 = 64 * 1024;

/// Walk `root_volume_path` inode-by-inode through `driver`, producing a
/// directory tree plus the security table accumulated along the way.
pub fn ingest_volume_tree(
    driver: &dyn VolumeDriver,
    volume_handle: VolumeHandleId,
    root_volume_path: &str,
    blobs: &mut BlobTable,
    exclusions: &ExclusionPatterns,
) -> Result<(Rc<RefCell<DirectoryNode>>, SecurityDescriptorTable), IngestError> {
    let root = DirectoryNode::new_root();
    let mut security = SecurityDescriptorTable::new();
    walk(driver, volume_handle, root_volume_path, &root, blobs, &mut security, exclusions, "")?;
    Ok((root, security))
}

fn walk(
    driver: &dyn VolumeDriver,
    volume_handle: VolumeHandleId,
    volume_path: &str,
    parent: &Rc<RefCell<DirectoryNode>>,
    blobs: &mut BlobTable,
    security: &mut SecurityDescriptorTable,
    exclusions: &ExclusionPatterns,
    logical_prefix: &str,
) -> Result<(), IngestError> {
    let entries = driver.list_directory(volume_path).map_err(VolumeDriverError::Io)?;

    // Two-pass DOS short-name binding (§4.I): collect short names keyed
    // by inode number first, then bind once the listing is complete —
    // mirrors the source volume's separate short-name directory records.
    let mut short_names: HashMap<u64, String> = HashMap::new();
    for entry in &entries {
        if let Some(short) = &entry.short_name {
            short_names.insert(entry.inode_number, short.clone());
        }
    }

    for entry in &entries {
        let logical_path = format!("{logical_prefix}/{}", entry.name);
        if exclusions.is_excluded(&logical_path) {
            log::debug!("skipping excluded volume path {logical_path}");
            continue;
        }

        let node = DirectoryNode::new_child(entry.name.clone(), entry.attributes);
        node.borrow_mut().timestamps = Timestamps {
            creation_time: entry.creation_time,
            last_write_time: entry.last_write_time,
            last_access_time: entry.last_access_time,
        };
        node.borrow_mut().short_name = short_names.get(&entry.inode_number).cloned();

        let child_volume_path = format!("{volume_path}/{}", entry.name);
        let is_reparse_point = entry.attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0;

        if let Some(tag) = entry.reparse_tag {
            let raw_len = driver
                .attribute_len(&child_volume_path, "")
                .map_err(VolumeDriverError::Io)?;
            if raw_len < 8 {
                return Err(IngestError::ReparsePayloadTooShort);
            }
            node.borrow_mut().reparse = Some(crate::tree::ReparseData { tag, payload: Vec::new() });
        }

        for (stream_name, len) in &entry.streams {
            let is_unnamed = stream_name.is_empty();
            let skip_header = is_unnamed && is_reparse_point;
            let logical_len = if skip_header { len.saturating_sub(8) } else { *len };

            let hash = if logical_len == 0 {
                Hash::ZERO
            } else {
                let hash = hash_attribute(driver, &child_volume_path, stream_name, skip_header, logical_len)?;
                match blobs.lookup_mut(&hash) {
                    Some(desc) => desc.incref(),
                    None => {
                        let mut desc = BlobDescriptor::new(
                            hash,
                            BlobLocation::InSourceVolume {
                                volume_handle,
                                volume_path: child_volume_path.clone(),
                                stream_name: stream_name.clone(),
                                is_reparse_point: skip_header,
                            },
                        );
                        desc.resource_entry =
                            ResourceEntry { original_size: logical_len, ..ResourceEntry::default() };
                        blobs.insert(desc)?;
                    }
                }
                hash
            };

            if is_unnamed {
                if node.borrow().unnamed_stream.is_some() {
                    log::warn!("inode {} has a second unnamed data stream; dropping it", entry.inode_number);
                    continue;
                }
                node.borrow_mut().unnamed_stream = Some(hash);
            } else {
                node.borrow_mut().named_streams.push(crate::tree::NamedStream {
                    name: stream_name.clone(),
                    hash,
                });
            }
        }

        if let Some(sd) = &entry.security_descriptor {
            node.borrow_mut().security_id = security.intern(sd);
        }

        link_child(parent, Rc::clone(&node));

        if entry.is_directory {
            walk(
                driver,
                volume_handle,
                &child_volume_path,
                &node,
                blobs,
                security,
                exclusions,
                &logical_path,
            )?;
        }
    }

    Ok(())
}

fn hash_attribute(
    driver: &dyn VolumeDriver,
    volume_path: &str,
    stream_name: &str,
    skip_header: bool,
    logical_len: u64,
) -> Result<Hash, IngestError> {
    let base_offset = if skip_header { 8 } else { 0 };
    let mut hasher = StreamingHash::new();
    let mut pos = 0u64;
    let mut buf = vec![0u8; ATTR_READ_CHUNK as usize];
    while pos < logical_len {
        let take = ATTR_READ_CHUNK.min(logical_len - pos) as usize;
        let dst = &mut buf[..take];
        driver
            .read_attribute(volume_path, stream_name, base_offset + pos, dst)
            .map_err(VolumeDriverError::Io)?;
        hasher.update(dst);
        pos += take as u64;
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::source::VolumeDirEntry;
    use crate::tree::FileTime;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    struct FakeVolume {
        dirs: Map<String, Vec<VolumeDirEntry>>,
        attrs: Mutex<Map<(String, String), Vec<u8>>>,
    }

    impl VolumeDriver for FakeVolume {
        fn list_directory(&self, volume_path: &str) -> std::io::Result<Vec<VolumeDirEntry>> {
            Ok(self.dirs.get(volume_path).cloned().unwrap_or_default())
        }
        fn read_attribute(
            &self,
            volume_path: &str,
            stream_name: &str,
            offset: u64,
            dst: &mut [u8],
        ) -> std::io::Result<()> {
            let attrs = self.attrs.lock().unwrap();
            let data = attrs.get(&(volume_path.to_string(), stream_name.to_string())).unwrap();
            let start = offset as usize;
            dst.copy_from_slice(&data[start..start + dst.len()]);
            Ok(())
        }
        fn attribute_len(&self, volume_path: &str, stream_name: &str) -> std::io::Result<u64> {
            let attrs = self.attrs.lock().unwrap();
            Ok(attrs.get(&(volume_path.to_string(), stream_name.to_string())).map(|v| v.len()).unwrap_or(0) as u64)
        }
    }

    fn entry(name: &str, inode: u64, is_dir: bool, streams: Vec<(String, u64)>) -> VolumeDirEntry {
        VolumeDirEntry {
            inode_number: inode,
            name: name.to_string(),
            short_name: None,
            is_directory: is_dir,
            attributes: if is_dir { crate::tree::FILE_ATTRIBUTE_DIRECTORY } else { 0 },
            creation_time: FileTime::default(),
            last_write_time: FileTime::default(),
            last_access_time: FileTime::default(),
            streams,
            reparse_tag: None,
            security_descriptor: None,
        }
    }

    #[test]
    fn walks_and_dedups_streams() {
        let mut attrs = Map::new();
        attrs.insert(("/file.txt".to_string(), "".to_string()), b"hello".to_vec());
        let mut dirs = Map::new();
        dirs.insert("".to_string(), vec![entry("file.txt", 1, false, vec![("".to_string(), 5)])]);

        let driver = FakeVolume { dirs, attrs: Mutex::new(attrs) };
        let mut blobs = BlobTable::new();
        let (root, _sec) = ingest_volume_tree(
            &driver,
            VolumeHandleId(1),
            "",
            &mut blobs,
            &ExclusionPatterns::default(),
        )
        .unwrap();

        assert_eq!(root.borrow().children.len(), 1);
        assert_eq!(blobs.len(), 1);
        let hash = root.borrow().children[0].borrow().unnamed_stream.unwrap();
        assert_eq!(hash, Hash::of(b"hello"));
    }
}
