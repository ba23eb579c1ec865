//! Directory tree data model (§3): the shape both ingest paths (§4.I)
//! produce and the catalog (§4.H) persists as a per-image metadata
//! resource.
//!
//! Trees own their nodes; nodes reference blob descriptors by hash
//! through the blob table rather than owning them (§9 "cyclic ownership
//! is absent by design"). Parent links are `Weak` so a subtree can be
//! dropped without the dangling-child problem a raw back-pointer would
//! create.

use crate::hash::{Hash, StreamingHash};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// NT-style file attribute bits relevant to this model; the rest pass
/// through unexamined.
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;

/// 100-nanosecond ticks since 1601-01-01, the on-disk timestamp unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileTime(pub u64);

/// Offset between the 1601 epoch and the Unix epoch, in 100-ns ticks.
const UNIX_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

impl FileTime {
    pub fn from_unix_timestamp(secs: i64) -> Self {
        let ticks = (secs * 10_000_000) + UNIX_EPOCH_OFFSET as i64;
        FileTime(ticks.max(0) as u64)
    }

    pub fn to_chrono(self) -> chrono::DateTime<chrono::Utc> {
        let unix_ticks = self.0.saturating_sub(UNIX_EPOCH_OFFSET);
        let secs = (unix_ticks / 10_000_000) as i64;
        let nanos = ((unix_ticks % 10_000_000) * 100) as u32;
        chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub creation_time: FileTime,
    pub last_write_time: FileTime,
    pub last_access_time: FileTime,
}

/// A reparse-point attribute: a 4-byte tag plus opaque payload (§9
/// GLOSSARY). Payloads under 8 bytes are rejected by the source-volume
/// ingest path (§4.I).
#[derive(Debug, Clone)]
pub struct ReparseData {
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// One named alternate data stream.
#[derive(Debug, Clone)]
pub struct NamedStream {
    pub name: String,
    pub hash: Hash,
}

#[derive(Debug)]
pub struct DirectoryNode {
    pub name: String,
    pub attributes: u32,
    pub timestamps: Timestamps,
    /// Index into the image's security descriptor table, or `-1`.
    pub security_id: i32,
    pub unnamed_stream: Option<Hash>,
    pub named_streams: Vec<NamedStream>,
    pub short_name: Option<String>,
    pub reparse: Option<ReparseData>,
    pub children: Vec<Rc<RefCell<DirectoryNode>>>,
    pub parent: Option<Weak<RefCell<DirectoryNode>>>,
}

impl DirectoryNode {
    pub fn new_root() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name: String::new(),
            attributes: FILE_ATTRIBUTE_DIRECTORY,
            timestamps: Timestamps::default(),
            security_id: -1,
            unnamed_stream: None,
            named_streams: Vec::new(),
            short_name: None,
            reparse: None,
            children: Vec::new(),
            parent: None,
        }))
    }

    pub fn new_child(name: impl Into<String>, attributes: u32) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            attributes,
            timestamps: Timestamps::default(),
            security_id: -1,
            unnamed_stream: None,
            named_streams: Vec::new(),
            short_name: None,
            reparse: None,
            children: Vec::new(),
            parent: None,
        }))
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0
    }
}

/// Link `child` under `parent`, setting the back-pointer (§3 "non-root
/// nodes have a non-null parent").
pub fn link_child(parent: &Rc<RefCell<DirectoryNode>>, child: Rc<RefCell<DirectoryNode>>) {
    child.borrow_mut().parent = Some(Rc::downgrade(parent));
    parent.borrow_mut().children.push(child);
}

/// Derive a node's full path by walking its parent chain (§3).
pub fn full_path(node: &Rc<RefCell<DirectoryNode>>) -> String {
    let mut parts = Vec::new();
    let mut current = Rc::clone(node);
    loop {
        let name = current.borrow().name.clone();
        let parent = current.borrow().parent.clone();
        if !name.is_empty() {
            parts.push(name);
        }
        match parent.and_then(|p| p.upgrade()) {
            Some(p) => current = p,
            None => break,
        }
    }
    parts.reverse();
    format!("/{}", parts.join("/"))
}

/// Walk every stream reference in a tree, depth-first, invoking
/// `callback` with each referenced hash — the traversal export/delete
/// (§4.J) use to incref/decref blobs. The sentinel empty-stream hash is
/// skipped; it never names a blob in the table (§3).
pub fn walk_stream_refs(root: &Rc<RefCell<DirectoryNode>>, callback: &mut impl FnMut(Hash)) {
    let node = root.borrow();
    if let Some(h) = node.unnamed_stream {
        if !h.is_empty_stream() {
            callback(h);
        }
    }
    for stream in &node.named_streams {
        if !stream.hash.is_empty_stream() {
            callback(stream.hash);
        }
    }
    for child in &node.children {
        walk_stream_refs(child, callback);
    }
}

/// Per-image security descriptor table (§3): descriptors deduplicated by
/// hashing their bytes, addressed by small integer id.
#[derive(Debug, Clone, Default)]
pub struct SecurityDescriptorTable {
    descriptors: Vec<Vec<u8>>,
    by_hash: HashMap<Hash, i32>,
}

impl SecurityDescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `bytes`, deduplicating against any descriptor already
    /// present with the same content hash (§4.I). Returns the id to use
    /// as a node's `security_id`.
    pub fn intern(&mut self, bytes: &[u8]) -> i32 {
        let mut h = StreamingHash::new();
        h.update(bytes);
        let hash = h.finish();

        if let Some(&id) = self.by_hash.get(&hash) {
            return id;
        }
        let id = self.descriptors.len() as i32;
        self.descriptors.push(bytes.to_vec());
        self.by_hash.insert(hash, id);
        id
    }

    pub fn get(&self, id: i32) -> Option<&[u8]> {
        if id < 0 {
            return None;
        }
        self.descriptors.get(id as usize).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn sizes(&self) -> Vec<u32> {
        self.descriptors.iter().map(|d| d.len() as u32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_reflects_parent_chain() {
        let root = DirectoryNode::new_root();
        let dir = DirectoryNode::new_child("Windows", FILE_ATTRIBUTE_DIRECTORY);
        link_child(&root, Rc::clone(&dir));
        let file = DirectoryNode::new_child("notepad.exe", 0);
        link_child(&dir, Rc::clone(&file));

        assert_eq!(full_path(&file), "/Windows/notepad.exe");
    }

    #[test]
    fn security_table_dedups_by_content() {
        let mut table = SecurityDescriptorTable::new();
        let a = table.intern(b"descriptor-bytes");
        let b = table.intern(b"descriptor-bytes");
        let c = table.intern(b"different");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn walk_skips_empty_sentinel_stream() {
        let root = DirectoryNode::new_root();
        let file = DirectoryNode::new_child("empty.txt", 0);
        file.borrow_mut().unnamed_stream = Some(Hash::ZERO);
        link_child(&root, Rc::clone(&file));

        let mut seen = Vec::new();
        walk_stream_refs(&root, &mut |h| seen.push(h));
        assert!(seen.is_empty());
    }
}
