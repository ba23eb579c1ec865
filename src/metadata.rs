//! Per-image metadata resource (de)serialization.
//!
//! Each image's directory tree and security descriptor table are
//! persisted as one resource (addressed through the blob table like any
//! other content, flagged `METADATA`) so that loading an image is just
//! "decompress this resource, then parse it" (§2 "tree load", §3 "Image
//! metadata"). The exact on-disk encoding of that resource is left
//! unspecified by name in this crate's governing document beyond "encodes
//! the directory tree"; this module picks a flat, little-endian,
//! manually-packed binary layout rather than a self-describing format —
//! consistent with every other on-disk structure in this crate (§4.K,
//! §6 "little-endian throughout").

use crate::endian::{get_u32, get_u64};
use crate::hash::{Hash, HASH_LEN};
use crate::tree::{DirectoryNode, FileTime, NamedStream, ReparseData, SecurityDescriptorTable, Timestamps};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("metadata resource truncated or malformed: {0}")]
    Malformed(String),
    #[error("string is not valid UTF-16: {0}")]
    InvalidUtf16(String),
}

fn write_u16_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let units: Vec<u16> = s.encode_utf16().collect();
    w.write_all(&(units.len() as u32).to_le_bytes())?;
    for u in units {
        w.write_all(&u.to_le_bytes())?;
    }
    Ok(())
}

fn read_u16_string<R: Read>(r: &mut R) -> Result<String, MetadataError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = get_u32(&len_buf) as usize;
    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        let mut b = [0u8; 2];
        r.read_exact(&mut b)?;
        units.push(u16::from_le_bytes(b));
    }
    String::from_utf16(&units).map_err(|e| MetadataError::InvalidUtf16(e.to_string()))
}

fn write_hash<W: Write>(w: &mut W, h: Hash) -> io::Result<()> {
    w.write_all(h.as_bytes())
}

fn read_hash<R: Read>(r: &mut R) -> Result<Hash, MetadataError> {
    let mut buf = [0u8; HASH_LEN];
    r.read_exact(&mut buf)?;
    Ok(Hash(buf))
}

fn write_filetime<W: Write>(w: &mut W, ft: FileTime) -> io::Result<()> {
    w.write_all(&ft.0.to_le_bytes())
}

fn read_filetime<R: Read>(r: &mut R) -> io::Result<FileTime> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(FileTime(get_u64(&buf)))
}

fn encode_node<W: Write>(w: &mut W, node: &DirectoryNode) -> Result<(), MetadataError> {
    write_u16_string(w, &node.name)?;
    w.write_all(&node.attributes.to_le_bytes())?;
    write_filetime(w, node.timestamps.creation_time)?;
    write_filetime(w, node.timestamps.last_write_time)?;
    write_filetime(w, node.timestamps.last_access_time)?;
    w.write_all(&node.security_id.to_le_bytes())?;

    write_hash(w, node.unnamed_stream.unwrap_or(Hash::ZERO))?;

    w.write_all(&(node.named_streams.len() as u32).to_le_bytes())?;
    for s in &node.named_streams {
        write_u16_string(w, &s.name)?;
        write_hash(w, s.hash)?;
    }

    match &node.short_name {
        Some(name) => {
            w.write_all(&[1u8])?;
            write_u16_string(w, name)?;
        }
        None => w.write_all(&[0u8])?,
    }

    match &node.reparse {
        Some(r) => {
            w.write_all(&[1u8])?;
            w.write_all(&r.tag.to_le_bytes())?;
            w.write_all(&(r.payload.len() as u32).to_le_bytes())?;
            w.write_all(&r.payload)?;
        }
        None => w.write_all(&[0u8])?,
    }

    w.write_all(&(node.children.len() as u32).to_le_bytes())?;
    for child in &node.children {
        encode_node(w, &child.borrow())?;
    }
    Ok(())
}

fn decode_node<R: Read>(r: &mut R) -> Result<Rc<RefCell<DirectoryNode>>, MetadataError> {
    let name = read_u16_string(r)?;

    let mut u32_buf = [0u8; 4];
    r.read_exact(&mut u32_buf)?;
    let attributes = get_u32(&u32_buf);

    let creation_time = read_filetime(r)?;
    let last_write_time = read_filetime(r)?;
    let last_access_time = read_filetime(r)?;

    let mut i32_buf = [0u8; 4];
    r.read_exact(&mut i32_buf)?;
    let security_id = i32::from_le_bytes(i32_buf);

    let unnamed = read_hash(r)?;
    let unnamed_stream = if unnamed.is_empty_stream() { None } else { Some(unnamed) };

    r.read_exact(&mut u32_buf)?;
    let stream_count = get_u32(&u32_buf);
    let mut named_streams = Vec::with_capacity(stream_count as usize);
    for _ in 0..stream_count {
        let name = read_u16_string(r)?;
        let hash = read_hash(r)?;
        named_streams.push(NamedStream { name, hash });
    }

    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;
    let short_name = if flag[0] == 1 { Some(read_u16_string(r)?) } else { None };

    r.read_exact(&mut flag)?;
    let reparse = if flag[0] == 1 {
        let mut tag_buf = [0u8; 4];
        r.read_exact(&mut tag_buf)?;
        let tag = get_u32(&tag_buf);
        r.read_exact(&mut u32_buf)?;
        let payload_len = get_u32(&u32_buf) as usize;
        let mut payload = vec![0u8; payload_len];
        r.read_exact(&mut payload)?;
        Some(ReparseData { tag, payload })
    } else {
        None
    };

    r.read_exact(&mut u32_buf)?;
    let child_count = get_u32(&u32_buf);

    let node = Rc::new(RefCell::new(DirectoryNode {
        name,
        attributes,
        timestamps: Timestamps { creation_time, last_write_time, last_access_time },
        security_id,
        unnamed_stream,
        named_streams,
        short_name,
        reparse,
        children: Vec::new(),
        parent: None,
    }));

    for _ in 0..child_count {
        let child = decode_node(r)?;
        crate::tree::link_child(&node, child);
    }

    Ok(node)
}

fn encode_security_table<W: Write>(w: &mut W, table: &SecurityDescriptorTable) -> io::Result<()> {
    w.write_all(&(table.len() as u32).to_le_bytes())?;
    for i in 0..table.len() {
        let bytes = table.get(i as i32).expect("index within len()");
        w.write_all(&(bytes.len() as u32).to_le_bytes())?;
        w.write_all(bytes)?;
    }
    Ok(())
}

fn decode_security_table<R: Read>(r: &mut R) -> Result<SecurityDescriptorTable, MetadataError> {
    let mut table = SecurityDescriptorTable::new();
    let mut u32_buf = [0u8; 4];
    r.read_exact(&mut u32_buf)?;
    let count = get_u32(&u32_buf);
    for _ in 0..count {
        r.read_exact(&mut u32_buf)?;
        let len = get_u32(&u32_buf) as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        table.intern(&bytes);
    }
    Ok(table)
}

const METADATA_MAGIC: u32 = 0x574D_4454; // "WMDT"

/// Serialize a root node plus its image's security table into the flat
/// layout stored as that image's metadata resource.
pub fn encode(
    root: &Rc<RefCell<DirectoryNode>>,
    security: &SecurityDescriptorTable,
) -> Result<Vec<u8>, MetadataError> {
    let mut buf = Vec::new();
    buf.write_all(&METADATA_MAGIC.to_le_bytes())?;
    encode_security_table(&mut buf, security)?;
    encode_node(&mut buf, &root.borrow())?;
    Ok(buf)
}

pub fn decode(
    bytes: &[u8],
) -> Result<(Rc<RefCell<DirectoryNode>>, SecurityDescriptorTable), MetadataError> {
    let mut cursor = io::Cursor::new(bytes);
    let mut magic_buf = [0u8; 4];
    cursor.read_exact(&mut magic_buf)?;
    if get_u32(&magic_buf) != METADATA_MAGIC {
        return Err(MetadataError::Malformed("bad metadata resource magic".into()));
    }
    let security = decode_security_table(&mut cursor)?;
    let root = decode_node(&mut cursor)?;
    Ok((root, security))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{link_child, FILE_ATTRIBUTE_DIRECTORY};

    #[test]
    fn round_trips_a_small_tree() {
        let root = DirectoryNode::new_root();
        let file = DirectoryNode::new_child("a.txt", 0);
        file.borrow_mut().unnamed_stream = Some(Hash::of(b"contents"));
        link_child(&root, Rc::clone(&file));

        let dir = DirectoryNode::new_child("sub", FILE_ATTRIBUTE_DIRECTORY);
        link_child(&root, Rc::clone(&dir));

        let mut security = SecurityDescriptorTable::new();
        let sid = security.intern(b"sd-bytes");
        file.borrow_mut().security_id = sid;

        let bytes = encode(&root, &security).unwrap();
        let (decoded_root, decoded_security) = decode(&bytes).unwrap();

        assert_eq!(decoded_security.len(), 1);
        assert_eq!(decoded_root.borrow().children.len(), 2);
        let decoded_file = decoded_root.borrow().children[0].clone();
        assert_eq!(decoded_file.borrow().name, "a.txt");
        assert_eq!(decoded_file.borrow().unnamed_stream, Some(Hash::of(b"contents")));
        assert_eq!(decoded_file.borrow().security_id, sid);
    }
}
