//! Blob table (§4.F): `hash → descriptor`, O(1) average lookup, insertion
//! order irrelevant.

use super::{BlobDescriptor, BlobError, BlobLocation};
use crate::container::{ResourceEntry, RESOURCE_ENTRY_SIZE};
use crate::hash::{Hash, HASH_LEN};
use std::collections::HashMap;
use std::io::{self, Read, Write};

#[derive(Debug, Default)]
pub struct BlobTable {
    entries: HashMap<Hash, BlobDescriptor>,
}

impl BlobTable {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Insert a new descriptor. A hash collision with an existing entry
    /// is undefined behavior absent a SHA-1 break and is asserted here
    /// rather than silently overwriting (§4.F).
    pub fn insert(&mut self, desc: BlobDescriptor) -> Result<(), BlobError> {
        if self.entries.contains_key(&desc.hash) {
            return Err(BlobError::Collision(desc.hash));
        }
        self.entries.insert(desc.hash, desc);
        Ok(())
    }

    pub fn lookup(&self, hash: &Hash) -> Option<&BlobDescriptor> {
        self.entries.get(hash)
    }

    pub fn lookup_mut(&mut self, hash: &Hash) -> Option<&mut BlobDescriptor> {
        self.entries.get_mut(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<BlobDescriptor> {
        self.entries.remove(hash)
    }

    pub fn iterate(&self, mut callback: impl FnMut(&BlobDescriptor)) {
        for desc in self.entries.values() {
            callback(desc);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlobDescriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decrement the refcnt of the descriptor keyed by `hash`; if it
    /// reaches zero, remove and return it. Returns `Ok(None)` if the
    /// entry survived, `Ok(Some(desc))` if it was removed.
    pub fn decref(&mut self, hash: &Hash) -> Result<Option<BlobDescriptor>, BlobError> {
        let hit_zero = {
            let desc = self.entries.get_mut(hash).ok_or(BlobError::NotFound(*hash))?;
            desc.decref()
        };
        if hit_zero {
            Ok(self.entries.remove(hash))
        } else {
            Ok(None)
        }
    }

    pub fn incref(&mut self, hash: &Hash) -> Result<(), BlobError> {
        self.entries.get_mut(hash).ok_or(BlobError::NotFound(*hash))?.incref();
        Ok(())
    }

    /// Serialize the subset of entries that are actually resolved to
    /// byte ranges inside this archive (`InThisArchive`) — the only kind
    /// that belongs in the on-disk lookup table a fresh `open` will
    /// reload (§4.K "the lookup table"). Entries still pointing at a
    /// staging file, an attached buffer, or a foreign archive only exist
    /// transiently until a write resolves them into this archive.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let resolved: Vec<&BlobDescriptor> = self
            .entries
            .values()
            .filter(|d| matches!(d.location, BlobLocation::InThisArchive))
            .collect();
        buf.write_all(&(resolved.len() as u32).to_le_bytes())?;
        for desc in resolved {
            buf.write_all(desc.hash.as_bytes())?;
            buf.write_all(&desc.refcnt.to_le_bytes())?;
            let mut entry_buf = [0u8; RESOURCE_ENTRY_SIZE];
            desc.resource_entry.write(&mut entry_buf);
            buf.write_all(&entry_buf)?;
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        let mut count_buf = [0u8; 4];
        cursor.read_exact(&mut count_buf)?;
        let count = u32::from_le_bytes(count_buf);

        let mut table = Self::new();
        for _ in 0..count {
            let mut hash_buf = [0u8; HASH_LEN];
            cursor.read_exact(&mut hash_buf)?;
            let hash = Hash(hash_buf);

            let mut refcnt_buf = [0u8; 8];
            cursor.read_exact(&mut refcnt_buf)?;
            let refcnt = u64::from_le_bytes(refcnt_buf);

            let mut entry_buf = [0u8; RESOURCE_ENTRY_SIZE];
            cursor.read_exact(&mut entry_buf)?;
            let resource_entry = ResourceEntry::read(&entry_buf);

            let mut desc = BlobDescriptor::in_this_archive(hash, resource_entry);
            desc.refcnt = refcnt;
            table.entries.insert(hash, desc);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobLocation;
    use crate::container::ResourceEntry;

    fn desc(byte: u8) -> BlobDescriptor {
        let mut h = [0u8; 20];
        h[0] = byte;
        BlobDescriptor::in_this_archive(Hash(h), ResourceEntry::default())
    }

    #[test]
    fn insert_lookup_remove() {
        let mut t = BlobTable::new();
        t.insert(desc(1)).unwrap();
        let h = Hash({
            let mut b = [0u8; 20];
            b[0] = 1;
            b
        });
        assert!(t.lookup(&h).is_some());
        assert_eq!(t.len(), 1);
        t.remove(&h);
        assert!(t.is_empty());
    }

    #[test]
    fn collision_is_rejected() {
        let mut t = BlobTable::new();
        t.insert(desc(7)).unwrap();
        assert!(t.insert(desc(7)).is_err());
    }

    /// S4: deduplication. Two identical streams, one descriptor,
    /// refcnt == 2.
    #[test]
    fn s4_dedup_refcount() {
        let mut t = BlobTable::new();
        let h = Hash::of(b"same contents, size 1000 logically");
        t.insert(BlobDescriptor::new(h, BlobLocation::InFileOnDisk { path: "/a".into() }))
            .unwrap();
        t.incref(&h).unwrap();
        assert_eq!(t.lookup(&h).unwrap().refcnt, 2);
    }

    #[test]
    fn decref_to_zero_removes_entry() {
        let mut t = BlobTable::new();
        let h = Hash::of(b"solo");
        t.insert(BlobDescriptor::new(h, BlobLocation::InAttachedBuffer { data: vec![].into() }))
            .unwrap();
        let removed = t.decref(&h).unwrap();
        assert!(removed.is_some());
        assert!(t.lookup(&h).is_none());
    }

    #[test]
    fn encode_decode_round_trip_skips_external_locations() {
        let mut t = BlobTable::new();
        t.insert(desc(3)).unwrap(); // InThisArchive
        t.insert(BlobDescriptor::new(Hash::of(b"external"), BlobLocation::InFileOnDisk { path: "/x".into() }))
            .unwrap();

        let bytes = t.encode().unwrap();
        let back = BlobTable::decode(&bytes).unwrap();
        assert_eq!(back.len(), 1);
    }
}
