//! Unaligned, endian-fixed integer load/store and the primitive readers
//! every on-disk structure in this crate is built from.
//!
//! Every numeric field in a `.wim` container is little-endian. This module
//! is the one place that decides that; nothing downstream calls
//! `to_le_bytes`/`from_le_bytes` directly.

use std::io::{self, Read, Write};

/// Read an unaligned `u16` from the start of `buf`. Panics if `buf` is
/// shorter than 2 bytes — callers are expected to have sliced exactly.
#[inline]
pub fn get_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes(buf[..2].try_into().unwrap())
}

#[inline]
pub fn get_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[..4].try_into().unwrap())
}

#[inline]
pub fn get_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[..8].try_into().unwrap())
}

#[inline]
pub fn put_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_u32(buf: &mut [u8], v: u32) {
    buf[..4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn put_u64(buf: &mut [u8], v: u64) {
    buf[..8].copy_from_slice(&v.to_le_bytes());
}

/// Read a little-endian `u16` from a stream.
pub fn read_u16<R: Read>(mut r: R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(get_u16(&buf))
}

/// Read a little-endian `u32` from a stream.
pub fn read_u32<R: Read>(mut r: R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(get_u32(&buf))
}

/// Read a little-endian `u64` from a stream.
pub fn read_u64<R: Read>(mut r: R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(get_u64(&buf))
}

/// Write a little-endian `u16` to a stream.
pub fn write_u16<W: Write>(mut w: W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write a little-endian `u32` to a stream.
pub fn write_u32<W: Write>(mut w: W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write a little-endian `u64` to a stream.
pub fn write_u64<W: Write>(mut w: W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut buf = [0u8; 8];
        put_u64(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(get_u64(&buf), 0x0102_0304_0506_0708);
        assert_eq!(buf[0], 0x08, "little-endian byte order");
    }

    #[test]
    fn stream_helpers() {
        let mut out = Vec::new();
        write_u32(&mut out, 0xDEAD_BEEF).unwrap();
        assert_eq!(read_u32(&out[..]).unwrap(), 0xDEAD_BEEF);
    }
}
