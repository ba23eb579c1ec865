//! Codec registry for the two container compression algorithms.
//!
//! # Identity rules
//! A resource's codec is *not* stored per-resource: the container header
//! (§4.K) carries one codec id that applies to every `COMPRESSED` resource
//! in the archive (§4.D). Codec id 1 is LZX, id 2 is XPRESS (§6).
//!
//! # Out-of-scope boundary
//! Per spec §1, concrete decompressor implementations are external
//! collaborators: the core only requires the pure signature
//! `decompress(src, dst, expected_len) -> success|failure` (§6). This
//! module ships one in-process decoder (LZX, backed by the `lzxd` crate)
//! as a convenience default; XPRESS has no in-process implementation and
//! must be supplied through the plugin ABI in `plugin.rs`. Neither codec
//! ships an in-process *compressor* — see `compress`'s doc comment.

use lzxd::{Lzxd, WindowSize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("compression is not available for this codec in this build")]
    CompressionUnavailable,
    #[error("decompressed output length {actual} does not match expected length {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("required codec id {0} is not available — cannot open archive")]
    UnavailableCodec(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive-wide compression codec identity (§3 resource entry `flags`,
/// §4.K header, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CodecId {
    Lzx = 1,
    Xpress = 2,
}

impl CodecId {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(CodecId::Lzx),
            2 => Some(CodecId::Xpress),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::Lzx => "LZX",
            CodecId::Xpress => "XPRESS",
        }
    }
}

/// A chunk whose compressed length equals its uncompressed length is
/// always stored verbatim and the codec is never invoked (§3, §4.D). This
/// constant is the chunk size that drives that comparison.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Pure codec contract (§6). `decompress` must not allocate beyond the
/// caller-sized output and must be safe to call concurrently for distinct
/// buffer pairs — the same contract the plugin ABI in `plugin.rs` grants
/// out-of-process implementations.
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Decompress `src` into `dst`, which is exactly `expected_len` bytes.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CodecError>;

    /// Attempt to compress `data`. Codecs without an available in-process
    /// compressor return `CompressionUnavailable`; the resource writer
    /// treats that identically to "would not shrink" and stores the chunk
    /// verbatim (§4.E) — this is format-legal, not a degraded mode.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// LZX decoder backed by the real `lzxd` crate. No in-process encoder is
/// bundled (the crate is decode-only); see `compress`.
pub struct LzxCodec {
    window_size: WindowSize,
}

impl LzxCodec {
    pub fn new() -> Self {
        // wimlib uses a 32 KiB chunk size, comfortably inside the smallest
        // LZX window; KB32 is the conservative choice for stand-alone
        // chunk-at-a-time decoding as each chunk resets cleanly.
        Self { window_size: WindowSize::KB32 }
    }
}

impl Default for LzxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for LzxCodec {
    fn id(&self) -> CodecId {
        CodecId::Lzx
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CodecError> {
        let mut lzxd = Lzxd::new(self.window_size);
        let out = lzxd
            .decompress_next(src)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        if out.len() != dst.len() {
            return Err(CodecError::LengthMismatch {
                expected: dst.len(),
                actual: out.len(),
            });
        }
        dst.copy_from_slice(out);
        Ok(())
    }

    fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::CompressionUnavailable)
    }
}

/// XPRESS has no in-process implementation in this build; it is reachable
/// only through a registered plugin (`plugin::PluginCodec`). This stub
/// exists so `registry()` can report the codec id as *known* (so the
/// container layer doesn't reject its own header) while still requiring a
/// plugin before any XPRESS-compressed resource can actually be read.
pub struct XpressCodec;

impl Codec for XpressCodec {
    fn id(&self) -> CodecId {
        CodecId::Xpress
    }

    fn decompress(&self, _src: &[u8], _dst: &mut [u8]) -> Result<(), CodecError> {
        Err(CodecError::UnavailableCodec(CodecId::Xpress as u16))
    }

    fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::CompressionUnavailable)
    }
}

/// Resolve a codec id to an implementation. Callers that need XPRESS
/// support must register a plugin and consult it before falling back
/// here; this registry is the in-process default only.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::Lzx => Box::new(LzxCodec::new()),
        CodecId::Xpress => Box::new(XpressCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_id_round_trips() {
        assert_eq!(CodecId::from_u16(1), Some(CodecId::Lzx));
        assert_eq!(CodecId::from_u16(2), Some(CodecId::Xpress));
        assert_eq!(CodecId::from_u16(3), None);
    }

    #[test]
    fn xpress_has_no_builtin_decoder() {
        let c = get_codec(CodecId::Xpress);
        let mut dst = [0u8; 4];
        assert!(c.decompress(&[], &mut dst).is_err());
    }
}
