//! Frozen C ABI for codec plug-ins (§6 "Codec plug-ins").
//!
//! Concrete decompressor implementations are explicitly out of scope for
//! the core (§1): this module is the boundary at which an external
//! collaborator supplies one. A plug-in is a shared library exporting:
//!
//! ```c
//! const WimCodecPlugin *wimarc_codec_register(void);
//! ```
//!
//! The returned pointer is **static** — the host never frees it.
//!
//! # Stability contract
//! - `WIMARC_PLUGIN_ABI_VERSION` only ever increases.
//! - New fields are appended at the end of `WimCodecPlugin` only.
//! - A plugin compiled against ABI version N is compatible with any host
//!   whose `WIMARC_PLUGIN_ABI_VERSION` is ≥ N.
//!
//! # Thread safety
//! `decompress` must be safe to call concurrently from multiple threads on
//! distinct buffer pairs and must not touch global mutable state — the
//! same "pure, allocation-free" requirement §6 places on the codec
//! interface itself.

use crate::codec::{Codec, CodecError, CodecId};

pub const WIMARC_PLUGIN_ABI_VERSION: u32 = 1;

/// Return codes from a plugin's `decompress` function.
pub mod rc {
    /// Success — `*out_len` holds the number of bytes written.
    pub const OK: i32 = 0;
    /// Output buffer too small for the decompressed data.
    pub const OVERFLOW: i32 = -1;
    /// Input is corrupt or truncated.
    pub const CORRUPT: i32 = -2;
    /// Codec-internal failure.
    pub const INTERNAL: i32 = -3;
}

/// Frozen C ABI descriptor for one codec plug-in.
///
/// # Safety
/// The function pointer crosses an FFI boundary; [`PluginCodec`] enforces
/// the buffer-validity invariants documented on the field before calling
/// through the raw pointer.
///
/// # Layout
/// `#[repr(C)]` is mandatory. New fields go at the end only.
#[repr(C)]
pub struct WimCodecPlugin {
    /// Codec id this plugin implements: 1 = LZX, 2 = XPRESS (§6).
    pub codec_id: u16,

    /// Must equal `WIMARC_PLUGIN_ABI_VERSION` the plugin was built
    /// against. The host rejects plugins whose `abi_version` exceeds its
    /// own.
    pub abi_version: u32,

    /// Decompress `src_len` bytes from `src_ptr` into `dst_ptr`.
    ///
    /// On entry `*dst_len` is the capacity of `dst_ptr` in bytes (always
    /// exactly the resource's `expected_len` per §6). On `rc::OK`,
    /// `*dst_len` is set to the number of bytes written.
    ///
    /// # Safety
    /// - `src_ptr[0..src_len]` must be a valid readable region.
    /// - `dst_ptr[0..*dst_len]` must be a valid writable region.
    /// - The two regions must not overlap.
    /// - Neither pointer is null.
    /// - Reentrant: safe to call from multiple threads simultaneously with
    ///   non-overlapping buffer pairs.
    pub decompress: Option<
        unsafe extern "C" fn(
            src_ptr: *const u8,
            src_len: u32,
            dst_ptr: *mut u8,
            dst_len: *mut u32,
        ) -> i32,
    >,
}

// Safety: the ABI contract declares `decompress` reentrant and stateless.
unsafe impl Send for WimCodecPlugin {}
unsafe impl Sync for WimCodecPlugin {}

/// Safe wrapper around a loaded [`WimCodecPlugin`], adapting it to the
/// in-process [`Codec`] trait.
pub struct PluginCodec {
    desc: &'static WimCodecPlugin,
}

impl PluginCodec {
    /// Wrap a static plugin descriptor after validating its ABI version.
    pub fn new(desc: &'static WimCodecPlugin) -> Result<Self, String> {
        if desc.abi_version > WIMARC_PLUGIN_ABI_VERSION {
            return Err(format!(
                "plugin ABI version {} is newer than host ABI version {}",
                desc.abi_version, WIMARC_PLUGIN_ABI_VERSION,
            ));
        }
        Ok(Self { desc })
    }
}

impl Codec for PluginCodec {
    fn id(&self) -> CodecId {
        CodecId::from_u16(self.desc.codec_id).unwrap_or(CodecId::Xpress)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), CodecError> {
        let f = self
            .desc
            .decompress
            .ok_or_else(|| CodecError::Decompression("plugin missing decompress fn".into()))?;
        let mut out_len = dst.len() as u32;
        let rc = unsafe { f(src.as_ptr(), src.len() as u32, dst.as_mut_ptr(), &mut out_len) };
        if rc != rc::OK {
            return Err(CodecError::Decompression(format!(
                "plugin decompress returned error code {rc}"
            )));
        }
        if out_len as usize != dst.len() {
            return Err(CodecError::LengthMismatch {
                expected: dst.len(),
                actual: out_len as usize,
            });
        }
        Ok(())
    }

    fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        // The plugin ABI only exposes decompress (§6); plugins that also
        // support encoding would need a host-side extension this crate
        // does not define.
        Err(CodecError::CompressionUnavailable)
    }
}
