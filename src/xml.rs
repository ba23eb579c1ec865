//! XML manifest API (§6): treated as an opaque collaborator everywhere
//! else in this crate. This module supplies one concrete implementation
//! so the crate is runnable end to end without a caller wiring in their
//! own — the same role `codec::LzxCodec` plays for the codec interface.

use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct ImageXmlInfo {
    pub name: String,
    pub description: Option<String>,
    pub flags_element: Option<String>,
}

/// `add_image` / `export_image` / `delete_image` (§6) — the only three
/// operations the core invokes on the manifest.
pub trait XmlManifest: fmt::Debug {
    fn add_image(&mut self, name: &str, description: Option<&str>, flags_element: Option<&str>);
    fn export_image(&mut self, name: &str, description: Option<&str>, flags_element: Option<&str>);
    fn delete_image(&mut self, index: usize);
}

/// A plain in-memory manifest, serialized as a flat list. Real WIM tools
/// expect actual XML here; this crate's governing scope treats the
/// serializer itself as external (§1), so this default only keeps the
/// in-memory bookkeeping the orchestrator needs.
#[derive(Debug, Clone, Default)]
pub struct DefaultXmlManifest {
    pub images: Vec<ImageXmlInfo>,
}

impl XmlManifest for DefaultXmlManifest {
    fn add_image(&mut self, name: &str, description: Option<&str>, flags_element: Option<&str>) {
        self.images.push(ImageXmlInfo {
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            flags_element: flags_element.map(|s| s.to_string()),
        });
    }

    fn export_image(&mut self, name: &str, description: Option<&str>, flags_element: Option<&str>) {
        self.add_image(name, description, flags_element);
    }

    fn delete_image(&mut self, index: usize) {
        if index >= 1 && index <= self.images.len() {
            self.images.remove(index - 1);
        }
    }
}
