//! The `[Content_Types].xml` registry.
//!
//! Implements the OPC content type discovery algorithm using Default and Override
//! elements, plus the union rules applied when parts from one package are merged
//! into another.

use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::PackURI;
use crate::ooxml::opc::rel::escape_xml;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which kind of declaration answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    Default,
    Override,
}

/// A declaration rejected because the registry already maps its key elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeConflict {
    pub kind: DeclarationKind,
    /// Extension (lowercase) for defaults, part name for overrides.
    pub key: String,
    /// The MIME type that stays registered.
    pub kept: String,
    /// The MIME type that was offered and refused.
    pub rejected: String,
}

/// Content type map for looking up content types by part name or extension.
///
/// Both maps are ordered so that serialization is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ContentTypeMap {
    /// Maps lowercase file extensions to default content types
    defaults: BTreeMap<String, String>,

    /// Maps specific partnames to override content types
    overrides: BTreeMap<String, String>,
}

impl ContentTypeMap {
    /// Create a new empty content type map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse content types from `[Content_Types].xml`.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut map = Self::new();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    let declaration: Option<(&[u8], bool)> = match e.local_name().as_ref() {
                        b"Types" => {
                            saw_root = true;
                            None
                        },
                        b"Default" => Some((b"Extension", true)),
                        b"Override" => Some((b"PartName", false)),
                        _ => None,
                    };
                    let Some((key_attr, is_default)) = declaration else {
                        buf.clear();
                        continue;
                    };

                    let mut key = None;
                    let mut content_type = None;

                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == key_attr {
                            key = Some(attr.unescape_value()?.into_owned());
                        } else if attr.key.as_ref() == b"ContentType" {
                            content_type = Some(attr.unescape_value()?.into_owned());
                        }
                    }

                    if let (Some(key), Some(ct)) = (key, content_type) {
                        if is_default {
                            map.add_default(&key, &ct);
                        } else {
                            map.add_override(&key, &ct);
                        }
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(OpcError::MalformedXml {
                        partname: crate::ooxml::opc::packuri::CONTENT_TYPES_URI.to_string(),
                        reason: e.to_string(),
                    });
                },
                _ => {},
            }
            buf.clear();
        }

        if !saw_root {
            return Err(OpcError::CorruptContainer(
                "[Content_Types].xml has no Types element".to_string(),
            ));
        }

        Ok(map)
    }

    /// Add (or replace) a default content type mapping for a file extension.
    pub fn add_default(&mut self, extension: &str, content_type: &str) {
        self.defaults
            .insert(extension.to_ascii_lowercase(), content_type.to_string());
    }

    /// Add (or replace) an override content type mapping for a specific partname.
    pub fn add_override(&mut self, partname: &str, content_type: &str) {
        self.overrides
            .insert(partname.to_string(), content_type.to_string());
    }

    /// Add an override unless the part name is already declared differently.
    ///
    /// The existing declaration wins; a disagreement is returned as a conflict.
    pub fn add_override_checked(
        &mut self,
        partname: &str,
        content_type: &str,
    ) -> Option<ContentTypeConflict> {
        match self.overrides.get(partname) {
            Some(existing) if existing == content_type => None,
            Some(existing) => Some(ContentTypeConflict {
                kind: DeclarationKind::Override,
                key: partname.to_string(),
                kept: existing.clone(),
                rejected: content_type.to_string(),
            }),
            None => {
                self.add_override(partname, content_type);
                None
            },
        }
    }

    /// Default content type registered for an extension.
    pub fn default_for(&self, extension: &str) -> Option<&str> {
        self.defaults
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Override registered for an exact part name.
    pub fn override_for(&self, partname: &str) -> Option<&str> {
        self.overrides.get(partname).map(String::as_str)
    }

    /// Resolve a part's content type and report which declaration supplied it.
    ///
    /// Overrides take precedence over defaults. Part names compare
    /// case-insensitively when no exact override exists.
    pub fn lookup(&self, pack_uri: &PackURI) -> Option<(DeclarationKind, &str)> {
        if let Some(ct) = self.overrides.get(pack_uri.as_str()) {
            return Some((DeclarationKind::Override, ct));
        }
        if let Some((_, ct)) = self
            .overrides
            .iter()
            .find(|(partname, _)| pack_uri.eq_ignore_case(partname))
        {
            return Some((DeclarationKind::Override, ct));
        }

        self.default_for(pack_uri.ext())
            .map(|ct| (DeclarationKind::Default, ct))
    }

    /// Get the content type for a partname.
    #[inline]
    pub fn get(&self, pack_uri: &PackURI) -> Option<&str> {
        self.lookup(pack_uri).map(|(_, ct)| ct)
    }

    /// Union another registry's Default declarations into this one.
    ///
    /// On an extension declared by both with a different MIME type, this
    /// registry's value is kept and one conflict is returned for that extension.
    pub fn union_defaults(&mut self, other: &ContentTypeMap) -> Vec<ContentTypeConflict> {
        let mut conflicts = Vec::new();

        for (ext, ct) in &other.defaults {
            match self.defaults.get(ext) {
                Some(existing) if existing.eq_ignore_ascii_case(ct) => {},
                Some(existing) => conflicts.push(ContentTypeConflict {
                    kind: DeclarationKind::Default,
                    key: ext.clone(),
                    kept: existing.clone(),
                    rejected: ct.clone(),
                }),
                None => {
                    self.defaults.insert(ext.clone(), ct.clone());
                },
            }
        }

        conflicts
    }

    /// Iterate over `(extension, content type)` defaults in extension order.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defaults.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over `(partname, content type)` overrides in part name order.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Generate the XML for `[Content_Types].xml`.
    ///
    /// Defaults are written sorted by extension, then overrides sorted by part name.
    pub fn to_xml(&self) -> String {
        let mut xml =
            String::with_capacity(256 + (self.defaults.len() + self.overrides.len()) * 120);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );

        for (ext, content_type) in &self.defaults {
            xml.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape_xml(ext),
                escape_xml(content_type)
            ));
        }

        for (partname, content_type) in &self.overrides {
            xml.push_str(&format!(
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape_xml(partname),
                escape_xml(content_type)
            ));
        }

        xml.push_str("</Types>");

        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::constants::content_type as ct;

    const MANIFEST: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="xml" ContentType="application/xml"/>
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="PNG" ContentType="image/png"/>
  <Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>
  <Override PartName="/ppt/slides/slide1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>
</Types>"#;

    #[test]
    fn test_content_type_map() {
        let map = ContentTypeMap::from_xml(MANIFEST).unwrap();

        let slide = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(map.lookup(&slide), Some((DeclarationKind::Override, ct::PML_SLIDE)));

        let other_xml = PackURI::new("/docProps/app.xml").unwrap();
        assert_eq!(map.lookup(&other_xml), Some((DeclarationKind::Default, ct::XML)));

        let image = PackURI::new("/ppt/media/image1.png").unwrap();
        assert_eq!(map.get(&image), Some(ct::PNG));

        let unknown = PackURI::new("/ppt/media/clip.mp4").unwrap();
        assert_eq!(map.get(&unknown), None);
    }

    #[test]
    fn test_override_lookup_ignores_case() {
        let map = ContentTypeMap::from_xml(MANIFEST).unwrap();
        let slide = PackURI::new("/PPT/Slides/Slide1.xml").unwrap();
        assert_eq!(map.lookup(&slide), Some((DeclarationKind::Override, ct::PML_SLIDE)));
    }

    #[test]
    fn test_union_defaults_target_wins() {
        let mut target = ContentTypeMap::new();
        target.add_default("xml", ct::XML);
        target.add_default("jpeg", ct::JPEG);

        let mut source = ContentTypeMap::new();
        source.add_default("xml", ct::XML);
        source.add_default("jpeg", "image/jpg");
        source.add_default("gif", ct::GIF);

        let conflicts = target.union_defaults(&source);
        assert_eq!(
            conflicts,
            vec![ContentTypeConflict {
                kind: DeclarationKind::Default,
                key: "jpeg".to_string(),
                kept: ct::JPEG.to_string(),
                rejected: "image/jpg".to_string(),
            }]
        );
        assert_eq!(target.default_for("jpeg"), Some(ct::JPEG));
        assert_eq!(target.default_for("gif"), Some(ct::GIF));
    }

    #[test]
    fn test_add_override_checked() {
        let mut map = ContentTypeMap::new();
        assert!(map.add_override_checked("/ppt/slides/slide2.xml", ct::PML_SLIDE).is_none());
        assert!(map.add_override_checked("/ppt/slides/slide2.xml", ct::PML_SLIDE).is_none());

        let conflict = map
            .add_override_checked("/ppt/slides/slide2.xml", ct::PML_NOTES_SLIDE)
            .unwrap();
        assert_eq!(conflict.kind, DeclarationKind::Override);
        assert_eq!(conflict.kept, ct::PML_SLIDE);
        assert_eq!(map.override_for("/ppt/slides/slide2.xml"), Some(ct::PML_SLIDE));
    }

    #[test]
    fn test_to_xml_is_sorted_and_reparses() {
        let map = ContentTypeMap::from_xml(MANIFEST).unwrap();
        let xml = map.to_xml();

        let png = xml.find(r#"<Default Extension="png""#).unwrap();
        let rels = xml.find(r#"<Default Extension="rels""#).unwrap();
        let pres = xml.find(r#"<Override PartName="/ppt/presentation.xml""#).unwrap();
        assert!(png < rels && rels < pres);

        let reparsed = ContentTypeMap::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(reparsed.to_xml(), xml);
    }

    #[test]
    fn test_manifest_without_types_root() {
        let err = ContentTypeMap::from_xml(b"<Nope/>").unwrap_err();
        assert!(matches!(err, OpcError::CorruptContainer(_)));
    }
}
