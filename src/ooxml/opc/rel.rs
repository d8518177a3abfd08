/// Relationship-related objects for OPC packages.
///
/// This module provides types for managing relationships between parts in an OPC package,
/// including internal and external relationships, and the (de)serialization of `.rels`
/// documents.
use crate::ooxml::opc::constants::target_mode;
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::PackURI;
use quick_xml::Reader;
use quick_xml::events::Event;
use smallvec::SmallVec;

/// A single relationship from a source part to a target.
///
/// Represents a connection between parts in an OPC package, identified by an rId
/// (relationship ID). Can be either internal (pointing to another part) or external
/// (pointing to an external URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1", "rId2")
    r_id: String,

    /// Relationship type URI
    reltype: String,

    /// Target reference - either a part URI or external URL
    target_ref: String,

    /// Base URI for resolving relative references
    base_uri: String,

    /// Whether this is an external relationship
    is_external: bool,
}

impl Relationship {
    /// Create a new relationship.
    ///
    /// # Arguments
    /// * `r_id` - Relationship ID (e.g., "rId1")
    /// * `reltype` - Relationship type URI
    /// * `target_ref` - Target reference (part URI or external URL)
    /// * `base_uri` - Base URI for resolving relative references
    /// * `is_external` - Whether this is an external relationship
    pub fn new(
        r_id: String,
        reltype: String,
        target_ref: String,
        base_uri: String,
        is_external: bool,
    ) -> Self {
        Self {
            r_id,
            reltype,
            target_ref,
            base_uri,
            is_external,
        }
    }

    /// Get the relationship ID.
    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    /// Get the relationship type.
    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    /// Get the target reference.
    ///
    /// For internal relationships, this is a relative part reference.
    /// For external relationships, this is an absolute URL.
    #[inline]
    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Numeric suffix of an `rId<n>` identifier, if it has that shape.
    pub fn numeric_id(&self) -> Option<u32> {
        parse_r_id(&self.r_id)
    }

    /// Get the absolute target partname for internal relationships.
    ///
    /// Returns an error if this is an external relationship.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external {
            return Err(OpcError::InvalidPackUri(format!(
                "Cannot get target_partname for external relationship {}",
                self.r_id
            )));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref).map_err(OpcError::InvalidPackUri)
    }
}

/// Parse the numeric suffix of an `rId<n>` relationship identifier.
#[inline]
pub fn parse_r_id(r_id: &str) -> Option<u32> {
    let digits = r_id.strip_prefix("rId")?;
    if digits.is_empty() {
        return None;
    }
    atoi_simd::parse::<u32, false, false>(digits.as_bytes()).ok()
}

/// Collection of relationships from a single source part.
///
/// Relationships are kept in document order so that a document written back
/// out lists them the way they were read, followed by any appended entries.
#[derive(Debug, Clone, Default)]
pub struct Relationships {
    /// Base URI for resolving relative references
    base_uri: String,

    /// Relationships in document order
    rels: SmallVec<[Relationship; 8]>,
}

impl Relationships {
    /// Create a new empty relationships collection.
    ///
    /// # Arguments
    /// * `base_uri` - Base URI for resolving relative references
    pub fn new(base_uri: String) -> Self {
        Self {
            base_uri,
            rels: SmallVec::new(),
        }
    }

    /// Parse a `.rels` document.
    ///
    /// Uses quick-xml for efficient streaming XML parsing. Any parse failure is
    /// reported as [`OpcError::MalformedRelationships`] against `partname`.
    ///
    /// # Arguments
    /// * `rels_xml` - The raw relationship document
    /// * `base_uri` - Base URI of the part owning these relationships
    /// * `partname` - The relationship document's own name, used in errors
    pub fn from_xml(rels_xml: &[u8], base_uri: &str, partname: &str) -> Result<Self> {
        let malformed = |reason: String| OpcError::MalformedRelationships {
            partname: partname.to_string(),
            reason,
        };

        let mut rels = Self::new(base_uri.to_string());
        let mut reader = Reader::from_reader(rels_xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    match e.local_name().as_ref() {
                        b"Relationships" => saw_root = true,
                        b"Relationship" => {
                            let mut r_id = None;
                            let mut reltype = None;
                            let mut target_ref = None;
                            let mut is_external = false;

                            for attr in e.attributes() {
                                let attr = attr.map_err(|e| malformed(e.to_string()))?;
                                let value = attr
                                    .unescape_value()
                                    .map_err(|e| malformed(e.to_string()))?;
                                match attr.key.as_ref() {
                                    b"Id" => r_id = Some(value.into_owned()),
                                    b"Type" => reltype = Some(value.into_owned()),
                                    b"Target" => target_ref = Some(value.into_owned()),
                                    b"TargetMode" => {
                                        is_external = value == target_mode::EXTERNAL
                                    },
                                    _ => {},
                                }
                            }

                            match (r_id, reltype, target_ref) {
                                (Some(id), Some(rt), Some(tr)) => {
                                    rels.push(Relationship::new(
                                        id,
                                        rt,
                                        tr,
                                        base_uri.to_string(),
                                        is_external,
                                    ));
                                },
                                _ => {
                                    return Err(malformed(
                                        "Relationship element missing Id, Type or Target"
                                            .to_string(),
                                    ));
                                },
                            }
                        },
                        _ => {},
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(malformed(e.to_string())),
                _ => {},
            }
            buf.clear();
        }

        if !saw_root {
            return Err(malformed("missing Relationships root element".to_string()));
        }

        Ok(rels)
    }

    /// The base URI relationships in this collection resolve against.
    #[inline]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Append a relationship.
    pub fn push(&mut self, rel: Relationship) {
        self.rels.push(rel);
    }

    /// Add an internal or external relationship built from its parts.
    ///
    /// # Returns
    /// Reference to the newly added relationship
    pub fn add_relationship(
        &mut self,
        reltype: String,
        target_ref: String,
        r_id: String,
        is_external: bool,
    ) -> &Relationship {
        let rel = Relationship::new(r_id, reltype, target_ref, self.base_uri.clone(), is_external);
        self.rels.push(rel);
        &self.rels[self.rels.len() - 1]
    }

    /// Get a relationship by its ID.
    #[inline]
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|rel| rel.r_id == r_id)
    }

    /// Get the first relationship of a specific type.
    pub fn first_of_type(&self, reltype: &str) -> Option<&Relationship> {
        self.rels.iter().find(|rel| rel.reltype == reltype)
    }

    /// Get an iterator over all relationships in document order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    /// Get the number of relationships in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    /// Check if the collection is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Remove a relationship by its ID.
    pub fn remove(&mut self, r_id: &str) -> Option<Relationship> {
        let pos = self.rels.iter().position(|rel| rel.r_id == r_id)?;
        Some(self.rels.remove(pos))
    }

    /// Serialize relationships to XML format.
    ///
    /// Generates the XML for a .rels file in collection order.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(128 + self.rels.len() * 160);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );

        for rel in &self.rels {
            let target_mode = if rel.is_external() {
                r#" TargetMode="External""#
            } else {
                ""
            };

            xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape_xml(rel.r_id()),
                escape_xml(rel.reltype()),
                escape_xml(rel.target_ref()),
                target_mode
            ));
        }

        xml.push_str("</Relationships>");

        xml
    }
}

/// Escape XML special characters for attribute values.
#[inline]
pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
