//! Namespace resolution for OOXML part documents.
//!
//! Office documents bind namespaces once, on the root element, under whatever
//! prefixes the producing application chose (`p:` is customary for
//! PresentationML but not guaranteed). Before new elements are spliced into a
//! document, the prefixes actually in force are read from the root so that the
//! new markup uses them.

use crate::ooxml::opc::error::{OpcError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use smallvec::SmallVec;

/// Namespace bindings declared on a document's root element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMap {
    /// Prefix of the root element's own tag (`None` when unprefixed)
    root_prefix: Option<String>,
    /// Local name of the root element
    root_local_name: String,
    /// Declared bindings; `None` is the default namespace
    bindings: SmallVec<[(Option<String>, String); 8]>,
}

impl NamespaceMap {
    /// Build the map from a root element start tag.
    pub fn from_element(element: &BytesStart<'_>) -> Result<Self> {
        let name = element.name();
        let root_prefix = name
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        let root_local_name = String::from_utf8_lossy(name.local_name().as_ref()).into_owned();

        let mut bindings = SmallVec::new();
        for attr in element.attributes() {
            let attr = attr?;
            let key = attr.key.as_ref();
            let prefix = if key == b"xmlns" {
                None
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                Some(String::from_utf8_lossy(prefix).into_owned())
            } else {
                continue;
            };
            let uri = attr.unescape_value()?.into_owned();
            bindings.push((prefix, uri));
        }

        Ok(Self {
            root_prefix,
            root_local_name,
            bindings,
        })
    }

    /// Read the root element of `xml` and build its namespace map.
    ///
    /// # Errors
    /// [`OpcError::MalformedXml`] if the document cannot be parsed up to its root
    /// or has no root element.
    pub fn from_document(xml: &[u8], partname: &str) -> Result<Self> {
        let malformed = |reason: String| OpcError::MalformedXml {
            partname: partname.to_string(),
            reason,
        };

        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    return Self::from_element(e).map_err(|e| malformed(e.to_string()));
                },
                Ok(Event::Eof) => return Err(malformed("no root element".to_string())),
                Err(e) => return Err(malformed(e.to_string())),
                _ => {},
            }
            buf.clear();
        }
    }

    /// Namespace URI bound to `prefix`, or the default namespace for `None`.
    pub fn uri_for(&self, prefix: Option<&str>) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// The default namespace, if the root declares one.
    #[inline]
    pub fn default_namespace(&self) -> Option<&str> {
        self.uri_for(None)
    }

    /// Prefix used on the root element's own tag.
    #[inline]
    pub fn root_prefix(&self) -> Option<&str> {
        self.root_prefix.as_deref()
    }

    /// Local name of the root element.
    #[inline]
    pub fn root_local_name(&self) -> &str {
        &self.root_local_name
    }

    /// Namespace of the root element itself.
    pub fn root_namespace(&self) -> Option<&str> {
        self.uri_for(self.root_prefix())
    }

    /// A prefix bound to `uri`.
    ///
    /// Returns `Some(None)` when `uri` is the default namespace and `None` when
    /// the URI is not bound at all. A named prefix is preferred over the default
    /// binding so attributes (which never take the default namespace) can use it.
    pub fn prefix_for(&self, uri: &str) -> Option<Option<&str>> {
        let mut default_match = false;
        for (prefix, bound) in &self.bindings {
            if bound == uri {
                match prefix {
                    Some(p) => return Some(Some(p.as_str())),
                    None => default_match = true,
                }
            }
        }
        default_match.then_some(None)
    }

    /// Qualified tag name for a new element in `uri`'s namespace.
    ///
    /// Falls back to the root element's prefix when `uri` is not bound.
    pub fn qualify(&self, uri: &str, local_name: &str) -> String {
        let prefix = match self.prefix_for(uri) {
            Some(prefix) => prefix,
            None => self.root_prefix(),
        };
        qualified_name(prefix, local_name)
    }
}

/// Join an optional prefix and a local name.
#[inline]
pub fn qualified_name(prefix: Option<&str>, local_name: &str) -> String {
    match prefix {
        Some(p) => format!("{}:{}", p, local_name),
        None => local_name.to_string(),
    }
}
