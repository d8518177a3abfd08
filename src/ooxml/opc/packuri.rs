/// Provides the PackURI value type and utilities for working with package URIs.
///
/// A PackURI represents a part name within an OPC package, following the URI format
/// defined by the Open Packaging Conventions specification.
use std::borrow::Borrow;

/// Represents a package URI, which is a partname within an OPC package.
///
/// PackURIs always begin with a forward slash and use forward slashes as path separators,
/// following the OPC specification. They provide access to various components like
/// the base URI (directory), filename, extension, and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackURI {
    /// The full pack URI string (e.g., "/ppt/slides/slide1.xml")
    uri: String,
}

impl PackURI {
    /// Create a new PackURI from a string.
    ///
    /// # Arguments
    /// * `uri` - The URI string, which must begin with a forward slash
    ///
    /// # Returns
    /// * `Ok(PackURI)` if the URI is valid
    /// * `Err` if the URI doesn't start with a forward slash
    pub fn new<S: Into<String>>(uri: S) -> Result<Self, String> {
        let uri = uri.into();
        if !uri.starts_with('/') {
            return Err(format!("PackURI must begin with slash, got '{}'", uri));
        }
        Ok(PackURI { uri })
    }

    /// Create a PackURI from a ZIP member name (no leading slash).
    pub fn from_membername(membername: &str) -> Self {
        PackURI {
            uri: format!("/{}", membername.trim_start_matches('/')),
        }
    }

    /// Create a PackURI from a relative reference and a base URI.
    ///
    /// This translates a relative reference (like "../media/image1.png") onto a base URI
    /// (like "/ppt/slides") to produce an absolute PackURI (like "/ppt/media/image1.png").
    /// Absolute references (starting with '/') ignore the base. Percent-encoded octets
    /// are decoded so the result matches the ZIP member name.
    ///
    /// # Arguments
    /// * `base_uri` - The base URI to resolve from
    /// * `relative_ref` - The relative reference to resolve
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self, String> {
        if relative_ref.is_empty() {
            return Err("empty relationship target".to_string());
        }
        let decoded = urlencoding::decode(relative_ref)
            .map_err(|e| format!("relationship target {relative_ref:?}: {e}"))?;
        let joined = if decoded.starts_with('/') {
            decoded.into_owned()
        } else {
            Self::join_paths(base_uri, &decoded)
        };
        let normalized = Self::normalize_path(&joined);
        Self::new(normalized)
    }

    /// Get the base URI (directory portion) of this PackURI.
    ///
    /// For example, "/ppt/slides" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns "/".
    pub fn base_uri(&self) -> &str {
        if self.uri == "/" {
            return "/";
        }

        match self.uri.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &self.uri[..pos],
        }
    }

    /// Get the filename portion of this PackURI.
    ///
    /// For example, "slide1.xml" for "/ppt/slides/slide1.xml".
    /// For the package pseudo-partname "/", returns an empty string.
    pub fn filename(&self) -> &str {
        if let Some(pos) = self.uri.rfind('/') {
            &self.uri[pos + 1..]
        } else {
            ""
        }
    }

    /// Get the extension portion of this PackURI.
    ///
    /// For example, "xml" for "/ppt/presentation.xml" (note: no leading period).
    pub fn ext(&self) -> &str {
        let filename = self.filename();
        if let Some(pos) = filename.rfind('.') {
            &filename[pos + 1..]
        } else {
            ""
        }
    }

    /// Get the filename without its extension and without any trailing index digits.
    ///
    /// For example, "slide" for "/ppt/slides/slide21.xml" and
    /// "Microsoft_Excel_Worksheet" for "/ppt/embeddings/Microsoft_Excel_Worksheet3.xlsx".
    pub fn stem(&self) -> &str {
        let filename = self.filename();
        let name_part = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };
        name_part.trim_end_matches(|c: char| c.is_ascii_digit())
    }

    /// Get the partname index for tuple partnames, or None for singleton partnames.
    ///
    /// For example, returns 21 for "/ppt/slides/slide21.xml" and None for "/ppt/presentation.xml".
    pub fn idx(&self) -> Option<u32> {
        let filename = self.filename();
        let name_part = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };
        let stem_len = name_part
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .len();

        if stem_len == 0 || stem_len == name_part.len() {
            return None;
        }
        atoi_simd::parse::<u32, false, false>(&name_part.as_bytes()[stem_len..]).ok()
    }

    /// Get the membername (URI with leading slash stripped).
    ///
    /// This is the form used as the Zip file membername for the package item.
    /// Returns an empty string for the package pseudo-partname "/".
    pub fn membername(&self) -> &str {
        if self.uri == "/" { "" } else { &self.uri[1..] }
    }

    /// Get the relative reference from a base URI to this PackURI.
    ///
    /// For example, PackURI("/ppt/slideLayouts/slideLayout1.xml") would return
    /// "../slideLayouts/slideLayout1.xml" for base_uri "/ppt/slides".
    pub fn relative_ref(&self, base_uri: &str) -> String {
        if base_uri == "/" {
            return encode_segments(self.membername().split('/'));
        }

        let from_parts: Vec<&str> = base_uri.split('/').filter(|s| !s.is_empty()).collect();
        let to_parts: Vec<&str> = self.uri.split('/').filter(|s| !s.is_empty()).collect();

        // The last segment of the target is a filename and never part of the common prefix
        let common = from_parts
            .iter()
            .zip(to_parts.iter().take(to_parts.len().saturating_sub(1)))
            .take_while(|(a, b)| a == b)
            .count();

        let mut result = String::new();
        for _ in common..from_parts.len() {
            result.push_str("../");
        }
        result.push_str(&encode_segments(to_parts[common..].iter().copied()));
        result
    }

    /// Get the PackURI of the .rels part corresponding to this PackURI.
    ///
    /// For example, "/ppt/_rels/presentation.xml.rels" for "/ppt/presentation.xml",
    /// and "/_rels/.rels" for the package pseudo-partname.
    pub fn rels_uri(&self) -> Result<PackURI, String> {
        let filename = self.filename();
        let base_uri = self.base_uri();

        let rels_filename = format!("{}.rels", filename);
        let rels_uri_str = if base_uri == "/" {
            format!("/_rels/{}", rels_filename)
        } else {
            format!("{}/_rels/{}", base_uri, rels_filename)
        };

        Self::new(rels_uri_str)
    }

    /// Whether this PackURI names a relationship document.
    pub fn is_rels_part(&self) -> bool {
        self.ext().eq_ignore_ascii_case("rels") && self.base_uri().ends_with("/_rels")
    }

    /// Inverse of [`rels_uri`](Self::rels_uri): the partname whose relationships
    /// this document holds, or None if this is not a relationship document.
    pub fn rels_source(&self) -> Option<PackURI> {
        if !self.is_rels_part() {
            return None;
        }
        let filename = self.filename();
        let source_name = &filename[..filename.len() - ".rels".len()];
        let dir = self.base_uri().strip_suffix("/_rels")?;
        let uri = match (dir.is_empty(), source_name.is_empty()) {
            (true, true) => "/".to_string(),
            (true, false) => format!("/{}", source_name),
            (false, _) => format!("{}/{}", dir, source_name),
        };
        Some(PackURI { uri })
    }

    /// Compare two partnames the way OPC does (ASCII case-insensitive).
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.uri.eq_ignore_ascii_case(other)
    }

    /// Get the full URI string.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Helper function to join two paths using forward slashes
    fn join_paths(base: &str, rel: &str) -> String {
        if base.ends_with('/') {
            format!("{}{}", base, rel)
        } else {
            format!("{}/{}", base, rel)
        }
    }

    /// Helper function to normalize a path (resolve ".." and ".")
    fn normalize_path(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();

        for part in path.split('/') {
            match part {
                "" | "." => {},
                ".." => {
                    parts.pop();
                },
                _ => parts.push(part),
            }
        }

        format!("/{}", parts.join("/"))
    }
}

/// Percent-encode each path segment and join them with `/`.
fn encode_segments<'a>(segments: impl Iterator<Item = &'a str>) -> String {
    segments
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

impl std::fmt::Display for PackURI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

impl AsRef<str> for PackURI {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

impl Borrow<str> for PackURI {
    fn borrow(&self) -> &str {
        &self.uri
    }
}

/// The package pseudo-partname, representing the package itself
pub const PACKAGE_URI: &str = "/";

/// The URI for the [Content_Types].xml part
pub const CONTENT_TYPES_URI: &str = "/[Content_Types].xml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packuri_new() {
        assert!(PackURI::new("/ppt/presentation.xml").is_ok());
        assert!(PackURI::new("ppt/presentation.xml").is_err());
    }

    #[test]
    fn test_base_uri() {
        let uri = PackURI::new("/ppt/slides/slide1.xml").unwrap();
        assert_eq!(uri.base_uri(), "/ppt/slides");

        let root = PackURI::new("/").unwrap();
        assert_eq!(root.base_uri(), "/");
    }

    #[test]
    fn test_filename_ext_stem() {
        let uri = PackURI::new("/ppt/embeddings/Microsoft_Excel_Worksheet3.xlsx").unwrap();
        assert_eq!(uri.filename(), "Microsoft_Excel_Worksheet3.xlsx");
        assert_eq!(uri.ext(), "xlsx");
        assert_eq!(uri.stem(), "Microsoft_Excel_Worksheet");

        let root = PackURI::new("/").unwrap();
        assert_eq!(root.filename(), "");
    }

    #[test]
    fn test_idx() {
        let uri = PackURI::new("/ppt/slides/slide21.xml").unwrap();
        assert_eq!(uri.idx(), Some(21));

        let uri = PackURI::new("/ppt/presentation.xml").unwrap();
        assert_eq!(uri.idx(), None);
    }

    #[test]
    fn test_membername() {
        let uri = PackURI::new("/ppt/presentation.xml").unwrap();
        assert_eq!(uri.membername(), "ppt/presentation.xml");
        assert_eq!(PackURI::from_membername("ppt/presentation.xml"), uri);

        let root = PackURI::new("/").unwrap();
        assert_eq!(root.membername(), "");
    }

    #[test]
    fn test_from_rel_ref() {
        let uri = PackURI::from_rel_ref("/ppt/slides", "../media/image1.png").unwrap();
        assert_eq!(uri.as_str(), "/ppt/media/image1.png");

        let uri = PackURI::from_rel_ref("/", "ppt/presentation.xml").unwrap();
        assert_eq!(uri.as_str(), "/ppt/presentation.xml");

        let uri = PackURI::from_rel_ref("/ppt/slides", "/ppt/media/a%20b.png").unwrap();
        assert_eq!(uri.as_str(), "/ppt/media/a b.png");
    }

    #[test]
    fn test_relative_ref() {
        let uri = PackURI::new("/ppt/slideLayouts/slideLayout1.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "../slideLayouts/slideLayout1.xml");

        let uri = PackURI::new("/ppt/slides/slide2.xml").unwrap();
        assert_eq!(uri.relative_ref("/ppt/slides"), "slide2.xml");
        assert_eq!(uri.relative_ref("/ppt"), "slides/slide2.xml");
    }

    #[test]
    fn test_relative_ref_escapes_segments() {
        let sheet = PackURI::new("/ppt/embeddings/My Sheet1.xlsx").unwrap();
        let target = sheet.relative_ref("/ppt/slides");
        assert_eq!(target, "../embeddings/My%20Sheet1.xlsx");
        assert_eq!(PackURI::from_rel_ref("/ppt/slides", &target).unwrap(), sheet);

        let root = PackURI::new("/docProps/My Props.xml").unwrap();
        assert_eq!(root.relative_ref("/"), "docProps/My%20Props.xml");
    }

    #[test]
    fn test_from_rel_ref_rejects_invalid_utf8_escape() {
        assert!(PackURI::from_rel_ref("/ppt/slides", "../media/%FF.png").is_err());
        // A bare percent sign is not an escape.
        let uri = PackURI::from_rel_ref("/ppt/slides", "../media/50%.png").unwrap();
        assert_eq!(uri.as_str(), "/ppt/media/50%.png");
    }

    #[test]
    fn test_rels_uri_and_source() {
        let part = PackURI::new("/ppt/presentation.xml").unwrap();
        let rels = part.rels_uri().unwrap();
        assert_eq!(rels.as_str(), "/ppt/_rels/presentation.xml.rels");
        assert_eq!(rels.rels_source(), Some(part));

        let pkg_rels = PackURI::new(PACKAGE_URI).unwrap().rels_uri().unwrap();
        assert_eq!(pkg_rels.as_str(), "/_rels/.rels");
        assert_eq!(pkg_rels.rels_source().unwrap().as_str(), "/");

        let not_rels = PackURI::new("/ppt/media/image1.png").unwrap();
        assert_eq!(not_rels.rels_source(), None);
    }
}
