/// Objects that implement reading and writing OPC packages.
///
/// This module provides the main [`Package`] type, which represents an Open Packaging
/// Convention package in memory: a map of part names to bytes plus the content type
/// registry. Relationship documents stay stored as parts and are parsed on demand.
use crate::ooxml::opc::constants::{content_type as ct, relationship_type};
use crate::ooxml::opc::content_types::ContentTypeMap;
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::{CONTENT_TYPES_URI, PACKAGE_URI, PackURI};
use crate::ooxml::opc::phys_pkg::PhysPkgReader;
use crate::ooxml::opc::pkgwriter::{PackageWriter, SaveOptions};
use crate::ooxml::opc::rel::Relationships;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

/// What a part is, judged from its name and declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartRole {
    /// An XML document carrying content (slides, charts, layouts...)
    Content,
    /// A `.rels` relationship document
    Relationships,
    /// Binary media: images, audio, video
    Media,
    /// An embedded package or OLE blob
    Embedded,
}

/// A structural defect found by [`Package::check_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    #[error("{source_part} {r_id} points at missing part {target}")]
    DanglingRelationship {
        source_part: String,
        r_id: String,
        target: String,
    },

    #[error("{partname} has no content type")]
    MissingContentType { partname: String },

    #[error("relationships of {partname} do not parse: {reason}")]
    MalformedRelationships { partname: String, reason: String },
}

/// Main API class for working with OPC packages.
///
/// Parts are kept in a sorted map so that iteration, and therefore serialization,
/// is deterministic. Lookups compare part names ASCII case-insensitively, as OPC
/// requires; the stored spelling is kept.
#[derive(Debug, Clone, Default)]
pub struct Package {
    /// All parts except the content type manifest, indexed by partname
    parts: BTreeMap<PackURI, Vec<u8>>,

    /// Lowercased partname -> stored partname
    folded: HashMap<String, PackURI>,

    /// Content type registry parsed from `[Content_Types].xml`
    content_types: ContentTypeMap,
}

impl Package {
    /// Create a new empty package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a package from a file.
    ///
    /// # Example
    /// ```no_run
    /// use longan::ooxml::opc::Package;
    ///
    /// let pkg = Package::open("deck.pptx")?;
    /// println!("{} parts", pkg.len());
    /// # Ok::<(), longan::ooxml::opc::OpcError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Load a package from a reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Load a package from the bytes of a ZIP container.
    ///
    /// # Errors
    /// [`OpcError::CorruptContainer`] if the archive cannot be read or has no
    /// `[Content_Types].xml`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut phys_reader = PhysPkgReader::new(data)?;
        let mut parts = phys_reader.read_all()?;

        let manifest = parts
            .keys()
            .find(|uri| uri.eq_ignore_case(CONTENT_TYPES_URI))
            .cloned()
            .and_then(|uri| parts.remove(&uri))
            .ok_or_else(|| {
                OpcError::CorruptContainer("[Content_Types].xml is missing".to_string())
            })?;
        let content_types = ContentTypeMap::from_xml(&manifest)?;

        let mut folded = HashMap::with_capacity(parts.len());
        for uri in parts.keys() {
            folded
                .entry(fold(uri))
                .or_insert_with(|| uri.clone());
        }

        Ok(Self {
            parts,
            folded,
            content_types,
        })
    }

    /// Serialize the package into ZIP bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        PackageWriter::to_bytes(self)
    }

    /// Save the package to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P, options: &SaveOptions) -> Result<()> {
        PackageWriter::write(path, self, options)
    }

    /// Number of parts, excluding the content type manifest.
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The content type registry.
    #[inline]
    pub fn content_types(&self) -> &ContentTypeMap {
        &self.content_types
    }

    /// Mutable access to the content type registry.
    #[inline]
    pub fn content_types_mut(&mut self) -> &mut ContentTypeMap {
        &mut self.content_types
    }

    /// Content type declared for a part, if any.
    #[inline]
    pub fn content_type_of(&self, partname: &PackURI) -> Option<&str> {
        self.content_types.get(partname)
    }

    /// Stored spelling of `partname`, matched ASCII case-insensitively.
    ///
    /// An exact match wins over a case-folded one.
    pub fn resolve(&self, partname: &PackURI) -> Option<&PackURI> {
        match self.parts.get_key_value(partname) {
            Some((uri, _)) => Some(uri),
            None => self.folded.get(&fold(partname)),
        }
    }

    /// Get a part's bytes.
    pub fn part(&self, partname: &PackURI) -> Option<&[u8]> {
        self.resolve(partname)
            .and_then(|uri| self.parts.get(uri))
            .map(Vec::as_slice)
    }

    /// Get a part's bytes or fail with [`OpcError::PartNotFound`].
    pub fn blob(&self, partname: &PackURI) -> Result<&[u8]> {
        self.part(partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))
    }

    /// Whether a part exists, comparing names the OPC way (ASCII case-insensitive).
    #[inline]
    pub fn contains_part(&self, partname: &PackURI) -> bool {
        self.resolve(partname).is_some()
    }

    /// Insert or overwrite a part, returning the previous bytes.
    ///
    /// The name is stored exactly as given.
    pub fn insert_part(&mut self, partname: PackURI, blob: Vec<u8>) -> Option<Vec<u8>> {
        self.folded
            .entry(fold(&partname))
            .or_insert_with(|| partname.clone());
        self.parts.insert(partname, blob)
    }

    fn drop_part(&mut self, partname: &PackURI) {
        if self.parts.remove(partname).is_none() {
            return;
        }
        let key = fold(partname);
        if self.folded.get(&key) == Some(partname) {
            self.folded.remove(&key);
            // Another spelling of the same name may still be stored.
            if let Some(other) = self.parts.keys().find(|uri| uri.eq_ignore_case(&key)) {
                self.folded.insert(key, other.clone());
            }
        }
    }

    /// Iterate over all parts in part name order.
    pub fn iter_parts(&self) -> impl Iterator<Item = (&PackURI, &[u8])> {
        self.parts.iter().map(|(uri, blob)| (uri, blob.as_slice()))
    }

    /// Iterate over all part names in order.
    pub fn partnames(&self) -> impl Iterator<Item = &PackURI> {
        self.parts.keys()
    }

    /// Parts whose name starts with `prefix` (e.g. `/ppt/media/`).
    pub fn parts_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a PackURI, &'a [u8])> + 'a {
        self.parts
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(uri, _)| uri.as_str().starts_with(prefix))
            .map(|(uri, blob)| (uri, blob.as_slice()))
    }

    /// Parts whose declared content type equals `content_type`.
    pub fn parts_with_content_type<'a>(
        &'a self,
        content_type: &'a str,
    ) -> impl Iterator<Item = &'a PackURI> + 'a {
        self.parts
            .keys()
            .filter(move |uri| self.content_type_of(uri) == Some(content_type))
    }

    /// Parse the relationships owned by `source` (use `/` for the package).
    ///
    /// A part without a relationship document yields an empty collection.
    ///
    /// # Errors
    /// [`OpcError::MalformedRelationships`] when the document exists but does not
    /// parse. Callers may treat that as "no relationships".
    pub fn rels_for(&self, source: &PackURI) -> Result<Relationships> {
        let rels_uri = source.rels_uri().map_err(OpcError::InvalidPackUri)?;
        match self.part(&rels_uri) {
            Some(xml) => Relationships::from_xml(xml, source.base_uri(), rels_uri.as_str()),
            None => Ok(Relationships::new(source.base_uri().to_string())),
        }
    }

    /// Store `rels` as the relationship document of `source`.
    ///
    /// An empty collection removes the document instead of writing an empty one.
    pub fn set_rels(&mut self, source: &PackURI, rels: &Relationships) -> Result<()> {
        let rels_uri = source.rels_uri().map_err(OpcError::InvalidPackUri)?;
        let stored = self.resolve(&rels_uri).cloned().unwrap_or(rels_uri);
        if rels.is_empty() {
            self.drop_part(&stored);
        } else {
            self.insert_part(stored, rels.to_xml().into_bytes());
        }
        Ok(())
    }

    /// Package-level relationships (`/_rels/.rels`).
    pub fn package_rels(&self) -> Result<Relationships> {
        self.rels_for(&package_uri())
    }

    /// Partname of the main document, reached through the package-level
    /// `officeDocument` relationship.
    pub fn main_document_partname(&self) -> Result<PackURI> {
        let rels = self.package_rels()?;
        let rel = rels
            .first_of_type(relationship_type::OFFICE_DOCUMENT)
            .ok_or(OpcError::MissingMainDocument)?;
        let partname = rel.target_partname()?;
        if !self.contains_part(&partname) {
            return Err(OpcError::PartNotFound(partname.to_string()));
        }
        Ok(partname)
    }

    /// Classify a part.
    pub fn role_of(&self, partname: &PackURI) -> PartRole {
        if partname.is_rels_part() {
            return PartRole::Relationships;
        }

        let declared = self.content_type_of(partname).unwrap_or_default();
        if declared.starts_with("image/")
            || declared.starts_with("audio/")
            || declared.starts_with("video/")
        {
            return PartRole::Media;
        }
        if declared == ct::OFC_OLE_OBJECT
            || partname.base_uri().ends_with("/embeddings")
            || (!declared.is_empty() && !declared.ends_with("xml"))
        {
            return PartRole::Embedded;
        }
        if declared.is_empty() && !partname.ext().eq_ignore_ascii_case("xml") {
            return PartRole::Media;
        }

        PartRole::Content
    }

    /// Check the package for dangling internal relationships and undeclared
    /// content types.
    ///
    /// An empty result means every internal relationship target exists and every
    /// part has a content type.
    pub fn check_integrity(&self) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();

        for (uri, xml) in &self.parts {
            if self.content_type_of(uri).is_none() {
                issues.push(IntegrityIssue::MissingContentType {
                    partname: uri.to_string(),
                });
            }

            let Some(source) = uri.rels_source() else {
                continue;
            };
            let rels = match Relationships::from_xml(xml, source.base_uri(), uri.as_str()) {
                Ok(rels) => rels,
                Err(e) => {
                    issues.push(IntegrityIssue::MalformedRelationships {
                        partname: uri.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                },
            };

            for rel in rels.iter().filter(|rel| !rel.is_external()) {
                let present = rel
                    .target_partname()
                    .map(|target| self.contains_part(&target))
                    .unwrap_or(false);
                if !present {
                    issues.push(IntegrityIssue::DanglingRelationship {
                        source_part: source.to_string(),
                        r_id: rel.r_id().to_string(),
                        target: rel.target_ref().to_string(),
                    });
                }
            }
        }

        issues
    }
}

fn fold(partname: &PackURI) -> String {
    partname.as_str().to_ascii_lowercase()
}

/// Root part name of a package: `/`.
#[inline]
pub fn package_uri() -> PackURI {
    PackURI::from_membername(PACKAGE_URI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::phys_pkg::PhysPkgWriter;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/></Types>"#;

    const PKG_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="ppt/presentation.xml"/></Relationships>"#;

    const PRES_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/gone.png"/></Relationships>"#;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = PhysPkgWriter::new();
        for (name, blob) in entries {
            writer.write(&PackURI::new(*name).unwrap(), blob).unwrap();
        }
        writer.finish().unwrap()
    }

    fn sample() -> Vec<u8> {
        zip_of(&[
            ("/[Content_Types].xml", CONTENT_TYPES.as_bytes()),
            ("/_rels/.rels", PKG_RELS.as_bytes()),
            ("/ppt/presentation.xml", b"<p:presentation/>"),
            ("/ppt/_rels/presentation.xml.rels", PRES_RELS.as_bytes()),
            ("/ppt/media/image1.png", b"\x89PNG"),
        ])
    }

    #[test]
    fn test_load_and_lookup() {
        let pkg = Package::from_bytes(&sample()).unwrap();

        assert_eq!(pkg.len(), 4);
        assert!(!pkg.contains_part(&PackURI::new(CONTENT_TYPES_URI).unwrap()));
        assert_eq!(
            pkg.main_document_partname().unwrap().as_str(),
            "/ppt/presentation.xml"
        );

        let image = PackURI::new("/ppt/media/image1.png").unwrap();
        assert_eq!(pkg.content_type_of(&image), Some(ct::PNG));
        assert_eq!(pkg.role_of(&image), PartRole::Media);
        assert_eq!(pkg.blob(&image).unwrap(), b"\x89PNG");

        let media: Vec<_> = pkg.parts_under("/ppt/media/").map(|(uri, _)| uri.as_str()).collect();
        assert_eq!(media, ["/ppt/media/image1.png"]);

        let mains: Vec<_> = pkg.parts_with_content_type(ct::PML_PRESENTATION_MAIN).collect();
        assert_eq!(mains.len(), 1);
    }

    #[test]
    fn test_missing_manifest_is_corrupt() {
        let data = zip_of(&[("/_rels/.rels", PKG_RELS.as_bytes())]);
        let err = Package::from_bytes(&data).unwrap_err();
        assert!(matches!(err, OpcError::CorruptContainer(_)));
    }

    #[test]
    fn test_rels_for_absent_and_malformed() {
        let mut pkg = Package::from_bytes(&sample()).unwrap();

        let image = PackURI::new("/ppt/media/image1.png").unwrap();
        let rels = pkg.rels_for(&image).unwrap();
        assert!(rels.is_empty());
        assert_eq!(rels.base_uri(), "/ppt/media");

        pkg.insert_part(
            PackURI::new("/ppt/media/_rels/image1.png.rels").unwrap(),
            b"<Relationships><oops".to_vec(),
        );
        let err = pkg.rels_for(&image).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_set_rels_round_trip() {
        let mut pkg = Package::from_bytes(&sample()).unwrap();
        let pres = PackURI::new("/ppt/presentation.xml").unwrap();

        let mut rels = pkg.rels_for(&pres).unwrap();
        rels.remove("rId2");
        pkg.set_rels(&pres, &rels).unwrap();

        let reread = pkg.rels_for(&pres).unwrap();
        assert_eq!(reread.len(), 1);
        assert!(reread.get("rId1").is_some());
    }

    #[test]
    fn test_lookup_ignores_ascii_case() {
        let mut pkg = Package::from_bytes(&sample()).unwrap();

        let shouted = PackURI::new("/PPT/Media/IMAGE1.PNG").unwrap();
        assert!(pkg.contains_part(&shouted));
        assert_eq!(pkg.resolve(&shouted).unwrap().as_str(), "/ppt/media/image1.png");
        assert_eq!(pkg.part(&shouted), Some(&b"\x89PNG"[..]));

        // Relationship documents are found the same way.
        let pres = PackURI::new("/PPT/Presentation.xml").unwrap();
        assert_eq!(pkg.rels_for(&pres).unwrap().len(), 2);

        // Rewriting them keeps the stored spelling.
        let mut rels = pkg.rels_for(&pres).unwrap();
        rels.remove("rId2");
        pkg.set_rels(&pres, &rels).unwrap();
        assert_eq!(pkg.len(), 4);
        assert!(pkg
            .partnames()
            .any(|uri| uri.as_str() == "/ppt/_rels/presentation.xml.rels"));

        rels.remove("rId1");
        pkg.set_rels(&pres, &rels).unwrap();
        assert_eq!(pkg.len(), 3);
        assert!(!pkg.contains_part(&PackURI::new("/ppt/_rels/presentation.xml.rels").unwrap()));
    }

    #[test]
    fn test_check_integrity() {
        let pkg = Package::from_bytes(&sample()).unwrap();
        let issues = pkg.check_integrity();
        assert_eq!(
            issues,
            vec![IntegrityIssue::DanglingRelationship {
                source_part: "/ppt/presentation.xml".to_string(),
                r_id: "rId2".to_string(),
                target: "media/gone.png".to_string(),
            }]
        );
    }

    #[test]
    fn test_check_integrity_missing_content_type() {
        let mut pkg = Package::from_bytes(&sample()).unwrap();
        pkg.insert_part(PackURI::new("/ppt/media/clip.mp4").unwrap(), vec![0; 4]);
        let issues = pkg.check_integrity();
        assert!(issues.contains(&IntegrityIssue::MissingContentType {
            partname: "/ppt/media/clip.mp4".to_string()
        }));
    }

    #[test]
    fn test_package_uri() {
        assert_eq!(package_uri().as_str(), "/");
        assert_eq!(package_uri().rels_uri().unwrap().as_str(), "/_rels/.rels");
    }
}
