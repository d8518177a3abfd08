//! Collision-free identifiers for parts added to a target package.
//!
//! The allocator is seeded once from the whole target package and then hands out
//! unit ids, relationship ids and part names that nothing in the package uses.
//! Every value it returns is retired for the allocator's lifetime, whether or not
//! the caller ends up writing it.

use crate::ooxml::merge::units::UnitSchema;
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::package::Package;
use crate::ooxml::opc::packuri::PackURI;
use crate::ooxml::opc::rel::parse_r_id;
use memchr::memmem;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Extensions written under the `image` stem; everything else is `media`.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "emf", "wmf", "svg", "wdp",
];

/// Monotonic identifier source scoped to one target package.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    schema: UnitSchema,
    /// Next unit id to hand out
    next_unit: u64,
    /// Next `rId` number to hand out
    next_rel: u32,
    /// Lowercased part names in use or handed out
    taken: HashSet<String>,
    /// Highest index seen per (lowercased directory, lowercased stem)
    counters: HashMap<(String, String), u32>,
}

impl IdAllocator {
    /// Seed from every part of `target`.
    ///
    /// The unit watermark is the largest unit id found in any XML part, the
    /// relationship watermark the largest `rId<n>` in any relationship document.
    pub fn seed(target: &Package, schema: &UnitSchema) -> Self {
        let entry_finder = memmem::Finder::new(schema.entry_element.as_bytes());
        let mut max_unit: Option<u32> = None;
        let mut max_rel = 0u32;
        let mut taken = HashSet::with_capacity(target.len());
        let mut counters: HashMap<(String, String), u32> = HashMap::new();

        for (partname, blob) in target.iter_parts() {
            taken.insert(partname.as_str().to_ascii_lowercase());
            if let Some(idx) = partname.idx() {
                let key = counter_key(partname.base_uri(), partname.stem());
                let counter = counters.entry(key).or_insert(0);
                *counter = (*counter).max(idx);
            }

            if partname.is_rels_part() {
                if let Some(n) = max_rel_id_in(blob) {
                    max_rel = max_rel.max(n);
                }
            } else if partname.ext().eq_ignore_ascii_case("xml")
                && entry_finder.find(blob).is_some()
            {
                if let Some(id) = max_unit_id_in(blob, schema) {
                    max_unit = Some(max_unit.map_or(id, |m| m.max(id)));
                }
            }
        }

        let next_unit = match max_unit {
            Some(id) => (id as u64 + 1).max(schema.min_id as u64),
            None => schema.min_id as u64,
        };
        debug!(next_unit, next_rel = max_rel as u64 + 1, "identifier allocator seeded");

        Self {
            schema: *schema,
            next_unit,
            next_rel: max_rel.saturating_add(1),
            taken,
            counters,
        }
    }

    /// Next unused unit id.
    ///
    /// # Errors
    /// [`OpcError::IdentifierExhaustion`] past the schema's largest id.
    pub fn next_unit_id(&mut self) -> Result<u32> {
        if self.next_unit > self.schema.max_id as u64 {
            return Err(OpcError::IdentifierExhaustion("unit id"));
        }
        let id = self.next_unit as u32;
        self.next_unit += 1;
        Ok(id)
    }

    /// Next unused relationship id, as `rId<n>`.
    ///
    /// Unique across every relationship document of the target, which makes it
    /// safe to use in any one of them.
    pub fn next_relationship_id(&mut self) -> Result<String> {
        if self.next_rel == u32::MAX {
            return Err(OpcError::IdentifierExhaustion("relationship id"));
        }
        let n = self.next_rel;
        self.next_rel += 1;
        Ok(format!("rId{}", n))
    }

    /// Next free part name `<dir>/<stem><n>.<ext>`.
    ///
    /// `n` continues from the highest index already used with this directory and
    /// stem; names are compared ignoring ASCII case.
    pub fn next_partname(&mut self, dir: &str, stem: &str, ext: &str) -> Result<PackURI> {
        let dir = dir.trim_end_matches('/');
        let key = counter_key(dir, stem);
        let mut n = self.counters.get(&key).copied().unwrap_or(0);

        loop {
            n = n
                .checked_add(1)
                .ok_or(OpcError::IdentifierExhaustion("part name"))?;
            let candidate = if ext.is_empty() {
                format!("{}/{}{}", dir, stem, n)
            } else {
                format!("{}/{}{}.{}", dir, stem, n, ext)
            };
            if self.taken.insert(candidate.to_ascii_lowercase()) {
                self.counters.insert(key, n);
                return PackURI::new(candidate).map_err(OpcError::InvalidPackUri);
            }
        }
    }

    /// Next free name for a media part in the schema's media directory.
    pub fn next_media_name(&mut self, ext: &str) -> Result<PackURI> {
        let ext = ext.to_ascii_lowercase();
        let stem = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            "image"
        } else {
            "media"
        };
        let dir = self.schema.media_dir;
        self.next_partname(dir, stem, &ext)
    }

    /// Next free name for a chart part in the schema's chart directory.
    pub fn next_chart_name(&mut self) -> Result<PackURI> {
        let dir = self.schema.chart_dir;
        self.next_partname(dir, "chart", "xml")
    }

    /// Next free name for a unit part in the schema's unit directory.
    pub fn next_unit_partname(&mut self) -> Result<PackURI> {
        let (dir, stem) = (self.schema.part_dir, self.schema.part_stem);
        self.next_partname(dir, stem, "xml")
    }

    /// Whether a part name is in use or already handed out.
    pub fn is_taken(&self, partname: &PackURI) -> bool {
        self.taken
            .contains(&partname.as_str().to_ascii_lowercase())
    }
}

fn counter_key(dir: &str, stem: &str) -> (String, String) {
    (dir.to_ascii_lowercase(), stem.to_ascii_lowercase())
}

/// Largest `n` among `Id="rId<n>"` attributes of a relationship document.
///
/// Works on raw bytes so a malformed document still contributes its ids.
fn max_rel_id_in(blob: &[u8]) -> Option<u32> {
    let finder = memmem::Finder::new(b"Id=\"rId");
    let mut max = None;
    let mut pos = 0;
    while let Some(found) = finder.find(&blob[pos..]) {
        let digits_at = pos + found + b"Id=\"".len();
        let end = blob[digits_at..]
            .iter()
            .position(|&b| b == b'"')
            .map(|p| digits_at + p)
            .unwrap_or(blob.len());
        if let Some(n) = std::str::from_utf8(&blob[digits_at..end])
            .ok()
            .and_then(parse_r_id)
        {
            max = Some(max.map_or(n, |m: u32| m.max(n)));
        }
        pos = digits_at;
    }
    max
}

/// Largest unit id among entry elements anywhere in the document.
fn max_unit_id_in(blob: &[u8], schema: &UnitSchema) -> Option<u32> {
    let mut reader = Reader::from_reader(blob);
    let mut max = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == schema.entry_element.as_bytes() =>
            {
                let id = e
                    .attributes()
                    .flatten()
                    .find(|attr| attr.key.as_ref() == b"id")
                    .and_then(|attr| atoi_simd::parse::<u32, false, false>(&attr.value).ok());
                if let Some(id) = id {
                    max = Some(max.map_or(id, |m: u32| m.max(id)));
                }
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {},
        }
    }

    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::constants::content_type as ct;
    use proptest::prelude::*;

    const SCHEMA: UnitSchema = UnitSchema::PRESENTATION;

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    fn target() -> Package {
        let mut pkg = Package::new();
        pkg.content_types_mut().add_default("xml", ct::XML);
        pkg.insert_part(
            uri("/ppt/presentation.xml"),
            br#"<p:presentation xmlns:p="p"><p:sldIdLst><p:sldId id="256" r:id="rId2"/><p:sldId id="257" r:id="rId3"/></p:sldIdLst></p:presentation>"#.to_vec(),
        );
        pkg.insert_part(
            uri("/ppt/_rels/presentation.xml.rels"),
            br#"<Relationships><Relationship Id="rId5" Type="t" Target="slides/slide1.xml"/><Relationship Id="rId2" Type="t" Target="slides/slide2.xml"/></Relationships>"#.to_vec(),
        );
        pkg.insert_part(
            uri("/ppt/slides/_rels/slide1.xml.rels"),
            br#"<Relationships><Relationship Id="rId1" Type="t" Target="../media/image3.png"/></Relationships>"#.to_vec(),
        );
        pkg.insert_part(uri("/ppt/slides/slide1.xml"), b"<p:sld/>".to_vec());
        pkg.insert_part(uri("/ppt/slides/Slide2.xml"), b"<p:sld/>".to_vec());
        pkg.insert_part(uri("/ppt/media/image3.png"), vec![0]);
        pkg
    }

    #[test]
    fn test_seeded_watermarks() {
        let mut alloc = IdAllocator::seed(&target(), &SCHEMA);
        assert_eq!(alloc.next_unit_id().unwrap(), 258);
        assert_eq!(alloc.next_unit_id().unwrap(), 259);
        assert_eq!(alloc.next_relationship_id().unwrap(), "rId6");
        assert_eq!(alloc.next_relationship_id().unwrap(), "rId7");
    }

    #[test]
    fn test_empty_package_starts_at_minimum() {
        let mut alloc = IdAllocator::seed(&Package::new(), &SCHEMA);
        assert_eq!(alloc.next_unit_id().unwrap(), 256);
        assert_eq!(alloc.next_relationship_id().unwrap(), "rId1");
    }

    #[test]
    fn test_part_names_never_collide() {
        let mut alloc = IdAllocator::seed(&target(), &SCHEMA);
        assert_eq!(alloc.next_unit_partname().unwrap().as_str(), "/ppt/slides/slide3.xml");
        assert_eq!(alloc.next_unit_partname().unwrap().as_str(), "/ppt/slides/slide4.xml");
        assert_eq!(alloc.next_media_name("PNG").unwrap().as_str(), "/ppt/media/image4.png");
        assert_eq!(alloc.next_media_name("mp4").unwrap().as_str(), "/ppt/media/media1.mp4");
        assert_eq!(alloc.next_chart_name().unwrap().as_str(), "/ppt/charts/chart1.xml");
        assert!(alloc.is_taken(&uri("/ppt/slides/slide2.xml")));
    }

    #[test]
    fn test_unit_id_exhaustion() {
        let mut pkg = Package::new();
        pkg.insert_part(
            uri("/ppt/presentation.xml"),
            br#"<p:presentation><p:sldIdLst><p:sldId id="2147483646" r:id="rId2"/></p:sldIdLst></p:presentation>"#.to_vec(),
        );
        let mut alloc = IdAllocator::seed(&pkg, &SCHEMA);
        assert_eq!(alloc.next_unit_id().unwrap(), 2_147_483_647);
        assert!(matches!(
            alloc.next_unit_id(),
            Err(OpcError::IdentifierExhaustion(_))
        ));
    }

    #[test]
    fn test_malformed_rels_still_count() {
        assert_eq!(max_rel_id_in(br#"<Relationships><Relationship Id="rId12" Type="#), Some(12));
        assert_eq!(max_rel_id_in(b"<Relationships/>"), None);
    }

    proptest! {
        #[test]
        fn prop_ids_strictly_increase(ops in proptest::collection::vec(0u8..4, 1..64)) {
            let mut alloc = IdAllocator::seed(&target(), &SCHEMA);
            let mut units = Vec::new();
            let mut rels = Vec::new();
            let mut names = HashSet::new();

            for op in ops {
                match op {
                    0 => units.push(alloc.next_unit_id().unwrap()),
                    1 => rels.push(parse_r_id(&alloc.next_relationship_id().unwrap()).unwrap()),
                    2 => prop_assert!(names.insert(alloc.next_media_name("png").unwrap())),
                    _ => prop_assert!(names.insert(alloc.next_unit_partname().unwrap())),
                }
            }

            prop_assert!(units.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(rels.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(units.iter().all(|&id| id >= 258));
            prop_assert!(rels.iter().all(|&n| n >= 6));
        }
    }
}
