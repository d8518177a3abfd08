//! The ordered unit list of a main document.
//!
//! A presentation lists its slides in `p:sldIdLst`, one `p:sldId id=".." r:id=".."`
//! per slide. Reading that list needs namespace resolution because the
//! relationship prefix is whatever the producer declared. Editing it is done by
//! splicing new markup into the original bytes at offsets reported by the reader,
//! so everything else in the document survives untouched.

use crate::ooxml::opc::constants::{namespace as ns, relationship_type};
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::namespace::{NamespaceMap, qualified_name};
use crate::ooxml::opc::rel::escape_xml;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

/// Describes where a document keeps its unit list and how units are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSchema {
    /// Local name of the list element, a child of the root
    pub list_element: &'static str,
    /// Local name of one entry
    pub entry_element: &'static str,
    /// Namespace of the list and its entries
    pub list_namespace: &'static str,
    /// Relationship type from the main document to a unit part
    pub unit_reltype: &'static str,
    /// Directory new unit parts are written to
    pub part_dir: &'static str,
    /// File name stem of unit parts (`slide` for `slide12.xml`)
    pub part_stem: &'static str,
    /// Directory for copied media
    pub media_dir: &'static str,
    /// Directory for copied charts
    pub chart_dir: &'static str,
    /// Smallest legal unit id
    pub min_id: u32,
    /// Largest legal unit id
    pub max_id: u32,
    /// Root children that must come after the list, in document order
    pub followers: &'static [&'static str],
    /// Local name of the section list, if the format has one
    pub section_list: Option<&'static str>,
}

impl UnitSchema {
    /// PresentationML slides.
    pub const PRESENTATION: UnitSchema = UnitSchema {
        list_element: "sldIdLst",
        entry_element: "sldId",
        list_namespace: ns::PML_MAIN,
        unit_reltype: relationship_type::SLIDE,
        part_dir: "/ppt/slides",
        part_stem: "slide",
        media_dir: "/ppt/media",
        chart_dir: "/ppt/charts",
        min_id: 256,
        max_id: 2_147_483_647,
        followers: &[
            "sldSz",
            "notesSz",
            "smartTags",
            "embeddedFontLst",
            "custShowLst",
            "photoAlbum",
            "custDataLst",
            "kinsoku",
            "defaultTextStyle",
            "modifyVerifier",
            "extLst",
        ],
        section_list: Some("sectionLst"),
    };
}

/// One entry of a unit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReference {
    /// Package-unique unit id
    pub id: u32,
    /// Relationship id from the main document to the unit part
    pub r_id: String,
}

impl UnitReference {
    pub fn new(id: u32, r_id: impl Into<String>) -> Self {
        Self {
            id,
            r_id: r_id.into(),
        }
    }
}

/// Read the unit list of a main document, in document order.
///
/// Only the list directly under the root counts; section lists elsewhere in
/// the document repeat the same ids and are ignored. A document without a list
/// has no units. Entries with a non-numeric id are skipped.
pub fn read_unit_list(xml: &[u8], partname: &str, schema: &UnitSchema) -> Result<Vec<UnitReference>> {
    let malformed = |reason: String| OpcError::MalformedXml {
        partname: partname.to_string(),
        reason,
    };

    let mut reader = Reader::from_reader(xml);
    let mut ns_map = NamespaceMap::default();
    let mut depth = 0usize;
    let mut in_list = false;
    let mut units = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if depth == 0 {
                    ns_map = NamespaceMap::from_element(e)?;
                } else if depth == 1 && e.local_name().as_ref() == schema.list_element.as_bytes() {
                    in_list = true;
                } else if in_list && depth == 2 {
                    push_entry(e, &ns_map, schema, &mut units)?;
                }
                depth += 1;
            },
            Ok(Event::Empty(ref e)) => {
                if in_list && depth == 2 {
                    push_entry(e, &ns_map, schema, &mut units)?;
                }
            },
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 1 && in_list {
                    in_list = false;
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e.to_string())),
            _ => {},
        }
    }

    Ok(units)
}

fn push_entry(
    e: &BytesStart<'_>,
    ns_map: &NamespaceMap,
    schema: &UnitSchema,
    units: &mut Vec<UnitReference>,
) -> Result<()> {
    if e.local_name().as_ref() != schema.entry_element.as_bytes() {
        return Ok(());
    }

    let mut id = None;
    let mut bound_r_id = None;
    let mut any_r_id = None;

    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() != b"id" {
            continue;
        }
        match attr.key.prefix() {
            None => id = Some(attr.unescape_value()?.into_owned()),
            Some(prefix) => {
                let prefix = std::str::from_utf8(prefix.as_ref()).unwrap_or_default();
                let value = attr.unescape_value()?.into_owned();
                if ns_map.uri_for(Some(prefix)) == Some(ns::OFC_RELATIONSHIPS) {
                    bound_r_id = Some(value);
                } else if any_r_id.is_none() {
                    any_r_id = Some(value);
                }
            },
        }
    }

    let Some(id) = id else {
        warn!("{} entry without id skipped", schema.entry_element);
        return Ok(());
    };
    match atoi_simd::parse::<u32, false, false>(id.as_bytes()) {
        Ok(id) => units.push(UnitReference {
            id,
            r_id: bound_r_id.or(any_r_id).unwrap_or_default(),
        }),
        Err(_) => warn!("{} entry with non-numeric id {:?} skipped", schema.entry_element, id),
    }
    Ok(())
}

/// Byte span of one element or tag within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Where the unit list was found.
#[derive(Debug, Clone, Copy)]
enum ListSite {
    /// `<list>...</list>`: new entries go right before the end tag
    Open { close_at: usize },
    /// `<list/>`: replaced by an open list
    Empty(Span),
}

/// Where new ids go in the last section.
#[derive(Debug, Clone, Copy)]
enum SectionSite {
    /// The section has an open slide list: insert before its end tag
    ListOpen { close_at: usize },
    /// The section has `<sldIdLst/>`: replace it
    ListEmpty(Span),
    /// The section has no slide list: add one before the section end tag
    NoList { close_at: usize },
    /// `<section/>`: reopen it around a new list
    Empty(Span),
}

/// Everything [`append_units`] needs to know about a document.
#[derive(Debug, Default)]
struct DocumentScan {
    ns_map: NamespaceMap,
    root_close_at: Option<usize>,
    list: Option<ListSite>,
    first_follower: Option<usize>,
    section_prefix: Option<String>,
    last_section: Option<SectionSite>,
}

fn scan_document(xml: &[u8], partname: &str, schema: &UnitSchema) -> Result<DocumentScan> {
    let malformed = |reason: String| OpcError::MalformedXml {
        partname: partname.to_string(),
        reason,
    };

    let mut reader = Reader::from_reader(xml);
    let mut scan = DocumentScan::default();
    let mut depth = 0usize;
    let mut list_open = false;

    // Section tracking: depth of the section list element, and of the open section
    let mut section_lst_depth: Option<usize> = None;
    let mut section_depth: Option<usize> = None;
    let mut section_list_open = false;
    let mut current_section: Option<SectionSite> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| malformed(e.to_string()))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(ref e) => {
                let local = e.local_name();
                let local = local.as_ref();
                if depth == 0 {
                    scan.ns_map = NamespaceMap::from_element(e)?;
                } else if depth == 1 {
                    if local == schema.list_element.as_bytes() {
                        list_open = true;
                    } else if scan.first_follower.is_none() && is_follower(schema, local) {
                        scan.first_follower = Some(start);
                    }
                }

                if Some(local) == schema.section_list.map(str::as_bytes) {
                    section_lst_depth = Some(depth);
                    scan.section_prefix = element_prefix(e);
                } else if section_lst_depth.is_some_and(|d| depth == d + 1) && local == b"section" {
                    section_depth = Some(depth);
                    current_section = None;
                } else if section_depth.is_some_and(|d| depth == d + 1)
                    && local == schema.list_element.as_bytes()
                {
                    section_list_open = true;
                }
                depth += 1;
            },
            Event::Empty(ref e) => {
                let local = e.local_name();
                let local = local.as_ref();
                if depth == 0 {
                    return Err(malformed("root element is empty".to_string()));
                }
                if depth == 1 {
                    if local == schema.list_element.as_bytes() {
                        scan.list = Some(ListSite::Empty(Span { start, end }));
                    } else if scan.first_follower.is_none() && is_follower(schema, local) {
                        scan.first_follower = Some(start);
                    }
                }

                if section_lst_depth.is_some_and(|d| depth == d + 1) && local == b"section" {
                    scan.last_section = Some(SectionSite::Empty(Span { start, end }));
                } else if section_depth.is_some_and(|d| depth == d + 1)
                    && local == schema.list_element.as_bytes()
                {
                    current_section = Some(SectionSite::ListEmpty(Span { start, end }));
                }
            },
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    scan.root_close_at = Some(start);
                } else if depth == 1 && list_open {
                    list_open = false;
                    scan.list = Some(ListSite::Open { close_at: start });
                }

                if section_list_open && section_depth.is_some_and(|d| depth == d + 1) {
                    section_list_open = false;
                    current_section = Some(SectionSite::ListOpen { close_at: start });
                } else if section_depth == Some(depth) {
                    section_depth = None;
                    scan.last_section =
                        Some(current_section.take().unwrap_or(SectionSite::NoList { close_at: start }));
                } else if section_lst_depth == Some(depth) {
                    section_lst_depth = None;
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    Ok(scan)
}

fn is_follower(schema: &UnitSchema, local: &[u8]) -> bool {
    schema.followers.iter().any(|f| f.as_bytes() == local)
}

fn element_prefix(e: &BytesStart<'_>) -> Option<String> {
    e.name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
}

/// Append units to the unit list of a main document.
///
/// New entries use the prefixes the document already binds. If the relationships
/// namespace is not bound, each entry declares it. A missing list is created at its
/// schema position. With `into_last_section`, the new ids are also added to the
/// last section of the document's section list, when there is one.
pub fn append_units(
    xml: &[u8],
    partname: &str,
    schema: &UnitSchema,
    units: &[UnitReference],
    into_last_section: bool,
) -> Result<Vec<u8>> {
    if units.is_empty() {
        return Ok(xml.to_vec());
    }

    let scan = scan_document(xml, partname, schema)?;
    let root_close_at = scan.root_close_at.ok_or_else(|| OpcError::MalformedXml {
        partname: partname.to_string(),
        reason: "no root element".to_string(),
    })?;

    let list_name = scan.ns_map.qualify(schema.list_namespace, schema.list_element);
    let entries = render_entries(&scan.ns_map, schema, units);

    let mut edits: Vec<(Span, String)> = Vec::with_capacity(2);
    match scan.list {
        Some(ListSite::Open { close_at }) => {
            edits.push((Span { start: close_at, end: close_at }, entries));
        },
        Some(ListSite::Empty(span)) => {
            edits.push((span, format!("<{0}>{1}</{0}>", list_name, entries)));
        },
        None => {
            let at = scan.first_follower.unwrap_or(root_close_at);
            edits.push((Span { start: at, end: at }, format!("<{0}>{1}</{0}>", list_name, entries)));
        },
    }

    if into_last_section {
        if let Some(site) = scan.last_section {
            edits.push(section_edit(xml, &scan, schema, site, units));
        }
    }

    // Apply back to front so earlier offsets stay valid
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = xml.to_vec();
    for (span, text) in edits {
        out.splice(span.start..span.end, text.into_bytes());
    }
    Ok(out)
}

fn render_entries(ns_map: &NamespaceMap, schema: &UnitSchema, units: &[UnitReference]) -> String {
    let entry_name = ns_map.qualify(schema.list_namespace, schema.entry_element);

    let (r_prefix, declaration) = match ns_map.prefix_for(ns::OFC_RELATIONSHIPS) {
        Some(Some(prefix)) => (prefix.to_string(), String::new()),
        _ => {
            let prefix = free_prefix(ns_map, "r");
            let declaration = format!(r#" xmlns:{}="{}""#, prefix, ns::OFC_RELATIONSHIPS);
            (prefix, declaration)
        },
    };

    let mut out = String::with_capacity(units.len() * 48);
    for unit in units {
        out.push_str(&format!(
            r#"<{}{} id="{}" {}:id="{}"/>"#,
            entry_name,
            declaration,
            unit.id,
            r_prefix,
            escape_xml(&unit.r_id)
        ));
    }
    out
}

/// `base`, or `base` with the smallest numeric suffix that is not bound yet.
fn free_prefix(ns_map: &NamespaceMap, base: &str) -> String {
    if ns_map.uri_for(Some(base)).is_none() {
        return base.to_string();
    }
    (0u32..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| ns_map.uri_for(Some(candidate)).is_none())
        .unwrap_or_else(|| base.to_string())
}

fn section_edit(
    xml: &[u8],
    scan: &DocumentScan,
    schema: &UnitSchema,
    site: SectionSite,
    units: &[UnitReference],
) -> (Span, String) {
    let prefix = scan.section_prefix.as_deref();
    let entry_name = qualified_name(prefix, schema.entry_element);
    let list_name = qualified_name(prefix, schema.list_element);

    let mut ids = String::with_capacity(units.len() * 24);
    for unit in units {
        ids.push_str(&format!(r#"<{} id="{}"/>"#, entry_name, unit.id));
    }

    match site {
        SectionSite::ListOpen { close_at } => (Span { start: close_at, end: close_at }, ids),
        SectionSite::ListEmpty(span) => (span, format!("<{0}>{1}</{0}>", list_name, ids)),
        SectionSite::NoList { close_at } => (
            Span { start: close_at, end: close_at },
            format!("<{0}>{1}</{0}>", list_name, ids),
        ),
        SectionSite::Empty(span) => {
            // Reopen `<p14:section name=".." id=".."/>` as a start tag
            let tag = String::from_utf8_lossy(&xml[span.start..span.end]);
            let open = tag.trim_end().trim_end_matches("/>").trim_end();
            let section_name = qualified_name(prefix, "section");
            (
                span,
                format!("{}><{2}>{1}</{2}></{3}>", open, ids, list_name, section_name),
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: UnitSchema = UnitSchema::PRESENTATION;

    const PRESENTATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst><p:sldId id="256" r:id="rId2"/><p:sldId id="257" r:id="rId3"/></p:sldIdLst><p:sldSz cx="9144000" cy="6858000"/><p:notesSz cx="6858000" cy="9144000"/><p:extLst><p:ext uri="{521415D9-36F7-43E2-AB2F-B90AF26B5E84}"><p14:sectionLst xmlns:p14="http://schemas.microsoft.com/office/powerpoint/2010/main"><p14:section name="Intro" id="{A}"><p14:sldIdLst><p14:sldId id="256"/></p14:sldIdLst></p14:section><p14:section name="Body" id="{B}"><p14:sldIdLst><p14:sldId id="257"/></p14:sldIdLst></p14:section></p14:sectionLst></p:ext></p:extLst></p:presentation>"#;

    #[test]
    fn test_read_unit_list() {
        let units = read_unit_list(PRESENTATION.as_bytes(), "/ppt/presentation.xml", &SCHEMA).unwrap();
        assert_eq!(
            units,
            vec![UnitReference::new(256, "rId2"), UnitReference::new(257, "rId3")]
        );
    }

    #[test]
    fn test_read_unit_list_with_other_prefixes() {
        let xml = r#"<presentation xmlns="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:rel="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sldIdLst><sldId id="300" rel:id="rId7"/><sldId id="bogus" rel:id="rId8"/></sldIdLst></presentation>"#;
        let units = read_unit_list(xml.as_bytes(), "/ppt/presentation.xml", &SCHEMA).unwrap();
        assert_eq!(units, vec![UnitReference::new(300, "rId7")]);
    }

    #[test]
    fn test_append_into_existing_list_and_section() {
        let new = [UnitReference::new(258, "rId9"), UnitReference::new(259, "rId10")];
        let out = append_units(PRESENTATION.as_bytes(), "/ppt/presentation.xml", &SCHEMA, &new, true)
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(
            r#"<p:sldId id="257" r:id="rId3"/><p:sldId id="258" r:id="rId9"/><p:sldId id="259" r:id="rId10"/></p:sldIdLst>"#
        ));
        assert!(out.contains(
            r#"<p14:sldId id="257"/><p14:sldId id="258"/><p14:sldId id="259"/></p14:sldIdLst></p14:section></p14:sectionLst>"#
        ));
        // The first section is untouched
        assert!(out.contains(r#"<p14:sldIdLst><p14:sldId id="256"/></p14:sldIdLst>"#));

        let units = read_unit_list(out.as_bytes(), "/ppt/presentation.xml", &SCHEMA).unwrap();
        assert_eq!(units.len(), 4);
    }

    #[test]
    fn test_append_without_sections() {
        let new = [UnitReference::new(258, "rId9")];
        let out = append_units(PRESENTATION.as_bytes(), "/ppt/presentation.xml", &SCHEMA, &new, false)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains(r#"<p14:sldId id="258"/>"#));
        assert!(out.contains(r#"<p:sldId id="258" r:id="rId9"/>"#));
    }

    #[test]
    fn test_append_into_empty_list() {
        let xml = r#"<p:presentation xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst/><p:sldSz cx="1" cy="1"/></p:presentation>"#;
        let out = append_units(xml.as_bytes(), "/ppt/presentation.xml", &SCHEMA, &[UnitReference::new(256, "rId2")], true)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p:presentation xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst><p:sldId id="256" r:id="rId2"/></p:sldIdLst><p:sldSz cx="1" cy="1"/></p:presentation>"#
        );
    }

    #[test]
    fn test_create_missing_list_before_followers() {
        let xml = r#"<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldMasterIdLst/><p:notesSz cx="1" cy="1"/></p:presentation>"#;
        let out = append_units(xml.as_bytes(), "/ppt/presentation.xml", &SCHEMA, &[UnitReference::new(256, "rId2")], true)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            r#"<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldMasterIdLst/><p:sldIdLst><p:sldId xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" id="256" r:id="rId2"/></p:sldIdLst><p:notesSz cx="1" cy="1"/></p:presentation>"#
        );
        assert_eq!(
            read_unit_list(out.as_bytes(), "/ppt/presentation.xml", &SCHEMA).unwrap(),
            vec![UnitReference::new(256, "rId2")]
        );
    }

    #[test]
    fn test_empty_section_is_reopened() {
        let xml = r#"<p:presentation xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst/><p:extLst><p:ext uri="x"><p14:sectionLst xmlns:p14="http://schemas.microsoft.com/office/powerpoint/2010/main"><p14:section name="Only" id="{A}"/></p14:sectionLst></p:ext></p:extLst></p:presentation>"#;
        let out = append_units(xml.as_bytes(), "/ppt/presentation.xml", &SCHEMA, &[UnitReference::new(256, "rId2")], true)
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(
            r#"<p14:section name="Only" id="{A}"><p14:sldIdLst><p14:sldId id="256"/></p14:sldIdLst></p14:section></p14:sectionLst>"#
        ));
    }

    #[test]
    fn test_malformed_document() {
        let err = append_units(b"<p:presentation><p:sldIdLst>", "/ppt/presentation.xml", &SCHEMA, &[UnitReference::new(256, "rId2")], false)
            .unwrap_err();
        assert!(matches!(err, OpcError::MalformedXml { .. }));
    }
}
