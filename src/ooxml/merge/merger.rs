//! The relationship-graph merge.
//!
//! Units listed by the source's main document are appended to the target. Each
//! unit part is copied byte for byte to a fresh name, then its relationships are
//! walked: media is copied once per merge (or reused), composite parts such as
//! charts, notes and embedded workbooks are copied recursively, shared structural
//! parts (layouts, masters, themes) are rebound to the target's own, and external
//! targets are kept as they are. Part contents are never rewritten, so the
//! relationship ids inside a copied part keep their values; only the targets of
//! its relationship document change.

use crate::ooxml::merge::alloc::IdAllocator;
use crate::ooxml::merge::dedup::MediaDedupTable;
use crate::ooxml::merge::options::MergeOptions;
use crate::ooxml::merge::report::{AddedUnit, MergeReport, MergeWarning};
use crate::ooxml::merge::units::{UnitReference, UnitSchema, append_units, read_unit_list};
use crate::ooxml::opc::constants::{content_type as ct, relationship_type};
use crate::ooxml::opc::content_types::DeclarationKind;
use crate::ooxml::opc::error::Result;
use crate::ooxml::opc::package::Package;
use crate::ooxml::opc::packuri::PackURI;
use crate::ooxml::opc::rel::{Relationship, Relationships};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use tracing::{debug, info};

/// How a relationship is followed when its source part is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelKind {
    /// Binary media, copied once and shared
    Media,
    /// Structural parts the target already has its own version of
    Shared,
    /// Another unit of the same list
    Unit,
    /// Anything else: copied with its own relationships
    Composite,
}

fn classify(reltype: &str, schema: &UnitSchema) -> RelKind {
    if reltype == schema.unit_reltype {
        return RelKind::Unit;
    }
    let suffix = reltype.rsplit('/').next().unwrap_or(reltype);
    match suffix {
        "image" | "audio" | "video" | "media" | "hdphoto" => RelKind::Media,
        "slideLayout" | "slideMaster" | "notesMaster" | "handoutMaster" | "theme" => {
            RelKind::Shared
        },
        _ => RelKind::Composite,
    }
}

/// Merges source packages into one target package.
///
/// The allocator lives as long as the merger, so a batch of sources merged
/// through one `Merger` never reuses an identifier.
///
/// # Example
///
/// ```no_run
/// use longan::ooxml::merge::{MergeOptions, Merger};
/// use longan::ooxml::opc::{Package, SaveOptions};
///
/// let source = Package::open("appendix.pptx")?;
/// let mut target = Package::open("deck.pptx")?;
///
/// let report = Merger::new(&mut target, MergeOptions::default())?.merge(&source)?;
/// for warning in &report.warnings {
///     eprintln!("{}", warning);
/// }
/// target.save("merged.pptx", &SaveOptions::default())?;
/// # Ok::<(), longan::ooxml::opc::OpcError>(())
/// ```
pub struct Merger<'t> {
    target: &'t mut Package,
    target_main: PackURI,
    allocator: IdAllocator,
    schema: UnitSchema,
    options: MergeOptions,
}

impl<'t> Merger<'t> {
    /// A merger for presentations.
    pub fn new(target: &'t mut Package, options: MergeOptions) -> Result<Self> {
        Self::with_schema(target, UnitSchema::PRESENTATION, options)
    }

    /// A merger for an arbitrary unit list.
    ///
    /// # Errors
    /// [`OpcError::MissingMainDocument`](crate::ooxml::opc::OpcError::MissingMainDocument)
    /// if the target has no main document.
    pub fn with_schema(
        target: &'t mut Package,
        schema: UnitSchema,
        options: MergeOptions,
    ) -> Result<Self> {
        let target_main = target.main_document_partname()?;
        let allocator = IdAllocator::seed(target, &schema);
        Ok(Self {
            target,
            target_main,
            allocator,
            schema,
            options,
        })
    }

    /// Merge one source into the target.
    ///
    /// The target is only changed if the merge succeeds; a fatal error leaves it
    /// as it was.
    pub fn merge(&mut self, source: &Package) -> Result<MergeReport> {
        let mut staged = self.target.clone();
        let dedup = MediaDedupTable::seeded_from(&staged, self.options.dedup_by_content);
        let layouts = target_layouts(&staged);
        let report = MergeRun {
            source,
            target: &mut staged,
            target_main: &self.target_main,
            allocator: &mut self.allocator,
            schema: &self.schema,
            options: &self.options,
            report: MergeReport::new(),
            dedup,
            part_map: HashMap::new(),
            copied: Vec::new(),
            layouts,
        }
        .run()?;
        *self.target = staged;
        Ok(report)
    }

    /// Merge several sources in order.
    pub fn merge_all<'s, I>(&mut self, sources: I) -> Result<MergeReport>
    where
        I: IntoIterator<Item = &'s Package>,
    {
        let mut report = MergeReport::new();
        for source in sources {
            report.absorb(self.merge(source)?);
        }
        Ok(report)
    }
}

/// Merge `source` into `target` in one call.
pub fn merge_packages(
    source: &Package,
    target: &mut Package,
    options: MergeOptions,
) -> Result<MergeReport> {
    Merger::new(target, options)?.merge(source)
}

/// A unit whose identifiers and destination are fixed before anything is copied.
#[derive(Debug)]
struct PlannedUnit {
    source_id: u32,
    source_part: PackURI,
    unit_id: u32,
    r_id: String,
    partname: PackURI,
}

/// State of one source merged into one target.
struct MergeRun<'a> {
    source: &'a Package,
    target: &'a mut Package,
    target_main: &'a PackURI,
    allocator: &'a mut IdAllocator,
    schema: &'a UnitSchema,
    options: &'a MergeOptions,
    report: MergeReport,
    dedup: MediaDedupTable,
    /// Source partname to target partname, for units and composite parts
    part_map: HashMap<PackURI, PackURI>,
    /// Every part written to the target, as (source, target)
    copied: Vec<(PackURI, PackURI)>,
    /// Target layouts in index order, with their names
    layouts: Vec<(PackURI, Option<String>)>,
}

impl MergeRun<'_> {
    fn run(mut self) -> Result<MergeReport> {
        let source_main = self.source.main_document_partname()?;
        let source_main_rels = self.rels_or_empty(&source_main)?;
        let units = read_unit_list(
            self.source.blob(&source_main)?,
            source_main.as_str(),
            self.schema,
        )?;

        let planned = self.plan(&units, &source_main_rels)?;
        for unit in &planned {
            self.copy_part(&unit.source_part, &unit.partname, 0)?;
            info!(
                source_id = unit.source_id,
                unit_id = unit.unit_id,
                partname = %unit.partname,
                "unit merged"
            );
        }

        self.register_units(&planned)?;
        self.merge_content_types();

        self.report.added_units = planned
            .into_iter()
            .map(|unit| AddedUnit {
                source_id: unit.source_id,
                unit_id: unit.unit_id,
                r_id: unit.r_id,
                partname: unit.partname.to_string(),
            })
            .collect();

        info!(
            units = self.report.added_units.len(),
            parts = self.report.copied_parts.len(),
            reused_media = self.report.reused_media,
            warnings = self.report.warnings.len(),
            "merge finished"
        );
        Ok(self.report)
    }

    /// Resolve every unit and fix its identifiers and destination.
    fn plan(
        &mut self,
        units: &[UnitReference],
        source_main_rels: &Relationships,
    ) -> Result<Vec<PlannedUnit>> {
        let mut planned = Vec::with_capacity(units.len());

        for unit in units {
            let resolved = source_main_rels
                .get(&unit.r_id)
                .filter(|rel| !rel.is_external())
                .and_then(|rel| rel.target_partname().ok())
                .and_then(|partname| self.source.resolve(&partname).cloned());
            let Some(source_part) = resolved else {
                self.report.warn(MergeWarning::DanglingUnitReference {
                    unit_id: unit.id,
                    r_id: unit.r_id.clone(),
                });
                continue;
            };

            let unit_id = self.allocator.next_unit_id()?;
            let r_id = self.allocator.next_relationship_id()?;
            let partname = self.allocator.next_unit_partname()?;
            self.part_map.insert(source_part.clone(), partname.clone());

            planned.push(PlannedUnit {
                source_id: unit.id,
                source_part,
                unit_id,
                r_id,
                partname,
            });
        }

        Ok(planned)
    }

    /// Source relationships of `partname`; a malformed document counts as empty.
    fn rels_or_empty(&mut self, partname: &PackURI) -> Result<Relationships> {
        match self.source.rels_for(partname) {
            Ok(rels) => Ok(rels),
            Err(e) if e.is_recoverable() => {
                self.report.warn(MergeWarning::MalformedRelationships {
                    partname: partname.to_string(),
                    reason: e.to_string(),
                });
                Ok(Relationships::new(partname.base_uri().to_string()))
            },
            Err(e) => Err(e),
        }
    }

    /// Copy one part and rebuild its relationship document in the target.
    fn copy_part(&mut self, src: &PackURI, dst: &PackURI, depth: usize) -> Result<()> {
        let blob = self.source.blob(src)?;
        self.write_part(src, dst, blob.to_vec());

        let rels = self.rels_or_empty(src)?;
        if rels.is_empty() {
            return Ok(());
        }

        let mut new_rels = Relationships::new(dst.base_uri().to_string());
        for rel in rels.iter() {
            if rel.is_external() {
                new_rels.push(Relationship::new(
                    rel.r_id().to_string(),
                    rel.reltype().to_string(),
                    rel.target_ref().to_string(),
                    dst.base_uri().to_string(),
                    true,
                ));
                continue;
            }

            if let Some(new_target) = self.follow(src, rel, depth)? {
                new_rels.push(Relationship::new(
                    rel.r_id().to_string(),
                    rel.reltype().to_string(),
                    new_target.relative_ref(dst.base_uri()),
                    dst.base_uri().to_string(),
                    false,
                ));
            }
        }

        self.target.set_rels(dst, &new_rels)
    }

    /// Where an internal relationship of `src` points in the target, or `None`
    /// if it has to be dropped.
    fn follow(&mut self, src: &PackURI, rel: &Relationship, depth: usize) -> Result<Option<PackURI>> {
        let missing = |rel: &Relationship| MergeWarning::MissingSourcePart {
            source_part: src.to_string(),
            r_id: rel.r_id().to_string(),
            target: rel.target_ref().to_string(),
        };

        let Ok(target_src) = rel.target_partname() else {
            self.report.warn(missing(rel));
            return Ok(None);
        };
        // Part names compare case-insensitively; continue under the stored spelling.
        let target_src = self.source.resolve(&target_src).cloned().unwrap_or(target_src);

        match classify(rel.reltype(), self.schema) {
            RelKind::Shared => Ok(self.resolve_shared(src, rel, &target_src)),
            RelKind::Unit => match self.part_map.get(&target_src) {
                Some(mapped) => Ok(Some(mapped.clone())),
                None => {
                    self.report.warn(missing(rel));
                    Ok(None)
                },
            },
            RelKind::Media => {
                let Some(blob) = self.source.part(&target_src) else {
                    self.report.warn(missing(rel));
                    return Ok(None);
                };
                if let Some(existing) = self.dedup.lookup(&target_src, blob) {
                    self.report.reused_media += 1;
                    debug!(source = %target_src, target = %existing, "media reused");
                    return Ok(Some(existing.clone()));
                }
                let new_name = self.allocator.next_media_name(target_src.ext())?;
                self.dedup.register(target_src.clone(), blob, new_name.clone());
                self.write_part(&target_src, &new_name, blob.to_vec());
                Ok(Some(new_name))
            },
            RelKind::Composite => {
                if let Some(mapped) = self.part_map.get(&target_src) {
                    return Ok(Some(mapped.clone()));
                }
                if !self.source.contains_part(&target_src) {
                    self.report.warn(missing(rel));
                    return Ok(None);
                }
                if depth + 1 > self.options.max_depth {
                    self.report.warn(MergeWarning::RecursionLimit {
                        partname: target_src.to_string(),
                        depth: depth + 1,
                    });
                    return Ok(None);
                }

                let new_name = if rel.reltype() == relationship_type::CHART {
                    self.allocator.next_chart_name()?
                } else {
                    let stem = match target_src.stem() {
                        "" => "part",
                        stem => stem,
                    };
                    self.allocator
                        .next_partname(target_src.base_uri(), stem, target_src.ext())?
                };
                self.part_map.insert(target_src.clone(), new_name.clone());
                self.copy_part(&target_src, &new_name, depth + 1)?;
                Ok(Some(new_name))
            },
        }
    }

    /// Bind a shared structural relationship to the target's own part.
    fn resolve_shared(
        &mut self,
        src: &PackURI,
        rel: &Relationship,
        target_src: &PackURI,
    ) -> Option<PackURI> {
        let resolved = if rel.reltype() == relationship_type::SLIDE_LAYOUT {
            self.resolve_layout(src, target_src)
        } else {
            self.target.resolve(target_src).cloned()
        };

        if resolved.is_none() {
            self.report.warn(MergeWarning::UnresolvedSharedPart {
                source_part: src.to_string(),
                r_id: rel.r_id().to_string(),
                target: target_src.to_string(),
            });
        }
        resolved
    }

    /// Pick the target layout for a source layout: same name, then same path,
    /// then the first layout. `None` when the target has no layouts at all.
    fn resolve_layout(&mut self, src: &PackURI, source_layout: &PackURI) -> Option<PackURI> {
        let name = self.source.part(source_layout).and_then(layout_name);

        if self.options.match_layouts_by_name {
            if let Some(wanted) = name.as_deref() {
                let by_name = self
                    .layouts
                    .iter()
                    .find(|(_, candidate)| candidate.as_deref() == Some(wanted));
                if let Some((partname, _)) = by_name {
                    return Some(partname.clone());
                }
            }
        }

        let same_path = self
            .layouts
            .iter()
            .find(|(partname, _)| partname.eq_ignore_case(source_layout.as_str()));
        let (chosen, _) = same_path.or_else(|| self.layouts.first())?;
        let chosen = chosen.clone();

        if self.options.match_layouts_by_name || chosen != *source_layout {
            self.report.warn(MergeWarning::LayoutFallback {
                unit_part: src.to_string(),
                layout_name: name,
                chosen: chosen.to_string(),
            });
        }
        Some(chosen)
    }

    fn write_part(&mut self, src: &PackURI, dst: &PackURI, blob: Vec<u8>) {
        debug!(source = %src, target = %dst, bytes = blob.len(), "part copied");
        self.target.insert_part(dst.clone(), blob);
        self.report.copied_parts.push(dst.to_string());
        self.copied.push((src.clone(), dst.clone()));
    }

    /// Append the planned units to the target's unit list and main relationships.
    fn register_units(&mut self, planned: &[PlannedUnit]) -> Result<()> {
        if planned.is_empty() {
            return Ok(());
        }
        let main = self.target_main;

        let mut main_rels = self.target.rels_for(main)?;
        for unit in planned {
            main_rels.add_relationship(
                self.schema.unit_reltype.to_string(),
                unit.partname.relative_ref(main.base_uri()),
                unit.r_id.clone(),
                false,
            );
        }
        self.target.set_rels(main, &main_rels)?;

        let entries: Vec<UnitReference> = planned
            .iter()
            .map(|unit| UnitReference::new(unit.unit_id, unit.r_id.clone()))
            .collect();
        let edited = append_units(
            self.target.blob(main)?,
            main.as_str(),
            self.schema,
            &entries,
            self.options.keep_sections,
        )?;
        self.target.insert_part(main.clone(), edited);
        Ok(())
    }

    /// Union defaults and declare a content type for every copied part.
    fn merge_content_types(&mut self) {
        let source_types = self.source.content_types();
        let registry = self.target.content_types_mut();

        for conflict in registry.union_defaults(source_types) {
            self.report.warn(conflict.into());
        }
        if registry.default_for("rels").is_none() {
            registry.add_default("rels", ct::OPC_RELATIONSHIPS);
        }

        for (src, dst) in &self.copied {
            match source_types.lookup(src) {
                Some((DeclarationKind::Override, content_type)) => {
                    if let Some(conflict) = registry.add_override_checked(dst.as_str(), content_type) {
                        self.report.warn(conflict.into());
                    }
                },
                Some((DeclarationKind::Default, content_type)) => {
                    let covered = registry
                        .default_for(dst.ext())
                        .is_some_and(|declared| declared.eq_ignore_ascii_case(content_type));
                    if !covered {
                        registry.add_override(dst.as_str(), content_type);
                    }
                },
                None => {
                    let assigned = match registry.default_for(dst.ext()) {
                        Some(declared) => declared.to_string(),
                        None => {
                            let fallback =
                                ct::for_extension(dst.ext()).unwrap_or(ct::OCTET_STREAM);
                            registry.add_override(dst.as_str(), fallback);
                            fallback.to_string()
                        },
                    };
                    self.report.warn(MergeWarning::MissingContentType {
                        partname: dst.to_string(),
                        assigned,
                    });
                },
            }
        }
    }
}

/// Slide layouts of the target, ordered by their index, with their names.
fn target_layouts(target: &Package) -> Vec<(PackURI, Option<String>)> {
    let mut layouts: Vec<(PackURI, Option<String>)> = target
        .parts_with_content_type(ct::PML_SLIDE_LAYOUT)
        .map(|partname| {
            let name = target.part(partname).and_then(layout_name);
            (partname.clone(), name)
        })
        .collect();
    layouts.sort_by_key(|(partname, _)| (partname.idx().unwrap_or(u32::MAX), partname.clone()));
    layouts
}

/// The `name` of a layout's `cSld` element.
fn layout_name(xml: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"cSld" =>
            {
                return e
                    .attributes()
                    .flatten()
                    .find(|attr| attr.key.as_ref() == b"name")
                    .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));
            },
            Ok(Event::Eof) | Err(_) => return None,
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let schema = UnitSchema::PRESENTATION;
        assert_eq!(classify(relationship_type::IMAGE, &schema), RelKind::Media);
        assert_eq!(classify(relationship_type::MEDIA, &schema), RelKind::Media);
        assert_eq!(classify(relationship_type::SLIDE_LAYOUT, &schema), RelKind::Shared);
        assert_eq!(classify(relationship_type::THEME, &schema), RelKind::Shared);
        assert_eq!(classify(relationship_type::SLIDE, &schema), RelKind::Unit);
        assert_eq!(classify(relationship_type::CHART, &schema), RelKind::Composite);
        assert_eq!(classify(relationship_type::NOTES_SLIDE, &schema), RelKind::Composite);
        assert_eq!(classify(relationship_type::PACKAGE, &schema), RelKind::Composite);
    }

    #[test]
    fn test_layout_name() {
        let xml = br#"<p:sldLayout xmlns:p="p" type="title"><p:cSld name="Title Slide"><p:spTree/></p:cSld></p:sldLayout>"#;
        assert_eq!(layout_name(xml).as_deref(), Some("Title Slide"));
        assert_eq!(layout_name(b"<p:sldLayout><p:cSld/></p:sldLayout>"), None);
    }
}
