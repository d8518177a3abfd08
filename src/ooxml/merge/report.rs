//! Outcome of a merge: the units that were added and every recoverable problem
//! met along the way.

use crate::ooxml::opc::content_types::{ContentTypeConflict, DeclarationKind};
use crate::ooxml::opc::error::{OpcError, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// A recoverable problem recorded during a merge.
///
/// None of these stop the merge; the caller decides whether any of them should.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeWarning {
    /// A unit list entry whose relationship id does not resolve to a part.
    #[error("unit {unit_id} ({r_id}) does not resolve to a part; skipped")]
    DanglingUnitReference { unit_id: u32, r_id: String },

    /// A relationship document that does not parse; treated as empty.
    #[error("relationships of {partname} are malformed ({reason}); treated as empty")]
    MalformedRelationships { partname: String, reason: String },

    /// A relationship whose target is absent from the source; the relationship is dropped.
    #[error("{source_part} {r_id} targets missing part {target}; relationship dropped")]
    MissingSourcePart {
        source_part: String,
        r_id: String,
        target: String,
    },

    /// Source and target declare different MIME types for the same key; the target wins.
    #[error("{key} declared as {rejected} in source but {kept} in target; kept target")]
    ContentTypeConflict {
        declaration: DeclarationKind,
        key: String,
        kept: String,
        rejected: String,
    },

    /// A copied part the source manifest declares nothing for.
    #[error("{partname} has no declared content type; using {assigned}")]
    MissingContentType { partname: String, assigned: String },

    /// No target layout with the source layout's name.
    #[error("{unit_part}: no layout named {layout_name:?} in target; bound to {chosen}")]
    LayoutFallback {
        unit_part: String,
        layout_name: Option<String>,
        chosen: String,
    },

    /// A shared structural part (master, theme...) missing from the target.
    #[error("{source_part} {r_id}: shared part {target} not present in target; relationship dropped")]
    UnresolvedSharedPart {
        source_part: String,
        r_id: String,
        target: String,
    },

    /// The dependency chain below a unit is deeper than allowed.
    #[error("{partname} is {depth} composite levels below its unit; not copied")]
    RecursionLimit { partname: String, depth: usize },
}

impl From<ContentTypeConflict> for MergeWarning {
    fn from(conflict: ContentTypeConflict) -> Self {
        MergeWarning::ContentTypeConflict {
            declaration: conflict.kind,
            key: conflict.key,
            kept: conflict.kept,
            rejected: conflict.rejected,
        }
    }
}

/// A unit appended to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedUnit {
    /// Unit id in the source package
    pub source_id: u32,
    /// Unit id assigned in the target
    pub unit_id: u32,
    /// Relationship id of the new unit list entry
    pub r_id: String,
    /// Where the unit part now lives
    pub partname: String,
}

/// Everything a merge did that a caller may want to inspect.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub added_units: Vec<AddedUnit>,
    pub warnings: Vec<MergeWarning>,
    /// Part names written into the target, relationship documents excluded
    pub copied_parts: Vec<String>,
    /// Media relationships satisfied by a part already in the target
    pub reused_media: usize,
}

impl MergeReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it.
    pub fn warn(&mut self, warning: MergeWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    #[inline]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Fold a later report into this one.
    pub fn absorb(&mut self, other: MergeReport) {
        self.added_units.extend(other.added_units);
        self.warnings.extend(other.warnings);
        self.copied_parts.extend(other.copied_parts);
        self.reused_media += other.reused_media;
    }

    /// Render the report as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).map_err(|e| OpcError::ReportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display() {
        let warning = MergeWarning::DanglingUnitReference {
            unit_id: 258,
            r_id: "rId9".to_string(),
        };
        assert_eq!(
            warning.to_string(),
            "unit 258 (rId9) does not resolve to a part; skipped"
        );

        let deep = MergeWarning::RecursionLimit {
            partname: "/ppt/charts/chart9.xml".to_string(),
            depth: 9,
        };
        assert_eq!(
            deep.to_string(),
            "/ppt/charts/chart9.xml is 9 composite levels below its unit; not copied"
        );
    }

    #[test]
    fn test_conflict_conversion() {
        let warning: MergeWarning = ContentTypeConflict {
            kind: DeclarationKind::Default,
            key: "jpeg".to_string(),
            kept: "image/jpeg".to_string(),
            rejected: "image/jpg".to_string(),
        }
        .into();
        assert!(matches!(
            warning,
            MergeWarning::ContentTypeConflict { declaration: DeclarationKind::Default, .. }
        ));
    }

    #[test]
    fn test_absorb_and_yaml() {
        let mut first = MergeReport::new();
        first.added_units.push(AddedUnit {
            source_id: 256,
            unit_id: 258,
            r_id: "rId6".to_string(),
            partname: "/ppt/slides/slide3.xml".to_string(),
        });

        let mut second = MergeReport::new();
        second.warn(MergeWarning::RecursionLimit {
            partname: "/ppt/charts/chart9.xml".to_string(),
            depth: 9,
        });
        second.reused_media = 2;

        first.absorb(second);
        assert!(first.has_warnings());
        assert_eq!(first.reused_media, 2);

        let yaml = first.to_yaml().unwrap();
        assert!(yaml.contains("added_units"));
        assert!(yaml.contains("/ppt/slides/slide3.xml"));
        assert!(yaml.contains("recursion_limit"));
    }
}
