//! Configuration types for merging packages.
use serde::{Deserialize, Serialize};

/// Configuration options for merging packages.
///
/// # Examples
///
/// ```rust
/// use longan::ooxml::merge::MergeOptions;
///
/// // Create with defaults
/// let options = MergeOptions::default();
///
/// // Or customize
/// let options = MergeOptions::new()
///     .with_content_dedup(false)
///     .with_max_depth(4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Reuse media whose bytes match a part already in the target or already copied,
    /// not only media copied from the same source part
    pub dedup_by_content: bool,
    /// Rebind slide layouts to the target layout with the same name before
    /// falling back to the same path or the first layout
    pub match_layouts_by_name: bool,
    /// How many relationship hops below a unit part are followed
    pub max_depth: usize,
    /// Append new units to the last section of the target's section list
    pub keep_sections: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            dedup_by_content: true,
            match_layouts_by_name: true,
            max_depth: 8,
            keep_sections: true,
        }
    }
}

impl MergeOptions {
    /// Create a new `MergeOptions` with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether media is deduplicated by content hash.
    #[inline]
    pub fn with_content_dedup(mut self, enabled: bool) -> Self {
        self.dedup_by_content = enabled;
        self
    }

    /// Set whether layouts are matched by name.
    #[inline]
    pub fn with_layout_names(mut self, enabled: bool) -> Self {
        self.match_layouts_by_name = enabled;
        self
    }

    /// Set the recursion depth guard.
    #[inline]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set whether new units join the target's last section.
    #[inline]
    pub fn with_sections(mut self, enabled: bool) -> Self {
        self.keep_sections = enabled;
        self
    }
}
