//! Longan - Relationship-aware merging of Office Open XML packages
//!
//! This library appends the slides of one presentation package to another.
//! Everything a slide depends on travels with it: media, charts and their
//! embedded workbooks, notes, and links between slides. Layouts, masters and
//! themes are rebound to the target's own.
//!
//! # Features
//!
//! - **OPC Layer**: Read and write ZIP-based packages, relationships and content types
//! - **Collision-free identifiers**: Unit ids, `rId`s and part names are allocated
//!   against the whole target package
//! - **Media deduplication**: Identical images are stored once, by path or by content hash
//! - **Transactional merges**: A failed merge leaves the target untouched
//! - **Merge reports**: Every recoverable problem is recorded and can be exported as YAML
//!
//! # Example - Merging two presentations
//!
//! ```no_run
//! use longan::ooxml::merge::{MergeOptions, Merger};
//! use longan::ooxml::opc::{Package, SaveOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Package::open("appendix.pptx")?;
//! let mut target = Package::open("deck.pptx")?;
//!
//! let report = Merger::new(&mut target, MergeOptions::default())?.merge(&source)?;
//! for unit in &report.added_units {
//!     println!("slide {} -> {}", unit.source_id, unit.partname);
//! }
//! for warning in &report.warnings {
//!     eprintln!("warning: {}", warning);
//! }
//!
//! target.save("merged.pptx", &SaveOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Checking a package
//!
//! ```no_run
//! use longan::Package;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pkg = Package::open("deck.pptx")?;
//! for issue in pkg.check_integrity() {
//!     println!("{}", issue);
//! }
//! # Ok(())
//! # }
//! ```

/// OOXML (Office Open XML) package layer and merge engine
pub mod ooxml;

// Re-export commonly used types for convenience
pub use ooxml::merge::{MergeOptions, MergeReport, MergeWarning, Merger, merge_packages};
pub use ooxml::opc::{IntegrityIssue, OpcError, PackURI, Package, SaveOptions};
