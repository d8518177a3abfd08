//! Merging of OOXML packages.
//!
//! The merge appends the units (slides) of a source package to a target package
//! while keeping the target's relationship graph closed: every internal
//! relationship of the result resolves to a part that exists, every part has a
//! content type, and no identifier is used twice.
//!
//! # Example
//!
//! ```no_run
//! use longan::ooxml::merge::{MergeOptions, merge_packages};
//! use longan::ooxml::opc::{Package, SaveOptions};
//!
//! let source = Package::open("appendix.pptx")?;
//! let mut target = Package::open("deck.pptx")?;
//! let report = merge_packages(&source, &mut target, MergeOptions::default())?;
//! println!("{} slides added", report.added_units.len());
//! target.save("merged.pptx", &SaveOptions::default())?;
//! # Ok::<(), longan::ooxml::opc::OpcError>(())
//! ```

pub mod alloc;
pub mod dedup;
pub mod merger;
pub mod options;
pub mod report;
pub mod units;


pub use alloc::IdAllocator;
pub use dedup::MediaDedupTable;
pub use merger::{Merger, merge_packages};
pub use options::MergeOptions;
pub use report::{AddedUnit, MergeReport, MergeWarning};
pub use units::{UnitReference, UnitSchema, append_units, read_unit_list};
