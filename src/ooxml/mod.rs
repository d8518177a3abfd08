//! Office Open XML (OOXML) package handling.
//!
//! # Architecture
//!
//! The module is organized into two layers:
//!
//! 1. **OPC Layer** (`opc`): Low-level package handling (ZIP, parts, relationships,
//!    content types)
//! 2. **Merge Layer** (`merge`): Appending the units of one package to another while
//!    keeping the relationship graph closed
//!
//! # Example: Appending slides
//!
//! ```rust,no_run
//! use longan::ooxml::merge::{MergeOptions, merge_packages};
//! use longan::ooxml::opc::{Package, SaveOptions};
//!
//! let source = Package::open("source.pptx")?;
//! let mut target = Package::open("target.pptx")?;
//!
//! let report = merge_packages(&source, &mut target, MergeOptions::default())?;
//! assert!(target.check_integrity().is_empty());
//! target.save("output.pptx", &SaveOptions::default())?;
//! # let _ = report;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod merge;
pub mod opc;

// Re-export commonly used types from OPC layer
pub use opc::{OpcError, PackURI, Package};
