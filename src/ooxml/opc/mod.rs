//! Open Packaging Conventions (OPC) implementation.
//!
//! This module provides the package layer that Office Open XML documents are
//! built on. It includes support for:
//!
//! - Package structure (parts, relationships)
//! - Content type management
//! - ZIP-based physical packaging
//! - Namespace prefixes declared by part documents
//!
//! # Performance Features
//!
//! - Uses `memchr` for fast string searching in XML
//! - Uses `atoi_simd` for fast integer parsing
//! - Uses `quick-xml` for efficient streaming XML parsing

pub mod constants;
pub mod content_types;
pub mod error;
pub mod namespace;
pub mod package;
pub mod packuri;
pub mod phys_pkg;
pub mod pkgwriter;
pub mod rel;

// Re-export commonly used types
pub use content_types::{ContentTypeConflict, ContentTypeMap, DeclarationKind};
pub use error::{OpcError, Result};
pub use namespace::NamespaceMap;
pub use package::{IntegrityIssue, Package, PartRole};
pub use packuri::PackURI;
pub use pkgwriter::{PackageWriter, SaveOptions};
pub use rel::{Relationship, Relationships};
