//! Package writer for OPC packages.
//!
//! This module serializes a [`Package`] back into a ZIP container and writes it
//! to disk. Output is staged in a temporary file beside the destination and only
//! moved into place once the whole archive has been written.

use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::package::Package;
use crate::ooxml::opc::packuri::{CONTENT_TYPES_URI, PackURI};
use crate::ooxml::opc::phys_pkg::PhysPkgWriter;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Options controlling how a package is saved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Replace an existing file at the destination
    pub overwrite: bool,
}

impl SaveOptions {
    /// Allow or forbid replacing an existing destination file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Package writer that serializes an OPC package to a ZIP file.
///
/// The archive lists `[Content_Types].xml` first, then every part in part
/// name order. Relationship documents are ordinary parts of the package and are
/// written in the same pass.
///
/// # Example
///
/// ```no_run
/// use longan::ooxml::opc::Package;
/// use longan::ooxml::opc::pkgwriter::{PackageWriter, SaveOptions};
///
/// let pkg = Package::open("deck.pptx")?;
/// PackageWriter::write("copy.pptx", &pkg, &SaveOptions::default())?;
/// # Ok::<(), longan::ooxml::opc::OpcError>(())
/// ```
pub struct PackageWriter;

impl PackageWriter {
    /// Write a package to a file.
    ///
    /// # Errors
    /// [`OpcError::OutputExists`] if the destination exists and
    /// `options.overwrite` is false. Nothing is left behind on failure.
    pub fn write<P: AsRef<Path>>(path: P, package: &Package, options: &SaveOptions) -> Result<()> {
        let path = path.as_ref();
        if !options.overwrite && path.exists() {
            return Err(OpcError::OutputExists(path.to_path_buf()));
        }

        let bytes = Self::to_bytes(package)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;

        if options.overwrite {
            staged.persist(path).map_err(|e| OpcError::IoError(e.error))?;
        } else {
            staged.persist_noclobber(path).map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    OpcError::OutputExists(path.to_path_buf())
                } else {
                    OpcError::IoError(e.error)
                }
            })?;
        }

        debug!(path = %path.display(), bytes = bytes.len(), "package written");
        Ok(())
    }

    /// Serialize a package to bytes.
    pub fn to_bytes(package: &Package) -> Result<Vec<u8>> {
        let mut phys_writer = PhysPkgWriter::new();

        Self::write_content_types(&mut phys_writer, package)?;

        for (partname, blob) in package.iter_parts() {
            phys_writer.write(partname, blob)?;
        }

        phys_writer.finish()
    }

    /// Write the `[Content_Types].xml` part.
    fn write_content_types(phys_writer: &mut PhysPkgWriter, package: &Package) -> Result<()> {
        let blob = package.content_types().to_xml();
        let content_types_uri = PackURI::new(CONTENT_TYPES_URI).map_err(OpcError::InvalidPackUri)?;
        phys_writer.write(&content_types_uri, blob.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::constants::content_type as ct;

    fn small_package() -> Package {
        let mut pkg = Package::new();
        pkg.content_types_mut().add_default("xml", ct::XML);
        pkg.content_types_mut().add_default("png", ct::PNG);
        pkg.insert_part(PackURI::new("/b.xml").unwrap(), b"<b/>".to_vec());
        pkg.insert_part(PackURI::new("/a/image.png").unwrap(), vec![1, 2, 3]);
        pkg
    }

    #[test]
    fn test_manifest_first_then_sorted() {
        let bytes = PackageWriter::to_bytes(&small_package()).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, ["[Content_Types].xml", "a/image.png", "b.xml"]);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let pkg = small_package();
        let first = pkg.to_bytes().unwrap();
        let reloaded = Package::from_bytes(&first).unwrap();
        let second = reloaded.to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pptx");
        std::fs::write(&path, b"keep me").unwrap();

        let err = PackageWriter::write(&path, &small_package(), &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, OpcError::OutputExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");

        PackageWriter::write(&path, &small_package(), &SaveOptions::default().with_overwrite(true))
            .unwrap();
        let reread = Package::open(&path).unwrap();
        assert_eq!(reread.len(), 2);

        // Only the destination remains; the staging file is gone.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
