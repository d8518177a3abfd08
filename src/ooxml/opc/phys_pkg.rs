//! Provides a general interface to a physical OPC package (ZIP file).
//!
//! This module handles the low-level reading and writing of OPC packages as ZIP
//! archives. Member names map one-to-one onto part names; directory entries are
//! ignored.

use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::PackURI;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Physical package reader that provides access to parts in a ZIP-based OPC package.
///
/// The archive is parsed once on construction; member contents are inflated when
/// asked for.
pub struct PhysPkgReader<'data> {
    /// The underlying ZIP archive
    archive: ZipArchive<Cursor<&'data [u8]>>,
}

impl<'data> PhysPkgReader<'data> {
    /// Create a new PhysPkgReader from a byte slice.
    ///
    /// # Errors
    /// Returns [`OpcError::CorruptContainer`] if the bytes are not a readable ZIP archive.
    pub fn new(data: &'data [u8]) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| OpcError::CorruptContainer(e.to_string()))?;
        Ok(Self { archive })
    }

    /// Inflate every member of the archive, keyed by part name.
    ///
    /// A later duplicate member name replaces an earlier one.
    pub fn read_all(&mut self) -> Result<BTreeMap<PackURI, Vec<u8>>> {
        let mut parts = BTreeMap::new();

        for i in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(i)
                .map_err(|e| OpcError::CorruptContainer(e.to_string()))?;
            if file.is_dir() {
                continue;
            }

            let pack_uri = PackURI::from_membername(file.name());
            let mut blob = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut blob)
                .map_err(|e| OpcError::CorruptContainer(format!("{}: {}", pack_uri, e)))?;
            parts.insert(pack_uri, blob);
        }

        Ok(parts)
    }
}

/// Physical package writer for creating OPC packages.
///
/// Writes parts to an in-memory ZIP archive with Deflate compression. Entry
/// timestamps are left at the ZIP epoch so identical inputs produce identical bytes.
pub struct PhysPkgWriter {
    /// The underlying ZIP archive writer
    archive: ZipWriter<Cursor<Vec<u8>>>,
}

impl PhysPkgWriter {
    /// Create a new package writer that writes to memory.
    pub fn new() -> Self {
        Self {
            archive: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    /// Write a part to the package with Deflate compression.
    pub fn write(&mut self, pack_uri: &PackURI, blob: &[u8]) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.archive.start_file(pack_uri.membername(), options)?;
        self.archive.write_all(blob)?;
        Ok(())
    }

    /// Finish writing and return the package bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let cursor = self.archive.finish()?;
        Ok(cursor.into_inner())
    }
}

impl Default for PhysPkgWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut writer = PhysPkgWriter::new();
        let pack_uri = PackURI::new("/test.txt").unwrap();
        writer.write(&pack_uri, b"Hello, World!").unwrap();
        let zip_data = writer.finish().unwrap();

        let mut reader = PhysPkgReader::new(&zip_data).unwrap();
        let parts = reader.read_all().unwrap();
        assert_eq!(parts[&pack_uri], b"Hello, World!");
    }

    #[test]
    fn test_multiple_parts() {
        let mut writer = PhysPkgWriter::new();

        let content_types = PackURI::new("/[Content_Types].xml").unwrap();
        let rels = PackURI::new("/_rels/.rels").unwrap();
        let document = PackURI::new("/ppt/presentation.xml").unwrap();
        let image = PackURI::new("/ppt/media/image1.png").unwrap();

        writer.write(&content_types, b"<Types/>").unwrap();
        writer.write(&rels, b"<Relationships/>").unwrap();
        writer.write(&document, b"<presentation/>").unwrap();
        writer.write(&image, &[0x89, b'P', b'N', b'G']).unwrap();

        let zip_data = writer.finish().unwrap();
        let mut reader = PhysPkgReader::new(&zip_data).unwrap();

        let all = reader.read_all().unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.contains_key(&content_types));
        assert!(all.contains_key(&rels));
        assert!(!all.contains_key(&PackURI::new("/missing.xml").unwrap()));
        assert_eq!(all[&document], b"<presentation/>");
        assert_eq!(all[&image], [0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_directory_entries_are_skipped() {
        let mut archive = ZipWriter::new(Cursor::new(Vec::new()));
        archive.add_directory("ppt/", SimpleFileOptions::default()).unwrap();
        archive.start_file("ppt/a.xml", SimpleFileOptions::default()).unwrap();
        archive.write_all(b"<a/>").unwrap();
        let zip_data = archive.finish().unwrap().into_inner();

        let parts = PhysPkgReader::new(&zip_data).unwrap().read_all().unwrap();
        let names: Vec<&str> = parts.keys().map(PackURI::as_str).collect();
        assert_eq!(names, ["/ppt/a.xml"]);
    }

    #[test]
    fn test_not_a_zip() {
        let err = PhysPkgReader::new(b"definitely not a zip archive").err().unwrap();
        assert!(matches!(err, OpcError::CorruptContainer(_)));
    }

    #[test]
    fn test_deterministic_output() {
        let build = || {
            let mut writer = PhysPkgWriter::new();
            writer.write(&PackURI::new("/a.xml").unwrap(), b"<a/>").unwrap();
            writer.write(&PackURI::new("/b.xml").unwrap(), b"<b/>").unwrap();
            writer.finish().unwrap()
        };
        assert_eq!(build(), build());
    }
}
