//! Media deduplication for a single merge.
//!
//! Media is identified by its canonical source part name and, optionally, by the
//! SHA-256 of its bytes. The second key lets two differently named source images
//! with identical content, or an image the target already carries, share one
//! part in the output.

use crate::ooxml::opc::package::{Package, PartRole};
use crate::ooxml::opc::packuri::PackURI;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

type ContentDigest = [u8; 32];

/// Maps source media to the target part that already holds it.
#[derive(Debug, Default)]
pub struct MediaDedupTable {
    /// Canonical source partname to target partname
    by_source: HashMap<PackURI, PackURI>,
    /// Content hash to target partname
    by_digest: HashMap<ContentDigest, PackURI>,
    /// Whether content hashes are consulted
    by_content: bool,
}

impl MediaDedupTable {
    /// An empty table; `by_content` enables hash lookups.
    pub fn new(by_content: bool) -> Self {
        Self {
            by_content,
            ..Self::default()
        }
    }

    /// A table that already knows every media part of `target`.
    ///
    /// Only useful with content hashing; without it this is the same as [`new`](Self::new).
    pub fn seeded_from(target: &Package, by_content: bool) -> Self {
        let mut table = Self::new(by_content);
        if by_content {
            for (partname, blob) in target.iter_parts() {
                if target.role_of(partname) == PartRole::Media {
                    table
                        .by_digest
                        .entry(digest(blob))
                        .or_insert_with(|| partname.clone());
                }
            }
        }
        table
    }

    /// Target part already holding this source media, if any.
    pub fn lookup(&self, source: &PackURI, blob: &[u8]) -> Option<&PackURI> {
        if let Some(hit) = self.by_source.get(source) {
            return Some(hit);
        }
        if self.by_content {
            return self.by_digest.get(&digest(blob));
        }
        None
    }

    /// Record that `source` now lives at `target`.
    pub fn register(&mut self, source: PackURI, blob: &[u8], target: PackURI) {
        if self.by_content {
            self.by_digest.entry(digest(blob)).or_insert_with(|| target.clone());
        }
        self.by_source.insert(source, target);
    }

    /// Number of distinct source parts registered.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

fn digest(blob: &[u8]) -> ContentDigest {
    let mut out = [0u8; 32];
    out.copy_from_slice(Sha256::digest(blob).as_slice());
    out
}
