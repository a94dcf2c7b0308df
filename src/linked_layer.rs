//! The document-level store of linked smart-object sources.
//!
//! Every smart-object layer references its source asset by the SHA-256 of
//! the source bytes; any number of layers may point at one entry. The
//! document owns the entries, collects unreferenced ones at write time and
//! persists the store through the `lnkD`/`lnk2` family of tagged blocks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::{PsdError, Result};

/// Whether the source bytes live inside the document or on disk next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkedLayerType {
    /// The file's bytes are embedded in the document
    Data,
    /// Only the path travels with the document
    External,
}

/// One linked source file.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedLayerData {
    /// Content hash of the source bytes, the store key
    pub hash: String,
    /// Original filename of the asset
    pub filename: String,
    /// 4-byte file type tag (`'png '`, `'JPEG'`, …)
    pub file_type: [u8; 4],
    /// 4-byte creator tag
    pub creator: [u8; 4],
    /// Embedded bytes when the link type is [`LinkedLayerType::Data`]
    pub data: Option<Arc<Vec<u8>>>,
    /// Data or external link
    pub link_type: LinkedLayerType,
    /// Child document id carried by newer link versions
    pub child_document_id: Option<String>,
}

/// Decoded pixels of a linked source, produced by an [`ImageCodec`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    /// Interleaved 8-bit samples, `channels` per pixel
    pub pixels: Vec<u8>,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
    /// Samples per pixel
    pub channels: u8,
}

impl SourceImage {
    /// Sample one channel at integer coordinates, clamped to the edges.
    pub fn sample(&self, x: i64, y: i64, channel: usize) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.pixels[(y * self.width as usize + x) * self.channels as usize + channel]
    }
}

/// Decodes and encodes the non-PSD image files smart objects link to.
///
/// The engine consumes this interface and never provides one: file bytes
/// and decoded pixels arrive through it from the embedding application.
pub trait ImageCodec: Send + Sync {
    /// Decode the file at `path` (or the embedded `bytes` when present).
    fn read(&self, path: &str, bytes: Option<&[u8]>) -> Result<SourceImage>;

    /// Encode `image` to `path`.
    fn write(&self, path: &str, image: &SourceImage) -> Result<()>;
}

struct Entry {
    data: LinkedLayerData,
    /// Decoded-image cache, filled on first decode
    decoded: Option<Arc<SourceImage>>,
}

/// The hash-keyed map of linked sources, shared-read by smart objects and
/// exclusively locked only for registration and collection.
#[derive(Default)]
pub struct LinkedLayerStore {
    entries: RwLock<Vec<Entry>>,
}

impl LinkedLayerStore {
    /// An empty store.
    pub fn new() -> LinkedLayerStore {
        LinkedLayerStore::default()
    }

    /// The content hash of `bytes` as the store computes it.
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Register an embedded source file, returning its hash. Registering
    /// the same bytes twice yields the same entry.
    pub fn insert_data(&self, filename: &str, file_type: [u8; 4], bytes: Vec<u8>) -> String {
        let hash = Self::content_hash(&bytes);
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.data.hash == hash) {
            return hash;
        }
        entries.push(Entry {
            data: LinkedLayerData {
                hash: hash.clone(),
                filename: filename.to_string(),
                file_type,
                creator: *b"8BIM",
                data: Some(Arc::new(bytes)),
                link_type: LinkedLayerType::Data,
                child_document_id: None,
            },
            decoded: None,
        });
        hash
    }

    /// Register an external source by path; `bytes` are hashed for the key
    /// but not retained.
    pub fn insert_external(&self, filename: &str, file_type: [u8; 4], bytes: &[u8]) -> String {
        let hash = Self::content_hash(bytes);
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.data.hash == hash) {
            return hash;
        }
        entries.push(Entry {
            data: LinkedLayerData {
                hash: hash.clone(),
                filename: filename.to_string(),
                file_type,
                creator: *b"8BIM",
                data: None,
                link_type: LinkedLayerType::External,
                child_document_id: None,
            },
            decoded: None,
        });
        hash
    }

    /// Re-register an entry parsed from a document.
    pub(crate) fn insert_entry(&self, data: LinkedLayerData) {
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.data.hash == data.hash) {
            return;
        }
        entries.push(Entry {
            data,
            decoded: None,
        });
    }

    /// Look up an entry by hash.
    pub fn get(&self, hash: &str) -> Option<LinkedLayerData> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.data.hash == hash)
            .map(|entry| entry.data.clone())
    }

    /// All entries in registration order.
    pub fn entries(&self) -> Vec<LinkedLayerData> {
        self.entries
            .read()
            .iter()
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no sources.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Decode the entry's pixels through `codec`, caching the result so a
    /// source shared by many layers decodes once.
    pub fn decode(&self, hash: &str, codec: &dyn ImageCodec) -> Result<Arc<SourceImage>> {
        {
            let entries = self.entries.read();
            let entry = entries
                .iter()
                .find(|entry| entry.data.hash == hash)
                .ok_or_else(|| {
                    PsdError::InvalidArgument(format!("no linked layer with hash {}", hash))
                })?;
            if let Some(decoded) = &entry.decoded {
                return Ok(Arc::clone(decoded));
            }
        }

        // Decode outside the lock; codecs may be slow. The entry can
        // disappear between locks if a collection runs concurrently.
        let data = self.get(hash).ok_or_else(|| {
            PsdError::InvalidArgument(format!("no linked layer with hash {}", hash))
        })?;
        let image = Arc::new(codec.read(&data.filename, data.data.as_deref().map(Vec::as_slice))?);

        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.data.hash == hash) {
            entry.decoded = Some(Arc::clone(&image));
        }
        Ok(image)
    }

    /// Drop every entry whose hash is not in `live`. Runs at write time;
    /// smart-object layers hold only hashes, so the caller collects the
    /// live set from the layer tree.
    pub fn garbage_collect(&self, live: &HashSet<String>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| live.contains(&entry.data.hash));
        before - entries.len()
    }
}

impl Clone for LinkedLayerStore {
    fn clone(&self) -> Self {
        let entries = self
            .entries
            .read()
            .iter()
            .map(|entry| Entry {
                data: entry.data.clone(),
                decoded: entry.decoded.clone(),
            })
            .collect();
        LinkedLayerStore {
            entries: RwLock::new(entries),
        }
    }
}

impl std::fmt::Debug for LinkedLayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedLayerStore")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCodec;

    impl ImageCodec for StubCodec {
        fn read(&self, _path: &str, bytes: Option<&[u8]>) -> Result<SourceImage> {
            let bytes = bytes.expect("stub only decodes embedded data");
            Ok(SourceImage {
                pixels: bytes.to_vec(),
                width: bytes.len() as u32,
                height: 1,
                channels: 1,
            })
        }

        fn write(&self, _path: &str, _image: &SourceImage) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn identical_bytes_share_one_entry() {
        let store = LinkedLayerStore::new();
        let a = store.insert_data("tex.png", *b"png ", vec![1, 2, 3]);
        let b = store.insert_data("tex-copy.png", *b"png ", vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        // First registration wins the metadata.
        assert_eq!(store.get(&a).unwrap().filename, "tex.png");
    }

    #[test]
    fn decode_is_cached() {
        let store = LinkedLayerStore::new();
        let hash = store.insert_data("tex.png", *b"png ", vec![9, 9]);

        let first = store.decode(&hash, &StubCodec).unwrap();
        let second = store.decode(&hash, &StubCodec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn garbage_collect_drops_unreferenced_entries() {
        let store = LinkedLayerStore::new();
        let live = store.insert_data("a.png", *b"png ", vec![1]);
        store.insert_data("b.png", *b"png ", vec![2]);

        let mut live_set = HashSet::new();
        live_set.insert(live.clone());

        assert_eq!(store.garbage_collect(&live_set), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live).is_some());
    }

    #[test]
    fn sample_clamps_to_edges() {
        let image = SourceImage {
            pixels: vec![10, 20, 30, 40],
            width: 2,
            height: 2,
            channels: 1,
        };
        assert_eq!(image.sample(-5, 0, 0), 10);
        assert_eq!(image.sample(5, 5, 0), 40);
    }
}
