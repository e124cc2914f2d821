//! Concurrent keyed blob store: many concurrent readers or one writer,
//! whole-value replacement only.
//!
//! `std::sync::RwLock` rather than `tokio::sync::RwLock`: the lock is
//! never held across an `.await` here, since every lock use is a single
//! in-memory map operation, so the synchronous lock is both sufficient
//! and cheaper. Coarse per-map locking does not create priority
//! inversions with in-flight transfers, which hold no locks during I/O.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An ordered sequence of blocks, each at most [`MAX_PAYLOAD`](crate::packet::MAX_PAYLOAD)
/// bytes. Every block but the last is exactly 512 bytes; the last is 0..512.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    blocks: Vec<Vec<u8>>,
}

impl Blob {
    pub fn from_blocks(blocks: Vec<Vec<u8>>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Vec<u8>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total byte length across all blocks.
    pub fn byte_len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }
}

/// Thread-safe filename -> [`Blob`] mapping. Process-local and ephemeral:
/// nothing here ever touches disk.
#[derive(Clone, Default)]
pub struct BlobStore {
    inner: Arc<RwLock<HashMap<Vec<u8>, Arc<Blob>>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.inner.read().expect("store lock poisoned").contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<Blob>> {
        self.inner.read().expect("store lock poisoned").get(key).cloned()
    }

    /// Atomic whole-value replacement; no append semantics.
    pub fn put(&self, key: Vec<u8>, blob: Blob) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .insert(key, Arc::new(blob));
    }
}
