//! Process-wide bijection between sequence id strings and dense integers.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

/// Concurrent id map; new-id acquisition is atomic and ids are dense.
#[derive(Default)]
pub struct SeqIdMap {
    id_to_index: DashMap<String, u32, FxBuildHasher>,
    index_to_id: DashMap<u32, String, FxBuildHasher>,
    next: AtomicU32,
}

impl SeqIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the dense id for `id`, allocating one on first sight.
    pub fn lookup_id(&self, id: &str) -> u32 {
        if let Some(idx) = self.id_to_index.get(id) {
            return *idx;
        }
        let idx = *self
            .id_to_index
            .entry(id.to_string())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed));
        self.index_to_id.entry(idx).or_insert_with(|| id.to_string());
        idx
    }

    pub fn lookup_index(&self, index: u32) -> Option<String> {
        self.index_to_id.get(&index).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
