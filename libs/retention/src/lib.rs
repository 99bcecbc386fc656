//! Image retention primitives.
//!
//! This library tracks which image IDs have been seen for each image name
//! and computes which old IDs are safe to prune. Key concepts:
//!
//! - **History**: Per-image-name list of image IDs, most-recent-first.
//! - **Retention window**: The `keep_images` newest entries, never pruned.
//! - **In-use set**: Image IDs referenced by a listed container, never pruned.
//!
//! # Invariants
//!
//! - A history list never contains duplicates
//! - Index 0 is always the most recently recorded ID
//! - A history list never exceeds [`HISTORY_CAP`] entries
//! - Prune candidates never include an in-use ID

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Maximum number of image IDs retained per image name.
pub const HISTORY_CAP: usize = 50;

/// Append-only (from the caller's perspective) per-image-name history of
/// image IDs, most-recent-first.
///
/// The map is the single owner of history state; the tick driver loads it
/// from the persistent store, mutates it through [`ImageHistory::record`],
/// and flushes it back once at tick end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHistory {
    images: BTreeMap<String, Vec<String>>,
}

impl ImageHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an image ID for an image name.
    ///
    /// The ID moves to the front of the name's list; an existing occurrence
    /// is removed first so recording never introduces duplicates. The list
    /// is truncated to [`HISTORY_CAP`].
    ///
    /// Returns `true` when the map changed (callers use this as a dirty
    /// flag for persistence). Empty names or IDs are ignored.
    pub fn record(&mut self, name: &str, id: &str) -> bool {
        if name.is_empty() || id.is_empty() {
            return false;
        }

        let list = self.images.entry(name.to_string()).or_default();
        if list.first().is_some_and(|front| front == id) && list.len() <= HISTORY_CAP {
            // Already at the front; nothing moved.
            return false;
        }

        list.retain(|existing| existing != id);
        list.insert(0, id.to_string());
        list.truncate(HISTORY_CAP);
        true
    }

    /// History for one image name, most-recent-first. Empty if unknown.
    pub fn ids(&self, name: &str) -> &[String] {
        self.images.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of image names tracked.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True when no image names are tracked.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Iterate over `(name, ids)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.images
            .iter()
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
    }
}

/// Compute which history entries are safe to prune.
///
/// Drops the `keep_images` most-recent entries, removes anything still in
/// `used_ids`, and deduplicates preserving first-seen order. Returns empty
/// immediately when `keep_images` is zero: a zero retention window means
/// "keep everything", not "prune everything".
pub fn prune_candidates(
    history_ids: &[String],
    keep_images: u32,
    used_ids: &HashSet<String>,
) -> Vec<String> {
    if keep_images == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    history_ids
        .iter()
        .skip(keep_images as usize)
        .filter(|id| !id.is_empty())
        .filter(|id| !used_ids.contains(*id))
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}
