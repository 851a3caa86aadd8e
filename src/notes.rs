use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;

/// A note value list. Notes are always ordered lists, even when a peer only
/// has a single value to report.
pub type NoteList = Vec<Value>;

/// Mapping from note name to its value list.
pub type NoteMap = HashMap<String, NoteList>;

/// Local note storage for a single peer.
///
/// Writes have overwrite semantics: a write replaces the whole list for a
/// name, it never appends to it.
#[derive(Debug, Default)]
pub struct NoteStore {
    notes: NoteMap,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `name` with `values`.
    pub fn write(&mut self, name: impl Into<String>, values: NoteList) {
        self.notes.insert(name.into(), values);
    }

    /// Get the stored list for `name`, or an empty list if absent.
    pub fn read(&self, name: &str) -> NoteList {
        self.notes.get(name).cloned().unwrap_or_default()
    }

    /// Serialize the full store as the `notes` channel payload.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.notes)?)
    }

    pub fn snapshot(&self) -> NoteMap {
        self.notes.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// The aggregated store populated by merging note snapshots received from
/// peers during an aggregation round.
#[derive(Debug, Default)]
pub struct SharedStore {
    notes: NoteMap,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// Seed the store with a copy of the local notes at the start of a round.
    pub fn seed(&mut self, local: &NoteStore) {
        self.notes = local.snapshot();
    }

    /// Union-merge a remote snapshot into the store.
    ///
    /// Names the store lacks are taken as-is; for existing names, incoming
    /// values not already present are appended, preserving first-seen order.
    /// Merging is commutative, associative, and idempotent.
    pub fn merge(&mut self, remote: NoteMap) {
        for (name, values) in remote {
            let existing = self.notes.entry(name).or_default();
            for value in values {
                if !existing.contains(&value) {
                    existing.push(value);
                }
            }
        }
    }

    /// Read and clear every entry, ending the current round's collection.
    pub fn drain(&mut self) -> NoteMap {
        std::mem::take(&mut self.notes)
    }

    pub fn read(&self, name: &str) -> NoteList {
        self.notes.get(name).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
