//! The local bookmark collection and its merge policy.
//!
//! Every merge is idempotent: applying the same event twice leaves the
//! collection as applying it once did. Identifiers stay unique.

use crate::feed::FeedEvent;
use crate::types::{Bookmark, BookmarkId, BookmarkUpdate};
use std::collections::HashSet;

/// Ordered bookmarks, newest first at load time.
///
/// After the load, new rows are prepended and edits happen in place; the
/// collection is never globally re-sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collection {
    items: Vec<Bookmark>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list result, keeping the first occurrence of each id.
    pub fn from_list(rows: Vec<Bookmark>) -> Self {
        let mut collection = Self::new();
        collection.replace(rows);
        collection
    }

    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<&Bookmark> {
        self.items.iter().find(|b| b.id == *id)
    }

    pub fn contains(&self, id: &BookmarkId) -> bool {
        self.get(id).is_some()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Replace wholesale.
    pub fn replace(&mut self, rows: Vec<Bookmark>) {
        let mut seen = HashSet::with_capacity(rows.len());
        self.items = rows
            .into_iter()
            .filter(|row| seen.insert(row.id.clone()))
            .collect();
    }

    /// Prepend unless the id is already present. Returns whether it was added.
    pub fn insert(&mut self, row: Bookmark) -> bool {
        if self.contains(&row.id) {
            return false;
        }
        self.items.insert(0, row);
        true
    }

    /// Overwrite the entry with the same id. Returns whether one existed.
    pub fn overwrite(&mut self, row: Bookmark) -> bool {
        match self.items.iter_mut().find(|b| b.id == row.id) {
            Some(existing) => {
                *existing = row;
                true
            }
            None => false,
        }
    }

    /// Merge a partial update into the entry with `id`, if present.
    pub fn patch(&mut self, id: &BookmarkId, update: &BookmarkUpdate) -> bool {
        match self.items.iter_mut().find(|b| b.id == *id) {
            Some(existing) => {
                existing.apply(update);
                true
            }
            None => false,
        }
    }

    /// Remove the entry with `id`, if present.
    pub fn remove(&mut self, id: &BookmarkId) -> bool {
        let before = self.items.len();
        self.items.retain(|b| b.id != *id);
        self.items.len() != before
    }

    /// Apply a feed event. Returns whether the collection changed.
    /// `Dropped` carries no row and never changes anything.
    pub fn apply(&mut self, event: &FeedEvent) -> bool {
        match event {
            FeedEvent::Inserted { record } => self.insert(record.clone()),
            FeedEvent::Updated { record } => {
                let changed = self.get(&record.id).map_or(false, |b| b != record);
                self.overwrite(record.clone()) && changed
            }
            FeedEvent::Deleted { id } => self.remove(id),
            FeedEvent::Dropped { .. } => false,
        }
    }

    pub fn into_vec(self) -> Vec<Bookmark> {
        self.items
    }
}
