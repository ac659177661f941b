//! Local Cache
//!
//! The current believed list of todo items, keyed by id and ordered
//! newest-first. Single source of truth for rendering. All operations are
//! synchronous and touch nothing but the cache's own state.

use crate::domain::{TodoId, TodoItem};

#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    // Sorted by inserted_at descending with id tie-break; at most one
    // entry per id
    items: Vec<TodoItem>,
}

impl LocalCache {
    pub fn new() -> Self {
        LocalCache::default()
    }

    /// Insert or replace by id, keeping sort order
    ///
    /// The position is a pure function of the item's own fields, so
    /// re-inserting a rollback snapshot lands where the item was before.
    pub fn upsert(&mut self, item: TodoItem) {
        self.items.retain(|existing| existing.id != item.id);
        let pos = self
            .items
            .iter()
            .position(|existing| item.sorts_before(existing))
            .unwrap_or(self.items.len());
        self.items.insert(pos, item);
    }

    /// Remove by id, returning the removed item
    pub fn remove(&mut self, id: &TodoId) -> Option<TodoItem> {
        let pos = self.items.iter().position(|item| &item.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn get(&self, id: &TodoId) -> Option<&TodoItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Owned copy, used for rollback bookkeeping and rendering
    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.items.clone()
    }

    /// Ordered view, newest first
    pub fn all(&self) -> &[TodoItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count of items not yet completed
    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|item| !item.completed).count()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
