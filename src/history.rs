// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Undo history for catalog tag mutations
//!
//! Every mutating catalog operation captures a full snapshot of all tag
//! lists before touching anything. The undo stack is a fixed-capacity ring:
//! when it is full, the oldest snapshot is evicted.

use std::collections::VecDeque;

/// Maximum number of undo snapshots kept in memory
pub const UNDO_STACK_SIZE: usize = 32;

/// One undoable action: the tag state of every image before it ran
#[derive(Debug, Clone)]
pub struct HistoryItem {
    /// Human-readable action name, shown in confirmation prompts
    pub action_name: String,
    /// Per-image ordered tag lists, parallel to the catalog's image order
    pub tags: Vec<Vec<String>>,
    /// Whether applying this entry should ask the user first
    pub needs_confirmation: bool,
}

/// Fixed-capacity LIFO stack of history snapshots
#[derive(Debug)]
pub struct HistoryStack {
    items: VecDeque<HistoryItem>,
    capacity: usize,
}

impl HistoryStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an item, evicting the oldest one if the stack is full
    pub fn push(&mut self, item: HistoryItem) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Pop the most recent item
    pub fn pop(&mut self) -> Option<HistoryItem> {
        self.items.pop_back()
    }

    pub fn last(&self) -> Option<&HistoryItem> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(UNDO_STACK_SIZE)
    }
}
