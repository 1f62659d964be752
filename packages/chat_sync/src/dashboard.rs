//! Dashboard reconciler: merges chat-list snapshots into a keyed store and
//! keeps a deterministic display order.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{ChatId, ChatSummary};

/// Newest activity first; ties broken by chat id ascending.
pub fn display_order(a: &ChatSummary, b: &ChatSummary) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.chat_id.cmp(&b.chat_id))
}

#[derive(Debug, Default)]
pub struct DashboardReconciler {
    chats: HashMap<ChatId, ChatSummary>,
    order: Vec<ChatId>,
}

impl DashboardReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a snapshot. Each entry replaces whatever was stored for its chat
    /// id (last write wins). Chats not mentioned are left alone. Returns
    /// whether anything changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatSummary>) -> bool {
        let mut changed = false;
        for summary in snapshot {
            match self.chats.get(&summary.chat_id) {
                Some(existing) if *existing == summary => {}
                _ => {
                    self.chats.insert(summary.chat_id.clone(), summary);
                    changed = true;
                }
            }
        }
        if changed {
            self.reorder();
        }
        debug!(chats = self.chats.len(), changed, "applied chat-list snapshot");
        changed
    }

    fn reorder(&mut self) {
        let mut rows: Vec<&ChatSummary> = self.chats.values().collect();
        rows.sort_by(|a, b| display_order(a, b));
        self.order = rows.into_iter().map(|s| s.chat_id.clone()).collect();
    }

    /// Chats in display order.
    pub fn current_order(&self) -> Vec<&ChatSummary> {
        self.order
            .iter()
            .filter_map(|id| self.chats.get(id))
            .collect()
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<&ChatSummary> {
        self.chats.get(chat_id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}
