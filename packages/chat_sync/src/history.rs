use std::future::Future;
use std::sync::Arc;

use crate::error::HistoryLoadError;
use crate::types::{ChatId, Message};

/// One-shot fetch of the most recent persisted messages of a chat.
///
/// Implementations return messages oldest first. The backend serves them
/// newest first; [`chronological`] does the flip.
pub trait HistoryLoader: Send + Sync + 'static {
    fn fetch(
        &self,
        chat_id: &ChatId,
    ) -> impl Future<Output = Result<Vec<Message>, HistoryLoadError>> + Send;
}

impl<H: HistoryLoader> HistoryLoader for Arc<H> {
    fn fetch(
        &self,
        chat_id: &ChatId,
    ) -> impl Future<Output = Result<Vec<Message>, HistoryLoadError>> + Send {
        (**self).fetch(chat_id)
    }
}

/// Turn a most-recent-first page into display order.
pub fn chronological(mut recent_first: Vec<Message>) -> Vec<Message> {
    recent_first.reverse();
    recent_first
}

/// Loader that always reports no history. Used where no backend is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHistory;

impl HistoryLoader for NoHistory {
    async fn fetch(&self, _chat_id: &ChatId) -> Result<Vec<Message>, HistoryLoadError> {
        Ok(Vec::new())
    }
}
