//! Recording mock of the [`Messenger`] trait for cycle tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{InlineLink, Messenger, TelegramError};

/// Records every message it is asked to deliver. Chats listed in
/// `failing_chats` reject with an API error instead.
#[derive(Default)]
pub(crate) struct MockMessenger {
    sent: Mutex<Vec<(i64, String)>>,
    failing_chats: HashSet<i64>,
}

impl MockMessenger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_for(chats: impl IntoIterator<Item = i64>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing_chats: chats.into_iter().collect(),
        }
    }

    pub(crate) fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _link: Option<&InlineLink>,
    ) -> Result<(), TelegramError> {
        if self.failing_chats.contains(&chat_id) {
            return Err(TelegramError::Api {
                status: StatusCode::BAD_REQUEST,
                description: "chat not found".to_string(),
            });
        }

        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}
