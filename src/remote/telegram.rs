use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::backend::MessageSource;
use crate::error::{LedgerSyncError, Result};
use crate::remote::types::*;
use crate::schema::Message;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const PAGE_LIMIT: usize = 100;

/// Reads posts of one chat through the Telegram Bot API.
///
/// Pending updates are only acknowledged once every message in them is at or below the
/// cursor the caller passes in, so a failed run can fetch the same messages again.
#[derive(Clone)]
pub struct TelegramChannel {
    client: Client,
    token: String,
    chat_id: i64,
    base_url: String,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, chat_id: i64) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            chat_id,
            base_url: TELEGRAM_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let res = self.client.get(&url).query(query).send().await?;
        let status = res.status();
        let body: TelegramResponse<T> = res.json().await?;

        match body {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            TelegramResponse {
                description,
                error_code,
                ..
            } => {
                let message = description.unwrap_or_else(|| "no description".to_string());
                let code = error_code.unwrap_or(status.as_u16());
                match code {
                    401 | 404 => Err(LedgerSyncError::Authentication(format!(
                        "Telegram {} failed: {}",
                        method, message
                    ))),
                    429 => Err(LedgerSyncError::Quota(message)),
                    _ => Err(LedgerSyncError::Backend {
                        status: code,
                        message,
                    }),
                }
            }
        }
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut query = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("timeout", "0".to_string()),
            (
                "allowed_updates",
                r#"["message","channel_post"]"#.to_string(),
            ),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        self.call("getUpdates", &query).await
    }

    fn to_message(&self, update: &Update) -> Option<Message> {
        let post = update.chat_message()?;
        if post.chat.id != self.chat_id {
            return None;
        }
        let text = post.text.as_ref().or(post.caption.as_ref())?;
        if text.trim().is_empty() {
            return None;
        }
        let date = DateTime::from_timestamp(post.date, 0)?;
        Some(Message::new(post.message_id, date, text.clone()))
    }

    /// Chats that appear in the pending updates, for finding the channel id.
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let updates = self.get_updates(None).await?;
        let chats: BTreeMap<i64, Chat> = updates
            .iter()
            .filter_map(|u| u.chat_message())
            .map(|m| (m.chat.id, m.chat.clone()))
            .collect();
        Ok(chats.into_values().collect())
    }
}

#[async_trait]
impl MessageSource for TelegramChannel {
    async fn authenticate(&self) -> Result<()> {
        let me: BotUser = self.call("getMe", &[]).await?;
        info!(
            "Authenticated as bot @{} ({})",
            me.username.as_deref().unwrap_or("?"),
            me.id
        );
        Ok(())
    }

    async fn messages_after(&self, after_id: i64) -> Result<Vec<Message>> {
        let mut offset = None;
        let mut messages = Vec::new();
        let mut truncated = false;

        loop {
            let updates = self.get_updates(offset).await?;
            if updates.is_empty() {
                break;
            }

            let page_len = updates.len();
            let mut committed_prefix = offset;
            let mut page_committed = true;

            for update in &updates {
                match self.to_message(update) {
                    Some(message) if message.id > after_id => {
                        page_committed = false;
                        messages.push(message);
                    }
                    _ => {
                        if page_committed {
                            committed_prefix = Some(update.update_id + 1);
                        }
                    }
                }
            }

            truncated = is_truncated(page_len, page_committed);

            // Only a fully processed page may be acknowledged and skipped past.
            if !page_committed || page_len < PAGE_LIMIT || committed_prefix == offset {
                break;
            }
            debug!("Acknowledging updates before {:?}", committed_prefix);
            offset = committed_prefix;
        }

        if truncated {
            warn!(
                "Stopped at a full page of updates with {} new messages, the rest will be read on the next run",
                messages.len()
            );
        }
        Ok(messages)
    }
}

/// A full page that still holds unsaved messages may hide more updates behind it.
fn is_truncated(page_len: usize, page_committed: bool) -> bool {
    page_len == PAGE_LIMIT && !page_committed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_channel_post_to_message() {
        let channel = TelegramChannel::new("t", -1001234);
        let u = update(
            r#"{"update_id": 10, "channel_post": {"message_id": 55, "date": 1709294400,
                "chat": {"id": -1001234, "type": "channel", "title": "Caixa"},
                "text": "Tipo: Entrada\nValor: 100"}}"#,
        );

        let message = channel.to_message(&u).unwrap();
        assert_eq!(message.id, 55);
        assert_eq!(message.text, "Tipo: Entrada\nValor: 100");
        assert_eq!(message.date.timestamp(), 1709294400);
    }

    #[test]
    fn test_other_chats_and_empty_posts_are_ignored() {
        let channel = TelegramChannel::new("t", -1001234);

        let other_chat = update(
            r#"{"update_id": 11, "message": {"message_id": 3, "date": 1709294400,
                "chat": {"id": 42, "type": "private"}, "text": "Valor: 1"}}"#,
        );
        assert!(channel.to_message(&other_chat).is_none());

        let photo = update(
            r#"{"update_id": 12, "channel_post": {"message_id": 56, "date": 1709294400,
                "chat": {"id": -1001234, "type": "channel"}}}"#,
        );
        assert!(channel.to_message(&photo).is_none());
    }

    #[test]
    fn test_caption_is_used_as_text() {
        let channel = TelegramChannel::new("t", -1001234);
        let u = update(
            r#"{"update_id": 13, "channel_post": {"message_id": 57, "date": 1709294400,
                "chat": {"id": -1001234, "type": "channel"}, "caption": "Saída: 20"}}"#,
        );
        assert_eq!(channel.to_message(&u).unwrap().text, "Saída: 20");
    }

    #[test]
    fn test_truncation_needs_a_full_unsaved_page() {
        // 40 new posts mixed into 100 updates from several chats
        assert!(is_truncated(PAGE_LIMIT, false));
        assert!(!is_truncated(PAGE_LIMIT, true));
        assert!(!is_truncated(40, false));
    }
}
