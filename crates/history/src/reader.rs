//! The two read shapes: offset/limit pages from the store, and the
//! no-overlap hot-window/store union for offline sync.

use std::sync::Arc;

use {
    serde::Serialize,
    tracing::warn,
    uuid::Uuid,
};

use {
    parley_cache::HotWindow,
    parley_protocol::{ChatMessage, datetime_to_epoch, epoch_to_datetime},
    parley_storage::{ConversationStore, MessageStore, StoredMessage},
};

use crate::{Error, Result};

/// Per-conversation ceiling on messages returned by one sync call.
pub const SYNC_LIMIT: usize = 100;

/// One message in a read response. Cache hits carry no id (the store
/// assigns ids at persistence time); store rows always do. `sent_at` is
/// fractional epoch seconds in both cases.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub sent_at: f64,
}

impl From<StoredMessage> for MessageRecord {
    fn from(row: StoredMessage) -> Self {
        Self {
            id: Some(row.id.to_string()),
            conversation_id: row.conversation_id.to_string(),
            sender_id: row.sender_id.to_string(),
            content: row.content,
            kind: row.kind,
            sent_at: datetime_to_epoch(row.sent_at),
        }
    }
}

impl From<ChatMessage> for MessageRecord {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: None,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            sent_at: message.sent_at,
        }
    }
}

/// Sync result for one conversation.
#[derive(Debug, Serialize)]
pub struct ConversationDelta {
    pub conversation_id: String,
    pub messages: Vec<MessageRecord>,
}

pub struct HistoryReader {
    store: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    hot: Arc<dyn HotWindow>,
}

impl HistoryReader {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        hot: Arc<dyn HotWindow>,
    ) -> Self {
        Self {
            store,
            conversations,
            hot,
        }
    }

    #[must_use]
    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Most recent messages first, straight from the store. No cache
    /// involvement.
    pub async fn page(
        &self,
        conversation_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<MessageRecord>> {
        let rows = self.store.page(conversation_id, page, size).await?;
        Ok(rows.into_iter().map(MessageRecord::from).collect())
    }

    /// Everything after `since` in one conversation: hot window first, then
    /// the store strictly past the cache's last timestamp, merged ascending.
    pub async fn sync_conversation(
        &self,
        conversation_id: &str,
        since: f64,
    ) -> Result<Vec<MessageRecord>> {
        let cached = self.hot.after(conversation_id, since).await?;
        let mut records: Vec<MessageRecord> = Vec::with_capacity(cached.len());
        for raw in &cached {
            match serde_json::from_str::<ChatMessage>(raw) {
                Ok(message) => records.push(MessageRecord::from(message)),
                Err(e) => {
                    warn!(conversation_id, error = %e, "sync: malformed hot-window entry, skipping");
                },
            }
        }

        // Store rows are taken strictly after the cache's newest entry, so
        // the union cannot contain a message twice.
        let pivot = records.last().map_or(since, |record| record.sent_at);
        let remaining = SYNC_LIMIT.saturating_sub(records.len());
        if remaining > 0 {
            let id = Uuid::parse_str(conversation_id)
                .map_err(|_| Error::invalid_input("conversation id is not a uuid"))?;
            let pivot = epoch_to_datetime(pivot)
                .ok_or_else(|| Error::invalid_input("since timestamp out of range"))?;
            let rows = self.store.after(id, pivot, remaining as u32).await?;
            records.extend(rows.into_iter().map(MessageRecord::from));
        }

        records.sort_by(|a, b| {
            a.sent_at
                .total_cmp(&b.sent_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    /// Sync every requested conversation (or all of the user's), skipping
    /// conversations that fail individually.
    pub async fn sync_user(
        &self,
        user_id: &str,
        since: f64,
        conversations: Option<Vec<String>>,
    ) -> Result<Vec<ConversationDelta>> {
        let conversation_ids = match conversations {
            Some(ids) => ids,
            None => {
                let user = Uuid::parse_str(user_id)
                    .map_err(|_| Error::invalid_input("user id is not a uuid"))?;
                self.conversations
                    .conversations_for_user(user)
                    .await?
                    .iter()
                    .map(Uuid::to_string)
                    .collect()
            },
        };

        let mut synced = Vec::with_capacity(conversation_ids.len());
        for conversation_id in conversation_ids {
            match self.sync_conversation(&conversation_id, since).await {
                Ok(messages) => synced.push(ConversationDelta {
                    conversation_id,
                    messages,
                }),
                Err(e) => {
                    warn!(conversation_id, error = %e, "sync: skipping conversation");
                },
            }
        }
        Ok(synced)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        chrono::{DateTime, Utc},
        parley_cache::InMemoryHotWindow,
        parley_storage::{InMemoryConversationStore, InMemoryMessageStore, NewMessage},
    };

    use super::*;

    const CID: &str = "11111111-1111-4111-8111-111111111111";
    const BOB: &str = "33333333-3333-4333-8333-333333333333";

    fn at(seconds: f64) -> DateTime<Utc> {
        epoch_to_datetime(seconds).unwrap()
    }

    fn payload(sent_at: f64) -> String {
        format!(
            r#"{{"conversation_id":"{CID}","sender_id":"{BOB}","content":"m{sent_at}","type":"text","sent_at":{sent_at},"origin_device_id":"dev"}}"#
        )
    }

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        hot: Arc<InMemoryHotWindow>,
        reader: HistoryReader,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMessageStore::new());
        let hot = Arc::new(InMemoryHotWindow::new());
        let reader = HistoryReader::new(
            store.clone(),
            Arc::new(InMemoryConversationStore::new()),
            hot.clone(),
        );
        Fixture { store, hot, reader }
    }

    async fn store_message(store: &InMemoryMessageStore, sent_at: f64) {
        store
            .insert(NewMessage {
                conversation_id: Uuid::parse_str(CID).unwrap(),
                sender_id: Uuid::parse_str(BOB).unwrap(),
                content: Some(format!("m{sent_at}")),
                kind: "text".into(),
                sent_at: at(sent_at),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sync_unions_cache_and_store_without_duplicates() {
        let f = fixture();
        // All three messages are in the store; the last two also in the hot
        // window, the offline-reconnect shape.
        for ts in [110.0, 150.0, 190.0] {
            store_message(&f.store, ts).await;
        }
        for ts in [150.0, 190.0] {
            f.hot.append(CID, &payload(ts), ts).await.unwrap();
        }

        let records = f.reader.sync_conversation(CID, 100.0).await.unwrap();
        let sent: Vec<f64> = records.iter().map(|r| r.sent_at).collect();
        assert_eq!(sent, vec![110.0, 150.0, 190.0]);

        // The cached entries came from the hot window (no id), the older one
        // from the store (id assigned).
        assert!(records[0].id.is_some());
        assert!(records[1].id.is_none());
        assert!(records[2].id.is_none());
    }

    #[tokio::test]
    async fn a_message_in_both_cache_and_store_appears_once() {
        let f = fixture();
        store_message(&f.store, 150.0).await;
        f.hot.append(CID, &payload(150.0), 150.0).await.unwrap();

        let records = f.reader.sync_conversation(CID, 100.0).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn empty_cache_falls_back_to_the_store_from_since() {
        let f = fixture();
        for ts in [110.0, 150.0] {
            store_message(&f.store, ts).await;
        }

        let records = f.reader.sync_conversation(CID, 120.0).await.unwrap();
        let sent: Vec<f64> = records.iter().map(|r| r.sent_at).collect();
        assert_eq!(sent, vec![150.0]);
    }

    #[tokio::test]
    async fn a_full_cache_window_skips_the_store_entirely() {
        let f = fixture();
        for i in 0..SYNC_LIMIT {
            let ts = 1000.0 + i as f64;
            f.hot.append(CID, &payload(ts), ts).await.unwrap();
        }
        // A store row newer than everything cached must not push the result
        // past the limit.
        store_message(&f.store, 5000.0).await;

        let records = f.reader.sync_conversation(CID, 0.0).await.unwrap();
        assert_eq!(records.len(), SYNC_LIMIT);
        assert!(records.iter().all(|r| r.sent_at < 5000.0));
    }

    #[tokio::test]
    async fn sync_user_skips_failing_conversations() {
        let f = fixture();
        store_message(&f.store, 110.0).await;

        let synced = f
            .reader
            .sync_user(
                BOB,
                100.0,
                Some(vec!["not-a-uuid".into(), CID.to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].conversation_id, CID);
        assert_eq!(synced[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn page_is_most_recent_first() {
        let f = fixture();
        for ts in [110.0, 190.0, 150.0] {
            store_message(&f.store, ts).await;
        }

        let records = f
            .reader
            .page(Uuid::parse_str(CID).unwrap(), 1, 2)
            .await
            .unwrap();
        let sent: Vec<f64> = records.iter().map(|r| r.sent_at).collect();
        assert_eq!(sent, vec![190.0, 150.0]);
    }
}
