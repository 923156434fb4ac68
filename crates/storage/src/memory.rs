//! In-memory stores for tests and single-process development.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

use crate::{
    Conversation, ConversationKind, Error, MessageStore, NewMessage, Result, StoredMessage,
    conversations::{ConversationStore, validate_direct},
};

// ── Messages ─────────────────────────────────────────────────────────────────

/// Message store backed by a `Vec`. No persistence.
#[derive(Default)]
pub struct InMemoryMessageStore {
    rows: Mutex<Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows for a conversation, for duplicate-row assertions.
    pub fn row_count(&self, conversation_id: Uuid) -> usize {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<StoredMessage> {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            sent_at: message.sent_at,
        };
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<StoredMessage>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<StoredMessage> = rows
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then_with(|| b.id.cmp(&a.id)));

        let offset = (page.saturating_sub(1) as usize) * size as usize;
        Ok(matching.into_iter().skip(offset).take(size as usize).collect())
    }

    async fn after(
        &self,
        conversation_id: Uuid,
        pivot: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<StoredMessage> = rows
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.sent_at > pivot)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

// ── Conversations ────────────────────────────────────────────────────────────

#[derive(Default)]
struct ConversationTable {
    conversations: HashMap<Uuid, Conversation>,
    members: HashMap<Uuid, Vec<Uuid>>,
}

/// Conversation store backed by `HashMap`s. No persistence.
#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: Mutex<ConversationTable>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(
        &self,
        name: Option<String>,
        kind: ConversationKind,
        user_ids: &[Uuid],
    ) -> Result<Conversation> {
        validate_direct(kind, user_ids)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if kind == ConversationKind::Direct {
            let pair: HashSet<Uuid> = user_ids.iter().copied().collect();
            let existing = inner.conversations.values().find(|c| {
                c.kind == ConversationKind::Direct
                    && inner
                        .members
                        .get(&c.id)
                        .is_some_and(|m| m.iter().copied().collect::<HashSet<_>>() == pair)
            });
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            name,
            kind,
            created_at: Utc::now(),
        };
        let mut members: Vec<Uuid> = Vec::new();
        for user_id in user_ids {
            if !members.contains(user_id) {
                members.push(*user_id);
            }
        }
        inner.members.insert(conversation.id, members);
        inner.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.conversations.get(&id).cloned())
    }

    async fn members(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.members.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn add_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(Error::not_found("Conversation"));
        }
        let members = inner.members.entry(conversation_id).or_default();
        for user_id in user_ids {
            if !members.contains(user_id) {
                members.push(*user_id);
            }
        }
        Ok(())
    }

    async fn remove_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = inner.members.get_mut(&conversation_id) {
            members.retain(|m| !user_ids.contains(m));
        }
        Ok(())
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<Uuid> = inner
            .members
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn message(conversation_id: Uuid, sent_at: f64) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id: Uuid::new_v4(),
            content: Some(format!("m@{sent_at}")),
            kind: "text".into(),
            sent_at: at(sent_at),
        }
    }

    fn at(seconds: f64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros((seconds * 1_000_000.0) as i64).unwrap()
    }

    #[tokio::test]
    async fn page_returns_most_recent_first() {
        let store = InMemoryMessageStore::new();
        let cid = Uuid::new_v4();
        for ts in [10.0, 30.0, 20.0] {
            store.insert(message(cid, ts)).await.unwrap();
        }

        let page = store.page(cid, 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].sent_at > page[1].sent_at);

        let second = store.page(cid, 2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sent_at, at(10.0));
    }

    #[tokio::test]
    async fn after_is_strict_ascending_and_limited() {
        let store = InMemoryMessageStore::new();
        let cid = Uuid::new_v4();
        for ts in [110.0, 150.0, 190.0] {
            store.insert(message(cid, ts)).await.unwrap();
        }

        let rows = store.after(cid, at(110.0), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sent_at, at(150.0));

        let limited = store.after(cid, at(0.0), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sent_at, at(110.0));
    }

    #[tokio::test]
    async fn direct_conversation_is_unique_per_pair() {
        let store = InMemoryConversationStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store
            .create(None, ConversationKind::Direct, &[alice, bob])
            .await
            .unwrap();
        // Second creation, either member order, returns the first.
        let second = store
            .create(None, ConversationKind::Direct, &[bob, alice])
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        // A different pair still gets its own conversation.
        let carol = Uuid::new_v4();
        let other = store
            .create(None, ConversationKind::Direct, &[alice, carol])
            .await
            .unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn direct_conversation_requires_two_distinct_users() {
        let store = InMemoryConversationStore::new();
        let alice = Uuid::new_v4();

        let result = store
            .create(None, ConversationKind::Direct, &[alice, alice])
            .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn membership_add_and_remove() {
        let store = InMemoryConversationStore::new();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let group = store
            .create(Some("g1".into()), ConversationKind::Group, &[alice, bob])
            .await
            .unwrap();

        store.add_members(group.id, &[bob, carol]).await.unwrap();
        let mut members = store.members(group.id).await.unwrap();
        members.sort();
        let mut expected = vec![alice, bob, carol];
        expected.sort();
        assert_eq!(members, expected);

        store.remove_members(group.id, &[bob]).await.unwrap();
        assert_eq!(store.members(group.id).await.unwrap().len(), 2);

        assert_eq!(store.conversations_for_user(carol).await.unwrap(), vec![group.id]);
        assert!(store.conversations_for_user(bob).await.unwrap().is_empty());
    }
}
