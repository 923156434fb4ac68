//! The only contract the send path needs from the conversation service:
//! "who belongs to this conversation".

use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::warn,
    uuid::Uuid,
};

use parley_storage::ConversationStore;

#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Member user ids of a conversation, as wire strings. Unknown
    /// conversations resolve to an empty set.
    async fn members(&self, conversation_id: &str) -> Vec<String>;
}

/// Membership lookups backed by the conversation store.
pub struct StoreMembership {
    store: Arc<dyn ConversationStore>,
}

impl StoreMembership {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MembershipDirectory for StoreMembership {
    async fn members(&self, conversation_id: &str) -> Vec<String> {
        let Ok(id) = Uuid::parse_str(conversation_id) else {
            warn!(conversation_id, "membership: conversation id is not a uuid");
            return Vec::new();
        };
        match self.store.members(id).await {
            Ok(members) => members.iter().map(Uuid::to_string).collect(),
            Err(e) => {
                warn!(conversation_id, error = %e, "membership: lookup failed");
                Vec::new()
            },
        }
    }
}
