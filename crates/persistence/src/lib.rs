//! The persistence worker: drain the durable persistence queue, land every
//! accepted message in the ordered store and the hot window, and ack.
//!
//! Poison messages are acked and dropped so they cannot stall the queue.
//! Store failures are nacked back for redelivery. Each consumption inserts
//! a row under a freshly generated id, so a broker redelivery produces a
//! duplicate row; the hot window absorbs the replay through set semantics,
//! the store does not.

use std::sync::Arc;

use {
    amqprs::{
        BasicProperties, Deliver,
        channel::{BasicAckArguments, BasicNackArguments, Channel},
        consumer::AsyncConsumer,
    },
    async_trait::async_trait,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    uuid::Uuid,
};

use {
    parley_broker::{QueueSpec, consume_with_reconnect},
    parley_cache::HotWindow,
    parley_config::BrokerSettings,
    parley_protocol::{
        PERSISTENCE_EXCHANGE, PERSISTENCE_QUEUE, PERSISTENCE_ROUTING_KEY, epoch_to_datetime,
    },
    parley_storage::{MessageStore, NewMessage},
};

/// What to do with a consumed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled (or poison): acknowledge and move on.
    Ack,
    /// Transient store failure: leave unacked for redelivery.
    Requeue,
}

/// The fields persistence needs from a payload. Decoding is tolerant of
/// extra fields (`toUser`, `origin_device_id`, ...); the raw payload string
/// is what lands in the hot window.
#[derive(Debug, Deserialize)]
struct PersistRecord {
    conversation_id: String,
    sender_id: String,
    content: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    sent_at: f64,
}

/// Land one payload in the hot window and the ordered store.
///
/// A hot-window failure only logs: the store write is the authoritative
/// side. A store failure requeues.
pub async fn process(hot: &dyn HotWindow, store: &dyn MessageStore, content: &[u8]) -> Outcome {
    let Ok(payload) = std::str::from_utf8(content) else {
        warn!("persistence: non-utf8 payload, dropping");
        return Outcome::Ack;
    };
    let record: PersistRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "persistence: undecodable payload, dropping");
            return Outcome::Ack;
        },
    };
    let (Ok(conversation_id), Ok(sender_id)) = (
        Uuid::parse_str(&record.conversation_id),
        Uuid::parse_str(&record.sender_id),
    ) else {
        warn!(
            conversation_id = %record.conversation_id,
            "persistence: non-uuid ids, dropping"
        );
        return Outcome::Ack;
    };
    let Some(sent_at) = epoch_to_datetime(record.sent_at) else {
        warn!(sent_at = record.sent_at, "persistence: unrepresentable timestamp, dropping");
        return Outcome::Ack;
    };

    if let Err(e) = hot
        .append(&record.conversation_id, payload, record.sent_at)
        .await
    {
        warn!(error = %e, "persistence: hot window append failed, store remains authoritative");
    }

    match store
        .insert(NewMessage {
            conversation_id,
            sender_id,
            content: record.content,
            kind: record.kind,
            sent_at,
        })
        .await
    {
        Ok(row) => {
            debug!(message_id = %row.id, conversation_id = %conversation_id, "persistence: stored");
            Outcome::Ack
        },
        Err(e) => {
            warn!(error = %e, "persistence: store insert failed, requeueing");
            Outcome::Requeue
        },
    }
}

/// Queue consumer wrapping [`process`].
pub struct PersistenceConsumer {
    hot: Arc<dyn HotWindow>,
    store: Arc<dyn MessageStore>,
}

impl PersistenceConsumer {
    #[must_use]
    pub fn new(hot: Arc<dyn HotWindow>, store: Arc<dyn MessageStore>) -> Self {
        Self { hot, store }
    }
}

#[async_trait]
impl AsyncConsumer for PersistenceConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let outcome = process(self.hot.as_ref(), self.store.as_ref(), &content).await;
        let result = match outcome {
            Outcome::Ack => {
                channel
                    .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
                    .await
            },
            Outcome::Requeue => {
                channel
                    .basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true))
                    .await
            },
        };
        if let Err(e) = result {
            warn!(error = %e, "persistence: ack/nack failed");
        }
    }
}

/// Run the worker until cancelled.
pub async fn run(
    broker: BrokerSettings,
    hot: Arc<dyn HotWindow>,
    store: Arc<dyn MessageStore>,
    cancel: CancellationToken,
) -> parley_broker::Result<()> {
    let spec = QueueSpec {
        exchange: PERSISTENCE_EXCHANGE.to_string(),
        queue: PERSISTENCE_QUEUE.to_string(),
        routing_key: PERSISTENCE_ROUTING_KEY.to_string(),
    };
    consume_with_reconnect(
        broker,
        spec,
        "persistence-worker",
        || PersistenceConsumer::new(Arc::clone(&hot), Arc::clone(&store)),
        cancel,
    )
    .await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        parley_cache::InMemoryHotWindow,
        parley_storage::{InMemoryMessageStore, Result as StoreResult, StoredMessage},
    };

    use super::*;

    const CID: &str = "11111111-1111-4111-8111-111111111111";
    const ALICE: &str = "22222222-2222-4222-8222-222222222222";

    fn payload(sent_at: f64) -> String {
        format!(
            r#"{{"conversation_id":"{CID}","sender_id":"{ALICE}","toUser":"bob","content":"hi","type":"text","sent_at":{sent_at},"origin_device_id":"devA1"}}"#
        )
    }

    #[tokio::test]
    async fn stores_and_caches_an_accepted_payload() {
        let hot = InMemoryHotWindow::new();
        let store = InMemoryMessageStore::new();

        let outcome = process(&hot, &store, payload(100.0).as_bytes()).await;
        assert_eq!(outcome, Outcome::Ack);

        let cid = Uuid::parse_str(CID).unwrap();
        assert_eq!(store.row_count(cid), 1);
        let cached = hot.after(CID, 0.0).await.unwrap();
        assert_eq!(cached, vec![payload(100.0)]);
    }

    #[tokio::test]
    async fn poison_payloads_are_acked_and_dropped() {
        let hot = InMemoryHotWindow::new();
        let store = InMemoryMessageStore::new();

        for bad in [
            &b"not json"[..],
            br#"{"conversation_id":"not-a-uuid","sender_id":"also-not","type":"text","sent_at":1.0}"#,
            &[0xff, 0xfe],
        ] {
            assert_eq!(process(&hot, &store, bad).await, Outcome::Ack);
        }
        assert_eq!(store.row_count(Uuid::parse_str(CID).unwrap()), 0);
    }

    #[tokio::test]
    async fn replay_duplicates_the_store_row_but_not_the_hot_window() {
        let hot = InMemoryHotWindow::new();
        let store = InMemoryMessageStore::new();

        let body = payload(100.0);
        assert_eq!(process(&hot, &store, body.as_bytes()).await, Outcome::Ack);
        assert_eq!(process(&hot, &store, body.as_bytes()).await, Outcome::Ack);

        // Known behavior: redelivery means a second row under a fresh id,
        // while the payload-keyed hot window stays a set.
        assert_eq!(store.row_count(Uuid::parse_str(CID).unwrap()), 2);
        assert_eq!(hot.after(CID, 0.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_requeues_without_acking() {
        struct FailingStore;

        #[async_trait]
        impl MessageStore for FailingStore {
            async fn insert(&self, _: NewMessage) -> StoreResult<StoredMessage> {
                Err(parley_storage::Error::not_found("database"))
            }
            async fn page(&self, _: Uuid, _: u32, _: u32) -> StoreResult<Vec<StoredMessage>> {
                Ok(Vec::new())
            }
            async fn after(
                &self,
                _: Uuid,
                _: chrono::DateTime<chrono::Utc>,
                _: u32,
            ) -> StoreResult<Vec<StoredMessage>> {
                Ok(Vec::new())
            }
        }

        let hot = InMemoryHotWindow::new();
        let outcome = process(&hot, &FailingStore, payload(100.0).as_bytes()).await;
        assert_eq!(outcome, Outcome::Requeue);
        // The hot window write still happened; the store stays authoritative
        // on retry.
        assert_eq!(hot.after(CID, 0.0).await.unwrap().len(), 1);
    }
}
