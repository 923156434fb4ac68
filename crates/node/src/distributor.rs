//! Send path: persistence enqueue, presence grouping, per-node fan-out and
//! push fallback.
//!
//! Recipient discovery always goes through presence, never through the local
//! socket table. The table exists only for consumer-side delivery.

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, warn};

use {
    parley_broker::Publisher,
    parley_presence::{NodeMap, Presence},
    parley_protocol::{ChatMessage, NodeMessage, PERSISTENCE_ROUTING_KEY},
};

use crate::{
    Result,
    membership::MembershipDirectory,
    push::{PushEvent, PushSink},
};

pub struct Distributor {
    delivery: Arc<dyn Publisher>,
    persistence: Arc<dyn Publisher>,
    presence: Arc<dyn Presence>,
    membership: Arc<dyn MembershipDirectory>,
    push: Arc<dyn PushSink>,
}

impl Distributor {
    #[must_use]
    pub fn new(
        delivery: Arc<dyn Publisher>,
        persistence: Arc<dyn Publisher>,
        presence: Arc<dyn Presence>,
        membership: Arc<dyn MembershipDirectory>,
        push: Arc<dyn PushSink>,
    ) -> Self {
        Self {
            delivery,
            persistence,
            presence,
            membership,
            push,
        }
    }

    /// Accept a stamped message: enqueue it for persistence, then fan it out.
    ///
    /// A failed persistence enqueue rejects the whole send; the client
    /// retries by resending. Fan-out failures past that point degrade to
    /// logs and push fallback; recipients converge through sync.
    pub async fn dispatch(&self, message: &ChatMessage) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        self.persistence.publish(PERSISTENCE_ROUTING_KEY, body).await?;
        self.distribute(message).await;
        Ok(())
    }

    /// Fan a message out to every destination node, and to push for
    /// recipients with no online device.
    pub async fn distribute(&self, message: &ChatMessage) {
        let recipients = self.recipient_set(message).await;
        if recipients.is_empty() {
            warn!(
                conversation_id = %message.conversation_id,
                "distribute: no recipients resolved"
            );
            return;
        }

        // A failed or timed-out lookup degrades to an empty map: every
        // recipient but the sender falls through to push.
        let node_map = match self
            .presence
            .node_map(
                &recipients,
                Some(&message.sender_id),
                Some(&message.origin_device_id),
            )
            .await
        {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "distribute: presence lookup failed, assuming no online devices");
                NodeMap::new()
            },
        };

        for (node_id, devices) in &node_map {
            let envelope = NodeMessage::chat(message.clone(), devices.clone());
            let body = match serde_json::to_vec(&envelope) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "distribute: envelope serialization failed");
                    continue;
                },
            };
            match self.delivery.publish(node_id, body).await {
                Ok(()) => debug!(
                    node_id = %node_id,
                    devices = devices.len(),
                    "distribute: envelope published"
                ),
                Err(e) => warn!(
                    node_id = %node_id,
                    error = %e,
                    "distribute: envelope publish failed"
                ),
            }
        }

        self.push_offline(message, &recipients, &node_map).await;
    }

    /// Recipient users for one send: the sender alone for a self-send, the
    /// pair for a direct send, the conversation members for a group send.
    async fn recipient_set(&self, message: &ChatMessage) -> Vec<String> {
        match &message.to_user {
            Some(to_user) if *to_user == message.sender_id => vec![message.sender_id.clone()],
            Some(to_user) => vec![message.sender_id.clone(), to_user.clone()],
            None => self.membership.members(&message.conversation_id).await,
        }
    }

    /// Emit a push event for every recipient with no node-map entry. The
    /// sender never gets one: they are online by definition, even when the
    /// origin-device exclusion removed their only entry.
    async fn push_offline(&self, message: &ChatMessage, recipients: &[String], map: &NodeMap) {
        let online: HashSet<&str> = map
            .values()
            .flatten()
            .map(|device| device.user_id.as_str())
            .collect();

        for user_id in recipients {
            if *user_id == message.sender_id || online.contains(user_id.as_str()) {
                continue;
            }
            let event = PushEvent {
                user_id: user_id.clone(),
                payload: message.clone(),
            };
            if let Err(e) = self.push.notify(event).await {
                warn!(user_id = %user_id, error = %e, "push: dispatch failed");
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use parley_presence::{InMemoryPresence, Result as PresenceResult};

    use super::*;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingPublisher {
        fn routed(&self) -> Vec<(String, NodeMessage)> {
            let published = self.published.lock().unwrap();
            published
                .iter()
                .map(|(key, body)| (key.clone(), serde_json::from_slice(body).unwrap()))
                .collect()
        }

        fn bodies(&self) -> Vec<Vec<u8>> {
            let published = self.published.lock().unwrap();
            published.iter().map(|(_, body)| body.clone()).collect()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, routing_key: &str, body: Vec<u8>) -> parley_broker::Result<()> {
            let mut published = self.published.lock().unwrap();
            published.push((routing_key.to_string(), body));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPush {
        events: Mutex<Vec<String>>,
    }

    impl RecordingPush {
        fn users(&self) -> Vec<String> {
            let mut users = self.events.lock().unwrap().clone();
            users.sort();
            users
        }
    }

    #[async_trait]
    impl PushSink for RecordingPush {
        async fn notify(&self, event: PushEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.user_id);
            Ok(())
        }
    }

    struct FixedMembership(Vec<String>);

    #[async_trait]
    impl MembershipDirectory for FixedMembership {
        async fn members(&self, _conversation_id: &str) -> Vec<String> {
            self.0.clone()
        }
    }

    struct FailingPresence;

    #[async_trait]
    impl Presence for FailingPresence {
        async fn mark_online(&self, _: &str, _: &str, _: &str) -> PresenceResult<()> {
            Ok(())
        }
        async fn mark_offline(&self, _: &str, _: &str, _: &str) -> PresenceResult<()> {
            Ok(())
        }
        async fn get_user(&self, _: &str) -> PresenceResult<Vec<parley_presence::DeviceRecord>> {
            Ok(Vec::new())
        }
        async fn node_map(
            &self,
            _: &[String],
            _: Option<&str>,
            _: Option<&str>,
        ) -> PresenceResult<NodeMap> {
            Err(parley_presence::Error::malformed("lookup", "unreachable"))
        }
    }

    struct Harness {
        delivery: Arc<RecordingPublisher>,
        persistence: Arc<RecordingPublisher>,
        push: Arc<RecordingPush>,
        distributor: Distributor,
    }

    fn harness(presence: Arc<dyn Presence>, members: Vec<&str>) -> Harness {
        let delivery = Arc::new(RecordingPublisher::default());
        let persistence = Arc::new(RecordingPublisher::default());
        let push = Arc::new(RecordingPush::default());
        let distributor = Distributor::new(
            delivery.clone(),
            persistence.clone(),
            presence,
            Arc::new(FixedMembership(
                members.into_iter().map(String::from).collect(),
            )),
            push.clone(),
        );
        Harness {
            delivery,
            persistence,
            push,
            distributor,
        }
    }

    fn message(to_user: Option<&str>) -> ChatMessage {
        ChatMessage {
            conversation_id: "c1".into(),
            sender_id: "alice".into(),
            to_user: to_user.map(String::from),
            content: Some("hi".into()),
            kind: "text".into(),
            sent_at: 100.0,
            origin_device_id: "devA1".into(),
        }
    }

    #[tokio::test]
    async fn direct_send_reaches_every_node_of_the_recipient() {
        let presence = Arc::new(InMemoryPresence::new());
        presence.mark_online("alice", "devA1", "n1").await.unwrap();
        presence.mark_online("bob", "devB1", "n2").await.unwrap();
        presence.mark_online("bob", "devB2", "n3").await.unwrap();

        let h = harness(presence, vec![]);
        h.distributor.dispatch(&message(Some("bob"))).await.unwrap();

        // The payload was enqueued for persistence exactly once.
        assert_eq!(h.persistence.bodies().len(), 1);
        let stored: ChatMessage = serde_json::from_slice(&h.persistence.bodies()[0]).unwrap();
        assert_eq!(stored.sender_id, "alice");

        // One envelope per destination node, each carrying only that node's
        // devices; alice's origin device is excluded everywhere.
        let mut routed = h.delivery.routed();
        routed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].0, "n2");
        assert_eq!(routed[0].1.target_devices[0].device_id, "devB1");
        assert_eq!(routed[1].0, "n3");
        assert_eq!(routed[1].1.payload, message(Some("bob")));
        assert!(h.push.users().is_empty());
    }

    #[tokio::test]
    async fn self_send_syncs_other_devices_but_never_echoes_the_origin() {
        let presence = Arc::new(InMemoryPresence::new());
        presence.mark_online("alice", "devA1", "n1").await.unwrap();
        presence.mark_online("alice", "devA2", "n2").await.unwrap();

        let h = harness(presence, vec![]);
        h.distributor.dispatch(&message(Some("alice"))).await.unwrap();

        let routed = h.delivery.routed();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, "n2");
        assert_eq!(routed[0].1.target_devices, vec![
            parley_protocol::DeviceRef::new("alice", "devA2")
        ]);
        // The sender is online by definition: no push for alice.
        assert!(h.push.users().is_empty());
    }

    #[tokio::test]
    async fn group_send_pushes_only_fully_offline_members() {
        let presence = Arc::new(InMemoryPresence::new());
        presence.mark_online("alice", "devA1", "n1").await.unwrap();
        presence.mark_online("bob", "devB1", "n2").await.unwrap();
        presence.mark_offline("carol", "devC1", "n1").await.unwrap();

        let h = harness(presence, vec!["alice", "bob", "carol"]);
        h.distributor.dispatch(&message(None)).await.unwrap();

        let routed = h.delivery.routed();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, "n2");
        assert_eq!(h.push.users(), vec!["carol".to_string()]);
    }

    #[tokio::test]
    async fn presence_failure_degrades_to_push_for_everyone_but_the_sender() {
        let h = harness(Arc::new(FailingPresence), vec!["alice", "bob", "carol"]);
        h.distributor.dispatch(&message(None)).await.unwrap();

        assert!(h.delivery.routed().is_empty());
        assert_eq!(h.push.users(), vec!["bob".to_string(), "carol".to_string()]);
        // The send itself was still accepted for persistence.
        assert_eq!(h.persistence.bodies().len(), 1);
    }

    #[tokio::test]
    async fn persistence_enqueue_failure_rejects_the_send() {
        struct FailingPublisher;

        #[async_trait]
        impl Publisher for FailingPublisher {
            async fn publish(&self, _: &str, _: Vec<u8>) -> parley_broker::Result<()> {
                Err(parley_broker::Error::ConnectionLost)
            }
        }

        let presence = Arc::new(InMemoryPresence::new());
        let delivery = Arc::new(RecordingPublisher::default());
        let push = Arc::new(RecordingPush::default());
        let distributor = Distributor::new(
            delivery.clone(),
            Arc::new(FailingPublisher),
            presence,
            Arc::new(FixedMembership(vec![])),
            push,
        );

        let result = distributor.dispatch(&message(Some("bob"))).await;
        assert!(result.is_err());
        // Nothing was fanned out for a send that was never accepted.
        assert!(delivery.routed().is_empty());
    }
}
