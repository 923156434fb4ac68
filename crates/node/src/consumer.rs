//! Consumer side of one node: drain the per-node queue and hand payloads to
//! locally-attached device sockets.

use std::sync::Arc;

use {
    amqprs::{
        BasicProperties, Deliver,
        channel::{BasicAckArguments, Channel},
        consumer::AsyncConsumer,
    },
    async_trait::async_trait,
    tracing::{debug, warn},
};

use parley_protocol::{CHAT_EVENT, DeviceRef, NodeMessage};

use crate::{NodeContext, table::SocketTable};

/// Consumer bound to `<node_id>-queue`. Envelopes are acked after every
/// delivery has been attempted; a target without a live local socket is
/// dropped silently; that device resyncs through the history reader.
pub struct NodeConsumer {
    context: Arc<NodeContext>,
}

impl NodeConsumer {
    #[must_use]
    pub fn new(context: Arc<NodeContext>) -> Self {
        Self { context }
    }

    async fn handle(&self, content: &[u8]) {
        let envelope: NodeMessage = match serde_json::from_slice(content) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "consumer: undecodable envelope, dropping");
                return;
            },
        };
        if envelope.event_type != CHAT_EVENT || envelope.target_devices.is_empty() {
            warn!(
                event_type = %envelope.event_type,
                targets = envelope.target_devices.len(),
                "consumer: unexpected envelope, dropping"
            );
            return;
        }

        let payload = match serde_json::to_string(&envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "consumer: payload re-serialization failed");
                return;
            },
        };
        deliver_local(&self.context.table, &payload, &envelope.target_devices).await;
    }
}

/// Send `payload` to each target device attached to this node. Missing and
/// closed sockets drop silently.
pub async fn deliver_local(table: &SocketTable, payload: &str, targets: &[DeviceRef]) {
    for target in targets {
        let Some(sender) = table.sender(&target.user_id, &target.device_id).await else {
            debug!(
                user_id = %target.user_id,
                device_id = %target.device_id,
                "consumer: no local socket, dropping"
            );
            continue;
        };
        if sender.send(payload.to_string()).is_err() {
            debug!(
                user_id = %target.user_id,
                device_id = %target.device_id,
                "consumer: socket closed mid-delivery, dropping"
            );
        } else {
            debug!(
                user_id = %target.user_id,
                device_id = %target.device_id,
                "consumer: delivered"
            );
        }
    }
}

#[async_trait]
impl AsyncConsumer for NodeConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        self.handle(&content).await;
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false))
            .await
        {
            warn!(error = %e, "consumer: ack failed");
        }
    }
}
