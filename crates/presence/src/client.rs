//! HTTP client for the presence registry, used by chat nodes.
//!
//! Lifecycle updates are best effort: the socket endpoint logs failures and
//! keeps serving. Node-map lookups are on the fan-out hot path; the caller
//! degrades a failed lookup to an empty map, which routes the affected
//! recipients to push fallback.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde_json::json,
};

use crate::{DeviceRecord, NodeMap, Presence, Result};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpPresence {
    base: String,
    http: reqwest::Client,
}

impl HttpPresence {
    /// `base` is the registry root, e.g. `http://presence:8200`.
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post_status(
        &self,
        path: &str,
        user_id: &str,
        device_id: &str,
        node_id: &str,
        status: Option<&str>,
    ) -> Result<()> {
        let mut body = json!({
            "user_id": user_id,
            "device_id": device_id,
            "node_id": node_id,
        });
        if let Some(status) = status {
            body["status"] = json!(status);
        }
        self.http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Presence for HttpPresence {
    async fn mark_online(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.post_status("/presence/online", user_id, device_id, node_id, Some("online"))
            .await
    }

    async fn mark_offline(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.post_status("/presence/offline", user_id, device_id, node_id, Some("offline"))
            .await
    }

    async fn heartbeat(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.post_status("/presence/heartbeat", user_id, device_id, node_id, None)
            .await
    }

    async fn get_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        let records = self
            .http
            .get(format!("{}/presence/{user_id}", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(records)
    }

    async fn node_map(
        &self,
        user_ids: &[String],
        sender_id: Option<&str>,
        origin_device_id: Option<&str>,
    ) -> Result<NodeMap> {
        let mut query = vec![("user_ids", user_ids.join(","))];
        if let Some(sender_id) = sender_id {
            query.push(("sender_id", sender_id.to_string()));
        }
        if let Some(origin_device_id) = origin_device_id {
            query.push(("origin_device_id", origin_device_id.to_string()));
        }

        let map = self
            .http
            .get(format!("{}/presence/nodes", self.base))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(map)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn node_map_parses_the_grouped_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/presence/nodes")
            .match_query(mockito::Matcher::UrlEncoded(
                "user_ids".into(),
                "alice,bob".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"n1":[{"user_id":"bob","device_id":"devB1"}]}"#)
            .create_async()
            .await;

        let client = HttpPresence::new(&server.url()).unwrap();
        let map = client
            .node_map(&["alice".into(), "bob".into()], Some("alice"), Some("devA1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(map["n1"][0].device_id, "devB1");
    }

    #[tokio::test]
    async fn server_errors_surface_to_the_caller() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/presence/online")
            .with_status(500)
            .create_async()
            .await;

        let client = HttpPresence::new(&server.url()).unwrap();
        let result = client.mark_online("alice", "devA1", "n1").await;
        assert!(result.is_err());
    }
}
