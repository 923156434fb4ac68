//! HTTP surface of the presence registry.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::warn,
    uuid::Uuid,
};

use crate::Presence;

type Registry = Arc<dyn Presence>;
type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn reject(status: StatusCode, detail: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": detail })))
}

fn internal(context: &str, error: &crate::Error) -> (StatusCode, Json<Value>) {
    warn!(error = %error, "presence: {context} failed");
    reject(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// Build the registry router.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/presence/online", post(online))
        .route("/presence/offline", post(offline))
        .route("/presence/heartbeat", post(heartbeat))
        .route("/presence/nodes", get(nodes))
        .route("/presence/{user_id}", get(get_user))
        .with_state(registry)
}

async fn health() -> &'static str {
    "parley-presence ok"
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    user_id: String,
    node_id: String,
    device_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    user_id: String,
    node_id: String,
    device_id: String,
}

fn require_uuid(user_id: &str) -> Result<(), (StatusCode, Json<Value>)> {
    Uuid::parse_str(user_id)
        .map(|_| ())
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "Invalid user UUID"))
}

async fn online(State(registry): State<Registry>, Json(body): Json<StatusBody>) -> ApiResult {
    if !body.status.eq_ignore_ascii_case("online") {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Use status='online' or call /presence/offline.",
        ));
    }
    require_uuid(&body.user_id)?;
    registry
        .mark_online(&body.user_id, &body.device_id, &body.node_id)
        .await
        .map_err(|e| internal("mark online", &e))?;
    Ok(Json(json!({ "detail": "User/device is online" })))
}

async fn offline(State(registry): State<Registry>, Json(body): Json<StatusBody>) -> ApiResult {
    if !body.status.eq_ignore_ascii_case("offline") {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Use status='offline' or call /presence/online.",
        ));
    }
    require_uuid(&body.user_id)?;
    registry
        .mark_offline(&body.user_id, &body.device_id, &body.node_id)
        .await
        .map_err(|e| internal("mark offline", &e))?;
    Ok(Json(json!({ "detail": "User/device is offline" })))
}

async fn heartbeat(State(registry): State<Registry>, Json(body): Json<HeartbeatBody>) -> ApiResult {
    require_uuid(&body.user_id)?;
    registry
        .heartbeat(&body.user_id, &body.device_id, &body.node_id)
        .await
        .map_err(|e| internal("heartbeat", &e))?;
    Ok(Json(json!({ "detail": "Heartbeat updated" })))
}

async fn get_user(State(registry): State<Registry>, Path(user_id): Path<String>) -> ApiResult {
    require_uuid(&user_id)?;
    let records = registry
        .get_user(&user_id)
        .await
        .map_err(|e| internal("get user", &e))?;
    if records.is_empty() {
        return Err(reject(
            StatusCode::NOT_FOUND,
            "No presence record found for this user",
        ));
    }
    Ok(Json(json!(records)))
}

#[derive(Debug, Deserialize)]
struct NodesQuery {
    /// Comma-separated user ids.
    user_ids: String,
    sender_id: Option<String>,
    origin_device_id: Option<String>,
}

async fn nodes(
    State(registry): State<Registry>,
    Query(query): Query<NodesQuery>,
) -> Result<Json<HashMap<String, Vec<parley_protocol::DeviceRef>>>, (StatusCode, Json<Value>)> {
    // Malformed ids are skipped rather than failing the whole grouping.
    let user_ids: Vec<String> = query
        .user_ids
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && Uuid::parse_str(raw).is_ok())
        .map(str::to_string)
        .collect();

    let map = registry
        .node_map(
            &user_ids,
            query.sender_id.as_deref(),
            query.origin_device_id.as_deref(),
        )
        .await
        .map_err(|e| internal("node map", &e))?;
    Ok(Json(map))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        axum::{
            body::Body,
            http::{Request, StatusCode, header},
        },
        tower::ServiceExt,
    };

    use super::*;
    use crate::InMemoryPresence;

    const ALICE: &str = "7e57ab1e-0000-4000-8000-000000000001";
    const BOB: &str = "7e57ab1e-0000-4000-8000-000000000002";

    fn app() -> Router {
        router(Arc::new(InMemoryPresence::new()))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn online_then_lookup_round_trips() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/presence/online",
                json!({
                    "user_id": ALICE,
                    "node_id": "n1",
                    "device_id": "devA1",
                    "status": "online"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/presence/{ALICE}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let records = body_json(response).await;
        assert_eq!(records[0]["device_id"], "devA1");
        assert_eq!(records[0]["status"], "online");
    }

    #[tokio::test]
    async fn online_endpoint_rejects_wrong_status() {
        let response = app()
            .oneshot(post_json(
                "/presence/online",
                json!({
                    "user_id": ALICE,
                    "node_id": "n1",
                    "device_id": "devA1",
                    "status": "offline"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri(format!("/presence/{ALICE}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_uuid_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/presence/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn nodes_groups_and_excludes_the_origin_device() {
        let registry = Arc::new(InMemoryPresence::new());
        let app = router(registry.clone());

        registry.mark_online(ALICE, "devA1", "n1").await.unwrap();
        registry.mark_online(ALICE, "devA2", "n2").await.unwrap();
        registry.mark_online(BOB, "devB1", "n2").await.unwrap();

        let uri = format!(
            "/presence/nodes?user_ids={ALICE},{BOB},junk&sender_id={ALICE}&origin_device_id=devA1"
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let map = body_json(response).await;
        assert!(map.get("n1").is_none());
        assert_eq!(map["n2"].as_array().unwrap().len(), 2);
    }
}
