//! HTTP surface of the sync/history service, plus the conversation routes
//! that own membership.

use std::sync::Arc;

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

use parley_storage::ConversationKind;

use crate::{Error, HistoryReader};

type Reader = Arc<HistoryReader>;
type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

fn reject(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(json!({ "detail": detail.into() })))
}

fn map_error(context: &str, error: &Error) -> ApiError {
    match error {
        Error::InvalidInput { message } => reject(StatusCode::BAD_REQUEST, message.clone()),
        _ => {
            warn!(error = %error, "history: {context} failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, context)
        },
    }
}

fn map_store_error(context: &str, error: &parley_storage::Error) -> ApiError {
    match error {
        parley_storage::Error::InvalidInput { message } => {
            reject(StatusCode::BAD_REQUEST, message.clone())
        },
        parley_storage::Error::NotFound { what } => {
            reject(StatusCode::NOT_FOUND, format!("{what} not found"))
        },
        parley_storage::Error::Sqlx(_) => {
            warn!(error = %error, "history: {context} failed");
            reject(StatusCode::INTERNAL_SERVER_ERROR, context)
        },
    }
}

/// Build the history router.
pub fn router(reader: Reader) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/conversations", post(create_conversation))
        .route("/conversations/{conversation_id}", get(get_conversation))
        .route("/conversations/{conversation_id}/members", post(update_members))
        .route("/conversations/{conversation_id}/messages", get(paginated_messages))
        .route("/sync", get(sync))
        .with_state(reader)
}

async fn health() -> &'static str {
    "parley-history ok"
}

// ── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    size: Option<u32>,
}

async fn paginated_messages(
    State(reader): State<Reader>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(50);
    if page < 1 {
        return Err(reject(StatusCode::BAD_REQUEST, "page must be >= 1"));
    }
    if size < 1 || size > 100 {
        return Err(reject(StatusCode::BAD_REQUEST, "size must be between 1 and 100"));
    }

    let records = reader
        .page(conversation_id, page, size)
        .await
        .map_err(|e| map_error("paginated read", &e))?;
    Ok(Json(json!(records)))
}

#[derive(Debug, Deserialize)]
struct SyncQuery {
    user_id: String,
    since: f64,
    conversations: Option<String>,
}

async fn sync(State(reader): State<Reader>, Query(query): Query<SyncQuery>) -> ApiResult {
    let conversations = query.conversations.map(|csv| {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let synced = reader
        .sync_user(&query.user_id, query.since, conversations)
        .await
        .map_err(|e| map_error("sync", &e))?;
    Ok(Json(json!({ "synced": synced })))
}

// ── Conversations ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateConversation {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    user_ids: Vec<Uuid>,
}

async fn create_conversation(
    State(reader): State<Reader>,
    Json(body): Json<CreateConversation>,
) -> ApiResult {
    let kind = ConversationKind::parse(&body.kind)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "Invalid conversation type"))?;

    let conversation = reader
        .conversations()
        .create(body.name, kind, &body.user_ids)
        .await
        .map_err(|e| map_store_error("create conversation", &e))?;
    Ok(Json(json!(conversation)))
}

async fn get_conversation(
    State(reader): State<Reader>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult {
    let conversation = reader
        .conversations()
        .get(conversation_id)
        .await
        .map_err(|e| map_store_error("get conversation", &e))?
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Conversation not found"))?;
    Ok(Json(json!(conversation)))
}

#[derive(Debug, Deserialize)]
struct MembersUpdate {
    action: String,
    user_ids: Vec<Uuid>,
}

async fn update_members(
    State(reader): State<Reader>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<MembersUpdate>,
) -> ApiResult {
    let store = reader.conversations();
    match body.action.as_str() {
        "add" => store
            .add_members(conversation_id, &body.user_ids)
            .await
            .map_err(|e| map_store_error("add members", &e))?,
        "remove" => store
            .remove_members(conversation_id, &body.user_ids)
            .await
            .map_err(|e| map_store_error("remove members", &e))?,
        _ => {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                "Invalid action (use 'add' or 'remove')",
            ));
        },
    }
    Ok(Json(json!({ "status": "updated" })))
}
