use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::CommentRecord;
use crate::db::queries;
use crate::db::queries::NewCommentInput;
use crate::error::AppResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/checklists/{checklist_id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/checklists/{checklist_id}/comments/{comment_id}",
            delete(delete_comment),
        )
}

#[derive(Debug, Deserialize)]
struct CreateCommentRequest {
    content: String,
    #[serde(default)]
    is_internal: bool,
    parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommentResponse {
    id: String,
    checklist_id: String,
    author: String,
    content: String,
    is_internal: bool,
    parent_id: Option<String>,
    created_at: String,
}

async fn list_comments(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let records = queries::list_comments(&state.pool, &checklist_id).await?;
    Ok(Json(records.into_iter().map(map_comment).collect()))
}

async fn create_comment(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let author = actor_from_headers(&headers);

    let record = queries::create_comment(
        &state.pool,
        &checklist_id,
        NewCommentInput {
            content: request.content,
            is_internal: request.is_internal,
            parent_id: request.parent_id,
            author,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(map_comment(record))))
}

async fn delete_comment(
    State(state): State<AppState>,
    Path((checklist_id, comment_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    queries::delete_comment(&state.pool, &checklist_id, &comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn map_comment(record: CommentRecord) -> CommentResponse {
    CommentResponse {
        id: record.id,
        checklist_id: record.checklist_id,
        author: record.author,
        content: record.content,
        is_internal: record.is_internal == 1,
        parent_id: record.parent_id,
        created_at: record.created_at,
    }
}

fn actor_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("X-Actor")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "human".to_string())
}
