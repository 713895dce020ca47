use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{ChecklistRecord, ChecklistResponseRecord, ResponseRecord};
use crate::db::queries;
use crate::db::queries::{BulkResponseInput, SaveResponseInput};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/checklists/{checklist_id}/responses",
            get(list_responses).post(bulk_update_responses),
        )
        .route(
            "/checklists/{checklist_id}/responses/{field_id}",
            post(save_response),
        )
}

#[derive(Debug, Deserialize)]
struct SaveResponseRequest {
    value: Value,
    #[serde(default)]
    is_completed: bool,
    #[serde(default)]
    comments: String,
}

#[derive(Debug, Deserialize)]
struct BulkUpdateRequest {
    responses: Vec<BulkEntryRequest>,
}

#[derive(Debug, Deserialize)]
struct BulkEntryRequest {
    id: String,
    value: Option<Value>,
    is_completed: Option<bool>,
    comments: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponseEntry {
    id: String,
    field_id: String,
    field_label: String,
    field_type: String,
    is_required: bool,
    sort_order: i64,
    value: Value,
    is_completed: bool,
    responded_by: Option<String>,
    responded_at: Option<String>,
    comments: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct SavedResponse {
    id: String,
    checklist_id: String,
    field_id: String,
    value: Value,
    is_completed: bool,
    responded_by: Option<String>,
    responded_at: Option<String>,
    comments: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct SaveResultResponse {
    response: SavedResponse,
    total_fields: i64,
    completed_fields: i64,
    completion_percentage: f64,
    checklist_status: String,
}

#[derive(Debug, Serialize)]
struct BulkResultResponse {
    updated_count: i64,
    total_fields: i64,
    completed_fields: i64,
    completion_percentage: f64,
    checklist_status: String,
}

async fn list_responses(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<Json<Vec<ResponseEntry>>> {
    let records = queries::list_checklist_responses(&state.pool, &checklist_id).await?;

    let mut payload = Vec::with_capacity(records.len());
    for record in records {
        payload.push(map_entry(record)?);
    }

    Ok(Json(payload))
}

async fn save_response(
    State(state): State<AppState>,
    Path((checklist_id, field_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<SaveResponseRequest>,
) -> AppResult<Json<SaveResultResponse>> {
    let actor = actor_from_headers(&headers);

    let saved = queries::save_response(
        &state.pool,
        &checklist_id,
        &field_id,
        SaveResponseInput {
            value: request.value,
            is_completed: request.is_completed,
            comments: request.comments,
            actor,
        },
    )
    .await?;

    Ok(Json(SaveResultResponse {
        response: map_saved(saved.response)?,
        total_fields: saved.checklist.total_fields,
        completed_fields: saved.checklist.completed_fields,
        completion_percentage: saved.checklist.completion_percentage,
        checklist_status: saved.checklist.status,
    }))
}

async fn bulk_update_responses(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<BulkUpdateRequest>,
) -> AppResult<Json<BulkResultResponse>> {
    let actor = actor_from_headers(&headers);

    let entries = request
        .responses
        .into_iter()
        .map(|entry| BulkResponseInput {
            id: entry.id,
            value: entry.value,
            is_completed: entry.is_completed,
            comments: entry.comments,
        })
        .collect();

    let outcome =
        queries::bulk_update_responses(&state.pool, &checklist_id, entries, &actor).await?;

    Ok(Json(map_bulk_outcome(outcome.updated_count, outcome.checklist)))
}

fn map_entry(record: ChecklistResponseRecord) -> AppResult<ResponseEntry> {
    let value = queries::parse_response_value(&record.value)?;

    Ok(ResponseEntry {
        id: record.id,
        field_id: record.field_id,
        field_label: record.field_label,
        field_type: record.field_type,
        is_required: record.is_required == 1,
        sort_order: record.sort_order,
        value,
        is_completed: record.is_completed == 1,
        responded_by: record.responded_by,
        responded_at: record.responded_at,
        comments: record.comments,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn map_saved(record: ResponseRecord) -> AppResult<SavedResponse> {
    let value = queries::parse_response_value(&record.value)?;

    Ok(SavedResponse {
        id: record.id,
        checklist_id: record.checklist_id,
        field_id: record.field_id,
        value,
        is_completed: record.is_completed == 1,
        responded_by: record.responded_by,
        responded_at: record.responded_at,
        comments: record.comments,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn map_bulk_outcome(updated_count: i64, checklist: ChecklistRecord) -> BulkResultResponse {
    BulkResultResponse {
        updated_count,
        total_fields: checklist.total_fields,
        completed_fields: checklist.completed_fields,
        completion_percentage: checklist.completion_percentage,
        checklist_status: checklist.status,
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use reqwest::StatusCode;
    use serde_json::json;
    use tempfile::tempdir;

    use crate::api;
    use crate::config::{Config, RateLimitConfig};
    use crate::db;
    use crate::rate_limit;
    use crate::state::AppState;

    async fn spawn_server(
        db_name: &str,
        token: Option<String>,
        rate_limits: RateLimitConfig,
    ) -> (
        tempfile::TempDir,
        std::net::SocketAddr,
        tokio::task::JoinHandle<()>,
    ) {
        let temp_dir = tempdir().expect("tempdir should be created");
        let db_path = temp_dir.path().join(format!("{db_name}.db"));
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let config = Config {
            port: 0,
            db_url,
            token,
            log_level: "info".to_string(),
            seed: false,
            seed_actor: "system".to_string(),
            rate_limits,
        };
        let pool = db::connect_and_migrate(&config)
            .await
            .expect("database should initialize");

        let state = AppState::new(config, pool);
        let app = Router::new()
            .nest("/api/v1", api::router())
            .route("/healthz", get(api::healthz))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                api::auth::require_auth,
            ))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit::enforce_limits,
            ))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("api listener should bind");
        let addr = listener
            .local_addr()
            .expect("api listener addr should be readable");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (temp_dir, addr, server)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("client should build")
    }

    #[tokio::test]
    async fn response_flow_drives_progress_over_http() {
        let (_temp_dir, addr, server) =
            spawn_server("responses_http", None, RateLimitConfig::default()).await;
        let client = client();

        let template = client
            .post(format!("http://{addr}/api/v1/templates"))
            .header("X-Actor", "lead")
            .json(&json!({
                "name": "Site Audit",
                "category": "operations",
                "fields": [
                    { "label": "Finding Summary", "field_type": "text", "is_required": true },
                    {
                        "label": "Severity",
                        "field_type": "select",
                        "is_required": true,
                        "options": [
                            { "value": "low", "label": "Low" },
                            { "value": "high", "label": "High" }
                        ]
                    },
                    { "label": "Notes", "field_type": "textarea" }
                ]
            }))
            .send()
            .await
            .expect("template create should succeed");
        assert_eq!(template.status(), StatusCode::CREATED);
        let template_body: serde_json::Value =
            template.json().await.expect("template body should parse");
        let template_id = template_body["template"]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("template should include id");
        let summary_field_id = template_body["fields"][0]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("first field should include id");

        let checklist = client
            .post(format!("http://{addr}/api/v1/checklists"))
            .header("X-Actor", "auditor")
            .json(&json!({ "template_id": template_id, "name": "Q3 Site Audit" }))
            .send()
            .await
            .expect("checklist create should succeed");
        assert_eq!(checklist.status(), StatusCode::CREATED);
        let checklist_body: serde_json::Value =
            checklist.json().await.expect("checklist body should parse");
        let checklist_id = checklist_body["checklist"]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("checklist should include id");
        assert_eq!(checklist_body["checklist"]["status"], "draft");
        assert_eq!(checklist_body["checklist"]["assigned_to"], "auditor");
        assert_eq!(checklist_body["checklist"]["total_fields"], 3);
        assert_eq!(checklist_body["checklist"]["completion_percentage"], 0.0);
        assert_eq!(checklist_body["responses"].as_array().map(Vec::len), Some(3));

        let listed = client
            .get(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses"
            ))
            .send()
            .await
            .expect("response list should succeed");
        assert_eq!(listed.status(), StatusCode::OK);
        let listed_body: serde_json::Value =
            listed.json().await.expect("response list should parse");
        assert_eq!(listed_body[0]["field_label"], "Finding Summary");
        assert_eq!(listed_body[1]["field_label"], "Severity");
        let severity_response_id = listed_body[1]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("severity response should include id");
        let notes_response_id = listed_body[2]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("notes response should include id");

        let saved = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses/{summary_field_id}"
            ))
            .header("X-Actor", "auditor")
            .json(&json!({
                "value": { "text": "Two findings noted" },
                "is_completed": true
            }))
            .send()
            .await
            .expect("single save should succeed");
        assert_eq!(saved.status(), StatusCode::OK);
        let saved_body: serde_json::Value = saved.json().await.expect("save body should parse");
        assert_eq!(saved_body["response"]["is_completed"], true);
        assert_eq!(saved_body["response"]["responded_by"], "auditor");
        assert_eq!(saved_body["completed_fields"], 1);
        assert_eq!(saved_body["completion_percentage"], 33.33);

        let premature = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/status"
            ))
            .json(&json!({ "status": "completed" }))
            .send()
            .await
            .expect("premature completion should get a response");
        assert_eq!(premature.status(), StatusCode::BAD_REQUEST);

        let bulk = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses"
            ))
            .header("X-Actor", "auditor")
            .json(&json!({
                "responses": [
                    {
                        "id": severity_response_id,
                        "value": { "selected": "high" },
                        "is_completed": true
                    },
                    {
                        "id": notes_response_id,
                        "value": { "text": "No blockers" },
                        "is_completed": true,
                        "comments": "reviewed on site"
                    }
                ]
            }))
            .send()
            .await
            .expect("bulk save should succeed");
        assert_eq!(bulk.status(), StatusCode::OK);
        let bulk_body: serde_json::Value = bulk.json().await.expect("bulk body should parse");
        assert_eq!(bulk_body["updated_count"], 2);
        assert_eq!(bulk_body["completed_fields"], 3);
        assert_eq!(bulk_body["completion_percentage"], 100.0);

        let progress = client
            .get(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/progress"
            ))
            .send()
            .await
            .expect("progress should succeed");
        assert_eq!(progress.status(), StatusCode::OK);
        let progress_body: serde_json::Value =
            progress.json().await.expect("progress body should parse");
        assert_eq!(progress_body["completed_fields"], 3);
        assert_eq!(progress_body["fields"].as_array().map(Vec::len), Some(3));

        let completed = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/status"
            ))
            .json(&json!({ "status": "completed" }))
            .send()
            .await
            .expect("completion should succeed");
        assert_eq!(completed.status(), StatusCode::OK);
        let completed_body: serde_json::Value =
            completed.json().await.expect("completed body should parse");
        assert_eq!(completed_body["checklist"]["status"], "completed");
        assert!(completed_body["checklist"]["completed_at"].is_string());

        let locked = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses/{summary_field_id}"
            ))
            .json(&json!({ "value": { "text": "late edit" } }))
            .send()
            .await
            .expect("locked save should get a response");
        assert_eq!(locked.status(), StatusCode::BAD_REQUEST);

        server.abort();
    }

    #[tokio::test]
    async fn malformed_values_are_rejected_over_http() {
        let (_temp_dir, addr, server) =
            spawn_server("responses_invalid", None, RateLimitConfig::default()).await;
        let client = client();

        let template = client
            .post(format!("http://{addr}/api/v1/templates"))
            .json(&json!({
                "name": "Shape Checks",
                "fields": [
                    { "label": "Headcount", "field_type": "number", "is_required": true }
                ]
            }))
            .send()
            .await
            .expect("template create should succeed");
        let template_body: serde_json::Value =
            template.json().await.expect("template body should parse");
        let template_id = template_body["template"]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("template should include id");
        let field_id = template_body["fields"][0]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("field should include id");

        let checklist = client
            .post(format!("http://{addr}/api/v1/checklists"))
            .json(&json!({ "template_id": template_id, "name": "Headcount Check" }))
            .send()
            .await
            .expect("checklist create should succeed");
        let checklist_body: serde_json::Value =
            checklist.json().await.expect("checklist body should parse");
        let checklist_id = checklist_body["checklist"]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("checklist should include id");

        let wrong_shape = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses/{field_id}"
            ))
            .json(&json!({ "value": { "text": "twelve" } }))
            .send()
            .await
            .expect("wrong shape should get a response");
        assert_eq!(wrong_shape.status(), StatusCode::BAD_REQUEST);

        let unknown_field = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses/not-a-field"
            ))
            .json(&json!({ "value": { "number": 12 } }))
            .send()
            .await
            .expect("unknown field should get a response");
        assert_eq!(unknown_field.status(), StatusCode::NOT_FOUND);

        let unknown_bulk = client
            .post(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/responses"
            ))
            .json(&json!({
                "responses": [
                    { "id": "not-a-response", "value": { "number": 12 } }
                ]
            }))
            .send()
            .await
            .expect("unknown bulk id should get a response");
        assert_eq!(unknown_bulk.status(), StatusCode::NOT_FOUND);

        let progress = client
            .get(format!(
                "http://{addr}/api/v1/checklists/{checklist_id}/progress"
            ))
            .send()
            .await
            .expect("progress should succeed");
        let progress_body: serde_json::Value =
            progress.json().await.expect("progress body should parse");
        assert_eq!(progress_body["completed_fields"], 0);

        server.abort();
    }
}
