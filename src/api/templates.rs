use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::normalize_list_query;
use crate::db::models::{ChecklistRecord, FieldRecord, TemplateDetails, TemplateRecord};
use crate::db::queries;
use crate::db::queries::{NewFieldInput, NewTemplateInput, TemplateFilters, UpdateTemplateInput};
use crate::error::{AppError, AppResult};
use crate::fields::{self, FieldOption, FieldType};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/field-types", get(list_field_types))
        .route("/templates/categories", get(list_categories))
        .route("/templates/popular", get(list_popular))
        .route(
            "/templates/{template_id}",
            get(get_template)
                .patch(update_template)
                .delete(delete_template),
        )
        .route("/templates/{template_id}/freeze", post(freeze_template))
        .route("/templates/{template_id}/unfreeze", post(unfreeze_template))
        .route(
            "/templates/{template_id}/duplicate",
            post(duplicate_template),
        )
        .route("/templates/{template_id}/usage-stats", get(usage_stats))
}

#[derive(Debug, Deserialize)]
struct TemplateListQuery {
    category: Option<String>,
    is_active: Option<bool>,
    is_frozen: Option<bool>,
    created_by: Option<String>,
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PopularQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateTemplateRequest {
    name: String,
    description: Option<String>,
    category: Option<String>,
    is_active: Option<bool>,
    #[serde(default)]
    fields: Vec<FieldRequest>,
}

#[derive(Debug, Deserialize)]
struct UpdateTemplateRequest {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    is_active: Option<bool>,
    fields: Option<Vec<FieldRequest>>,
}

#[derive(Debug, Deserialize)]
struct FieldRequest {
    label: String,
    field_type: String,
    help_text: Option<String>,
    placeholder: Option<String>,
    is_required: Option<bool>,
    is_readonly: Option<bool>,
    default_value: Option<String>,
    options: Option<Vec<FieldOption>>,
    min_length: Option<i64>,
    max_length: Option<i64>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    sort_order: Option<i64>,
    conditional_logic: Option<Value>,
}

#[derive(Debug, Serialize)]
struct TemplateResponse {
    id: String,
    name: String,
    description: String,
    category: String,
    is_active: bool,
    is_frozen: bool,
    frozen_by: Option<String>,
    frozen_at: Option<String>,
    usage_count: i64,
    created_by: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct TemplateSummaryResponse {
    template: TemplateResponse,
    fields_count: i64,
    checklists_count: i64,
}

#[derive(Debug, Serialize)]
struct TemplateDetailResponse {
    template: TemplateResponse,
    fields: Vec<FieldResponse>,
}

#[derive(Debug, Serialize)]
struct FieldResponse {
    id: String,
    template_id: String,
    label: String,
    field_type: String,
    help_text: String,
    placeholder: String,
    is_required: bool,
    is_readonly: bool,
    default_value: String,
    options: Vec<FieldOption>,
    min_length: Option<i64>,
    max_length: Option<i64>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    sort_order: i64,
    conditional_logic: Value,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct UsageStatsResponse {
    usage_count: i64,
    checklist_count: i64,
    completed_count: i64,
    in_progress_count: i64,
    recent: Vec<RecentChecklistResponse>,
}

#[derive(Debug, Serialize)]
struct RecentChecklistResponse {
    id: String,
    name: String,
    status: String,
    assigned_to: String,
    completion_percentage: f64,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct FieldTypeEntry {
    value: &'static str,
    label: &'static str,
}

async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateListQuery>,
) -> AppResult<Json<Vec<TemplateSummaryResponse>>> {
    let (limit, offset) = normalize_list_query(query.limit, query.offset)?;

    let summaries = queries::list_templates(
        &state.pool,
        TemplateFilters {
            category: query.category,
            is_active: query.is_active,
            is_frozen: query.is_frozen,
            created_by: query.created_by,
            search: query.q,
        },
        limit,
        offset,
    )
    .await?;

    let payload = summaries
        .into_iter()
        .map(|summary| TemplateSummaryResponse {
            template: map_template(summary.template),
            fields_count: summary.fields_count,
            checklists_count: summary.checklists_count,
        })
        .collect();

    Ok(Json(payload))
}

async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateDetailResponse>)> {
    let details = queries::create_template(
        &state.pool,
        NewTemplateInput {
            name: request.name,
            description: request.description.unwrap_or_default(),
            category: request.category.unwrap_or_default(),
            is_active: request.is_active.unwrap_or(true),
            fields: request.fields.into_iter().map(field_input).collect(),
            created_by: actor_from_headers(&headers),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(map_details(details)?)))
}

async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> AppResult<Json<TemplateDetailResponse>> {
    let details = queries::get_template(&state.pool, &template_id).await?;
    Ok(Json(map_details(details)?))
}

async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(request): Json<UpdateTemplateRequest>,
) -> AppResult<Json<TemplateDetailResponse>> {
    let details = queries::update_template(
        &state.pool,
        &template_id,
        UpdateTemplateInput {
            name: request.name,
            description: request.description,
            category: request.category,
            is_active: request.is_active,
            fields: request
                .fields
                .map(|fields| fields.into_iter().map(field_input).collect()),
        },
    )
    .await?;

    Ok(Json(map_details(details)?))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> AppResult<StatusCode> {
    queries::delete_template(&state.pool, &template_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn freeze_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<TemplateDetailResponse>> {
    let actor = actor_from_headers(&headers);
    let details = queries::freeze_template(&state.pool, &template_id, &actor).await?;
    Ok(Json(map_details(details)?))
}

async fn unfreeze_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> AppResult<Json<TemplateDetailResponse>> {
    let details = queries::unfreeze_template(&state.pool, &template_id).await?;
    Ok(Json(map_details(details)?))
}

async fn duplicate_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<TemplateDetailResponse>)> {
    let actor = actor_from_headers(&headers);
    let details = queries::duplicate_template(&state.pool, &template_id, &actor).await?;
    Ok((StatusCode::CREATED, Json(map_details(details)?)))
}

async fn usage_stats(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> AppResult<Json<UsageStatsResponse>> {
    let stats = queries::template_usage_stats(&state.pool, &template_id).await?;

    Ok(Json(UsageStatsResponse {
        usage_count: stats.usage_count,
        checklist_count: stats.checklist_count,
        completed_count: stats.completed_count,
        in_progress_count: stats.in_progress_count,
        recent: stats.recent.into_iter().map(map_recent).collect(),
    }))
}

async fn list_field_types() -> Json<Vec<FieldTypeEntry>> {
    let payload = FieldType::ALL
        .iter()
        .map(|field_type| FieldTypeEntry {
            value: field_type.as_str(),
            label: field_type.label(),
        })
        .collect();

    Json(payload)
}

async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let categories = queries::template_categories(&state.pool).await?;
    Ok(Json(categories))
}

async fn list_popular(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> AppResult<Json<Vec<TemplateSummaryResponse>>> {
    let limit = query.limit.unwrap_or(10);
    if limit <= 0 {
        return Err(AppError::BadRequest(
            "limit must be greater than 0".to_string(),
        ));
    }
    if limit > 100 {
        return Err(AppError::BadRequest(
            "limit must be less than or equal to 100".to_string(),
        ));
    }

    let summaries = queries::popular_templates(&state.pool, limit).await?;
    let payload = summaries
        .into_iter()
        .map(|summary| TemplateSummaryResponse {
            template: map_template(summary.template),
            fields_count: summary.fields_count,
            checklists_count: summary.checklists_count,
        })
        .collect();

    Ok(Json(payload))
}

fn field_input(request: FieldRequest) -> NewFieldInput {
    NewFieldInput {
        label: request.label,
        field_type: request.field_type,
        help_text: request.help_text.unwrap_or_default(),
        placeholder: request.placeholder.unwrap_or_default(),
        is_required: request.is_required.unwrap_or(false),
        is_readonly: request.is_readonly.unwrap_or(false),
        default_value: request.default_value.unwrap_or_default(),
        options: request.options.unwrap_or_default(),
        min_length: request.min_length,
        max_length: request.max_length,
        min_value: request.min_value,
        max_value: request.max_value,
        sort_order: request.sort_order,
        conditional_logic: request.conditional_logic,
    }
}

fn map_template(record: TemplateRecord) -> TemplateResponse {
    TemplateResponse {
        id: record.id,
        name: record.name,
        description: record.description,
        category: record.category,
        is_active: record.is_active == 1,
        is_frozen: record.frozen_at.is_some(),
        frozen_by: record.frozen_by,
        frozen_at: record.frozen_at,
        usage_count: record.usage_count,
        created_by: record.created_by,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

fn map_field(record: FieldRecord) -> AppResult<FieldResponse> {
    let options = fields::parse_options_json(&record.options)?;
    let conditional_logic = queries::parse_conditional_logic(&record.conditional_logic)?;

    Ok(FieldResponse {
        id: record.id,
        template_id: record.template_id,
        label: record.label,
        field_type: record.field_type,
        help_text: record.help_text,
        placeholder: record.placeholder,
        is_required: record.is_required == 1,
        is_readonly: record.is_readonly == 1,
        default_value: record.default_value,
        options,
        min_length: record.min_length,
        max_length: record.max_length,
        min_value: record.min_value,
        max_value: record.max_value,
        sort_order: record.sort_order,
        conditional_logic,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn map_details(details: TemplateDetails) -> AppResult<TemplateDetailResponse> {
    let mut fields = Vec::with_capacity(details.fields.len());
    for field in details.fields {
        fields.push(map_field(field)?);
    }

    Ok(TemplateDetailResponse {
        template: map_template(details.template),
        fields,
    })
}

fn map_recent(record: ChecklistRecord) -> RecentChecklistResponse {
    RecentChecklistResponse {
        id: record.id,
        name: record.name,
        status: record.status,
        assigned_to: record.assigned_to,
        completion_percentage: record.completion_percentage,
        created_at: record.created_at,
        updated_at: record.updated_at,
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
    async fn template_lifecycle_over_http() {
        let (_temp_dir, addr, server) =
            spawn_server("templates_http", None, RateLimitConfig::default()).await;
        let client = client();

        let create = client
            .post(format!("http://{addr}/api/v1/templates"))
            .header("X-Actor", "lead")
            .json(&json!({
                "name": "Vendor Review",
                "category": "procurement",
                "fields": [
                    { "label": "Vendor Name", "field_type": "text", "is_required": true },
                    {
                        "label": "Risk Level",
                        "field_type": "select",
                        "is_required": true,
                        "options": [
                            { "value": "low", "label": "Low" },
                            { "value": "high", "label": "High" }
                        ]
                    }
                ]
            }))
            .send()
            .await
            .expect("create request should succeed");
        assert_eq!(create.status(), StatusCode::CREATED);

        let created: serde_json::Value = create.json().await.expect("create body should parse");
        let template_id = created["template"]["id"]
            .as_str()
            .map(ToOwned::to_owned)
            .expect("created template should include id");
        assert_eq!(created["template"]["created_by"], "lead");
        assert_eq!(created["fields"].as_array().map(Vec::len), Some(2));

        let listed = client
            .get(format!(
                "http://{addr}/api/v1/templates?category=procurement"
            ))
            .send()
            .await
            .expect("list request should succeed");
        assert_eq!(listed.status(), StatusCode::OK);
        let list_body: serde_json::Value = listed.json().await.expect("list body should parse");
        assert_eq!(list_body.as_array().map(Vec::len), Some(1));
        assert_eq!(list_body[0]["fields_count"], 2);

        let freeze = client
            .post(format!(
                "http://{addr}/api/v1/templates/{template_id}/freeze"
            ))
            .header("X-Actor", "lead")
            .send()
            .await
            .expect("freeze request should succeed");
        assert_eq!(freeze.status(), StatusCode::OK);

        let frozen_patch = client
            .patch(format!("http://{addr}/api/v1/templates/{template_id}"))
            .json(&json!({ "name": "Renamed" }))
            .send()
            .await
            .expect("patch request should succeed");
        assert_eq!(frozen_patch.status(), StatusCode::CONFLICT);
        let frozen_body: serde_json::Value = frozen_patch
            .json()
            .await
            .expect("frozen body should parse");
        assert_eq!(frozen_body["error"], "template_frozen");

        let unfreeze = client
            .post(format!(
                "http://{addr}/api/v1/templates/{template_id}/unfreeze"
            ))
            .send()
            .await
            .expect("unfreeze request should succeed");
        assert_eq!(unfreeze.status(), StatusCode::OK);

        let patched = client
            .patch(format!("http://{addr}/api/v1/templates/{template_id}"))
            .json(&json!({ "name": "Renamed" }))
            .send()
            .await
            .expect("second patch request should succeed");
        assert_eq!(patched.status(), StatusCode::OK);

        let field_types = client
            .get(format!("http://{addr}/api/v1/templates/field-types"))
            .send()
            .await
            .expect("field types request should succeed");
        assert_eq!(field_types.status(), StatusCode::OK);
        let field_types_body: serde_json::Value = field_types
            .json()
            .await
            .expect("field types body should parse");
        assert_eq!(field_types_body.as_array().map(Vec::len), Some(14));

        let categories = client
            .get(format!("http://{addr}/api/v1/templates/categories"))
            .send()
            .await
            .expect("categories request should succeed");
        let categories_body: serde_json::Value = categories
            .json()
            .await
            .expect("categories body should parse");
        assert_eq!(categories_body, json!(["procurement"]));

        let duplicate = client
            .post(format!(
                "http://{addr}/api/v1/templates/{template_id}/duplicate"
            ))
            .header("X-Actor", "editor")
            .send()
            .await
            .expect("duplicate request should succeed");
        assert_eq!(duplicate.status(), StatusCode::CREATED);
        let duplicate_body: serde_json::Value = duplicate
            .json()
            .await
            .expect("duplicate body should parse");
        assert_eq!(duplicate_body["template"]["name"], "Copy of Renamed");
        assert_eq!(duplicate_body["template"]["usage_count"], 0);

        let deleted = client
            .delete(format!("http://{addr}/api/v1/templates/{template_id}"))
            .send()
            .await
            .expect("delete request should succeed");
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let missing = client
            .get(format!("http://{addr}/api/v1/templates/{template_id}"))
            .send()
            .await
            .expect("get request should succeed");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        server.abort();
    }

    #[tokio::test]
    async fn healthz_is_public_while_api_requires_token() {
        let (_temp_dir, addr, server) = spawn_server(
            "templates_auth",
            Some("secret-token".to_string()),
            RateLimitConfig::default(),
        )
        .await;
        let client = client();

        let health = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .expect("healthz request should succeed");
        assert_eq!(health.status(), StatusCode::OK);

        let denied = client
            .get(format!("http://{addr}/api/v1/templates"))
            .send()
            .await
            .expect("unauthenticated request should succeed");
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = client
            .get(format!("http://{addr}/api/v1/templates"))
            .header("Authorization", "Bearer secret-token")
            .send()
            .await
            .expect("authenticated request should succeed");
        assert_eq!(allowed.status(), StatusCode::OK);

        server.abort();
    }

    #[tokio::test]
    async fn write_burst_drain_returns_retry_after() {
        let (_temp_dir, addr, server) = spawn_server(
            "templates_rate_limit",
            None,
            RateLimitConfig {
                write_per_min: 30,
                write_burst: 2,
                ..RateLimitConfig::default()
            },
        )
        .await;
        let client = client();

        for _ in 0..2 {
            let allowed = client
                .post(format!("http://{addr}/api/v1/templates"))
                .json(&json!({ "name": "Burst" }))
                .send()
                .await
                .expect("write request should succeed");
            assert_eq!(allowed.status(), StatusCode::CREATED);
        }

        let throttled = client
            .post(format!("http://{addr}/api/v1/templates"))
            .json(&json!({ "name": "Burst" }))
            .send()
            .await
            .expect("throttled request should succeed");
        assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(throttled.headers().get("retry-after").is_some());
        assert_eq!(
            throttled
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|value| value.to_str().ok()),
            Some("0")
        );

        server.abort();
    }
}
