use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::normalize_list_query;
use crate::db::models::{
    ChecklistDetails, ChecklistListRecord, ChecklistProgress, ChecklistRecord,
    ChecklistResponseRecord,
};
use crate::db::queries;
use crate::db::queries::{ChecklistFilters, NewChecklistInput, UpdateChecklistInput};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checklists", get(list_checklists).post(create_checklist))
        .route("/checklists/mine", get(my_checklists))
        .route("/checklists/dashboard", get(dashboard))
        .route(
            "/checklists/{checklist_id}",
            get(get_checklist)
                .patch(update_checklist)
                .delete(delete_checklist),
        )
        .route(
            "/checklists/{checklist_id}/duplicate",
            post(duplicate_checklist),
        )
        .route("/checklists/{checklist_id}/status", post(set_status))
        .route("/checklists/{checklist_id}/progress", get(progress))
        .route("/checklists/{checklist_id}/export", get(export))
}

#[derive(Debug, Deserialize)]
struct ChecklistListQuery {
    status: Option<String>,
    priority: Option<String>,
    assigned_to: Option<String>,
    created_by: Option<String>,
    template_id: Option<String>,
    q: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MineQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateChecklistRequest {
    template_id: String,
    name: String,
    description: Option<String>,
    assigned_to: Option<String>,
    due_date: Option<String>,
    priority: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct UpdateChecklistRequest {
    name: Option<String>,
    description: Option<String>,
    status: Option<String>,
    assigned_to: Option<String>,
    due_date: Option<String>,
    priority: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Debug, Serialize)]
struct ChecklistResponse {
    id: String,
    template_id: String,
    name: String,
    description: String,
    status: String,
    assigned_to: String,
    created_by: String,
    due_date: Option<String>,
    completed_at: Option<String>,
    total_fields: i64,
    completed_fields: i64,
    completion_percentage: f64,
    priority: String,
    tags: Vec<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct ChecklistListItemResponse {
    checklist: ChecklistResponse,
    template_name: String,
}

#[derive(Debug, Serialize)]
struct ChecklistDetailResponse {
    checklist: ChecklistResponse,
    template_name: String,
    template_category: String,
    responses: Vec<ResponseEntry>,
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
struct DashboardResponse {
    total_count: i64,
    completed_count: i64,
    in_progress_count: i64,
    overdue_count: i64,
    recent: Vec<ChecklistResponse>,
}

#[derive(Debug, Serialize)]
struct ExportResponse {
    checklist: ChecklistResponse,
    template: ExportTemplateRef,
    exported_at: String,
    responses: Vec<ResponseEntry>,
}

#[derive(Debug, Serialize)]
struct ExportTemplateRef {
    id: String,
    name: String,
    category: String,
}

async fn list_checklists(
    State(state): State<AppState>,
    Query(query): Query<ChecklistListQuery>,
) -> AppResult<Json<Vec<ChecklistListItemResponse>>> {
    let (limit, offset) = normalize_list_query(query.limit, query.offset)?;

    let records = queries::list_checklists(
        &state.pool,
        ChecklistFilters {
            status: query.status,
            priority: query.priority,
            assigned_to: query.assigned_to,
            created_by: query.created_by,
            template_id: query.template_id,
            search: query.q,
        },
        limit,
        offset,
    )
    .await?;

    map_list_items(records).map(Json)
}

async fn my_checklists(
    State(state): State<AppState>,
    Query(query): Query<MineQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ChecklistListItemResponse>>> {
    let (limit, offset) = normalize_list_query(query.limit, query.offset)?;
    let actor = actor_from_headers(&headers);

    let records = queries::list_checklists(
        &state.pool,
        ChecklistFilters {
            status: query.status,
            priority: None,
            assigned_to: Some(actor),
            created_by: None,
            template_id: None,
            search: None,
        },
        limit,
        offset,
    )
    .await?;

    map_list_items(records).map(Json)
}

async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<DashboardResponse>> {
    let actor = actor_from_headers(&headers);
    let summary = queries::dashboard_summary(&state.pool, &actor).await?;

    let mut recent = Vec::with_capacity(summary.recent.len());
    for record in summary.recent {
        recent.push(map_checklist(record)?);
    }

    Ok(Json(DashboardResponse {
        total_count: summary.total_count,
        completed_count: summary.completed_count,
        in_progress_count: summary.in_progress_count,
        overdue_count: summary.overdue_count,
        recent,
    }))
}

async fn create_checklist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateChecklistRequest>,
) -> AppResult<(StatusCode, Json<ChecklistDetailResponse>)> {
    let actor = actor_from_headers(&headers);

    let details = queries::create_checklist(
        &state.pool,
        NewChecklistInput {
            template_id: request.template_id,
            name: request.name,
            description: request.description.unwrap_or_default(),
            assigned_to: request.assigned_to.unwrap_or_else(|| actor.clone()),
            due_date: request.due_date,
            priority: request.priority.unwrap_or_else(|| "medium".to_string()),
            tags: request.tags.unwrap_or_default(),
            created_by: actor,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(map_details(details)?)))
}

async fn get_checklist(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<Json<ChecklistDetailResponse>> {
    let details = queries::get_checklist(&state.pool, &checklist_id).await?;
    map_details(details).map(Json)
}

async fn update_checklist(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
    Json(request): Json<UpdateChecklistRequest>,
) -> AppResult<Json<ChecklistDetailResponse>> {
    if request.name.is_none()
        && request.description.is_none()
        && request.status.is_none()
        && request.assigned_to.is_none()
        && request.due_date.is_none()
        && request.priority.is_none()
        && request.tags.is_none()
    {
        return Err(AppError::BadRequest(
            "at least one field must be provided".to_string(),
        ));
    }

    let details = queries::update_checklist(
        &state.pool,
        &checklist_id,
        UpdateChecklistInput {
            name: request.name,
            description: request.description,
            status: request.status,
            assigned_to: request.assigned_to,
            due_date: request.due_date,
            priority: request.priority,
            tags: request.tags,
        },
    )
    .await?;

    map_details(details).map(Json)
}

async fn delete_checklist(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<StatusCode> {
    queries::delete_checklist(&state.pool, &checklist_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn duplicate_checklist(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<ChecklistDetailResponse>)> {
    let actor = actor_from_headers(&headers);
    let details = queries::duplicate_checklist(&state.pool, &checklist_id, &actor).await?;
    Ok((StatusCode::CREATED, Json(map_details(details)?)))
}

async fn set_status(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> AppResult<Json<ChecklistDetailResponse>> {
    let details = queries::set_checklist_status(&state.pool, &checklist_id, &request.status).await?;
    map_details(details).map(Json)
}

async fn progress(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<Json<ChecklistProgress>> {
    let progress = queries::checklist_progress(&state.pool, &checklist_id).await?;
    Ok(Json(progress))
}

async fn export(
    State(state): State<AppState>,
    Path(checklist_id): Path<String>,
) -> AppResult<Json<ExportResponse>> {
    let data = queries::checklist_export_data(&state.pool, &checklist_id).await?;

    let mut responses = Vec::with_capacity(data.responses.len());
    for record in data.responses {
        responses.push(map_response(record)?);
    }

    Ok(Json(ExportResponse {
        checklist: map_checklist(data.checklist)?,
        template: ExportTemplateRef {
            id: data.template.id,
            name: data.template.name,
            category: data.template.category,
        },
        exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        responses,
    }))
}

fn map_checklist(record: ChecklistRecord) -> AppResult<ChecklistResponse> {
    let tags = queries::parse_tags(&record.tags)?;

    Ok(ChecklistResponse {
        id: record.id,
        template_id: record.template_id,
        name: record.name,
        description: record.description,
        status: record.status,
        assigned_to: record.assigned_to,
        created_by: record.created_by,
        due_date: record.due_date,
        completed_at: record.completed_at,
        total_fields: record.total_fields,
        completed_fields: record.completed_fields,
        completion_percentage: record.completion_percentage,
        priority: record.priority,
        tags,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn map_list_items(
    records: Vec<ChecklistListRecord>,
) -> AppResult<Vec<ChecklistListItemResponse>> {
    let mut payload = Vec::with_capacity(records.len());
    for record in records {
        let tags = queries::parse_tags(&record.tags)?;
        payload.push(ChecklistListItemResponse {
            checklist: ChecklistResponse {
                id: record.id,
                template_id: record.template_id,
                name: record.name,
                description: record.description,
                status: record.status,
                assigned_to: record.assigned_to,
                created_by: record.created_by,
                due_date: record.due_date,
                completed_at: record.completed_at,
                total_fields: record.total_fields,
                completed_fields: record.completed_fields,
                completion_percentage: record.completion_percentage,
                priority: record.priority,
                tags,
                created_at: record.created_at,
                updated_at: record.updated_at,
            },
            template_name: record.template_name,
        });
    }

    Ok(payload)
}

fn map_response(record: ChecklistResponseRecord) -> AppResult<ResponseEntry> {
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

fn map_details(details: ChecklistDetails) -> AppResult<ChecklistDetailResponse> {
    let mut responses = Vec::with_capacity(details.responses.len());
    for record in details.responses {
        responses.push(map_response(record)?);
    }

    Ok(ChecklistDetailResponse {
        checklist: map_checklist(details.checklist)?,
        template_name: details.template_name,
        template_category: details.template_category,
        responses,
    })
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
