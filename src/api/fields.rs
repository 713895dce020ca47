use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::FieldRecord;
use crate::db::queries;
use crate::db::queries::{FieldOrderInput, NewFieldInput, UpdateFieldInput};
use crate::error::{AppError, AppResult};
use crate::fields::{self, FieldOption};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/templates/{template_id}/fields",
            get(list_fields).post(create_fields),
        )
        .route(
            "/templates/{template_id}/fields/reorder",
            post(reorder_fields),
        )
        .route(
            "/templates/{template_id}/fields/{field_id}",
            patch(update_field).delete(delete_field),
        )
        .route(
            "/templates/{template_id}/fields/{field_id}/duplicate",
            post(duplicate_field),
        )
}

#[derive(Debug, Deserialize)]
struct CreateFieldsRequest {
    fields: Vec<FieldRequest>,
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

#[derive(Debug, Deserialize)]
struct UpdateFieldRequest {
    label: Option<String>,
    field_type: Option<String>,
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

#[derive(Debug, Deserialize)]
struct ReorderFieldsRequest {
    orders: Vec<FieldOrderRequest>,
}

#[derive(Debug, Deserialize)]
struct FieldOrderRequest {
    id: String,
    sort_order: i64,
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

async fn list_fields(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> AppResult<Json<Vec<FieldResponse>>> {
    let records = queries::list_template_fields(&state.pool, &template_id).await?;
    map_fields(records).map(Json)
}

async fn create_fields(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(request): Json<CreateFieldsRequest>,
) -> AppResult<(StatusCode, Json<Vec<FieldResponse>>)> {
    let created = queries::create_fields(
        &state.pool,
        &template_id,
        request.fields.into_iter().map(field_input).collect(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(map_fields(created)?)))
}

async fn update_field(
    State(state): State<AppState>,
    Path((template_id, field_id)): Path<(String, String)>,
    Json(request): Json<UpdateFieldRequest>,
) -> AppResult<Json<FieldResponse>> {
    if request.label.is_none()
        && request.field_type.is_none()
        && request.help_text.is_none()
        && request.placeholder.is_none()
        && request.is_required.is_none()
        && request.is_readonly.is_none()
        && request.default_value.is_none()
        && request.options.is_none()
        && request.min_length.is_none()
        && request.max_length.is_none()
        && request.min_value.is_none()
        && request.max_value.is_none()
        && request.sort_order.is_none()
        && request.conditional_logic.is_none()
    {
        return Err(AppError::BadRequest(
            "at least one field must be provided".to_string(),
        ));
    }

    let updated = queries::update_field(
        &state.pool,
        &template_id,
        &field_id,
        UpdateFieldInput {
            label: request.label,
            field_type: request.field_type,
            help_text: request.help_text,
            placeholder: request.placeholder,
            is_required: request.is_required,
            is_readonly: request.is_readonly,
            default_value: request.default_value,
            options: request.options,
            min_length: request.min_length,
            max_length: request.max_length,
            min_value: request.min_value,
            max_value: request.max_value,
            sort_order: request.sort_order,
            conditional_logic: request.conditional_logic,
        },
    )
    .await?;

    map_field(updated).map(Json)
}

async fn delete_field(
    State(state): State<AppState>,
    Path((template_id, field_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    queries::delete_field(&state.pool, &template_id, &field_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_fields(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(request): Json<ReorderFieldsRequest>,
) -> AppResult<Json<Vec<FieldResponse>>> {
    let reordered = queries::reorder_fields(
        &state.pool,
        &template_id,
        request
            .orders
            .into_iter()
            .map(|order| FieldOrderInput {
                id: order.id,
                sort_order: order.sort_order,
            })
            .collect(),
    )
    .await?;

    map_fields(reordered).map(Json)
}

async fn duplicate_field(
    State(state): State<AppState>,
    Path((template_id, field_id)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<FieldResponse>)> {
    let copy = queries::duplicate_field(&state.pool, &template_id, &field_id).await?;
    Ok((StatusCode::CREATED, Json(map_field(copy)?)))
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

fn map_fields(records: Vec<FieldRecord>) -> AppResult<Vec<FieldResponse>> {
    let mut payload = Vec::with_capacity(records.len());
    for record in records {
        payload.push(map_field(record)?);
    }
    Ok(payload)
}
