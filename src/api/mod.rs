pub mod auth;
pub mod checklists;
pub mod comments;
pub mod fields;
pub mod responses;
pub mod templates;

use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(templates::router())
        .merge(fields::router())
        .merge(checklists::router())
        .merge(responses::router())
        .merge(comments::router())
}

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

pub fn normalize_list_query(limit: Option<i64>, offset: Option<i64>) -> AppResult<(i64, i64)> {
    let limit = limit.unwrap_or(50);
    let offset = offset.unwrap_or(0);

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

    if offset < 0 {
        return Err(AppError::BadRequest(
            "offset cannot be negative".to_string(),
        ));
    }

    Ok((limit, offset))
}
