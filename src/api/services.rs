use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use super::{
    error::ApiError,
    models::{
        CreateTaskRequest, HealthResponse, ListQuery, TaskListResponse, TaskResponse,
        UpdateTaskRequest,
    },
    state::AppState,
    utils,
};

/// Create a download task (POST /tasks)
///
/// The task is stored as PENDING and a `download_task_created` event is
/// published; the download itself happens asynchronously.
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    let request: CreateTaskRequest = read_json(&state, &headers, body).await?;

    let task = state
        .service
        .create_task(account_id, request.download_type, &request.url)
        .await?;

    Ok((StatusCode::CREATED, Json(TaskResponse::from(task))))
}

/// Page through the caller's tasks (GET /tasks?offset&limit)
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    let page = state
        .service
        .list_tasks(account_id, query.offset, query.limit)?;

    Ok(Json(TaskListResponse {
        tasks: page.tasks.into_iter().map(TaskResponse::from).collect(),
        total: page.total,
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    let task = state.service.get_task(account_id, id)?;
    Ok(Json(TaskResponse::from(task)))
}

/// Change the source URL (PATCH /tasks/{id})
pub async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    let request: UpdateTaskRequest = read_json(&state, &headers, body).await?;

    let task = state
        .service
        .update_task_url(account_id, id, &request.url)
        .await?;

    Ok(Json(TaskResponse::from(task)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    state.service.delete_task(account_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the downloaded payload (GET /tasks/{id}/file)
///
/// Answers 409 until the task reaches SUCCESS.
pub async fn get_task_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let account_id = utils::account_id_from_headers(&headers)?;
    let file = state.service.get_task_file(account_id, id).await?;

    let content_type = utils::payload_content_type(&file.task.metadata);
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);

    let mut response = Body::from_stream(file.stream).into_response();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Health check endpoint (GET /health)
///
/// Reports the task store and event channel, plus task counts and the
/// lifecycle counters. Returns 503 if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    components.insert("api".to_string(), "healthy".to_string());

    let store_healthy = state.store.health_check().is_ok();
    components.insert("task_store".to_string(), status_label(store_healthy));

    let service_healthy = state.service.health().await;
    components.insert("event_channel".to_string(), status_label(service_healthy));

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: status_label(all_healthy),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        tasks: state.store.stats().ok(),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}

fn status_label(healthy: bool) -> String {
    let label = if healthy { "healthy" } else { "unhealthy" };
    label.to_string()
}

/// Reads a JSON body, enforcing Content-Type and the configured size limit
async fn read_json<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<T, ApiError> {
    utils::require_json(headers)?;

    let max = state.max_body_bytes();
    // One byte over the limit is enough to tell an oversized body apart
    let data = axum::body::to_bytes(body, max.saturating_add(1))
        .await
        .map_err(|_| ApiError::PayloadTooLarge(max.saturating_add(1)))?;
    utils::validate_body_size(&data, max)?;

    Ok(serde_json::from_slice(&data)?)
}
