//! Thin HTTP handlers over the core: request parsing and response
//! shaping only, no business logic, per SPEC_FULL.md's scoping of the
//! handler layer. Grounded on the teacher's router-nesting style in
//! `bin/core/src/api/mod.rs`, simplified since there's no auth/resolver
//! dispatch layer here.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
  Json, Router,
  extract::{Path, State},
  response::IntoResponse,
  routing::{get, post},
};
use docksmith_core::error::OpError;
use docksmith_response::Response;
use docksmith_types::{LabelAssignment, ManagedLabels};
use serde::Deserialize;
use serde_json::json;

use crate::{error::ApiError, state::AppState};

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/events", get(events))
    .route("/status", get(status))
    .route("/trigger-check", post(trigger_check))
    .route("/update", post(update))
    .route("/update/batch", post(update_batch))
    .route("/rollback", post(rollback))
    .route("/fix-compose-mismatch/{name}", post(fix_compose_mismatch))
    .route("/restart/start/{name}", post(restart_start))
    .route("/restart/stack/start/{name}", post(restart_stack_start))
    .route("/operations", get(list_operations))
    .route("/operations/{id}", get(get_operation))
    .route("/operations/group/{group_id}", get(list_by_group))
    .route("/history", get(history))
    .route("/policies", get(policies))
    .route("/labels/{container}", get(get_labels))
    .route("/labels/set", post(set_labels))
    .route("/labels/remove", post(remove_labels))
    .route("/labels/batch", post(batch_labels))
    .route("/labels/rollback", post(rollback_labels))
    .with_state(state)
}

async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  docksmith_core::sse::event_stream(&state.bus)
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let (result, last_check, last_background_run, checking) =
    state.checker.get_cached_results().await;
  Response(json!({
    "result": result,
    "last_check": last_check,
    "last_background_run": last_background_run,
    "checking": checking,
  }))
}

async fn trigger_check(
  State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
  state.checker.trigger_check();
  Response(json!({ "triggered": true }))
}

#[derive(Deserialize)]
struct UpdateRequest {
  name: String,
  target_version: Option<String>,
  #[serde(default)]
  force: bool,
}

async fn update(
  State(state): State<Arc<AppState>>,
  Json(req): Json<UpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let op_id = state
    .update
    .update_single_container_in_group(&req.name, req.target_version, None, req.force)
    .await?;
  Ok(Response(json!({ "operation_id": op_id })))
}

#[derive(Deserialize)]
struct UpdateBatchRequest {
  names: Vec<String>,
  #[serde(default)]
  targets: BTreeMap<String, String>,
  batch_group: Option<String>,
  #[serde(default)]
  force: bool,
}

async fn update_batch(
  State(state): State<Arc<AppState>>,
  Json(req): Json<UpdateBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let op_ids = state
    .update
    .update_batch_containers_in_group(req.names, req.targets, req.batch_group, req.force)
    .await?;
  Ok(Response(json!({ "operation_ids": op_ids })))
}

#[derive(Deserialize)]
struct RollbackRequest {
  operation_id: String,
  #[serde(default)]
  names: Vec<String>,
  #[serde(default)]
  force: bool,
}

async fn rollback(
  State(state): State<Arc<AppState>>,
  Json(req): Json<RollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let op_id = if req.names.is_empty() {
    state.update.rollback_operation(&req.operation_id, req.force).await?
  } else {
    state
      .update
      .rollback_containers(&req.operation_id, &req.names, req.force)
      .await?
  };
  Ok(Response(json!({ "operation_id": op_id })))
}

async fn fix_compose_mismatch(
  State(state): State<Arc<AppState>>,
  Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let op_id = state.update.fix_compose_mismatch(&name).await?;
  Ok(Response(json!({ "operation_id": op_id })))
}

#[derive(Deserialize, Default)]
struct ForceRequest {
  #[serde(default)]
  force: bool,
}

async fn restart_start(
  State(state): State<Arc<AppState>>,
  Path(name): Path<String>,
  body: Option<Json<ForceRequest>>,
) -> Result<impl IntoResponse, ApiError> {
  let force = body.map(|Json(b)| b.force).unwrap_or_default();
  let report = state.restart.restart_single_container(&name, force).await?;
  Ok(Response(report))
}

#[derive(Deserialize)]
struct RestartStackRequest {
  names: Vec<String>,
  #[serde(default)]
  force: bool,
}

async fn restart_stack_start(
  State(state): State<Arc<AppState>>,
  Path(stack): Path<String>,
  Json(req): Json<RestartStackRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let reports = state.restart.restart_stack(&stack, &req.names, req.force).await?;
  Ok(Response(reports))
}

async fn list_operations(
  State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
  let ops = state.store.list_all(50).await.map_err(OpError::from)?;
  Ok(Response(ops))
}

async fn get_operation(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let op = state.store.get_operation(&id).await.map_err(OpError::from)?;
  Ok(Response(op))
}

async fn list_by_group(
  State(state): State<Arc<AppState>>,
  Path(group_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let ops =
    state.store.list_by_batch_group(&group_id).await.map_err(OpError::from)?;
  Ok(Response(ops))
}

async fn history(
  State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
  let ops = state.store.list_all(500).await.map_err(OpError::from)?;
  Ok(Response(ops))
}

async fn policies(
  State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
  let containers = state.runtime.list_containers().await.map_err(OpError::from)?;
  let policies: Vec<_> = containers
    .iter()
    .filter_map(|c| {
      ManagedLabels::parse(&c.labels).ok().map(|labels| {
        json!({ "container_name": c.name, "labels": labels.to_map() })
      })
    })
    .collect();
  Ok(Response(policies))
}

async fn get_labels(
  State(state): State<Arc<AppState>>,
  Path(container): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let containers = state.runtime.list_containers().await.map_err(OpError::from)?;
  let found = containers
    .into_iter()
    .find(|c| c.name == container)
    .ok_or_else(|| OpError::NotFound(container.clone()))?;
  let labels = ManagedLabels::parse(&found.labels)
    .map_err(|e| OpError::BadRequest(e.to_string()))?;
  Ok(Response(labels.to_map()))
}

#[derive(Deserialize)]
struct SetLabelsRequest {
  name: String,
  assignments: Vec<LabelAssignment>,
  #[serde(default)]
  no_restart: bool,
  #[serde(default)]
  force: bool,
}

async fn set_labels(
  State(state): State<Arc<AppState>>,
  Json(req): Json<SetLabelsRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let op_id = state
    .label
    .set_labels(&req.name, req.assignments, req.no_restart, req.force)
    .await?;
  Ok(Response(json!({ "operation_id": op_id })))
}

#[derive(Deserialize)]
struct RemoveLabelsRequest {
  name: String,
  keys: Vec<String>,
  #[serde(default)]
  no_restart: bool,
  #[serde(default)]
  force: bool,
}

async fn remove_labels(
  State(state): State<Arc<AppState>>,
  Json(req): Json<RemoveLabelsRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let assignments = req
    .keys
    .into_iter()
    .map(|key| LabelAssignment { key, value: None })
    .collect();
  let op_id = state
    .label
    .set_labels(&req.name, assignments, req.no_restart, req.force)
    .await?;
  Ok(Response(json!({ "operation_id": op_id })))
}

#[derive(Deserialize)]
struct BatchLabelsRequest {
  names: Vec<String>,
  assignments: Vec<LabelAssignment>,
  #[serde(default)]
  no_restart: bool,
  #[serde(default)]
  force: bool,
}

async fn batch_labels(
  State(state): State<Arc<AppState>>,
  Json(req): Json<BatchLabelsRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let mut op_ids = Vec::with_capacity(req.names.len());
  for name in &req.names {
    let op_id = state
      .label
      .set_labels(name, req.assignments.clone(), req.no_restart, req.force)
      .await?;
    op_ids.push(op_id);
  }
  Ok(Response(json!({ "operation_ids": op_ids })))
}

#[derive(Deserialize)]
struct RollbackLabelsRequest {
  operation_id: String,
  #[serde(default)]
  force: bool,
}

async fn rollback_labels(
  State(state): State<Arc<AppState>>,
  Json(req): Json<RollbackLabelsRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let op_id = state.label.rollback(&req.operation_id, req.force).await?;
  Ok(Response(json!({ "operation_id": op_id })))
}
