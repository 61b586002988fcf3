// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API for guarded operations.
//!
//! Every apply re-plans the submitted request and refuses plans whose content
//! no longer matches, so the steps an operator confirmed are the steps that
//! run.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::coordinator::{ApplyError, CoordinatorError, DEFAULT_POLL_LINES};
use crate::application::firewall_guard::FirewallError;
use crate::application::mount_options::MountOptionsError;
use crate::application::services::Services;
use crate::domain::operation::{OperationKind, OperationRequest, ResourceId};
use crate::domain::plan::{Plan, PlanError, RiskClass};
use crate::domain::repository::RepositoryError;
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};

const DEFAULT_LIST_LIMIT: usize = 50;

pub struct AppState {
    pub services: Services,
    pub start_time: Instant,
}

pub fn app(services: Services) -> Router {
    let state = Arc::new(AppState {
        services,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/plans", post(create_plan_handler))
        .route(
            "/api/transactions",
            post(apply_handler).get(list_transactions_handler).delete(prune_handler),
        )
        .route("/api/transactions/{id}", get(get_transaction_handler))
        .route("/api/transactions/{id}/log", get(poll_log_handler))
        .route("/api/transactions/{id}/events", get(stream_events_handler))
        .route(
            "/api/pools/{id}/mount-options",
            get(get_mount_options_handler).put(set_mount_options_handler),
        )
        .route("/api/firewall", get(firewall_state_handler))
        .route("/api/firewall/confirm", post(confirm_firewall_handler))
        .route("/api/firewall/rollback", post(rollback_firewall_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body: `{"error": "...", "transaction_id"?: "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    transaction_id: Option<TransactionId>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            transaction_id: None,
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!("Request failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.transaction_id {
            Some(id) => json!({ "error": self.message, "transaction_id": id }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::internal(err)
    }
}

impl From<ApplyError> for ApiError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Busy(id) => ApiError {
                status: StatusCode::CONFLICT,
                message: format!("resource is busy with transaction {}", id),
                transaction_id: Some(id),
            },
            ApplyError::ConfirmationMismatch => ApiError::new(StatusCode::FORBIDDEN, err.to_string()),
            ApplyError::RiskClassMismatch { .. } => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            ApplyError::Repository(e) => ApiError::internal(e),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<FirewallError> for ApiError {
    fn from(err: FirewallError) -> Self {
        match err {
            FirewallError::NotPending => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<MountOptionsError> for ApiError {
    fn from(err: MountOptionsError) -> Self {
        match err {
            MountOptionsError::Validation(e) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            MountOptionsError::Repository(e) => ApiError::internal(e),
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(flatten)]
    pub plan: Plan,
    pub confirmation_phrase: String,
}

async fn create_plan_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OperationRequest>,
) -> Result<Json<PlanResponse>, ApiError> {
    let plan = state.services.planner.plan(&request)?;
    let confirmation_phrase = plan.confirmation_phrase().to_string();
    Ok(Json(PlanResponse {
        plan,
        confirmation_phrase,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub plan: Plan,
    pub risk_class: RiskClass,
    pub confirmation: String,
}

async fn apply_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let fresh = state.services.planner.plan(&request.plan.request)?;
    if fresh != request.plan {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "plan is stale: re-plan and confirm again",
        ));
    }

    let id = state
        .services
        .coordinator
        .apply(fresh, request.risk_class, &request.confirmation)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "transaction_id": id }))))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub resource_id: ResourceId,
    pub kind: OperationKind,
    pub risk_class: RiskClass,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub log_lines: usize,
}

impl From<&Transaction> for TransactionSummary {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            resource_id: tx.resource_id.clone(),
            kind: tx.kind,
            risk_class: tx.risk_class,
            status: tx.status(),
            created_at: tx.created_at,
            ended_at: tx.ended_at,
            log_lines: tx.log_len(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    resource: Option<String>,
    limit: Option<usize>,
}

async fn list_transactions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TransactionSummary>>, ApiError> {
    let resource = query.resource.map(ResourceId::new);
    let transactions = state
        .services
        .coordinator
        .list(resource.as_ref(), query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(transactions.iter().map(TransactionSummary::from).collect()))
}

async fn get_transaction_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionSummary>, ApiError> {
    let transaction = state.services.coordinator.get(&TransactionId(id)).await?;
    Ok(Json(TransactionSummary::from(&transaction)))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default)]
    cursor: usize,
    max_lines: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogResponse {
    pub lines: Vec<String>,
    pub next_cursor: usize,
    pub status: TransactionStatus,
}

async fn poll_log_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogResponse>, ApiError> {
    let transaction = state.services.coordinator.get(&TransactionId(id)).await?;
    let page = transaction.page(query.cursor, query.max_lines.unwrap_or(DEFAULT_POLL_LINES));
    Ok(Json(LogResponse {
        lines: page.lines,
        next_cursor: page.next_cursor,
        status: transaction.status(),
    }))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

async fn stream_events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<KeepAliveStream<EventStream>>, ApiError> {
    let id = TransactionId(id);
    // 404 for unknown ids instead of an empty stream
    state.services.coordinator.get(&id).await?;

    let receiver = state.services.event_bus.raw_receiver();
    let stream = BroadcastStream::new(receiver).filter_map(move |event| match event {
        Ok(event) if event.transaction_id() == &id => Some(Ok(Event::default()
            .event("transaction")
            .data(serde_json::to_string(&event).unwrap_or_default()))),
        _ => None,
    });

    let stream: EventStream = Box::pin(stream);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct PruneQuery {
    older_than_days: i64,
}

async fn prune_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PruneQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if query.older_than_days < 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "older_than_days must not be negative"));
    }
    let older_than = chrono::Duration::try_days(query.older_than_days)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "older_than_days is out of range"))?;
    let removed = state.services.coordinator.prune(older_than).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOptionsResponse {
    pub resource_id: ResourceId,
    pub options: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    pub reboot_required: bool,
}

async fn get_mount_options_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MountOptionsResponse>, ApiError> {
    let resource = ResourceId::new(id);
    let service = &state.services.mount_options;
    let options = service.get(&resource).await?;
    let details = service.details(&resource).await?;
    let reboot_required = service.reboot_required(&resource).await?;

    Ok(Json(MountOptionsResponse {
        resource_id: resource,
        options,
        active: details.active.map(|spec| spec.to_string()),
        reboot_required,
    }))
}

#[derive(Debug, Deserialize)]
struct SetMountOptionsRequest {
    options: String,
}

async fn set_mount_options_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SetMountOptionsRequest>,
) -> Result<Json<crate::application::mount_options::MountOptionsUpdate>, ApiError> {
    let update = state
        .services
        .mount_options
        .set(&ResourceId::new(id), &request.options)
        .await?;
    Ok(Json(update))
}

async fn firewall_state_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::domain::firewall::FirewallState>, ApiError> {
    Ok(Json(state.services.firewall.state().await?))
}

async fn confirm_firewall_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.services.firewall.confirm().await?;
    Ok(Json(json!({ "status": "confirmed", "transaction_id": id })))
}

async fn rollback_firewall_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.services.firewall.rollback().await?;
    Ok(Json(json!({ "status": "rolled_back", "transaction_id": id })))
}
