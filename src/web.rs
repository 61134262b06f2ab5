//! Admin API router and handlers.
//!
//! REST surface for the moderation dashboard: catalog and policy
//! management, prompt configuration, warning review, and the user
//! maintenance operations (ignore, recalculate, reset).

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tower_http::cors::CorsLayer;

use crate::catalog::{LevelPatch, NewLevel, NewRule, RuleCatalog, RulePatch};
use crate::database::Database;
use crate::error::MagistrateError;
use crate::executor::PunishmentExecutor;
use crate::models::{PunishmentDecision, PunishmentKind};
use crate::policy::{NewPunishmentRule, PunishmentPolicy, PunishmentRulePatch};
use crate::prompt::PromptStore;
use crate::scoring::ScoringEngine;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Structured error body returned by every failing route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub catalog: Arc<RuleCatalog>,
    pub policy: Arc<PunishmentPolicy>,
    pub prompts: Arc<PromptStore>,
    pub engine: Arc<ScoringEngine>,
    pub executor: Arc<dyn PunishmentExecutor>,
}

/// Request logging middleware layer.
#[derive(Clone)]
pub struct RequestLoggingLayer;

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingService { inner }
    }
}

/// Service that logs requests with method, path, status, and latency.
#[derive(Clone)]
pub struct RequestLoggingService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestLoggingService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let start = std::time::Instant::now();

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let duration = start.elapsed();

            tracing::info!(
                method = %method,
                path = %uri.path(),
                status = %response.status().as_u16(),
                duration_ms = %duration.as_millis(),
                "HTTP request"
            );

            Ok(response)
        })
    }
}

/// Map an engine error onto a status code and structured body.
fn api_error(error: MagistrateError) -> ApiError {
    let status = match &error {
        MagistrateError::NotFound(_) => StatusCode::NOT_FOUND,
        MagistrateError::Conflict(_) => StatusCode::CONFLICT,
        MagistrateError::Config(_) | MagistrateError::Json(_) => StatusCode::BAD_REQUEST,
        MagistrateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        MagistrateError::ClassifierApi(_)
        | MagistrateError::DiscordApi(_)
        | MagistrateError::Http(_) => StatusCode::BAD_GATEWAY,
        MagistrateError::Database(_) | MagistrateError::InternalState(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    if error.is_critical() {
        tracing::error!(error = %error, "Critical error in admin API");
    }

    (
        status,
        Json(ErrorResponse {
            error: error.user_message(),
        }),
    )
}

/// Build the admin API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/levels", get(list_levels))
        .route("/api/levels", post(create_level))
        .route("/api/levels/{id}", put(update_level))
        .route("/api/levels/{id}", delete(delete_level))
        .route("/api/rules", get(list_rules))
        .route("/api/rules", post(create_rule))
        .route("/api/rules/{id}", put(update_rule))
        .route("/api/rules/{id}", delete(delete_rule))
        .route("/api/rules/reorder", post(reorder_rules))
        .route("/api/punishment-rules", get(list_punishment_rules))
        .route("/api/punishment-rules", post(create_punishment_rule))
        .route("/api/punishment-rules/{id}", put(update_punishment_rule))
        .route("/api/punishment-rules/{id}", delete(delete_punishment_rule))
        .route("/api/prompt", get(get_prompt))
        .route("/api/prompt", put(set_prompt))
        .route("/api/warnings", get(list_warnings))
        .route("/api/warnings/{id}/ignore", post(ignore_warning))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/recalculate", post(recalculate_user))
        .route("/api/users/{id}/reset", post(reset_user))
        .route("/api/users/{id}/punishments", get(list_punishments))
        .layer(RequestLoggingLayer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.db.health_check().await.map_err(api_error)?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "built_at": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
    })))
}

// ========== Warning levels ==========

async fn list_levels(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let levels = state.catalog.list_levels(true).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "levels": levels })))
}

async fn create_level(
    State(state): State<AppState>,
    Json(new): Json<NewLevel>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let level = state.catalog.create_level(new).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "level": level }))))
}

async fn update_level(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<LevelPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let level = state
        .catalog
        .update_level(id, patch)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "level": level })))
}

async fn delete_level(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.catalog.delete_level(id).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ========== Rules ==========

#[derive(Debug, Deserialize)]
struct RulesQuery {
    level_id: Option<i64>,
}

async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<RulesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = state
        .catalog
        .list_rules(query.level_id)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "rules": rules })))
}

async fn create_rule(
    State(state): State<AppState>,
    Json(new): Json<NewRule>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let rule = state.catalog.create_rule(new).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "rule": rule }))))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<RulePatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule = state
        .catalog
        .update_rule(id, patch)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "rule": rule })))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.catalog.delete_rule(id).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct ReorderRequest {
    level_id: i64,
    ordered_ids: Vec<i64>,
}

async fn reorder_rules(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = state
        .catalog
        .reorder_rules(req.level_id, &req.ordered_ids)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "rules": rules })))
}

// ========== Punishment rules ==========

async fn list_punishment_rules(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = state.policy.list_rules().await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "punishment_rules": rules })))
}

async fn create_punishment_rule(
    State(state): State<AppState>,
    Json(new): Json<NewPunishmentRule>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let rule = state.policy.create_rule(new).await.map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "punishment_rule": rule })),
    ))
}

async fn update_punishment_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<PunishmentRulePatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule = state
        .policy
        .update_rule(id, patch)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "punishment_rule": rule })))
}

async fn delete_punishment_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.policy.delete_rule(id).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ========== Analysis prompt ==========

async fn get_prompt(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let active = state.prompts.active().await.map_err(api_error)?;

    Ok(match active {
        Some(prompt) => Json(serde_json::json!({
            "body": prompt.body,
            "source": "custom",
            "created_by": prompt.created_by,
            "created_at": prompt.created_at.to_rfc3339(),
        })),
        None => Json(serde_json::json!({
            "body": crate::prompt::DEFAULT_ANALYSIS_PROMPT,
            "source": "default",
        })),
    })
}

#[derive(Debug, Deserialize)]
struct SetPromptRequest {
    body: String,
    #[serde(default = "default_actor")]
    updated_by: String,
}

fn default_actor() -> String {
    "admin".to_string()
}

async fn set_prompt(
    State(state): State<AppState>,
    Json(req): Json<SetPromptRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let prompt = state
        .prompts
        .set_prompt(&req.body, &req.updated_by)
        .await
        .map_err(api_error)?;

    Ok(Json(serde_json::json!({
        "body": prompt.body,
        "source": "custom",
        "created_by": prompt.created_by,
        "created_at": prompt.created_at.to_rfc3339(),
    })))
}

// ========== Warnings ==========

#[derive(Debug, Deserialize)]
struct WarningsQuery {
    user_id: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn list_warnings(
    State(state): State<AppState>,
    Query(query): Query<WarningsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let warnings = state
        .engine
        .list_warnings(
            query.user_id.as_deref(),
            query.limit.unwrap_or(50).min(500),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(api_error)?;

    let count = warnings.len();
    Ok(Json(serde_json::json!({
        "warnings": warnings,
        "count": count,
    })))
}

#[derive(Debug, Deserialize)]
struct IgnoreRequest {
    moderator: String,
    reason: String,
}

async fn ignore_warning(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<IgnoreRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .engine
        .ignore_warning(id, &req.moderator, &req.reason)
        .await
        .map_err(api_error)?;

    let execution_failed = apply_status_changes(
        &state.executor,
        &outcome.warning.user_id,
        &[],
        &outcome.lifted,
    )
    .await;

    Ok(Json(serde_json::json!({
        "warning": outcome.warning,
        "new_total": outcome.new_total,
        "lifted": outcome.lifted,
        "execution_failed": execution_failed,
    })))
}

// ========== Users ==========

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .engine
        .get_user(&id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(MagistrateError::NotFound(format!("user {}", id))))?;

    Ok(Json(serde_json::json!({ "user": user })))
}

async fn recalculate_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.engine.recalculate(&id).await.map_err(api_error)?;

    let execution_failed = apply_status_changes(
        &state.executor,
        &outcome.user.id,
        &outcome.granted,
        &outcome.lifted,
    )
    .await;

    Ok(Json(serde_json::json!({
        "user": outcome.user,
        "granted": outcome.granted,
        "lifted": outcome.lifted,
        "execution_failed": execution_failed,
    })))
}

async fn reset_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.engine.reset_warnings(&id).await.map_err(api_error)?;

    let execution_failed =
        apply_status_changes(&state.executor, &outcome.user.id, &[], &outcome.lifted).await;

    Ok(Json(serde_json::json!({
        "user": outcome.user,
        "ignored_count": outcome.ignored_count,
        "lifted": outcome.lifted,
        "execution_failed": execution_failed,
    })))
}

async fn list_punishments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let punishments = state.db.get_punishments(&id).await.map_err(api_error)?;
    let count = punishments.len();
    Ok(Json(serde_json::json!({
        "punishments": punishments,
        "count": count,
    })))
}

/// Push granted and lifted punishments to the platform, best-effort.
///
/// Returns true if any side effect failed; the ledger is already
/// committed either way.
async fn apply_status_changes(
    executor: &Arc<dyn PunishmentExecutor>,
    user_id: &str,
    granted: &[PunishmentDecision],
    lifted: &[PunishmentKind],
) -> bool {
    let mut any_failed = false;

    for decision in granted {
        let result = match decision.kind {
            PunishmentKind::Mute => {
                executor
                    .mute(user_id, decision.duration_secs.unwrap_or(0), &decision.reason)
                    .await
            }
            PunishmentKind::Ban => executor.ban(user_id, &decision.reason).await,
        };
        if let Err(e) = result {
            tracing::error!(user_id = %user_id, kind = ?decision.kind, error = %e, "Failed to apply punishment");
            any_failed = true;
        }
    }

    for kind in lifted {
        let result = match kind {
            PunishmentKind::Mute => executor.unmute(user_id, "no longer justified by policy").await,
            PunishmentKind::Ban => executor.unban(user_id, "no longer justified by policy").await,
        };
        if let Err(e) = result {
            tracing::error!(user_id = %user_id, kind = ?kind, error = %e, "Failed to lift punishment");
            any_failed = true;
        }
    }

    any_failed
}
