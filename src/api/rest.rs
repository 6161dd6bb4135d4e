// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; every arena route
// requires a valid Bearer token (see `AuthBearer`).
//
// Handlers never touch the filesystem or SQLite on the async executor: every
// arena call goes through `spawn_blocking`, and mutating calls hold the arena
// lock inside `Arena` itself.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::auth::AuthBearer;
use crate::arena::promoter::package_files;
use crate::arena::validator::ValidationThresholds;
use crate::arena::{Arena, PromoteRequest};
use crate::error::ArenaError;

// =============================================================================
// Error mapping
// =============================================================================

impl ArenaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyRunning => StatusCode::CONFLICT,
            Self::MissingSnapshot(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageUnavailable(_) | Self::StorageCorrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ArenaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({ "error": self.to_string() });
        let reasons = self.reasons();
        if !reasons.is_empty() {
            body["reasons"] = serde_json::json!(reasons);
        }
        if status.is_server_error() {
            error!(status = %status, error = %self, "arena request failed");
        }
        (status, Json(body)).into_response()
    }
}

/// Errors a handler can return.
pub enum ApiError {
    Arena(ArenaError),
    /// The blocking task panicked or was cancelled.
    Internal(String),
}

impl From<ArenaError> for ApiError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Arena(e) => e.into_response(),
            Self::Internal(msg) => {
                error!(error = %msg, "arena task failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": msg })),
                )
                    .into_response()
            }
        }
    }
}

/// Run `f` against the arena on the blocking pool.
async fn blocking<T, F>(arena: &Arc<Arena>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Arena) -> Result<T, ArenaError> + Send + 'static,
    T: Send + 'static,
{
    let arena = arena.clone();
    tokio::task::spawn_blocking(move || f(&arena))
        .await
        .map_err(|e| ApiError::Internal(format!("arena task: {e}")))?
        .map_err(ApiError::from)
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST router with CORS middleware and the shared arena.
pub fn router(arena: Arc<Arena>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated reads ─────────────────────────────────────
        .route("/api/v1/arena/ranking", get(ranking))
        .route("/api/v1/arena/state", get(cup_state))
        .route("/api/v1/arena/ledger", get(ledger))
        .route("/api/v1/arena/ledger/summary", get(ledger_summary))
        .route("/api/v1/arena/notes", get(list_notes).post(add_note))
        .route("/api/v1/arena/champions", get(champions))
        .route("/api/v1/arena/scoreboard", get(scoreboard))
        // ── Authenticated mutations ─────────────────────────────────
        .route("/api/v1/arena/tick", post(tick))
        .route("/api/v1/arena/promote", post(promote))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(arena)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    strategies: usize,
    server_time: i64,
}

async fn health(State(arena): State<Arc<Arena>>) -> Result<Json<HealthResponse>, ApiError> {
    let strategies = blocking(&arena, |a| Ok(a.strategy_count())).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        strategies,
        server_time: chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Ranking & cup state
// =============================================================================

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn ranking(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(50);
    let rows = blocking(&arena, move |a| Ok(a.ranking(limit))).await?;
    Ok(Json(serde_json::json!({
        "count": rows.len(),
        "ranking": rows,
    })))
}

async fn cup_state(_auth: AuthBearer, State(arena): State<Arc<Arena>>) -> Result<impl IntoResponse, ApiError> {
    let state = blocking(&arena, |a| a.cup_state()).await?;
    Ok(Json(state))
}

async fn champions(_auth: AuthBearer, State(arena): State<Arc<Arena>>) -> Result<impl IntoResponse, ApiError> {
    let champions = blocking(&arena, |a| Ok(a.champions())).await?;
    Ok(Json(serde_json::json!({
        "count": champions.len(),
        "champions": champions,
    })))
}

async fn scoreboard(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(50);
    let mut entries = blocking(&arena, |a| Ok(a.scoreboard())).await?;
    entries.truncate(limit);
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "scoreboard": entries,
    })))
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Deserialize)]
struct StrategyQuery {
    strategy_id: String,
    limit: Option<usize>,
}

async fn ledger(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<StrategyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(50);
    let entries = blocking(&arena, move |a| a.ledger(&q.strategy_id, limit)).await?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

async fn ledger_summary(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<StrategyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(500);
    let summary = blocking(&arena, move |a| a.ledger_summary(&q.strategy_id, limit)).await?;
    Ok(Json(summary))
}

// =============================================================================
// Notes
// =============================================================================

async fn list_notes(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<StrategyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(20);
    let notes = blocking(&arena, move |a| a.notes(&q.strategy_id, limit)).await?;
    Ok(Json(serde_json::json!({ "notes": notes })))
}

#[derive(Deserialize)]
struct NoteRequest {
    strategy_id: String,
    note: String,
    #[serde(default)]
    author: Option<String>,
}

async fn add_note(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Json(req): Json<NoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.note.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "note must not be empty" })),
        )
            .into_response());
    }
    let note = blocking(&arena, move |a| a.add_note(&req.strategy_id, &req.note, req.author.as_deref())).await?;
    Ok((StatusCode::CREATED, Json(note)).into_response())
}

// =============================================================================
// Tick & promote
// =============================================================================

async fn tick(_auth: AuthBearer, State(arena): State<Arc<Arena>>) -> Result<impl IntoResponse, ApiError> {
    let report = blocking(&arena, |a| a.tick()).await?;
    info!(tick_id = %report.tick_id, "arena tick triggered via API");
    Ok(Json(serde_json::json!({
        "status": "ok",
        "report": report,
    })))
}

#[derive(Deserialize)]
struct PromoteQuery {
    strategy_id: String,
    min_trades: Option<u64>,
    min_sharpe: Option<f64>,
    max_drawdown: Option<f64>,
    #[serde(default)]
    force: bool,
}

async fn promote(
    _auth: AuthBearer,
    State(arena): State<Arc<Arena>>,
    Query(q): Query<PromoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = ValidationThresholds::default();
    let req = PromoteRequest {
        thresholds: ValidationThresholds {
            min_trades: q.min_trades.unwrap_or(defaults.min_trades),
            min_sharpe: q.min_sharpe.unwrap_or(defaults.min_sharpe),
            max_drawdown: q.max_drawdown.unwrap_or(defaults.max_drawdown),
        },
        force: q.force,
        dest_dir: None,
    };

    let strategy_id = q.strategy_id;
    let id = strategy_id.clone();
    let (pkg, files) = blocking(&arena, move |a| {
        let pkg = a.promote_strategy(&id, &req)?;
        let files = package_files(&pkg.dir)?;
        Ok((pkg, files))
    })
    .await?;
    info!(strategy_id = %strategy_id, forced = q.force, "strategy promoted via API");

    Ok(Json(serde_json::json!({
        "status": "ok",
        "strategy_id": strategy_id,
        "path": pkg.dir.display().to_string(),
        "files": files,
        "validation": pkg.validation,
    })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::arena::simulator::Simulator;
    use crate::config::{ArenaSettings, MarketSource};
    use crate::market::FixedSnapshot;

    const TOKEN: &str = "test-token";

    fn app(dir: &std::path::Path) -> (Arc<Arena>, Router) {
        std::env::set_var(crate::api::auth::TOKEN_ENV, TOKEN);
        let settings = ArenaSettings {
            data_dir: dir.to_path_buf(),
            market_source: MarketSource::Fixed,
            ..ArenaSettings::default()
        };
        let sim = Simulator::seeded(Arc::new(FixedSnapshot::new(60_000.0, 0.0)), 77);
        let arena = Arc::new(Arena::open_with(&settings, sim).unwrap());
        arena.bootstrap(5).unwrap();
        (arena.clone(), router(arena))
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let (_, app) = app(dir.path());
        let req = Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["strategies"], 5);
    }

    #[tokio::test]
    async fn arena_routes_require_token() {
        let dir = tempfile::tempdir().unwrap();
        let (_, app) = app(dir.path());
        let req = Request::builder().uri("/api/v1/arena/state").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn tick_then_read_ranking_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let (_, app) = app(dir.path());

        let resp = app.clone().oneshot(authed("POST", "/api/v1/arena/tick")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["report"]["ledger_rows"], 5);

        let resp = app.clone().oneshot(authed("GET", "/api/v1/arena/ranking?limit=3")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["count"], 3);

        let resp = app
            .clone()
            .oneshot(authed("GET", "/api/v1/arena/ledger?strategy_id=scalp_1&limit=25"))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);

        let resp = app
            .clone()
            .oneshot(authed("GET", "/api/v1/arena/ledger/summary?strategy_id=ghost"))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["total_trades"], 0);

        let resp = app
            .oneshot(authed("GET", "/api/v1/arena/scoreboard?limit=2"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(json_body(resp).await["count"].as_u64().unwrap() <= 2);
    }

    #[tokio::test]
    async fn promote_maps_rejection_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (_, app) = app(dir.path());

        let resp = app
            .clone()
            .oneshot(authed("POST", "/api/v1/arena/promote?strategy_id=scalp_1&min_trades=60"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json_body(resp).await["reasons"].as_array().is_some());

        let resp = app
            .clone()
            .oneshot(authed("POST", "/api/v1/arena/promote?strategy_id=nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(authed("POST", "/api/v1/arena/promote?strategy_id=scalp_1&force=true"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["validation"]["ok"], false);
        assert_eq!(body["files"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn notes_post_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let (arena, app) = app(dir.path());

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/arena/notes")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"strategy_id":"scalp_1","note":"tighten stops","author":"ops"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .oneshot(authed("GET", "/api/v1/arena/notes?strategy_id=scalp_1"))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["notes"][0]["note"], "tighten stops");
        assert_eq!(arena.notes("scalp_1", 20).unwrap().len(), 1);
    }

    #[test]
    fn status_codes_per_error_kind() {
        assert_eq!(ArenaError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ArenaError::AlreadyRunning.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ArenaError::MissingSnapshot("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ArenaError::StorageCorrupt("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
