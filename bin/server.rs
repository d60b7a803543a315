// Regional Sync - Web Server
// REST API over the mirror, plus an endpoint that triggers a sync run

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use regional_sync::{
    init_tracing, list_active_units, list_all_units, unit_history, AppConfig, RegionalStore,
    SyncError, Synchronizer,
};

#[derive(Parser, Debug)]
#[command(name = "regional-server", version, about = "REST API for the regional unit mirror")]
struct Args {
    /// TOML config file
    #[arg(long, env = "REGIONAL_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "REGIONAL_SYNC_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    sync: Arc<Synchronizer>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

fn sync_error_response(err: &SyncError) -> Response {
    let status = if err.is_source_failure() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, err.to_string())
}

/// Run `job` on the blocking pool: SQLite and the HTTP source client are both synchronous.
async fn run_blocking<T, F>(state: &AppState, job: F) -> Result<T, Response>
where
    F: FnOnce(&Synchronizer) -> regional_sync::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let sync = Arc::clone(&state.sync);
    match tokio::task::spawn_blocking(move || job(&sync)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!(error = %err, "request failed");
            Err(sync_error_response(&err))
        }
        Err(err) => {
            error!(error = %err, "worker task failed");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/regionais - Every stored version
async fn get_units(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |sync| sync.read(list_all_units)).await {
        Ok(units) => (StatusCode::OK, Json(ApiResponse::ok(units))).into_response(),
        Err(response) => response,
    }
}

/// GET /api/regionais/ativas - Active units only
async fn get_active_units(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |sync| sync.read(list_active_units)).await {
        Ok(units) => (StatusCode::OK, Json(ApiResponse::ok(units))).into_response(),
        Err(response) => response,
    }
}

/// GET /api/regionais/:external_id/history - Version chain of one unit
async fn get_unit_history(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Response {
    let result = run_blocking(&state, move |sync| {
        sync.read(|conn| unit_history(conn, external_id))
    })
    .await;

    match result {
        Ok(versions) if versions.is_empty() => error_response(
            StatusCode::NOT_FOUND,
            format!("no versions recorded for external id {external_id}"),
        ),
        Ok(versions) => (StatusCode::OK, Json(ApiResponse::ok(versions))).into_response(),
        Err(response) => response,
    }
}

/// POST /api/regionais/sincronizar - Run one reconciliation
async fn synchronize(State(state): State<AppState>) -> Response {
    match run_blocking(&state, |sync| sync.synchronize()).await {
        Ok(report) => {
            info!(run_id = %report.run_id, "{}", report.summary());
            (StatusCode::OK, Json(ApiResponse::ok(report))).into_response()
        }
        Err(response) => response,
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/regionais", get(get_units))
        .route("/regionais/ativas", get(get_active_units))
        .route("/regionais/:external_id/history", get(get_unit_history))
        .route("/regionais/sincronizar", post(synchronize))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging.level, config.logging.format)?;

    println!("🌐 Regional Sync - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = RegionalStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path.display()))?;
    println!("✓ Database opened: {}", config.database_path.display());

    // Built outside the runtime: the blocking HTTP client must not be created or dropped in async code
    let source = config.build_source().context("cannot build external source")?;
    println!("✓ Source: {}", source.describe());

    let sync = Arc::new(Synchronizer::new(store, source, config.engine()));
    let state = AppState {
        sync: Arc::clone(&sync),
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(serve(state, &args.bind))?;
    drop(runtime);

    drop(sync);
    Ok(())
}

async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind to {bind}"))?;

    println!("\n🚀 Server running on http://{}", bind);
    println!("   API:  http://{}/api/regionais/ativas", bind);
    println!("   Sync: POST http://{}/api/regionais/sincronizar", bind);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
