// Funding Watch - Web Server
// Read-only REST API over the monitor's database

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use funding_watch::{
    db, ChangeRecord, FundingAssessment, LocalClock, MonitorConfig, MonitorError,
    QuotaRotator, Snapshot, SourceUsage, SqliteUsageStore, DEFAULT_CONFIG_PATH,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    rotator: Arc<QuotaRotator>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn err(data: T, message: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

fn internal_error<T: Serialize>(context: &str, e: MonitorError, empty: T) -> axum::response::Response {
    eprintln!("Error {}: {}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::err(empty, e.to_string()))).into_response()
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/usage - Today's per-source usage
async fn get_usage(State(state): State<AppState>) -> impl IntoResponse {
    match state.rotator.usage() {
        Ok(usage) => (StatusCode::OK, Json(ApiResponse::ok(usage))).into_response(),
        Err(e) => internal_error("getting usage", e, Vec::<SourceUsage>::new()),
    }
}

/// GET /api/assessments/:entity?limit=N - Latest assessments of an entity
async fn get_assessments(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let entity = decode(&entity);
    let Ok(conn) = state.db.lock() else {
        return internal_error("locking database", MonitorError::Persistence("lock poisoned".into()), Vec::<FundingAssessment>::new());
    };

    match db::get_assessments(&conn, &entity, query.limit.unwrap_or(20)) {
        Ok(assessments) => (StatusCode::OK, Json(ApiResponse::ok(assessments))).into_response(),
        Err(e) => internal_error(&format!("getting assessments for {}", entity), e, Vec::<FundingAssessment>::new()),
    }
}

/// GET /api/snapshots/:entity - Snapshot history, oldest first
async fn get_snapshots(State(state): State<AppState>, Path(entity): Path<String>) -> impl IntoResponse {
    let entity = decode(&entity);
    let Ok(conn) = state.db.lock() else {
        return internal_error("locking database", MonitorError::Persistence("lock poisoned".into()), Vec::<Snapshot>::new());
    };

    match db::snapshot_history(&conn, &entity) {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::ok(history.versions().to_vec()))).into_response(),
        Err(e) => internal_error(&format!("getting snapshots for {}", entity), e, Vec::<Snapshot>::new()),
    }
}

/// GET /api/changes/:day - Change log of one day (YYYY-MM-DD)
async fn get_changes(State(state): State<AppState>, Path(day): Path<String>) -> impl IntoResponse {
    let Ok(day) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(Vec::<ChangeRecord>::new(), format!("invalid day: {}", day))),
        )
            .into_response();
    };
    let Ok(conn) = state.db.lock() else {
        return internal_error("locking database", MonitorError::Persistence("lock poisoned".into()), Vec::<ChangeRecord>::new());
    };

    match db::get_changes_for_day(&conn, day) {
        Ok(changes) => (StatusCode::OK, Json(ApiResponse::ok(changes))).into_response(),
        Err(e) => internal_error(&format!("getting changes for {}", day), e, Vec::<ChangeRecord>::new()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("FUNDING_WATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌐 Funding Watch - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("FUNDING_WATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match MonitorConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let db_path = config.database_path();
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: funding-watch check-all");
        eprintln!("   to record assessments first.");
        std::process::exit(1);
    }

    let conn = match db::open_database(&db_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("❌ Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    println!("✓ Database opened: {:?}", db_path);

    let db = Arc::new(Mutex::new(conn));
    let store = Arc::new(SqliteUsageStore::new(Arc::clone(&db)));
    let rotator = Arc::new(QuotaRotator::new(config.sources.clone(), store, Arc::new(LocalClock)));
    let state = AppState { db, rotator };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/usage", get(get_usage))
        .route("/assessments/:entity", get(get_assessments))
        .route("/snapshots/:entity", get(get_snapshots))
        .route("/changes/:day", get(get_changes))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(CorsLayer::permissive());

    let addr = std::env::var("FUNDING_WATCH_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("❌ Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/usage", addr);
    println!("\n   Press Ctrl+C to stop\n");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ Server error: {}", e);
        std::process::exit(1);
    }
}
