//! Axum query endpoint serving synced tables as JSON.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hbc_store::{PgStore, StorageError, TableReader, POOL_EXHAUSTED_MESSAGE};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "hbc-web";

const DEFAULT_PORT: u16 = 5000;

#[derive(Clone)]
pub struct AppState {
    pub reader: Arc<dyn TableReader>,
}

impl AppState {
    pub fn new(reader: Arc<dyn TableReader>) -> Self {
        Self { reader }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FetchQuery {
    table: Option<String>,
    code: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/fetch", get(fetch_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("HBC_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let database = hbc_sync::database_config_from_env()?;
    let store = PgStore::new(hbc_store::connect_lazy(&database)?);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "query endpoint listening");
    axum::serve(listener, app(AppState::new(Arc::new(store)))).await?;
    Ok(())
}

/// Comma-separated codes, trimmed; `None` when no usable code is given.
fn parse_codes(raw: Option<&str>) -> Option<Vec<String>> {
    let codes = raw?
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    (!codes.is_empty()).then_some(codes)
}

async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FetchQuery>,
) -> Response {
    let Some(table) = query.table.filter(|t| !t.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "Table name is required".to_string());
    };

    match state.reader.table_exists(&table).await {
        Ok(true) => {}
        Ok(false) => {
            return error_json(
                StatusCode::NOT_FOUND,
                format!("Table {table} does not exist"),
            )
        }
        Err(err) => return storage_error(&table, err),
    }

    let codes = parse_codes(query.code.as_deref());
    match state.reader.fetch_rows(&table, codes.as_deref()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => storage_error(&table, err),
    }
}

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn storage_error(table: &str, err: StorageError) -> Response {
    error!(table, error = %err, "query failed");
    let message = if err.is_pool_exhausted() {
        POOL_EXHAUSTED_MESSAGE
    } else {
        "Database error while reading table"
    };
    error_json(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}
