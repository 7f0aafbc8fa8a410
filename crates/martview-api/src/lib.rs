//! martview-api — JSON API over the refresh layer.
//!
//! Dashboards read freshness and history from here instead of querying the
//! metadata store directly, and can trigger refreshes and validation passes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/views` | Registered views with freshness |
//! | GET | `/api/v1/views/{name}/freshness` | Freshness of one view |
//! | GET | `/api/v1/refresh/history?limit=` | Recent refresh outcomes |
//! | POST | `/api/v1/refresh` | Run a refresh batch |
//! | GET | `/api/v1/operations?limit=` | Recent operation log entries |
//! | GET | `/api/v1/quality/issues?open=` | Data-quality issues |
//! | POST | `/api/v1/quality/run` | Run the quality checks |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use martview_refresh::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Used when a refresh request does not say.
    pub concurrent_default: bool,
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/views", get(handlers::list_views))
        .route("/views/{name}/freshness", get(handlers::get_view_freshness))
        .route("/refresh", post(handlers::trigger_refresh))
        .route("/refresh/history", get(handlers::refresh_history))
        .route("/operations", get(handlers::list_operations))
        .route("/quality/issues", get(handlers::list_quality_issues))
        .route("/quality/run", post(handlers::run_quality_checks))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
