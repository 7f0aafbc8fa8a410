//! REST API handlers.
//!
//! Reads go straight to the metadata store; refreshes and validation passes
//! go through the orchestrator so they are logged and serialized like any
//! other batch.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use martview_refresh::{RefreshError, RefreshRequest, RefreshTrigger};

use crate::ApiState;

const DEFAULT_LIMIT: usize = 50;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn refresh_error_response(err: &RefreshError) -> axum::response::Response {
    let status = match err {
        RefreshError::UnknownView(_) | RefreshError::UnknownModule(_) => StatusCode::NOT_FOUND,
        RefreshError::NoQualityChecker => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&err.to_string(), status).into_response()
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

// ── Views ──────────────────────────────────────────────────────

/// GET /api/v1/views
pub async fn list_views(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.store().list_views() {
        Ok(views) => ApiResponse::ok(views).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/views/{name}/freshness
pub async fn get_view_freshness(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_view_freshness(&name) {
        Ok(freshness) => ApiResponse::ok(freshness).into_response(),
        Err(e) => refresh_error_response(&e),
    }
}

// ── Refresh ────────────────────────────────────────────────────

/// Refresh request body. At most one of `module` and `views` may be set;
/// neither means every view.
#[derive(Debug, Default, serde::Deserialize)]
pub struct RefreshBody {
    pub module: Option<String>,
    pub views: Option<Vec<String>>,
    pub concurrent: Option<bool>,
    pub triggered_by: Option<String>,
}

/// POST /api/v1/refresh
pub async fn trigger_refresh(
    State(state): State<ApiState>,
    Json(body): Json<RefreshBody>,
) -> impl IntoResponse {
    let concurrent = body.concurrent.unwrap_or(state.concurrent_default);
    let trigger = RefreshTrigger::api(body.triggered_by.as_deref().unwrap_or("api"));
    info!(module = ?body.module, views = ?body.views, concurrent, "refresh requested over api");

    let result = match (body.module, body.views) {
        (Some(_), Some(_)) => {
            return error_response(
                "specify either module or views, not both",
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
        (Some(module), None) => {
            state
                .orchestrator
                .refresh_module(&module, concurrent, trigger)
                .await
        }
        (None, Some(views)) => {
            if views.is_empty() {
                return error_response("views must not be empty", StatusCode::BAD_REQUEST)
                    .into_response();
            }
            let request = RefreshRequest {
                scope: "custom".to_string(),
                concurrent,
                trigger,
            };
            state.orchestrator.refresh(&views, &request).await
        }
        (None, None) => state.orchestrator.refresh_all(concurrent, trigger).await,
    };

    match result {
        Ok(batch) => ApiResponse::ok(batch).into_response(),
        Err(e) => refresh_error_response(&e),
    }
}

/// GET /api/v1/refresh/history
pub async fn refresh_history(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.orchestrator.get_refresh_history(query.limit()) {
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => refresh_error_response(&e),
    }
}

// ── Operations ─────────────────────────────────────────────────

/// GET /api/v1/operations
pub async fn list_operations(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.orchestrator.store().list_logs(query.limit()) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Data quality ───────────────────────────────────────────────

#[derive(Debug, Default, serde::Deserialize)]
pub struct IssueQuery {
    /// Only open issues.
    #[serde(default)]
    pub open: bool,
}

/// GET /api/v1/quality/issues
pub async fn list_quality_issues(
    State(state): State<ApiState>,
    Query(query): Query<IssueQuery>,
) -> impl IntoResponse {
    let store = state.orchestrator.store();
    let issues = if query.open {
        store.list_open_issues()
    } else {
        store.list_quality_issues()
    };
    match issues {
        Ok(issues) => ApiResponse::ok(issues).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/quality/run
pub async fn run_quality_checks(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.run_quality_checks().await {
        Ok(pass) => ApiResponse::ok(pass).into_response(),
        Err(e) => refresh_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use martview_refresh::{
        BoxFuture, CheckResult, Orchestrator, OrchestratorSettings, QualityChecker,
        RecomputeError, ViewBackend, ViewDefinition, ViewRegistry,
    };
    use martview_state::{
        MetadataStore, QualityCategory, QualityFinding, RefreshCadence, Severity,
    };
    use tower::ServiceExt;

    /// Recomputes every view to 10 rows except `mv_broken`.
    struct StubBackend;

    impl ViewBackend for StubBackend {
        fn supports(&self, _view: &str) -> bool {
            true
        }

        fn recompute<'a>(
            &'a self,
            view: &'a str,
            _concurrent: bool,
        ) -> BoxFuture<'a, Result<u64, RecomputeError>> {
            Box::pin(async move {
                if view == "mv_broken" {
                    Err(RecomputeError::new("connection lost"))
                } else {
                    Ok(10)
                }
            })
        }

        fn row_count<'a>(&'a self, _view: &'a str) -> BoxFuture<'a, Option<u64>> {
            Box::pin(async { None })
        }
    }

    struct OneFinding;

    impl QualityChecker for OneFinding {
        fn run_all_checks(&self) -> BoxFuture<'_, Vec<CheckResult>> {
            Box::pin(async {
                vec![Ok(QualityFinding {
                    check_name: "negative_order_totals".to_string(),
                    category: QualityCategory::Accuracy,
                    severity: Severity::Critical,
                    source: "orders".to_string(),
                    affected_count: 2,
                    description: "2 orders with a negative total".to_string(),
                })]
            })
        }
    }

    fn orchestrator(with_checker: bool) -> Arc<Orchestrator> {
        let registry = ViewRegistry::new(vec![
            ViewDefinition::snapshot("mv_sales_daily", "sales", RefreshCadence::Daily),
            ViewDefinition::snapshot("mv_broken", "marketing", RefreshCadence::Weekly),
        ])
        .unwrap();
        let orchestrator = Orchestrator::new(
            MetadataStore::open_in_memory().unwrap(),
            Arc::new(registry),
            Arc::new(StubBackend),
            OrchestratorSettings::default(),
        )
        .unwrap();
        if with_checker {
            Arc::new(orchestrator.with_quality_checker(Arc::new(OneFinding)))
        } else {
            Arc::new(orchestrator)
        }
    }

    fn test_state() -> ApiState {
        ApiState {
            orchestrator: orchestrator(true),
            concurrent_default: false,
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_views_returns_catalog() {
        let resp = list_views(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn freshness_of_unknown_view_is_not_found() {
        let resp = get_view_freshness(State(test_state()), Path("mv_nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("mv_nope"));
    }

    #[tokio::test]
    async fn refresh_all_reports_partial_failure() {
        let state = test_state();
        let resp = trigger_refresh(State(state.clone()), Json(RefreshBody::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        let outcomes = json["data"]["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0]["status"], "success");
        assert_eq!(outcomes[1]["status"], "failed");
        assert_eq!(outcomes[1]["error"], "connection lost");
        assert_eq!(json["data"]["trigger_source"], "api");

        let resp = get_view_freshness(State(state), Path("mv_sales_daily".to_string()))
            .await
            .into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"]["last_row_count"], 10);
    }

    #[tokio::test]
    async fn refresh_rejects_module_and_views_together() {
        let body = RefreshBody {
            module: Some("sales".to_string()),
            views: Some(vec!["mv_sales_daily".to_string()]),
            ..Default::default()
        };
        let resp = trigger_refresh(State(test_state()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_unknown_module_is_not_found() {
        let body = RefreshBody {
            module: Some("finance".to_string()),
            ..Default::default()
        };
        let resp = trigger_refresh(State(test_state()), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_and_operations_follow_a_refresh() {
        let state = test_state();
        let body = RefreshBody {
            views: Some(vec!["mv_sales_daily".to_string()]),
            triggered_by: Some("ops-dashboard".to_string()),
            ..Default::default()
        };
        trigger_refresh(State(state.clone()), Json(body)).await;

        let resp = refresh_history(State(state.clone()), Query(LimitQuery { limit: Some(5) }))
            .await
            .into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["data"][0]["outcome"]["view_name"], "mv_sales_daily");

        let resp = list_operations(State(state), Query(LimitQuery::default()))
            .await
            .into_response();
        let json = body_json(resp).await;
        let entries = json["data"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e["status"] == "success"));
    }

    #[tokio::test]
    async fn quality_run_then_list_open_issues() {
        let state = test_state();
        let resp = run_quality_checks(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_quality_issues(State(state), Query(IssueQuery { open: true }))
            .await
            .into_response();
        let json = body_json(resp).await;
        let issues = json["data"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["check_name"], "negative_order_totals");
        assert_eq!(issues[0]["status"], "open");
    }

    #[tokio::test]
    async fn quality_run_without_checker_is_unavailable() {
        let state = ApiState {
            orchestrator: orchestrator(false),
            concurrent_default: false,
        };
        let resp = run_quality_checks(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn router_serves_nested_routes() {
        let router = crate::build_router(test_state());
        let req = Request::builder()
            .uri("/api/v1/refresh/history?limit=3")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/refresh")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"module":"sales","concurrent":true}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["scope"], "sales");
        assert_eq!(json["data"]["concurrent"], true);
    }
}
