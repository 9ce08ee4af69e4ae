use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use zpravy_core::ZpravyConfig;
use zpravy_executor::Executor;
use zpravy_ingest::DedupGate;
use zpravy_jobs::JobStore;
use zpravy_scheduler::Scheduler;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ZpravyConfig,
    pub store: Arc<JobStore>,
    pub gate: Arc<DedupGate>,
    pub executor: Arc<Executor>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        config: ZpravyConfig,
        store: Arc<JobStore>,
        gate: Arc<DedupGate>,
        executor: Arc<Executor>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            store,
            gate,
            executor,
            scheduler,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{articles, health, jobs, triggers};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/api/jobs/all", post(jobs::submit_all))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route(
            "/api/triggers",
            get(triggers::list_triggers).post(triggers::register_trigger),
        )
        .route("/api/triggers/{id}", delete(triggers::remove_trigger))
        .route("/api/articles", get(articles::list_articles))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use zpravy_core::{JobId, SourceRegistry};
    use zpravy_executor::{ExecutorSettings, FetchError, FetchRequest, Fetcher, Intake, RawRecord};

    struct EmptyFeed;

    #[async_trait::async_trait]
    impl Fetcher for EmptyFeed {
        async fn fetch(&self, _req: FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
            Ok(Vec::new())
        }
    }

    /// Full state over in-memory databases. The executor is never started,
    /// so submitted jobs stay `Pending`.
    fn state() -> Arc<AppState> {
        let config = ZpravyConfig::default();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let gate = Arc::new(DedupGate::open_in_memory().unwrap());
        let intake = Arc::new(Intake::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            Arc::clone(&gate),
            Arc::new(EmptyFeed),
            Arc::clone(&intake),
            ExecutorSettings::from(&config.executor),
        ));
        let scheduler = Arc::new(
            Scheduler::new(
                rusqlite::Connection::open_in_memory().unwrap(),
                Arc::clone(&store),
                intake,
                SourceRegistry::new(config.sources.clone()),
                &config.scheduler,
            )
            .unwrap(),
        );
        Arc::new(AppState::new(config, store, gate, executor, scheduler))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_job_counts() {
        let router = build_router(state());
        call(&router, "POST", "/api/jobs", Some(json!({"source": "aktualne"}))).await;

        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"]["pending"], 1);
        assert_eq!(body["queued"], 1);
        assert_eq!(body["sources"], 12);
    }

    #[tokio::test]
    async fn submit_then_read_back() {
        let router = build_router(state());

        let (status, body) =
            call(&router, "POST", "/api/jobs", Some(json!({"source": "idnes"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["job_id"].as_str().unwrap().to_string();

        let (status, job) = call(&router, "GET", &format!("/api/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "pending");
        assert_eq!(job["source"], "idnes");
        assert_eq!(job["trigger"]["kind"], "manual");

        let (status, body) = call(&router, "GET", &format!("/api/jobs/{}", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let router = build_router(state());
        let (status, body) = call(&router, "POST", "/api/jobs", Some(json!({"source": "bbc"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "UNKNOWN_SOURCE");

        let (_, body) = call(&router, "GET", "/api/jobs", None).await;
        assert_eq!(body["jobs"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn submit_all_creates_one_job_per_source() {
        let router = build_router(state());
        let (status, body) = call(&router, "POST", "/api/jobs/all", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["job_ids"].as_array().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn cancel_pending_then_terminal() {
        let router = build_router(state());
        let (_, body) = call(&router, "POST", "/api/jobs", Some(json!({"source": "blesk"}))).await;
        let id = body["job_id"].as_str().unwrap().to_string();
        call(&router, "POST", "/api/jobs", Some(json!({"source": "blesk"}))).await;

        let (status, body) = call(&router, "POST", &format!("/api/jobs/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "cancelled");

        let (status, body) = call(&router, "POST", &format!("/api/jobs/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");

        let (status, _) = call(&router, "POST", &format!("/api/jobs/{}/cancel", JobId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&router, "GET", "/api/jobs?status=cancelled", None).await;
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["id"], id.as_str());

        let (_, body) = call(&router, "GET", "/api/jobs?source=blesk&limit=1", None).await;
        assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
        assert_eq!(body["limit"], 1);
    }

    #[tokio::test]
    async fn trigger_lifecycle() {
        let router = build_router(state());

        let zero = json!({"source": "ct24", "trigger": {"kind": "interval", "every_secs": 0}});
        let (status, body) = call(&router, "POST", "/api/triggers", Some(zero)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "CONFIG_ERROR");

        let cron = json!({"source": "ct24", "trigger": {"kind": "cron", "expression": "0 */2 * * *"}});
        let (status, created) = call(&router, "POST", "/api/triggers", Some(cron.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, again) = call(&router, "POST", "/api/triggers", Some(cron)).await;
        assert_eq!(created["id"], again["id"]);

        let (_, body) = call(&router, "GET", "/api/triggers", None).await;
        assert_eq!(body["triggers"].as_array().unwrap().len(), 1);

        let id = created["id"].as_str().unwrap();
        let (status, _) = call(&router, "DELETE", &format!("/api/triggers/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&router, "DELETE", &format!("/api/triggers/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TRIGGER_NOT_FOUND");
    }

    #[tokio::test]
    async fn articles_are_listed_by_source() {
        let state = state();
        let record = |source: &str, url: &str| RawRecord {
            source: source.into(),
            canonical_url: url.into(),
            title: "Titulek".into(),
            published_at: None,
            body: String::new(),
        };
        state
            .gate
            .ingest(
                &JobId::new(),
                &[
                    record("novinky", "https://www.novinky.cz/a"),
                    record("novinky", "https://www.novinky.cz/b"),
                    record("denik", "https://www.denik.cz/a"),
                ],
            )
            .unwrap();
        let router = build_router(state);

        let (status, body) = call(&router, "GET", "/api/articles?source=novinky", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["articles"].as_array().unwrap().len(), 2);

        assert_eq!(body["total"], 2);

        let (_, body) = call(&router, "GET", "/api/articles?limit=1", None).await;
        assert_eq!(body["articles"].as_array().unwrap().len(), 1);
        assert_eq!(body["total"], 3);
    }
}
