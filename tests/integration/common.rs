use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sumi_ingest::config::{
    Config, HttpConfig, IdempotencyConfig, OutputConfig, RetryConfig, SourceEntry, WorkerConfig,
};
use sumi_ingest::fetch::{build_http_client, HttpPageFetcher};
use sumi_ingest::pagination::{FetchEngine, FetchResult, FetchTarget, RunControl};
use sumi_ingest::storage::{self, SharedStorage, SqliteStorage};
use sumi_ingest::worker::{OutboxSink, WorkerPool};
use sumi_ingest::JobRequest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const SOURCE_ID: &str = "test-source";

/// Creates a test configuration with fast retries
pub fn create_test_config(db_path: &str) -> Config {
    Config {
        worker: WorkerConfig {
            concurrency: 2,
            visibility_timeout_secs: 60,
            job_timeout_secs: 10,
            poll_interval_ms: 10,
            retention_hours: 24,
            maintenance_interval_secs: 60,
        },
        http: HttpConfig {
            user_agent: "sumi-ingest-tests/1.0".to_string(),
            request_timeout_secs: 5,
            connect_timeout_secs: 5,
            https_only: false,
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 20,
            jitter: 0.0,
        },
        idempotency: IdempotencyConfig {
            fingerprint_ttl_hours: 24,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
            persist_partial: false,
        },
        sources: vec![SourceEntry {
            id: SOURCE_ID.to_string(),
            requests_per_minute: None,
            headers: Default::default(),
        }],
    }
}

/// Builds a job request against the mock server
pub fn create_request(base_url: &str, path: &str, pagination: Value) -> JobRequest {
    serde_json::from_value(json!({
        "source_id": SOURCE_ID,
        "endpoint": { "url": format!("{}{}", base_url, path), "method": "GET" },
        "pagination": pagination,
    }))
    .expect("Failed to build job request")
}

/// A JSON array of `count` items with ids starting at `first`
pub fn items(first: usize, count: usize) -> Value {
    Value::Array((first..first + count).map(|id| json!({ "id": id })).collect())
}

/// Runs the fetch engine once over real HTTP
pub async fn run_fetch(request: &JobRequest) -> FetchResult {
    let config = create_test_config(":memory:");
    let client = build_http_client(&config.http).expect("Failed to build client");
    let fetcher = Arc::new(HttpPageFetcher::with_client(client, Duration::from_secs(2)));
    let engine = FetchEngine::new(fetcher);
    let target = FetchTarget::new(request, None);
    let control = RunControl::new(CancellationToken::new(), None);
    engine.run(&target, &control).await
}

/// A worker pool over a temporary database
pub struct TestPipeline {
    pub pool: WorkerPool,
    pub storage: SharedStorage,
    _dir: TempDir,
}

pub fn create_pipeline(persist_partial: bool) -> TestPipeline {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("ingest.db");
    let mut config = create_test_config(&db_path.to_string_lossy());
    config.output.persist_partial = persist_partial;

    let storage = storage::shared(
        SqliteStorage::new(&db_path).expect("Failed to open test database"),
    );
    let fetcher = Arc::new(HttpPageFetcher::new(&config.http).expect("Failed to build client"));
    let sink = Arc::new(OutboxSink::new(storage.clone()));
    let pool = WorkerPool::new(Arc::new(config), storage.clone(), fetcher, sink);

    TestPipeline {
        pool,
        storage,
        _dir: dir,
    }
}
