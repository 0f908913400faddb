//! End-to-end worker pipeline tests: queue, retry, dead-letter, dedupe

use crate::common::{create_pipeline, create_request, items, TestPipeline};
use serde_json::json;
use sumi_ingest::storage::{self, DeadLetterReason, Storage};
use sumi_ingest::worker::RunMode;
use sumi_ingest::JobStatus;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn enqueue(pipeline: &TestPipeline, base_url: &str, route: &str) -> String {
    let request = create_request(
        base_url,
        route,
        json!({ "type": "Offset", "page_size": 10, "max_pages": 3 }),
    );
    pipeline
        .pool
        .queue()
        .enqueue(request)
        .expect("Failed to enqueue")
        .id
}

fn job_status(pipeline: &TestPipeline, job_id: &str) -> JobStatus {
    storage::lock(&pipeline.storage)
        .unwrap()
        .get_job(job_id)
        .unwrap()
        .expect("job should exist")
        .status
}

async fn drain(pipeline: &TestPipeline) -> sumi_ingest::worker::WorkerStats {
    pipeline
        .pool
        .run(CancellationToken::new(), RunMode::Drain)
        .await
        .expect("Worker pool failed")
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 4)))
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/flaky");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.retried, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::Done);

    let db = storage::lock(&pipeline.storage).unwrap();
    let result = db.get_result(&job_id).unwrap().expect("result persisted");
    let records: serde_json::Value = serde_json::from_str(&result.records_json).unwrap();
    assert_eq!(records.as_array().map(|a| a.len()), Some(4));

    // One audit row per attempt
    let runs = db.get_job_runs(&job_id).unwrap();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[0].status, JobStatus::Failed);
    assert_eq!(runs[2].status, JobStatus::Done);
    assert_eq!(runs[2].records_fetched, 4);
}

#[tokio::test]
async fn test_three_failures_then_success_is_done() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recovers"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 6)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/recovers");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.retried, 3);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::Done);
    assert!(pipeline.pool.queue().dead_letters().unwrap().is_empty());

    let runs = storage::lock(&pipeline.storage)
        .unwrap()
        .get_job_runs(&job_id)
        .unwrap();
    assert_eq!(runs.len(), 4);
    assert_eq!(runs[3].attempt, 4);
    assert_eq!(runs[3].status, JobStatus::Done);
}

#[tokio::test]
async fn test_persistent_failure_is_dead_lettered() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/down");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.retried, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::DeadLettered);

    let dead = pipeline.pool.queue().dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].reason, DeadLetterReason::AttemptsExhausted);
    assert_eq!(dead[0].attempts, 4);
    assert_eq!(dead[0].status_code, Some(503));
}

#[tokio::test]
async fn test_client_error_dead_letters_immediately() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/missing");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.retried, 0);
    assert_eq!(stats.dead_lettered, 1);

    let dead = pipeline.pool.queue().dead_letters().unwrap();
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].reason, DeadLetterReason::NonRetryable);
    assert_eq!(dead[0].attempts, 1);
}

#[tokio::test]
async fn test_rate_limited_job_is_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 2)))
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/limited");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.retried, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::Done);
}

#[tokio::test]
async fn test_duplicate_triggers_persist_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/same"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 3)))
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let first = enqueue(&pipeline, &mock_server.uri(), "/same");
    let second = enqueue(&pipeline, &mock_server.uri(), "/same");

    let stats = drain(&pipeline).await;

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(job_status(&pipeline, &first), JobStatus::Done);
    assert_eq!(job_status(&pipeline, &second), JobStatus::Done);

    let db = storage::lock(&pipeline.storage).unwrap();
    assert_eq!(db.queue_stats().unwrap().results, 1);
}

#[tokio::test]
async fn test_requeued_dead_letter_is_processed_again() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/later"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(false);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/later");

    drain(&pipeline).await;
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::DeadLettered);

    // The endpoint comes back
    mock_server.reset().await;
    Mock::given(method("GET"))
        .and(path("/later"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 5)))
        .mount(&mock_server)
        .await;

    assert!(pipeline.pool.queue().requeue(&job_id).unwrap());
    assert!(pipeline.pool.queue().dead_letters().unwrap().is_empty());

    let stats = drain(&pipeline).await;

    assert_eq!(stats.succeeded, 1);
    assert_eq!(job_status(&pipeline, &job_id), JobStatus::Done);
    assert!(storage::lock(&pipeline.storage)
        .unwrap()
        .get_result(&job_id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_dead_letter_with_partial_persistence() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(wiremock::matchers::query_param("offset", "0"))
        .and(path("/half"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 10)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::query_param("offset", "10"))
        .and(path("/half"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let pipeline = create_pipeline(true);
    let job_id = enqueue(&pipeline, &mock_server.uri(), "/half");

    let stats = drain(&pipeline).await;
    assert_eq!(stats.dead_lettered, 1);

    let dead = pipeline.pool.queue().dead_letters().unwrap();
    assert_eq!(dead[0].partial_record_count, 10);

    let db = storage::lock(&pipeline.storage).unwrap();
    let partial = db.get_result(&job_id).unwrap().expect("partial persisted");
    let summary: serde_json::Value = serde_json::from_str(&partial.summary_json).unwrap();
    assert_eq!(summary["terminal_reason"], "error");
    assert_eq!(summary["total_records"], 10);
}
