//! Fetch engine behaviour against real HTTP responses

use crate::common::{create_request, items, run_fetch};
use serde_json::json;
use sumi_ingest::fetch::FailureKind;
use sumi_ingest::TerminalReason;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_offset_stops_on_partial_page() {
    let mock_server = MockServer::start().await;

    for (start, count) in [(0, 10), (10, 10), (20, 5)] {
        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("_start", start.to_string()))
            .and(query_param("_limit", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items(start, count)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let request = create_request(
        &mock_server.uri(),
        "/posts",
        json!({
            "type": "Offset",
            "page_size": 10, "max_pages": 50, "delay_ms": 0,
            "stop_on_empty": true, "stop_on_partial": true,
            "offset_param": "_start", "limit_param": "_limit"
        }),
    );
    let result = run_fetch(&request).await;

    assert!(result.is_success(), "{:?}", result.failure);
    assert_eq!(result.pages_fetched(), 3);
    assert_eq!(result.total_records, 25);
    assert_eq!(result.terminal_reason, TerminalReason::StoppedPartial);
    assert!(!result.max_pages_reached);

    // Records keep page order
    let ids: Vec<u64> = result
        .payloads()
        .map(|p| p["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (0..25).collect::<Vec<u64>>());
    assert_eq!(result.records[24].page_index, 2);
    assert_eq!(result.records[24].position, 4);
}

#[tokio::test]
async fn test_max_pages_caps_full_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 10)))
        .expect(5)
        .mount(&mock_server)
        .await;

    let request = create_request(
        &mock_server.uri(),
        "/feed",
        json!({ "type": "Offset", "page_size": 10, "max_pages": 5 }),
    );
    let result = run_fetch(&request).await;

    assert_eq!(result.pages_fetched(), 5);
    assert_eq!(result.total_records, 50);
    assert!(result.max_pages_reached);
    assert_eq!(result.terminal_reason, TerminalReason::MaxPages);

    let summary = result.summary();
    assert_eq!(summary.pages_fetched, 5);
    assert!(summary.max_pages_reached);
}

#[tokio::test]
async fn test_page_number_stops_on_empty_page() {
    let mock_server = MockServer::start().await;

    for (page, body) in [(1, items(0, 3)), (2, items(3, 3)), (3, json!([]))] {
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(query_param("page", page.to_string()))
            .and(query_param("per_page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;
    }

    let request = create_request(
        &mock_server.uri(),
        "/list",
        json!({ "type": "Page", "page_size": 3, "page_param": "page" }),
    );
    let result = run_fetch(&request).await;

    assert_eq!(result.pages_fetched(), 3);
    assert_eq!(result.total_records, 6);
    assert_eq!(result.terminal_reason, TerminalReason::StoppedEmpty);
}

#[tokio::test]
async fn test_cursor_exhausted_when_token_missing() {
    let mock_server = MockServer::start().await;

    // Specific cursors first; wiremock prefers earlier mounts on ties
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("cursor", "c1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": items(2, 2), "next_cursor": "c2" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": items(4, 1) })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": items(0, 2), "next_cursor": "c1" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = create_request(
        &mock_server.uri(),
        "/events",
        json!({ "type": "Cursor", "cursor_param": "cursor", "page_size": 2 }),
    );
    let result = run_fetch(&request).await;

    assert!(result.is_success(), "{:?}", result.failure);
    assert_eq!(result.pages_fetched(), 3);
    assert_eq!(result.total_records, 5);
    assert_eq!(result.terminal_reason, TerminalReason::Exhausted);

    // The first request carries no cursor parameter
    assert!(!result.pages[0].url.contains("cursor="));
}

#[tokio::test]
async fn test_link_header_followed_until_absent() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/repos"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(2, 1))
                .insert_header("link", format!("<{}/repos?page=1>; rel=\"prev\"", base_url).as_str()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(items(0, 2))
                .insert_header(
                    "link",
                    format!(
                        "<{0}/repos?page=2>; rel=\"next\", <{0}/repos?page=2>; rel=\"last\"",
                        base_url
                    )
                    .as_str(),
                ),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = create_request(&base_url, "/repos", json!({ "type": "LinkHeader" }));
    let result = run_fetch(&request).await;

    assert_eq!(result.pages_fetched(), 2);
    assert_eq!(result.total_records, 3);
    assert_eq!(result.terminal_reason, TerminalReason::Exhausted);
    assert!(result.pages[1].url.ends_with("/repos?page=2"));
}

#[tokio::test]
async fn test_single_page_object_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "results": items(0, 4), "count": 4 })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = create_request(&mock_server.uri(), "/status", json!({ "type": "None" }));
    let result = run_fetch(&request).await;

    assert_eq!(result.pages_fetched(), 1);
    assert_eq!(result.total_records, 4);
    assert_eq!(result.terminal_reason, TerminalReason::Exhausted);
}

#[tokio::test]
async fn test_client_error_keeps_partial_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 5)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("offset", "5"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let request = create_request(
        &mock_server.uri(),
        "/posts",
        json!({ "type": "Offset", "page_size": 5 }),
    );
    let result = run_fetch(&request).await;

    assert!(!result.is_success());
    assert_eq!(result.terminal_reason, TerminalReason::Error);
    assert_eq!(result.total_records, 5);

    let failure = result.failure.expect("failure should be recorded");
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.status_code, Some(404));
}

#[tokio::test]
async fn test_rate_limited_response_is_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&mock_server)
        .await;

    let request = create_request(&mock_server.uri(), "/busy", json!({ "type": "None" }));
    let result = run_fetch(&request).await;

    let failure = result.failure.expect("failure should be recorded");
    assert_eq!(failure.kind, FailureKind::RateLimited);
    assert_eq!(failure.retry_after, Some(std::time::Duration::from_secs(7)));
}

#[tokio::test]
async fn test_bearer_auth_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(0, 1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut request = create_request(&mock_server.uri(), "/private", json!({ "type": "None" }));
    request.endpoint.auth = sumi_ingest::fetch::Auth::Bearer {
        token: "s3cret".to_string(),
    };
    let result = run_fetch(&request).await;

    assert!(result.is_success(), "{:?}", result.failure);
    assert_eq!(result.total_records, 1);
}
