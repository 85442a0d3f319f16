mod support;

use std::sync::Arc;
use std::time::Duration;

use claude_wire::batch::BatchManager;
use claude_wire::error::{ApiErrorKind, ProtocolViolation, WireError};
use claude_wire::protocol::batch::{BatchOutcome, BatchRequest, ListParams, ProcessingStatus};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use support::{chunked, FakeTransport, Reply};

const BATCHES: &str = "/v1/messages/batches";
const BATCH: &str = "/v1/messages/batches/msgbatch_01";
const RESULTS_URL: &str = "https://api.anthropic.com/v1/messages/batches/msgbatch_01/results";

fn snapshot(status: &str, counts: [u64; 5], results_url: Option<&str>) -> Value {
    let ended_at = (status == "ended").then_some("2024-09-24T18:39:24.100435Z");
    json!({
        "id": "msgbatch_01",
        "type": "message_batch",
        "processing_status": status,
        "request_counts": {
            "processing": counts[0],
            "succeeded": counts[1],
            "errored": counts[2],
            "canceled": counts[3],
            "expired": counts[4]
        },
        "created_at": "2024-09-24T18:37:24.100435Z",
        "expires_at": "2024-09-25T18:37:24.100435Z",
        "ended_at": ended_at,
        "archived_at": null,
        "cancel_initiated_at": null,
        "results_url": results_url
    })
}

fn requests(ids: &[&str]) -> Vec<BatchRequest> {
    ids.iter()
        .map(|id| {
            BatchRequest::new(
                *id,
                json!({
                    "model": "claude-3-5-sonnet-20240620",
                    "max_tokens": 64,
                    "messages": [{"role": "user", "content": format!("Hello from {id}")}]
                }),
            )
        })
        .collect()
}

fn manager(transport: &Arc<FakeTransport>) -> BatchManager<FakeTransport> {
    BatchManager::new(Arc::clone(transport))
}

fn results_body() -> String {
    let succeeded = |id: &str, text: &str| {
        json!({
            "custom_id": id,
            "result": {
                "type": "succeeded",
                "message": {
                    "id": format!("msg_{id}"),
                    "type": "message",
                    "role": "assistant",
                    "model": "claude-3-5-sonnet-20240620",
                    "content": [{"type": "text", "text": text}],
                    "stop_reason": "end_turn",
                    "stop_sequence": null,
                    "usage": {"input_tokens": 10, "output_tokens": 3}
                }
            }
        })
    };
    let errored = json!({
        "custom_id": "b",
        "result": {
            "type": "errored",
            "error": {"type": "error", "error": {"type": "invalid_request_error", "message": "max_tokens too large"}}
        }
    });
    format!(
        "{}\n{}\n{}\n",
        succeeded("a", "Hi a"),
        errored,
        succeeded("c", "Hi c")
    )
}

#[tokio::test]
async fn test_three_request_batch_end_to_end() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("POST", BATCHES, snapshot("in_progress", [3, 0, 0, 0, 0], None));
    transport
        .on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None))
        .on_json("GET", BATCH, snapshot("in_progress", [1, 1, 1, 0, 0], None))
        .on_json("GET", BATCH, snapshot("ended", [0, 2, 1, 0, 0], Some(RESULTS_URL)));
    transport.on("GET", RESULTS_URL, Reply::Body(chunked(&results_body(), 17)));
    let batches = manager(&transport);

    let submitted = batches.submit(&requests(&["a", "b", "c"])).await.expect("submit");
    assert_eq!(submitted.id, "msgbatch_01");
    assert_eq!(submitted.processing_status, ProcessingStatus::InProgress);
    let body = transport.last_body("POST /v1/messages/batches").expect("batch body");
    assert_eq!(body["requests"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["requests"][1]["custom_id"], "b");

    let ended = batches
        .wait_until_ended("msgbatch_01", Duration::from_millis(1), &CancellationToken::new())
        .await
        .expect("wait");
    assert!(ended.is_ended());
    assert_eq!(ended.request_counts.succeeded, 2);
    assert_eq!(ended.request_counts.errored, 1);
    assert_eq!(ended.request_counts.total(), Some(3));

    let results: Vec<_> = batches
        .stream_results("msgbatch_01")
        .await
        .expect("results")
        .map(|result| result.expect("result line"))
        .collect()
        .await;
    let ids: Vec<&str> = results.iter().map(|r| r.custom_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    match &results[0].result {
        BatchOutcome::Succeeded { message } => assert_eq!(message.content[0].as_text(), Some("Hi a")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    match &results[1].result {
        BatchOutcome::Errored { error } => {
            assert_eq!(error.error.error_type, "invalid_request_error");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let succeeded = results
        .iter()
        .filter(|r| matches!(r.result, BatchOutcome::Succeeded { .. }))
        .count() as u64;
    assert_eq!(succeeded, ended.request_counts.succeeded);
}

#[tokio::test]
async fn test_duplicate_custom_id_rejected_before_network() {
    let transport = Arc::new(FakeTransport::new());
    let batches = manager(&transport);

    let err = batches
        .submit(&requests(&["a", "b", "a"]))
        .await
        .expect_err("duplicate id");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::DuplicateCustomId(ref id)) if id == "a"
    ));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_empty_batch_rejected_before_network() {
    let transport = Arc::new(FakeTransport::new());
    let err = manager(&transport).submit(&[]).await.expect_err("empty batch");
    assert!(matches!(err, WireError::InvalidRequest(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_submit_checks_reported_request_total() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("POST", BATCHES, snapshot("in_progress", [2, 0, 0, 0, 0], None));
    let err = manager(&transport)
        .submit(&requests(&["a", "b", "c"]))
        .await
        .expect_err("count mismatch");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::RequestCountChanged {
            expected: 3,
            actual: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn test_wait_detects_status_regression() {
    let transport = Arc::new(FakeTransport::new());
    transport
        .on_json("GET", BATCH, snapshot("canceling", [2, 1, 0, 0, 0], None))
        .on_json("GET", BATCH, snapshot("in_progress", [2, 1, 0, 0, 0], None));
    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_millis(1), &CancellationToken::new())
        .await
        .expect_err("regression");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::StatusRegression { ref from, ref to, .. })
            if from == "canceling" && to == "in_progress"
    ));
}

#[tokio::test]
async fn test_wait_detects_request_count_change() {
    let transport = Arc::new(FakeTransport::new());
    transport
        .on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None))
        .on_json("GET", BATCH, snapshot("in_progress", [3, 1, 0, 0, 0], None));
    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_millis(1), &CancellationToken::new())
        .await
        .expect_err("count change");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::RequestCountChanged { .. })
    ));
}

#[tokio::test]
async fn test_wait_cancelled_before_first_poll() {
    let transport = Arc::new(FakeTransport::new());
    let token = CancellationToken::new();
    token.cancel();
    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_secs(60), &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, WireError::Cancelled));
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_cancelled_during_sleep() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_secs(3600), &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, WireError::Cancelled));
    assert_eq!(transport.calls(), vec!["GET /v1/messages/batches/msgbatch_01"]);
}

#[tokio::test]
async fn test_poll_error_propagates() {
    let transport = Arc::new(FakeTransport::new());
    transport.on(
        "GET",
        BATCH,
        Reply::Status {
            status: 404,
            error_type: "not_found_error".to_string(),
        },
    );
    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_millis(1), &CancellationToken::new())
        .await
        .expect_err("not found");
    assert_eq!(err.api_kind(), Some(ApiErrorKind::NotFound));
}

#[tokio::test]
async fn test_transport_error_inside_wait_loop_propagates() {
    let transport = Arc::new(FakeTransport::new());
    transport
        .on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None))
        .on(
            "GET",
            BATCH,
            Reply::TransportFailure("connection reset by peer".to_string()),
        );
    let err = manager(&transport)
        .wait_until_ended("msgbatch_01", Duration::from_millis(1), &CancellationToken::new())
        .await
        .expect_err("connection reset");
    assert!(matches!(err, WireError::Transport(ref reason) if reason == "connection reset by peer"));
    assert_eq!(
        transport.calls(),
        vec![
            "GET /v1/messages/batches/msgbatch_01",
            "GET /v1/messages/batches/msgbatch_01"
        ]
    );
}

#[tokio::test]
async fn test_overflowing_request_counts_rejected_on_poll() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json(
        "GET",
        BATCH,
        snapshot("in_progress", [u64::MAX, 1, 0, 0, 0], None),
    );
    let err = manager(&transport)
        .poll("msgbatch_01")
        .await
        .expect_err("overflowing counts");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::RequestCountOverflow { ref batch_id }) if batch_id == "msgbatch_01"
    ));
}

#[tokio::test]
async fn test_results_not_ready_without_url() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None));
    let err = match manager(&transport).stream_results("msgbatch_01").await {
        Ok(_) => panic!("results should not be ready"),
        Err(err) => err,
    };
    assert!(matches!(err, WireError::ResultsNotReady { ref batch_id } if batch_id == "msgbatch_01"));
}

#[tokio::test]
async fn test_cancel_only_while_in_progress() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("GET", BATCH, snapshot("ended", [0, 3, 0, 0, 0], Some(RESULTS_URL)));
    let err = manager(&transport)
        .cancel("msgbatch_01")
        .await
        .expect_err("not in progress");
    assert!(matches!(
        err,
        WireError::Protocol(ProtocolViolation::CancelNotInProgress { ref status, .. }) if status == "ended"
    ));
    assert!(!transport
        .calls()
        .contains(&"POST /v1/messages/batches/msgbatch_01/cancel".to_string()));
}

#[tokio::test]
async fn test_cancel_returns_server_snapshot() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json("GET", BATCH, snapshot("in_progress", [3, 0, 0, 0, 0], None));
    transport.on_json(
        "POST",
        "/v1/messages/batches/msgbatch_01/cancel",
        snapshot("canceling", [3, 0, 0, 0, 0], None),
    );
    let batch = manager(&transport).cancel("msgbatch_01").await.expect("cancel");
    assert_eq!(batch.processing_status, ProcessingStatus::Canceling);
    assert_eq!(
        transport.calls(),
        vec![
            "GET /v1/messages/batches/msgbatch_01",
            "POST /v1/messages/batches/msgbatch_01/cancel"
        ]
    );
}

#[tokio::test]
async fn test_list_and_delete() {
    let transport = Arc::new(FakeTransport::new());
    transport.on_json(
        "GET",
        "/v1/messages/batches?limit=2&after_id=msgbatch_00",
        json!({
            "data": [snapshot("ended", [0, 3, 0, 0, 0], Some(RESULTS_URL))],
            "has_more": false,
            "first_id": "msgbatch_01",
            "last_id": "msgbatch_01"
        }),
    );
    transport.on_json(
        "DELETE",
        BATCH,
        json!({"id": "msgbatch_01", "type": "message_batch_deleted"}),
    );
    let batches = manager(&transport);

    let page = batches
        .list(&ListParams {
            limit: Some(2),
            after_id: Some("msgbatch_00".to_string()),
            before_id: None,
        })
        .await
        .expect("list");
    assert_eq!(page.data.len(), 1);
    assert!(!page.has_more);

    let deleted = batches.delete("msgbatch_01").await.expect("delete");
    assert_eq!(deleted.id, "msgbatch_01");
    assert_eq!(deleted.deleted_type, "message_batch_deleted");
}
