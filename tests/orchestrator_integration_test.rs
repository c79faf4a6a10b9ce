//! Integration tests for the iteration runner
//!
//! The generation service is faked with mockito (or a raw socket where the
//! failure mode needs one); records go to an in-memory SQLite store.

use mockito::{Matcher, Server};
use prompt_runner::bus::{BroadcastBus, BusSubscription, IterationEvent, StreamEvent, Topic};
use prompt_runner::orchestrator::Orchestrator;
use prompt_runner::provider::{GenerationParams, ProviderGateway, StreamingTransport};
use prompt_runner::store::models::{Execution, Prompt};
use prompt_runner::store::{ExecutionStatus, ExecutionStore, ResultStatus, SqliteStore};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const FIXTURE: &str =
    "data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\ndata: {\"done\":true}\n\ndata: [DONE]\n\n";

struct Harness {
    store: Arc<SqliteStore>,
    bus: BroadcastBus,
    orchestrator: Orchestrator,
}

async fn harness(base_url: &str, idle_timeout: Duration) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let bus = BroadcastBus::new(64);
    let client = reqwest::Client::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        ProviderGateway::new(client.clone(), base_url, Duration::from_secs(5)),
        StreamingTransport::new(client, base_url, idle_timeout),
        bus.clone(),
    );
    Harness {
        store,
        bus,
        orchestrator,
    }
}

async fn submit(store: &SqliteStore, iterations: u32, streaming: bool) -> Execution {
    let prompt = Prompt::new(
        "Be brief.".to_string(),
        "Say hello".to_string(),
        "gpt-4o-mini".to_string(),
        GenerationParams::default(),
    )
    .unwrap();
    store.create_prompt(&prompt).await.unwrap();
    let execution = Execution::new(prompt.id.clone(), iterations, streaming).unwrap();
    store.create_execution(&execution).await.unwrap();
    execution
}

async fn drain(subscription: &mut BusSubscription) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await
    {
        events.push(event.as_ref().clone());
    }
    events
}

#[tokio::test]
#[serial]
async fn test_batch_runs_produce_one_result_per_iteration() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/generate")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model_id": "gpt-4o-mini",
            "stream": false,
            "max_tokens": 2031
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"text":"hello","tokens_used":{"input":7,"output":5,"total":12},"response_time_ms":30,"status":"success"}"#,
        )
        .create_async()
        .await;

    let h = harness(&server.url(), Duration::from_secs(5)).await;

    for n in 1..=10u32 {
        let execution = submit(&h.store, n, false).await;
        let summary = h.orchestrator.run(&execution.id).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Completed);
        assert_eq!(summary.succeeded, n);

        let results = h.store.list_results(&execution.id).await.unwrap();
        let iterations: Vec<u32> = results.iter().map(|r| r.iteration_number).collect();
        assert_eq!(iterations, (1..=n).collect::<Vec<_>>());

        for result in &results {
            assert_eq!(result.status, ResultStatus::Success);
            assert_eq!(
                result.tokens_used.total(),
                result.tokens_used.input + result.tokens_used.output
            );
            assert_eq!(result.tokens_used.total(), 12);
        }

        let stored = h.store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.completed_at.is_some());
    }
}

#[tokio::test]
#[serial]
async fn test_batch_provider_error_continues_loop() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/generate")
        .with_status(502)
        .with_body("upstream unavailable")
        .expect(3)
        .create_async()
        .await;

    let h = harness(&server.url(), Duration::from_secs(5)).await;
    let execution = submit(&h.store, 3, false).await;
    let mut events = h
        .bus
        .subscribe(Topic::Iterations(execution.id.clone()));

    let summary = h.orchestrator.run(&execution.id).await.unwrap();
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.status, ExecutionStatus::Completed);

    let results = h.store.list_results(&execution.id).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == ResultStatus::Error));
    assert!(results[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("502"));

    let errors = drain(&mut events)
        .await
        .into_iter()
        .filter(|e| matches!(e, StreamEvent::Iteration(IterationEvent::Error { .. })))
        .count();
    assert_eq!(errors, 3);
}

#[tokio::test]
async fn test_refused_batch_call_records_empty_error_result() {
    let h = harness("http://127.0.0.1:1", Duration::from_secs(5)).await;
    let execution = submit(&h.store, 2, false).await;

    let summary = h.orchestrator.run(&execution.id).await.unwrap();
    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.attempted, 2);

    for result in h.store.list_results(&execution.id).await.unwrap() {
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.response_text.is_empty());
        assert!(result.error_message.is_some());
    }
}

#[tokio::test]
#[serial]
async fn test_streaming_fixture_publishes_chunks_then_complete() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/generate")
        .match_body(Matcher::PartialJson(serde_json::json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(FIXTURE)
        .create_async()
        .await;

    let h = harness(&server.url(), Duration::from_secs(5)).await;
    let execution = submit(&h.store, 1, true).await;
    let mut iterations = h
        .bus
        .subscribe(Topic::Iterations(execution.id.clone()));
    let mut terminal = h
        .bus
        .subscribe(Topic::Execution(execution.id.clone()));

    h.orchestrator.run(&execution.id).await.unwrap();

    let events = drain(&mut iterations).await;
    assert_eq!(events.len(), 3, "events: {:?}", events);
    assert_eq!(
        events[0],
        StreamEvent::Iteration(IterationEvent::Chunk {
            iteration: 1,
            content: "Hel".to_string()
        })
    );
    assert_eq!(
        events[1],
        StreamEvent::Iteration(IterationEvent::Chunk {
            iteration: 1,
            content: "lo".to_string()
        })
    );
    match &events[2] {
        StreamEvent::Iteration(IterationEvent::Complete { iteration, result }) => {
            assert_eq!(*iteration, 1);
            assert_eq!(result.response_text, "Hello");
            assert_eq!(result.tokens_used.output, 1);
        }
        other => panic!("expected complete, got {:?}", other),
    }

    let final_events = drain(&mut terminal).await;
    assert_eq!(final_events.len(), 1);
    assert_eq!(
        serde_json::to_value(&final_events[0]).unwrap(),
        serde_json::json!({"status": "completed"})
    );

    let stored = h.store.find_result(&execution.id, 1).await.unwrap().unwrap();
    assert_eq!(stored.response_text, "Hello");
}

#[tokio::test]
#[serial]
async fn test_streaming_skips_malformed_line() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/generate")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: {\"text\":\"Hel\"}\n\ndata: {\"text\": oops\n\ndata: {\"text\":\"lo\"}\n\ndata: [DONE]\n\n")
        .create_async()
        .await;

    let h = harness(&server.url(), Duration::from_secs(5)).await;
    let execution = submit(&h.store, 2, true).await;

    let summary = h.orchestrator.run(&execution.id).await.unwrap();
    assert_eq!(summary.succeeded, 2);

    for result in h.store.list_results(&execution.id).await.unwrap() {
        assert_eq!(result.response_text, "Hello");
    }
}

#[tokio::test]
async fn test_streaming_refused_marks_execution_failed() {
    let h = harness("http://127.0.0.1:1", Duration::from_secs(5)).await;
    let execution = submit(&h.store, 3, true).await;
    let mut terminal = h
        .bus
        .subscribe(Topic::Execution(execution.id.clone()));

    let summary = h.orchestrator.run(&execution.id).await.unwrap();
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(summary.attempted, 1);

    let results = h.store.list_results(&execution.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Error);

    let stored = h.store.get_execution(&execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.completed_at.is_some());

    let final_events = drain(&mut terminal).await;
    assert_eq!(
        serde_json::to_value(&final_events[0]).unwrap(),
        serde_json::json!({"status": "failed"})
    );
}

#[tokio::test]
async fn test_stalled_stream_fails_after_idle_timeout() {
    // Serves one chunk, then goes silent with the connection open
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let _ = socket.read(&mut buf).await;

        let payload = "data: {\"text\":\"Hel\"}\n\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
            payload.len(),
            payload
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let h = harness(&format!("http://{}", addr), Duration::from_millis(300)).await;
    let execution = submit(&h.store, 3, true).await;
    let mut iterations = h
        .bus
        .subscribe(Topic::Iterations(execution.id.clone()));

    let summary = h.orchestrator.run(&execution.id).await.unwrap();
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(summary.attempted, 1);

    let events = drain(&mut iterations).await;
    assert!(matches!(
        &events[0],
        StreamEvent::Iteration(IterationEvent::Chunk { content, .. }) if content == "Hel"
    ));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Iteration(IterationEvent::Error { iteration: 1, .. }))
    ));

    let result = h.store.find_result(&execution.id, 1).await.unwrap().unwrap();
    assert_eq!(result.status, ResultStatus::Error);
    assert!(h.store.find_result(&execution.id, 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_rejects_unknown_and_finished_executions() {
    let h = harness("http://127.0.0.1:1", Duration::from_secs(5)).await;
    assert!(h.orchestrator.run("does-not-exist").await.is_err());

    let execution = submit(&h.store, 1, false).await;
    h.orchestrator.run(&execution.id).await.unwrap();
    // Terminal executions cannot be restarted
    assert!(h.orchestrator.run(&execution.id).await.is_err());
    assert_eq!(h.store.list_results(&execution.id).await.unwrap().len(), 1);
}
