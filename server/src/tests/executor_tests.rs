//! Tests for the task executor

use crate::database::TaskStore;
use crate::executor::Executor;
use crate::scheduler::Scheduler;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Map};
use shared::task::Task;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

async fn setup(max_executions: u32) -> (Arc<Mutex<TaskStore>>, Scheduler, Executor, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut store = TaskStore::new(temp_dir.path()).unwrap();
    store.initialize().await.unwrap();
    let store = Arc::new(Mutex::new(store));
    let scheduler = Scheduler::new();
    let executor = Executor::new(Arc::clone(&store), scheduler.clone(), 8, max_executions, 5).unwrap();
    (store, scheduler, executor, temp_dir)
}

fn task_with_method(task_id: &str, method: &str, url: &str, frequency: u64) -> Task {
    let mut body = Map::new();
    body.insert("k".to_string(), json!("v"));
    Task::enroll(
        task_id.to_string(),
        "alice".to_string(),
        method.to_string(),
        url.to_string(),
        body,
        "2020-01-01 00:00:00".to_string(),
        Utc::now() - ChronoDuration::seconds(5),
        frequency,
        0,
    )
}

/// Minimal one-shot HTTP sink: accepts a single connection, reads one
/// request, answers 200, and hands the raw request text back.
async fn spawn_sink() -> (SocketAddr, tokio::sync::oneshot::Receiver<String>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break Some(pos);
            }
        };

        if let Some(pos) = header_end {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < pos + 4 + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
    });

    (addr, rx)
}

#[tokio::test]
async fn test_fire_posts_json_body_to_the_task_url() {
    let (store, scheduler, executor, _temp_dir) = setup(30).await;
    let (addr, received) = spawn_sink().await;

    let task = task_with_method("alice_1", "POST", &format!("http://{}/hook", addr), 3600);
    store.lock().await.put_task(&task).await.unwrap();

    executor.fire("alice_1").await;

    let request = received.await.unwrap();
    assert!(request.starts_with("POST /hook"));
    assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(request.contains(r#""k":"v""#));

    // Bookkeeping advanced and the next occurrence is queued.
    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 1);
    assert_eq!(scheduler.queue_len().await, 1);
}

#[tokio::test]
async fn test_tombstoned_firing_is_skipped_and_tombstone_evicted() {
    let (store, scheduler, executor, _temp_dir) = setup(30).await;

    let task = task_with_method("alice_1", "POST", "http://127.0.0.1:9/unreachable", 3600);
    store.lock().await.put_task(&task).await.unwrap();
    scheduler.mark_deleted("alice_1").await;

    executor.fire("alice_1").await;

    // No bookkeeping, no re-enrollment, and the drained tombstone is gone.
    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 0);
    assert_eq!(scheduler.queue_len().await, 0);
    assert!(!scheduler.is_deleted("alice_1").await);
}

#[tokio::test]
async fn test_unknown_task_is_dropped() {
    let (_store, scheduler, executor, _temp_dir) = setup(30).await;

    executor.fire("ghost_1").await;
    assert_eq!(scheduler.queue_len().await, 0);
}

#[tokio::test]
async fn test_unsupported_method_is_a_noop_failure_that_still_advances() {
    let (store, scheduler, executor, _temp_dir) = setup(30).await;

    let task = task_with_method("alice_1", "GET", "http://127.0.0.1:9/unreachable", 120);
    store.lock().await.put_task(&task).await.unwrap();

    let before = Utc::now();
    executor.fire("alice_1").await;

    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 1);
    assert!(loaded.last_execution >= before);

    // next_execution = last_execution + frequency
    assert_eq!(
        (loaded.next_execution - loaded.last_execution).num_seconds(),
        120
    );

    let state = scheduler.state.lock().await;
    let entry = state.queue.peek_min().unwrap();
    assert_eq!(entry.task_id, "alice_1");
    assert_eq!(entry.fire_at, loaded.next_execution.timestamp());
}

#[tokio::test]
async fn test_outbound_failure_still_counts_toward_the_cap() {
    let (store, scheduler, executor, _temp_dir) = setup(30).await;

    // Nothing listens on this port, so the POST fails outright.
    let task = task_with_method("alice_1", "POST", "http://127.0.0.1:9/unreachable", 3600);
    store.lock().await.put_task(&task).await.unwrap();

    executor.fire("alice_1").await;

    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 1);
    assert_eq!(scheduler.queue_len().await, 1);
}

#[tokio::test]
async fn test_task_at_cap_is_not_reenrolled() {
    let (store, scheduler, executor, _temp_dir) = setup(3).await;

    let mut task = task_with_method("alice_1", "GET", "http://127.0.0.1:9/unreachable", 60);
    task.total_executions = 2;
    store.lock().await.put_task(&task).await.unwrap();

    executor.fire("alice_1").await;

    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 3);
    assert!(loaded.is_terminal(3));
    // Terminal: the record is retained, but no new queue entry exists.
    assert_eq!(scheduler.queue_len().await, 0);
}

#[tokio::test]
async fn test_record_already_past_the_cap_stays_terminal() {
    let (store, scheduler, executor, _temp_dir) = setup(3).await;

    let mut task = task_with_method("alice_1", "GET", "http://127.0.0.1:9/unreachable", 60);
    task.total_executions = 7;
    store.lock().await.put_task(&task).await.unwrap();

    executor.fire("alice_1").await;

    let loaded = store.lock().await.get_task("alice_1").await.unwrap().unwrap();
    assert_eq!(loaded.total_executions, 8);
    assert_eq!(scheduler.queue_len().await, 0);
}
