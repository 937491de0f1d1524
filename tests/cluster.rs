//! End-to-end tests over real loopback listeners
//!
//! Workers run in-process against one shared coordinator; the balancer sits in
//! front of them exactly as it does in the primary.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use userhive::balancer::{Balancer, BalancerState, WorkerTable};
use userhive::common::ProcessRole;
use userhive::coordinator::{serve_worker_io, Coordinator, CoordinatorHandle};
use userhive::worker::{StoreClient, WorkerServer};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_BODY: usize = 1 << 20;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn start_worker(client: StoreClient) -> SocketAddr {
    let (listener, addr) = bind().await;
    let server = WorkerServer::new(addr, client, MAX_BODY);
    tokio::spawn(server.serve_on(listener));
    addr
}

async fn start_local_worker(handle: &CoordinatorHandle) -> SocketAddr {
    start_worker(StoreClient::connect_local(handle.clone(), REPLY_TIMEOUT)).await
}

async fn start_balancer(endpoints: Vec<SocketAddr>) -> String {
    let (listener, addr) = bind().await;
    let state = BalancerState::new(
        WorkerTable::new(endpoints),
        Duration::from_secs(5),
        MAX_BODY,
    )
    .unwrap();
    tokio::spawn(Balancer::new(addr, state).serve_on(listener));
    format!("http://{}", addr)
}

fn dead_endpoint() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_user_lifecycle_through_balancer() {
    let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
    let workers = vec![
        start_local_worker(&handle).await,
        start_local_worker(&handle).await,
    ];
    let base = start_balancer(workers).await;
    let http = reqwest::Client::new();

    let response = http.get(format!("{}/api/users", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!([]));

    let response = http
        .post(format!("{}/api/users", base))
        .json(&json!({"username": "Ann", "age": 25, "hobbies": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 36);
    assert_eq!(created["username"], "Ann");
    assert_eq!(created["age"], 25);

    // The next request lands on the other worker and still sees the record.
    let response = http
        .get(format!("{}/api/users/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), created);

    let response = http
        .put(format!("{}/api/users/{}", base, id))
        .json(&json!({"username": "Ann", "age": 26, "hobbies": ["chess"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["id"], id.as_str());
    assert_eq!(updated["age"], 26);
    assert_eq!(updated["hobbies"], json!(["chess"]));

    let response = http
        .delete(format!("{}/api/users/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = http
        .get(format!("{}/api/users/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"error": "User not found"})
    );
}

#[tokio::test]
async fn test_no_workers_is_503() {
    let base = start_balancer(vec![]).await;
    let http = reqwest::Client::new();

    for path in ["/api/users", "/api/users/anything", "/"] {
        let response = http.get(format!("{}{}", base, path)).send().await.unwrap();
        assert_eq!(response.status(), 503);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({"error": "Service Unavailable"})
        );
    }
}

#[tokio::test]
async fn test_rotation_does_not_retry_dead_worker() {
    let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
    let live = start_local_worker(&handle).await;
    let base = start_balancer(vec![live, dead_endpoint()]).await;
    let http = reqwest::Client::new();

    let statuses: Vec<u16> = {
        let mut statuses = Vec::new();
        for _ in 0..6 {
            let response = http.get(format!("{}/api/users", base)).send().await.unwrap();
            statuses.push(response.status().as_u16());
        }
        statuses
    };
    assert_eq!(statuses, vec![200, 502, 200, 502, 200, 502]);
}

#[tokio::test]
async fn test_concurrent_creates_get_unique_ids() {
    let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
    let mut workers = Vec::new();
    for _ in 0..3 {
        workers.push(start_local_worker(&handle).await);
    }
    let base = start_balancer(workers).await;
    let http = reqwest::Client::new();

    let mut tasks = Vec::new();
    for i in 0..30 {
        let http = http.clone();
        let url = format!("{}/api/users", base);
        tasks.push(tokio::spawn(async move {
            let response = http
                .post(url)
                .json(&json!({"username": format!("user-{}", i), "age": i, "hobbies": []}))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 201);
            response.json::<Value>().await.unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string()
        }));
    }
    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), 30);

    let listed: Value = http
        .get(format!("{}/api/users", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 30);
}

#[tokio::test]
async fn test_worker_over_byte_stream_channel() {
    // Same wiring as a spawned worker process, with a duplex pipe standing in
    // for the child's stdio.
    let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
    let (worker_side, primary_side) = tokio::io::duplex(64 * 1024);
    let (primary_read, primary_write) = tokio::io::split(primary_side);
    tokio::spawn(serve_worker_io(
        primary_read,
        primary_write,
        handle,
        "worker-0".to_string(),
    ));
    let (worker_read, worker_write) = tokio::io::split(worker_side);
    let worker = start_worker(StoreClient::over_io(worker_read, worker_write, REPLY_TIMEOUT)).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{}/api/users", worker))
        .json(&json!({"username": "Bob", "age": 2.5, "hobbies": ["a", "b"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["age"], 2.5);

    let listed: Value = http
        .get(format!("http://{}/api/users", worker))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, json!([created]));

    let response = http
        .put(format!("http://{}/api/users/{}", worker, created["id"].as_str().unwrap()))
        .json(&json!({"username": "Bob", "age": "old", "hobbies": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("age"));
}

#[tokio::test]
async fn test_request_id_reaches_client_through_balancer() {
    let handle = Coordinator::spawn(ProcessRole::Primary, 64).unwrap();
    let worker = start_local_worker(&handle).await;
    let base = start_balancer(vec![worker]).await;

    let response = reqwest::Client::new()
        .get(format!("{}/api/users", base))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-request-id"], "trace-me");
}
