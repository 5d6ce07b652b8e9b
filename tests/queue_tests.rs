//! Worker API and lease protocol tests.

mod common;

use common::{upload_file, TestServer, CUBE_OBJ};
use serde_json::json;
use std::time::Duration;

async fn lease(
    client: &reqwest::Client,
    server: &TestServer,
    worker_id: &str,
    lease_seconds: u64,
) -> reqwest::Response {
    client
        .post(server.url("/jobs/lease"))
        .json(&json!({
            "workerId": worker_id,
            "acceptedKinds": ["MODEL_THUMBNAIL"],
            "leaseSeconds": lease_seconds,
        }))
        .send()
        .await
        .unwrap()
}

fn derived_result() -> serde_json::Value {
    json!({
        "posterHash": "0000000000000000000000000000000000000000000000000000000000000000",
        "width": 256,
        "height": 256,
        "sizeBytes": 1024,
    })
}

#[tokio::test]
async fn test_lease_then_complete_then_empty_queue() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    let leased = lease(&client, &server, "worker-a", 60).await;
    assert_eq!(leased.status(), 200);
    let job: serde_json::Value = leased.json().await.unwrap();
    assert_eq!(job["status"], "LEASED");
    assert_eq!(job["leaseOwner"], "worker-a");

    let completed = client
        .post(server.url("/jobs/1/complete"))
        .json(&json!({ "workerId": "worker-a", "result": derived_result() }))
        .send()
        .await
        .unwrap();
    assert_eq!(completed.status(), 200);

    // The queue is drained now.
    let empty = lease(&client, &server, "worker-a", 60).await;
    assert_eq!(empty.status(), 204);
}

#[tokio::test]
async fn test_mismatched_worker_id_is_lease_lost() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    lease(&client, &server, "worker-a", 60).await;

    for path in ["/jobs/1/renew", "/jobs/1/complete"] {
        let response = client
            .post(server.url(path))
            .json(&json!({ "workerId": "worker-b", "result": {} }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409, "{path} should be LEASE_LOST");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "LEASE_LOST");
    }
}

#[tokio::test]
async fn test_crashed_lease_is_reclaimed_and_stolen() {
    // Sweeper runs every 200ms in the test harness.
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // Worker A takes a 1-second lease and crashes.
    let leased = lease(&client, &server, "worker-a", 1).await;
    assert_eq!(leased.status(), 200);

    // Wait out the lease plus a sweep cycle.
    tokio::time::sleep(Duration::from_millis(1600)).await;

    // Worker B steals and finishes the job.
    let stolen = lease(&client, &server, "worker-b", 60).await;
    assert_eq!(stolen.status(), 200);
    let job: serde_json::Value = stolen.json().await.unwrap();
    assert_eq!(job["id"], 1);

    client
        .post(server.url("/jobs/1/complete"))
        .json(&json!({ "workerId": "worker-b", "result": derived_result() }))
        .send()
        .await
        .unwrap();

    let final_job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(final_job["status"], "DONE");
    assert_eq!(final_job["attempts"], 2);

    // COMPLETED is timestamped after EXPIRED_RECLAIMED.
    let events: serde_json::Value = client
        .get(server.url("/jobs/1/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = events["items"].as_array().unwrap();
    let event_time = |kind: &str| {
        let raw = items
            .iter()
            .find(|e| e["kind"] == kind)
            .and_then(|e| e["timestamp"].as_str())
            .unwrap();
        chrono::DateTime::parse_from_rfc3339(raw).unwrap()
    };
    assert!(event_time("COMPLETED") > event_time("EXPIRED_RECLAIMED"));
}

#[tokio::test]
async fn test_failure_cap_terminates_the_job() {
    let server = TestServer::start_with(|config| {
        config.max_attempts = 2;
    })
    .await;
    let client = reqwest::Client::new();
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    for expected_status in ["PENDING", "FAILED"] {
        let leased = lease(&client, &server, "worker-a", 60).await;
        assert_eq!(leased.status(), 200);
        let failed: serde_json::Value = client
            .post(server.url("/jobs/1/fail"))
            .json(&json!({ "workerId": "worker-a", "error": "render error" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(failed["status"], expected_status);
    }

    let job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "FAILED");
    assert_eq!(job["attempts"], 2);
    assert_eq!(job["lastError"], "render error");

    let events: serde_json::Value = client
        .get(server.url("/jobs/1/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let failed_events = events["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "FAILED")
        .count();
    assert_eq!(failed_events, 2);

    // A capped job is no longer leasable.
    let empty = lease(&client, &server, "worker-a", 60).await;
    assert_eq!(empty.status(), 204);
}

#[tokio::test]
async fn test_lease_validates_kinds() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/jobs/lease"))
        .json(&json!({
            "workerId": "worker-a",
            "acceptedKinds": ["MODEL_THUMBNAIL", "NOT_A_KIND"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "VALIDATION");
}

#[tokio::test]
async fn test_regenerate_deduplicates_against_pending_job() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // The upload already enqueued job 1; regenerate returns the same job.
    let regen: serde_json::Value = client
        .post(server.url("/models/1/thumbnail/regenerate"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(regen["jobId"], 1);
    assert_eq!(
        client.get(server.url("/jobs/2")).send().await.unwrap().status(),
        404
    );
}
