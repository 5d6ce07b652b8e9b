//! Thumbnail and waveform lifecycle tests against the embedded worker pool.

mod common;

use common::{upload_file, ws_connect, ws_next_json, ws_send, TestServer, CUBE_OBJ};
use serde_json::json;
use std::time::Duration;

/// Polls a derived-state endpoint until it reaches a terminal status.
async fn wait_for_ready(client: &reqwest::Client, url: &str) -> serde_json::Value {
    for _ in 0..100 {
        let body: serde_json::Value = client.get(url).send().await.unwrap().json().await.unwrap();
        let status = body["status"].as_str().unwrap().to_string();
        if status == "Ready" || status == "Failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("derived state never reached a terminal status");
}

#[tokio::test]
async fn test_thumbnail_lifecycle_is_visible() {
    let server = TestServer::start_with(|config| {
        config.embedded_workers = true;
        // Leave room to observe the Pending state and subscribe.
        config.idle_backoff = Duration::from_millis(500);
    })
    .await;
    let client = reqwest::Client::new();

    // Subscribe before the upload so the completion broadcast is caught.
    let mut socket = ws_connect(&server.ws_url).await;
    ws_send(
        &mut socket,
        json!({ "type": "JoinGroup", "entityKind": "modelVersion", "entityId": 1 }),
    )
    .await;

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // Immediately after the upload the derivation is still pending.
    let pending: serde_json::Value = client
        .get(server.url("/models/1/thumbnail"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(matches!(
        pending["status"].as_str().unwrap(),
        "Pending" | "Processing"
    ));

    let ready = wait_for_ready(&client, &server.url("/models/1/thumbnail")).await;
    assert_eq!(ready["status"], "Ready");
    assert_eq!(ready["fileUrl"], "/models/1/thumbnail/file");
    assert!(ready["width"].as_u64().unwrap() > 0);
    assert!(ready["height"].as_u64().unwrap() > 0);
    assert!(ready["sizeBytes"].as_u64().unwrap() > 0);

    // The subscribed client observed the status change.
    let message = ws_next_json(&mut socket, Duration::from_secs(5))
        .await
        .expect("no hub message received");
    assert_eq!(message["type"], "ThumbnailStatusChanged");
    assert_eq!(message["versionId"], 1);
    assert_eq!(message["status"], "Ready");
    assert_eq!(message["url"], "/models/1/thumbnail/file");
    assert_eq!(message["schemaVersion"], 1);
    assert!(message["timestamp"].is_string());
}

#[tokio::test]
async fn test_thumbnail_file_is_cacheable() {
    let server = TestServer::start_with(|config| {
        config.embedded_workers = true;
        config.idle_backoff = Duration::from_millis(50);
    })
    .await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    wait_for_ready(&client, &server.url("/models/1/thumbnail")).await;

    let response = client
        .get(server.url("/models/1/thumbnail/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=86400"
    );
    let etag = response
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = response.text().await.unwrap();
    assert!(body.starts_with("<svg"));

    // The ETag is stable and honored.
    let cached = client
        .get(server.url("/models/1/thumbnail/file"))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(cached.status(), 304);
}

#[tokio::test]
async fn test_thumbnail_before_completion_has_no_file() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    let response = client
        .get(server.url("/models/1/thumbnail/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_waveform_lifecycle() {
    let server = TestServer::start_with(|config| {
        config.embedded_workers = true;
        config.idle_backoff = Duration::from_millis(50);
    })
    .await;
    let client = reqwest::Client::new();

    let response = upload_file(
        &client,
        &server.url("/sounds"),
        "steps.wav",
        b"RIFF1234WAVEfmt fake-but-plausible-payload-bytes-for-peaks",
    )
    .await;
    assert_eq!(response.status(), 201);

    let ready = wait_for_ready(&client, &server.url("/sounds/1/waveform")).await;
    assert_eq!(ready["status"], "Ready");
    assert_eq!(ready["fileUrl"], "/sounds/1/waveform/file");

    let image = client
        .get(server.url("/sounds/1/waveform/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(image.status(), 200);
    assert!(image.text().await.unwrap().contains("<rect"));
}

#[tokio::test]
async fn test_texture_set_sphere_preview() {
    let server = TestServer::start_with(|config| {
        config.embedded_workers = true;
        config.idle_backoff = Duration::from_millis(50);
    })
    .await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/texture-sets"), "bark.png", b"pseudo-albedo-bytes").await;
    let ready = wait_for_ready(&client, &server.url("/texture-sets/1/thumbnail")).await;
    assert_eq!(ready["status"], "Ready");

    let image = client
        .get(server.url("/texture-sets/1/thumbnail/file"))
        .send()
        .await
        .unwrap();
    assert!(image.text().await.unwrap().contains("radialGradient"));
}

#[tokio::test]
async fn test_job_events_record_the_pipeline() {
    let server = TestServer::start_with(|config| {
        config.embedded_workers = true;
        config.idle_backoff = Duration::from_millis(50);
    })
    .await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    wait_for_ready(&client, &server.url("/models/1/thumbnail")).await;

    let events: serde_json::Value = client
        .get(server.url("/jobs/1/events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = events["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.first(), Some(&"ENQUEUED"));
    assert!(kinds.contains(&"LEASED"));
    assert!(kinds.contains(&"PROGRESS"));
    assert_eq!(kinds.last(), Some(&"COMPLETED"));
}
