//! Push hub tests.

mod common;

use common::{upload_file, ws_connect, ws_next_json, ws_send, TestServer, CUBE_OBJ, PYRAMID_OBJ};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_active_version_switch_is_broadcast() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models/1/versions"), "pyramid.obj", PYRAMID_OBJ).await;

    let mut socket = ws_connect(&server.ws_url).await;
    ws_send(&mut socket, json!({ "type": "JoinAllModelsGroup" })).await;

    let switched = client
        .put(server.url("/models/1/active-version"))
        .json(&json!({ "versionId": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(switched.status(), 204);

    let message = ws_next_json(&mut socket, Duration::from_secs(5))
        .await
        .expect("no broadcast received");
    assert_eq!(message["type"], "ActiveVersionChanged");
    assert_eq!(message["modelId"], 1);
    assert_eq!(message["versionId"], 2);
    assert_eq!(message["prevVersionId"], 1);
    assert_eq!(message["schemaVersion"], 1);
    assert!(message["timestamp"].is_string());

    // Exactly one broadcast for one switch.
    assert!(ws_next_json(&mut socket, Duration::from_millis(400)).await.is_none());
}

#[tokio::test]
async fn test_clients_joining_late_get_no_backfill() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models/1/versions"), "pyramid.obj", PYRAMID_OBJ).await;

    // The switch happens before anyone subscribes.
    client
        .put(server.url("/models/1/active-version"))
        .json(&json!({ "versionId": 2 }))
        .send()
        .await
        .unwrap();

    let mut socket = ws_connect(&server.ws_url).await;
    ws_send(&mut socket, json!({ "type": "JoinAllModelsGroup" })).await;
    assert!(ws_next_json(&mut socket, Duration::from_millis(400)).await.is_none());
}

#[tokio::test]
async fn test_jobs_group_sees_queue_lifecycle() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let mut socket = ws_connect(&server.ws_url).await;
    ws_send(&mut socket, json!({ "type": "JoinJobsGroup" })).await;

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    let added = ws_next_json(&mut socket, Duration::from_secs(5))
        .await
        .expect("no JobAdded received");
    assert_eq!(added["type"], "JobAdded");
    assert_eq!(added["jobId"], 1);
    assert_eq!(added["kind"], "MODEL_THUMBNAIL");

    // Complete through the worker API and observe JobCompleted.
    client
        .post(server.url("/jobs/lease"))
        .json(&json!({ "workerId": "w", "acceptedKinds": ["MODEL_THUMBNAIL"], "leaseSeconds": 60 }))
        .send()
        .await
        .unwrap();
    client
        .post(server.url("/jobs/1/complete"))
        .json(&json!({
            "workerId": "w",
            "result": {
                "posterHash": "0000000000000000000000000000000000000000000000000000000000000000",
                "width": 256,
                "height": 256,
                "sizeBytes": 64,
            },
        }))
        .send()
        .await
        .unwrap();

    let completed = ws_next_json(&mut socket, Duration::from_secs(5))
        .await
        .expect("no JobCompleted received");
    assert_eq!(completed["type"], "JobCompleted");
    assert_eq!(completed["jobId"], 1);
}

#[tokio::test]
async fn test_leave_group_stops_delivery() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models/1/versions"), "pyramid.obj", PYRAMID_OBJ).await;

    let mut socket = ws_connect(&server.ws_url).await;
    ws_send(
        &mut socket,
        json!({ "type": "JoinGroup", "entityKind": "model", "entityId": 1 }),
    )
    .await;
    ws_send(
        &mut socket,
        json!({ "type": "LeaveGroup", "entityKind": "model", "entityId": 1 }),
    )
    .await;

    client
        .put(server.url("/models/1/active-version"))
        .json(&json!({ "versionId": 2 }))
        .send()
        .await
        .unwrap();
    assert!(ws_next_json(&mut socket, Duration::from_millis(400)).await.is_none());
}
