//! End-to-end test of the out-of-process worker path: the worker loop runs
//! against the HTTP worker API only, with no access to the server's stores.

mod common;

use common::{upload_file, TestServer, CUBE_OBJ};
use std::sync::Arc;
use std::time::Duration;

use assetvault_rs::worker::{
    ProcessorContext, ProcessorRegistry, RemoteBlobStore, RemoteQueue, WorkerLoop,
};
use assetvault_rs::Config;

fn spawn_remote_worker(base_url: &str, worker_id: &str) {
    let queue = Arc::new(RemoteQueue::new(base_url.to_string()));
    let blobs = Arc::new(RemoteBlobStore::new(base_url.to_string()));
    let registry = Arc::new(ProcessorRegistry::with_default_processors());
    let ctx = ProcessorContext {
        blobs,
        queue: queue.clone(),
        config: Arc::new(Config::default()),
    };
    let worker = WorkerLoop::new(
        queue,
        registry,
        None,
        ctx,
        worker_id.to_string(),
        Duration::from_secs(30),
        Duration::from_millis(50),
    );
    tokio::spawn(async move { worker.run().await });
}

#[tokio::test]
async fn test_remote_worker_completes_a_thumbnail_job() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    spawn_remote_worker(&server.base_url, "remote-1");
    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // The remote worker drives the job to DONE through the HTTP surface.
    let mut ready = None;
    for _ in 0..100 {
        let body: serde_json::Value = client
            .get(server.url("/models/1/thumbnail"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["status"] == "Ready" {
            ready = Some(body);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let ready = ready.expect("remote worker never completed the job");
    assert!(ready["width"].as_u64().unwrap() > 0);

    // The server-side completion hook ran: derived state, events, and the
    // streamed file all exist.
    let job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "DONE");

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
    assert!(kinds.contains(&"PROGRESS"));
    assert_eq!(kinds.last(), Some(&"COMPLETED"));

    let file = client
        .get(server.url("/models/1/thumbnail/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(file.status(), 200);
    assert!(file.text().await.unwrap().starts_with("<svg"));
}

#[tokio::test]
async fn test_blob_endpoints_serve_workers() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let upload: serde_json::Value =
        upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ)
            .await
            .json()
            .await
            .unwrap();
    let hash = upload["blobHash"].as_str().unwrap();

    // Workers resolve source content by hash.
    let blob = client
        .get(server.url(&format!("/blobs/{}", hash)))
        .send()
        .await
        .unwrap();
    assert_eq!(blob.status(), 200);
    assert_eq!(blob.bytes().await.unwrap().as_ref(), CUBE_OBJ);

    // And publish derived output through POST /blobs.
    let part = reqwest::multipart::Part::bytes(b"<svg xmlns=\"a\"/>".as_ref())
        .file_name("poster.svg")
        .mime_str("image/svg+xml")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);
    let stored = client
        .post(server.url("/blobs"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(stored.status(), 201);
    let stored: serde_json::Value = stored.json().await.unwrap();
    assert_eq!(stored["wasNew"], true);
    assert_eq!(stored["sizeBytes"], 16);
}
