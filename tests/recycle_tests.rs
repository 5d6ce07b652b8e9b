//! Recycle bin tests.

mod common;

use common::{upload_file, TestServer, CUBE_OBJ};
use serde_json::json;

#[tokio::test]
async fn test_soft_delete_and_restore_round_trip() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    let deleted = client
        .delete(server.url("/models/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    // Gone from the default listing.
    let listing: serde_json::Value = client
        .get(server.url("/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["totalCount"], 0);

    // Visible in the bin.
    let recycled: serde_json::Value = client
        .get(server.url("/recycled"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(recycled["models"].as_array().unwrap().len(), 1);
    assert_eq!(recycled["models"][0]["id"], 1);
    assert_eq!(recycled["models"][0]["name"], "cube");

    // Restore brings it back with its version history intact.
    let restored = client
        .post(server.url("/recycled/model/1/restore"))
        .send()
        .await
        .unwrap();
    assert_eq!(restored.status(), 204);

    let model: serde_json::Value = client
        .get(server.url("/models/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(model["id"], 1);
    assert_eq!(model["versions"].as_array().unwrap().len(), 1);
    assert_eq!(model["activeVersionId"], 1);

    let listing: serde_json::Value = client
        .get(server.url("/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["totalCount"], 1);
}

#[tokio::test]
async fn test_purge_requires_the_bin() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // A live model cannot be purged.
    let refused = client
        .delete(server.url("/recycled/model/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 409);
    let body: serde_json::Value = refused.json().await.unwrap();
    assert_eq!(body["error"], "PRECONDITION");
}

#[tokio::test]
async fn test_purge_cascades_versions_jobs_and_thumbnails() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;

    // Drive the job to a terminal state so the purge can take it.
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

    client.delete(server.url("/models/1")).send().await.unwrap();
    let purged = client
        .delete(server.url("/recycled/model/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(purged.status(), 204);

    // Model, version, and job rows are gone.
    assert_eq!(
        client.get(server.url("/models/1")).send().await.unwrap().status(),
        404
    );
    assert_eq!(
        client.get(server.url("/jobs/1")).send().await.unwrap().status(),
        404
    );

    // The bin no longer lists it.
    let recycled: serde_json::Value = client
        .get(server.url("/recycled"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(recycled["models"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_recycle_kind_is_rejected() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/recycled/widget/1/restore"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "VALIDATION");
}
