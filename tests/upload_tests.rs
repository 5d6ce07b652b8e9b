//! Upload and deduplication tests.

mod common;

use common::{upload_file, TestServer, CUBE_OBJ, PYRAMID_OBJ};

#[tokio::test]
async fn test_upload_creates_model_with_first_version() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    assert_eq!(response.status(), 201);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["versionId"], 1);
    assert_eq!(body["deduplicated"], false);
    assert_eq!(body["blobHash"].as_str().unwrap().len(), 64);

    // Exactly one thumbnail job was enqueued.
    let job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["kind"], "MODEL_THUMBNAIL");
    assert_eq!(job["status"], "PENDING");
    assert_eq!(
        client.get(server.url("/jobs/2")).send().await.unwrap().status(),
        404
    );
}

#[tokio::test]
async fn test_replayed_upload_is_deduplicated() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let first = upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    assert_eq!(first.status(), 201);
    let first: serde_json::Value = first.json().await.unwrap();

    let second = upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    assert_eq!(second.status(), 200);
    let second: serde_json::Value = second.json().await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["versionId"], second["versionId"]);
    assert_eq!(first["blobHash"], second["blobHash"]);
    assert_eq!(second["deduplicated"], true);

    // Still exactly one job row for that derivation.
    assert_eq!(
        client.get(server.url("/jobs/2")).send().await.unwrap().status(),
        404
    );
}

#[tokio::test]
async fn test_unsupported_format_is_rejected_early() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = upload_file(&client, &server.url("/models"), "cube.exe", CUBE_OBJ).await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "UNSUPPORTED_FORMAT");
    assert!(body["message"].as_str().unwrap().contains("cube.exe"));

    // No model row was created.
    assert_eq!(
        client.get(server.url("/models/1")).send().await.unwrap().status(),
        404
    );
}

#[tokio::test]
async fn test_new_version_allocates_the_next_number() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    let second =
        upload_file(&client, &server.url("/models/1/versions"), "pyramid.obj", PYRAMID_OBJ).await;
    assert_eq!(second.status(), 201);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second["id"], 1);
    assert_eq!(second["versionId"], 2);

    let model: serde_json::Value = client
        .get(server.url("/models/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let numbers: Vec<i64> = model["versions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["versionNumber"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2]);
    // First version stays active until an explicit switch.
    assert_eq!(model["activeVersionId"], 1);
}

#[tokio::test]
async fn test_auxiliary_file_attaches_without_new_job() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    let aux = upload_file(
        &client,
        &server.url("/files?versionId=1&role=project-source"),
        "scene.blend",
        b"BLENDER-fake-project-file",
    )
    .await;
    assert_eq!(aux.status(), 201);

    // Only the thumbnail job from the model upload exists.
    assert_eq!(
        client.get(server.url("/jobs/2")).send().await.unwrap().status(),
        404
    );

    let model: serde_json::Value = client
        .get(server.url("/models/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let blobs = model["versions"][0]["blobs"].as_array().unwrap();
    assert_eq!(blobs.len(), 2);
}

#[tokio::test]
async fn test_texture_set_upload_enqueues_sphere_job() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response =
        upload_file(&client, &server.url("/texture-sets"), "wood.png", b"not-a-real-png").await;
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert!(body.get("versionId").is_none());

    let job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["kind"], "TEXTURESET_THUMBNAIL");

    let textures: serde_json::Value = client
        .get(server.url("/texture-sets/1/textures"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(textures["name"], "wood");
    assert_eq!(textures["textures"].as_array().unwrap().len(), 1);
    assert_eq!(textures["textures"][0]["textureType"], "ALBEDO");
}

#[tokio::test]
async fn test_batch_tag_correlates_uploads() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(
        &client,
        &server.url("/models?batch=drop-42"),
        "cube.obj",
        CUBE_OBJ,
    )
    .await;
    upload_file(
        &client,
        &server.url("/sounds?batch=drop-42"),
        "steps.wav",
        b"RIFFxxxxWAVEfmt fake sound payload",
    )
    .await;

    let report: serde_json::Value = client
        .get(server.url("/uploads/batches/drop-42"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = report["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(report["batchTag"], "drop-42");
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let server = TestServer::start_with(|config| {
        config.upload_max_bytes = 16;
    })
    .await;
    let client = reqwest::Client::new();

    let response = upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    assert_eq!(response.status(), 413);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "PAYLOAD_TOO_LARGE");
}
