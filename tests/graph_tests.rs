//! Asset graph tests: listings, filters, version management, membership.

mod common;

use common::{upload_file, TestServer, CUBE_OBJ, PYRAMID_OBJ};
use serde_json::json;

#[tokio::test]
async fn test_listing_paginates_with_totals() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models"), "pyramid.obj", PYRAMID_OBJ).await;
    upload_file(
        &client,
        &server.url("/models"),
        "slab.obj",
        b"v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n",
    )
    .await;

    let page: serde_json::Value = client
        .get(server.url("/models?page=2&pageSize=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["totalCount"], 3);
    assert_eq!(page["page"], 2);
    assert_eq!(page["pageSize"], 2);
    assert_eq!(page["totalPages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["id"], 3);
}

#[tokio::test]
async fn test_pack_filter_narrows_the_listing() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models"), "pyramid.obj", PYRAMID_OBJ).await;

    let pack: serde_json::Value = client
        .post(server.url("/packs"))
        .json(&json!({ "name": "starter", "description": "starter assets" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pack["name"], "starter");

    client
        .post(server.url(&format!("/containers/{}/members", pack["id"])))
        .json(&json!({ "kind": "model", "id": 2 }))
        .send()
        .await
        .unwrap();

    let filtered: serde_json::Value = client
        .get(server.url(&format!("/models?packId={}", pack["id"])))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filtered["totalCount"], 1);
    assert_eq!(filtered["items"][0]["id"], 2);
}

#[tokio::test]
async fn test_duplicate_pack_name_conflicts() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let create = |name: &'static str| {
        let client = client.clone();
        let url = server.url("/packs");
        async move {
            client
                .post(url)
                .json(&json!({ "name": name }))
                .send()
                .await
                .unwrap()
        }
    };
    assert_eq!(create("props").await.status(), 201);
    let clash = create("props").await;
    assert_eq!(clash.status(), 409);
    let body: serde_json::Value = clash.json().await.unwrap();
    assert_eq!(body["error"], "CONFLICT");
}

#[tokio::test]
async fn test_active_version_must_belong_to_the_model() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/models"), "pyramid.obj", PYRAMID_OBJ).await;

    // Version 2 belongs to model 2, not model 1.
    let response = client
        .put(server.url("/models/1/active-version"))
        .json(&json!({ "versionId": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "PRECONDITION");
}

#[tokio::test]
async fn test_default_texture_set_requires_binding() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/models"), "cube.obj", CUBE_OBJ).await;
    upload_file(&client, &server.url("/texture-sets"), "wood.png", b"fake-albedo").await;

    let refused = client
        .put(server.url("/models/1/default-texture-set"))
        .json(&json!({ "textureSetId": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 409);

    client
        .post(server.url("/texture-sets/1/bindings"))
        .json(&json!({ "versionId": 1 }))
        .send()
        .await
        .unwrap();

    let accepted = client
        .put(server.url("/models/1/default-texture-set"))
        .json(&json!({ "textureSetId": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 204);

    let model: serde_json::Value = client
        .get(server.url("/models/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(model["defaultTextureSetId"], 1);

    // The binding also powers the textureSetId listing filter.
    let filtered: serde_json::Value = client
        .get(server.url("/models?textureSetId=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filtered["totalCount"], 1);
}

#[tokio::test]
async fn test_packed_texture_channels_attach_individually() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    upload_file(&client, &server.url("/texture-sets"), "bark.png", b"fake-albedo").await;

    // The same packed image maps two channels to two texture types.
    let packed: &'static [u8] = b"fake-packed-orm-image";
    let first = upload_file(
        &client,
        &server.url("/files?textureSetId=1&textureType=ROUGHNESS&channel=R"),
        "orm.png",
        packed,
    )
    .await;
    assert_eq!(first.status(), 201);
    let second = upload_file(
        &client,
        &server.url("/files?textureSetId=1&textureType=METALLIC&channel=G"),
        "orm.png",
        packed,
    )
    .await;
    assert_eq!(second.status(), 201);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second["deduplicated"], true);

    // Re-mapping an occupied channel violates per-channel uniqueness.
    let clash = upload_file(
        &client,
        &server.url("/files?textureSetId=1&textureType=AO&channel=R"),
        "orm.png",
        packed,
    )
    .await;
    assert_eq!(clash.status(), 409);

    let textures: serde_json::Value = client
        .get(server.url("/texture-sets/1/textures"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(textures["textures"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_sound_upload_is_idempotent() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let bytes: &'static [u8] = b"RIFF0000WAVEfmt payload";
    let first = upload_file(&client, &server.url("/sounds"), "steps.wav", bytes).await;
    assert_eq!(first.status(), 201);
    let second = upload_file(&client, &server.url("/sounds"), "steps.wav", bytes).await;
    assert_eq!(second.status(), 200);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second["id"], 1);
    assert_eq!(second["deduplicated"], true);

    // One SOUND_WAVEFORM job, not two.
    let job: serde_json::Value = client
        .get(server.url("/jobs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["kind"], "SOUND_WAVEFORM");
    assert_eq!(
        client.get(server.url("/jobs/2")).send().await.unwrap().status(),
        404
    );
}
