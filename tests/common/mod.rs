//! Common test utilities.

use std::time::Duration;
use tokio::net::TcpListener;

use assetvault_rs::{AssetServer, Config};

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts a server after letting the caller adjust the configuration.
    pub async fn start_with(adjust: impl FnOnce(&mut Config)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port,
            ..Config::default()
        };
        // Keep background loops quick inside the suite.
        config.reclaim_interval = Duration::from_millis(200);
        config.idle_backoff = Duration::from_millis(50);
        adjust(&mut config);

        let base_url = format!("http://127.0.0.1:{}", port);
        let ws_url = format!("ws://127.0.0.1:{}/ws", port);
        let server = AssetServer::new(config);

        tokio::spawn(async move {
            server.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self { base_url, ws_url }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Uploads bytes as the multipart `file` field.
pub async fn upload_file(
    client: &reqwest::Client,
    url: &str,
    filename: &str,
    bytes: &'static [u8],
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    client.post(url).multipart(form).send().await.unwrap()
}

/// WebSocket client half for hub tests.
pub type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Connects a hub client.
pub async fn ws_connect(url: &str) -> WsClient {
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

/// Sends a hub command and gives the server a beat to register it.
pub async fn ws_send(socket: &mut WsClient, command: serde_json::Value) {
    use futures_util::SinkExt;
    socket
        .send(tokio_tungstenite::tungstenite::Message::Text(
            command.to_string(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Reads the next JSON text frame, skipping control frames.
pub async fn ws_next_json(socket: &mut WsClient, timeout: Duration) -> Option<serde_json::Value> {
    use futures_util::StreamExt;
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let frame = tokio::time::timeout(remaining, socket.next()).await.ok()??;
        match frame.ok()? {
            tokio_tungstenite::tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).ok();
            }
            _ => continue,
        }
    }
}

/// A small OBJ cube used across the suite.
pub const CUBE_OBJ: &[u8] = b"# cube\n\
v -1 -1 -1\nv 1 -1 -1\nv 1 1 -1\nv -1 1 -1\n\
v -1 -1 1\nv 1 -1 1\nv 1 1 1\nv -1 1 1\n\
f 1 2 3 4\nf 5 6 7 8\nf 1 2 6 5\nf 3 4 8 7\n";

/// A second distinct OBJ payload.
pub const PYRAMID_OBJ: &[u8] = b"# pyramid\n\
v 0 1 0\nv -1 0 -1\nv 1 0 -1\nv 1 0 1\nv -1 0 1\n\
f 1 2 3\nf 1 3 4\nf 1 4 5\nf 1 5 2\n";
