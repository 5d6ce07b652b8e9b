//! Assetvault-rs: asset-processing backbone for a self-hosted 3D asset
//! library.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use assetvault_rs::{Args, AssetServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = Config::from(args);
    let server = AssetServer::new(config);

    println!(
        "Asset library service is starting at {}\n\nPress Ctrl+C to stop the server.",
        server.base_url()
    );

    server.run().await
}
