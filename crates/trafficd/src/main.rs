//! trafficd - datagram dispatch daemon for vehicle-count inference.
//!
//! Binds a Unix datagram socket, classifies the images named by incoming
//! frames and publishes each outcome to the configured message bus.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, LogFormat, PublishArgs, SendArgs, ServeArgs, UploadArgs};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trafficd_core::{
    upload_file, Backoff, DispatchClient, DispatchServer, HttpBlobStore, HttpMessageBus, LogBus,
    MessageBus, MessageKind, RequestFrame, ResultPublisher, SimulatedClassifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_format);

    match cli.into_command() {
        Command::Serve(args) => serve(args).await,
        Command::Send(args) => send(args).await,
        Command::Upload(args) => upload(args).await,
    }
}

/// `RUST_LOG` overrides the level chosen by `--debug`.
fn init_logging(debug: bool, format: LogFormat) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.server_config()?;
    let publisher = build_publisher(&args.publish)?;

    info!("Starting trafficd");
    info!(
        "Socket {}, {} workers, publishing to topic {}",
        config.socket_path.display(),
        config.workers,
        publisher.topic()
    );

    let server = DispatchServer::new(config, Arc::new(SimulatedClassifier::new()), publisher);
    server.run_until(shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    let mut frame = RequestFrame::infer(args.id, &args.path, &args.format);
    frame.kind = MessageKind::from(args.kind);

    let client = DispatchClient::bind_ephemeral(&args.socket_path)?;
    client.send(&frame).await?;

    info!(
        "Sent {} frame {} to {}",
        frame.kind,
        frame.id,
        args.socket_path.display()
    );
    Ok(())
}

async fn upload(args: UploadArgs) -> Result<()> {
    let Some(bucket) = args.publish.bucket.as_deref() else {
        anyhow::bail!("No bucket configured (use --bucket or TRAFFICD_BUCKET)");
    };

    let store = build_blob_store(&args.publish)?;
    upload_file(&store, bucket, &args.file)
        .await
        .with_context(|| format!("Failed to upload {}", args.file.display()))?;

    info!("Uploaded {}", args.file.display());
    Ok(())
}

fn build_publisher(args: &PublishArgs) -> Result<ResultPublisher> {
    let bus: Arc<dyn MessageBus> = match &args.bus_url {
        Some(url) => {
            info!("Publishing to bus at {}", url);
            Arc::new(HttpMessageBus::new(url)?.with_auth_token(args.auth_token.clone()))
        }
        None => {
            warn!("No bus URL configured, outcomes will only be logged");
            Arc::new(LogBus::new())
        }
    };

    let backoff = Backoff::default().with_max_attempts(args.publish_attempts);
    let mut publisher = ResultPublisher::new(bus, &args.topic).with_backoff(backoff);

    if let Some(bucket) = &args.bucket {
        publisher = publisher.with_blob_store(Arc::new(build_blob_store(args)?), bucket);
    }

    Ok(publisher)
}

fn build_blob_store(args: &PublishArgs) -> Result<HttpBlobStore> {
    Ok(HttpBlobStore::new(&args.storage_url)?.with_auth_token(args.auth_token.clone()))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
