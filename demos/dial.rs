//! Outbound connection example
//!
//! Run with: cargo run --example dial -- rtmp://localhost/live/test_key
//!
//! Dials an RTMP server, connects to the application in the URL and waits
//! for the automatically created stream, logging every callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rtmp_outbound::{
    ClientConfig, ConnectionStatus, LoggingHandler, OutboundConnection, OutboundHandler,
    OutboundStream, RawMessage,
};

/// Logs like `LoggingHandler` and forwards status changes to `main`
struct DemoHandler {
    status_tx: mpsc::UnboundedSender<ConnectionStatus>,
}

#[async_trait]
impl OutboundHandler for DemoHandler {
    async fn on_status(&self, status: ConnectionStatus) {
        LoggingHandler.on_status(status).await;
        let _ = self.status_tx.send(status);
    }

    async fn on_stream_created(&self, stream: Arc<OutboundStream>) {
        LoggingHandler.on_stream_created(stream).await;
    }

    async fn on_message(&self, message: RawMessage) {
        LoggingHandler.on_message(message).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_outbound=debug".parse()?)
                .add_directive("dial=info".parse()?),
        )
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: dial <rtmp_url>");
        eprintln!("Example: dial rtmp://localhost/live/test_key");
        std::process::exit(1);
    });

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let config = ClientConfig::new(&url).connect_timeout(Duration::from_secs(5));
    let conn =
        OutboundConnection::dial_with_config(config, Arc::new(DemoHandler { status_tx })).await?;
    println!("Handshake with {} complete", conn.url());

    conn.connect(vec![]).await?;

    let wait = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(status) = status_rx.recv().await {
            match status {
                ConnectionStatus::StreamReady => return true,
                ConnectionStatus::Closed => return false,
                _ => {}
            }
        }
        false
    })
    .await;

    match wait {
        Ok(true) => {
            for stream in conn.streams().await {
                println!("Stream {} on chunk stream {}", stream.id(), stream.chunk_stream_id());
            }
        }
        Ok(false) => eprintln!("Connection closed before a stream was created"),
        Err(_) => {
            let (status, error) = conn.status().await;
            eprintln!("Timed out in state {:?} (last error: {:?})", status, error);
        }
    }

    conn.close().await;
    Ok(())
}
