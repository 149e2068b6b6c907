//! Match server: accepts player connections over TCP and drives the
//! gesture-matching session protocol against the similarity store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use handspeak::config::Config;
use handspeak::game::{run_session, GameContext, Registry};
use handspeak::hand::OnnxHandDetector;
use handspeak::store::QdrantStore;

const CONFIG_PATH: &str = "match_server.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load_or_default(CONFIG_PATH);
    info!("match server {} starting", env!("CARGO_PKG_VERSION"));

    let detector = OnnxHandDetector::new(
        &config.detector.model,
        config.detector.max_hands,
        config.detector.min_confidence,
    )
    .with_context(|| format!("failed to load hand landmark model {}", config.detector.model))?;

    let store = Arc::new(QdrantStore::new(&config.store));
    match store.ping().await {
        Ok(()) => info!(
            "similarity store reachable at {} (collection {})",
            config.store.url, config.store.collection
        ),
        // Verdicts will keep reporting the store state per frame; starting
        // without it lets the store come up later
        Err(e) => warn!("similarity store check failed: {e}"),
    }

    let ctx = Arc::new(GameContext::new(
        detector,
        store,
        &config.matching,
        config.server.detect_slots,
    ));
    let registry = Arc::new(Registry::new());

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    info!("listening on {}", config.server.listen_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = run_session(stream, ctx, registry).await {
                error!("session from {addr} ended with error: {e}");
            }
        });
    }
}
