//! quarryd — Quarry storage node daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use quarry_core::config::QuarryConfig;
use quarry_services::{
    DiskPieceStore, Ed25519Verifier, Observers, RetrievalContext, RetrievalLimits,
    RetrievalServer, RetrievalStats, SqliteLedger, TracingObserver,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = QuarryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = QuarryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        QuarryConfig::default()
    });
    tracing::info!(config = %QuarryConfig::file_path().display(), "quarryd starting");

    // Pieces
    let store = DiskPieceStore::new(&config.storage.pieces_path).with_context(|| {
        format!(
            "failed to open piece store at {}",
            config.storage.pieces_path.display()
        )
    })?;
    tracing::info!(
        root = %config.storage.pieces_path.display(),
        pieces = store.count(),
        "piece store ready"
    );

    // Ledger
    let ledger = SqliteLedger::open(&config.storage.ledger_path).with_context(|| {
        format!(
            "failed to open allocation ledger at {}",
            config.storage.ledger_path.display()
        )
    })?;
    tracing::info!(
        path = %config.storage.ledger_path.display(),
        entries = ledger.count().unwrap_or(0),
        "allocation ledger ready"
    );

    // Verifier
    let verifier = Ed25519Verifier::from_config(&config.auth);
    if verifier.is_open() {
        tracing::warn!("no trusted renters configured — any validly signed allocation is accepted");
    }

    let stats = RetrievalStats::new();
    let observer = Observers::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(stats.clone()));
    let limits = RetrievalLimits::from(&config.retrieval);
    tracing::info!(
        max_read_size = limits.flow.max_read_size,
        max_message = limits.max_message,
        default_allocation = limits.flow.default_allocation,
        idle_timeout = ?limits.idle_timeout,
        "retrieval limits"
    );

    let ctx = RetrievalContext::new(
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
        Arc::new(verifier),
    )
    .with_observer(Arc::new(observer))
    .with_limits(limits);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let bind = format!("{}:{}", config.network.listen_addr, config.network.listen_port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind retrieval listener on {}", bind))?;
    let server = RetrievalServer::new(listener, ctx, shutdown_tx.clone());
    let listen_port = server.local_addr()?.port();
    let server_task = tokio::spawn(server.run());

    let api_port = config.network.api_port;
    let api_task = {
        let state = quarry_api::ApiState {
            stats,
            store,
            ledger,
            listen_port,
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = quarry_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("retrieval listener exited: {:?}", r),
        r = api_task           => tracing::error!("API server exited: {:?}", r),
    }

    Ok(())
}
