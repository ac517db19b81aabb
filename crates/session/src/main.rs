//! `framesync-watch` -- headless session observer.
//!
//! Joins the shared session on the configured backend, optionally runs
//! one text search, and prints every session event as a JSON line until
//! interrupted. Configuration comes from the `FRAMESYNC_*` environment
//! variables (see [`ClientConfig::from_env`]).
//!
//! ```text
//! framesync-watch [first scene] [next scene]
//! ```

use framesync_core::types::Query;
use framesync_session::telemetry::init_tracing;
use framesync_session::{ClientConfig, Session};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    let config = ClientConfig::load().unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    });

    init_tracing("framesync_session=info,framesync_channels=info");

    let session = Session::start(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to start session");
        std::process::exit(1);
    });

    match session.health().await {
        Ok(health) => tracing::info!(
            status = %health.status,
            models_loaded = health.models_loaded,
            database_connected = health.database_connected,
            "Backend health",
        ),
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }

    let mut events = session.subscribe();

    let scenes: Vec<Query> = std::env::args().skip(1).take(2).map(Query::text).collect();
    if !scenes.is_empty() {
        let route = session.coordinator().submit(scenes);
        tracing::info!(?route, "Search submitted");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
}
