// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Lap-Tracker API Server
//!
//! Polls Race Monitor on a tiered schedule and exposes a small JSON admin
//! API for tiers, credentials and the scheduler.

use lap_tracker::{
    config::{Config, StoreBackend},
    db::{FirestoreDb, MemoryDb},
    services::HttpUpstream,
    time_utils::SystemClock,
    AppState, Stores,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        tiers = config.tiers.len(),
        "Starting Lap-Tracker"
    );

    let stores = match config.store_backend {
        StoreBackend::Firestore => Stores::firestore(
            FirestoreDb::new(&config.gcp_project_id)
                .await
                .expect("Failed to connect to Firestore"),
        ),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; nothing will be persisted");
            Stores::memory(Arc::new(MemoryDb::new()))
        }
    };

    let upstream = HttpUpstream::new(&config.race_monitor_base_url, config.request_timeout)
        .expect("Failed to build Race Monitor client");
    tracing::info!(
        base_url = %config.race_monitor_base_url,
        max_calls = config.rate_limit_max_calls,
        window_secs = config.rate_limit_window.as_secs(),
        "Race Monitor client initialized"
    );

    let state = Arc::new(AppState::new(
        config.clone(),
        stores,
        Arc::new(upstream),
        Arc::new(SystemClock),
    ));

    if let Some(interval) = config.scheduler_interval {
        state.scheduler_manager.start(interval).await?;
    }

    // Build router
    let app = lap_tracker::routes::create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.scheduler_manager.stop().await;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lap_tracker=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
