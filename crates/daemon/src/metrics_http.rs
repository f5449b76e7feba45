// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only Prometheus exposition endpoint.

use crate::lifecycle::Daemon;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use taskd_core::Clock;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve `GET /metrics` until shutdown.
pub async fn serve(daemon: Arc<Daemon>) {
    let port = daemon.config.metrics_port;
    let mut shutdown = daemon.shutdown_signal();

    let router = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(Arc::clone(&daemon));

    let addr = format!("127.0.0.1:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, addr, "metrics endpoint disabled: bind failed");
            return;
        }
    };
    info!(addr, "metrics endpoint listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "metrics server exited with error");
    }
}

async fn render_metrics(State(daemon): State<Arc<Daemon>>) -> String {
    daemon
        .metrics
        .render(&daemon.store, daemon.clock.epoch_ms())
}
