//! Liveness endpoint.
//!
//! Serves a small HTML status page on `/` and `/health` from its own tokio task.
//! Read-only: it only looks at [`BotStatus`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::Html, routing::get, Router};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Connection state shared between the Discord handler and the health server.
pub struct BotStatus {
    connected: AtomicBool,
    guild_count: AtomicUsize,
    started_at: DateTime<Utc>,
}

impl BotStatus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            guild_count: AtomicUsize::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn set_connected(&self, guild_count: usize) {
        self.guild_count.store(guild_count, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn set_guild_count(&self, guild_count: usize) {
        self.guild_count.store(guild_count, Ordering::Relaxed);
    }

    pub fn set_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn guild_count(&self) -> usize {
        self.guild_count.load(Ordering::Relaxed)
    }
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn render_status(status: &BotStatus, now: DateTime<Utc>) -> String {
    let state = if status.is_connected() {
        "Connected"
    } else {
        "Connecting..."
    };
    let uptime = (now - status.started_at).num_seconds().max(0);

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>relaybot status</title></head>
<body>
<h1>relaybot</h1>
<p>Status: <strong>{state}</strong></p>
<p>Guilds: {guilds}</p>
<p>Uptime: {uptime}s</p>
</body>
</html>
"#,
        guilds = status.guild_count(),
    )
}

async fn status_page(State(status): State<Arc<BotStatus>>) -> Html<String> {
    Html(render_status(&status, Utc::now()))
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

pub fn router(status: Arc<BotStatus>) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/health", get(status_page))
        .fallback(not_found)
        .with_state(status)
}

/// Serve on an already-bound listener until the process exits.
pub async fn serve(listener: TcpListener, status: Arc<BotStatus>) -> Result<()> {
    axum::serve(listener, router(status))
        .await
        .context("Health server stopped")
}

/// Bind `0.0.0.0:port` and serve on a background task.
pub async fn spawn(port: u16, status: Arc<BotStatus>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;

    info!("Health server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = serve(listener, status).await {
            error!("{:#}", e);
        }
    });

    Ok(())
}
