use crate::{shutdown, state, ws};
use anyhow::Context;
use axum::{routing::get, Router};
use skywave_core::config::Server;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

pub fn router(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/server-info.json", get(state::server_info))
        .route("/events", get(ws::events::upgrade))
        .route("/signal", get(ws::signal::upgrade))
        .route("/scanner-audio", get(ws::scanner_audio::upgrade))
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Accepts a bare IPv4/IPv6 address, with or without the URL-style
/// brackets around an IPv6 one.
fn bind_addr(server: &Server) -> anyhow::Result<SocketAddr> {
    let host = server
        .host
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("server.host {:?} is not an IP address", server.host))?;
    Ok(SocketAddr::new(ip, server.port))
}

pub async fn serve(state: Arc<state::AppState>) -> anyhow::Result<()> {
    let addr = bind_addr(&state.cfg.server)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        addr = %addr,
        "listening; channels at /events, /signal, /scanner-audio"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("serve")
}
