use crate::{api, shutdown, state};
use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::compression::CompressionLayer;

pub fn router(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route(
            "/channels",
            get(api::list_channels).post(api::add_channel),
        )
        .route("/channels/find", get(api::find_channel))
        .route("/channels/:index", delete(api::delete_channel))
        .route("/channels/:index/select", post(api::select_channel))
        .route(
            "/channels/:target/params/:param",
            get(api::get_param).put(api::set_param),
        )
        .route("/spectrum", get(api::spectrum))
        .route("/channelizer", axum::routing::put(api::update_channelizer))
        .route("/waterfall", get(api::waterfall))
        .route("/waterfall/seek", post(api::waterfall_seek))
        .route("/waterfall/stop", post(api::waterfall_stop))
        .route("/events", get(api::events))
        .layer(CompressionLayer::new())
        .with_state(state)
}

pub fn bind_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("parse bind address {host}:{port}"))
}

pub async fn serve(state: Arc<state::AppState>, flag: shutdown::ShutdownFlag) -> anyhow::Result<()> {
    let addr = bind_addr(&state.cfg.server.host, state.cfg.server.port)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(bind = %addr, "control server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown::shutdown_signal(flag))
        .await
        .context("serve")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(
            bind_addr("::1", 9100).expect("valid"),
            "[::1]:9100".parse::<SocketAddr>().expect("valid")
        );
        assert_eq!(
            bind_addr("127.0.0.1", 80).expect("valid").port(),
            80
        );
        assert!(bind_addr("not a host", 1).is_err());
    }
}
