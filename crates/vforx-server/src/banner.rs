use crate::logging::BANNER_TARGET;
use vforx_core::config::{Config, Runtime};

pub fn log_startup_banner(cfg: &Config, rt: &Runtime, source: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let started = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let listen = format!("{}:{}", cfg.server.host, cfg.server.port);
    let history = match &rt.history {
        Some(h) => h
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
        None => "none".to_string(),
    };

    tracing::info!(
        target: BANNER_TARGET,
        version,
        os,
        arch,
        started = %started,
        listen = %listen,
        input = source,
        input_rate = rt.input_rate,
        channel_rate = rt.channel_rate,
        center_hz = rt.center_hz,
        channels = rt.receiver.manager.capacity,
        history = %history,
        "startup"
    );
}
