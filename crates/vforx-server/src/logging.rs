use anyhow::Context;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{field::Visit, Subscriber};
use tracing_subscriber::{filter::FilterFn, Layer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target whose events are rendered as a plain banner instead of a log line.
pub const BANNER_TARGET: &str = "vforx_banner";

pub struct LoggingGuards {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
    pub log_file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_dir: None,
            log_file_prefix: "vforx".to_string(),
        }
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(v) => EnvFilter::new(v),
        Err(_) if debug => EnvFilter::new("info,vforx_server=debug,vforx_core=debug"),
        Err(_) => EnvFilter::new("info"),
    }
}

fn not_banner(meta: &tracing::Metadata<'_>) -> bool {
    meta.target() != BANNER_TARGET
}

pub fn init(cfg: &LoggingConfig) -> anyhow::Result<LoggingGuards> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_filter(FilterFn::new(not_banner));

    let (file_layer, file_guard) = match &cfg.log_dir {
        None => (None, None),
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &cfg.log_file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(FilterFn::new(not_banner));
            (Some(layer), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(env_filter(cfg.debug))
        .with(BannerLayer)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(panic = %panic_info, "panic");
    }));

    Ok(LoggingGuards {
        _file_guard: file_guard,
    })
}

pub fn default_log_dir() -> PathBuf {
    Path::new("logs").to_path_buf()
}

struct BannerLayer;

impl<S> Layer<S> for BannerLayer
where
    S: Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if event.metadata().target() != BANNER_TARGET {
            return;
        }
        let mut v = BannerVisitor::default();
        event.record(&mut v);
        write_stderr(v.render().as_bytes());
    }
}

fn write_stderr(bytes: &[u8]) {
    let mut stderr = std::io::stderr().lock();
    let _ = std::io::Write::write_all(&mut stderr, bytes);
    let _ = std::io::Write::flush(&mut stderr);
}

/// Collects `version`, `os`, `arch` for the headline; every other field
/// becomes an indented `key: value` line underneath, in recording order.
#[derive(Default)]
struct BannerVisitor {
    version: Option<String>,
    os: Option<String>,
    arch: Option<String>,
    details: Vec<(&'static str, String)>,
}

impl BannerVisitor {
    fn put(&mut self, name: &'static str, value: String) {
        match name {
            "version" => self.version = Some(value),
            "os" => self.os = Some(value),
            "arch" => self.arch = Some(value),
            "message" => {}
            _ => self.details.push((name, value)),
        }
    }

    fn render(&self) -> String {
        let version = self.version.as_deref().unwrap_or("unknown");
        let os = self.os.as_deref().unwrap_or(std::env::consts::OS);
        let arch = self.arch.as_deref().unwrap_or(std::env::consts::ARCH);
        let mut out = format!("vforx v{version} ({os}/{arch})\n");
        let width = self.details.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in &self.details {
            out.push_str(&format!("  {key:<width$}  {value}\n"));
        }
        out
    }
}

impl Visit for BannerVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.put(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.put(field.name(), format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_renders_headline_and_aligned_details() {
        let mut v = BannerVisitor::default();
        v.put("version", "0.1.0".to_string());
        v.put("os", "linux".to_string());
        v.put("arch", "x86_64".to_string());
        v.put("input", "file".to_string());
        v.put("channels", "32".to_string());
        v.put("message", "startup".to_string());
        assert_eq!(
            v.render(),
            "vforx v0.1.0 (linux/x86_64)\n  input     file\n  channels  32\n"
        );
    }
}
