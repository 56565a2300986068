mod api;
mod app;
mod banner;
mod input;
mod logging;
mod shutdown;
mod state;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::broadcast;
use vforx_core::bus::StereoBuffer;
use vforx_core::config::{self, Runtime};
use vforx_core::reconstructor::FileSpectrumReconstructor;
use vforx_core::redraw::RedrawCoordinator;
use vforx_core::receiver::Receiver;
use vforx_core::waterfall::{self, WaterfallImage, WaterfallView};

#[derive(Debug, Parser)]
#[command(name = "vforx", version, about = "Multi-channel receiver with waterfall history")]
struct Args {
    /// JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Debug logging for the vforx crates (ignored when RUST_LOG is set).
    #[arg(long)]
    debug: bool,

    /// Directory for daily-rolling log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    no_file_log: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guards = logging::init(&logging::LoggingConfig {
        debug: args.debug,
        log_dir: if args.no_file_log {
            None
        } else {
            Some(args.log_dir.clone().unwrap_or_else(logging::default_log_dir))
        },
        ..Default::default()
    })?;

    let cfg = config::load_from_file(&args.config)?;
    let rt = cfg.runtime()?;

    let source = Receiver::open_source(|| input::open(&cfg.input), rt.input_rate, rt.center_hz);
    banner::log_startup_banner(&cfg, &rt, source.name());
    let receiver = Receiver::new(source, rt.receiver.clone()).context("build receiver")?;
    let receiver = Arc::new(Mutex::new(receiver));

    let (events, _) = broadcast::channel(64);
    let history = open_history(&rt, events.clone())?;

    let flag = shutdown::ShutdownFlag::default();
    let stream = spawn_stream(
        Arc::clone(&receiver),
        input::needs_pacing(&cfg.input).then_some(rt.input_rate),
        flag.clone(),
    )?;

    let state = Arc::new(state::AppState::new(cfg, rt, receiver, history, events));
    let served = app::serve(state, flag.clone()).await;

    flag.set();
    if stream.join().is_err() {
        tracing::error!("stream thread panicked");
    }
    served
}

fn open_history(
    rt: &Runtime,
    events: broadcast::Sender<vforx_core::redraw::RedrawEvent>,
) -> anyhow::Result<Option<state::History>> {
    let Some(hcfg) = rt.history.clone() else {
        tracing::info!("no recording configured; waterfall history disabled");
        return Ok(None);
    };
    let image = Arc::new(WaterfallImage::new(
        hcfg.fft.size,
        rt.waterfall_lines,
        rt.ms_per_line,
    ));
    let view: Arc<dyn WaterfallView> = image.clone();
    let recon = FileSpectrumReconstructor::new(hcfg, waterfall::line_sink(Arc::clone(&view)))
        .context("start reconstructor")?;
    let end_ms = recon.history_end_ms()?;
    tracing::info!(
        threads = recon.threads(),
        start_ms = recon.history_start_ms(),
        end_ms,
        "waterfall history ready"
    );
    let reconstructor = Arc::new(Mutex::new(recon));

    // Start one image height behind the end so the first seek fills every row.
    let span_ms = (rt.waterfall_lines as f64 * rt.ms_per_line).round() as i64;
    let coordinator =
        RedrawCoordinator::spawn(Arc::clone(&reconstructor), view, events, end_ms - span_ms)?;
    coordinator.seek(end_ms);

    Ok(Some(state::History::new(image, coordinator, &reconstructor)))
}

fn spawn_stream(
    receiver: Arc<Mutex<Receiver>>,
    pace_rate: Option<f64>,
    flag: shutdown::ShutdownFlag,
) -> anyhow::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("rx-stream".to_string())
        .spawn(move || {
            let mut out = StereoBuffer::default();
            let mut reader = state::lock_receiver(&receiver).block_reader();
            let mut pacer = pace_rate.map(input::Pacer::new);
            let mut total: u64 = 0;
            while !flag.is_set() {
                // Blocking reads happen outside the receiver lock.
                let block = match reader.read() {
                    Ok([]) => {
                        tracing::info!(samples = total, "input ended");
                        break;
                    }
                    Ok(block) => block,
                    Err(e) => {
                        tracing::warn!(error = ?e, samples = total, "input read failed; stopping stream");
                        break;
                    }
                };
                let n = block.len();
                state::lock_receiver(&receiver).run_block(block, &mut out);
                total += n as u64;
                // No audio sink: the mixed block is discarded.
                out.clear();
                if let Some(wait) = pacer.as_mut().and_then(|p| p.advance(n, Instant::now())) {
                    std::thread::sleep(wait);
                }
            }
            tracing::debug!("stream thread exiting");
        })
        .context("spawn stream thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["vforx"]);
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert!(!args.debug && !args.no_file_log);
        let args = Args::parse_from(["vforx", "-c", "rx.json", "--debug", "--no-file-log"]);
        assert_eq!(args.config, PathBuf::from("rx.json"));
        assert!(args.debug && args.no_file_log);
    }

    #[test]
    fn sample_config_is_loadable() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config.example.json");
        let cfg: config::Config = config::load_from_file(&path).expect("example config");
        assert!(cfg.runtime().is_ok());
    }
}
