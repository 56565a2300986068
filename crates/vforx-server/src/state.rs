use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use vforx_core::config::{Config, Runtime};
use vforx_core::reconstructor::FileSpectrumReconstructor;
use vforx_core::redraw::{RedrawCoordinator, RedrawEvent};
use vforx_core::receiver::Receiver;
use vforx_core::waterfall::WaterfallImage;

/// Recording-backed waterfall: the image and the thread refilling it.
pub struct History {
    pub image: Arc<WaterfallImage>,
    pub coordinator: RedrawCoordinator,
    start_ms: i64,
}

impl History {
    pub fn new(
        image: Arc<WaterfallImage>,
        coordinator: RedrawCoordinator,
        reconstructor: &Mutex<FileSpectrumReconstructor>,
    ) -> Self {
        let start_ms = match reconstructor.lock() {
            Ok(r) => r.history_start_ms(),
            Err(poisoned) => poisoned.into_inner().history_start_ms(),
        };
        Self {
            image,
            coordinator,
            start_ms,
        }
    }

    /// Timestamp of the first recorded sample, read once at startup.
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }
}

pub struct AppState {
    pub cfg: Config,
    pub rt: Runtime,
    receiver: Arc<Mutex<Receiver>>,
    pub history: Option<History>,
    pub events: broadcast::Sender<RedrawEvent>,
}

impl AppState {
    pub fn new(
        cfg: Config,
        rt: Runtime,
        receiver: Arc<Mutex<Receiver>>,
        history: Option<History>,
        events: broadcast::Sender<RedrawEvent>,
    ) -> Self {
        Self {
            cfg,
            rt,
            receiver,
            history,
            events,
        }
    }

    pub fn receiver(&self) -> MutexGuard<'_, Receiver> {
        lock_receiver(&self.receiver)
    }
}

pub fn lock_receiver(receiver: &Mutex<Receiver>) -> MutexGuard<'_, Receiver> {
    match receiver.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::error!("receiver mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vforx_core::codec::SampleFormat;
    use vforx_core::dsp::window::WindowKind;
    use vforx_core::reconstructor::{FftParams, ReconstructorConfig};
    use vforx_core::waterfall::{line_sink, WaterfallView};

    #[test]
    fn history_start_is_readable_while_the_pool_is_busy() {
        let image = Arc::new(WaterfallImage::new(16, 4, 100.0));
        let view: Arc<dyn WaterfallView> = image.clone();
        let cfg = ReconstructorConfig {
            path: None,
            format: SampleFormat::Cs16,
            sample_rate: 1000.0,
            threads: 1,
            fft: FftParams {
                size: 16,
                oversample: 1,
                window: WindowKind::Hann,
            },
            base_ms: 1_234,
        };
        let recon = FileSpectrumReconstructor::new(cfg, line_sink(Arc::clone(&view))).unwrap();
        let reconstructor = Arc::new(Mutex::new(recon));
        let (tx, _rx) = broadcast::channel(8);
        let coordinator =
            RedrawCoordinator::spawn(Arc::clone(&reconstructor), view, tx, 0).unwrap();
        let history = History::new(image, coordinator, &reconstructor);

        let _held = reconstructor.lock().unwrap();
        assert_eq!(history.start_ms(), 1_234);
    }
}
