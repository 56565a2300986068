use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio::sync::broadcast;
use vforx_core::codec::SampleFormat;
use vforx_core::dsp::window::WindowKind;
use vforx_core::reconstructor::{FftParams, FileSpectrumReconstructor, ReconstructorConfig};
use vforx_core::redraw::{RedrawCoordinator, RedrawEvent};
use vforx_core::waterfall::{line_sink, WaterfallView};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Scroll(i64),
    Blank(usize),
    Put(usize),
}

struct RecordingView {
    height: usize,
    ms_per_line: f64,
    calls: Mutex<Vec<Call>>,
}

impl RecordingView {
    fn new(height: usize, ms_per_line: f64) -> Arc<Self> {
        Arc::new(Self {
            height,
            ms_per_line,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn rows(&self, pick: impl Fn(&Call) -> Option<usize>) -> Vec<usize> {
        let mut rows: Vec<usize> = self.calls().iter().filter_map(pick).collect();
        rows.sort_unstable();
        rows
    }
}

impl WaterfallView for RecordingView {
    fn ms_per_line(&self) -> f64 {
        self.ms_per_line
    }

    fn height(&self) -> usize {
        self.height
    }

    fn scroll(&self, lines: i64) {
        self.calls.lock().unwrap().push(Call::Scroll(lines));
    }

    fn blank_line(&self, row: usize) {
        self.calls.lock().unwrap().push(Call::Blank(row));
    }

    fn put_line(&self, row: usize, _spectrum: &[f32]) {
        self.calls.lock().unwrap().push(Call::Put(row));
    }
}

/// Parks the redraw thread inside its first scroll until released.
struct GatedView {
    inner: Arc<RecordingView>,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl WaterfallView for GatedView {
    fn ms_per_line(&self) -> f64 {
        self.inner.ms_per_line()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn scroll(&self, lines: i64) {
        self.inner.scroll(lines);
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }

    fn blank_line(&self, row: usize) {
        self.inner.blank_line(row);
    }

    fn put_line(&self, row: usize, spectrum: &[f32]) {
        self.inner.put_line(row, spectrum);
    }
}

struct Fixture {
    view: Arc<RecordingView>,
    events: broadcast::Receiver<RedrawEvent>,
    coordinator: RedrawCoordinator,
    _file: Option<tempfile::NamedTempFile>,
}

fn fixture(height: usize, ms_per_line: f64, base_ms: Option<i64>, start_ms: i64) -> Fixture {
    let view = RecordingView::new(height, ms_per_line);
    let dyn_view: Arc<dyn WaterfallView> = view.clone();
    let (events, coordinator, file) = spawn_on(dyn_view, base_ms, start_ms);
    Fixture {
        view,
        events,
        coordinator,
        _file: file,
    }
}

fn spawn_on(
    dyn_view: Arc<dyn WaterfallView>,
    base_ms: Option<i64>,
    start_ms: i64,
) -> (
    broadcast::Receiver<RedrawEvent>,
    RedrawCoordinator,
    Option<tempfile::NamedTempFile>,
) {
    let file = base_ms.map(|_| {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; 4 * 8000]).unwrap();
        f.flush().unwrap();
        f
    });
    let cfg = ReconstructorConfig {
        path: file.as_ref().map(|f| f.path().to_path_buf()),
        format: SampleFormat::Cs16,
        sample_rate: 1000.0,
        threads: 2,
        fft: FftParams {
            size: 32,
            oversample: 1,
            window: WindowKind::Hann,
        },
        base_ms: base_ms.unwrap_or(0),
    };
    let recon = FileSpectrumReconstructor::new(cfg, line_sink(Arc::clone(&dyn_view))).unwrap();
    let (tx, rx) = broadcast::channel(256);
    let coordinator =
        RedrawCoordinator::spawn(Arc::new(Mutex::new(recon)), dyn_view, tx, start_ms).unwrap();
    (rx, coordinator, file)
}

fn drain(rx: &mut broadcast::Receiver<RedrawEvent>) -> Vec<RedrawEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[test]
fn seek_scrolls_and_refills_the_exposed_rows() {
    let mut fx = fixture(8, 100.0, Some(0), 0);
    fx.coordinator.seek(500);
    fx.coordinator.wait_idle();

    assert_eq!(fx.view.calls()[0], Call::Scroll(5));
    let put = fx.view.rows(|c| match c {
        Call::Put(r) => Some(*r),
        _ => None,
    });
    assert_eq!(put, vec![0, 1, 2, 3, 4]);
    let events = drain(&mut fx.events);
    assert_eq!(
        events.last(),
        Some(&RedrawEvent::Finished { position_ms: 500 })
    );
    assert!(events.contains(&RedrawEvent::Repaint { drawn: 5, total: 5 }));
}

#[test]
fn backward_seek_refills_the_bottom_rows() {
    let fx = fixture(8, 100.0, Some(0), 4000);
    fx.coordinator.seek(3700);
    fx.coordinator.wait_idle();

    assert_eq!(fx.view.calls()[0], Call::Scroll(-3));
    let put = fx.view.rows(|c| match c {
        Call::Put(r) => Some(*r),
        _ => None,
    });
    assert_eq!(put, vec![5, 6, 7]);
}

#[test]
fn rows_older_than_the_recording_are_blanked() {
    // Rows cover 1000, 900, ... 300 ms; the recording starts at 500 ms.
    let fx = fixture(8, 100.0, Some(500), 0);
    fx.coordinator.seek(1000);
    fx.coordinator.wait_idle();

    let put = fx.view.rows(|c| match c {
        Call::Put(r) => Some(*r),
        _ => None,
    });
    let blank = fx.view.rows(|c| match c {
        Call::Blank(r) => Some(*r),
        _ => None,
    });
    assert_eq!(put, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(blank, vec![6, 7]);
}

#[test]
fn without_a_recording_every_exposed_row_is_blanked() {
    let mut fx = fixture(4, 100.0, None, 0);
    fx.coordinator.seek(300);
    fx.coordinator.wait_idle();

    let blank = fx.view.rows(|c| match c {
        Call::Blank(r) => Some(*r),
        _ => None,
    });
    assert_eq!(blank, vec![0, 1, 2]);
    assert!(!fx.view.calls().iter().any(|c| matches!(c, Call::Put(_))));
    assert_eq!(
        drain(&mut fx.events).last(),
        Some(&RedrawEvent::Finished { position_ms: 300 })
    );
}

#[test]
fn zero_ms_per_line_never_redraws() {
    let mut fx = fixture(4, 0.0, Some(0), 0);
    fx.coordinator.seek(300);
    fx.coordinator.wait_idle();
    assert!(fx.view.calls().is_empty());
    assert!(drain(&mut fx.events).is_empty());
}

#[test]
fn stop_while_idle_reports_an_empty_repaint() {
    let mut fx = fixture(4, 100.0, Some(0), 0);
    fx.coordinator.stop();
    fx.coordinator.wait_idle();
    assert_eq!(
        drain(&mut fx.events),
        vec![RedrawEvent::Repaint { drawn: 0, total: 0 }]
    );
}

#[test]
fn rapid_seeks_settle_on_the_latest_position() {
    let mut fx = fixture(64, 10.0, Some(0), 0);
    for ms in [200, 400, 900] {
        fx.coordinator.seek(ms);
    }
    fx.coordinator.wait_idle();

    // However many were coalesced, the image moved exactly to the last target.
    let scrolled: i64 = fx
        .view
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::Scroll(n) => Some(*n),
            _ => None,
        })
        .sum();
    assert_eq!(scrolled, 90);
    let finished: Vec<i64> = drain(&mut fx.events)
        .into_iter()
        .filter_map(|e| match e {
            RedrawEvent::Finished { position_ms } => Some(position_ms),
            _ => None,
        })
        .collect();
    assert_eq!(finished.last(), Some(&900));
}

#[test]
fn set_position_moves_the_baseline_without_drawing() {
    let fx = fixture(8, 100.0, Some(0), 0);
    fx.coordinator.set_position(1000);
    fx.coordinator.wait_idle();
    assert!(fx.view.calls().is_empty());
    fx.coordinator.seek(1200);
    fx.coordinator.wait_idle();
    assert_eq!(fx.view.calls()[0], Call::Scroll(2));
}

#[test]
fn restart_between_two_set_positions_is_never_drawn() {
    let view = RecordingView::new(8, 100.0);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gated = Arc::new(GatedView {
        inner: Arc::clone(&view),
        armed: AtomicBool::new(true),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let (mut events, coordinator, _file) = spawn_on(gated, Some(0), 0);

    coordinator.seek(500);
    entered_rx.recv().unwrap();
    // Posted while the thread is busy, so it only ever sees the last one.
    coordinator.set_position(1000);
    coordinator.seek(1200);
    coordinator.set_position(2000);
    release_tx.send(()).unwrap();
    coordinator.wait_idle();

    assert_eq!(view.calls(), vec![Call::Scroll(5)]);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, RedrawEvent::Finished { .. })));

    // The baseline is the last SetPos, not the skipped seek target.
    coordinator.seek(2300);
    coordinator.wait_idle();
    assert_eq!(view.calls()[1], Call::Scroll(3));
    let put = view.rows(|c| match c {
        Call::Put(r) => Some(*r),
        _ => None,
    });
    assert_eq!(put, vec![0, 1, 2]);
}
