//! Historical spectrum lines computed from a recording on a fixed worker pool.
//!
//! The caller seeks and reads on its own thread (one file handle, so reads are
//! serialized) and hands the raw buffer to an idle worker, which decodes it,
//! transforms it and reports the line through a [`LineSink`].

use crate::codec::{FormatInfo, SampleFormat};
use crate::dsp::spectrum::SpectrumFft;
use crate::dsp::window::WindowKind;
use anyhow::Context;
use num_complex::Complex32;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FftParams {
    pub size: usize,
    /// Frames averaged per line.
    pub oversample: usize,
    pub window: WindowKind,
}

impl FftParams {
    pub fn read_samples(&self) -> usize {
        self.size.max(1) * self.oversample.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructorConfig {
    pub path: Option<PathBuf>,
    pub format: SampleFormat,
    pub sample_rate: f64,
    /// Worker count; 0 picks half the hardware threads.
    pub threads: usize,
    pub fft: FftParams,
    /// Timestamp of the first sample in the file.
    pub base_ms: i64,
}

/// One finished line, borrowed from the worker for the duration of the callback.
pub struct ReconstructedLine<'a> {
    pub line: usize,
    pub timestamp_ms: i64,
    /// Shifted log-power, `fft.size` bins.
    pub spectrum: &'a [f32],
    /// Last transformed frame in natural bin order.
    pub transformed: &'a [Complex32],
    /// Linear power scratch in natural bin order.
    pub power: &'a [f32],
    pub samples: &'a [Complex32],
    pub sample_count: usize,
}

pub type LineSink = Arc<dyn Fn(&ReconstructedLine<'_>) + Send + Sync>;

pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

#[derive(Debug, Clone, Copy)]
struct Task {
    line: usize,
    timestamp_ms: i64,
    zero_prefix: usize,
    valid_bytes: usize,
}

struct Slot {
    task: Option<Task>,
    bytes: Vec<u8>,
}

struct PoolState {
    slots: Vec<Slot>,
    ready: Vec<usize>,
    format: FormatInfo,
    fft: FftParams,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    task_ready: Vec<Condvar>,
    drained: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("reconstructor pool mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn wait_drained<'a>(&self, guard: MutexGuard<'a, PoolState>) -> MutexGuard<'a, PoolState> {
        match self.drained.wait(guard) {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct Pool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Pool {
    fn spawn(threads: usize, format: FormatInfo, fft: FftParams, sink: LineSink) -> anyhow::Result<Self> {
        let bytes = format.bytes_for_samples(fft.read_samples());
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                slots: (0..threads)
                    .map(|_| Slot {
                        task: None,
                        bytes: vec![0u8; bytes],
                    })
                    .collect(),
                ready: (0..threads).rev().collect(),
                format,
                fft,
                shutdown: false,
            }),
            task_ready: (0..threads).map(|_| Condvar::new()).collect(),
            drained: Condvar::new(),
        });

        // Built incrementally so a failed spawn still shuts down the started workers.
        let mut pool = Self {
            shared,
            handles: Vec::with_capacity(threads),
        };
        for id in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let sink = Arc::clone(&sink);
            let handle = std::thread::Builder::new()
                .name(format!("recon-{id}"))
                .spawn(move || worker_loop(id, &shared, &sink))
                .context("spawn reconstructor worker")?;
            pool.handles.push(handle);
        }
        tracing::debug!(threads, read_bytes = bytes, "reconstructor pool started");
        Ok(pool)
    }

    fn size(&self) -> usize {
        self.handles.len()
    }

    fn wait_idle(&self) {
        let mut st = self.shared.lock();
        while st.ready.len() < st.slots.len() {
            st = self.shared.wait_drained(st);
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock();
            st.shutdown = true;
        }
        for cv in &self.shared.task_ready {
            cv.notify_all();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("reconstructor worker panicked");
            }
        }
    }
}

fn worker_loop(id: usize, shared: &Shared, sink: &LineSink) {
    let mut engine: Option<SpectrumFft> = None;
    let mut samples: Vec<Complex32> = Vec::new();
    let mut spectrum: Vec<f32> = Vec::new();

    loop {
        let (task, bytes, format, fft) = {
            let mut st = shared.lock();
            loop {
                if let Some(task) = st.slots[id].task.take() {
                    let bytes = std::mem::take(&mut st.slots[id].bytes);
                    break (task, bytes, st.format, st.fft);
                }
                if st.shutdown {
                    return;
                }
                st = match shared.task_ready[id].wait(st) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        let n = fft.read_samples();
        samples.clear();
        samples.resize(n, Complex32::new(0.0, 0.0));
        let prefix = task.zero_prefix.min(n);
        let valid = task.valid_bytes.min(bytes.len());
        format.decode(&bytes[..valid], &mut samples[prefix..]);

        let fresh = match engine.as_ref() {
            Some(e) => e.size() != fft.size || e.window_kind() != fft.window,
            None => true,
        };
        if fresh {
            engine = Some(SpectrumFft::new(fft.size, fft.window));
        }
        spectrum.clear();
        spectrum.resize(fft.size, 0.0);
        if let Some(e) = engine.as_mut() {
            e.process(&samples, &mut spectrum);
            sink(&ReconstructedLine {
                line: task.line,
                timestamp_ms: task.timestamp_ms,
                spectrum: &spectrum,
                transformed: e.transformed(),
                power: e.power(),
                samples: &samples,
                sample_count: n,
            });
        }

        let mut st = shared.lock();
        st.slots[id].bytes = bytes;
        st.ready.push(id);
        shared.drained.notify_all();
    }
}

pub struct FileSpectrumReconstructor {
    cfg: ReconstructorConfig,
    info: FormatInfo,
    file: Option<File>,
    pool: Pool,
    sink: LineSink,
    reference_ms: i64,
    reference_sample: i64,
}

impl FileSpectrumReconstructor {
    pub fn new(cfg: ReconstructorConfig, sink: LineSink) -> anyhow::Result<Self> {
        let info = cfg.format.info();
        let threads = resolve_threads(cfg.threads);
        let file = open_file(cfg.path.as_ref())?;
        let pool = Pool::spawn(threads, info, cfg.fft, Arc::clone(&sink))?;
        Ok(Self {
            reference_ms: cfg.base_ms,
            reference_sample: 0,
            cfg,
            info,
            file,
            pool,
            sink,
        })
    }

    pub fn config(&self) -> &ReconstructorConfig {
        &self.cfg
    }

    pub fn threads(&self) -> usize {
        self.pool.size()
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn history_start_ms(&self) -> i64 {
        self.cfg.base_ms
    }

    /// Timestamp just past the last whole sample in the recording.
    pub fn history_end_ms(&self) -> anyhow::Result<i64> {
        let Some(file) = self.file.as_ref() else {
            return Ok(self.cfg.base_ms);
        };
        let len = file.metadata().context("stat recording")?.len();
        let samples = self.info.samples_for_bytes(len as usize) as f64;
        Ok(self.cfg.base_ms + (samples * 1000.0 / self.cfg.sample_rate).floor() as i64)
    }

    /// Anchors requests: `timestamp_ms` corresponds to its sample offset in the file.
    pub fn set_reference(&mut self, timestamp_ms: i64) {
        self.reference_ms = timestamp_ms;
        self.reference_sample = ms_to_samples(timestamp_ms - self.cfg.base_ms, self.cfg.sample_rate);
    }

    pub fn reference_ms(&self) -> i64 {
        self.reference_ms
    }

    /// Queues one line ending `reference - timestamp_ms` before the reference.
    ///
    /// Blocks only until a worker is free. Returns false when no file is open.
    pub fn request_line(&mut self, timestamp_ms: i64, line: usize) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };

        let shared = Arc::clone(&self.pool.shared);
        let (worker, mut bytes) = {
            let mut st = shared.lock();
            while st.ready.is_empty() {
                st = shared.wait_drained(st);
            }
            let Some(worker) = st.ready.pop() else {
                return false;
            };
            let bytes = std::mem::take(&mut st.slots[worker].bytes);
            (worker, bytes)
        };

        let n = self.cfg.fft.read_samples();
        let elapsed = ms_to_samples(self.reference_ms - timestamp_ms, self.cfg.sample_rate);
        let start = self.reference_sample - elapsed;
        let zero_prefix = if start < 0 {
            (start.unsigned_abs() as usize).min(n)
        } else {
            0
        };
        let want = self.info.bytes_for_samples(n - zero_prefix);
        bytes.resize(self.info.bytes_for_samples(n), 0);

        let offset = self.info.chunk_offset(start.max(0) as u64);
        let valid_bytes = match read_at(file, offset, &mut bytes[..want]) {
            Ok(got) => got - got % self.info.bytes_per_chunk,
            Err(e) => {
                tracing::warn!(error = ?e, line, offset, "history read failed; line zero-filled");
                0
            }
        };

        let mut st = shared.lock();
        st.slots[worker].bytes = bytes;
        st.slots[worker].task = Some(Task {
            line,
            timestamp_ms,
            zero_prefix,
            valid_bytes,
        });
        shared.task_ready[worker].notify_one();
        true
    }

    /// Blocks until every worker is idle.
    pub fn wait(&self) {
        self.pool.wait_idle();
    }

    /// Drains, then applies `cfg`, rebuilding the pool only if sizing changed.
    pub fn reconfigure(&mut self, cfg: ReconstructorConfig) -> anyhow::Result<()> {
        self.wait();
        let info = cfg.format.info();
        let threads = resolve_threads(cfg.threads);
        let old_bytes = self.info.bytes_for_samples(self.cfg.fft.read_samples());
        let new_bytes = info.bytes_for_samples(cfg.fft.read_samples());

        if threads != self.pool.size() || old_bytes != new_bytes {
            let pool = Pool::spawn(threads, info, cfg.fft, Arc::clone(&self.sink))?;
            self.pool = pool;
            tracing::debug!(threads, read_bytes = new_bytes, "reconstructor pool rebuilt");
        } else {
            let mut st = self.pool.shared.lock();
            st.format = info;
            st.fft = cfg.fft;
        }

        if cfg.path != self.cfg.path {
            self.file = open_file(cfg.path.as_ref())?;
        }
        self.info = info;
        self.cfg = cfg;
        self.set_reference(self.reference_ms);
        Ok(())
    }
}

fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        default_threads()
    } else {
        threads
    }
}

fn open_file(path: Option<&PathBuf>) -> anyhow::Result<Option<File>> {
    match path {
        Some(p) => {
            let file = File::open(p).with_context(|| format!("open recording {}", p.display()))?;
            tracing::info!(path = %p.display(), "recording opened for history");
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

fn ms_to_samples(ms: i64, sample_rate: f64) -> i64 {
    (ms as f64 * sample_rate / 1000.0).round() as i64
}

/// Reads as much of `buf` as the file holds from `offset`; returns the byte count.
fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
