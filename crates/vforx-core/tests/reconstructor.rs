use num_complex::Complex32;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use vforx_core::codec::SampleFormat;
use vforx_core::dsp::window::WindowKind;
use vforx_core::reconstructor::{
    FftParams, FileSpectrumReconstructor, LineSink, ReconstructedLine, ReconstructorConfig,
};

const RATE: f64 = 1000.0;
const FFT: usize = 64;

type Captured = Arc<Mutex<BTreeMap<usize, Vec<Complex32>>>>;

/// `cs16` recording where sample `i` carries I = i + 1, Q = 0.
fn recording(samples: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..samples {
        let v = (i + 1) as i16;
        file.write_all(&v.to_le_bytes()).unwrap();
        file.write_all(&0i16.to_le_bytes()).unwrap();
    }
    file.flush().unwrap();
    file
}

fn config(path: Option<std::path::PathBuf>, base_ms: i64) -> ReconstructorConfig {
    ReconstructorConfig {
        path,
        format: SampleFormat::Cs16,
        sample_rate: RATE,
        threads: 2,
        fft: FftParams {
            size: FFT,
            oversample: 1,
            window: WindowKind::Hann,
        },
        base_ms,
    }
}

fn capture() -> (LineSink, Captured) {
    let seen: Captured = Arc::new(Mutex::new(BTreeMap::new()));
    let sink_seen = Arc::clone(&seen);
    let sink: LineSink = Arc::new(move |line: &ReconstructedLine<'_>| {
        assert_eq!(line.sample_count, FFT);
        assert_eq!(line.spectrum.len(), FFT);
        sink_seen
            .lock()
            .unwrap()
            .insert(line.line, line.samples.to_vec());
    });
    (sink, seen)
}

fn sample_value(i: usize) -> f32 {
    (i + 1) as f32 / 32768.0
}

#[test]
fn chunk_layout_for_cs16() {
    let info = SampleFormat::Cs16.info();
    assert_eq!(info.bytes_per_chunk, 4);
    assert_eq!(info.samples_per_chunk, 1);
}

#[test]
fn line_reads_from_the_sample_matching_its_timestamp() {
    let file = recording(2000);
    let (sink, seen) = capture();
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 0), sink).unwrap();
    recon.set_reference(2000);
    assert!(recon.request_line(500, 0));
    recon.wait();

    let seen = seen.lock().unwrap();
    let samples = &seen[&0];
    for (k, s) in samples.iter().enumerate() {
        assert!((s.re - sample_value(500 + k)).abs() < 1e-7, "sample {k}");
        assert_eq!(s.im, 0.0);
    }
}

#[test]
fn lines_before_history_start_get_a_zero_prefix() {
    let file = recording(2000);
    let (sink, seen) = capture();
    // First sample at 700 ms; the reference at 1000 ms sits 300 samples into the recording.
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 700), sink)
            .unwrap();
    recon.set_reference(1000);
    assert_eq!(recon.history_start_ms(), 700);
    // 10 ms before the first sample, shorter than one line.
    assert!(recon.request_line(690, 3));
    recon.wait();

    let seen = seen.lock().unwrap();
    let samples = &seen[&3];
    assert!(samples[..10]
        .iter()
        .all(|s| *s == Complex32::new(0.0, 0.0)));
    for k in 10..FFT {
        assert!((samples[k].re - sample_value(k - 10)).abs() < 1e-7, "sample {k}");
    }
}

#[test]
fn zero_prefix_is_followed_by_the_first_recorded_samples() {
    let file = recording(2000);
    let (sink, seen) = capture();
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 0), sink).unwrap();
    recon.set_reference(100);
    // Starts 20 samples before the recording.
    assert!(recon.request_line(80 - 100, 1));
    recon.wait();

    let seen = seen.lock().unwrap();
    let samples = &seen[&1];
    assert!(samples[..20].iter().all(|s| s.re == 0.0));
    for k in 20..FFT {
        assert!((samples[k].re - sample_value(k - 20)).abs() < 1e-7);
    }
}

#[test]
fn reads_past_the_end_are_zero_filled() {
    let file = recording(2000);
    let (sink, seen) = capture();
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 0), sink).unwrap();
    recon.set_reference(2000);
    assert_eq!(recon.history_end_ms().unwrap(), 2000);
    assert!(recon.request_line(1970, 0));
    recon.wait();

    let seen = seen.lock().unwrap();
    let samples = &seen[&0];
    for k in 0..30 {
        assert!((samples[k].re - sample_value(1970 + k)).abs() < 1e-7);
    }
    assert!(samples[30..].iter().all(|s| s.re == 0.0));
}

#[test]
fn many_requests_complete_before_wait_returns() {
    let file = recording(4000);
    let (sink, seen) = capture();
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 0), sink).unwrap();
    recon.set_reference(4000);
    for line in 0..32 {
        assert!(recon.request_line(4000 - 100 * line as i64, line));
    }
    recon.wait();
    assert_eq!(seen.lock().unwrap().len(), 32);
    // Idle pool: further waits return at once.
    recon.wait();
    recon.wait();
}

#[test]
fn requests_are_refused_without_a_recording() {
    let (sink, seen) = capture();
    let mut recon = FileSpectrumReconstructor::new(config(None, 0), sink).unwrap();
    assert!(!recon.has_file());
    assert!(!recon.request_line(0, 0));
    recon.wait();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn reconfigure_keeps_the_reference_and_resizes_the_pool() {
    let file = recording(2000);
    let (sink, seen) = capture();
    let mut recon =
        FileSpectrumReconstructor::new(config(Some(file.path().to_path_buf()), 0), sink).unwrap();
    recon.set_reference(1500);

    let mut cfg = config(Some(file.path().to_path_buf()), 0);
    cfg.threads = 3;
    recon.reconfigure(cfg).unwrap();
    assert_eq!(recon.threads(), 3);
    assert_eq!(recon.reference_ms(), 1500);

    assert!(recon.request_line(1000, 0));
    recon.wait();
    let seen = seen.lock().unwrap();
    assert!((seen[&0][0].re - sample_value(1000)).abs() < 1e-7);
}
