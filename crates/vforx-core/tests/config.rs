use std::io::Write;
use vforx_core::channel::Mode;
use vforx_core::codec::SampleFormat;
use vforx_core::config::{load_from_file, Config, InputDriver};
use vforx_core::dsp::window::WindowKind;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn minimal_config_fills_defaults() {
    let cfg = parse(r#"{ "input": { "sps": 2048000, "driver": { "kind": "null" } } }"#);
    assert_eq!(cfg.server.port, 9100);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.channels.max, 32);
    assert!(matches!(cfg.input.driver, InputDriver::Null));

    let rt = cfg.runtime().unwrap();
    assert_eq!(rt.input_rate, 2_048_000.0);
    assert_eq!(rt.channel_rate, 2_048_000.0);
    assert!(rt.history.is_none());
    assert!(rt.channelizer_threads >= 1);
    assert_eq!(rt.receiver.manager.capacity, 32);
    assert_eq!(rt.receiver.manager.input_format, None);
}

#[test]
fn file_input_doubles_as_history() {
    let cfg = parse(
        r#"{
            "input": {
                "sps": 1000000,
                "decimation": 4,
                "driver": { "kind": "file", "path": "rec.cs16", "format": "cs16", "start_ms": 1700000000000 }
            },
            "audio": { "sps": 48000 },
            "channels": { "defaults": { "mode": "USB", "offset": 1500 } },
            "history": { "threads": 2, "fft_size": 1024, "window": "flat-top" }
        }"#,
    );
    let rt = cfg.runtime().unwrap();
    assert_eq!(rt.channel_rate, 250_000.0);
    assert_eq!(rt.receiver.decimation, 4);
    assert_eq!(rt.receiver.manager.input_format, Some(SampleFormat::Cs16));
    assert_eq!(rt.receiver.manager.first_channel.mode, Mode::Usb);
    assert_eq!(rt.receiver.manager.first_offset_hz, 1500.0);

    let h = rt.history.unwrap();
    assert_eq!(h.path.as_deref(), Some(std::path::Path::new("rec.cs16")));
    assert_eq!(h.format, SampleFormat::Cs16);
    // History reads the undecimated recording.
    assert_eq!(h.sample_rate, 1_000_000.0);
    assert_eq!(h.base_ms, 1_700_000_000_000);
    assert_eq!(h.threads, 2);
    assert_eq!(h.fft.size, 1024);
    assert_eq!(h.fft.window, WindowKind::FlatTop);
}

#[test]
fn default_filter_edges_can_be_overridden() {
    let cfg = parse(
        r#"{
            "input": { "sps": 2048000, "driver": { "kind": "stdin", "format": "cu8" } },
            "channels": { "defaults": { "mode": "NFM", "filter_low": -4000, "filter_high": 4000, "squelch": -60 } }
        }"#,
    );
    let first = cfg.runtime().unwrap().receiver.manager.first_channel;
    assert_eq!(first.mode, Mode::Nfm);
    assert_eq!((first.filter_low, first.filter_high), (-4000, 4000));
    assert_eq!(first.squelch_db, -60.0);
}

#[test]
fn validation_rejects_inconsistent_values() {
    let bad = [
        r#"{ "input": { "sps": 0, "driver": { "kind": "null" } } }"#,
        r#"{ "input": { "sps": 2048000, "driver": { "kind": "null" } }, "channels": { "max": 0 } }"#,
        r#"{ "input": { "sps": 2048000, "driver": { "kind": "null" } }, "channels": { "defaults": { "mode": "DSB" } } }"#,
        r#"{ "input": { "sps": 2048000, "driver": { "kind": "null" } }, "spectrum": { "fft_size": 1000 } }"#,
        r#"{ "input": { "sps": 2048000, "driver": { "kind": "null" } }, "channelizer": { "decimation": 7 } }"#,
        r#"{ "input": { "sps": 40000, "driver": { "kind": "null" } }, "audio": { "sps": 48000 } }"#,
    ];
    for json in bad {
        assert!(parse(json).validate().is_err(), "{json}");
    }
}

#[test]
fn load_from_file_reports_the_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "input": { "sps": -1, "driver": { "kind": "null" } } }"#)
        .unwrap();
    let err = load_from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("input.sps"));

    let missing = load_from_file(std::path::Path::new("/nonexistent/vforx.json")).unwrap_err();
    assert!(missing.to_string().contains("nonexistent"));
}
