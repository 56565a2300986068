use anyhow::Context;
use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};
use vforx_core::config::{Input, InputDriver};
use vforx_core::receiver::{NullSource, ReaderSource, SignalSource};

/// Opens the configured input.
pub fn open(input: &Input) -> anyhow::Result<Box<dyn SignalSource>> {
    let rate = input.sps as f64;
    let center = input.frequency as f64;
    match &input.driver {
        InputDriver::Stdin { format } => Ok(Box::new(ReaderSource::new(
            "stdin",
            std::io::stdin(),
            *format,
            rate,
            center,
        ))),
        InputDriver::File(f) => {
            let file =
                File::open(&f.path).with_context(|| format!("open input {}", f.path.display()))?;
            Ok(Box::new(ReaderSource::new(
                "file",
                BufReader::new(file),
                f.format,
                rate,
                center,
            )))
        }
        InputDriver::Null => Ok(Box::new(NullSource::new(rate, center))),
    }
}

/// Whether reads from this driver must be throttled to the sample rate.
pub fn needs_pacing(input: &Input) -> bool {
    match &input.driver {
        InputDriver::File(f) => f.realtime,
        InputDriver::Null => true,
        InputDriver::Stdin { .. } => false,
    }
}

/// Sleeps so that consumed samples never run ahead of wall-clock time.
#[derive(Debug)]
pub struct Pacer {
    rate: f64,
    started: Instant,
    consumed: u64,
}

impl Pacer {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            started: Instant::now(),
            consumed: 0,
        }
    }

    /// Time to sleep after `samples` more have been consumed.
    pub fn advance(&mut self, samples: usize, now: Instant) -> Option<Duration> {
        self.consumed += samples as u64;
        if self.rate <= 0.0 {
            return None;
        }
        let due = self.started + Duration::from_secs_f64(self.consumed as f64 / self.rate);
        due.checked_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_only_sleeps_when_ahead_of_the_clock() {
        let mut p = Pacer::new(1000.0);
        let t0 = p.started;
        let wait = p.advance(500, t0).expect("ahead of clock");
        assert_eq!(wait, Duration::from_millis(500));
        assert_eq!(p.advance(500, t0 + Duration::from_secs(2)), None);
    }
}
