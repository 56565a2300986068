//! Waterfall image backing store and the view seam the redraw thread paints into.

use crate::reconstructor::{LineSink, ReconstructedLine};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Value written into blanked rows.
pub const BLANK_DB: f32 = -200.0;

/// Image the redraw coordinator scrolls and fills. Row 0 is the newest line.
pub trait WaterfallView: Send + Sync {
    /// Time covered by one row; zero or negative disables redraws.
    fn ms_per_line(&self) -> f64;
    fn height(&self) -> usize;
    /// Positive `lines` moves the content down (the image moved forward in time).
    fn scroll(&self, lines: i64);
    fn blank_line(&self, row: usize);
    fn put_line(&self, row: usize, spectrum: &[f32]);
}

pub struct WaterfallImage {
    width: usize,
    ms_per_line: f64,
    rows: RwLock<VecDeque<Vec<f32>>>,
}

impl WaterfallImage {
    pub fn new(width: usize, height: usize, ms_per_line: f64) -> Self {
        Self {
            width,
            ms_per_line,
            rows: RwLock::new((0..height).map(|_| vec![BLANK_DB; width]).collect()),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, row: usize) -> Option<Vec<f32>> {
        self.read().get(row).cloned()
    }

    /// Copy of every row, newest first.
    pub fn rows(&self) -> Vec<Vec<f32>> {
        self.read().iter().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Vec<f32>>> {
        match self.rows.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("waterfall image lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Vec<f32>>> {
        match self.rows.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("waterfall image lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl WaterfallView for WaterfallImage {
    fn ms_per_line(&self) -> f64 {
        self.ms_per_line
    }

    fn height(&self) -> usize {
        self.read().len()
    }

    fn scroll(&self, lines: i64) {
        let mut rows = self.write();
        let height = rows.len();
        let n = (lines.unsigned_abs() as usize).min(height);
        for _ in 0..n {
            if lines > 0 {
                rows.pop_back();
                rows.push_front(vec![BLANK_DB; self.width]);
            } else {
                rows.pop_front();
                rows.push_back(vec![BLANK_DB; self.width]);
            }
        }
    }

    fn blank_line(&self, row: usize) {
        if let Some(r) = self.write().get_mut(row) {
            r.fill(BLANK_DB);
        }
    }

    fn put_line(&self, row: usize, spectrum: &[f32]) {
        let mut rows = self.write();
        let Some(r) = rows.get_mut(row) else { return };
        if spectrum.len() == self.width {
            r.copy_from_slice(spectrum);
            return;
        }
        // Nearest-neighbour resample to the image width.
        let src = spectrum.len().max(1);
        for (i, dst) in r.iter_mut().enumerate() {
            let j = i * src / self.width.max(1);
            *dst = spectrum.get(j).copied().unwrap_or(BLANK_DB);
        }
    }
}

/// Sink that writes every reconstructed line into row `line` of `view`.
pub fn line_sink(view: Arc<dyn WaterfallView>) -> LineSink {
    Arc::new(move |line: &ReconstructedLine<'_>| view.put_line(line.line, line.spectrum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_moves_rows_both_ways_and_blanks_the_gap() {
        let img = WaterfallImage::new(2, 4, 100.0);
        for row in 0..4 {
            img.put_line(row, &[row as f32, row as f32]);
        }
        img.scroll(1);
        assert_eq!(img.row(0), Some(vec![BLANK_DB, BLANK_DB]));
        assert_eq!(img.row(1), Some(vec![0.0, 0.0]));
        assert_eq!(img.row(3), Some(vec![2.0, 2.0]));

        img.scroll(-2);
        assert_eq!(img.row(0), Some(vec![1.0, 1.0]));
        assert_eq!(img.row(2), Some(vec![BLANK_DB, BLANK_DB]));
        assert_eq!(img.height(), 4);
    }

    #[test]
    fn put_line_resamples_to_width() {
        let img = WaterfallImage::new(4, 1, 100.0);
        img.put_line(0, &[1.0, 2.0]);
        assert_eq!(img.row(0), Some(vec![1.0, 1.0, 2.0, 2.0]));
    }
}
