//! Background waterfall refill around seeks.
//!
//! One thread runs a small state machine over a single shared request slot.
//! Requests posted faster than the thread observes them coalesce: only the
//! latest is seen, and an unchanged slot means "keep doing what you were doing".

use crate::reconstructor::FileSpectrumReconstructor;
use crate::waterfall::WaterfallView;
use anyhow::Context as _;
use serde::Serialize;
use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::broadcast;

/// Lines between progress repaints while refilling.
pub const REPAINT_EVERY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedrawRequest {
    #[default]
    None,
    SetPos,
    Restart,
    Running,
    Stop,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedrawEvent {
    Repaint { drawn: usize, total: usize },
    Finished { position_ms: i64 },
}

struct Slot {
    request: RedrawRequest,
    seq: u64,
    observed: u64,
    position_ms: i64,
    seek_ms: i64,
    idle: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("redraw request mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn post(&self, request: RedrawRequest, update: impl FnOnce(&mut Slot)) {
        let mut slot = self.lock();
        update(&mut slot);
        slot.request = request;
        slot.seq += 1;
        self.wake.notify_all();
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Job {
    rows: Range<usize>,
    next: usize,
    /// First row past available history; rows from here are blanked.
    limit: usize,
    target_ms: i64,
}

/// Request tracking and the transition function, independent of the thread.
#[derive(Debug)]
pub struct Machine {
    observed_seq: u64,
    pending: RedrawRequest,
    drawn_ms: i64,
    job: Option<Job>,
}

impl Machine {
    pub fn new(position_ms: i64) -> Self {
        Self {
            observed_seq: 0,
            pending: RedrawRequest::None,
            drawn_ms: position_ms,
            job: None,
        }
    }

    /// Request to act on: the shared one if it changed since last observed,
    /// otherwise the internally tracked follow-up.
    pub fn observe(&mut self, shared: RedrawRequest, seq: u64) -> RedrawRequest {
        if seq != self.observed_seq {
            self.observed_seq = seq;
            self.pending = shared;
        }
        self.pending
    }

    pub fn pending(&self) -> RedrawRequest {
        self.pending
    }

    pub fn drawn_ms(&self) -> i64 {
        self.drawn_ms
    }

    fn set_pending(&mut self, next: RedrawRequest) {
        self.pending = next;
    }

    /// Runs one transition and returns the next request.
    fn step(
        &mut self,
        request: RedrawRequest,
        ctx: &StepCtx<'_>,
        position_ms: i64,
        seek_ms: i64,
    ) -> RedrawRequest {
        match request {
            RedrawRequest::None => RedrawRequest::None,
            RedrawRequest::SetPos => {
                self.drawn_ms = position_ms;
                RedrawRequest::None
            }
            RedrawRequest::Restart => self.restart(ctx, seek_ms),
            RedrawRequest::Running => self.run_one(ctx),
            RedrawRequest::Stop => {
                ctx.lock_reconstructor().wait();
                self.job = None;
                ctx.repaint(0, 0);
                RedrawRequest::None
            }
            RedrawRequest::Exit => RedrawRequest::Exit,
        }
    }

    fn restart(&mut self, ctx: &StepCtx<'_>, seek_ms: i64) -> RedrawRequest {
        let mut recon = ctx.lock_reconstructor();
        recon.wait();
        self.job = None;

        let mpl = ctx.view.ms_per_line();
        if mpl <= 0.0 {
            return RedrawRequest::None;
        }
        let height = ctx.view.height();
        let lines = ((seek_ms - self.drawn_ms) as f64 / mpl).round() as i64;
        ctx.view.scroll(lines);
        self.drawn_ms = seek_ms;

        let n = (lines.unsigned_abs() as usize).min(height);
        let rows = if lines >= 0 { 0..n } else { height - n..height };

        let start_ms = recon.history_start_ms();
        let limit = rows
            .clone()
            .find(|row| row_timestamp(seek_ms, *row, mpl) < start_ms)
            .unwrap_or(rows.end);
        recon.set_reference(seek_ms);
        tracing::debug!(lines, rows = ?rows, limit, seek_ms, "waterfall refill started");

        self.job = Some(Job {
            next: rows.start,
            rows,
            limit,
            target_ms: seek_ms,
        });
        RedrawRequest::Running
    }

    fn run_one(&mut self, ctx: &StepCtx<'_>) -> RedrawRequest {
        let Some(job) = self.job.as_mut() else {
            return RedrawRequest::None;
        };
        let mpl = ctx.view.ms_per_line();

        if job.next < job.limit {
            let row = job.next;
            let accepted = ctx
                .lock_reconstructor()
                .request_line(row_timestamp(job.target_ms, row, mpl), row);
            if accepted {
                job.next += 1;
                let drawn = job.next - job.rows.start;
                if drawn % REPAINT_EVERY == 0 {
                    ctx.repaint(drawn, job.rows.len());
                }
                return RedrawRequest::Running;
            }
            // No recording: nothing more can be sourced.
            job.limit = job.next;
        }

        for row in job.limit..job.rows.end {
            ctx.view.blank_line(row);
        }
        ctx.lock_reconstructor().wait();
        let total = job.rows.len();
        let target = job.target_ms;
        self.job = None;
        ctx.repaint(total, total);
        ctx.finished(target);
        tracing::debug!(lines = total, "waterfall refill finished");
        RedrawRequest::None
    }
}

fn row_timestamp(top_ms: i64, row: usize, mpl: f64) -> i64 {
    top_ms - (row as f64 * mpl).round() as i64
}

struct StepCtx<'a> {
    reconstructor: &'a Mutex<FileSpectrumReconstructor>,
    view: &'a dyn WaterfallView,
    events: &'a broadcast::Sender<RedrawEvent>,
}

impl StepCtx<'_> {
    fn lock_reconstructor(&self) -> MutexGuard<'_, FileSpectrumReconstructor> {
        match self.reconstructor.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("reconstructor mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn repaint(&self, drawn: usize, total: usize) {
        // No subscribers is fine.
        let _ = self.events.send(RedrawEvent::Repaint { drawn, total });
    }

    fn finished(&self, position_ms: i64) {
        let _ = self.events.send(RedrawEvent::Finished { position_ms });
    }
}

pub struct RedrawCoordinator {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RedrawCoordinator {
    pub fn spawn(
        reconstructor: Arc<Mutex<FileSpectrumReconstructor>>,
        view: Arc<dyn WaterfallView>,
        events: broadcast::Sender<RedrawEvent>,
        position_ms: i64,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                request: RedrawRequest::None,
                seq: 0,
                observed: 0,
                position_ms,
                seek_ms: position_ms,
                idle: false,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("waterfall-redraw".to_string())
            .spawn(move || {
                let ctx = StepCtx {
                    reconstructor: &reconstructor,
                    view: view.as_ref(),
                    events: &events,
                };
                run(&thread_shared, &ctx, position_ms);
            })
            .context("spawn redraw thread")?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Records where the live image currently is, without redrawing.
    pub fn set_position(&self, position_ms: i64) {
        self.shared
            .post(RedrawRequest::SetPos, |s| s.position_ms = position_ms);
    }

    /// Redraws from the current image position to `position_ms`.
    pub fn restart(&self) {
        self.shared.post(RedrawRequest::Restart, |_| {});
    }

    pub fn seek(&self, position_ms: i64) {
        self.shared
            .post(RedrawRequest::Restart, |s| s.seek_ms = position_ms);
    }

    pub fn stop(&self) {
        self.shared.post(RedrawRequest::Stop, |_| {});
    }

    /// Blocks until every posted request has been handled.
    pub fn wait_idle(&self) {
        let mut slot = self.shared.lock();
        while !(slot.idle && slot.observed == slot.seq) {
            slot = match self.shared.idle.wait(slot) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Drop for RedrawCoordinator {
    fn drop(&mut self) {
        self.shared.post(RedrawRequest::Exit, |_| {});
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("redraw thread panicked");
            }
        }
    }
}

fn run(shared: &Shared, ctx: &StepCtx<'_>, position_ms: i64) {
    let mut machine = Machine::new(position_ms);
    loop {
        let (request, position_ms, seek_ms) = {
            let mut slot = shared.lock();
            loop {
                let request = machine.observe(slot.request, slot.seq);
                slot.observed = slot.seq;
                if request != RedrawRequest::None {
                    slot.idle = false;
                    break (request, slot.position_ms, slot.seek_ms);
                }
                slot.idle = true;
                shared.idle.notify_all();
                slot = match shared.wake.wait(slot) {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        if request == RedrawRequest::Exit {
            tracing::debug!("redraw thread exiting");
            break;
        }
        let next = machine.step(request, ctx, position_ms, seek_ms);
        machine.set_pending(next);
    }
    let mut slot = shared.lock();
    slot.idle = true;
    shared.idle.notify_all();
}
