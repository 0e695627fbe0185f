//! Tick source
//!
//! The tick handler is the interrupt-service analogue: it only touches the
//! atomics below. The interpreter observes the preemption flag between
//! instructions.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

/// No wake-up pending
const NO_WAKEUP: u64 = u64::MAX;

/// Shared tick state.
#[derive(Debug)]
pub struct TickSource {
    ticks: AtomicU64,
    preempt: AtomicBool,
    slice_left: AtomicU32,
    next_wakeup: AtomicU64,
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource {
    #[inline]
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            preempt: AtomicBool::new(false),
            slice_left: AtomicU32::new(0),
            next_wakeup: AtomicU64::new(NO_WAKEUP),
        }
    }

    /// Advance one tick.
    ///
    /// Requests preemption when the running task's timeslice is used up or a
    /// sleeping task becomes due.
    pub fn tick(&self) {
        let now = self
            .ticks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(1)))
            .unwrap_or_else(|t| t)
            .saturating_add(1);
        let left = self.slice_left.load(Ordering::SeqCst);
        if left <= 1 {
            self.slice_left.store(0, Ordering::SeqCst);
            self.preempt.store(true, Ordering::SeqCst);
        } else {
            self.slice_left.store(left - 1, Ordering::SeqCst);
        }
        if now >= self.next_wakeup.load(Ordering::SeqCst) {
            self.preempt.store(true, Ordering::SeqCst);
        }
    }

    /// Current tick count.
    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Check and clear the preemption flag.
    #[inline]
    pub fn take_preempt(&self) -> bool {
        self.preempt.swap(false, Ordering::SeqCst)
    }

    /// Start a new timeslice of `ticks` ticks.
    #[inline]
    pub fn reset_slice(
        &self,
        ticks: u32,
    ) {
        self.slice_left.store(ticks.max(1), Ordering::SeqCst);
        self.preempt.store(false, Ordering::SeqCst);
    }

    /// Ticks left in the current timeslice.
    #[inline]
    pub fn slice_left(&self) -> u32 {
        self.slice_left.load(Ordering::SeqCst)
    }

    /// Earliest tick a sleeping task wants to run, if any.
    pub fn next_wakeup(&self) -> Option<u64> {
        match self.next_wakeup.load(Ordering::SeqCst) {
            NO_WAKEUP => None,
            t => Some(t),
        }
    }

    pub fn set_next_wakeup(
        &self,
        at: Option<u64>,
    ) {
        self.next_wakeup
            .store(at.unwrap_or(NO_WAKEUP), Ordering::SeqCst);
    }

    /// Jump the counter forward to `tick` (simulated idle).
    pub fn advance_to(
        &self,
        tick: u64,
    ) {
        self.ticks.fetch_max(tick, Ordering::SeqCst);
    }
}

/// Background thread driving a [`TickSource`] every `period`.
#[derive(Debug)]
pub struct TickTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickTimer {
    pub fn start(
        source: Arc<TickSource>,
        period: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(period);
                source.tick();
            }
        });
        debug!(period_ms = period.as_millis() as u64, "tick timer started");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
