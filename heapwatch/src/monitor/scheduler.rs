//! Monitor scheduler
//!
//! Runs every registered [`Monitor`] on one dedicated thread. All monitors
//! are polled once at start, then each reschedules itself after its own
//! poll interval. The first monitor to fire stops the whole loop before the
//! fire callback runs; no further polls happen after that.
//!
//! ```text
//!   Idle ──start──▶ Running ──monitor fires──▶ Fired ──stop──▶ Stopped
//!                      └──────────stop──────────────────────────▲
//! ```

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use heapwatch_common::{DumpReason, MetricKind};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use super::metric_monitor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Fired,
    Stopped,
}

/// Delivered once to the fire callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireEvent {
    pub metric: MetricKind,
    pub reason: DumpReason,
    /// Sample that fired the monitor
    pub value: Option<f64>,
}

// ============================================================================
// Poll Loop (clock-driven core)
// ============================================================================

/// Deterministic core of the scheduler: tracks when each monitor is due and
/// polls the due ones in registration order.
pub struct PollLoop {
    monitors: Vec<Monitor>,
    next_due: Vec<Instant>,
    fired: bool,
}

impl PollLoop {
    /// Every monitor is due immediately.
    #[must_use]
    pub fn new(monitors: Vec<Monitor>, start: Instant) -> Self {
        let next_due = vec![start; monitors.len()];
        Self { monitors, next_due, fired: false }
    }

    /// Earliest pending poll, `None` once a monitor fired or nothing is registered.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        if self.fired {
            return None;
        }
        self.next_due.iter().min().copied()
    }

    #[must_use]
    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    /// Poll every monitor due at `now`. Polling stops at the first monitor
    /// that fires; monitors after it are not sampled on this tick.
    pub fn poll_due(&mut self, now: Instant) -> Option<FireEvent> {
        if self.fired {
            return None;
        }
        for (monitor, due) in self.monitors.iter_mut().zip(self.next_due.iter_mut()) {
            if *due > now {
                continue;
            }
            if monitor.poll() {
                self.fired = true;
                return Some(FireEvent {
                    metric: monitor.kind(),
                    reason: monitor.dump_reason(),
                    value: monitor.last_metric(),
                });
            }
            *due = now + monitor.threshold().poll_interval();
        }
        None
    }
}

// ============================================================================
// Scheduler Thread
// ============================================================================

pub struct MonitorScheduler {
    state: Arc<Mutex<SchedulerState>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Default for MonitorScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MonitorScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(SchedulerState::Idle)), stop_tx: None, handle: None }
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *lock_state(&self.state)
    }

    /// Start polling on a dedicated thread. Only an idle scheduler starts;
    /// later calls are ignored. An empty monitor list stops the scheduler
    /// without spawning a thread.
    ///
    /// # Errors
    /// Returns an error if the monitor thread cannot be spawned.
    pub fn start<F>(&mut self, monitors: Vec<Monitor>, on_fire: F) -> std::io::Result<()>
    where
        F: FnOnce(FireEvent) + Send + 'static,
    {
        {
            let mut state = lock_state(&self.state);
            if *state != SchedulerState::Idle {
                debug!("Monitor scheduler already {state:?}, ignoring start");
                return Ok(());
            }
            if monitors.is_empty() {
                info!("No monitors registered, monitor scheduler stopped");
                *state = SchedulerState::Stopped;
                return Ok(());
            }
            *state = SchedulerState::Running;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let state = Arc::clone(&self.state);
        info!("Starting monitor scheduler with {} monitors", monitors.len());

        let spawned = std::thread::Builder::new().name("heapwatch-monitor".to_string()).spawn(
            move || {
                let mut poll_loop = PollLoop::new(monitors, Instant::now());
                while let Some(due) = poll_loop.next_due() {
                    let wait = due.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    if let Some(event) = poll_loop.poll_due(Instant::now()) {
                        {
                            let mut current = lock_state(&state);
                            if *current != SchedulerState::Running {
                                return;
                            }
                            *current = SchedulerState::Fired;
                        }
                        drop(poll_loop);
                        info!("{} monitor fired, all monitors stopped", event.metric);
                        on_fire(event);
                        return;
                    }
                }
            },
        );

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                *lock_state(&self.state) = SchedulerState::Stopped;
                Err(e)
            }
        }
    }

    /// Stop polling. Safe to call from the fire callback; in that case the
    /// monitor thread is not joined.
    pub fn stop(&mut self) {
        {
            let mut state = lock_state(&self.state);
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!("Monitor scheduler stopped");
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::metric_monitor::MetricSource;
    use crate::monitor::threshold::{Threshold, ValueKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scripted(values: Vec<f64>, polls: Arc<AtomicUsize>) -> impl MetricSource {
        let mut iter = values.into_iter();
        move || -> anyhow::Result<f64> {
            polls.fetch_add(1, Ordering::SeqCst);
            Ok(iter.next().unwrap_or(0.0))
        }
    }

    fn monitor(
        kind: MetricKind,
        interval_ms: u64,
        values: Vec<f64>,
        polls: Arc<AtomicUsize>,
    ) -> Monitor {
        let threshold =
            Threshold::new(80.0, ValueKind::Percent, true, 2, Duration::from_millis(interval_ms));
        Monitor::new(kind, threshold, scripted(values, polls))
    }

    #[test]
    fn test_poll_loop_polls_all_immediately() {
        let start = Instant::now();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut poll_loop = PollLoop::new(
            vec![
                monitor(MetricKind::Heap, 100, vec![], Arc::clone(&a)),
                monitor(MetricKind::Fd, 300, vec![], Arc::clone(&b)),
            ],
            start,
        );
        assert_eq!(poll_loop.next_due(), Some(start));
        assert!(poll_loop.poll_due(start).is_none());
        assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (1, 1));
        assert_eq!(poll_loop.next_due(), Some(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_poll_loop_intervals_interleave() {
        let start = Instant::now();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut poll_loop = PollLoop::new(
            vec![
                monitor(MetricKind::Heap, 100, vec![], Arc::clone(&a)),
                monitor(MetricKind::Fd, 300, vec![], Arc::clone(&b)),
            ],
            start,
        );
        for ms in [0, 100, 200, 300] {
            poll_loop.poll_due(start + Duration::from_millis(ms));
        }
        assert_eq!(a.load(Ordering::SeqCst), 4);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_two_monitors_same_tick_fire_once() {
        let start = Instant::now();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut poll_loop = PollLoop::new(
            vec![
                monitor(MetricKind::Heap, 10, vec![90.0, 95.0], Arc::clone(&a)),
                monitor(MetricKind::Thread, 10, vec![90.0, 95.0], Arc::clone(&b)),
            ],
            start,
        );
        assert!(poll_loop.poll_due(start).is_none());
        let event = poll_loop.poll_due(start + Duration::from_millis(10)).unwrap();
        assert_eq!(event.metric, MetricKind::Heap);
        assert_eq!(event.value, Some(95.0));
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(poll_loop.next_due(), None);
        assert!(poll_loop.poll_due(start + Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_scheduler_fires_callback_once_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let polls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = bounded(4);
        let mut scheduler = MonitorScheduler::new();
        let fired_in_cb = Arc::clone(&fired);
        scheduler
            .start(
                vec![
                    monitor(MetricKind::Heap, 5, vec![90.0, 95.0, 99.0], Arc::clone(&polls)),
                    monitor(MetricKind::Fd, 5, vec![90.0, 95.0, 99.0], Arc::clone(&polls)),
                ],
                move |event| {
                    fired_in_cb.fetch_add(1, Ordering::SeqCst);
                    tx.send(event).unwrap();
                },
            )
            .unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.reason, DumpReason::MetricOverThreshold(MetricKind::Heap));
        assert_eq!(scheduler.state(), SchedulerState::Fired);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_stop_before_fire() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = MonitorScheduler::new();
        scheduler
            .start(vec![monitor(MetricKind::Heap, 5, vec![], Arc::clone(&polls))], |_| {
                panic!("must not fire");
            })
            .unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.stop();
        let after_stop = polls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(polls.load(Ordering::SeqCst), after_stop);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_empty_monitor_list_stops() {
        let mut scheduler = MonitorScheduler::new();
        scheduler.start(vec![], |_| {}).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_start_twice_ignored() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = MonitorScheduler::new();
        scheduler.start(vec![], |_| {}).unwrap();
        scheduler
            .start(vec![monitor(MetricKind::Heap, 5, vec![], Arc::clone(&polls))], |_| {})
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }
}
