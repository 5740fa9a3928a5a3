//! Progress tracking
//!
//! A fresh [`ProgressTracker`] is handed to the reader for every pass. The
//! session subscribes a listener for the pass's lifetime that maps the
//! pass-local value into the session-wide value and forwards it to the
//! caller's [`ProgressSink`]. The subscription is a guard, so the listener is
//! released when the pass ends on any path.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Receiver of the session-wide 0-100 progress stream
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, percent: u8) {
        self(percent)
    }
}

/// Sink that discards progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8) {}
}

/// Sink publishing the latest value on a `tokio::sync::watch` channel
#[derive(Debug)]
pub struct WatchProgress(pub watch::Sender<u8>);

impl ProgressSink for WatchProgress {
    fn report(&self, percent: u8) {
        // Closed receivers are not an error for progress
        let _ = self.0.send(percent);
    }
}

/// Session-wide progress for pass `pass` of `total_passes` at pass-local
/// value `local`: `⌊(100·pass + local) / total_passes⌋`
pub fn session_progress(pass: usize, total_passes: usize, local: u8) -> u8 {
    if total_passes == 0 {
        return local.min(100);
    }
    let local = usize::from(local.min(100));
    let value = (100 * pass + local) / total_passes;
    value.min(100) as u8
}

type Listener = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    value: u8,
    listener: Option<Listener>,
}

/// Per-pass progress counter, 0-100 and never decreasing
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    /// Forward reports verbatim instead of clamping them
    passthrough: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that records and forwards every report unchanged
    pub(crate) fn passthrough() -> Self {
        Self {
            passthrough: true,
            ..Self::default()
        }
    }

    /// Report pass-local progress
    ///
    /// Values above 100 clamp to 100 and values below the current value are
    /// ignored, unless the tracker is a passthrough one. The listener, if any, is called once per report with the
    /// resulting value.
    pub fn report(&self, percent: u8) {
        let (value, listener) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.value = if self.passthrough {
                percent
            } else {
                state.value.max(percent.min(100))
            };
            (state.value, state.listener.clone())
        };
        if let Some(listener) = listener {
            listener(value);
        }
    }

    /// Report `done` out of `total` units of work
    pub fn report_fraction(&self, done: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total).saturating_mul(100) / total) as u8
        };
        self.report(percent);
    }

    /// Current pass-local value
    pub fn value(&self) -> u8 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).value
    }

    /// Force the tracker to 100
    pub(crate) fn complete(&self) {
        self.report(100);
    }

    /// Attach `listener` until the returned guard drops
    pub(crate) fn subscribe<F>(&self, listener: F) -> ProgressSubscription<'_>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener = Some(Arc::new(listener));
        ProgressSubscription { tracker: self }
    }

    fn unsubscribe(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener
            .is_some()
    }
}

/// Keeps a listener attached to a tracker for the duration of a pass
#[must_use = "dropping the subscription detaches the listener"]
pub(crate) struct ProgressSubscription<'a> {
    tracker: &'a ProgressTracker,
}

impl Drop for ProgressSubscription<'_> {
    fn drop(&mut self) {
        self.tracker.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn test_session_progress_formula() {
        assert_eq!(session_progress(0, 3, 0), 0);
        assert_eq!(session_progress(0, 3, 50), 16);
        assert_eq!(session_progress(1, 3, 0), 33);
        assert_eq!(session_progress(2, 3, 100), 100);
        assert_eq!(session_progress(0, 1, 42), 42);
    }

    #[test]
    fn test_session_progress_monotonic_across_passes() {
        let total = 7;
        let mut last = 0;
        for pass in 0..total {
            for local in 0..=100u8 {
                let value = session_progress(pass, total, local);
                assert!(value >= last, "pass {} local {} went backwards", pass, local);
                last = value;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_tracker_ignores_regression_and_clamps() {
        let tracker = ProgressTracker::new();
        tracker.report(40);
        tracker.report(10);
        assert_eq!(tracker.value(), 40);
        tracker.report(250);
        assert_eq!(tracker.value(), 100);
    }

    #[test]
    fn test_passthrough_tracker_forwards_regressions() {
        let tracker = ProgressTracker::passthrough();
        let (seen, listener) = collecting();
        let _subscription = tracker.subscribe(listener);

        tracker.report(50);
        tracker.report(20);
        tracker.report(70);

        assert_eq!(*seen.lock().unwrap(), vec![50, 20, 70]);
        assert_eq!(tracker.value(), 70);
    }

    #[test]
    fn test_listener_called_once_per_report() {
        let tracker = ProgressTracker::new();
        let (seen, listener) = collecting();
        let _subscription = tracker.subscribe(listener);

        tracker.report(10);
        tracker.report(5);
        tracker.report(60);

        assert_eq!(*seen.lock().unwrap(), vec![10, 10, 60]);
    }

    #[test]
    fn test_subscription_released_on_drop() {
        let tracker = ProgressTracker::new();
        let (seen, listener) = collecting();
        {
            let _subscription = tracker.subscribe(listener);
            assert!(tracker.is_subscribed());
            tracker.complete();
        }
        assert!(!tracker.is_subscribed());

        tracker.report(100);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn test_report_fraction() {
        let tracker = ProgressTracker::new();
        tracker.report_fraction(1, 4);
        assert_eq!(tracker.value(), 25);
        tracker.report_fraction(9, 4);
        assert_eq!(tracker.value(), 100);

        let empty = ProgressTracker::new();
        empty.report_fraction(0, 0);
        assert_eq!(empty.value(), 100);
    }

    #[test]
    fn test_watch_progress_publishes_latest() {
        let (tx, rx) = watch::channel(0u8);
        let sink = WatchProgress(tx);
        sink.report(30);
        sink.report(70);
        assert_eq!(*rx.borrow(), 70);
    }
}
