//! Refresh notifier
//!
//! Presentation layers re-read the whole result snapshot whenever they are told to
//! refresh, so a burst of scan events only needs to reach them a couple of times. The
//! first notify of a burst fans out at once; anything arriving inside the following
//! window collapses into one trailing fan-out when the window closes.
//!
//! The signal carries no payload. Consumers subscribe through a broadcast channel and
//! may lag without holding anyone up.

use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SIGNAL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct RefreshNotifier {
    inner: Arc<RefreshInner>,
}

#[derive(Debug)]
struct RefreshInner {
    interval: Duration,
    sender: broadcast::Sender<()>,
    state: Mutex<ThrottleState>,
    shutdown: CancellationToken,
}

#[derive(Debug, Default)]
struct ThrottleState {
    window_open: bool,
    pending: bool,
    disposed: bool,
    last_fired: Option<Instant>,
    fired: u64,
}

impl RefreshNotifier {
    pub fn new(interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(RefreshInner {
                interval,
                sender,
                state: Mutex::new(ThrottleState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.sender.subscribe()
    }

    /// Number of fan-outs so far.
    pub fn fired_count(&self) -> u64 {
        self.inner.state.lock().fired
    }

    pub fn notify(&self) {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }

        if state.window_open {
            state.pending = true;
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.inner.fire(&mut state);
                state.window_open = true;
                handle.spawn(Arc::clone(&self.inner).run_window());
            }
            Err(_) => {
                let within_window = state
                    .last_fired
                    .is_some_and(|fired| fired.elapsed() < self.inner.interval);
                if within_window {
                    debug!("Dropping refresh inside throttle window, no runtime for trailing edge");
                    return;
                }
                self.inner.fire(&mut state);
            }
        }
    }

    /// Stops all further fan-outs, including a pending trailing one.
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.pending = false;
        self.inner.shutdown.cancel();
        debug!("Refresh notifier disposed after {} fan-outs", state.fired);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }
}

impl RefreshInner {
    fn fire(&self, state: &mut ThrottleState) {
        state.fired += 1;
        state.last_fired = Some(Instant::now());
        let _ = self.sender.send(());
    }

    async fn run_window(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => return,
            }

            let mut state = self.state.lock();
            if state.disposed {
                return;
            }

            if state.pending {
                state.pending = false;
                self.fire(&mut state);
                continue;
            }

            state.window_open = false;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn drain(rx: &mut broadcast::Receiver<()>) -> usize {
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        received
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_notify_fires_immediately() {
        let notifier = RefreshNotifier::new(INTERVAL);
        let mut rx = notifier.subscribe();

        notifier.notify();

        assert_eq!(drain(&mut rx), 1);
        assert_eq!(notifier.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_leading_and_trailing() {
        let notifier = RefreshNotifier::new(INTERVAL);
        let mut rx = notifier.subscribe();

        for _ in 0..5 {
            notifier.notify();
        }
        assert_eq!(drain(&mut rx), 1);

        tokio::time::sleep(INTERVAL * 3).await;

        assert_eq!(drain(&mut rx), 1);
        assert_eq!(notifier.fired_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_notify_has_no_trailing_fire() {
        let notifier = RefreshNotifier::new(INTERVAL);

        notifier.notify();
        tokio::time::sleep(INTERVAL * 3).await;

        assert_eq!(notifier.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_quiet_period() {
        let notifier = RefreshNotifier::new(INTERVAL);

        notifier.notify();
        tokio::time::sleep(INTERVAL * 2).await;
        notifier.notify();

        assert_eq!(notifier.fired_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_drops_pending_trailing_fire() {
        let notifier = RefreshNotifier::new(INTERVAL);

        notifier.notify();
        notifier.notify();
        notifier.dispose();
        tokio::time::sleep(INTERVAL * 3).await;
        notifier.notify();

        assert!(notifier.is_disposed());
        assert_eq!(notifier.fired_count(), 1);
    }

    #[test]
    fn test_without_runtime_only_leading_edge_fires() {
        let notifier = RefreshNotifier::new(Duration::from_secs(60));

        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert_eq!(notifier.fired_count(), 1);
    }
}
