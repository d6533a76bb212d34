//! Watchdog - detects a silent broker connection
//!
//! Registered as a receiver for `#`, every message refreshes the last-seen
//! time. When no message arrived for longer than the threshold the
//! `WatchdogExpired` future resolves; the binary then exits with
//! `WATCHDOG_EXIT_CODE` and leaves the restart to its supervisor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, instrument};

use contracts::{Message, Receiver};

/// Process exit status after watchdog expiry
pub const WATCHDOG_EXIT_CODE: i32 = 42;

const MIN_PERIOD: Duration = Duration::from_millis(1);

type StopHandle = (oneshot::Sender<()>, JoinHandle<()>);

/// Silence detector
pub struct Watchdog {
    kill_after_silence: Duration,
    keepalive: mpsc::Sender<()>,
    stop: Mutex<Option<StopHandle>>,
}

/// Resolves with the observed silence once the watchdog fires.
///
/// Resolves with `None` if the watchdog was stopped first.
pub struct WatchdogExpired {
    rx: oneshot::Receiver<Duration>,
}

impl Future for WatchdogExpired {
    type Output = Option<Duration>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

impl Watchdog {
    /// Start the timer task. Must be called inside a tokio runtime.
    pub fn spawn(kill_after_silence: Duration) -> (Self, WatchdogExpired) {
        // one pending keepalive is enough, later ones coalesce into it
        let (keepalive_tx, keepalive_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (expired_tx, expired_rx) = oneshot::channel();

        let task = tokio::spawn(watch(kill_after_silence, keepalive_rx, stop_rx, expired_tx));

        let watchdog = Self {
            kill_after_silence,
            keepalive: keepalive_tx,
            stop: Mutex::new(Some((stop_tx, task))),
        };
        (watchdog, WatchdogExpired { rx: expired_rx })
    }

    pub fn kill_after_silence(&self) -> Duration {
        self.kill_after_silence
    }

    /// Stop the timer task and wait for it. Later calls return immediately.
    pub async fn stop(&self) {
        let handle = self
            .stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some((stop, task)) = handle else {
            return;
        };
        // the task may already be gone after expiry
        let _ = stop.send(());
        if let Err(e) = task.await {
            error!(error = ?e, "Watchdog task panicked");
        }
        debug!("Watchdog stopped");
    }
}

impl Receiver for Watchdog {
    fn receive(&self, _message: &Message) {
        // full: a keepalive is already pending; closed: watchdog stopped
        let _ = self.keepalive.try_send(());
    }
}

#[instrument(
    name = "watchdog_loop",
    skip(keepalive, stop, expired),
    fields(threshold_secs = kill_after_silence.as_secs_f64())
)]
async fn watch(
    kill_after_silence: Duration,
    mut keepalive: mpsc::Receiver<()>,
    mut stop: oneshot::Receiver<()>,
    expired: oneshot::Sender<Duration>,
) {
    let period = (kill_after_silence / 8).max(MIN_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    debug!(period_ms = period.as_millis() as u64, "Watchdog started");

    loop {
        tokio::select! {
            biased;

            // also fires when the Watchdog is dropped
            _ = &mut stop => return,

            Some(()) = keepalive.recv() => {
                last_seen = Instant::now();
            }

            _ = ticker.tick() => {
                let silence = last_seen.elapsed();
                observability::record_watchdog_silence(silence.as_secs_f64());
                if silence > kill_after_silence {
                    error!(
                        silence_secs = silence.as_secs_f64(),
                        "No message received within keepalive threshold"
                    );
                    let _ = expired.send(silence);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_silence() {
        let (watchdog, expired) = Watchdog::spawn(Duration::from_secs(10));
        let silence = expired.await.expect("watchdog should fire");
        assert!(silence > Duration::from_secs(10));
        // detected within one tick period
        assert!(silence <= Duration::from_secs(10) + Duration::from_millis(1250));
        watchdog.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_prevents_expiry() {
        let (watchdog, mut expired) = Watchdog::spawn(Duration::from_secs(10));
        let msg = Message::new("/any", "1");

        for _ in 0..20 {
            sleep(Duration::from_secs(5)).await;
            watchdog.receive(&msg);
        }
        assert!(timeout(Duration::from_secs(5), &mut expired).await.is_err());

        // silence from now on
        assert!(expired.await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_messages_coalesces() {
        let (watchdog, mut expired) = Watchdog::spawn(Duration::from_secs(2));
        let msg = Message::new("/any", "1");
        for _ in 0..1000 {
            watchdog.receive(&msg);
        }
        assert!(timeout(Duration::from_secs(1), &mut expired).await.is_err());
        watchdog.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (watchdog, expired) = Watchdog::spawn(Duration::from_secs(1));
        watchdog.stop().await;
        watchdog.stop().await;
        watchdog.receive(&Message::new("/late", "1"));
        assert_eq!(expired.await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_expiry() {
        let (watchdog, expired) = Watchdog::spawn(Duration::from_millis(100));
        assert!(expired.await.is_some());
        watchdog.stop().await;
    }
}
