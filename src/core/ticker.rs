//! Repeating Tick Task
//!
//! A 1 Hz (or any period) callback loop owned by a guard. Dropping the guard
//! or calling [`Ticker::cancel`] stops the loop, so a screen that goes away
//! can never leave a timer mutating state behind it. A tick may also change
//! the period of the ticks after it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Whether the tick loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// Schedule the next tick.
    Continue,
    /// Schedule the next tick one new period from now, and keep that period.
    Reschedule(Duration),
    /// Stop the loop after this tick.
    Stop,
}

/// Owned repeating task.
#[derive(Debug)]
pub struct Ticker {
    name: &'static str,
    cancel_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a loop calling `on_tick` every `period`, first call one period
    /// from now.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately
            ticks.tick().await;

            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                        match on_tick().await {
                            TickControl::Continue => {}
                            TickControl::Reschedule(next) => {
                                debug!("Ticker {} period changed to {:?}", name, next);
                                ticks = delayed_interval(next);
                            }
                            TickControl::Stop => {
                                debug!("Ticker {} stopped by callback", name);
                                break;
                            }
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            name,
            cancel_tx,
            handle: Some(handle),
        }
    }

    /// Stop the loop. Idempotent.
    pub fn cancel(&mut self) {
        let _ = self.cancel_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Ticker {} cancelled", self.name);
        }
    }

    /// Check if the loop has ended (stopped, cancelled or panicked).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let ticker = Ticker::spawn("test", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    TickControl::Stop
                } else {
                    TickControl::Continue
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(ticker.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let ticker = Ticker::spawn("test", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                TickControl::Continue
            }
        });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        drop(ticker);
        let at_drop = count.load(Ordering::SeqCst);
        assert_eq!(at_drop, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_drop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_changes_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _ticker = Ticker::spawn("test", Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    TickControl::Reschedule(Duration::from_secs(10))
                } else {
                    TickControl::Continue
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let mut ticker = Ticker::spawn("test", Duration::from_secs(1), || async {
            TickControl::Continue
        });
        ticker.cancel();
        ticker.cancel();
        assert!(ticker.is_finished());
    }
}
