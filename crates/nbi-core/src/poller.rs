//! Capability poller
//!
//! The host does not announce when a command is registered, so readiness is
//! inferred by polling a predicate on a fixed cadence until it holds, the
//! timeout elapses, or the caller cancels.

use crate::config::PollerConfig;
use crate::error::PollError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// Create a linked cancel handle and signal
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// Fires cancellation for every clone of the paired signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the paired signals
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by waits that should stop when a request is abandoned
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// Signal that never fires
    #[inline]
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Check if cancellation has fired
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation fires; pends forever otherwise
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        // A dropped handle can never cancel.
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

/// Bounded poll-until-ready primitive
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityPoller {
    config: PollerConfig,
}

impl CapabilityPoller {
    /// Create poller with cadence from `config`
    #[inline]
    #[must_use]
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Configured timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Wait until `is_available` returns true
    ///
    /// The predicate is checked immediately and then once per interval.
    ///
    /// # Errors
    /// - `PollError::CapabilityTimeout` when the timeout elapses first
    /// - `PollError::Cancelled` when `cancel` fires first
    pub async fn wait_for<F>(
        &self,
        capability: &str,
        is_available: F,
        mut cancel: CancelSignal,
    ) -> Result<Duration, PollError>
    where
        F: Fn() -> bool,
    {
        let started = Instant::now();
        let timeout = self.config.timeout();
        let interval = self.config.interval();

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    capability: capability.to_string(),
                });
            }

            if is_available() {
                let waited = started.elapsed();
                tracing::debug!(capability, waited_ms = waited.as_millis(), "capability available");
                return Ok(waited);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(PollError::CapabilityTimeout {
                    capability: capability.to_string(),
                    timeout,
                });
            }

            tokio::select! {
                () = sleep(interval.min(timeout - elapsed)) => {}
                () = cancel.cancelled() => {
                    return Err(PollError::Cancelled {
                        capability: capability.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn poller() -> CapabilityPoller {
        CapabilityPoller::new(PollerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_immediately_when_available() {
        let waited = poller()
            .wait_for("cmd", || true, CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_when_capability_appears() {
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checks);

        let waited = poller()
            .wait_for(
                "cmd",
                move || counter.fetch_add(1, Ordering::SeqCst) >= 3,
                CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert_eq!(waited, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_capability_name() {
        let started = Instant::now();
        let err = poller()
            .wait_for("docmanager:open", || false, CancelSignal::never())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PollError::CapabilityTimeout {
                capability: "docmanager:open".into(),
                timeout: Duration::from_secs(10),
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let (handle, signal) = cancellation();

        let wait = tokio::spawn(async move {
            poller().wait_for("cmd", || false, signal).await
        });

        sleep(Duration::from_millis(250)).await;
        handle.cancel();

        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, PollError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_signal_fails_fast() {
        let (handle, signal) = cancellation();
        handle.cancel();
        let err = poller().wait_for("cmd", || true, signal).await.unwrap_err();
        assert_eq!(err.capability(), "cmd");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_cancels() {
        let (handle, signal) = cancellation();
        drop(handle);
        let config = PollerConfig::new(Duration::from_millis(500), Duration::from_millis(100));
        let err = CapabilityPoller::new(config)
            .wait_for("cmd", || false, signal)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::CapabilityTimeout { .. }));
    }
}
