// Fetch scheduler - Periodic, non-overlapping poll of the snapshot source
use crate::application::snapshot_source::{FetchError, SnapshotSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Receives the body of every successful fetch.
pub type SnapshotSink = Arc<dyn Fn(String) + Send + Sync>;

/// What a single scheduled tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    /// A previous fetch was still in flight.
    Skipped,
    /// The scheduler is not running.
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub ok: u64,
    pub skipped: u64,
    pub failed: u64,
}

struct Shared {
    source: Arc<dyn SnapshotSource>,
    on_snapshot: SnapshotSink,
    timeout: Duration,
    running: AtomicBool,
    in_flight: AtomicBool,
    current: Mutex<Option<JoinHandle<()>>>,
    ok: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Clears the in-flight flag when the fetch future is dropped, whether it
/// completed or was aborted before its first poll.
struct InFlight(Arc<Shared>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl Shared {
    fn tick(self: &Arc<Self>) -> TickOutcome {
        if !self.running.load(Ordering::Acquire) {
            return TickOutcome::Stopped;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target: "pipeline", "fetch still in flight, tick skipped");
            return TickOutcome::Skipped;
        }

        let guard = InFlight(self.clone());
        let handle = tokio::spawn(async move {
            let guard = guard;
            guard.0.fetch_once().await;
        });
        *self.current.lock() = Some(handle);
        TickOutcome::Started
    }

    async fn fetch_once(&self) {
        let result = match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        let body = match result {
            Ok(body) if !body.is_empty() => body,
            Ok(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "pipeline", error = %FetchError::EmptyBody, "response ignored");
                return;
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "pipeline", error = %e, "response ignored");
                return;
            }
        };

        let tick = self.ok.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(target: "pipeline", tick, bytes = body.len(), "snapshot fetched");

        let on_snapshot = self.on_snapshot.clone();
        if panic::catch_unwind(AssertUnwindSafe(move || on_snapshot(body))).is_err() {
            tracing::error!(target: "pipeline", tick, "snapshot consumer panicked");
        }
    }
}

/// Polls a [`SnapshotSource`] at a fixed period and hands each successful
/// body to a consumer.
///
/// A tick that finds the previous fetch still in flight is skipped rather
/// than queued. Failures are logged and retried at the next tick without
/// backoff.
pub struct FetchScheduler {
    shared: Arc<Shared>,
    period: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl FetchScheduler {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        period: Duration,
        timeout: Duration,
        on_snapshot: SnapshotSink,
    ) -> Self {
        assert!(!period.is_zero(), "poll period must be non-zero");
        assert!(!timeout.is_zero(), "fetch timeout must be non-zero");
        Self {
            shared: Arc::new(Shared {
                source,
                on_snapshot,
                timeout,
                running: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                current: Mutex::new(None),
                ok: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            period,
            ticker: Mutex::new(None),
        }
    }

    /// Begin polling: the first fetch fires immediately, then every period.
    /// No-op while already running. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }

        self.shared.running.store(true, Ordering::Release);
        tracing::info!(
            target: "pipeline",
            endpoint = %self.shared.source.describe(),
            period_ms = self.period.as_millis() as u64,
            timeout_ms = self.shared.timeout.as_millis() as u64,
            "fetch scheduler started"
        );

        let shared = self.shared.clone();
        let period = self.period;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.tick();
            }
        }));
    }

    /// Stop polling and interrupt any in-flight fetch, waiting at most the
    /// fetch timeout for it to unwind. `start` may be called again afterwards.
    pub async fn stop(&self) {
        let Some(ticker) = self.ticker.lock().take() else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        tracing::info!(
            target: "pipeline",
            in_flight = self.shared.in_flight.load(Ordering::Acquire),
            "fetch scheduler stopping"
        );

        ticker.abort();
        let _ = ticker.await;

        let current = self.shared.current.lock().take();
        if let Some(fetch) = current {
            fetch.abort();
            if tokio::time::timeout(self.shared.timeout, fetch).await.is_err() {
                tracing::warn!(target: "pipeline", "in-flight fetch did not unwind in time");
            }
        }
    }

    /// Run one scheduled tick by hand.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            ok: self.shared.ok.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
        if let Some(fetch) = self.shared.current.lock().take() {
            fetch.abort();
        }
    }
}
