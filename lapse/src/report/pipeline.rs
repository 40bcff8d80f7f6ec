//! Bounded record processing
//!
//! ```text
//!  app thread                      reporter runtime (blocking pool, N threads)
//!  ──────────                      ───────────────────────────────────────────
//!  submit(event)
//!    acquire permit ──(waits while N in flight)
//!    spawn_blocking ─────────────▶ format → to_line → sink.write
//!    return                          drop permit
//! ```
//!
//! Admission blocks instead of dropping, so the instrumented application is
//! slowed down rather than losing records when the sink falls behind.

use super::formatter::FormatterCache;
use super::record::MeasurementEvent;
use super::sink::MetricSink;
use crate::domain::{ReportError, SinkError};
use crate::hooks::EventSubmitter;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DROP_GRACE: Duration = Duration::from_secs(1);

pub struct Reporter {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    pool_size: usize,
    formatters: Arc<FormatterCache>,
    sink: Arc<dyn MetricSink>,
    closed: AtomicBool,
}

impl Reporter {
    /// Start a pool of `pool_size` record workers writing to an opened `sink`
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidPoolSize` for a zero pool and
    /// `ReportError::Runtime` if the worker threads cannot be started.
    pub fn new(
        pool_size: usize,
        formatters: Arc<FormatterCache>,
        sink: Arc<dyn MetricSink>,
    ) -> Result<Self, ReportError> {
        if pool_size == 0 {
            return Err(ReportError::InvalidPoolSize(pool_size));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(pool_size)
            .thread_name("lapse-report")
            .build()
            .map_err(ReportError::Runtime)?;
        debug!("Reporter started with {pool_size} workers");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            formatters,
            sink,
            closed: AtomicBool::new(false),
        })
    }

    /// Hand one event to the pool, waiting for a free slot first
    ///
    /// Must be called from outside any async runtime; instrumented
    /// application threads always are.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::ShuttingDown` once [`Reporter::shutdown`] has begun.
    pub fn submit(&self, event: MeasurementEvent) -> Result<(), ReportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReportError::ShuttingDown);
        }
        let permit = self
            .handle
            .block_on(Arc::clone(&self.permits).acquire_owned())
            .map_err(|_| ReportError::ShuttingDown)?;

        let formatters = Arc::clone(&self.formatters);
        let sink = Arc::clone(&self.sink);
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            if let Err(e) = process(&formatters, sink.as_ref(), &event) {
                warn!("Dropping record for {}: {e}", event.uri);
            }
        });
        Ok(())
    }

    /// Records currently admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.pool_size.saturating_sub(self.permits.available_permits())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Wait until nothing is in flight; `false` if `timeout` passed first
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stop accepting events, drain for up to `timeout`, then close the sink
    ///
    /// Work still running at the deadline is abandoned. Calling this again
    /// is a no-op that returns `true`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        let started = Instant::now();
        self.permits.close();
        let drained = self.flush(timeout);
        if !drained {
            warn!("Reporter shutdown timed out with {} records in flight", self.in_flight());
        }
        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(timeout.saturating_sub(started.elapsed()));
        }
        if let Err(e) = self.sink.close() {
            warn!("Closing metric sink failed: {e}");
        }
        info!("Reporter stopped");
        drained
    }
}

impl EventSubmitter for Reporter {
    fn submit(&self, event: MeasurementEvent) -> Result<(), ReportError> {
        Reporter::submit(self, event)
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown(DROP_GRACE);
    }
}

fn process(formatters: &FormatterCache, sink: &dyn MetricSink, event: &MeasurementEvent) -> Result<(), SinkError> {
    let formatter = formatters.get_or_create(event.operation.as_deref());
    sink.write(&formatter.format(event).to_line())
}
