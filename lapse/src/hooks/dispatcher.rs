//! Runtime side of the injected hook calls
//!
//! Each application thread owns its measurement stack and execution context.
//! State lives in a `thread_local!` map keyed by dispatcher id, so two
//! dispatchers in one process (as in tests) never see each other's stacks.
//! Dropping a dispatcher clears the dropping thread's entry at once; other
//! threads prune entries of dropped dispatchers on their next hook call.
//!
//! ```text
//! enter_measuring(m1)         stack: [m1]
//!   enter_measuring(m2)       stack: [m1, m2]
//!   exit_measuring(m2)  ──▶   stack: [m1]      record for m2
//! exit_measuring(m1)    ──▶   stack: []        record for m1
//!
//! exit_measuring(mX)    ──▶   stack: []        mismatch: cleared, no record
//! ```

use super::context::{CorrelationExtractor, ExecutionContext};
use super::host::{Arg, ObjectRef, Thrown};
use super::measurement::{epoch_millis, Measurement};
use crate::domain::ReportError;
use crate::report::MeasurementEvent;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Receiver of finished measurements
pub trait EventSubmitter: Send + Sync {
    /// # Errors
    ///
    /// Returns `ReportError::ShuttingDown` once the receiver no longer
    /// accepts events.
    fn submit(&self, event: MeasurementEvent) -> Result<(), ReportError>;
}

#[derive(Debug, Default)]
struct ThreadState {
    stack: Vec<Measurement>,
    context: Option<ExecutionContext>,
}

/// One thread's states, keyed by dispatcher id
#[derive(Debug, Default)]
struct ThreadStates {
    by_dispatcher: HashMap<u64, ThreadState>,
    /// Value of `DROPPED_DISPATCHERS` at the last prune
    seen_drops: u64,
}

impl ThreadStates {
    /// Forget states of dispatchers dropped since the last call
    fn prune_dropped(&mut self) {
        let drops = DROPPED_DISPATCHERS.load(Ordering::Acquire);
        if drops == self.seen_drops {
            return;
        }
        self.seen_drops = drops;
        let live = LIVE_DISPATCHERS.lock().unwrap_or_else(PoisonError::into_inner);
        self.by_dispatcher.retain(|id, _| live.contains(id));
    }
}

thread_local! {
    static THREAD_STATES: RefCell<ThreadStates> = RefCell::new(ThreadStates::default());
}

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);
static LIVE_DISPATCHERS: Mutex<BTreeSet<u64>> = Mutex::new(BTreeSet::new());
static DROPPED_DISPATCHERS: AtomicU64 = AtomicU64::new(0);

/// Target of the four hook entry points
pub struct HookDispatcher {
    id: u64,
    correlation: CorrelationExtractor,
    submitter: Arc<dyn EventSubmitter>,
    extra_tags: BTreeMap<String, String>,
}

impl HookDispatcher {
    pub fn new(
        correlation: CorrelationExtractor,
        submitter: Arc<dyn EventSubmitter>,
        extra_tags: BTreeMap<String, String>,
    ) -> Self {
        let id = NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed);
        LIVE_DISPATCHERS.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        Self {
            id,
            correlation,
            submitter,
            extra_tags,
        }
    }

    /// Run `f` on this thread's state; `None` while the thread is being torn down
    fn with_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> Option<R> {
        THREAD_STATES
            .try_with(|states| {
                let mut states = states.try_borrow_mut().ok()?;
                states.prune_dropped();
                Some(f(states.by_dispatcher.entry(self.id).or_default()))
            })
            .ok()
            .flatten()
    }

    /// Push a measurement for `method` and start its timer
    pub fn enter_measuring(&self, receiver: Option<ObjectRef>, method: &str, args: Vec<Arg>) {
        let measurement = Measurement::start(method, receiver, args);
        self.with_state(|state| state.stack.push(measurement));
    }

    /// Pop the innermost measurement and report it if it belongs to this exit
    ///
    /// An empty stack or a popped entry with a different identity or
    /// argument snapshot clears the whole stack and reports nothing.
    pub fn exit_measuring(&self, _receiver: Option<&ObjectRef>, thrown: Option<&Thrown>, method: &str, args: &[Arg]) {
        let finished = self
            .with_state(|state| match state.stack.pop() {
                Some(measurement) if measurement.matches(method, args) => {
                    Some((measurement.elapsed(), state.context.clone()))
                }
                Some(measurement) => {
                    warn!(
                        "Measurement mismatch on exit of {method} (open: {}), clearing {} stacked measurements",
                        measurement.identity,
                        state.stack.len()
                    );
                    state.stack.clear();
                    None
                }
                None => {
                    warn!("No measurement found on exit of {method}, clearing measurement stack");
                    state.stack.clear();
                    None
                }
            })
            .flatten();
        let Some((elapsed, context)) = finished else {
            return;
        };

        let event = MeasurementEvent {
            operation: context.as_ref().map(|c| c.operation.clone()),
            entry_type: lapse_common::AGENT_ENTRY_TYPE.to_string(),
            uri: method.to_string(),
            uri_alias: method.to_string(),
            execution_id: context.as_ref().map(|c| c.execution_id),
            request_id: context.as_ref().map(|c| c.request_id),
            error_message: thrown.map(|t| t.describe().to_string()),
            ti1: elapsed,
            ti2: elapsed,
            timestamp_ms: epoch_millis(SystemTime::now()),
            extra_tags: self.extra_tags.clone(),
        };
        match self.submitter.submit(event) {
            Ok(()) => {}
            Err(ReportError::ShuttingDown) => debug!("Reporter shutting down, dropped measurement of {method}"),
            Err(e) => warn!("Submitting measurement of {method} failed: {e}"),
        }
    }

    /// Start of a logical request: read correlation headers off `args[0]`
    ///
    /// A request without a complete, well-formed header set leaves the
    /// current context as it is.
    pub fn enter_pass_through(&self, _receiver: Option<&ObjectRef>, args: &[Arg]) {
        if let Some(context) = self.correlation.extract(args) {
            debug!("Execution context {} / {} for {}", context.execution_id, context.request_id, context.operation);
            self.with_state(|state| state.context = Some(context));
        }
    }

    /// End of a logical request: always clears the context
    pub fn exit_pass_through(&self) {
        self.with_state(|state| state.context = None);
    }

    pub fn current_context(&self) -> Option<ExecutionContext> {
        self.with_state(|state| state.context.clone()).flatten()
    }

    pub fn stack_depth(&self) -> usize {
        self.with_state(|state| state.stack.len()).unwrap_or(0)
    }

    /// Drop this thread's stack and context, for pooled threads picking up
    /// unrelated work
    pub fn reset_current_thread(&self) {
        self.with_state(|state| {
            state.stack.clear();
            state.context = None;
        });
    }
}

impl Drop for HookDispatcher {
    fn drop(&mut self) {
        let id = self.id;
        LIVE_DISPATCHERS.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        DROPPED_DISPATCHERS.fetch_add(1, Ordering::Release);
        let _ = THREAD_STATES.try_with(|states| {
            if let Ok(mut states) = states.try_borrow_mut() {
                states.by_dispatcher.remove(&id);
            }
        });
    }
}
