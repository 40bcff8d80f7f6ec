use super::host::{Arg, ObjectRef};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// One open method invocation on a thread's stack
#[derive(Debug)]
pub struct Measurement {
    pub identity: String,
    pub receiver: Option<ObjectRef>,
    pub args: Vec<Arg>,
    started: Instant,
}

impl Measurement {
    /// Start timing now
    pub fn start(identity: &str, receiver: Option<ObjectRef>, args: Vec<Arg>) -> Self {
        Self {
            identity: identity.to_string(),
            receiver,
            args,
            started: Instant::now(),
        }
    }

    /// Exit belongs to this entry: same identity, same argument snapshot
    pub fn matches(&self, identity: &str, args: &[Arg]) -> bool {
        self.identity == identity && self.args.as_slice() == args
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Milliseconds since the epoch, 0 for clocks before it
pub fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
