//! Hook dispatcher and the host capabilities it relies on
//!
//! The rewritten classes call four static bridge methods (see
//! `lapse_common`); the bridge forwards them to a [`HookDispatcher`].

pub mod context;
pub mod dispatcher;
pub mod host;
pub mod measurement;

pub use context::{CorrelationExtractor, ExecutionContext, HeaderNames};
pub use dispatcher::{EventSubmitter, HookDispatcher};
pub use host::{Arg, HeaderAccessor, HostRuntime, ObjectRef, Thrown};
pub use measurement::Measurement;
