//! # Hook ABI (Rewriter ↔ Host Bridge)
//!
//! Names and descriptors shared between the class-file rewriter, which emits
//! calls into the bridge class, and the host-side bridge, which binds those
//! static methods to the hook dispatcher. Both sides must agree on every
//! string in this file or the JVM will fail to link the injected calls.
//!
//! ## Call Sequence
//!
//! For a method that is both an entry point and measured, the injected calls
//! nest like this (outer = pass-through, inner = measuring):
//!
//! ```text
//! enterPassThroughHook(this, args)
//!   enterMeasuringHook(this, id, args)
//!     <original body>
//!   exitMeasuringHook(this, throwable|null, id, args)
//! exitPassThroughHook()
//! ```

#![no_std]

// ============================================================================
// Bridge Class
// ============================================================================

/// Internal name of the bridge class whose static methods the rewriter calls.
pub const HOOK_OWNER: &str = "io/lapse/agent/Hooks";

/// Starts a measurement.
pub const ENTER_MEASURING_HOOK: &str = "enterMeasuringHook";

/// `enterMeasuringHook(Object receiver, String method)`
///
/// Used for zero-argument methods so no empty array has to be allocated.
pub const ENTER_MEASURING_DESC: &str = "(Ljava/lang/Object;Ljava/lang/String;)V";

/// `enterMeasuringHook(Object receiver, String method, Object[] args)`
pub const ENTER_MEASURING_ARGS_DESC: &str =
    "(Ljava/lang/Object;Ljava/lang/String;[Ljava/lang/Object;)V";

/// Stops a measurement.
pub const EXIT_MEASURING_HOOK: &str = "exitMeasuringHook";

/// `exitMeasuringHook(Object receiver, Throwable thrown, String method)`
pub const EXIT_MEASURING_DESC: &str =
    "(Ljava/lang/Object;Ljava/lang/Throwable;Ljava/lang/String;)V";

/// `exitMeasuringHook(Object receiver, Throwable thrown, String method, Object[] args)`
pub const EXIT_MEASURING_ARGS_DESC: &str =
    "(Ljava/lang/Object;Ljava/lang/Throwable;Ljava/lang/String;[Ljava/lang/Object;)V";

/// Marks the start of a logical request at an entry point.
pub const ENTER_PASS_THROUGH_HOOK: &str = "enterPassThroughHook";

/// `enterPassThroughHook(Object receiver, Object[] args)`
pub const ENTER_PASS_THROUGH_DESC: &str = "(Ljava/lang/Object;[Ljava/lang/Object;)V";

/// Marks the end of a logical request at an entry point.
pub const EXIT_PASS_THROUGH_HOOK: &str = "exitPassThroughHook";

/// `exitPassThroughHook()`
pub const EXIT_PASS_THROUGH_DESC: &str = "()V";

/// Suffix appended to the name of a method whose body was moved behind a
/// generated wrapper.
///
/// A class that already declares a method with this suffix was rewritten
/// before and is left alone.
pub const IMPL_SUFFIX: &str = "$lapse$impl";

// ============================================================================
// Entry Points
// ============================================================================

/// Pass-through method of filter-like classes (any descriptor).
pub const FILTER_METHOD: &str = "doFilter";

/// Dispatch method of handler-like classes.
pub const HANDLER_METHOD: &str = "service";

/// Exact descriptor of the handler dispatch method.
///
/// `service` is overloaded on servlets; only the HTTP-typed variant marks the
/// request boundary.
pub const HANDLER_METHOD_DESC: &str =
    "(Ljavax/servlet/http/HttpServletRequest;Ljavax/servlet/http/HttpServletResponse;)V";

// ============================================================================
// Correlation Headers
// ============================================================================

/// Request header carrying the execution id (UUID).
pub const EXECUTION_ID_HEADER: &str = "X-Lapse-Execution-Id";

/// Request header carrying the operation name.
pub const OPERATION_HEADER: &str = "X-Lapse-Operation";

/// Request header carrying the request id (UUID).
pub const REQUEST_ID_HEADER: &str = "X-Lapse-Request-Id";

// ============================================================================
// Reporting
// ============================================================================

/// Default number of concurrent record-processing tasks.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Formatter key used when no operation is known for a measurement.
pub const UNKNOWN_OPERATION: &str = "unknown";

/// Entry-point type tag written for every agent measurement.
pub const AGENT_ENTRY_TYPE: &str = "AGENT";
