//! # lapse - JVM method-timing agent
//!
//! lapse rewrites selected methods of a JVM application as their classes are
//! loaded, times every call of those methods, and reports each call as an
//! InfluxDB line-protocol record tagged with the request it belonged to.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Host JVM process                         │
//! │   class loader ──bytes──┐            ┌── instrumented methods   │
//! └─────────────────────────┼────────────┼──────────────────────────┘
//!                           │            │ enter/exit hook calls
//!                           ▼            ▼  (via the bridge class)
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        lapse (this crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │    Config    │──▶│   Rewrite    │   │    Hooks     │       │
//! │  │ (rule model) │   │ (class file) │   │ (per thread) │       │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘       │
//! │                                                │ events        │
//! │                                                ▼               │
//! │                     ┌──────────────┐   ┌──────────────┐       │
//! │                     │     Sink     │◀──│   Report     │       │
//! │                     │ (file / UDP) │   │ (N workers)  │       │
//! │                     └──────────────┘   └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`config`]: rule file (which classes and methods to time, which classes
//!   are request entry points) and the agent option string
//! - [`classfile`]: class-file parser and writer, constant pool, descriptors,
//!   `Code` and `StackMapTable` attributes
//! - [`rewrite`]: method selection and wrapper generation
//! - [`hooks`]: the runtime side of the injected calls; thread-local
//!   measurement stacks and request correlation
//! - [`report`]: formatting, line protocol, bounded worker pool, sinks
//! - [`agent`]: the object the host bridge talks to
//! - [`cli`]: offline `check`, `inspect` and `transform` commands
//! - [`domain`]: errors and small shared types
//!
//! ## Typical Usage
//!
//! ```bash
//! # Validate a rule file
//! lapse check --config lapse-agent.json
//!
//! # See what the agent would do to a class
//! lapse inspect target/classes/com/example/Foo.class --config lapse-agent.json
//!
//! # Rewrite classes ahead of time
//! lapse transform --config lapse-agent.json --out instrumented/ Foo.class Bar.class
//! ```

pub mod agent;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod domain;
pub mod hooks;
pub mod logging;
pub mod report;
pub mod rewrite;

pub use agent::Agent;
