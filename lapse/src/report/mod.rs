//! Measurement reporting
//!
//! Finished measurements become InfluxDB line-protocol records on a bounded
//! worker pool and are written to a [`MetricSink`].
//!
//! - [`record`] - event and record types, line protocol
//! - [`formatter`] - per-operation formatters and their cache
//! - [`sink`] - file and UDP destinations
//! - [`pipeline`] - the [`Reporter`] worker pool

pub mod formatter;
pub mod pipeline;
pub mod record;
pub mod sink;

pub use formatter::{FormatterCache, FormatterSettings, RecordFormatter, STATUS_ERROR, STATUS_OK};
pub use pipeline::Reporter;
pub use record::{nanos, MeasurementEvent, MetricRecord};
pub use sink::{FileSink, MetricSink, SinkSpec, UdpSink};
