//! Measurement events and their InfluxDB line-protocol form
//!
//! ```text
//! agent,executionId=…,layer=agent,localAddress=host/10.0.0.5,operation=checkout,…,uri=c.e.Foo.bar() ti1=1200i,ti2=1200i 1700000000000000000
//! └─┬─┘ └──────────────────────── tags, sorted by key ───────────────────────────┘ └──── fields ────┘ └──── timestamp (ns) ───┘
//! measurement
//! ```
//!
//! Escaping follows the InfluxDB client: in the measurement name `,` and
//! space get a backslash; in tag keys, tag values and field keys `,`, `=`
//! and space do.

use crate::domain::ReportError;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use uuid::Uuid;

/// What the dispatcher hands to the pipeline for one finished invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementEvent {
    /// Operation from the execution context, if any
    pub operation: Option<String>,
    pub entry_type: String,
    pub uri: String,
    pub uri_alias: String,
    pub execution_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    /// Present when the invocation ended with an exception
    pub error_message: Option<String>,
    pub ti1: Duration,
    pub ti2: Duration,
    /// Wall clock at exit, milliseconds since the epoch
    pub timestamp_ms: u64,
    pub extra_tags: BTreeMap<String, String>,
}

/// One line-protocol point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, i64>,
    pub timestamp_ms: u64,
}

impl MetricRecord {
    pub fn new(measurement: impl Into<String>, timestamp_ms: u64) -> Self {
        Self { measurement: measurement.into(), tags: BTreeMap::new(), fields: BTreeMap::new(), timestamp_ms }
    }

    /// Set a tag; empty values are dropped and line breaks become spaces
    pub fn tag(&mut self, key: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.tags.remove(key);
        } else {
            self.tags.insert(key.to_string(), value.replace(['\r', '\n'], " "));
        }
        self
    }

    pub fn field(&mut self, key: &str, value: i64) -> &mut Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Serialize to one line (without the trailing newline)
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(256);
        escape_into(&mut line, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }
        for (i, (key, value)) in self.fields.iter().enumerate() {
            line.push(if i == 0 { ' ' } else { ',' });
            escape_into(&mut line, key, &[',', '=', ' ']);
            let _ = write!(line, "={value}i");
        }
        let _ = write!(line, " {}", self.timestamp_ms.saturating_mul(1_000_000));
        line
    }

    /// Inverse of [`MetricRecord::to_line`]
    ///
    /// # Errors
    ///
    /// Returns `ReportError::MalformedLine` if the line does not have the
    /// `measurement[,tags] fields timestamp` shape or a field is not an
    /// integer.
    pub fn parse_line(line: &str) -> Result<Self, ReportError> {
        let malformed = || ReportError::MalformedLine(line.to_string());
        let sections = split_unescaped(line.trim_end_matches(['\r', '\n']), ' ');
        let [head, fields, timestamp] = sections.as_slice() else {
            return Err(malformed());
        };

        let mut head = split_unescaped(head, ',').into_iter();
        let measurement = unescape(head.next().filter(|m| !m.is_empty()).ok_or_else(malformed)?);
        let timestamp_ns: u64 = timestamp.parse().map_err(|_| malformed())?;
        let mut record = Self::new(measurement, timestamp_ns / 1_000_000);

        for tag in head {
            let (key, value) = split_pair(tag).ok_or_else(malformed)?;
            record.tags.insert(key, value);
        }
        for field in split_unescaped(fields, ',') {
            let (key, value) = split_pair(field).ok_or_else(malformed)?;
            let value = value
                .strip_suffix('i')
                .and_then(|v| v.parse().ok())
                .ok_or_else(malformed)?;
            record.fields.insert(key, value);
        }
        Ok(record)
    }
}

/// Backslash-escape `special` and the backslash itself
fn escape_into(out: &mut String, text: &str, special: &[char]) {
    for c in text.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Split on `sep` where it is not preceded by a backslash
fn split_unescaped(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn split_pair(text: &str) -> Option<(String, String)> {
    let parts = split_unescaped(text, '=');
    match parts.as_slice() {
        [key, value] if !key.is_empty() => Some((unescape(key), unescape(value))),
        _ => None,
    }
}

/// Nanoseconds as a line-protocol integer, saturating
pub fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricRecord {
        let mut record = MetricRecord::new("agent", 1_700_000_000_123);
        record
            .tag("uri", "c.e.Foo.bar(int, j.l.String)")
            .tag("operation", "op=1,2")
            .tag("status", "ok")
            .field("ti2", 1500)
            .field("ti1", 1500);
        record
    }

    #[test]
    fn test_line_layout_and_escaping() {
        assert_eq!(
            sample().to_line(),
            "agent,operation=op\\=1\\,2,status=ok,uri=c.e.Foo.bar(int\\,\\ j.l.String) ti1=1500i,ti2=1500i 1700000000123000000"
        );
    }

    #[test]
    fn test_backslashes_survive_round_trip() {
        let mut record = MetricRecord::new("agent", 1);
        record
            .tag("message", "C:\\temp\\")
            .tag("path", "dir\\ x")
            .tag("status", "error")
            .field("ti1", 1);
        let line = record.to_line();
        assert_eq!(
            line,
            "agent,message=C:\\\\temp\\\\,path=dir\\\\\\ x,status=error ti1=1i 1000000"
        );
        let parsed = MetricRecord::parse_line(&line).unwrap();
        assert_eq!(parsed.tags.get("message").map(String::as_str), Some("C:\\temp\\"));
        assert_eq!(parsed.tags.get("path").map(String::as_str), Some("dir\\ x"));
        assert_eq!(parsed.tags.get("status").map(String::as_str), Some("error"));
    }

    #[test]
    fn test_measurement_escaping() {
        let mut record = MetricRecord::new("my series,x", 1);
        record.field("ti1", 1);
        assert_eq!(record.to_line(), "my\\ series\\,x ti1=1i 1000000");
    }

    #[test]
    fn test_empty_tag_omitted_and_newlines_flattened() {
        let mut record = MetricRecord::new("agent", 0);
        record.tag("message", "").tag("cause", "line one\nline two").field("ti1", 0);
        assert!(!record.tags.contains_key("message"));
        assert_eq!(record.tags["cause"], "line one line two");
    }

    #[test]
    fn test_parse_inverts_to_line() {
        let record = sample();
        assert_eq!(MetricRecord::parse_line(&record.to_line()).unwrap(), record);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "agent", "agent ti1=1i", "agent ti1=x 1", "agent,tag ti1=1i 1", "agent ti1=1i notanumber"] {
            assert!(
                matches!(MetricRecord::parse_line(bad), Err(ReportError::MalformedLine(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
