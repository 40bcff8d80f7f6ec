//! Event → record formatting, one formatter per operation

use super::record::{nanos, MeasurementEvent, MetricRecord};
use crate::domain::{LocalAddress, Pid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub const TAG_EXECUTION_ID: &str = "executionId";
pub const TAG_LAYER: &str = "layer";
pub const TAG_LOCAL_ADDRESS: &str = "localAddress";
pub const TAG_MESSAGE: &str = "message";
pub const TAG_OPERATION: &str = "operation";
pub const TAG_PID: &str = "pid";
pub const TAG_REQUEST_ID: &str = "requestId";
pub const TAG_STATUS: &str = "status";
pub const TAG_TARGET: &str = "target";
pub const TAG_TYPE: &str = "type";
pub const TAG_URI: &str = "uri";
pub const TAG_URI_ALIAS: &str = "uriAlias";

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// Written for an absent correlation id
const ABSENT_ID: &str = "null";

/// Process-wide values stamped on every record
#[derive(Debug, Clone)]
pub struct FormatterSettings {
    pub measurement: String,
    pub target: String,
    pub layer: String,
    pub pid: Pid,
    pub local_address: LocalAddress,
}

/// Formats events for one operation
#[derive(Debug)]
pub struct RecordFormatter {
    settings: Arc<FormatterSettings>,
    operation: String,
}

impl RecordFormatter {
    pub fn new(settings: Arc<FormatterSettings>, operation: impl Into<String>) -> Self {
        Self { settings, operation: operation.into() }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn format(&self, event: &MeasurementEvent) -> MetricRecord {
        let settings = &self.settings;
        let mut record = MetricRecord::new(settings.measurement.as_str(), event.timestamp_ms);
        // Extra tags go first so the fixed tags below win on a key clash
        for (key, value) in &event.extra_tags {
            record.tag(key, value);
        }
        let id = |id: Option<uuid::Uuid>| id.map_or_else(|| ABSENT_ID.to_string(), |id| id.to_string());
        record
            .tag(TAG_OPERATION, &self.operation)
            .tag(TAG_TARGET, &settings.target)
            .tag(TAG_TYPE, &event.entry_type)
            .tag(TAG_URI, &event.uri)
            .tag(TAG_PID, &settings.pid.to_string())
            .tag(TAG_URI_ALIAS, &event.uri_alias)
            .tag(TAG_LOCAL_ADDRESS, settings.local_address.as_str())
            .tag(TAG_LAYER, &settings.layer)
            .tag(TAG_EXECUTION_ID, &id(event.execution_id))
            .tag(TAG_REQUEST_ID, &id(event.request_id))
            .field("ti1", nanos(event.ti1))
            .field("ti2", nanos(event.ti2));
        match &event.error_message {
            None => {
                record.tags.remove(TAG_MESSAGE);
                record.tag(TAG_STATUS, STATUS_OK);
            }
            Some(message) => {
                record.tag(TAG_MESSAGE, message).tag(TAG_STATUS, STATUS_ERROR);
            }
        }
        record
    }
}

/// Lazily created formatters keyed by operation
///
/// Concurrent first access for one key yields a single shared instance.
#[derive(Debug)]
pub struct FormatterCache {
    settings: Arc<FormatterSettings>,
    formatters: Mutex<HashMap<String, Arc<RecordFormatter>>>,
}

impl FormatterCache {
    pub fn new(settings: FormatterSettings) -> Self {
        Self { settings: Arc::new(settings), formatters: Mutex::new(HashMap::new()) }
    }

    /// Formatter for `operation`, or for `"unknown"` when there is none
    pub fn get_or_create(&self, operation: Option<&str>) -> Arc<RecordFormatter> {
        let key = operation.unwrap_or(lapse_common::UNKNOWN_OPERATION);
        let mut formatters = self.formatters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(formatter) = formatters.get(key) {
            return Arc::clone(formatter);
        }
        let formatter = Arc::new(RecordFormatter::new(Arc::clone(&self.settings), key));
        formatters.insert(key.to_string(), Arc::clone(&formatter));
        formatter
    }

    pub fn len(&self) -> usize {
        self.formatters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
