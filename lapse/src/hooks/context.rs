//! Correlation identifiers carried by one logical request

use super::host::{Arg, HeaderAccessor};
use log::{debug, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Identifiers threading one request through its measurements
///
/// All three fields are present together or the context is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub request_id: Uuid,
    pub operation: String,
}

/// Names of the three correlation headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    pub execution_id: String,
    pub operation: String,
    pub request_id: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            execution_id: lapse_common::EXECUTION_ID_HEADER.to_string(),
            operation: lapse_common::OPERATION_HEADER.to_string(),
            request_id: lapse_common::REQUEST_ID_HEADER.to_string(),
        }
    }
}

/// Reads an [`ExecutionContext`] off an entry point's request argument
pub struct CorrelationExtractor {
    accessor: Option<Arc<dyn HeaderAccessor>>,
    names: HeaderNames,
}

impl CorrelationExtractor {
    /// `accessor` is `None` when the host capability could not be resolved;
    /// extraction is then disabled for the process
    pub fn new(accessor: Option<Arc<dyn HeaderAccessor>>, names: HeaderNames) -> Self {
        Self { accessor, names }
    }

    pub fn is_enabled(&self) -> bool {
        self.accessor.is_some()
    }

    /// Context from the headers of `args[0]`
    ///
    /// `None` when correlation is disabled, the first argument is missing or
    /// null, a header is absent, an id is not a UUID, or the lookup fails.
    /// Lookup failures are logged.
    pub fn extract(&self, args: &[Arg]) -> Option<ExecutionContext> {
        let accessor = self.accessor.as_ref()?;
        let request = args.first()?.as_ref()?;
        let header = |name: &str| match accessor.header(request, name) {
            Ok(value) => value,
            Err(e) => {
                warn!("Reading header {name} failed: {e}");
                None
            }
        };

        let execution_id = header(&self.names.execution_id)?;
        let operation = header(&self.names.operation)?;
        let request_id = header(&self.names.request_id)?;
        let parse = |name: &str, value: &str| match Uuid::parse_str(value.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Header {name} is not a UUID ('{value}'): {e}");
                None
            }
        };
        Some(ExecutionContext {
            execution_id: parse(&self.names.execution_id, &execution_id)?,
            request_id: parse(&self.names.request_id, &request_id)?,
            operation,
        })
    }
}
