//! Instrumentation rules
//!
//! The rule file names the entry-point classes and, per class and method,
//! which overloads to measure:
//!
//! ```json
//! {
//!   "entryPoints": {
//!     "filters":  ["com.example.web.TracingFilter"],
//!     "handlers": ["com.example.web.FrontServlet"]
//!   },
//!   "instrumentations": {
//!     "com.example.service.OrderService": {
//!       "placeOrder": [],
//!       "lookup": [["long"], ["java.lang.String", "int"]]
//!     }
//!   }
//! }
//! ```
//!
//! An empty list measures every overload. A list of lists measures exactly
//! the overloads whose parameter type names match one inner list in order.
//! `[[]]` therefore selects only the zero-argument overload.
//!
//! The loaded [`Config`] is immutable and shared as `Arc<Config>` between
//! the transformer and the CLI.

pub mod settings;

use crate::domain::ConfigError;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

pub use settings::AgentSettings;

/// Which overloads of a method a rule selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Every overload
    Any,
    /// Only the overload with exactly these parameter type names, in order
    Exact(Vec<String>),
}

impl Signature {
    /// Check a candidate's Java parameter type names (`int`, `java.lang.String`, `long[]`)
    ///
    /// Equality is nominal: no subtyping, no boxing, no varargs expansion.
    pub fn matches<S: AsRef<str>>(&self, param_type_names: &[S]) -> bool {
        match self {
            Signature::Any => true,
            Signature::Exact(expected) => {
                expected.len() == param_type_names.len()
                    && expected
                        .iter()
                        .zip(param_type_names)
                        .all(|(want, have)| want == have.as_ref())
            }
        }
    }
}

/// One (class, method, signature) selection from the rule file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationRule {
    pub class_name: String,
    pub method_name: String,
    pub signature: Signature,
}

/// All rules configured for one method name of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInstrumentations {
    method_name: String,
    rules: Vec<InstrumentationRule>,
}

impl MethodInstrumentations {
    pub fn new(method_name: impl Into<String>, rules: Vec<InstrumentationRule>) -> Self {
        Self { method_name: method_name.into(), rules }
    }

    /// Build from the rule-file shape: `[]` is one `Any` rule, otherwise one
    /// `Exact` rule per inner list
    fn from_param_lists(class_name: &str, method_name: &str, lists: Vec<Vec<String>>) -> Self {
        let signatures = if lists.is_empty() {
            vec![Signature::Any]
        } else {
            lists.into_iter().map(Signature::Exact).collect()
        };
        let rules = signatures
            .into_iter()
            .map(|signature| InstrumentationRule {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                signature,
            })
            .collect();
        Self::new(method_name, rules)
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn rules(&self) -> &[InstrumentationRule] {
        &self.rules
    }

    /// True if any rule selects the overload with these parameter type names
    pub fn matches<S: AsRef<str>>(&self, param_type_names: &[S]) -> bool {
        self.rules.iter().any(|rule| rule.signature.matches(param_type_names))
    }
}

impl fmt::Display for MethodInstrumentations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match &rule.signature {
                Signature::Any => write!(f, "{}(*)", self.method_name)?,
                Signature::Exact(params) => {
                    write!(f, "{}({})", self.method_name, params.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

/// Role of a class at the request boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointKind {
    /// `doFilter` marks the request boundary
    Filter,
    /// `service(HttpServletRequest, HttpServletResponse)` marks the request boundary
    Handler,
}

impl fmt::Display for EntryPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointKind::Filter => f.write_str("filter"),
            EntryPointKind::Handler => f.write_str("handler"),
        }
    }
}

/// Disjoint sets of filter-like and handler-like class names (dotted form)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPoints {
    filters: HashSet<String>,
    handlers: HashSet<String>,
}

impl EntryPoints {
    /// # Errors
    ///
    /// Returns `ConfigError::OverlappingEntryPoint` if a class is listed in both sets.
    pub fn new(
        filters: impl IntoIterator<Item = String>,
        handlers: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let filters: HashSet<String> = filters.into_iter().collect();
        let handlers: HashSet<String> = handlers.into_iter().collect();
        if let Some(both) = filters.intersection(&handlers).min() {
            return Err(ConfigError::OverlappingEntryPoint(both.clone()));
        }
        Ok(Self { filters, handlers })
    }

    pub fn kind_of(&self, class_name: &str) -> Option<EntryPointKind> {
        if self.filters.contains(class_name) {
            Some(EntryPointKind::Filter)
        } else if self.handlers.contains(class_name) {
            Some(EntryPointKind::Handler)
        } else {
            None
        }
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// What the rule file says about one class
#[derive(Debug, Clone, Copy)]
pub struct UnitPlan<'a> {
    pub entry_point: Option<EntryPointKind>,
    pub methods: Option<&'a HashMap<String, MethodInstrumentations>>,
}

impl<'a> UnitPlan<'a> {
    /// Class is not mentioned anywhere in the rule file
    pub fn is_empty(&self) -> bool {
        self.entry_point.is_none() && self.methods.map_or(true, HashMap::is_empty)
    }

    /// Rules for a method name; `None` means the method is never measured
    pub fn rules_for(&self, method_name: &str) -> Option<&'a MethodInstrumentations> {
        self.methods.and_then(|methods| methods.get(method_name))
    }
}

/// Loaded rule file
#[derive(Debug, Clone, Default)]
pub struct Config {
    entry_points: EntryPoints,
    instrumentations: HashMap<String, HashMap<String, MethodInstrumentations>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    entry_points: RawEntryPoints,
    instrumentations: HashMap<String, HashMap<String, Vec<Vec<String>>>>,
}

#[derive(Debug, Deserialize)]
struct RawEntryPoints {
    #[serde(default)]
    filters: Vec<String>,
    #[serde(default, alias = "servlets")]
    handlers: Vec<String>,
}

impl Config {
    pub fn new(
        entry_points: EntryPoints,
        instrumentations: HashMap<String, HashMap<String, MethodInstrumentations>>,
    ) -> Self {
        Self { entry_points, instrumentations }
    }

    /// Read and validate a rule file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid JSON of
    /// the expected shape, or lists a class as both filter and handler.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let raw: RawConfig = serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        Self::from_raw(raw)
    }

    /// Parse a rule document held in memory
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_path`], minus the read failure.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|source| ConfigError::Parse { path: "<inline>".into(), source })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let entry_points = EntryPoints::new(raw.entry_points.filters, raw.entry_points.handlers)?;
        let instrumentations = raw
            .instrumentations
            .into_iter()
            .map(|(class_name, methods)| {
                let methods = methods
                    .into_iter()
                    .map(|(method_name, lists)| {
                        let rules =
                            MethodInstrumentations::from_param_lists(&class_name, &method_name, lists);
                        (method_name, rules)
                    })
                    .collect();
                (class_name, methods)
            })
            .collect();
        Ok(Self { entry_points, instrumentations })
    }

    /// Look up everything configured for a class (dotted name)
    pub fn plan_for(&self, class_name: &str) -> UnitPlan<'_> {
        UnitPlan {
            entry_point: self.entry_points.kind_of(class_name),
            methods: self.instrumentations.get(class_name),
        }
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entry_points
    }

    /// Instrumented classes with their method rules, sorted by class name
    pub fn instrumented_classes(&self) -> Vec<(&str, Vec<&MethodInstrumentations>)> {
        let mut classes: Vec<_> = self
            .instrumentations
            .iter()
            .map(|(class, methods)| {
                let mut methods: Vec<_> = methods.values().collect();
                methods.sort_by(|a, b| a.method_name().cmp(b.method_name()));
                (class.as_str(), methods)
            })
            .collect();
        classes.sort_by(|a, b| a.0.cmp(b.0));
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RULES: &str = r#"{
        "entryPoints": {
            "filters": ["com.example.web.TracingFilter"],
            "servlets": ["com.example.web.FrontServlet"]
        },
        "instrumentations": {
            "com.example.service.OrderService": {
                "placeOrder": [],
                "lookup": [["long"], ["java.lang.String", "int"]],
                "reset": [[]]
            }
        }
    }"#;

    #[test]
    fn test_any_signature_matches_every_overload() {
        let config = Config::from_json_str(RULES).unwrap();
        let plan = config.plan_for("com.example.service.OrderService");
        let rules = plan.rules_for("placeOrder").unwrap();
        assert!(rules.matches::<&str>(&[]));
        assert!(rules.matches(&["int"]));
        assert!(rules.matches(&["java.lang.String", "long[]"]));
    }

    #[test]
    fn test_exact_signature_requires_ordered_equality() {
        let config = Config::from_json_str(RULES).unwrap();
        let plan = config.plan_for("com.example.service.OrderService");
        let rules = plan.rules_for("lookup").unwrap();
        assert!(rules.matches(&["long"]));
        assert!(rules.matches(&["java.lang.String", "int"]));
        assert!(!rules.matches(&["int", "java.lang.String"]));
        assert!(!rules.matches(&["java.lang.Long"]));
        assert!(!rules.matches::<&str>(&[]));
    }

    #[test]
    fn test_empty_inner_list_selects_zero_arg_overload() {
        let config = Config::from_json_str(RULES).unwrap();
        let rules = config.plan_for("com.example.service.OrderService").rules_for("reset").unwrap();
        assert!(rules.matches::<&str>(&[]));
        assert!(!rules.matches(&["int"]));
    }

    #[test]
    fn test_plan_for_unmentioned_class_is_empty() {
        let config = Config::from_json_str(RULES).unwrap();
        assert!(config.plan_for("com.example.Other").is_empty());

        let handler = config.plan_for("com.example.web.FrontServlet");
        assert!(!handler.is_empty());
        assert_eq!(handler.entry_point, Some(EntryPointKind::Handler));
        assert!(handler.rules_for("service").is_none());
    }

    #[test]
    fn test_overlapping_entry_points_rejected() {
        let json = r#"{
            "entryPoints": {"filters": ["a.B"], "handlers": ["a.B"]},
            "instrumentations": {}
        }"#;
        let err = Config::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingEntryPoint(name) if name == "a.B"));
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let err = Config::from_json_str(r#"{"entryPoints": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.entry_points().filter_count(), 1);
        assert_eq!(config.entry_points().handler_count(), 1);
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_path(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_method_instrumentations_display() {
        let config = Config::from_json_str(RULES).unwrap();
        let plan = config.plan_for("com.example.service.OrderService");
        assert_eq!(plan.rules_for("placeOrder").unwrap().to_string(), "placeOrder(*)");
        assert_eq!(
            plan.rules_for("lookup").unwrap().to_string(),
            "lookup(long); lookup(java.lang.String, int)"
        );
    }
}
