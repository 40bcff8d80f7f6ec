//! Agent option string
//!
//! The host passes one string of `key=value` pairs separated by commas, the
//! way `-agentpath:liblapse.so=dir=/opt/lapse,pool=20` would. Paths that are
//! not given default to locations inside the agent directory.

use crate::domain::{ConfigError, Pid};
use crate::hooks::HeaderNames;
use crate::report::SinkSpec;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_NAME: &str = "agent";
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved agent settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Directory holding the rule file, logs and class dumps
    pub agent_dir: PathBuf,
    /// Rule file path
    pub config_path: PathBuf,
    /// Where line-protocol records go
    pub sink: SinkSpec,
    /// Root directory for dumps of rewritten classes; `None` disables dumping
    pub dump_dir: Option<PathBuf>,
    /// Concurrent record-processing tasks
    pub pool_size: usize,
    /// Series name of every record
    pub measurement: String,
    /// `target` tag
    pub target: String,
    /// `layer` tag
    pub layer: String,
    pub flush_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Overrides the detected `localAddress` tag
    pub local_address: Option<String>,
    /// Correlation header names
    pub headers: HeaderNames,
    /// Static tags added to every record (`tag.<name>=<value>`)
    pub extra_tags: BTreeMap<String, String>,
}

impl AgentSettings {
    /// Parse an option string such as `dir=/opt/lapse,pool=20,dump=off`
    ///
    /// An empty string yields all defaults rooted at the current directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` for malformed pairs, unknown keys
    /// or unparsable values, and `ConfigError::InvalidSink` for a bad sink.
    pub fn parse(options: &str, pid: Pid) -> Result<Self, ConfigError> {
        let mut pairs = BTreeMap::new();
        for pair in options.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidOption {
                key: pair.to_string(),
                reason: "expected key=value".to_string(),
            })?;
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }

        let agent_dir = PathBuf::from(pairs.remove("dir").unwrap_or_else(|| ".".to_string()));
        let config_path = pairs
            .remove("config")
            .map_or_else(|| agent_dir.join("lapse-agent.json"), PathBuf::from);
        let sink = match pairs.remove("sink") {
            Some(spec) => SinkSpec::parse(&spec)?,
            None => SinkSpec::File(agent_dir.join(format!("lapse-agent-measuring-{pid}.log"))),
        };
        let dump_dir = match pairs.remove("dump").as_deref() {
            Some("off") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(agent_dir.join("classdump")),
        };
        let pool_size = match pairs.remove("pool") {
            Some(value) => match parse_number("pool", &value)? {
                0 => return Err(invalid("pool", "must be at least 1")),
                n => usize::try_from(n).map_err(|_| invalid("pool", "too large"))?,
            },
            None => lapse_common::DEFAULT_POOL_SIZE,
        };
        let flush_timeout = match pairs.remove("flush_timeout_ms") {
            Some(value) => Duration::from_millis(parse_number("flush_timeout_ms", &value)?),
            None => DEFAULT_FLUSH_TIMEOUT,
        };
        let shutdown_timeout = match pairs.remove("shutdown_timeout_ms") {
            Some(value) => Duration::from_millis(parse_number("shutdown_timeout_ms", &value)?),
            None => DEFAULT_SHUTDOWN_TIMEOUT,
        };

        let mut headers = HeaderNames::default();
        if let Some(name) = pairs.remove("header.execution") {
            headers.execution_id = name;
        }
        if let Some(name) = pairs.remove("header.operation") {
            headers.operation = name;
        }
        if let Some(name) = pairs.remove("header.request") {
            headers.request_id = name;
        }

        let measurement = pairs.remove("measurement").unwrap_or_else(|| DEFAULT_NAME.to_string());
        let target = pairs.remove("target").unwrap_or_else(|| DEFAULT_NAME.to_string());
        let layer = pairs.remove("layer").unwrap_or_else(|| DEFAULT_NAME.to_string());
        let local_address = pairs.remove("local_address");

        let mut extra_tags = BTreeMap::new();
        for (key, value) in pairs {
            match key.strip_prefix("tag.") {
                Some(tag) if !tag.is_empty() => {
                    extra_tags.insert(tag.to_string(), value);
                }
                _ => return Err(invalid(&key, "unknown option")),
            }
        }

        Ok(Self {
            agent_dir,
            config_path,
            sink,
            dump_dir,
            pool_size,
            measurement,
            target,
            layer,
            flush_timeout,
            shutdown_timeout,
            local_address,
            headers,
            extra_tags,
        })
    }

    /// Agent log file for a process
    pub fn log_path(&self, pid: Pid) -> PathBuf {
        self.agent_dir.join(format!("lapse-agent-{pid}.log"))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| invalid(key, &format!("'{value}' is not a non-negative integer")))
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidOption { key: key.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_rooted_at_agent_dir() {
        let settings = AgentSettings::parse("dir=/opt/lapse", Pid(42)).unwrap();
        assert_eq!(settings.config_path, PathBuf::from("/opt/lapse/lapse-agent.json"));
        assert_eq!(
            settings.sink,
            SinkSpec::File(PathBuf::from("/opt/lapse/lapse-agent-measuring-42.log"))
        );
        assert_eq!(settings.dump_dir, Some(PathBuf::from("/opt/lapse/classdump")));
        assert_eq!(settings.pool_size, lapse_common::DEFAULT_POOL_SIZE);
        assert_eq!(settings.measurement, "agent");
        assert_eq!(settings.flush_timeout, Duration::from_secs(30));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(settings.log_path(Pid(42)), PathBuf::from("/opt/lapse/lapse-agent-42.log"));
    }

    #[test]
    fn test_empty_options_use_current_dir() {
        let settings = AgentSettings::parse("", Pid(1)).unwrap();
        assert_eq!(settings.agent_dir, PathBuf::from("."));
        assert!(settings.extra_tags.is_empty());
    }

    #[test]
    fn test_overrides() {
        let settings = AgentSettings::parse(
            "pool=4, dump=off, sink=udp://metrics:8089, layer=server, header.operation=X-Op, tag.env=prod",
            Pid(1),
        )
        .unwrap();
        assert_eq!(settings.pool_size, 4);
        assert_eq!(settings.dump_dir, None);
        assert_eq!(settings.sink, SinkSpec::Udp("metrics:8089".to_string()));
        assert_eq!(settings.layer, "server");
        assert_eq!(settings.headers.operation, "X-Op");
        assert_eq!(settings.extra_tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_invalid_options() {
        assert!(matches!(
            AgentSettings::parse("pool=0", Pid(1)),
            Err(ConfigError::InvalidOption { key, .. }) if key == "pool"
        ));
        assert!(matches!(
            AgentSettings::parse("pool=many", Pid(1)),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(
            AgentSettings::parse("colour=blue", Pid(1)),
            Err(ConfigError::InvalidOption { key, .. }) if key == "colour"
        ));
        assert!(matches!(
            AgentSettings::parse("justakey", Pid(1)),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(
            AgentSettings::parse("sink=ftp://x", Pid(1)),
            Err(ConfigError::InvalidSink(_))
        ));
    }
}
