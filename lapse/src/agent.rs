//! Agent context
//!
//! Owns everything one agent instance needs and is handed to the host
//! bridge explicitly:
//!
//! ```text
//! Agent::start(settings, host)
//!   ├─ Config::from_path          (fatal on error)
//!   ├─ host.resolve_header_accessor  (failure disables correlation)
//!   ├─ sink.open → FormatterCache → Reporter
//!   ├─ HookDispatcher             (bridge calls land here)
//!   └─ Transformer [+ ClassDumper]   (class-load callback)
//! ```

use crate::config::{AgentSettings, Config};
use crate::domain::{AgentError, LocalAddress, Pid};
use crate::hooks::{CorrelationExtractor, EventSubmitter, HookDispatcher, HostRuntime};
use crate::logging;
use crate::report::{FormatterCache, FormatterSettings, MetricSink, Reporter};
use crate::rewrite::{ClassDumper, Transformer};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Agent {
    settings: AgentSettings,
    transformer: Transformer,
    dispatcher: Arc<HookDispatcher>,
    reporter: Arc<Reporter>,
    stopped: AtomicBool,
}

impl Agent {
    /// Entry used by the host bridge: parse `options`, set up the agent log, start
    ///
    /// # Errors
    ///
    /// See [`Agent::start`]; a bad option string is `AgentError::Config`.
    pub fn from_options(options: &str, host: &dyn HostRuntime) -> Result<Self, AgentError> {
        let pid = Pid::current();
        let settings = AgentSettings::parse(options, pid)?;
        let log_path = settings.log_path(pid);
        match logging::init_agent_log(&log_path) {
            Ok(true) => {}
            Ok(false) => warn!("Logger already installed, agent log not redirected to {}", log_path.display()),
            Err(e) => eprintln!("lapse: cannot open agent log {}: {e}", log_path.display()),
        }
        Self::start(settings, host)
    }

    /// Build the agent from resolved settings
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the rule file cannot be loaded,
    /// `AgentError::Sink` if the sink cannot be opened and
    /// `AgentError::Report` if the reporting pool cannot start.
    pub fn start(settings: AgentSettings, host: &dyn HostRuntime) -> Result<Self, AgentError> {
        info!("Starting lapse agent {}", env!("CARGO_PKG_VERSION"));
        let config = Arc::new(Config::from_path(&settings.config_path)?);
        info!(
            "Loaded {} ({} instrumented classes, {} filters, {} handlers)",
            settings.config_path.display(),
            config.instrumented_classes().len(),
            config.entry_points().filter_count(),
            config.entry_points().handler_count(),
        );

        let accessor = match host.resolve_header_accessor() {
            Ok(accessor) => Some(accessor),
            Err(e) => {
                warn!("Request header lookup unavailable, correlation disabled: {e}");
                None
            }
        };

        let sink: Arc<dyn MetricSink> = Arc::from(settings.sink.build());
        sink.open()?;
        info!("Writing measurements to {}", settings.sink);

        let local_address = settings.local_address.clone().map_or_else(LocalAddress::detect, LocalAddress::new);
        let formatters = Arc::new(FormatterCache::new(FormatterSettings {
            measurement: settings.measurement.clone(),
            target: settings.target.clone(),
            layer: settings.layer.clone(),
            pid: Pid::current(),
            local_address,
        }));
        let reporter = Arc::new(Reporter::new(settings.pool_size, formatters, sink)?);
        let submitter: Arc<dyn EventSubmitter> = reporter.clone();
        let dispatcher = Arc::new(HookDispatcher::new(
            CorrelationExtractor::new(accessor, settings.headers.clone()),
            submitter,
            settings.extra_tags.clone(),
        ));
        let dumper = settings.dump_dir.clone().map(ClassDumper::new);
        let transformer = Transformer::new(config, dumper);

        Ok(Self { settings, transformer, dispatcher, reporter, stopped: AtomicBool::new(false) })
    }

    /// Class-load callback: rewritten bytes, or `None` to keep the class as is
    ///
    /// Never fails; a class that cannot be rewritten is logged and left
    /// unchanged.
    pub fn on_class_load(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        match self.transformer.transform(class_name, bytes) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                error!("Leaving {class_name} uninstrumented: {e}");
                None
            }
        }
    }

    /// Dispatcher the bridge forwards hook calls to
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Flush pending records and stop reporting; later calls do nothing
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.reporter.flush(self.settings.flush_timeout) {
            warn!("Flush timed out with {} records in flight", self.reporter.in_flight());
        }
        self.reporter.shutdown(self.settings.shutdown_timeout);
        info!("Lapse agent stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}
