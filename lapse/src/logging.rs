//! Agent log setup
//!
//! Inside a host process the agent must not write to the application's
//! stdout, so records go to a per-process file through
//! `env_logger::Target::Pipe`. The filter is read from `LAPSE_LOG`.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

pub const LOG_ENV: &str = "LAPSE_LOG";
const DEFAULT_FILTER: &str = "info";

/// Send the `log` facade to `path`, appending
///
/// Returns `Ok(false)` if a logger was already installed in this process
/// (for example by the host or a previous agent instance).
///
/// # Errors
///
/// Returns the I/O error if the log file cannot be created.
pub fn init_agent_log(path: &Path) -> io::Result<bool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let installed = env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, DEFAULT_FILTER))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .is_ok();
    Ok(installed)
}
