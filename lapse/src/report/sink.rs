//! Destinations for line-protocol records

use crate::domain::SinkError;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Where records go
///
/// Implementations are shared by all reporting tasks and synchronise
/// internally. `write` before `open` (or after `close`) must fail with
/// `SinkError::NotOpen` rather than panic.
pub trait MetricSink: Send + Sync {
    /// # Errors
    ///
    /// Returns `SinkError::Io` if the destination cannot be opened.
    fn open(&self) -> Result<(), SinkError>;

    /// Write one record line (without trailing newline)
    ///
    /// # Errors
    ///
    /// Returns `SinkError::NotOpen` before `open`, `SinkError::Io` on write failure.
    fn write(&self, line: &str) -> Result<(), SinkError>;

    /// # Errors
    ///
    /// Returns `SinkError::Io` if buffered data cannot be flushed.
    fn close(&self) -> Result<(), SinkError>;
}

/// Parsed `sink=` option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSpec {
    File(PathBuf),
    /// `host:port` of an InfluxDB UDP listener
    Udp(String),
}

impl SinkSpec {
    /// `udp://host:port`, `file:/path` or a bare path
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidSpec` for empty input, unknown schemes and
    /// UDP targets without a port.
    pub fn parse(spec: &str) -> Result<Self, SinkError> {
        let invalid = || SinkError::InvalidSpec(spec.to_string());
        if let Some(target) = spec.strip_prefix("udp://") {
            let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid());
            }
            return Ok(SinkSpec::Udp(target.to_string()));
        }
        if let Some(path) = spec.strip_prefix("file:") {
            return if path.is_empty() { Err(invalid()) } else { Ok(SinkSpec::File(PathBuf::from(path))) };
        }
        if spec.is_empty() || spec.contains("://") {
            return Err(invalid());
        }
        Ok(SinkSpec::File(PathBuf::from(spec)))
    }

    pub fn build(&self) -> Box<dyn MetricSink> {
        match self {
            SinkSpec::File(path) => Box::new(FileSink::new(path.clone())),
            SinkSpec::Udp(target) => Box::new(UdpSink::new(target.clone())),
        }
    }
}

impl fmt::Display for SinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSpec::File(path) => write!(f, "file:{}", path.display()),
            SinkSpec::Udp(target) => write!(f, "udp://{target}"),
        }
    }
}

/// Appends one line per record to a file, flushing after each write
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), writer: Mutex::new(None) }
    }
}

impl MetricSink for FileSink {
    fn open(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(BufWriter::new(file));
        Ok(())
    }

    fn write(&self, line: &str) -> Result<(), SinkError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard.as_mut().ok_or(SinkError::NotOpen)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Sends each record as one datagram
pub struct UdpSink {
    target: String,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpSink {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), socket: Mutex::new(None) }
    }
}

impl MetricSink for UdpSink {
    fn open(&self) -> Result<(), SinkError> {
        let bind = if self.target.starts_with('[') { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(&self.target)?;
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(socket);
        Ok(())
    }

    fn write(&self, line: &str) -> Result<(), SinkError> {
        let guard = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let socket = guard.as_ref().ok_or(SinkError::NotOpen)?;
        socket.send(line.as_bytes())?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}
