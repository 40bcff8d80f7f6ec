//! Structured error types for lapse
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Each enum maps to one failure class: configuration problems are fatal at
//! startup, rewrite problems are fatal for one class, everything on the
//! measurement path is logged and swallowed.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read agent config file {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Malformed agent config file {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("Class {0} is configured both as filter and as handler entry point")]
    OverlappingEntryPoint(String),

    #[error("Invalid agent option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error(transparent)]
    InvalidSink(#[from] SinkError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("Bad magic number 0x{0:08x}")]
    BadMagic(u32),

    #[error("Unexpected end of class file at offset {0}")]
    UnexpectedEof(usize),

    #[error("Invalid constant pool tag {tag} at index {index}")]
    InvalidConstantTag { tag: u8, index: u16 },

    #[error("Invalid constant pool index {0}")]
    InvalidConstantIndex(u16),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid modified UTF-8 in constant pool entry {0}")]
    InvalidUtf8(u16),

    #[error("{0} trailing bytes after class file end")]
    TrailingBytes(usize),

    #[error("Constant pool string of {0} bytes exceeds the 65535 byte limit")]
    Utf8TooLong(usize),

    #[error("Constant pool exceeds 65535 entries")]
    ConstantPoolOverflow,

    #[error("Generated code for {0} exceeds the 65535 byte limit")]
    CodeTooLarge(String),

    #[error("Invalid bytecode at offset {0}")]
    InvalidBytecode(usize),

    #[error("Invalid stack map frame at offset {0}")]
    InvalidFrame(usize),

    #[error("Constructor {0} never calls super() or this()")]
    MissingConstructorCall(String),
}

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Failed to parse class {class}: {source}")]
    Parse { class: String, source: ClassFormatError },

    #[error("Failed to instrument {class}.{method}: {source}")]
    Emit { class: String, method: String, source: ClassFormatError },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink is not open")]
    NotOpen,

    #[error("Invalid sink '{0}', expected udp://host:port, file:path or a path")]
    InvalidSpec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Reporter is shutting down, measurement dropped")]
    ShuttingDown,

    #[error("Pool size must be at least 1, got {0}")]
    InvalidPoolSize(usize),

    #[error("Failed to start reporting pool: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Malformed line protocol record: {0}")]
    MalformedLine(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host capability unavailable: {0}")]
    Unavailable(String),

    #[error("Host lookup failed: {0}")]
    Lookup(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
