//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep process facts and class names from being
//! mixed up with the many other strings flowing through the agent.

#![allow(unsafe_code)] // gethostname() requires unsafe

use std::fmt;
use std::net::ToSocketAddrs;

/// Process ID of the instrumented process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// PID of the current process
    #[must_use]
    pub fn current() -> Self {
        Pid(std::process::id())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local address rendered as `hostname/ip`
///
/// Written into every record's `localAddress` tag so measurements from
/// several hosts can be told apart downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddress(String);

impl LocalAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Resolve the local host name and its first address
    ///
    /// Falls back to `localhost/127.0.0.1` when the name cannot be read or
    /// resolved.
    #[must_use]
    pub fn detect() -> Self {
        let Some(host) = hostname() else {
            return Self::new("localhost/127.0.0.1");
        };
        let ip = (host.as_str(), 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map_or_else(|| "127.0.0.1".to_string(), |addr| addr.ip().to_string());
        Self(format!("{host}/{ip}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Convert a JVM internal class name (`a/b/C`) to its dotted form (`a.b.C`)
#[must_use]
pub fn dotted_class_name(internal: &str) -> String {
    internal.replace('/', ".")
}
