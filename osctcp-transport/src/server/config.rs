//! Configuration structures for server behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::framing::{DEFAULT_MAX_FRAME_LEN, FramingMode};

/// Configuration for a [`Server`](crate::Server).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface host name or address to bind. `None` binds all interfaces.
    pub interface: Option<String>,

    /// TCP port to listen on. Port 0 asks the OS for a free port.
    pub port: u16,

    /// Framing applied to every connection.
    pub framing: FramingMode,

    /// Timeout applied to every read and write. `None` disables timeouts.
    ///
    /// A read that sees no data within the timeout disconnects the client.
    pub timeout: Option<Duration>,

    /// Largest frame accepted from a client.
    pub max_frame_len: usize,

    /// Size of the buffer each read fills.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: None,
            port: 0,
            framing: FramingMode::Slip,
            timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_size: 4096,
        }
    }
}

impl ServerConfig {
    /// Create a configuration for `port` using `framing`.
    pub fn new(port: u16, framing: FramingMode) -> Self {
        Self {
            port,
            framing,
            ..Self::default()
        }
    }

    /// Bind to a specific interface instead of all interfaces.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the read/write timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the read/write timeout in seconds; a negative value disables it.
    pub fn with_timeout_secs(mut self, seconds: f64) -> Self {
        self.timeout = timeout_from_secs(seconds);
        self
    }

    /// Set the largest accepted frame.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Create a configuration for a loopback-only server.
    pub fn local_network(port: u16, framing: FramingMode) -> Self {
        Self::new(port, framing).with_interface("127.0.0.1")
    }

    /// The `host:port` string handed to the network provider.
    pub fn bind_address(&self) -> String {
        match self.interface.as_deref() {
            None => format!("0.0.0.0:{}", self.port),
            Some(host) if host.contains(':') && !host.starts_with('[') => {
                format!("[{}]:{}", host, self.port)
            }
            Some(host) => format!("{}:{}", host, self.port),
        }
    }
}

/// Convert a timeout in seconds, negative meaning "no timeout".
pub(crate) fn timeout_from_secs(seconds: f64) -> Option<Duration> {
    if seconds < 0.0 || !seconds.is_finite() {
        None
    } else {
        Some(Duration::from_secs_f64(seconds))
    }
}
