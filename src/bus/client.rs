//! BusClient trait for a unified transport interface
//!
//! The connection manager talks to the bus only through these traits, so the
//! real transport and the in-memory `MockBus` (feature `mock-bus`) are
//! interchangeable.

use thiserror::Error;

use super::address::SharedBus;
use super::signal::SignalSink;
use crate::types::BusValue;

/// Failure reported by a transport
///
/// Deliberately just a message: the connection manager adds the context
/// (which step, which rule, which address).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// A method call to send over the bus
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    /// Fully qualified `interface.member`
    pub method: String,
    pub args: Vec<BusValue>,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        method: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            method: method.into(),
            args,
        }
    }

    /// Split `method` into interface and member at the last dot
    ///
    /// Returns `None` for the interface when the name is unqualified.
    pub fn interface_and_member(&self) -> (Option<&str>, &str) {
        match self.method.rsplit_once('.') {
            Some((interface, member)) => (Some(interface), member),
            None => (None, self.method.as_str()),
        }
    }
}

/// One live bus handle
///
/// Implementations must be `Send` so a handle can be moved into a worker
/// thread.
#[cfg_attr(test, mockall::automock)]
pub trait BusClient: Send {
    /// Run the authentication handshake (dialed connections only)
    fn authenticate(&mut self) -> TransportResult<()>;

    /// Send the hello call, returning the unique name the bus assigned
    fn hello(&mut self) -> TransportResult<String>;

    /// Register a match rule with the bus
    fn add_match(&mut self, rule: &str) -> TransportResult<()>;

    /// Unregister a match rule
    fn remove_match(&mut self, rule: &str) -> TransportResult<()>;

    /// Call a method and wait for its reply body
    fn call_method(&mut self, call: &MethodCall) -> TransportResult<Vec<BusValue>>;

    /// Start pushing inbound signals into `sink`
    fn watch_signals(&mut self, sink: SignalSink) -> TransportResult<()>;

    /// Release the underlying handle
    fn close(&mut self) -> TransportResult<()>;
}

/// Factory for bus handles
#[cfg_attr(test, mockall::automock)]
pub trait BusConnector: Send {
    /// Handle to a well-known shared bus
    fn shared(&mut self, bus: SharedBus) -> TransportResult<Box<dyn BusClient>>;

    /// Dial an address; the handle is not yet authenticated
    fn dial(&mut self, address: &str) -> TransportResult<Box<dyn BusClient>>;
}

/// Statistics for bus operations
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    /// Successful method calls
    pub calls_succeeded: u64,
    /// Failed method calls
    pub calls_failed: u64,
    /// Total time spent in successful calls (microseconds)
    pub total_call_time_us: u64,
    /// Duration of the most recent successful call (microseconds)
    pub last_call_time_us: u64,
    /// Match rules registered
    pub rules_added: u64,
    /// Match rules unregistered
    pub rules_removed: u64,
    /// Failed add/remove match calls
    pub rule_failures: u64,
    /// Connections established
    pub connections_opened: u64,
}

impl BusStats {
    /// Average successful call time in microseconds
    pub fn avg_call_time_us(&self) -> f64 {
        if self.calls_succeeded == 0 {
            0.0
        } else {
            self.total_call_time_us as f64 / self.calls_succeeded as f64
        }
    }

    /// Call success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.calls_succeeded + self.calls_failed;
        if total == 0 {
            100.0
        } else {
            (self.calls_succeeded as f64 / total as f64) * 100.0
        }
    }

    pub fn record_call_success(&mut self, time_us: u64) {
        self.calls_succeeded += 1;
        self.total_call_time_us += time_us;
        self.last_call_time_us = time_us;
    }

    pub fn record_call_failure(&mut self) {
        self.calls_failed += 1;
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
