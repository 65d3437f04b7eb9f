//! Bus connection layer
//!
//! - [`BusConnection`]: lifecycle manager owning one bus handle, its match
//!   rules and the inbound signal queue
//! - [`BusClient`] / [`BusConnector`]: transport seam
//! - `MockBus`: in-memory transport (feature `mock-bus`)
//! - `ZbusConnector`: real transport (feature `zbus-transport`)

pub mod address;
pub mod client;
pub mod connection;
#[cfg(feature = "mock-bus")]
pub mod mock;
pub mod signal;
#[cfg(feature = "zbus-transport")]
pub mod zbus_transport;

pub use address::{BusAddress, Ownership, SharedBus};
pub use client::{
    BusClient, BusConnector, BusStats, MethodCall, TransportError, TransportResult,
};
pub use connection::{BusConnection, ConnectionStatus, RuleFailure, RuleRemovalReport};
#[cfg(feature = "mock-bus")]
pub use mock::{MockBus, MockConnector, MockOp};
pub use signal::{
    OverflowPolicy, PushOutcome, Signal, SignalQueue, SignalSink, DEFAULT_SIGNAL_CAPACITY,
};
#[cfg(feature = "zbus-transport")]
pub use zbus_transport::ZbusConnector;

use thiserror::Error;

/// Errors raised by the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation needs an open connection
    #[error("connection is not open")]
    NotOpen,

    #[error("failed to connect to the {bus} bus: {source}")]
    SharedBus {
        bus: SharedBus,
        #[source]
        source: TransportError,
    },

    #[error("failed to dial {address:?}: {source}")]
    Dial {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("authentication with {address:?} failed: {source}")]
    Auth {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("hello to {address:?} failed: {source}")]
    Hello {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to watch signals on {address:?}: {source}")]
    Watch {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("add match {rule:?} failed: {source}")]
    AddMatch {
        rule: String,
        #[source]
        source: TransportError,
    },

    #[error("remove match {rule:?} failed: {source}")]
    RemoveMatch {
        rule: String,
        #[source]
        source: TransportError,
    },

    #[error("call {method} on {destination} {path} failed: {source}")]
    Call {
        destination: String,
        path: String,
        method: String,
        #[source]
        source: TransportError,
    },

    #[error("closing {address:?} failed: {source}")]
    Close {
        address: String,
        #[source]
        source: TransportError,
    },
}
