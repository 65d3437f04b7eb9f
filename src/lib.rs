//! # BusBridge-RS: Signature-driven Message Bus Bridge
//!
//! Moves data between a dataflow pipeline and a D-Bus style message bus.
//! Pipeline messages are untyped JSON; the bus is strictly typed by
//! signature strings such as `susssasa{sv}i`. This crate sits in between.
//!
//! ## Architecture
//!
//! - **Signature**: grammar parser, type resolver and value converter that
//!   coerce untyped values into typed bus values
//! - **Bus**: connection lifecycle manager with match-rule bookkeeping, a
//!   bounded inbound signal queue and a pluggable transport
//! - **Blocks**: worker threads adapting the bus to pipeline messages in both
//!   directions
//! - **Communication**: Crossbeam channels for thread-safe data transfer
//!
//! ## Configuration
//!
//! The bridge reads a TOML file from the platform config directory under
//! `busbridge-rs/config.toml`; see [`config`].
//!
//! ## Example
//!
//! ```
//! use busbridge_rs::signature::convert_all;
//! use busbridge_rs::types::{BusValue, Value};
//! use serde_json::json;
//!
//! let args: Vec<Value> = [json!("app"), json!(7)].iter().map(Value::from).collect();
//! let converted = convert_all("su", &args).unwrap();
//! assert_eq!(converted[1], BusValue::UInt32(7));
//! ```

pub mod blocks;
pub mod bus;
pub mod config;
pub mod error;
pub mod signature;
pub mod types;

// Re-export commonly used types
pub use blocks::{BlockHandle, BlockOutput, FromBus, ToBus};
pub use bus::{BusConnection, ConnectionError, Signal};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, ResultExt};
pub use signature::{convert, convert_all, ConversionError, ResolvedType, SignatureError};
pub use types::{BusValue, Value, Variant};
