//! Pipeline blocks
//!
//! A block is a worker thread owning one [`BusConnection`]. It is driven by
//! a `select!` loop over an ordered control channel and the connection's
//! signal queue, and talks to the rest of the pipeline through JSON messages.
//!
//! [`BusConnection`]: crate::bus::BusConnection
//!
//! # Architecture
//!
//! ```text
//!  rule | query | in | quit ──┐
//!                             ├──> worker thread ──> outputs (Message | Error)
//!  bus signals ───────────────┘         │
//!                                  BusConnection
//! ```
//!
//! - [`FromBus`] - forwards signals matching a filter into the pipeline
//! - [`ToBus`] - turns pipeline messages into method calls
//! - [`BlockHandle`] - pipeline-side handle for sending rules, queries and
//!   messages and for receiving outputs
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "mock-bus")]
//! # fn main() {
//! use busbridge_rs::blocks::{BlockOutput, FromBus};
//! use busbridge_rs::bus::{BusConnection, MockBus, Signal};
//! use serde_json::json;
//!
//! let bus = MockBus::new();
//! let mut block = FromBus::spawn(BusConnection::new(Box::new(bus.connector())));
//! block.set_rule(json!({ "BusName": "@session", "Filter": "type='signal'" }));
//!
//! // the query is answered after the rule has been applied
//! let params = block.query().unwrap();
//! assert_eq!(params["Filter"], "type='signal'");
//!
//! bus.emit_signal(Signal {
//!     sender: ":1.5".into(),
//!     path: "/".into(),
//!     name: "org.example.Ping".into(),
//!     body: vec![],
//! });
//! block.shutdown();
//! let outputs = block.drain();
//! assert!(matches!(&outputs[0], BlockOutput::Message(m) if m["name"] == "org.example.Ping"));
//! # }
//! # #[cfg(not(feature = "mock-bus"))]
//! # fn main() {}
//! ```

pub mod from_bus;
pub mod to_bus;

pub use from_bus::FromBus;
pub use to_bus::{CallTarget, ToBus};

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::bus::{ConnectionError, Signal};
use crate::signature::ConversionError;

/// A pipeline message
pub type Message = serde_json::Value;

/// Capacity of the control channel
const CONTROL_CAPACITY: usize = 64;

/// Capacity of the output channel
pub const OUTPUT_CAPACITY: usize = 1024;

/// How long [`BlockHandle::query`] waits for the worker
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by blocks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("missing field {0:?}")]
    MissingField(String),

    #[error("field {field:?} must be {expected}, got {actual}")]
    WrongFieldType {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The block does not accept pipeline messages
    #[error("{0} has no input")]
    NoInput(&'static str),

    /// The worker thread has exited
    #[error("{0} has stopped")]
    Stopped(&'static str),
}

/// Something a block produced
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutput {
    Message(Message),
    Error(String),
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn field<'a>(msg: &'a Message, key: &str) -> Result<&'a serde_json::Value, BlockError> {
    msg.get(key)
        .ok_or_else(|| BlockError::MissingField(key.to_string()))
}

/// Read a string field
pub fn parse_string<'a>(msg: &'a Message, key: &str) -> Result<&'a str, BlockError> {
    let value = field(msg, key)?;
    value.as_str().ok_or_else(|| BlockError::WrongFieldType {
        field: key.to_string(),
        expected: "string",
        actual: json_kind(value),
    })
}

/// Read an array field
pub fn parse_array<'a>(msg: &'a Message, key: &str) -> Result<&'a [serde_json::Value], BlockError> {
    let value = field(msg, key)?;
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| BlockError::WrongFieldType {
            field: key.to_string(),
            expected: "array",
            actual: json_kind(value),
        })
}

/// Sending half of a block's output channel
///
/// Never blocks: when the pipeline stops draining outputs they are dropped
/// and counted.
#[derive(Debug, Clone)]
pub struct OutputSender {
    block: &'static str,
    sender: Sender<BlockOutput>,
    dropped: Arc<AtomicU64>,
}

impl OutputSender {
    /// Emit a message
    pub fn message(&self, msg: Message) {
        self.send(BlockOutput::Message(msg));
    }

    /// Report an error
    pub fn error(&self, error: &dyn std::fmt::Display) {
        tracing::warn!("{}: {}", self.block, error);
        self.send(BlockOutput::Error(error.to_string()));
    }

    fn send(&self, output: BlockOutput) {
        match self.sender.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(block = self.block, dropped, "Output channel full");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::trace!("{}: output receiver gone", self.block);
            }
        }
    }
}

/// Behaviour plugged into the shared worker loop
pub(crate) trait BlockWorker: Send + 'static {
    const NAME: &'static str;

    /// Whether the block accepts pipeline messages
    const HAS_INPUT: bool;

    /// Apply new parameters
    fn apply_rule(&mut self, rule: &Message) -> Result<(), BlockError>;

    /// Current parameters, in rule form
    fn parameters(&self) -> Message;

    fn handle_input(&mut self, _msg: &Message, _out: &OutputSender) -> Result<(), BlockError> {
        Ok(())
    }

    fn handle_signal(&mut self, _signal: Signal, _out: &OutputSender) {}

    /// Inbound signals, when the block listens for them
    fn signals(&self) -> Option<Receiver<Signal>> {
        None
    }

    /// Release bus resources before the thread exits
    fn teardown(&mut self);
}

/// Requests from the pipeline, processed in the order sent
enum Control {
    Rule(Message),
    Query(Sender<Message>),
    Input(Message),
    Quit,
}

fn run<W: BlockWorker>(mut worker: W, control: Receiver<Control>, out: OutputSender) {
    tracing::info!("{} started", W::NAME);
    // the queue outlives every connection the worker opens
    let signals = worker.signals().unwrap_or_else(never);

    loop {
        select! {
            recv(control) -> request => match request {
                Ok(Control::Rule(rule)) => {
                    if let Err(e) = worker.apply_rule(&rule) {
                        out.error(&e);
                    }
                }
                Ok(Control::Query(reply)) => {
                    let _ = reply.send(worker.parameters());
                }
                Ok(Control::Input(msg)) => {
                    if let Err(e) = worker.handle_input(&msg, &out) {
                        out.error(&e);
                    }
                }
                Ok(Control::Quit) | Err(_) => break,
            },
            recv(signals) -> signal => {
                if let Ok(signal) = signal {
                    worker.handle_signal(signal, &out);
                }
            },
        }
    }

    // forward what already arrived before letting go of the bus
    for signal in signals.try_iter() {
        worker.handle_signal(signal, &out);
    }
    worker.teardown();
    tracing::info!("{} stopped", W::NAME);
}

pub(crate) fn spawn<W: BlockWorker>(worker: W) -> BlockHandle {
    let (control_tx, control_rx) = bounded(CONTROL_CAPACITY);
    let (output_tx, output_rx) = bounded(OUTPUT_CAPACITY);

    let out = OutputSender {
        block: W::NAME,
        sender: output_tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };

    let thread = std::thread::Builder::new()
        .name(W::NAME.to_string())
        .spawn(move || run(worker, control_rx, out));

    let thread = match thread {
        Ok(thread) => Some(thread),
        Err(e) => {
            tracing::error!("Failed to spawn {} thread: {}", W::NAME, e);
            None
        }
    };

    BlockHandle {
        name: W::NAME,
        has_input: W::HAS_INPUT,
        control: control_tx,
        outputs: output_rx,
        thread,
    }
}

/// Pipeline-side handle to a running block
///
/// Dropping the handle stops the block.
pub struct BlockHandle {
    name: &'static str,
    has_input: bool,
    control: Sender<Control>,
    outputs: Receiver<BlockOutput>,
    thread: Option<JoinHandle<()>>,
}

impl BlockHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Send new parameters; returns false if the block has stopped
    pub fn set_rule(&self, rule: Message) -> bool {
        self.control.send(Control::Rule(rule)).is_ok()
    }

    /// Ask the block for its current parameters
    ///
    /// Waits up to [`QUERY_TIMEOUT`]; `None` if the block has stopped.
    pub fn query(&self) -> Option<Message> {
        let (reply_tx, reply_rx) = bounded(1);
        self.control.send(Control::Query(reply_tx)).ok()?;
        reply_rx.recv_timeout(QUERY_TIMEOUT).ok()
    }

    /// Send a pipeline message to the block's input
    pub fn send(&self, msg: Message) -> Result<(), BlockError> {
        if !self.has_input {
            return Err(BlockError::NoInput(self.name));
        }
        self.control
            .send(Control::Input(msg))
            .map_err(|_| BlockError::Stopped(self.name))
    }

    /// Output receiver, for use in a `select!`
    pub fn outputs(&self) -> &Receiver<BlockOutput> {
        &self.outputs
    }

    /// Try to receive an output without blocking
    pub fn try_recv(&self) -> Option<BlockOutput> {
        self.outputs.try_recv().ok()
    }

    /// Receive all pending outputs
    pub fn drain(&self) -> Vec<BlockOutput> {
        self.outputs.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the block and wait for it to release the bus
    ///
    /// Requests sent before the call are processed first. Outputs stay
    /// available through [`drain`](Self::drain).
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.control.send(Control::Quit);
        if thread.join().is_err() {
            tracing::error!("{} thread panicked", self.name);
        }
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("pending_outputs", &self.outputs.len())
            .finish()
    }
}
