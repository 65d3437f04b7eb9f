//! Outbound block: pipeline messages into method calls
//!
//! Rule: `{ "BusName", "Destination", "ObjectPath", "MethodName",
//! "Signature" }`, all required.
//!
//! Each input message carries its arguments in `args` (or `Arguments`) and
//! may override `Signature`, `Destination`, `ObjectPath` and `MethodName`
//! for that one call. The reply is emitted as `{ "result": [...] }`; a
//! failed call emits `{ "error": "..." }` and is also reported as an error.

use serde_json::json;

use super::{
    parse_array, parse_string, spawn, BlockError, BlockHandle, BlockWorker, Message, OutputSender,
};
use crate::bus::{BusConnection, ConnectionError, MethodCall};
use crate::config::{
    DEFAULT_ADDRESS, DEFAULT_DESTINATION, DEFAULT_METHOD, DEFAULT_OBJECT_PATH, DEFAULT_SIGNATURE,
};
use crate::signature::{check_signature, convert_all};
use crate::types::{BusValue, Value};

/// Call target and argument signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub destination: String,
    pub object_path: String,
    /// Fully qualified `interface.member`
    pub method: String,
    pub signature: String,
}

impl Default for CallTarget {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            object_path: DEFAULT_OBJECT_PATH.to_string(),
            method: DEFAULT_METHOD.to_string(),
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

/// Outbound block
pub struct ToBus {
    conn: BusConnection,
    address: String,
    target: CallTarget,
}

impl ToBus {
    /// Start the block on its own thread
    ///
    /// The connection stays closed until the first rule arrives.
    pub fn spawn(conn: BusConnection) -> BlockHandle {
        spawn(Self {
            conn,
            address: DEFAULT_ADDRESS.to_string(),
            target: CallTarget::default(),
        })
    }

    /// Rule message calling `target` on `address`
    pub fn rule(address: &str, target: &CallTarget) -> Message {
        json!({
            "BusName": address,
            "Destination": target.destination,
            "ObjectPath": target.object_path,
            "MethodName": target.method,
            "Signature": target.signature,
        })
    }

    /// The call target for one message, with its overrides applied
    fn target_for(&self, msg: &Message) -> Result<CallTarget, BlockError> {
        let mut target = self.target.clone();
        if let Some(signature) = optional_string(msg, "Signature") {
            check_signature(signature)?;
            target.signature = signature.to_string();
        }
        if let Some(destination) = optional_string(msg, "Destination") {
            target.destination = destination.to_string();
        }
        if let Some(path) = optional_string(msg, "ObjectPath") {
            target.object_path = path.to_string();
        }
        if let Some(method) = optional_string(msg, "MethodName") {
            target.method = method.to_string();
        }
        Ok(target)
    }
}

/// A string field if present; anything else counts as absent
fn optional_string<'a>(msg: &'a Message, key: &str) -> Option<&'a str> {
    parse_string(msg, key).ok()
}

fn arguments(msg: &Message) -> Result<Vec<Value>, BlockError> {
    let args = match parse_array(msg, "args") {
        Err(BlockError::MissingField(_)) => parse_array(msg, "Arguments"),
        other => other,
    }?;
    Ok(args.iter().map(Value::from).collect())
}

impl BlockWorker for ToBus {
    const NAME: &'static str = "to-bus";
    const HAS_INPUT: bool = true;

    fn apply_rule(&mut self, rule: &Message) -> Result<(), BlockError> {
        let address = parse_string(rule, "BusName")?;
        let target = CallTarget {
            destination: parse_string(rule, "Destination")?.to_string(),
            object_path: parse_string(rule, "ObjectPath")?.to_string(),
            method: parse_string(rule, "MethodName")?.to_string(),
            signature: parse_string(rule, "Signature")?.to_string(),
        };
        check_signature(&target.signature)?;
        self.target = target;

        if !self.conn.is_open() || self.address != address {
            // open() tears down a connection to a different address first
            self.conn.open(address)?;
            self.address = address.to_string();
            tracing::info!("Calling {} on {}", self.target.method, self.address);
        }
        Ok(())
    }

    fn parameters(&self) -> Message {
        Self::rule(&self.address, &self.target)
    }

    fn handle_input(&mut self, msg: &Message, out: &OutputSender) -> Result<(), BlockError> {
        if !self.conn.is_open() {
            return Err(ConnectionError::NotOpen.into());
        }

        let target = self.target_for(msg)?;
        let args = convert_all(&target.signature, &arguments(msg)?)?;
        let call = MethodCall::new(target.destination, target.object_path, target.method, args);

        match self.conn.call(&call) {
            Ok(reply) => {
                let result: Vec<_> = reply.iter().map(BusValue::to_json).collect();
                out.message(json!({ "result": result }));
                Ok(())
            }
            Err(e) => {
                out.message(json!({ "error": e.to_string() }));
                Err(e.into())
            }
        }
    }

    fn teardown(&mut self) {
        if let Err(e) = self.conn.close() {
            tracing::warn!("Error closing {}: {}", self.address, e);
        }
    }
}
