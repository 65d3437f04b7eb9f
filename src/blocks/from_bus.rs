//! Inbound block: bus signals into the pipeline
//!
//! Rule: `{ "BusName": <address>, "Filter": <match rule> }`.
//!
//! Each signal matching the filter is emitted as
//! `{ "sender", "path", "name", "body" }`.

use crossbeam_channel::Receiver;
use serde_json::json;

use super::{parse_string, spawn, BlockError, BlockHandle, BlockWorker, Message, OutputSender};
use crate::bus::{BusConnection, Signal};
use crate::config::{DEFAULT_ADDRESS, DEFAULT_FILTER};

/// Inbound block
pub struct FromBus {
    conn: BusConnection,
    address: String,
    filter: String,
}

impl FromBus {
    /// Start the block on its own thread
    ///
    /// The connection stays closed until the first rule arrives.
    pub fn spawn(conn: BusConnection) -> BlockHandle {
        spawn(Self {
            conn,
            address: DEFAULT_ADDRESS.to_string(),
            filter: DEFAULT_FILTER.to_string(),
        })
    }

    /// Rule message selecting `filter` on `address`
    pub fn rule(address: &str, filter: &str) -> Message {
        json!({ "BusName": address, "Filter": filter })
    }

    fn reconnect(&mut self, address: &str) -> Result<(), BlockError> {
        if self.conn.is_open() {
            match self.conn.shutdown() {
                Ok(report) if !report.is_clean() => tracing::warn!(
                    "{} match rules could not be removed from {}",
                    report.failures.len(),
                    self.address
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Error closing {}: {}", self.address, e),
            }
        }
        // open() also starts watching for signals
        self.conn.open(address)?;
        self.address = address.to_string();
        Ok(())
    }
}

impl BlockWorker for FromBus {
    const NAME: &'static str = "from-bus";
    const HAS_INPUT: bool = false;

    fn apply_rule(&mut self, rule: &Message) -> Result<(), BlockError> {
        let address = parse_string(rule, "BusName")?;
        let filter = parse_string(rule, "Filter")?;

        let mut created = false;
        if !self.conn.is_open() || self.address != address {
            self.reconnect(address)?;
            created = true;
        }

        // a failed insert leaves the old filter recorded but not registered
        if created || self.filter != filter || !self.conn.has_rule(filter) {
            self.conn.remove_match_rule(&self.filter)?;
            self.conn.insert_match_rule(filter)?;
            tracing::info!("Listening on {} for {}", self.address, filter);
            self.filter = filter.to_string();
        }
        Ok(())
    }

    fn parameters(&self) -> Message {
        Self::rule(&self.address, &self.filter)
    }

    fn handle_signal(&mut self, signal: Signal, out: &OutputSender) {
        tracing::trace!("Forwarding signal {} from {}", signal.name, signal.sender);
        out.message(signal.to_json());
    }

    fn signals(&self) -> Option<Receiver<Signal>> {
        Some(self.conn.signals().clone())
    }

    fn teardown(&mut self) {
        if let Err(e) = self.conn.shutdown() {
            tracing::warn!("Error closing {}: {}", self.address, e);
        }
    }
}
