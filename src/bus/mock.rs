//! Mock Bus Implementation for Testing
//!
//! An in-memory bus that implements [`BusConnector`] and [`BusClient`]
//! without any IPC. It records every dial, close, match rule and method call
//! so tests can assert on what reached the "bus".
//!
//! # Features
//!
//! - **Failure injection**: make any operation fail with [`MockBus::fail`]
//! - **Canned replies**: queue method-call replies with [`MockBus::push_reply`]
//! - **Signal emission**: deliver a signal to every watching handle with
//!   [`MockBus::emit_signal`]
//! - **Realistic match rules**: removing an unknown rule fails, like a real
//!   bus daemon
//!
//! # Example
//!
//! ```
//! use busbridge_rs::bus::{BusConnection, MockBus};
//!
//! let bus = MockBus::new();
//! let mut conn = BusConnection::new(Box::new(bus.connector()));
//! conn.open("@session").unwrap();
//! conn.insert_match_rule("type='signal'").unwrap();
//! assert_eq!(bus.registered_rules(), vec!["type='signal'".to_string()]);
//! ```
//!
//! # Enabling
//!
//! Available with the `mock-bus` feature, which is on by default.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::address::SharedBus;
use super::client::{BusClient, BusConnector, MethodCall, TransportError, TransportResult};
use super::signal::{PushOutcome, Signal, SignalSink};
use crate::types::BusValue;

/// Operations whose failure can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Shared,
    Dial,
    Authenticate,
    Hello,
    AddMatch,
    RemoveMatch,
    Call,
    Watch,
    Close,
}

#[derive(Default)]
struct MockState {
    failures: HashSet<MockOp>,
    dials: Vec<String>,
    shared_opens: Vec<SharedBus>,
    exclusive_closes: usize,
    /// rule -> registration count, as the daemon would track it
    rules: BTreeMap<String, usize>,
    add_match_calls: usize,
    remove_match_calls: usize,
    calls: Vec<MethodCall>,
    replies: VecDeque<Vec<BusValue>>,
    sinks: Vec<(u64, SignalSink)>,
    next_id: u64,
    live_handles: usize,
}

/// Shared handle to the in-memory bus; clones observe the same state
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector producing handles onto this bus
    pub fn connector(&self) -> MockConnector {
        MockConnector { bus: self.clone() }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: MockOp) -> TransportResult<()> {
        if self.lock().failures.contains(&op) {
            Err(TransportError::new(format!("injected {:?} failure", op)))
        } else {
            Ok(())
        }
    }

    /// Make `op` fail until [`recover`](Self::recover) is called
    pub fn fail(&self, op: MockOp) {
        self.lock().failures.insert(op);
    }

    pub fn recover(&self, op: MockOp) {
        self.lock().failures.remove(&op);
    }

    /// Queue a reply for the next method call (default reply is empty)
    pub fn push_reply(&self, reply: Vec<BusValue>) {
        self.lock().replies.push_back(reply);
    }

    /// Deliver a signal to every watching handle, returning how many took it
    pub fn emit_signal(&self, signal: Signal) -> usize {
        let sinks: Vec<SignalSink> = self.lock().sinks.iter().map(|(_, s)| s.clone()).collect();
        sinks
            .iter()
            .filter(|sink| sink.push(signal.clone()) != PushOutcome::Dropped)
            .count()
    }

    /// Addresses dialed, in order
    pub fn dials(&self) -> Vec<String> {
        self.lock().dials.clone()
    }

    /// Shared buses connected to, in order
    pub fn shared_opens(&self) -> Vec<SharedBus> {
        self.lock().shared_opens.clone()
    }

    /// How many exclusive handles were closed
    pub fn exclusive_closes(&self) -> usize {
        self.lock().exclusive_closes
    }

    /// Rules currently registered on the bus
    pub fn registered_rules(&self) -> Vec<String> {
        self.lock().rules.keys().cloned().collect()
    }

    pub fn add_match_calls(&self) -> usize {
        self.lock().add_match_calls
    }

    pub fn remove_match_calls(&self) -> usize {
        self.lock().remove_match_calls
    }

    /// Method calls received, in order
    pub fn method_calls(&self) -> Vec<MethodCall> {
        self.lock().calls.clone()
    }

    /// Handles created and not yet dropped
    pub fn live_handles(&self) -> usize {
        self.lock().live_handles
    }

    /// Handles currently watching for signals
    pub fn watchers(&self) -> usize {
        self.lock().sinks.len()
    }

    fn new_handle(&self, exclusive: bool) -> MockHandle {
        let mut state = self.lock();
        state.next_id += 1;
        state.live_handles += 1;
        MockHandle {
            bus: self.clone(),
            id: state.next_id,
            exclusive,
            closed: false,
        }
    }
}

/// [`BusConnector`] for a [`MockBus`]
pub struct MockConnector {
    bus: MockBus,
}

impl BusConnector for MockConnector {
    fn shared(&mut self, bus: SharedBus) -> TransportResult<Box<dyn BusClient>> {
        self.bus.check(MockOp::Shared)?;
        self.bus.lock().shared_opens.push(bus);
        Ok(Box::new(self.bus.new_handle(false)))
    }

    fn dial(&mut self, address: &str) -> TransportResult<Box<dyn BusClient>> {
        self.bus.check(MockOp::Dial)?;
        self.bus.lock().dials.push(address.to_string());
        Ok(Box::new(self.bus.new_handle(true)))
    }
}

/// One handle onto a [`MockBus`]
struct MockHandle {
    bus: MockBus,
    id: u64,
    exclusive: bool,
    closed: bool,
}

impl MockHandle {
    fn ensure_usable(&self) -> TransportResult<()> {
        if self.closed {
            Err(TransportError::new("handle is closed"))
        } else {
            Ok(())
        }
    }

    fn unwatch(&self) {
        self.bus.lock().sinks.retain(|(id, _)| *id != self.id);
    }
}

impl BusClient for MockHandle {
    fn authenticate(&mut self) -> TransportResult<()> {
        self.ensure_usable()?;
        self.bus.check(MockOp::Authenticate)
    }

    fn hello(&mut self) -> TransportResult<String> {
        self.ensure_usable()?;
        self.bus.check(MockOp::Hello)?;
        Ok(format!(":1.{}", self.id))
    }

    fn add_match(&mut self, rule: &str) -> TransportResult<()> {
        self.ensure_usable()?;
        self.bus.lock().add_match_calls += 1;
        self.bus.check(MockOp::AddMatch)?;
        *self.bus.lock().rules.entry(rule.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove_match(&mut self, rule: &str) -> TransportResult<()> {
        self.ensure_usable()?;
        self.bus.lock().remove_match_calls += 1;
        self.bus.check(MockOp::RemoveMatch)?;
        let mut state = self.bus.lock();
        match state.rules.get_mut(rule) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                state.rules.remove(rule);
                Ok(())
            }
            None => Err(TransportError::new(format!(
                "org.freedesktop.DBus.Error.MatchRuleNotFound: {}",
                rule
            ))),
        }
    }

    fn call_method(&mut self, call: &MethodCall) -> TransportResult<Vec<BusValue>> {
        self.ensure_usable()?;
        self.bus.lock().calls.push(call.clone());
        self.bus.check(MockOp::Call)?;
        Ok(self.bus.lock().replies.pop_front().unwrap_or_default())
    }

    fn watch_signals(&mut self, sink: SignalSink) -> TransportResult<()> {
        self.ensure_usable()?;
        self.bus.check(MockOp::Watch)?;
        self.unwatch();
        self.bus.lock().sinks.push((self.id, sink));
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.ensure_usable()?;
        self.bus.check(MockOp::Close)?;
        self.closed = true;
        self.unwatch();
        if self.exclusive {
            self.bus.lock().exclusive_closes += 1;
        }
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.unwatch();
        self.bus.lock().live_handles -= 1;
    }
}
