//! Connection lifecycle manager
//!
//! [`BusConnection`] owns at most one bus handle at a time together with the
//! set of match rules registered through it and the inbound signal queue.
//!
//! # Lifecycle
//!
//! ```text
//! Closed --open()--> Opening --ok--> Open(Shared | OwnedExclusive)
//!                       |                    |
//!                       +--err--> Closed <---+--close()
//! ```
//!
//! Shared handles (`system`, `session`) are never closed here, only dropped.
//! Exclusive handles are dialed, authenticated and greeted with a hello
//! before use, and closed on teardown.
//!
//! # Match rules
//!
//! Insert and remove are idempotent. A rule is recorded only after the bus
//! accepted it and forgotten only after the bus confirmed its removal, with
//! one exception: a forced [`remove_all_match_rules`] clears the record no
//! matter what, so teardown always makes progress. Individual failures are
//! still collected in the returned [`RuleRemovalReport`].
//!
//! # Concurrency
//!
//! All control operations take `&mut self`; callers serialize them. The only
//! concurrent boundary is the signal queue, whose producer side lives in the
//! transport.
//!
//! [`remove_all_match_rules`]: BusConnection::remove_all_match_rules

use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::time::Instant;

use super::address::{BusAddress, Ownership};
use super::client::{BusClient, BusConnector, BusStats, MethodCall};
use super::signal::{OverflowPolicy, Signal, SignalQueue, DEFAULT_SIGNAL_CAPACITY};
use super::ConnectionError;
use crate::types::BusValue;

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Closed,
    Opening,
    Open(Ownership),
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Closed => write!(f, "Closed"),
            ConnectionStatus::Opening => write!(f, "Opening"),
            ConnectionStatus::Open(Ownership::Shared) => write!(f, "Open (shared)"),
            ConnectionStatus::Open(Ownership::OwnedExclusive) => write!(f, "Open (exclusive)"),
        }
    }
}

/// A rule whose removal failed during a forced teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: String,
    pub error: ConnectionError,
}

/// Outcome of [`BusConnection::remove_all_match_rules`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleRemovalReport {
    /// Rules the bus confirmed as removed
    pub removed: Vec<String>,
    /// Rules whose removal failed (forced mode only)
    pub failures: Vec<RuleFailure>,
}

impl RuleRemovalReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct OpenHandle {
    address: String,
    ownership: Ownership,
    unique_name: Option<String>,
    client: Box<dyn BusClient>,
}

enum State {
    Closed,
    Opening,
    Open(OpenHandle),
}

/// Bus connection with match-rule bookkeeping
pub struct BusConnection {
    connector: Box<dyn BusConnector>,
    state: State,
    rules: BTreeSet<String>,
    queue: SignalQueue,
    stats: BusStats,
}

impl BusConnection {
    /// Create a closed connection with the default signal queue
    pub fn new(connector: Box<dyn BusConnector>) -> Self {
        Self::with_queue(connector, DEFAULT_SIGNAL_CAPACITY, OverflowPolicy::default())
    }

    /// Create a closed connection with a custom signal queue
    pub fn with_queue(
        connector: Box<dyn BusConnector>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            connector,
            state: State::Closed,
            rules: BTreeSet::new(),
            queue: SignalQueue::new(capacity, policy),
            stats: BusStats::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match &self.state {
            State::Closed => ConnectionStatus::Closed,
            State::Opening => ConnectionStatus::Opening,
            State::Open(handle) => ConnectionStatus::Open(handle.ownership),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Address the connection was opened with
    pub fn address(&self) -> Option<&str> {
        match &self.state {
            State::Open(handle) => Some(&handle.address),
            _ => None,
        }
    }

    pub fn ownership(&self) -> Option<Ownership> {
        match &self.state {
            State::Open(handle) => Some(handle.ownership),
            _ => None,
        }
    }

    /// Unique name from the hello call (exclusive connections only)
    pub fn unique_name(&self) -> Option<&str> {
        match &self.state {
            State::Open(handle) => handle.unique_name.as_deref(),
            _ => None,
        }
    }

    /// Currently registered match rules, sorted
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(String::as_str)
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.rules.contains(rule)
    }

    /// Receiver for inbound signals
    ///
    /// The same receiver serves every connection this manager opens.
    pub fn signals(&self) -> &Receiver<Signal> {
        self.queue.receiver()
    }

    pub fn signal_queue(&self) -> &SignalQueue {
        &self.queue
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Open a connection to `address`
    ///
    /// A no-op if already open on the same address. If open on a different
    /// address, the previous connection is torn down first (forced rule
    /// removal, then close). On failure the connection is left closed.
    pub fn open(&mut self, address: &str) -> Result<(), ConnectionError> {
        if let State::Open(handle) = &self.state {
            if handle.address == address {
                tracing::debug!("Bus connection already open on {}", address);
                return Ok(());
            }
            tracing::info!(
                "Switching bus connection from {} to {}",
                handle.address,
                address
            );
            if let Err(e) = self.shutdown() {
                tracing::warn!("Error closing previous bus connection: {}", e);
            }
        }

        let target = BusAddress::classify(address);
        tracing::info!("Opening bus connection to {}", target);
        self.state = State::Opening;

        match self.establish(address, &target) {
            Ok(handle) => {
                tracing::info!(
                    "Bus connection open on {} ({:?})",
                    address,
                    handle.ownership
                );
                self.stats.connections_opened += 1;
                self.state = State::Open(handle);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to open bus connection to {}: {}", address, e);
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    fn establish(
        &mut self,
        address: &str,
        target: &BusAddress,
    ) -> Result<OpenHandle, ConnectionError> {
        let (mut client, unique_name) = match target {
            BusAddress::Shared(bus) => {
                let client = self
                    .connector
                    .shared(*bus)
                    .map_err(|source| ConnectionError::SharedBus { bus: *bus, source })?;
                (client, None)
            }
            BusAddress::Dial(dial_address) => {
                let mut client = self.connector.dial(dial_address).map_err(|source| {
                    ConnectionError::Dial {
                        address: address.to_string(),
                        source,
                    }
                })?;
                tracing::debug!("Dialed {}, authenticating", address);

                if let Err(source) = client.authenticate() {
                    release(client, address);
                    return Err(ConnectionError::Auth {
                        address: address.to_string(),
                        source,
                    });
                }

                let name = match client.hello() {
                    Ok(name) => name,
                    Err(source) => {
                        release(client, address);
                        return Err(ConnectionError::Hello {
                            address: address.to_string(),
                            source,
                        });
                    }
                };
                tracing::debug!("Hello on {} assigned unique name {}", address, name);
                (client, Some(name))
            }
        };

        let ownership = target.ownership();
        if let Err(source) = client.watch_signals(self.queue.sink()) {
            if ownership == Ownership::OwnedExclusive {
                release(client, address);
            }
            return Err(ConnectionError::Watch {
                address: address.to_string(),
                source,
            });
        }

        Ok(OpenHandle {
            address: address.to_string(),
            ownership,
            unique_name,
            client,
        })
    }

    /// Close the connection
    ///
    /// Shared handles are only dropped; exclusive handles are closed. Local
    /// state, including the match-rule record, is cleared either way. Closing
    /// a closed connection is a no-op.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        let state = std::mem::replace(&mut self.state, State::Closed);
        if !self.rules.is_empty() {
            tracing::debug!(
                "Forgetting {} match rules without removing them",
                self.rules.len()
            );
            self.rules.clear();
        }

        let handle = match state {
            State::Open(handle) => handle,
            State::Closed | State::Opening => return Ok(()),
        };

        match handle.ownership {
            Ownership::Shared => {
                tracing::info!("Released shared bus connection {}", handle.address);
                Ok(())
            }
            Ownership::OwnedExclusive => {
                let OpenHandle {
                    address,
                    mut client,
                    ..
                } = handle;
                client.close().map_err(|source| ConnectionError::Close {
                    address: address.clone(),
                    source,
                })?;
                tracing::info!("Closed bus connection {}", address);
                Ok(())
            }
        }
    }

    /// Forced rule teardown followed by [`close`](Self::close)
    pub fn shutdown(&mut self) -> Result<RuleRemovalReport, ConnectionError> {
        let report = self.remove_all_match_rules(true)?;
        self.close()?;
        Ok(report)
    }

    /// Register a match rule
    ///
    /// A no-op if the rule is already registered. Fails with
    /// [`ConnectionError::NotOpen`] on a closed connection.
    pub fn insert_match_rule(&mut self, rule: &str) -> Result<(), ConnectionError> {
        if self.rules.contains(rule) {
            tracing::trace!("Match rule already registered: {}", rule);
            return Ok(());
        }

        let handle = self.handle_mut()?;
        match handle.client.add_match(rule) {
            Ok(()) => {
                tracing::debug!("Added match rule: {}", rule);
                self.rules.insert(rule.to_string());
                self.stats.rules_added += 1;
                Ok(())
            }
            Err(source) => {
                self.stats.rule_failures += 1;
                Err(ConnectionError::AddMatch {
                    rule: rule.to_string(),
                    source,
                })
            }
        }
    }

    /// Unregister a match rule
    ///
    /// A no-op if the rule is not registered.
    pub fn remove_match_rule(&mut self, rule: &str) -> Result<(), ConnectionError> {
        if !self.rules.contains(rule) {
            return Ok(());
        }

        let handle = match &mut self.state {
            State::Open(handle) => handle,
            // close() clears the record, so this only guards against drift
            _ => {
                self.rules.remove(rule);
                return Ok(());
            }
        };

        match handle.client.remove_match(rule) {
            Ok(()) => {
                tracing::debug!("Removed match rule: {}", rule);
                self.rules.remove(rule);
                self.stats.rules_removed += 1;
                Ok(())
            }
            Err(source) => {
                self.stats.rule_failures += 1;
                Err(ConnectionError::RemoveMatch {
                    rule: rule.to_string(),
                    source,
                })
            }
        }
    }

    /// Unregister every recorded rule
    ///
    /// Without `force`, stops at the first failure and returns it; rules
    /// removed before that point are already gone from the record. With
    /// `force`, attempts every rule, then clears the record unconditionally.
    /// This is intentionally lossy: failures do not stop the teardown but are
    /// listed in the report.
    pub fn remove_all_match_rules(
        &mut self,
        force: bool,
    ) -> Result<RuleRemovalReport, ConnectionError> {
        let rules: Vec<String> = self.rules.iter().cloned().collect();
        let mut report = RuleRemovalReport::default();

        for rule in rules {
            match self.remove_match_rule(&rule) {
                Ok(()) => report.removed.push(rule),
                Err(error) if force => {
                    tracing::warn!("Ignoring match rule removal failure: {}", error);
                    report.failures.push(RuleFailure { rule, error });
                }
                Err(error) => return Err(error),
            }
        }

        if force {
            self.rules.clear();
        }
        Ok(report)
    }

    /// Call a method over the open connection
    pub fn call(&mut self, call: &MethodCall) -> Result<Vec<BusValue>, ConnectionError> {
        let handle = self.handle_mut()?;
        let start = Instant::now();
        let result = handle.client.call_method(call);

        match result {
            Ok(reply) => {
                let elapsed = start.elapsed().as_micros() as u64;
                tracing::trace!("{} returned {} values in {}us", call.method, reply.len(), elapsed);
                self.stats.record_call_success(elapsed);
                Ok(reply)
            }
            Err(source) => {
                self.stats.record_call_failure();
                Err(ConnectionError::Call {
                    destination: call.destination.clone(),
                    path: call.path.clone(),
                    method: call.method.clone(),
                    source,
                })
            }
        }
    }

    fn handle_mut(&mut self) -> Result<&mut OpenHandle, ConnectionError> {
        match &mut self.state {
            State::Open(handle) => Ok(handle),
            _ => Err(ConnectionError::NotOpen),
        }
    }
}

impl Drop for BusConnection {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.shutdown() {
                tracing::warn!("Error closing bus connection on drop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("status", &self.status())
            .field("address", &self.address())
            .field("rules", &self.rules)
            .field("queued_signals", &self.queue.len())
            .finish()
    }
}

/// Close a partially constructed handle, logging any failure
fn release(mut client: Box<dyn BusClient>, address: &str) {
    if let Err(e) = client.close() {
        tracing::warn!("Failed to release handle for {}: {}", address, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::address::SharedBus;
    use crate::bus::client::{MockBusClient, MockBusConnector, TransportError};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn shared_client() -> MockBusClient {
        let mut client = MockBusClient::new();
        client.expect_watch_signals().returning(|_| Ok(()));
        client.expect_close().never();
        client
    }

    fn connection_with(client: MockBusClient) -> BusConnection {
        let mut connector = MockBusConnector::new();
        connector
            .expect_shared()
            .with(eq(SharedBus::Session))
            .return_once(move |_| Ok(Box::new(client)));
        BusConnection::new(Box::new(connector))
    }

    fn fail(message: &str) -> TransportError {
        TransportError::new(message)
    }

    #[test]
    fn test_starts_closed() {
        let conn = BusConnection::new(Box::new(MockBusConnector::new()));
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert!(!conn.is_open());
        assert_eq!(conn.address(), None);
    }

    #[test]
    fn test_open_shared_session() {
        let mut conn = connection_with(shared_client());
        conn.open("@Session").unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Open(Ownership::Shared));
        assert_eq!(conn.address(), Some("@Session"));
        assert_eq!(conn.unique_name(), None);
        assert_eq!(conn.stats().connections_opened, 1);
    }

    #[test]
    fn test_open_same_address_is_noop() {
        // expect_shared is a return_once, so a second connect would panic
        let mut conn = connection_with(shared_client());
        conn.open("session").unwrap();
        conn.open("session").unwrap();
        assert!(conn.is_open());
    }

    #[test]
    fn test_open_exclusive_runs_handshake_in_order() {
        let mut seq = Sequence::new();
        let mut client = MockBusClient::new();
        client
            .expect_authenticate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        client
            .expect_hello()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(":1.7".to_string()));
        client
            .expect_watch_signals()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client.expect_close().times(1).returning(|| Ok(()));

        let mut connector = MockBusConnector::new();
        connector
            .expect_dial()
            .with(eq("unix:path=/tmp/bus"))
            .return_once(move |_| Ok(Box::new(client)));

        let mut conn = BusConnection::new(Box::new(connector));
        conn.open("unix:path=/tmp/bus").unwrap();
        assert_eq!(
            conn.status(),
            ConnectionStatus::Open(Ownership::OwnedExclusive)
        );
        assert_eq!(conn.unique_name(), Some(":1.7"));

        conn.close().unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_dial_failure_leaves_closed() {
        let mut connector = MockBusConnector::new();
        connector
            .expect_dial()
            .return_once(|_| Err(fail("connection refused")));
        let mut conn = BusConnection::new(Box::new(connector));

        let err = conn.open("tcp:host=nowhere").unwrap_err();
        assert!(matches!(err, ConnectionError::Dial { .. }));
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_auth_failure_releases_handle() {
        let mut client = MockBusClient::new();
        client
            .expect_authenticate()
            .returning(|| Err(fail("rejected")));
        client.expect_hello().never();
        client.expect_close().times(1).returning(|| Ok(()));

        let mut connector = MockBusConnector::new();
        connector
            .expect_dial()
            .return_once(move |_| Ok(Box::new(client)));
        let mut conn = BusConnection::new(Box::new(connector));

        assert!(matches!(
            conn.open("tcp:host=x"),
            Err(ConnectionError::Auth { .. })
        ));
        assert!(!conn.is_open());
    }

    #[test]
    fn test_hello_failure_releases_handle() {
        let mut client = MockBusClient::new();
        client.expect_authenticate().returning(|| Ok(()));
        client.expect_hello().returning(|| Err(fail("no reply")));
        client.expect_close().times(1).returning(|| Ok(()));

        let mut connector = MockBusConnector::new();
        connector
            .expect_dial()
            .return_once(move |_| Ok(Box::new(client)));
        let mut conn = BusConnection::new(Box::new(connector));

        assert!(matches!(
            conn.open("tcp:host=x"),
            Err(ConnectionError::Hello { .. })
        ));
        assert!(!conn.is_open());
    }

    #[test]
    fn test_insert_rule_is_idempotent() {
        let mut client = shared_client();
        client
            .expect_add_match()
            .with(eq("type='signal'"))
            .times(1)
            .returning(|_| Ok(()));
        client.expect_remove_match().returning(|_| Ok(()));
        let mut conn = connection_with(client);
        conn.open("session").unwrap();

        conn.insert_match_rule("type='signal'").unwrap();
        conn.insert_match_rule("type='signal'").unwrap();
        assert!(conn.has_rule("type='signal'"));
        assert_eq!(conn.stats().rules_added, 1);
    }

    #[test]
    fn test_insert_failure_not_recorded() {
        let mut client = shared_client();
        client
            .expect_add_match()
            .returning(|_| Err(fail("bad rule")));
        let mut conn = connection_with(client);
        conn.open("session").unwrap();

        assert!(matches!(
            conn.insert_match_rule("garbage"),
            Err(ConnectionError::AddMatch { .. })
        ));
        assert!(!conn.has_rule("garbage"));
    }

    #[test]
    fn test_insert_on_closed_connection() {
        let mut conn = BusConnection::new(Box::new(MockBusConnector::new()));
        assert_eq!(
            conn.insert_match_rule("type='signal'"),
            Err(ConnectionError::NotOpen)
        );
        assert_eq!(conn.rules().count(), 0);
    }

    #[test]
    fn test_remove_absent_rule_is_noop() {
        let mut client = shared_client();
        client.expect_remove_match().never();
        let mut conn = connection_with(client);
        conn.open("session").unwrap();
        conn.remove_match_rule("never-added").unwrap();

        let mut closed = BusConnection::new(Box::new(MockBusConnector::new()));
        closed.remove_match_rule("never-added").unwrap();
    }

    #[test]
    fn test_remove_failure_keeps_rule() {
        let mut client = shared_client();
        client.expect_add_match().returning(|_| Ok(()));
        client
            .expect_remove_match()
            .returning(|_| Err(fail("bus busy")));
        let mut conn = connection_with(client);
        conn.open("session").unwrap();
        conn.insert_match_rule("r").unwrap();

        assert!(conn.remove_match_rule("r").is_err());
        assert!(conn.has_rule("r"));
    }

    #[test]
    fn test_remove_all_not_forced_stops_at_first_failure() {
        let mut client = shared_client();
        client.expect_add_match().returning(|_| Ok(()));
        // rules are visited in sorted order: a, b, c
        client
            .expect_remove_match()
            .with(eq("a"))
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_remove_match()
            .with(eq("b"))
            .times(1)
            .returning(|_| Err(fail("nope")));
        client.expect_remove_match().with(eq("c")).never();
        let mut conn = connection_with(client);
        conn.open("session").unwrap();
        for rule in ["a", "b", "c"] {
            conn.insert_match_rule(rule).unwrap();
        }

        let err = conn.remove_all_match_rules(false).unwrap_err();
        assert!(matches!(err, ConnectionError::RemoveMatch { ref rule, .. } if rule == "b"));
        assert_eq!(conn.rules().collect::<Vec<_>>(), vec!["b", "c"]);

        // forget the rest without touching the bus again
        conn.close().unwrap();
    }

    #[test]
    fn test_remove_all_forced_always_clears() {
        let mut client = shared_client();
        client.expect_add_match().returning(|_| Ok(()));
        client
            .expect_remove_match()
            .times(3)
            .returning(|_| Err(fail("gone")));
        let mut conn = connection_with(client);
        conn.open("session").unwrap();
        for rule in ["a", "b", "c"] {
            conn.insert_match_rule(rule).unwrap();
        }

        let report = conn.remove_all_match_rules(true).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert!(!report.is_clean());
        assert_eq!(conn.rules().count(), 0);
    }

    #[test]
    fn test_close_shared_clears_state() {
        let mut client = shared_client();
        client.expect_add_match().returning(|_| Ok(()));
        let mut conn = connection_with(client);
        conn.open("session").unwrap();
        conn.insert_match_rule("r").unwrap();

        conn.close().unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert_eq!(conn.rules().count(), 0);
        // closing again is fine
        conn.close().unwrap();
    }

    #[test]
    fn test_reopen_with_new_address_tears_down_previous() {
        let mut seq = Sequence::new();

        let mut first = MockBusClient::new();
        first.expect_authenticate().returning(|| Ok(()));
        first.expect_hello().returning(|| Ok(":1.1".into()));
        first.expect_watch_signals().returning(|_| Ok(()));
        first.expect_add_match().returning(|_| Ok(()));
        first
            .expect_remove_match()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        first
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut connector = MockBusConnector::new();
        connector
            .expect_dial()
            .with(eq("tcp:host=a"))
            .return_once(move |_| Ok(Box::new(first)));
        connector
            .expect_shared()
            .with(eq(SharedBus::System))
            .return_once(move |_| Ok(Box::new(shared_client())));

        let mut conn = BusConnection::new(Box::new(connector));
        conn.open("tcp:host=a").unwrap();
        conn.insert_match_rule("r").unwrap();

        conn.open("@system").unwrap();
        assert_eq!(conn.address(), Some("@system"));
        assert_eq!(conn.ownership(), Some(Ownership::Shared));
        assert_eq!(conn.rules().count(), 0);
    }

    #[test]
    fn test_call_requires_open() {
        let mut conn = BusConnection::new(Box::new(MockBusConnector::new()));
        let call = MethodCall::new("a.b", "/", "a.b.C", vec![]);
        assert_eq!(conn.call(&call), Err(ConnectionError::NotOpen));
    }

    #[test]
    fn test_call_records_stats() {
        let mut client = shared_client();
        let mut replies = vec![Err(fail("timeout")), Ok(vec![BusValue::UInt32(3)])];
        client
            .expect_call_method()
            .times(2)
            .returning(move |_| replies.pop().unwrap());
        let mut conn = connection_with(client);
        conn.open("session").unwrap();

        let call = MethodCall::new("a.b", "/", "a.b.C", vec![]);
        assert_eq!(conn.call(&call).unwrap(), vec![BusValue::UInt32(3)]);
        assert!(matches!(
            conn.call(&call),
            Err(ConnectionError::Call { .. })
        ));
        assert_eq!(conn.stats().calls_succeeded, 1);
        assert_eq!(conn.stats().calls_failed, 1);
    }

    #[test]
    fn test_watch_failure_rolls_back() {
        let mut client = MockBusClient::new();
        client
            .expect_watch_signals()
            .returning(|_| Err(fail("no dispatcher")));
        client.expect_close().never();
        let mut conn = connection_with(client);

        assert!(matches!(
            conn.open("session"),
            Err(ConnectionError::Watch { .. })
        ));
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }
}
