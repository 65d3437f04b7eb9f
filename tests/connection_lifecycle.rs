//! Connection lifecycle against the in-memory bus
//!
//! Covers opening shared and dialed connections, match-rule bookkeeping,
//! teardown and the inbound signal queue.

mod common;

use busbridge_rs::bus::{
    BusConnection, ConnectionError, ConnectionStatus, MethodCall, MockOp, OverflowPolicy,
    Ownership, SharedBus,
};
use busbridge_rs::types::BusValue;
use common::builders::SignalBuilder;
use common::mock_helpers::{mock_connection, open_mock_connection, small_queue_connection};

const RULE_A: &str = "type='signal',interface='org.example.A'";
const RULE_B: &str = "type='signal',interface='org.example.B'";
const DIAL: &str = "unix:path=/run/example/bus";

#[test]
fn test_well_known_addresses_share_the_bus() {
    for (address, bus) in [
        ("system", SharedBus::System),
        ("@SYSTEM", SharedBus::System),
        ("Session", SharedBus::Session),
        ("@session", SharedBus::Session),
    ] {
        let (mock, mut conn) = open_mock_connection(address);
        assert_eq!(conn.status(), ConnectionStatus::Open(Ownership::Shared));
        assert_eq!(mock.shared_opens(), vec![bus]);
        assert!(mock.dials().is_empty());
        assert_eq!(conn.unique_name(), None);

        conn.close().unwrap();
        assert_eq!(mock.exclusive_closes(), 0);
        assert_eq!(mock.live_handles(), 0);
    }
}

#[test]
fn test_other_addresses_are_dialed_and_owned() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    assert_eq!(conn.ownership(), Some(Ownership::OwnedExclusive));
    assert_eq!(mock.dials(), vec![DIAL.to_string()]);
    assert!(conn.unique_name().is_some_and(|n| n.starts_with(":1.")));
    assert_eq!(conn.address(), Some(DIAL));

    conn.close().unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    assert_eq!(mock.exclusive_closes(), 1);
    assert_eq!(mock.live_handles(), 0);

    // closing again is a no-op
    conn.close().unwrap();
    assert_eq!(mock.exclusive_closes(), 1);
}

#[test]
fn test_handshake_failures_roll_back() {
    for op in [MockOp::Dial, MockOp::Authenticate, MockOp::Hello, MockOp::Watch] {
        let (mock, mut conn) = mock_connection();
        mock.fail(op);

        let err = conn.open(DIAL).unwrap_err();
        let expected = match op {
            MockOp::Dial => matches!(err, ConnectionError::Dial { .. }),
            MockOp::Authenticate => matches!(err, ConnectionError::Auth { .. }),
            MockOp::Hello => matches!(err, ConnectionError::Hello { .. }),
            _ => matches!(err, ConnectionError::Watch { .. }),
        };
        assert!(expected, "{:?} produced {:?}", op, err);
        assert_eq!(conn.status(), ConnectionStatus::Closed);
        assert_eq!(mock.live_handles(), 0, "{:?} leaked a handle", op);
        assert_eq!(mock.watchers(), 0);

        // the manager never retries on its own, the caller does
        mock.recover(op);
        conn.open(DIAL).unwrap();
        assert!(conn.is_open());
    }
}

#[test]
fn test_shared_bus_failure_leaves_connection_closed() {
    let (mock, mut conn) = mock_connection();
    mock.fail(MockOp::Shared);

    let err = conn.open("@system").unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::SharedBus {
            bus: SharedBus::System,
            ..
        }
    ));
    assert!(!conn.is_open());
}

#[test]
fn test_rule_insert_is_idempotent() {
    let (mock, mut conn) = open_mock_connection("@session");

    conn.insert_match_rule(RULE_A).unwrap();
    conn.insert_match_rule(RULE_A).unwrap();

    assert_eq!(mock.add_match_calls(), 1);
    assert!(conn.has_rule(RULE_A));
    assert_eq!(mock.registered_rules(), vec![RULE_A.to_string()]);
}

#[test]
fn test_rule_remove_is_idempotent() {
    let (mock, mut conn) = open_mock_connection("@session");
    conn.insert_match_rule(RULE_A).unwrap();

    conn.remove_match_rule(RULE_A).unwrap();
    conn.remove_match_rule(RULE_A).unwrap();
    conn.remove_match_rule(RULE_B).unwrap();

    assert_eq!(mock.remove_match_calls(), 1);
    assert!(!conn.has_rule(RULE_A));
    assert!(mock.registered_rules().is_empty());
}

#[test]
fn test_failed_bus_calls_leave_record_unchanged() {
    let (mock, mut conn) = open_mock_connection("@session");

    mock.fail(MockOp::AddMatch);
    assert!(matches!(
        conn.insert_match_rule(RULE_A),
        Err(ConnectionError::AddMatch { .. })
    ));
    assert!(!conn.has_rule(RULE_A));

    mock.recover(MockOp::AddMatch);
    conn.insert_match_rule(RULE_A).unwrap();

    mock.fail(MockOp::RemoveMatch);
    assert!(matches!(
        conn.remove_match_rule(RULE_A),
        Err(ConnectionError::RemoveMatch { .. })
    ));
    assert!(conn.has_rule(RULE_A));
}

#[test]
fn test_rules_need_an_open_connection() {
    let (mock, mut conn) = mock_connection();
    assert_eq!(
        conn.insert_match_rule(RULE_A),
        Err(ConnectionError::NotOpen)
    );
    assert_eq!(mock.add_match_calls(), 0);
}

#[test]
fn test_remove_all_stops_at_first_failure_unless_forced() {
    let (mock, mut conn) = open_mock_connection("@session");
    conn.insert_match_rule(RULE_A).unwrap();
    conn.insert_match_rule(RULE_B).unwrap();
    mock.fail(MockOp::RemoveMatch);

    assert!(conn.remove_all_match_rules(false).is_err());
    assert_eq!(conn.rules().count(), 2);

    let report = conn.remove_all_match_rules(true).unwrap();
    assert!(!report.is_clean());
    assert!(report.removed.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(conn.rules().count(), 0);
}

#[test]
fn test_clean_remove_all_lists_every_rule() {
    let (mock, mut conn) = open_mock_connection("@session");
    conn.insert_match_rule(RULE_B).unwrap();
    conn.insert_match_rule(RULE_A).unwrap();

    let report = conn.remove_all_match_rules(false).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.removed, vec![RULE_A.to_string(), RULE_B.to_string()]);
    assert!(mock.registered_rules().is_empty());
    assert!(conn.is_open());
}

#[test]
fn test_connections_on_one_bus_keep_their_own_rules() {
    let (mock, mut first) = open_mock_connection("@session");
    let mut second = BusConnection::new(Box::new(mock.connector()));
    second.open("@session").unwrap();

    first.insert_match_rule(RULE_A).unwrap();
    second.insert_match_rule(RULE_A).unwrap();
    first.remove_match_rule(RULE_A).unwrap();

    assert!(!first.has_rule(RULE_A));
    assert!(second.has_rule(RULE_A));
    assert_eq!(mock.registered_rules(), vec![RULE_A.to_string()]);
}

#[test]
fn test_reopen_with_new_address_tears_down_previous() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    conn.insert_match_rule(RULE_A).unwrap();

    conn.open("@system").unwrap();

    assert_eq!(mock.exclusive_closes(), 1);
    assert!(mock.registered_rules().is_empty());
    assert_eq!(conn.rules().count(), 0);
    assert_eq!(conn.ownership(), Some(Ownership::Shared));
    assert_eq!(mock.live_handles(), 1);

    // shared to shared only drops the local handle
    conn.open("@session").unwrap();
    assert_eq!(mock.exclusive_closes(), 1);
    assert_eq!(mock.live_handles(), 1);
    assert_eq!(
        mock.shared_opens(),
        vec![SharedBus::System, SharedBus::Session]
    );
}

#[test]
fn test_reopen_with_same_address_is_noop() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    conn.insert_match_rule(RULE_A).unwrap();

    conn.open(DIAL).unwrap();

    assert_eq!(mock.dials().len(), 1);
    assert!(conn.has_rule(RULE_A));
}

#[test]
fn test_drop_removes_rules_and_closes() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    conn.insert_match_rule(RULE_A).unwrap();
    conn.insert_match_rule(RULE_B).unwrap();

    drop(conn);

    assert!(mock.registered_rules().is_empty());
    assert_eq!(mock.exclusive_closes(), 1);
    assert_eq!(mock.live_handles(), 0);
}

#[test]
fn test_shutdown_survives_rule_failures() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    conn.insert_match_rule(RULE_A).unwrap();
    mock.fail(MockOp::RemoveMatch);

    let report = conn.shutdown().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(!conn.is_open());
    assert_eq!(mock.exclusive_closes(), 1);
}

#[test]
fn test_method_calls_reach_the_bus() {
    let (mock, mut conn) = open_mock_connection("@session");
    mock.push_reply(vec![BusValue::UInt32(42)]);

    let call = MethodCall::new(
        "org.example.Svc",
        "/org/example/Svc",
        "org.example.Svc.Answer",
        vec![BusValue::Str("question".to_string())],
    );
    assert_eq!(conn.call(&call).unwrap(), vec![BusValue::UInt32(42)]);
    assert_eq!(mock.method_calls(), vec![call.clone()]);
    assert_eq!(conn.stats().calls_succeeded, 1);

    mock.fail(MockOp::Call);
    assert!(matches!(
        conn.call(&call),
        Err(ConnectionError::Call { .. })
    ));
}

#[test]
fn test_signals_flow_into_the_queue() {
    let (mock, conn) = open_mock_connection("@session");

    let signal = SignalBuilder::new("org.example.A.Tick")
        .arg(BusValue::UInt32(1))
        .build();
    assert_eq!(mock.emit_signal(signal.clone()), 1);

    assert_eq!(conn.signals().try_recv().unwrap(), signal);
    assert_eq!(conn.signal_queue().received(), 1);
}

#[test]
fn test_closed_connection_stops_watching() {
    let (mock, mut conn) = open_mock_connection(DIAL);
    conn.close().unwrap();

    assert_eq!(mock.watchers(), 0);
    assert_eq!(mock.emit_signal(SignalBuilder::new("org.example.A.Tick").build()), 0);
    assert!(conn.signals().try_recv().is_err());
}

#[test]
fn test_queue_drops_oldest_when_full() {
    let (mock, mut conn) = small_queue_connection(2, OverflowPolicy::DropOldest);
    conn.open("@session").unwrap();

    for i in 0..5u32 {
        mock.emit_signal(
            SignalBuilder::new("org.example.A.Tick")
                .arg(BusValue::UInt32(i))
                .build(),
        );
    }

    let kept: Vec<_> = conn.signal_queue().drain().into_iter().map(|s| s.body).collect();
    assert_eq!(
        kept,
        vec![vec![BusValue::UInt32(3)], vec![BusValue::UInt32(4)]]
    );
    assert_eq!(conn.signal_queue().dropped(), 3);
}

#[test]
fn test_queue_drops_newest_when_full() {
    let (mock, mut conn) = small_queue_connection(2, OverflowPolicy::DropNewest);
    conn.open("@session").unwrap();

    let delivered: usize = (0..5u32)
        .map(|i| {
            mock.emit_signal(
                SignalBuilder::new("org.example.A.Tick")
                    .arg(BusValue::UInt32(i))
                    .build(),
            )
        })
        .sum();

    assert_eq!(delivered, 2);
    let kept: Vec<_> = conn.signal_queue().drain().into_iter().map(|s| s.body).collect();
    assert_eq!(
        kept,
        vec![vec![BusValue::UInt32(0)], vec![BusValue::UInt32(1)]]
    );
    assert_eq!(conn.signal_queue().dropped(), 3);
}

#[test]
fn test_queue_survives_reconnect() {
    let (mock, mut conn) = open_mock_connection("@session");
    let receiver = conn.signals().clone();

    conn.open(DIAL).unwrap();
    mock.emit_signal(SignalBuilder::new("org.example.B.Tick").build());

    assert_eq!(receiver.try_recv().unwrap().name, "org.example.B.Tick");
}
