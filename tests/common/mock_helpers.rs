//! Mock construction helpers

use busbridge_rs::bus::{BusConnection, MockBus, OverflowPolicy};

/// Closed connection on a fresh mock bus
pub fn mock_connection() -> (MockBus, BusConnection) {
    let bus = MockBus::new();
    let conn = BusConnection::new(Box::new(bus.connector()));
    (bus, conn)
}

/// Open connection on a fresh mock bus
pub fn open_mock_connection(address: &str) -> (MockBus, BusConnection) {
    let (bus, mut conn) = mock_connection();
    conn.open(address)
        .unwrap_or_else(|e| panic!("failed to open {}: {}", address, e));
    (bus, conn)
}

/// Closed connection with a small signal queue
pub fn small_queue_connection(capacity: usize, policy: OverflowPolicy) -> (MockBus, BusConnection) {
    let bus = MockBus::new();
    let conn = BusConnection::with_queue(Box::new(bus.connector()), capacity, policy);
    (bus, conn)
}
