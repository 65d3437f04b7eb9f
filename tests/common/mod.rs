//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use busbridge_rs::blocks::BlockOutput;
use busbridge_rs::types::Value;
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Untyped values from a JSON array literal
pub fn values(json: serde_json::Value) -> Vec<Value> {
    match json {
        serde_json::Value::Array(items) => items.iter().map(Value::from).collect(),
        other => vec![Value::from(other)],
    }
}

/// Poll `condition` until it holds or the test timeout expires
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Split block outputs into messages and errors
pub fn partition(outputs: Vec<BlockOutput>) -> (Vec<serde_json::Value>, Vec<String>) {
    let mut messages = Vec::new();
    let mut errors = Vec::new();
    for output in outputs {
        match output {
            BlockOutput::Message(m) => messages.push(m),
            BlockOutput::Error(e) => errors.push(e),
        }
    }
    (messages, errors)
}
