//! Test data builders for creating test objects

use busbridge_rs::blocks::CallTarget;
use busbridge_rs::bus::Signal;
use busbridge_rs::types::BusValue;

/// Builder for creating test Signals
pub struct SignalBuilder {
    sender: String,
    path: String,
    name: String,
    body: Vec<BusValue>,
}

impl SignalBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            sender: ":1.1".to_string(),
            path: "/".to_string(),
            name: name.to_string(),
            body: Vec::new(),
        }
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn arg(mut self, value: BusValue) -> Self {
        self.body.push(value);
        self
    }

    pub fn build(self) -> Signal {
        Signal {
            sender: self.sender,
            path: self.path,
            name: self.name,
            body: self.body,
        }
    }
}

/// Builder for outbound call targets
pub struct TargetBuilder {
    target: CallTarget,
}

impl TargetBuilder {
    pub fn new(method: &str, signature: &str) -> Self {
        let interface = method.rsplit_once('.').map_or(method, |(i, _)| i);
        Self {
            target: CallTarget {
                destination: interface.to_string(),
                object_path: format!("/{}", interface.replace('.', "/")),
                method: method.to_string(),
                signature: signature.to_string(),
            },
        }
    }

    pub fn destination(mut self, destination: &str) -> Self {
        self.target.destination = destination.to_string();
        self
    }

    pub fn build(self) -> CallTarget {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_builder() {
        let signal = SignalBuilder::new("org.example.Tick")
            .sender(":1.7")
            .path("/org/example")
            .arg(BusValue::UInt32(1))
            .build();

        assert_eq!(signal.sender, ":1.7");
        assert_eq!(signal.path, "/org/example");
        assert_eq!(signal.body, vec![BusValue::UInt32(1)]);
    }

    #[test]
    fn test_target_builder() {
        let target = TargetBuilder::new("org.example.Svc.Ping", "s").build();
        assert_eq!(target.destination, "org.example.Svc");
        assert_eq!(target.object_path, "/org/example/Svc");
    }
}
