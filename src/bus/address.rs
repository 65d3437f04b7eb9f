//! Bus address classification

use std::fmt;

/// Well-known buses the process shares with everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedBus {
    System,
    Session,
}

impl fmt::Display for SharedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedBus::System => f.write_str("system"),
            SharedBus::Session => f.write_str("session"),
        }
    }
}

/// Who is responsible for closing a bus handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Well-known bus handle; never closed here
    Shared,
    /// Dialed by us; closed on teardown
    OwnedExclusive,
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BusAddress {
    Shared(SharedBus),
    /// Any other address, dialed directly
    Dial(String),
}

impl BusAddress {
    /// Classify an address string
    ///
    /// `system`, `@system`, `session` and `@session` (any case) name the
    /// shared buses. Anything else is dialed as given.
    pub fn classify(address: &str) -> Self {
        match address.to_ascii_lowercase().as_str() {
            "system" | "@system" => BusAddress::Shared(SharedBus::System),
            "session" | "@session" => BusAddress::Shared(SharedBus::Session),
            _ => BusAddress::Dial(address.to_string()),
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            BusAddress::Shared(_) => Ownership::Shared,
            BusAddress::Dial(_) => Ownership::OwnedExclusive,
        }
    }
}

impl From<&str> for BusAddress {
    fn from(address: &str) -> Self {
        Self::classify(address)
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusAddress::Shared(bus) => write!(f, "@{}", bus),
            BusAddress::Dial(address) => f.write_str(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_shared() {
        for name in ["system", "@system", "SYSTEM", "@System"] {
            assert_eq!(
                BusAddress::classify(name),
                BusAddress::Shared(SharedBus::System)
            );
        }
        for name in ["session", "@session", "Session", "@SESSION"] {
            assert_eq!(
                BusAddress::classify(name),
                BusAddress::Shared(SharedBus::Session)
            );
        }
    }

    #[test]
    fn test_classify_dial() {
        let address = "unix:path=/run/user/1000/bus";
        assert_eq!(
            BusAddress::classify(address),
            BusAddress::Dial(address.to_string())
        );
        assert_eq!(
            BusAddress::classify("@sessions"),
            BusAddress::Dial("@sessions".to_string())
        );
        assert_eq!(
            BusAddress::classify(address).ownership(),
            Ownership::OwnedExclusive
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(BusAddress::classify("SYSTEM").to_string(), "@system");
        assert_eq!(BusAddress::classify("tcp:host=x").to_string(), "tcp:host=x");
    }
}
