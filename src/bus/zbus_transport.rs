//! Real bus transport over `zbus`
//!
//! Uses the blocking zbus API. Dialed connections complete the SASL
//! handshake and the hello call while being built, so [`BusClient::authenticate`]
//! and [`BusClient::hello`] only confirm what the builder already did.
//!
//! Values cross the boundary through `zvariant::Value`: outgoing [`BusValue`]s
//! are marshalled field by field and reply bodies are read back as a
//! structure of their top-level values.
//!
//! Unix file descriptors are not supported over this transport.
//!
//! The system and session connections are opened once per connector and
//! handed out as clones. Closing a shared client only stops its signal
//! reader; closing an exclusive one shuts the socket down, and in both cases
//! the reader thread is joined before `close` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{connection, Connection, MessageIterator};
use zbus::message::Type as MessageType;
use zbus::zvariant::{
    Array, Dict, ObjectPath, Signature as WireSignature, Structure, StructureBuilder,
    Value as WireValue,
};
use zbus::{MatchRule, Message};

use super::address::SharedBus;
use super::client::{BusClient, BusConnector, MethodCall, TransportError, TransportResult};
use super::signal::{Signal, SignalSink};
use crate::signature::resolve_complete;
use crate::types::{BusValue, Variant};

/// Interface of the unicast signal a client sends itself to wake its reader
const WAKE_INTERFACE: &str = "org.busbridge.Reader";
const WAKE_PATH: &str = "/org/busbridge/Reader";

/// How long `close` waits for the reader thread before detaching it
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

fn transport(err: impl std::fmt::Display) -> TransportError {
    TransportError::new(err.to_string())
}

#[derive(Debug, Default)]
struct SharedConnections {
    system: Option<Connection>,
    session: Option<Connection>,
}

/// [`BusConnector`] backed by zbus
///
/// Clones share the cached system and session connections.
#[derive(Debug, Clone, Default)]
pub struct ZbusConnector {
    shared: Arc<Mutex<SharedConnections>>,
}

impl ZbusConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BusConnector for ZbusConnector {
    fn shared(&mut self, bus: SharedBus) -> TransportResult<Box<dyn BusClient>> {
        let mut cache = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match bus {
            SharedBus::System => &mut cache.system,
            SharedBus::Session => &mut cache.session,
        };

        if let Some(conn) = slot.as_ref() {
            tracing::debug!("Reusing cached {:?} bus connection", bus);
            return Ok(Box::new(ZbusClient::shared(conn.clone())));
        }

        let conn = match bus {
            SharedBus::System => Connection::system(),
            SharedBus::Session => Connection::session(),
        }
        .map_err(transport)?;
        tracing::debug!("Opened {:?} bus connection", bus);
        *slot = Some(conn.clone());
        Ok(Box::new(ZbusClient::shared(conn)))
    }

    fn dial(&mut self, address: &str) -> TransportResult<Box<dyn BusClient>> {
        let conn = connection::Builder::address(address)
            .map_err(transport)?
            .build()
            .map_err(transport)?;
        Ok(Box::new(ZbusClient::exclusive(conn)))
    }
}

struct ZbusClient {
    conn: Option<Connection>,
    /// Exclusive connections are shut down on close, shared ones never
    exclusive: bool,
    /// Tells the signal reader thread to stop forwarding
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl ZbusClient {
    fn shared(conn: Connection) -> Self {
        Self::new(conn, false)
    }

    fn exclusive(conn: Connection) -> Self {
        Self::new(conn, true)
    }

    fn new(conn: Connection, exclusive: bool) -> Self {
        Self {
            conn: Some(conn),
            exclusive,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn conn(&self) -> TransportResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| TransportError::new("connection is closed"))
    }

    fn dbus(&self) -> TransportResult<DBusProxy<'static>> {
        DBusProxy::new(self.conn()?).map_err(transport)
    }

    /// Stop the reader and let go of the connection
    ///
    /// The reader blocks until the next message, so it is woken: an exclusive
    /// connection is closed under it, a shared one gets a signal addressed to
    /// ourselves.
    fn release(&mut self) -> TransportResult<()> {
        self.stop.store(true, Ordering::Release);
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        if self.exclusive {
            conn.close().map_err(transport)
        } else if self.reader.is_some() {
            wake_reader(&conn)
        } else {
            Ok(())
        }
    }

    fn join_reader(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        let deadline = Instant::now() + READER_JOIN_TIMEOUT;
        while !reader.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("Signal reader did not stop in time, detaching it");
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if reader.join().is_err() {
            tracing::warn!("Signal reader panicked");
        }
    }
}

impl BusClient for ZbusClient {
    fn authenticate(&mut self) -> TransportResult<()> {
        self.conn()?;
        tracing::debug!("Authentication completed by the connection builder");
        Ok(())
    }

    fn hello(&mut self) -> TransportResult<String> {
        self.conn()?
            .unique_name()
            .map(|name| name.to_string())
            .ok_or_else(|| TransportError::new("bus did not assign a unique name"))
    }

    fn add_match(&mut self, rule: &str) -> TransportResult<()> {
        let rule = MatchRule::try_from(rule).map_err(transport)?;
        self.dbus()?.add_match_rule(rule).map_err(transport)
    }

    fn remove_match(&mut self, rule: &str) -> TransportResult<()> {
        let rule = MatchRule::try_from(rule).map_err(transport)?;
        self.dbus()?.remove_match_rule(rule).map_err(transport)
    }

    fn call_method(&mut self, call: &MethodCall) -> TransportResult<Vec<BusValue>> {
        let conn = self.conn()?;
        let (interface, member) = call.interface_and_member();

        let reply = if call.args.is_empty() {
            conn.call_method(
                Some(call.destination.as_str()),
                call.path.as_str(),
                interface,
                member,
                &(),
            )
        } else {
            let body = call
                .args
                .iter()
                .try_fold(StructureBuilder::new(), |builder, arg| {
                    Ok::<_, TransportError>(builder.append_field(to_wire(arg)?))
                })?
                .build();
            conn.call_method(
                Some(call.destination.as_str()),
                call.path.as_str(),
                interface,
                member,
                &body,
            )
        }
        .map_err(transport)?;

        body_values(&reply)
    }

    fn watch_signals(&mut self, sink: SignalSink) -> TransportResult<()> {
        if self.reader.is_some() {
            return Err(TransportError::new("signals are already being watched"));
        }
        let messages = MessageIterator::from(self.conn()?.clone());
        let stop = Arc::clone(&self.stop);

        let reader = std::thread::Builder::new()
            .name("bus-signals".to_string())
            .spawn(move || {
                for message in messages {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let Ok(message) = message else { continue };
                    if message.message_type() != MessageType::Signal || is_wake(&message) {
                        continue;
                    }
                    match signal_from(&message) {
                        Ok(signal) => {
                            sink.push(signal);
                        }
                        Err(e) => tracing::debug!("Skipping undecodable signal: {}", e),
                    }
                }
                tracing::debug!("Signal reader stopped");
            })
            .map_err(transport)?;
        self.reader = Some(reader);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        let released = self.release();
        self.join_reader();
        released
    }
}

impl Drop for ZbusClient {
    // shared handles are dropped rather than closed
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::debug!("Failed to release bus connection: {}", e);
        }
        self.join_reader();
    }
}

/// Unicast an empty signal to our own unique name
fn wake_reader(conn: &Connection) -> TransportResult<()> {
    let Some(own) = conn.unique_name() else {
        return Ok(());
    };
    conn.emit_signal(Some(own.as_str()), WAKE_PATH, WAKE_INTERFACE, "Stop", &())
        .map_err(transport)
}

fn is_wake(message: &Message) -> bool {
    message
        .header()
        .interface()
        .is_some_and(|i| i.as_str() == WAKE_INTERFACE)
}

fn signal_from(message: &Message) -> TransportResult<Signal> {
    let header = message.header();
    let interface = header.interface().map(|i| i.to_string()).unwrap_or_default();
    let member = header.member().map(|m| m.to_string()).unwrap_or_default();
    let name = if interface.is_empty() {
        member
    } else {
        format!("{}.{}", interface, member)
    };

    Ok(Signal {
        sender: header.sender().map(|s| s.to_string()).unwrap_or_default(),
        path: header.path().map(|p| p.to_string()).unwrap_or_default(),
        name,
        body: body_values(message)?,
    })
}

/// Top-level values of a message body
fn body_values(message: &Message) -> TransportResult<Vec<BusValue>> {
    let body = message.body();
    let empty = body
        .signature()
        .map(|s| s.as_str().is_empty())
        .unwrap_or(true);
    if empty {
        return Ok(Vec::new());
    }

    let fields: Structure<'_> = body.deserialize().map_err(transport)?;
    fields.fields().iter().map(from_wire).collect()
}

fn to_wire(value: &BusValue) -> TransportResult<WireValue<'static>> {
    let wire = match value {
        BusValue::Byte(v) => WireValue::U8(*v),
        BusValue::Bool(v) => WireValue::Bool(*v),
        BusValue::Int16(v) => WireValue::I16(*v),
        BusValue::UInt16(v) => WireValue::U16(*v),
        BusValue::Int32(v) => WireValue::I32(*v),
        BusValue::UInt32(v) => WireValue::U32(*v),
        BusValue::Int64(v) => WireValue::I64(*v),
        BusValue::UInt64(v) => WireValue::U64(*v),
        BusValue::Double(v) => WireValue::F64(*v),
        BusValue::Str(s) => WireValue::from(s.clone()),
        BusValue::ObjectPath(p) => {
            WireValue::ObjectPath(ObjectPath::try_from(p.clone()).map_err(transport)?)
        }
        BusValue::Signature(s) => {
            WireValue::Signature(WireSignature::try_from(s.clone()).map_err(transport)?)
        }
        BusValue::UnixFd(_) => {
            return Err(TransportError::new(
                "unix fd arguments are not supported by this transport",
            ))
        }
        BusValue::Variant(variant) => {
            let inner = variant.resolve().map_err(transport)?;
            WireValue::Value(Box::new(to_wire(&inner)?))
        }
        BusValue::Array { element, items } => {
            let signature = WireSignature::try_from(element.to_string()).map_err(transport)?;
            let mut array = Array::new(signature);
            for item in items {
                array.append(to_wire(item)?).map_err(transport)?;
            }
            WireValue::Array(array)
        }
        BusValue::Dict {
            key,
            value,
            entries,
        } => {
            let key_signature = WireSignature::try_from(key.to_string()).map_err(transport)?;
            let value_signature = WireSignature::try_from(value.to_string()).map_err(transport)?;
            let mut dict = Dict::new(key_signature, value_signature);
            for (k, v) in entries {
                dict.append(to_wire(k)?, to_wire(v)?).map_err(transport)?;
            }
            WireValue::Dict(dict)
        }
        BusValue::Record(fields) => {
            let builder = fields
                .iter()
                .try_fold(StructureBuilder::new(), |builder, field| {
                    Ok::<_, TransportError>(builder.append_field(to_wire(field)?))
                })?;
            WireValue::Structure(builder.build())
        }
    };
    Ok(wire)
}

fn from_wire(value: &WireValue<'_>) -> TransportResult<BusValue> {
    let converted = match value {
        WireValue::U8(v) => BusValue::Byte(*v),
        WireValue::Bool(v) => BusValue::Bool(*v),
        WireValue::I16(v) => BusValue::Int16(*v),
        WireValue::U16(v) => BusValue::UInt16(*v),
        WireValue::I32(v) => BusValue::Int32(*v),
        WireValue::U32(v) => BusValue::UInt32(*v),
        WireValue::I64(v) => BusValue::Int64(*v),
        WireValue::U64(v) => BusValue::UInt64(*v),
        WireValue::F64(v) => BusValue::Double(*v),
        WireValue::Str(s) => BusValue::Str(s.to_string()),
        WireValue::Signature(s) => BusValue::Signature(s.to_string()),
        WireValue::ObjectPath(p) => BusValue::ObjectPath(p.to_string()),
        WireValue::Value(inner) => {
            let inner = from_wire(inner)?;
            let signature = inner
                .resolved_type()
                .ok_or_else(|| TransportError::new("variant holds a malformed structure"))?;
            BusValue::Variant(Variant::with_signature(signature, inner.to_value()))
        }
        WireValue::Array(array) => {
            let element =
                resolve_complete(array.element_signature().as_str()).map_err(transport)?;
            let items = array.iter().map(from_wire).collect::<TransportResult<_>>()?;
            BusValue::Array { element, items }
        }
        WireValue::Dict(dict) => {
            let key = resolve_complete(dict.key_signature().as_str()).map_err(transport)?;
            let value = resolve_complete(dict.value_signature().as_str()).map_err(transport)?;
            let entries = dict
                .iter()
                .map(|(k, v)| Ok((from_wire(k)?, from_wire(v)?)))
                .collect::<TransportResult<_>>()?;
            BusValue::Dict {
                key,
                value,
                entries,
            }
        }
        WireValue::Structure(structure) => BusValue::Record(
            structure
                .fields()
                .iter()
                .map(from_wire)
                .collect::<TransportResult<_>>()?,
        ),
        other => {
            return Err(TransportError::new(format!(
                "unsupported value with signature {}",
                other.value_signature()
            )))
        }
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{OverflowPolicy, SignalQueue};
    use std::os::unix::net::UnixStream;
    use zbus::Guid;

    /// Peer-to-peer connection pair over a socketpair, no bus daemon needed
    fn p2p_pair() -> (Connection, Connection) {
        let (server_end, client_end) = UnixStream::pair().unwrap();
        let server = std::thread::spawn(move || {
            connection::Builder::unix_stream(server_end)
                .server(Guid::generate())
                .unwrap()
                .p2p()
                .build()
                .unwrap()
        });
        let client = connection::Builder::unix_stream(client_end)
            .p2p()
            .build()
            .unwrap();
        (server.join().unwrap(), client)
    }

    #[test]
    fn test_exclusive_close_ends_reader() {
        let (_peer, conn) = p2p_pair();
        let queue = SignalQueue::new(16, OverflowPolicy::DropOldest);
        let mut client = ZbusClient::exclusive(conn);
        client.watch_signals(queue.sink()).unwrap();

        let started = Instant::now();
        client.close().unwrap();
        assert!(started.elapsed() < READER_JOIN_TIMEOUT);
        assert!(client.reader.is_none());
        assert!(client.conn.is_none());

        // closing twice is harmless
        client.close().unwrap();
    }

    #[test]
    fn test_reader_forwards_peer_signals() {
        let (peer, conn) = p2p_pair();
        let queue = SignalQueue::new(16, OverflowPolicy::DropOldest);
        let mut client = ZbusClient::exclusive(conn);
        client.watch_signals(queue.sink()).unwrap();

        peer.emit_signal(None::<&str>, "/org/example", "org.example.Player", "Tick", &())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        client.close().unwrap();

        let signal = queue.try_recv().unwrap();
        assert_eq!(signal.name, "org.example.Player.Tick");
        assert_eq!(signal.path, "/org/example");
        assert!(signal.body.is_empty());
    }

    #[test]
    fn test_second_watch_is_rejected() {
        let (_peer, conn) = p2p_pair();
        let queue = SignalQueue::new(16, OverflowPolicy::DropOldest);
        let mut client = ZbusClient::exclusive(conn);
        client.watch_signals(queue.sink()).unwrap();
        assert!(client.watch_signals(queue.sink()).is_err());
    }

    #[test]
    fn test_shared_client_leaves_connection_open() {
        let (_peer, conn) = p2p_pair();
        let mut client = ZbusClient::shared(conn.clone());
        client.close().unwrap();
        assert!(client.conn.is_none());

        // the cached clone is still usable
        conn.emit_signal(None::<&str>, "/org/example", "org.example.Player", "Tick", &())
            .unwrap();
    }
}
