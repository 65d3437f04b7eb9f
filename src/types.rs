//! Core value types for BusBridge-RS
//!
//! Two value trees meet in this crate:
//!
//! - [`Value`] - untyped input as it arrives from the pipeline (usually JSON)
//! - [`BusValue`] - strictly typed output, one variant per bus type code
//!
//! [`Variant`] sits in between: it carries an untyped payload together with
//! the type that payload will be sent as.

use serde_json::json;

use crate::signature::{convert_value, ConversionError, RecordFields, ResolvedType, ScalarKind};

/// Untyped value tree
///
/// Map entries keep their insertion order but order carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
    Variant(Box<Variant>),
}

impl Value {
    /// Name of the dynamic kind, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Variant(_) => "variant",
        }
    }

    /// Short rendering for error messages
    pub fn brief(&self) -> String {
        const LIMIT: usize = 32;
        let text = match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Seq(items) | Value::Struct(items) => format!("[{} items]", items.len()),
            Value::Map(entries) => format!("{{{} entries}}", entries.len()),
            Value::Variant(v) => format!("<{}>", v.signature()),
        };
        if text.chars().count() > LIMIT {
            let cut: String = text.chars().take(LIMIT).collect();
            format!("{}...", cut)
        } else {
            text
        }
    }

    /// Render as JSON
    ///
    /// Maps with string keys become objects; any other map becomes an array
    /// of `[key, value]` pairs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::UInt(u) => json!(u),
            Value::Float(f) => json!(f),
            Value::Str(s) => json!(s),
            Value::Seq(items) | Value::Struct(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => map_to_json(
                entries.iter().map(|(k, v)| match k {
                    Value::Str(s) => (Some(s.as_str()), k.to_json(), v.to_json()),
                    _ => (None, k.to_json(), v.to_json()),
                }),
            ),
            Value::Variant(v) => v.value().to_json(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            // null converts to an empty array or an empty dict
            serde_json::Value::Null => Value::Seq(Vec::new()),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Seq(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::Str(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from(json.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::UInt(u64::from(u))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}

impl From<Variant> for Value {
    fn from(v: Variant) -> Self {
        Value::Variant(Box::new(v))
    }
}

/// Self-describing value: an untyped payload plus the type it travels as
///
/// Wrapping never converts the payload; [`Variant::resolve`] does that on
/// demand against the variant's own signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    signature: ResolvedType,
    value: Box<Value>,
}

impl Variant {
    /// Wrap a value, deriving the signature from the value itself
    ///
    /// A value that already is a variant is passed through unchanged.
    pub fn wrap(value: Value) -> Self {
        match value {
            Value::Variant(inner) => *inner,
            other => Self {
                signature: infer_type(&other),
                value: Box::new(other),
            },
        }
    }

    /// Wrap a value with an explicit signature
    pub fn with_signature(signature: ResolvedType, value: Value) -> Self {
        Self {
            signature,
            value: Box::new(value),
        }
    }

    pub fn signature(&self) -> &ResolvedType {
        &self.signature
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Convert the payload against the variant's signature
    pub fn resolve(&self) -> Result<BusValue, ConversionError> {
        convert_value(&self.signature, &self.value)
    }
}

/// Type a variant takes when only the value is known
fn infer_type(value: &Value) -> ResolvedType {
    match value {
        Value::Bool(_) => ResolvedType::Scalar(ScalarKind::Bool),
        Value::Int(_) => ResolvedType::Scalar(ScalarKind::Int64),
        Value::UInt(_) => ResolvedType::Scalar(ScalarKind::UInt64),
        Value::Float(_) => ResolvedType::Scalar(ScalarKind::Double),
        Value::Str(_) => ResolvedType::Scalar(ScalarKind::String),
        Value::Map(entries) => {
            let key = match entries.first().map(|(k, _)| k) {
                Some(Value::Int(_)) => ScalarKind::Int64,
                Some(Value::UInt(_)) => ScalarKind::UInt64,
                Some(Value::Float(_)) => ScalarKind::Double,
                Some(Value::Bool(_)) => ScalarKind::Bool,
                _ => ScalarKind::String,
            };
            ResolvedType::Dict(
                Box::new(ResolvedType::Scalar(key)),
                Box::new(ResolvedType::Variant),
            )
        }
        Value::Struct(fields) => RecordFields::new(vec![ResolvedType::Variant; fields.len()])
            .map(ResolvedType::Record)
            .unwrap_or_else(ResolvedType::variant_array),
        Value::Seq(_) | Value::Variant(_) => ResolvedType::variant_array(),
    }
}

/// Typed bus value, one variant per type code
#[derive(Debug, Clone, PartialEq)]
pub enum BusValue {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    UnixFd(i32),
    Variant(Variant),
    Array {
        element: ResolvedType,
        items: Vec<BusValue>,
    },
    /// Entries are unique by key
    Dict {
        key: ResolvedType,
        value: ResolvedType,
        entries: Vec<(BusValue, BusValue)>,
    },
    Record(Vec<BusValue>),
}

impl BusValue {
    /// The type this value conforms to
    ///
    /// `None` only for a hand-built record with an invalid field count.
    pub fn resolved_type(&self) -> Option<ResolvedType> {
        let scalar = |kind| Some(ResolvedType::Scalar(kind));
        match self {
            BusValue::Byte(_) => scalar(ScalarKind::Byte),
            BusValue::Bool(_) => scalar(ScalarKind::Bool),
            BusValue::Int16(_) => scalar(ScalarKind::Int16),
            BusValue::UInt16(_) => scalar(ScalarKind::UInt16),
            BusValue::Int32(_) => scalar(ScalarKind::Int32),
            BusValue::UInt32(_) => scalar(ScalarKind::UInt32),
            BusValue::Int64(_) => scalar(ScalarKind::Int64),
            BusValue::UInt64(_) => scalar(ScalarKind::UInt64),
            BusValue::Double(_) => scalar(ScalarKind::Double),
            BusValue::Str(_) => scalar(ScalarKind::String),
            BusValue::ObjectPath(_) => scalar(ScalarKind::ObjectPath),
            BusValue::Signature(_) => scalar(ScalarKind::Signature),
            BusValue::UnixFd(_) => scalar(ScalarKind::UnixFd),
            BusValue::Variant(_) => Some(ResolvedType::Variant),
            BusValue::Array { element, .. } => Some(ResolvedType::Array(Box::new(element.clone()))),
            BusValue::Dict { key, value, .. } => Some(ResolvedType::Dict(
                Box::new(key.clone()),
                Box::new(value.clone()),
            )),
            BusValue::Record(fields) => fields
                .iter()
                .map(BusValue::resolved_type)
                .collect::<Option<Vec<_>>>()
                .and_then(RecordFields::new)
                .map(ResolvedType::Record),
        }
    }

    /// Drop the static typing, keeping the shape
    pub fn to_value(&self) -> Value {
        match self {
            BusValue::Byte(v) => Value::UInt(u64::from(*v)),
            BusValue::Bool(v) => Value::Bool(*v),
            BusValue::Int16(v) => Value::Int(i64::from(*v)),
            BusValue::UInt16(v) => Value::UInt(u64::from(*v)),
            BusValue::Int32(v) => Value::Int(i64::from(*v)),
            BusValue::UInt32(v) => Value::UInt(u64::from(*v)),
            BusValue::Int64(v) => Value::Int(*v),
            BusValue::UInt64(v) => Value::UInt(*v),
            BusValue::Double(v) => Value::Float(*v),
            BusValue::Str(s) | BusValue::ObjectPath(s) | BusValue::Signature(s) => {
                Value::Str(s.clone())
            }
            BusValue::UnixFd(fd) => Value::Int(i64::from(*fd)),
            BusValue::Variant(v) => Value::Variant(Box::new(v.clone())),
            BusValue::Array { items, .. } => Value::Seq(items.iter().map(BusValue::to_value).collect()),
            BusValue::Dict { entries, .. } => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_value(), v.to_value()))
                    .collect(),
            ),
            BusValue::Record(fields) => {
                Value::Struct(fields.iter().map(BusValue::to_value).collect())
            }
        }
    }

    /// Render as JSON for pipeline output
    ///
    /// Records become arrays, variants render their payload, dicts keyed by
    /// strings become objects and other dicts become `[key, value]` pairs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BusValue::Byte(v) => json!(v),
            BusValue::Bool(v) => json!(v),
            BusValue::Int16(v) => json!(v),
            BusValue::UInt16(v) => json!(v),
            BusValue::Int32(v) => json!(v),
            BusValue::UInt32(v) => json!(v),
            BusValue::Int64(v) => json!(v),
            BusValue::UInt64(v) => json!(v),
            BusValue::Double(v) => json!(v),
            BusValue::Str(s) | BusValue::ObjectPath(s) | BusValue::Signature(s) => json!(s),
            BusValue::UnixFd(fd) => json!(fd),
            BusValue::Variant(v) => v.value().to_json(),
            BusValue::Array { items, .. } | BusValue::Record(items) => {
                serde_json::Value::Array(items.iter().map(BusValue::to_json).collect())
            }
            BusValue::Dict { entries, .. } => map_to_json(entries.iter().map(|(k, v)| match k {
                BusValue::Str(s) | BusValue::ObjectPath(s) | BusValue::Signature(s) => {
                    (Some(s.as_str()), k.to_json(), v.to_json())
                }
                _ => (None, k.to_json(), v.to_json()),
            })),
        }
    }
}

/// Object when every key is textual, else an array of pairs
fn map_to_json<'a>(
    entries: impl Iterator<Item = (Option<&'a str>, serde_json::Value, serde_json::Value)>,
) -> serde_json::Value {
    let entries: Vec<_> = entries.collect();
    if entries.iter().all(|(name, _, _)| name.is_some()) {
        let object = entries
            .into_iter()
            .filter_map(|(name, _, v)| name.map(|n| (n.to_string(), v)))
            .collect();
        serde_json::Value::Object(object)
    } else {
        serde_json::Value::Array(
            entries
                .into_iter()
                .map(|(_, k, v)| serde_json::Value::Array(vec![k, v]))
                .collect(),
        )
    }
}
