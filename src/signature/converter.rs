//! Value conversion
//!
//! Coerces untyped [`Value`] trees into typed [`BusValue`]s following a
//! signature. Conversion is all-or-nothing: the first failing element, key,
//! value or field aborts the whole call and its error is returned unchanged.
//!
//! Recursion is bounded by [`MAX_NESTING_DEPTH`]. The bound is checked against
//! the signature before any type is resolved, so a pathological signature is
//! rejected without deep recursion.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use thiserror::Error;

use super::grammar::{nesting_depth, split_first, ScalarKind, SignatureError};
use super::resolver::{resolve_all_within, resolve_complete, ResolvedType};
use crate::types::{BusValue, Value, Variant};

/// Maximum container nesting accepted by the converter
pub const MAX_NESTING_DEPTH: usize = 64;

/// Errors produced while converting values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// The signature itself is malformed
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Container target with the wrong kind of input
    #[error("{signature:?} - expected {expected}, got {actual}")]
    KindMismatch {
        signature: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Record target with the wrong number of fields or elements
    #[error("{signature:?} - field count mismatch: got {actual}, expected {expected}")]
    ArityMismatch {
        signature: String,
        actual: usize,
        expected: usize,
    },

    /// Scalar target the input cannot be coerced into
    #[error("{signature:?} - cannot convert {actual} {value} to {target}")]
    Unconvertible {
        signature: String,
        target: &'static str,
        actual: &'static str,
        value: String,
    },

    /// Dict whose key type is a container or variant
    #[error("{signature:?} - dict key must be a basic type, got {key}")]
    InvalidDictKey { signature: String, key: String },

    /// Recursion limit exceeded
    #[error("{signature:?} - nesting too deep (limit {max})")]
    NestingTooDeep { signature: String, max: usize },

    /// Fewer values than top-level types
    #[error("{signature:?} - missing argument #{index}")]
    MissingArgument { signature: String, index: usize },

    /// More values than top-level types
    #[error("too many arguments: signature takes {expected}, got {actual}")]
    TooManyArguments { expected: usize, actual: usize },
}

/// Convert `value` against the first complete type of `signature`
///
/// `depth` is the current nesting level (0 at the top). Returns the converted
/// value and the unconsumed remainder of the signature.
pub fn convert<'s>(
    signature: &'s str,
    depth: usize,
    value: &Value,
) -> Result<(BusValue, &'s str), ConversionError> {
    if signature.is_empty() {
        return Err(SignatureError::Empty.into());
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(too_deep(signature));
    }

    let (front, rest) = split_first(signature)?;
    // bounded on the signature, so an empty container can still be too deep
    if depth + nesting_depth(front) > MAX_NESTING_DEPTH {
        return Err(too_deep(front));
    }

    let resolved = resolve_complete(front)?;
    let converted = convert_resolved(&resolved, depth, value)?;
    Ok((converted, rest))
}

/// Convert one value per top-level type of `signature`
///
/// The number of values must match the number of top-level types exactly.
pub fn convert_all(signature: &str, values: &[Value]) -> Result<Vec<BusValue>, ConversionError> {
    let mut converted = Vec::with_capacity(values.len());
    let mut rest = signature;

    while !rest.is_empty() {
        let index = converted.len();
        let value = values
            .get(index)
            .ok_or_else(|| ConversionError::MissingArgument {
                signature: rest.to_string(),
                index,
            })?;
        let (bus_value, remainder) = convert(rest, 0, value)?;
        converted.push(bus_value);
        rest = remainder;
    }

    if converted.len() < values.len() {
        return Err(ConversionError::TooManyArguments {
            expected: converted.len(),
            actual: values.len(),
        });
    }

    Ok(converted)
}

/// Convert `value` against an already resolved type, starting at depth 0
pub fn convert_value(ty: &ResolvedType, value: &Value) -> Result<BusValue, ConversionError> {
    convert_resolved(ty, 0, value)
}

/// Check a signature the way the converter would, without converting anything
pub fn check_signature(signature: &str) -> Result<Vec<ResolvedType>, ConversionError> {
    resolve_all_within(signature, MAX_NESTING_DEPTH).map_err(|e| match e {
        SignatureError::NestingTooDeep { signature, max, .. } => {
            ConversionError::NestingTooDeep { signature, max }
        }
        other => other.into(),
    })
}

fn too_deep(signature: &str) -> ConversionError {
    ConversionError::NestingTooDeep {
        signature: signature.to_string(),
        max: MAX_NESTING_DEPTH,
    }
}

fn convert_resolved(
    ty: &ResolvedType,
    depth: usize,
    value: &Value,
) -> Result<BusValue, ConversionError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(too_deep(&ty.to_string()));
    }

    match ty {
        ResolvedType::Scalar(kind) => coerce_scalar(*kind, value),

        ResolvedType::Variant => Ok(BusValue::Variant(Variant::wrap(value.clone()))),

        ResolvedType::Array(element) => match value {
            Value::Seq(items) => {
                let items = items
                    .iter()
                    .map(|item| convert_resolved(element, depth + 1, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(BusValue::Array {
                    element: (**element).clone(),
                    items,
                })
            }
            other => Err(kind_mismatch(ty, "array", other)),
        },

        ResolvedType::Dict(key, val) => {
            if !key.is_basic() {
                return Err(ConversionError::InvalidDictKey {
                    signature: ty.to_string(),
                    key: key.to_string(),
                });
            }
            let source: &[(Value, Value)] = match value {
                Value::Map(entries) => entries,
                // null arrives as an empty sequence
                Value::Seq(items) if items.is_empty() => &[],
                other => return Err(kind_mismatch(ty, "dict", other)),
            };

            // later duplicates overwrite in place, first-seen order is kept
            let mut entries: Vec<(BusValue, BusValue)> = Vec::with_capacity(source.len());
            let mut index: HashMap<DictKey, usize> = HashMap::with_capacity(source.len());
            for (k, v) in source {
                let k = convert_resolved(key, depth + 1, k)?;
                let v = convert_resolved(val, depth + 1, v)?;
                let slot = match DictKey::of(&k) {
                    Some(id) => match index.entry(id) {
                        Entry::Occupied(found) => Some(*found.get()),
                        Entry::Vacant(vacant) => {
                            vacant.insert(entries.len());
                            None
                        }
                    },
                    None => entries.iter().position(|(existing, _)| *existing == k),
                };
                match slot {
                    Some(at) => entries[at].1 = v,
                    None => entries.push((k, v)),
                }
            }
            Ok(BusValue::Dict {
                key: (**key).clone(),
                value: (**val).clone(),
                entries,
            })
        }

        ResolvedType::Record(fields) => {
            let items = match value {
                Value::Struct(items) | Value::Seq(items) => items,
                other => return Err(kind_mismatch(ty, "struct", other)),
            };
            if items.len() != fields.len() {
                return Err(ConversionError::ArityMismatch {
                    signature: ty.to_string(),
                    actual: items.len(),
                    expected: fields.len(),
                });
            }
            fields
                .iter()
                .zip(items)
                .map(|(field, item)| convert_resolved(field, depth + 1, item))
                .collect::<Result<Vec<_>, _>>()
                .map(BusValue::Record)
        }
    }
}

/// Hashable identity of a converted dict key, equal exactly when the keys are
#[derive(Debug, PartialEq, Eq, Hash)]
enum DictKey {
    Int(i128),
    Bool(bool),
    Float(u64),
    Text(String),
}

impl DictKey {
    /// `None` for keys with no hashable form (NaN, containers)
    fn of(value: &BusValue) -> Option<DictKey> {
        let key = match value {
            BusValue::Byte(v) => DictKey::Int(i128::from(*v)),
            BusValue::Int16(v) => DictKey::Int(i128::from(*v)),
            BusValue::UInt16(v) => DictKey::Int(i128::from(*v)),
            BusValue::Int32(v) | BusValue::UnixFd(v) => DictKey::Int(i128::from(*v)),
            BusValue::UInt32(v) => DictKey::Int(i128::from(*v)),
            BusValue::Int64(v) => DictKey::Int(i128::from(*v)),
            BusValue::UInt64(v) => DictKey::Int(i128::from(*v)),
            BusValue::Bool(v) => DictKey::Bool(*v),
            BusValue::Double(v) if v.is_nan() => return None,
            // -0.0 == 0.0
            BusValue::Double(v) if *v == 0.0 => DictKey::Float(0),
            BusValue::Double(v) => DictKey::Float(v.to_bits()),
            BusValue::Str(v) | BusValue::ObjectPath(v) | BusValue::Signature(v) => {
                DictKey::Text(v.clone())
            }
            BusValue::Variant(_)
            | BusValue::Array { .. }
            | BusValue::Dict { .. }
            | BusValue::Record(_) => return None,
        };
        Some(key)
    }
}

fn kind_mismatch(ty: &ResolvedType, expected: &'static str, actual: &Value) -> ConversionError {
    ConversionError::KindMismatch {
        signature: ty.to_string(),
        expected,
        actual: actual.kind_name(),
    }
}

fn unconvertible(kind: ScalarKind, value: &Value) -> ConversionError {
    ConversionError::Unconvertible {
        signature: kind.code().to_string(),
        target: kind.name(),
        actual: value.kind_name(),
        value: value.brief(),
    }
}

/// Integer view of a value, if it has one without losing information
fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Int(i) => Some(i128::from(*i)),
        Value::UInt(u) => Some(i128::from(*u)),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => {
            // saturates outside the i128 range, which no target accepts anyway
            Some(*f as i128)
        }
        Value::Str(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}

fn integer<T: TryFrom<i128>>(kind: ScalarKind, value: &Value) -> Result<T, ConversionError> {
    as_integer(value)
        .and_then(|i| T::try_from(i).ok())
        .ok_or_else(|| unconvertible(kind, value))
}

fn coerce_scalar(kind: ScalarKind, value: &Value) -> Result<BusValue, ConversionError> {
    let converted = match kind {
        ScalarKind::Byte => BusValue::Byte(integer(kind, value)?),
        ScalarKind::Int16 => BusValue::Int16(integer(kind, value)?),
        ScalarKind::UInt16 => BusValue::UInt16(integer(kind, value)?),
        ScalarKind::Int32 => BusValue::Int32(integer(kind, value)?),
        ScalarKind::UInt32 => BusValue::UInt32(integer(kind, value)?),
        ScalarKind::Int64 => BusValue::Int64(integer(kind, value)?),
        ScalarKind::UInt64 => BusValue::UInt64(integer(kind, value)?),
        ScalarKind::UnixFd => {
            let fd: i32 = integer(kind, value)?;
            if fd < 0 {
                return Err(unconvertible(kind, value));
            }
            BusValue::UnixFd(fd)
        }
        ScalarKind::Double => match value {
            Value::Int(i) => BusValue::Double(*i as f64),
            Value::UInt(u) => BusValue::Double(*u as f64),
            Value::Float(f) => BusValue::Double(*f),
            Value::Str(s) => BusValue::Double(
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| unconvertible(kind, value))?,
            ),
            _ => return Err(unconvertible(kind, value)),
        },
        ScalarKind::Bool => match value {
            Value::Bool(b) => BusValue::Bool(*b),
            Value::Str(s) => match s.trim() {
                "true" => BusValue::Bool(true),
                "false" => BusValue::Bool(false),
                _ => return Err(unconvertible(kind, value)),
            },
            _ => return Err(unconvertible(kind, value)),
        },
        ScalarKind::String => match value {
            Value::Str(s) => BusValue::Str(s.clone()),
            _ => return Err(unconvertible(kind, value)),
        },
        ScalarKind::ObjectPath => match value {
            Value::Str(s) if is_object_path(s) => BusValue::ObjectPath(s.clone()),
            _ => return Err(unconvertible(kind, value)),
        },
        ScalarKind::Signature => match value {
            Value::Str(s) if check_signature(s).is_ok() => BusValue::Signature(s.clone()),
            _ => return Err(unconvertible(kind, value)),
        },
    };
    Ok(converted)
}

/// `/`, or `/`-separated non-empty segments of `[A-Za-z0-9_]`
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    match path.strip_prefix('/') {
        Some(rest) => rest
            .split('/')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')),
        None => false,
    }
}
