//! Signature-driven type system
//!
//! Three layers, each depending on the one before:
//!
//! - [`grammar`]: splits signature text into type codes
//! - [`resolver`]: builds a [`ResolvedType`] tree from type codes
//! - [`converter`]: coerces untyped values into typed bus values
//!
//! All functions here are pure and reentrant.
//!
//! # Example
//!
//! ```
//! use busbridge_rs::signature::convert_all;
//! use busbridge_rs::types::{BusValue, Value};
//!
//! let args = vec![Value::from("hello"), Value::Int(7)];
//! let converted = convert_all("si", &args).unwrap();
//! assert_eq!(converted[1], BusValue::Int32(7));
//! ```

pub mod converter;
pub mod grammar;
pub mod resolver;

pub use converter::{
    check_signature, convert, convert_all, convert_value, is_object_path, ConversionError,
    MAX_NESTING_DEPTH,
};
pub use grammar::{
    match_depth, nesting_depth, parse_one, split_all, split_first, ScalarKind, SignatureError,
    TypeCode,
};
pub use resolver::{
    resolve, resolve_all, resolve_all_within, resolve_complete, RecordFields, ResolvedType,
    MAX_RECORD_FIELDS,
};
