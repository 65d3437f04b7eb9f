//! Type resolution
//!
//! Turns parsed type codes into a closed [`ResolvedType`] tree. Structures map
//! to a fixed-arity [`RecordFields`] list of at most [`MAX_RECORD_FIELDS`]
//! slots; arrays whose element starts a dict entry become [`ResolvedType::Dict`].

use std::fmt;

use super::grammar::{nesting_depth, parse_one, ScalarKind, SignatureError, TypeCode};

/// Maximum number of fields in a structure
pub const MAX_RECORD_FIELDS: usize = 16;

/// Concrete description of one complete bus type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedType {
    Scalar(ScalarKind),
    /// Self-describing value; its payload type travels with it
    Variant,
    Array(Box<ResolvedType>),
    Dict(Box<ResolvedType>, Box<ResolvedType>),
    Record(RecordFields),
}

/// Ordered field types of a structure, always 1..=16 entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordFields(Vec<ResolvedType>);

impl RecordFields {
    /// Build a field list, rejecting empty or oversized structures
    pub fn new(fields: Vec<ResolvedType>) -> Option<Self> {
        if fields.is_empty() || fields.len() > MAX_RECORD_FIELDS {
            None
        } else {
            Some(Self(fields))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedType> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ResolvedType] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a RecordFields {
    type Item = &'a ResolvedType;
    type IntoIter = std::slice::Iter<'a, ResolvedType>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl ResolvedType {
    /// Short kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResolvedType::Scalar(kind) => kind.name(),
            ResolvedType::Variant => "variant",
            ResolvedType::Array(_) => "array",
            ResolvedType::Dict(..) => "dict",
            ResolvedType::Record(_) => "struct",
        }
    }

    /// Whether this type may be used as a dict key
    pub fn is_basic(&self) -> bool {
        matches!(self, ResolvedType::Scalar(_))
    }

    /// Array of variants, the fallback type for untyped sequences
    pub fn variant_array() -> Self {
        ResolvedType::Array(Box::new(ResolvedType::Variant))
    }
}

/// Writes the type back out as signature text
impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedType::Scalar(kind) => write!(f, "{}", kind.code()),
            ResolvedType::Variant => f.write_str("v"),
            ResolvedType::Array(element) => write!(f, "a{}", element),
            ResolvedType::Dict(key, value) => write!(f, "a{{{}{}}}", key, value),
            ResolvedType::Record(fields) => {
                f.write_str("(")?;
                for field in fields {
                    write!(f, "{}", field)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Resolve the first complete type of `signature`
///
/// Returns the type and the unconsumed remainder. Recursion follows the
/// structure of the signature; callers handling untrusted input should bound
/// nesting first (see [`resolve_all_within`]).
pub fn resolve(signature: &str) -> Result<(ResolvedType, &str), SignatureError> {
    let (code, rest) = parse_one(signature)?;

    let resolved = match code {
        TypeCode::Scalar(kind) => ResolvedType::Scalar(kind),
        TypeCode::Variant => ResolvedType::Variant,
        TypeCode::Array { element } => ResolvedType::Array(Box::new(resolve_complete(element)?)),
        TypeCode::Dict { key, value } => ResolvedType::Dict(
            Box::new(resolve_complete(key)?),
            Box::new(resolve_complete(value)?),
        ),
        TypeCode::Struct { fields } => {
            let mut types = Vec::new();
            let mut remaining = fields;
            while !remaining.is_empty() {
                let (field, next) = resolve(remaining)?;
                types.push(field);
                remaining = next;
            }
            let count = types.len();
            let consumed = &signature[..signature.len() - rest.len()];
            match RecordFields::new(types) {
                Some(fields) => ResolvedType::Record(fields),
                None if count == 0 => {
                    return Err(SignatureError::EmptyStructure {
                        signature: consumed.to_string(),
                    })
                }
                None => {
                    return Err(SignatureError::TooManyFields {
                        count,
                        max: MAX_RECORD_FIELDS,
                        signature: consumed.to_string(),
                    })
                }
            }
        }
    };

    Ok((resolved, rest))
}

/// Resolve a signature that must contain exactly one complete type
pub fn resolve_complete(signature: &str) -> Result<ResolvedType, SignatureError> {
    let (resolved, rest) = resolve(signature)?;
    if rest.is_empty() {
        Ok(resolved)
    } else {
        Err(SignatureError::TrailingCharacters {
            signature: signature.to_string(),
            remainder: rest.to_string(),
        })
    }
}

/// Resolve every top-level type in `signature`, in order
pub fn resolve_all(signature: &str) -> Result<Vec<ResolvedType>, SignatureError> {
    let mut types = Vec::new();
    let mut rest = signature;
    while !rest.is_empty() {
        let (resolved, next) = resolve(rest)?;
        types.push(resolved);
        rest = next;
    }
    Ok(types)
}

/// Like [`resolve_all`], but rejects signatures nested deeper than `max_depth`
/// before any recursion happens
pub fn resolve_all_within(
    signature: &str,
    max_depth: usize,
) -> Result<Vec<ResolvedType>, SignatureError> {
    let depth = nesting_depth(signature);
    if depth > max_depth {
        return Err(SignatureError::NestingTooDeep {
            depth,
            max: max_depth,
            signature: signature.to_string(),
        });
    }
    resolve_all(signature)
}
