//! Signature grammar
//!
//! Splits a bus type signature into its top-level type codes. The grammar is
//! the usual one:
//!
//! - scalars: `y b n q i u x t d s o g h`
//! - variant: `v`
//! - array: `a` followed by one complete type
//! - dict: `a{` key value `}`
//! - structure: `(` one or more complete types `)`
//!
//! Everything here is a single left-to-right scan without recursion, so the
//! parser itself is safe on arbitrarily deep input. Nesting limits are applied
//! later by the converter (see [`nesting_depth`]).

use thiserror::Error;

/// Errors produced while parsing or resolving a signature
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The signature (or the part left to parse) is empty
    #[error("empty signature")]
    Empty,

    /// A character that is not a type code
    #[error("{signature:?} - unknown type code '{code}'")]
    UnknownTypeCode { code: char, signature: String },

    /// `(` or `{` without its closing partner
    #[error("{signature:?} - unmatched '{open}'")]
    UnmatchedDelimiter { open: char, signature: String },

    /// `a` at the end of the signature
    #[error("{signature:?} - array is missing its element type")]
    MissingArrayElement { signature: String },

    /// `()`
    #[error("{signature:?} - empty structure")]
    EmptyStructure { signature: String },

    /// A structure with more fields than a record can hold
    #[error("{signature:?} - structure has too many fields ({count} > {max})")]
    TooManyFields {
        count: usize,
        max: usize,
        signature: String,
    },

    /// `a{}` or `a{s}`
    #[error("{signature:?} - too short for a dict entry")]
    DictTooShort { signature: String },

    /// A dict entry whose value part is not exactly one complete type
    #[error("{signature:?} - dict entry must hold exactly one key and one value type")]
    DictEntryArity { signature: String },

    /// Characters left over where a single complete type was expected
    #[error("{signature:?} - unexpected trailing {remainder:?}")]
    TrailingCharacters { signature: String, remainder: String },

    /// Nesting beyond the supported limit
    #[error("{signature:?} - nesting too deep ({depth} > {max})")]
    NestingTooDeep {
        depth: usize,
        max: usize,
        signature: String,
    },
}

/// Basic (non-container) type kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
}

impl ScalarKind {
    /// All scalar kinds, in type-code table order
    pub const ALL: [ScalarKind; 13] = [
        ScalarKind::Byte,
        ScalarKind::Bool,
        ScalarKind::Int16,
        ScalarKind::UInt16,
        ScalarKind::Int32,
        ScalarKind::UInt32,
        ScalarKind::Int64,
        ScalarKind::UInt64,
        ScalarKind::Double,
        ScalarKind::String,
        ScalarKind::ObjectPath,
        ScalarKind::Signature,
        ScalarKind::UnixFd,
    ];

    /// Signature character for this kind
    pub fn code(self) -> char {
        match self {
            ScalarKind::Byte => 'y',
            ScalarKind::Bool => 'b',
            ScalarKind::Int16 => 'n',
            ScalarKind::UInt16 => 'q',
            ScalarKind::Int32 => 'i',
            ScalarKind::UInt32 => 'u',
            ScalarKind::Int64 => 'x',
            ScalarKind::UInt64 => 't',
            ScalarKind::Double => 'd',
            ScalarKind::String => 's',
            ScalarKind::ObjectPath => 'o',
            ScalarKind::Signature => 'g',
            ScalarKind::UnixFd => 'h',
        }
    }

    /// Look up a kind by its signature character
    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }

    /// Human-readable name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Byte => "byte",
            ScalarKind::Bool => "bool",
            ScalarKind::Int16 => "int16",
            ScalarKind::UInt16 => "uint16",
            ScalarKind::Int32 => "int32",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Double => "double",
            ScalarKind::String => "string",
            ScalarKind::ObjectPath => "object path",
            ScalarKind::Signature => "signature",
            ScalarKind::UnixFd => "unix fd",
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One top-level type code, borrowing its sub-signatures from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode<'a> {
    Scalar(ScalarKind),
    Variant,
    /// `a` + element signature
    Array { element: &'a str },
    /// `a{` key value `}`
    Dict { key: &'a str, value: &'a str },
    /// `(` fields `)`, `fields` is the non-empty inner span
    Struct { fields: &'a str },
}

/// Index of the delimiter that brings the nesting depth back to zero
///
/// Scans `s` left to right, counting `open` as +1 and `close` as -1. Returns
/// `None` if the string ends before the depth returns to zero.
pub fn match_depth(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split the first complete type off the front of `signature`
///
/// Returns `(first, remainder)`. Only the outermost delimiters of the first
/// type are checked here; the inside is validated when it is parsed in turn.
pub fn split_first(signature: &str) -> Result<(&str, &str), SignatureError> {
    let arrays = signature.bytes().take_while(|&b| b == b'a').count();
    let body = &signature[arrays..];

    let end = match body.chars().next() {
        None if arrays == 0 => return Err(SignatureError::Empty),
        None => {
            return Err(SignatureError::MissingArrayElement {
                signature: signature.to_string(),
            })
        }
        Some('(') => find_close(body, '(', ')', signature)?,
        Some('{') if arrays > 0 => find_close(body, '{', '}', signature)?,
        Some(c) if c == 'v' || ScalarKind::from_code(c).is_some() => 1,
        Some(code) => {
            return Err(SignatureError::UnknownTypeCode {
                code,
                signature: signature.to_string(),
            })
        }
    };

    Ok(signature.split_at(arrays + end))
}

fn find_close(
    body: &str,
    open: char,
    close: char,
    signature: &str,
) -> Result<usize, SignatureError> {
    match_depth(body, open, close)
        .map(|i| i + close.len_utf8())
        .ok_or_else(|| SignatureError::UnmatchedDelimiter {
            open,
            signature: signature.to_string(),
        })
}

/// Parse exactly one top-level type from the front of `signature`
pub fn parse_one(signature: &str) -> Result<(TypeCode<'_>, &str), SignatureError> {
    let (first, rest) = split_first(signature)?;

    let code = match first.as_bytes()[0] {
        b'a' if first.as_bytes().get(1) == Some(&b'{') => {
            // a{ ... }
            let inner = &first[2..first.len() - 1];
            if inner.len() < 2 {
                return Err(SignatureError::DictTooShort {
                    signature: first.to_string(),
                });
            }
            let (key, value) = split_first(inner)?;
            if value.is_empty() {
                return Err(SignatureError::DictTooShort {
                    signature: first.to_string(),
                });
            }
            let (_, extra) = split_first(value)?;
            if !extra.is_empty() {
                return Err(SignatureError::DictEntryArity {
                    signature: first.to_string(),
                });
            }
            TypeCode::Dict { key, value }
        }
        b'a' => TypeCode::Array {
            element: &first[1..],
        },
        b'(' => {
            let fields = &first[1..first.len() - 1];
            if fields.is_empty() {
                return Err(SignatureError::EmptyStructure {
                    signature: first.to_string(),
                });
            }
            TypeCode::Struct { fields }
        }
        b'v' => TypeCode::Variant,
        other => match ScalarKind::from_code(char::from(other)) {
            Some(kind) => TypeCode::Scalar(kind),
            None => {
                return Err(SignatureError::UnknownTypeCode {
                    code: char::from(other),
                    signature: signature.to_string(),
                })
            }
        },
    };

    Ok((code, rest))
}

/// Split a signature into its top-level complete types
pub fn split_all(signature: &str) -> Result<Vec<&str>, SignatureError> {
    let mut parts = Vec::new();
    let mut rest = signature;
    while !rest.is_empty() {
        let (first, remainder) = split_first(rest)?;
        parts.push(first);
        rest = remainder;
    }
    Ok(parts)
}

/// Deepest container nesting in `signature`
///
/// Arrays, dicts and structures each count as one level; scalars and variants
/// add nothing. `"i"` is 0, `"ai"` is 1, `"a{s(ai)}"` is 3. Malformed input
/// still yields a number, it is just not meaningful.
pub fn nesting_depth(signature: &str) -> usize {
    #[derive(PartialEq)]
    enum Frame {
        Array,
        Group,
    }

    fn complete(stack: &mut Vec<Frame>) {
        while stack.last() == Some(&Frame::Array) {
            stack.pop();
        }
    }

    let mut stack = Vec::new();
    let mut max = 0;
    let mut chars = signature.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            'a' if chars.peek() == Some(&'{') => {
                chars.next();
                stack.push(Frame::Group);
            }
            'a' => stack.push(Frame::Array),
            '(' | '{' => stack.push(Frame::Group),
            ')' | '}' => {
                complete(&mut stack);
                stack.pop();
                complete(&mut stack);
            }
            _ => complete(&mut stack),
        }
        max = max.max(stack.len());
    }

    max
}
