//! Tagged runtime values.

use super::bigint::BigInt;
use super::error::RuntimeError;
use super::heap::GcRef;

/// A guest value.
///
/// Non-heap variants are plain copies; `Str` and `Array` are non-owning
/// references into the heap whose lifetime is bounded by reachability.
/// The derived equality is shallow: identity for the heap variants.
/// Structural string equality is the interpreter's job because it needs
/// the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Int(BigInt),
    Float(f64),
    Bool(bool),
    Str(GcRef),
    Array(GcRef),
}

impl Value {
    pub fn from_i64(v: i64) -> Value {
        Value::Int(BigInt::from_i64(v))
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn as_int(&self) -> Result<&BigInt, RuntimeError> {
        match self {
            Value::Int(v) => Ok(v),
            _ => Err(RuntimeError::Expected("int")),
        }
    }

    pub fn as_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Float(v) => Ok(*v),
            _ => Err(RuntimeError::Expected("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => Err(RuntimeError::Expected("bool")),
        }
    }

    pub fn as_str_ref(&self) -> Result<GcRef, RuntimeError> {
        match self {
            Value::Str(r) => Ok(*r),
            _ => Err(RuntimeError::Expected("string")),
        }
    }

    pub fn as_array_ref(&self) -> Result<GcRef, RuntimeError> {
        match self {
            Value::Array(r) => Ok(*r),
            _ => Err(RuntimeError::Expected("array")),
        }
    }

    /// The heap reference carried by this value, if any. This is what the
    /// collector traces.
    pub fn heap_ref(&self) -> Option<GcRef> {
        match self {
            Value::Str(r) | Value::Array(r) => Some(*r),
            _ => None,
        }
    }
}
