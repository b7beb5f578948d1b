//! Runtime error type.
//!
//! Runtime errors abort the current execution and surface to the host;
//! there is no recovery and no rollback of effects observed before the
//! failure.

use thiserror::Error;

/// Error raised by the interpreter during execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("no current frame")]
    NoFrame,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    /// A value accessor was used on the wrong variant.
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("{0} type mismatch")]
    TypeMismatch(&'static str),
    #[error("{0} requires {1}")]
    Requires(&'static str, &'static str),
    #[error("{0} missing operand")]
    MissingOperand(&'static str),
    #[error("const index out of range")]
    ConstIndexOutOfRange,
    #[error("const is not a string")]
    ConstNotString,
    #[error("unknown global: {0}")]
    UnknownGlobal(String),
    #[error("local slot out of range")]
    LocalOutOfRange,
    #[error("jump target out of range")]
    JumpOutOfRange,
    #[error("instruction pointer out of range")]
    IpOutOfRange,
    #[error("call to invalid function index")]
    BadFuncIndex,
    #[error("call argc mismatch")]
    ArgcMismatch,
    #[error("stack corrupted on return")]
    StackCorrupted,
    #[error("array index out of bounds")]
    IndexOutOfBounds,
    #[error("new_array_bool negative size")]
    NegativeArraySize,
    #[error("unknown builtin: {0}")]
    UnknownBuiltin(String),
    #[error("{0} expects {1} args")]
    BuiltinArity(&'static str, usize),
    #[error("print unsupported type")]
    PrintUnsupported,
    #[error("opcode not implemented")]
    UnimplementedOpcode,
    #[error("invalid heap reference")]
    InvalidHeapRef,
    #[error("jit handler out of range")]
    JitHandlerOutOfRange,
}
