//! frogvm - a bytecode virtual machine for the frog language.
//!
//! The engine loads a compact binary module produced by the front-end
//! compiler, validates it, and executes it against a managed runtime with
//! tagged values, bounded big integers, a mark-and-sweep heap, and a
//! handler-cache tier for hot functions.

pub mod bytecode;
pub mod config;
pub mod runtime;

// Re-export commonly used types
pub use bytecode::{Constant, FunctionInfo, Instruction, LoadError, Module, OpCode, TypeTag};
pub use config::VmOptions;
pub use runtime::{BigInt, RuntimeError, Value, Vm};
