//! The managed runtime: values, heap, interpreter, and the tier-up cache.

mod bigint;
mod error;
mod heap;
mod jit;
mod value;
mod vm;

pub use bigint::BigInt;
pub use error::RuntimeError;
pub use heap::{GcRef, Heap, HeapObject, ObjectData, RootSet};
pub use jit::HOT_FUNC_THRESHOLD;
pub use value::Value;
pub use vm::{Vm, GLOBAL_FUNC_INDEX};
