//! Tier-up handler cache for hot functions.
//!
//! This is not native code generation. A function that has been called
//! often enough gets a dense array of precomputed opcode-handler pointers,
//! indexed by IP offset within its code range, so the hot loop skips the
//! generic dispatch-table lookup. Semantics are identical to the slow path.

use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::Module;

use super::vm::{dispatch_table, Handler};

/// Invocation count at which a function is considered hot.
pub const HOT_FUNC_THRESHOLD: u32 = 50;

/// A cache-compiled function: precomputed handlers for `[entry_ip, end_ip)`.
#[derive(Clone)]
pub(crate) struct CompiledFunc {
    pub func_index: u32,
    pub entry_ip: u32,
    pub end_ip: u32,
    pub handlers: Rc<[Handler]>,
}

/// Per-function invocation counters plus the compiled-function cache.
pub(crate) struct CodeCache {
    counters: Vec<u32>,
    compiled: HashMap<u32, CompiledFunc>,
}

impl CodeCache {
    pub fn new(func_count: usize) -> CodeCache {
        CodeCache {
            counters: vec![0; func_count],
            compiled: HashMap::new(),
        }
    }

    /// Bump the invocation counter and return the new count.
    pub fn record_call(&mut self, func_index: u32) -> u32 {
        match self.counters.get_mut(func_index as usize) {
            Some(c) => {
                *c += 1;
                *c
            }
            None => 0,
        }
    }

    pub fn is_compiled(&self, func_index: u32) -> bool {
        self.compiled.contains_key(&func_index)
    }

    pub fn get(&self, func_index: u32) -> Option<&CompiledFunc> {
        self.compiled.get(&func_index)
    }

    /// The cache entry for this function, if present and covering `ip`.
    /// The fast path must never run outside the cached range.
    pub fn lookup(&self, func_index: u32, ip: u32) -> Option<CompiledFunc> {
        self.compiled
            .get(&func_index)
            .filter(|cf| ip >= cf.entry_ip && ip < cf.end_ip)
            .cloned()
    }

    /// Precompute the handler array for one function. Fails softly (returns
    /// false) when the range is malformed or an instruction has no
    /// registered handler.
    pub fn compile(&mut self, module: &Module, func_end_ip: &[u32], func_index: u32) -> bool {
        let Some(fn_info) = module.functions.get(func_index as usize) else {
            return false;
        };
        if fn_info.is_builtin() {
            return false;
        }
        let Some(&end_ip) = func_end_ip.get(func_index as usize) else {
            return false;
        };

        let entry_ip = fn_info.entry_ip;
        if entry_ip as usize >= module.code.len()
            || end_ip as usize > module.code.len()
            || end_ip < entry_ip
        {
            return false;
        }

        let table = dispatch_table();
        let mut handlers: Vec<Handler> = Vec::with_capacity((end_ip - entry_ip) as usize);
        for ip in entry_ip..end_ip {
            match table[module.code[ip as usize].op as usize] {
                Some(h) => handlers.push(h),
                None => return false,
            }
        }

        self.compiled.insert(
            func_index,
            CompiledFunc {
                func_index,
                entry_ip,
                end_ip,
                handlers: handlers.into(),
            },
        );
        true
    }
}
