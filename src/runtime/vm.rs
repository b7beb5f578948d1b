//! The bytecode interpreter.
//!
//! Execution alternates between a generic [`Vm::step`] that dispatches one
//! instruction through the handler table and a fast path that reuses a
//! precomputed per-function handler array once a function has gone hot
//! (see [`super::jit`]).

use std::collections::HashMap;
use std::io::{self, Write};

use crate::bytecode::{
    Constant, Instruction, Module, OpCode, TypeTag, BUILTIN_ENTRY_IP, OP_COUNT,
};
use crate::config::VmOptions;

use super::error::RuntimeError;
use super::heap::{GcRef, Heap, RootSet};
use super::jit::{CodeCache, CompiledFunc, HOT_FUNC_THRESHOLD};
use super::value::Value;

/// Sentinel function index of the global script frame.
pub const GLOBAL_FUNC_INDEX: u32 = 0xFFFF_FFFF;

/// An opcode handler. Uniform shape so handlers can be stored both in the
/// dispatch table and in per-function tier-up arrays.
pub(crate) type Handler = fn(&mut Vm, &Instruction) -> Result<(), RuntimeError>;

/// One activation record.
#[derive(Debug)]
struct CallFrame {
    /// Index into the function table, or [`GLOBAL_FUNC_INDEX`].
    func_index: u32,
    /// Current instruction pointer.
    ip: u32,
    /// Caller IP to restore on return.
    return_ip: u32,
    /// Operand-stack depth at entry; the stack is truncated back to this on
    /// return.
    base_stack_size: usize,
    locals: Vec<Value>,
}

/// Root enumerator over the interpreter state, in a fixed order: constants,
/// operand stack, frame locals, set globals, temporary roots.
struct VmRoots<'a> {
    consts: &'a [Value],
    stack: &'a [Value],
    frames: &'a [CallFrame],
    globals: &'a [Value],
    globals_set: &'a [bool],
    temp_roots: &'a [Value],
}

impl RootSet for VmRoots<'_> {
    fn visit(&self, f: &mut dyn FnMut(&Value)) {
        for v in self.consts {
            f(v);
        }
        for v in self.stack {
            f(v);
        }
        for frame in self.frames {
            for v in &frame.locals {
                f(v);
            }
        }
        for (i, v) in self.globals.iter().enumerate() {
            if self.globals_set[i] {
                f(v);
            }
        }
        for v in self.temp_roots {
            f(v);
        }
    }
}

/// The virtual machine. Owns the module, the heap, and all mutable
/// execution state; single-threaded and non-reentrant.
pub struct Vm {
    module: Module,
    options: VmOptions,

    heap: Heap,

    const_values: Vec<Value>,
    stack: Vec<Value>,

    globals_values: Vec<Value>,
    globals_set: Vec<bool>,

    frames: Vec<CallFrame>,
    temp_roots: Vec<Value>,

    func_end_ip: Vec<u32>,
    code_cache: CodeCache,

    output: Box<dyn Write>,
}

impl Vm {
    pub fn new(module: Module, options: VmOptions) -> Vm {
        Self::with_output(module, options, Box::new(io::stdout()))
    }

    /// Create a VM with a custom output sink. Guest `print` output and the
    /// trace/JIT/GC log channels all go to this sink.
    pub fn with_output(module: Module, options: VmOptions, mut output: Box<dyn Write>) -> Vm {
        let mut heap = Heap::new(options.gc_log);

        // Constants are built once. String constants become heap objects
        // that stay rooted for the life of the interpreter.
        let mut const_values: Vec<Value> = Vec::with_capacity(module.const_pool.len());
        for c in &module.const_pool {
            let v = match c {
                Constant::Int(v) => Value::from_i64(*v as i64),
                Constant::Float(v) => Value::Float(*v),
                Constant::Bool(v) => Value::Bool(*v),
                Constant::Str(s) => {
                    Value::Str(heap.alloc_str(s.clone(), &const_values[..], &mut output))
                }
            };
            const_values.push(v);
        }

        let func_end_ip = build_func_ranges(&module);
        let globals_len = module.const_pool.len();
        let code_cache = CodeCache::new(module.functions.len());

        Vm {
            module,
            options,
            heap,
            const_values,
            stack: Vec::new(),
            globals_values: vec![Value::Null; globals_len],
            globals_set: vec![false; globals_len],
            frames: Vec::new(),
            temp_roots: Vec::new(),
            func_end_ip,
            code_cache,
            output,
        }
    }

    /// The operand stack (for inspection after a run).
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Snapshot of the set globals, keyed by name.
    pub fn globals(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for (i, v) in self.globals_values.iter().enumerate() {
            if !self.globals_set[i] {
                continue;
            }
            if let Some(Constant::Str(name)) = self.module.const_pool.get(i) {
                out.insert(name.clone(), *v);
            }
        }
        out
    }

    /// Execute the module from instruction 0 in a fresh global frame.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        self.temp_roots.clear();
        self.globals_values.fill(Value::Null);
        self.globals_set.fill(false);

        self.frames.push(CallFrame {
            func_index: GLOBAL_FUNC_INDEX,
            ip: 0,
            return_ip: 0,
            base_stack_size: 0,
            locals: Vec::new(),
        });

        loop {
            let (func_index, ip) = match self.frames.last() {
                Some(f) => (f.func_index, f.ip),
                None => break,
            };

            if ip as usize >= self.module.code.len() {
                self.frames.pop();
                continue;
            }

            let cached = if func_index == GLOBAL_FUNC_INDEX {
                None
            } else {
                self.code_cache.lookup(func_index, ip)
            };

            match cached {
                Some(cf) => self.run_jit(&cf)?,
                None => self.step()?,
            }
        }

        Ok(())
    }

    /// Execute one instruction through the generic dispatch table.
    fn step(&mut self) -> Result<(), RuntimeError> {
        let ip = self.frame()?.ip;
        if ip as usize >= self.module.code.len() {
            return Err(RuntimeError::IpOutOfRange);
        }
        let ins = self.module.code[ip as usize];

        if self.options.trace {
            self.trace(&ins, ip);
        }

        self.frame_mut()?.ip += 1;

        match dispatch_table()[ins.op as usize] {
            Some(handler) => handler(self, &ins),
            None => Err(RuntimeError::UnimplementedOpcode),
        }
    }

    /// Fast path: run the cached handlers while the top frame stays inside
    /// the compiled function's range. CALL and RET naturally exit here by
    /// changing the frame.
    fn run_jit(&mut self, cf: &CompiledFunc) -> Result<(), RuntimeError> {
        if self.options.jit_log {
            let name = self.func_name(cf.func_index).unwrap_or("?").to_string();
            let _ = writeln!(self.output, "ENTER JIT func {}@{}", name, cf.func_index);
        }

        loop {
            let (func_index, ip) = match self.frames.last() {
                Some(f) => (f.func_index, f.ip),
                None => break,
            };
            if func_index != cf.func_index {
                break;
            }
            if ip < cf.entry_ip || ip >= cf.end_ip {
                break;
            }

            let ins = self.module.code[ip as usize];
            if self.options.trace {
                self.trace(&ins, ip);
            }

            self.frame_mut()?.ip += 1;

            let off = (ip - cf.entry_ip) as usize;
            let handler = *cf
                .handlers
                .get(off)
                .ok_or(RuntimeError::JitHandlerOutOfRange)?;
            handler(self, &ins)?;
        }

        Ok(())
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::NoFrame)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::NoFrame)
    }

    fn const_string(&self, const_index: u32) -> Result<&str, RuntimeError> {
        match self.module.const_pool.get(const_index as usize) {
            Some(Constant::Str(s)) => Ok(s),
            Some(_) => Err(RuntimeError::ConstNotString),
            None => Err(RuntimeError::ConstIndexOutOfRange),
        }
    }

    fn func_name(&self, func_index: u32) -> Result<&str, RuntimeError> {
        let f = self
            .module
            .functions
            .get(func_index as usize)
            .ok_or(RuntimeError::BadFuncIndex)?;
        self.const_string(f.name_const)
    }

    fn is_void_return(&self, func_index: u32) -> Result<bool, RuntimeError> {
        if func_index == GLOBAL_FUNC_INDEX {
            return Ok(true);
        }
        let f = self
            .module
            .functions
            .get(func_index as usize)
            .ok_or(RuntimeError::BadFuncIndex)?;
        Ok(f.return_type == TypeTag::Void)
    }

    /// Keep `values` reachable for the duration of `f`. The scratchpad is
    /// truncated back on every exit path, including failure.
    fn with_temp_roots<T>(
        &mut self,
        values: &[Value],
        f: impl FnOnce(&mut Vm) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mark = self.temp_roots.len();
        self.temp_roots.extend_from_slice(values);
        let out = f(self);
        self.temp_roots.truncate(mark);
        out
    }

    /// Allocate a heap string with the interpreter state as roots.
    fn alloc_string(&mut self, s: String) -> GcRef {
        let roots = VmRoots {
            consts: &self.const_values,
            stack: &self.stack,
            frames: &self.frames,
            globals: &self.globals_values,
            globals_set: &self.globals_set,
            temp_roots: &self.temp_roots,
        };
        self.heap.alloc_str(s, &roots, &mut self.output)
    }

    /// Allocate a null-filled heap array with the interpreter state as
    /// roots.
    fn alloc_array(&mut self, length: usize) -> GcRef {
        let roots = VmRoots {
            consts: &self.const_values,
            stack: &self.stack,
            frames: &self.frames,
            globals: &self.globals_values,
            globals_set: &self.globals_set,
            temp_roots: &self.temp_roots,
        };
        self.heap.alloc_array(length, &roots, &mut self.output)
    }

    fn add_values(&mut self, l: Value, r: Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.add(&b)?)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Str(ls), Value::Str(rs)) => self.with_temp_roots(&[l, r], |vm| {
                let s = {
                    let a = vm.heap.str_value(ls)?;
                    let b = vm.heap.str_value(rs)?;
                    format!("{}{}", a, b)
                };
                Ok(Value::Str(vm.alloc_string(s)))
            }),
            _ => Err(RuntimeError::TypeMismatch("ADD")),
        }
    }

    fn sub_values(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.sub(b)?)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            _ => Err(RuntimeError::TypeMismatch("SUB")),
        }
    }

    fn mul_values(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.mul(b)?)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            _ => Err(RuntimeError::TypeMismatch("MUL")),
        }
    }

    fn div_values(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                if b.is_zero() {
                    return Err(RuntimeError::DivisionByZero);
                }
                Ok(Value::Int(a.div(b)?))
            }
            (Value::Float(a), Value::Float(b)) => {
                if *b == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Ok(Value::Float(a / b))
            }
            _ => Err(RuntimeError::TypeMismatch("DIV")),
        }
    }

    fn mod_values(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                if b.is_zero() {
                    return Err(RuntimeError::ModuloByZero);
                }
                Ok(Value::Int(a.rem(b)?))
            }
            _ => Err(RuntimeError::Requires("MOD", "int")),
        }
    }

    fn neg_value(&self, v: &Value) -> Result<Value, RuntimeError> {
        match v {
            Value::Int(a) => Ok(Value::Int(a.neg())),
            Value::Float(a) => Ok(Value::Float(-a)),
            _ => Err(RuntimeError::TypeMismatch("NEG")),
        }
    }

    /// Structural equality for primitives and strings, identity for arrays.
    /// Mismatched tags are an error, not `false`.
    fn eq_values(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::Float(a), Value::Float(b)) => Ok(a == b),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => {
                Ok(self.heap.str_value(*a)? == self.heap.str_value(*b)?)
            }
            (Value::Array(a), Value::Array(b)) => Ok(a == b),
            _ => Err(RuntimeError::TypeMismatch("EQ")),
        }
    }

    fn lt_values(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a < b),
            (Value::Float(a), Value::Float(b)) => Ok(a < b),
            _ if l.tag_name() == r.tag_name() => Err(RuntimeError::Requires("LT", "numeric")),
            _ => Err(RuntimeError::TypeMismatch("LT")),
        }
    }

    fn le_values(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a <= b),
            (Value::Float(a), Value::Float(b)) => Ok(a <= b),
            _ if l.tag_name() == r.tag_name() => Err(RuntimeError::Requires("LE", "numeric")),
            _ => Err(RuntimeError::TypeMismatch("LE")),
        }
    }

    fn gt_values(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a > b),
            (Value::Float(a), Value::Float(b)) => Ok(a > b),
            _ if l.tag_name() == r.tag_name() => Err(RuntimeError::Requires("GT", "numeric")),
            _ => Err(RuntimeError::TypeMismatch("GT")),
        }
    }

    fn ge_values(&self, l: &Value, r: &Value) -> Result<bool, RuntimeError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(a >= b),
            (Value::Float(a), Value::Float(b)) => Ok(a >= b),
            _ if l.tag_name() == r.tag_name() => Err(RuntimeError::Requires("GE", "numeric")),
            _ => Err(RuntimeError::TypeMismatch("GE")),
        }
    }

    fn call_builtin(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match name {
            "print" => {
                if args.len() != 1 {
                    return Err(RuntimeError::BuiltinArity("print", 1));
                }
                match &args[0] {
                    Value::Int(v) => {
                        let _ = writeln!(self.output, "{}", v);
                    }
                    Value::Float(v) => {
                        let _ = writeln!(self.output, "{}", v);
                    }
                    Value::Bool(v) => {
                        let _ = writeln!(self.output, "{}", v);
                    }
                    Value::Str(r) => {
                        let s = self.heap.str_value(*r)?.to_string();
                        let _ = writeln!(self.output, "{}", s);
                    }
                    _ => return Err(RuntimeError::PrintUnsupported),
                }
                Ok(Value::Null)
            }

            "len" => {
                if args.len() != 1 {
                    return Err(RuntimeError::BuiltinArity("len", 1));
                }
                let r = match args[0] {
                    Value::Array(r) => r,
                    _ => return Err(RuntimeError::Requires("len", "array")),
                };
                let len = self.heap.array(r)?.len();
                Ok(Value::from_i64(len as i64))
            }

            "new_array_bool" => {
                if args.len() != 2 {
                    return Err(RuntimeError::BuiltinArity("new_array_bool", 2));
                }
                let (n, fill) = match (&args[0], &args[1]) {
                    (Value::Int(n), Value::Bool(b)) => (n, *b),
                    _ => return Err(RuntimeError::TypeMismatch("new_array_bool")),
                };
                if n.is_negative() {
                    return Err(RuntimeError::NegativeArraySize);
                }
                let length = n.try_to_i64().ok_or(RuntimeError::IntegerOverflow)? as usize;

                let r = self.alloc_array(length);
                for slot in self.heap.array_mut(r)? {
                    *slot = Value::Bool(fill);
                }
                Ok(Value::Array(r))
            }

            "push_int" => {
                if args.len() != 2 {
                    return Err(RuntimeError::BuiltinArity("push_int", 2));
                }
                let (src_ref, item) = match (&args[0], &args[1]) {
                    (Value::Array(r), Value::Int(v)) => (*r, *v),
                    _ => return Err(RuntimeError::TypeMismatch("push_int")),
                };

                // The source array is rooted through the argument view, so
                // its elements survive the allocation below.
                let src = self.heap.array(src_ref)?.to_vec();
                let out = self.alloc_array(src.len() + 1);
                let elems = self.heap.array_mut(out)?;
                elems[..src.len()].copy_from_slice(&src);
                elems[src.len()] = Value::Int(item);
                Ok(Value::Array(out))
            }

            _ => Err(RuntimeError::UnknownBuiltin(name.to_string())),
        }
    }

    /// Bump the hot counter for a bytecode function and cache-compile it at
    /// the threshold.
    fn maybe_tier_up(&mut self, func_index: u32) -> Result<(), RuntimeError> {
        let Some(fn_info) = self.module.functions.get(func_index as usize) else {
            return Ok(());
        };
        if fn_info.is_builtin() {
            return Ok(());
        }

        let count = self.code_cache.record_call(func_index);
        if count == HOT_FUNC_THRESHOLD && self.options.jit_log {
            let name = self.func_name(func_index)?.to_string();
            let _ = writeln!(
                self.output,
                "HOT func {}@{} count={}",
                name, func_index, count
            );
        }

        if count >= HOT_FUNC_THRESHOLD && !self.code_cache.is_compiled(func_index) {
            if self
                .code_cache
                .compile(&self.module, &self.func_end_ip, func_index)
            {
                if self.options.jit_log {
                    let name = self.func_name(func_index)?.to_string();
                    let entry = self
                        .code_cache
                        .get(func_index)
                        .map(|cf| cf.handlers.as_ptr() as usize)
                        .unwrap_or(0);
                    let _ = writeln!(
                        self.output,
                        "JIT COMPILED func {}@{} entry={}",
                        name, func_index, entry
                    );
                }
            } else if self.options.jit_log {
                let _ = writeln!(self.output, "compile failed");
            }
        }

        Ok(())
    }

    fn call_function(&mut self, func_index: u32, argc: u16) -> Result<(), RuntimeError> {
        let (entry_ip, param_count, local_count, return_type) = {
            let f = self
                .module
                .functions
                .get(func_index as usize)
                .ok_or(RuntimeError::BadFuncIndex)?;
            (f.entry_ip, f.param_count, f.local_count, f.return_type)
        };

        if argc != param_count {
            return Err(RuntimeError::ArgcMismatch);
        }

        if entry_ip == BUILTIN_ENTRY_IP {
            let argc = argc as usize;
            if argc > self.stack.len() {
                return Err(RuntimeError::StackUnderflow);
            }
            let args: Vec<Value> = self.stack[self.stack.len() - argc..].to_vec();
            let name = self.func_name(func_index)?.to_string();
            let has_ret = return_type != TypeTag::Void;

            let ret = self.with_temp_roots(&args, |vm| vm.call_builtin(&name, &args))?;

            self.stack.truncate(self.stack.len() - argc);
            if has_ret {
                self.push(ret);
            }
            return Ok(());
        }

        self.maybe_tier_up(func_index)?;

        let return_ip = self.frame()?.ip;
        let mut locals = vec![Value::Null; local_count as usize];
        for i in (0..argc as usize).rev() {
            locals[i] = self.pop()?;
        }

        self.frames.push(CallFrame {
            func_index,
            ip: entry_ip,
            return_ip,
            base_stack_size: self.stack.len(),
            locals,
        });
        Ok(())
    }

    fn ret_from_function(&mut self) -> Result<(), RuntimeError> {
        let has_ret = !self.is_void_return(self.frame()?.func_index)?;
        let mut ret = Value::Null;
        if has_ret {
            ret = self.pop()?;
        }

        let finished = self.frames.pop().ok_or(RuntimeError::NoFrame)?;
        if self.stack.len() < finished.base_stack_size {
            return Err(RuntimeError::StackCorrupted);
        }
        self.stack.truncate(finished.base_stack_size);

        if let Some(caller) = self.frames.last_mut() {
            caller.ip = finished.return_ip;
            if has_ret {
                self.stack.push(ret);
            }
        }
        Ok(())
    }

    fn value_repr(&self, v: &Value) -> String {
        match v {
            Value::Null => "null".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Str(r) => match self.heap.str_value(*r) {
                Ok(s) => format!("\"{}\"", s),
                Err(_) => "<invalid string>".to_string(),
            },
            Value::Array(r) => match self.heap.array(*r) {
                Ok(elems) => format!("array@{}(len={})", r.index(), elems.len()),
                Err(_) => "<invalid array>".to_string(),
            },
        }
    }

    fn trace(&mut self, ins: &Instruction, ip_before: u32) {
        let mut line = format!("ip={} {}", ip_before, ins.op.name());
        if let Some(a) = ins.a {
            line.push_str(&format!(" a={}", a));
        }
        if let Some(b) = ins.b {
            line.push_str(&format!(" b={}", b));
        }

        line.push_str(" | stack=");
        for (shown, v) in self.stack.iter().rev().take(3).enumerate() {
            if shown > 0 {
                line.push(',');
            }
            line.push_str(&self.value_repr(v));
        }

        let _ = writeln!(self.output, "{}", line);
    }
}

/// Compute each bytecode function's exclusive end IP: the entry of the next
/// non-builtin function (by entry order) or the end of the code.
fn build_func_ranges(module: &Module) -> Vec<u32> {
    let code_len = module.code.len() as u32;
    let mut end_ips = vec![code_len; module.functions.len()];

    let mut entries: Vec<(u32, usize)> = module
        .functions
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.is_builtin())
        .map(|(i, f)| (f.entry_ip, i))
        .collect();
    entries.sort_by_key(|&(entry_ip, _)| entry_ip);

    for i in 0..entries.len() {
        let (entry_ip, func_index) = entries[i];
        let mut end_ip = code_len;
        if i + 1 < entries.len() {
            end_ip = entries[i + 1].0;
        }
        if end_ip < entry_ip || end_ip > code_len {
            end_ip = code_len;
        }
        end_ips[func_index] = end_ip;
    }

    end_ips
}

/// Handler table indexed by opcode discriminant.
pub(crate) fn dispatch_table() -> &'static [Option<Handler>; OP_COUNT] {
    static TABLE: [Option<Handler>; OP_COUNT] = [
        Some(op_push_const),   // PUSH_CONST
        Some(op_pop),          // POP
        Some(op_load_local),   // LOAD_LOCAL
        Some(op_store_local),  // STORE_LOCAL
        Some(op_load_global),  // LOAD_GLOBAL
        Some(op_store_global), // STORE_GLOBAL
        Some(op_add),          // ADD
        Some(op_sub),          // SUB
        Some(op_mul),          // MUL
        Some(op_div),          // DIV
        Some(op_mod),          // MOD
        Some(op_neg),          // NEG
        Some(op_eq),           // EQ
        Some(op_neq),          // NEQ
        Some(op_lt),           // LT
        Some(op_le),           // LE
        Some(op_gt),           // GT
        Some(op_ge),           // GE
        Some(op_and),          // AND
        Some(op_or),           // OR
        Some(op_not),          // NOT
        Some(op_jump),         // JUMP
        Some(op_jump_false),   // JUMP_FALSE
        Some(op_call),         // CALL
        Some(op_ret),          // RET
        Some(op_new_array),    // NEW_ARRAY
        Some(op_load_index),   // LOAD_INDEX
        Some(op_store_index),  // STORE_INDEX
    ];
    &TABLE
}

fn op_push_const(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let idx = ins.a.ok_or(RuntimeError::MissingOperand("PUSH_CONST"))?;
    let v = *vm
        .const_values
        .get(idx as usize)
        .ok_or(RuntimeError::ConstIndexOutOfRange)?;
    vm.push(v);
    Ok(())
}

fn op_pop(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    vm.pop()?;
    Ok(())
}

fn op_load_local(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let slot = ins.b.ok_or(RuntimeError::MissingOperand("LOAD_LOCAL"))? as usize;
    let v = *vm
        .frame()?
        .locals
        .get(slot)
        .ok_or(RuntimeError::LocalOutOfRange)?;
    vm.push(v);
    Ok(())
}

fn op_store_local(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let slot = ins.b.ok_or(RuntimeError::MissingOperand("STORE_LOCAL"))? as usize;
    if slot >= vm.frame()?.locals.len() {
        return Err(RuntimeError::LocalOutOfRange);
    }
    let v = vm.pop()?;
    vm.frame_mut()?.locals[slot] = v;
    Ok(())
}

fn op_load_global(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let idx = ins.a.ok_or(RuntimeError::MissingOperand("LOAD_GLOBAL"))? as usize;
    if idx >= vm.globals_values.len() {
        return Err(RuntimeError::ConstIndexOutOfRange);
    }
    if !vm.globals_set[idx] {
        let name = vm.const_string(idx as u32)?.to_string();
        return Err(RuntimeError::UnknownGlobal(name));
    }
    let v = vm.globals_values[idx];
    vm.push(v);
    Ok(())
}

fn op_store_global(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let idx = ins.a.ok_or(RuntimeError::MissingOperand("STORE_GLOBAL"))? as usize;
    if idx >= vm.globals_values.len() {
        return Err(RuntimeError::ConstIndexOutOfRange);
    }
    // Globals are keyed by a string constant; re-check at use.
    vm.const_string(idx as u32)?;
    let v = vm.pop()?;
    vm.globals_values[idx] = v;
    vm.globals_set[idx] = true;
    Ok(())
}

fn op_add(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.add_values(l, r)?;
    vm.push(out);
    Ok(())
}

fn op_sub(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.sub_values(&l, &r)?;
    vm.push(out);
    Ok(())
}

fn op_mul(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.mul_values(&l, &r)?;
    vm.push(out);
    Ok(())
}

fn op_div(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.div_values(&l, &r)?;
    vm.push(out);
    Ok(())
}

fn op_mod(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.mod_values(&l, &r)?;
    vm.push(out);
    Ok(())
}

fn op_neg(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let v = vm.pop()?;
    let out = vm.neg_value(&v)?;
    vm.push(out);
    Ok(())
}

fn op_eq(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.eq_values(&l, &r)?;
    vm.push(Value::Bool(out));
    Ok(())
}

fn op_neq(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.eq_values(&l, &r)?;
    vm.push(Value::Bool(!out));
    Ok(())
}

fn op_lt(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.lt_values(&l, &r)?;
    vm.push(Value::Bool(out));
    Ok(())
}

fn op_le(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.le_values(&l, &r)?;
    vm.push(Value::Bool(out));
    Ok(())
}

fn op_gt(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.gt_values(&l, &r)?;
    vm.push(Value::Bool(out));
    Ok(())
}

fn op_ge(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    let out = vm.ge_values(&l, &r)?;
    vm.push(Value::Bool(out));
    Ok(())
}

fn op_and(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => {
            vm.push(Value::Bool(a && b));
            Ok(())
        }
        _ => Err(RuntimeError::Requires("AND", "bool")),
    }
}

fn op_or(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let r = vm.pop()?;
    let l = vm.pop()?;
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => {
            vm.push(Value::Bool(a || b));
            Ok(())
        }
        _ => Err(RuntimeError::Requires("OR", "bool")),
    }
}

fn op_not(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let v = vm.pop()?;
    match v {
        Value::Bool(b) => {
            vm.push(Value::Bool(!b));
            Ok(())
        }
        _ => Err(RuntimeError::Requires("NOT", "bool")),
    }
}

fn op_jump(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let target = ins.a.ok_or(RuntimeError::MissingOperand("JUMP"))?;
    if target as usize >= vm.module.code.len() {
        return Err(RuntimeError::JumpOutOfRange);
    }
    vm.frame_mut()?.ip = target;
    Ok(())
}

fn op_jump_false(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let target = ins.a.ok_or(RuntimeError::MissingOperand("JUMP_FALSE"))?;
    if target as usize >= vm.module.code.len() {
        return Err(RuntimeError::JumpOutOfRange);
    }
    let cond = vm.pop()?;
    let Value::Bool(b) = cond else {
        return Err(RuntimeError::Requires("JUMP_FALSE", "bool"));
    };
    if !b {
        vm.frame_mut()?.ip = target;
    }
    Ok(())
}

fn op_call(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let (Some(func_index), Some(argc)) = (ins.a, ins.b) else {
        return Err(RuntimeError::MissingOperand("CALL"));
    };
    vm.call_function(func_index, argc)
}

fn op_ret(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    vm.ret_from_function()
}

fn op_new_array(vm: &mut Vm, ins: &Instruction) -> Result<(), RuntimeError> {
    let count = ins.b.ok_or(RuntimeError::MissingOperand("NEW_ARRAY"))? as usize;
    if count > vm.stack.len() {
        return Err(RuntimeError::StackUnderflow);
    }

    // Element values are still on the operand stack during the allocation,
    // so a collection here cannot reclaim them.
    let r = vm.alloc_array(count);
    for i in (0..count).rev() {
        let v = vm.pop()?;
        vm.heap.array_mut(r)?[i] = v;
    }
    vm.push(Value::Array(r));
    Ok(())
}

fn op_load_index(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let idx = vm.pop()?;
    let arr = vm.pop()?;

    let Value::Int(i) = idx else {
        return Err(RuntimeError::Requires("LOAD_INDEX", "int index"));
    };
    let Value::Array(r) = arr else {
        return Err(RuntimeError::Requires("LOAD_INDEX", "array"));
    };

    let elems = vm.heap.array(r)?;
    let i = match i.try_to_i64() {
        Some(i) if i >= 0 && (i as usize) < elems.len() => i as usize,
        _ => return Err(RuntimeError::IndexOutOfBounds),
    };
    let v = elems[i];
    vm.push(v);
    Ok(())
}

fn op_store_index(vm: &mut Vm, _ins: &Instruction) -> Result<(), RuntimeError> {
    let val = vm.pop()?;
    let idx = vm.pop()?;
    let arr = vm.pop()?;

    let Value::Int(i) = idx else {
        return Err(RuntimeError::Requires("STORE_INDEX", "int index"));
    };
    let Value::Array(r) = arr else {
        return Err(RuntimeError::Requires("STORE_INDEX", "array"));
    };

    let elems = vm.heap.array_mut(r)?;
    let i = match i.try_to_i64() {
        Some(i) if i >= 0 && (i as usize) < elems.len() => i as usize,
        _ => return Err(RuntimeError::IndexOutOfBounds),
    };
    elems[i] = val;
    Ok(())
}
