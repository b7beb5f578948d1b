//! Object heap with a stop-the-world mark-and-sweep collector.
//!
//! Objects live in a slot table and are addressed by index, so references
//! stay valid across collections; freed slots go on a free list and are
//! reused. Collection runs only inside allocation (the safe points), driven
//! by a caller-supplied root set.

use std::io::Write;
use std::mem;

use super::error::RuntimeError;
use super::value::Value;

/// Initial collection threshold in bytes.
const INITIAL_THRESHOLD: usize = 1024 * 1024;

/// A reference to a heap object (index into the slot table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRef {
    index: usize,
}

impl GcRef {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Payload of a heap object.
#[derive(Debug)]
pub enum ObjectData {
    Str(String),
    Array(Vec<Value>),
}

/// A heap-owned object with its mark bit and size estimate.
#[derive(Debug)]
pub struct HeapObject {
    pub marked: bool,
    /// Estimate used by the collection threshold, fixed at allocation.
    pub size_bytes: usize,
    pub data: ObjectData,
}

/// The set of values the collector must treat as live.
///
/// The interpreter implements this over constants, the operand stack,
/// frame locals, set globals, and the temporary-roots scratchpad. A plain
/// value slice also works, which is what heap construction and tests use.
pub trait RootSet {
    fn visit(&self, f: &mut dyn FnMut(&Value));
}

impl RootSet for [Value] {
    fn visit(&self, f: &mut dyn FnMut(&Value)) {
        for v in self {
            f(v);
        }
    }
}

/// The garbage-collected object heap.
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free: Vec<usize>,
    heap_bytes: usize,
    threshold: usize,
    gc_log: bool,
}

impl Heap {
    pub fn new(gc_log: bool) -> Heap {
        Heap {
            objects: Vec::new(),
            free: Vec::new(),
            heap_bytes: 0,
            threshold: INITIAL_THRESHOLD,
            gc_log,
        }
    }

    /// Allocate a string object. May collect first.
    pub fn alloc_str<R: RootSet + ?Sized>(
        &mut self,
        value: String,
        roots: &R,
        log: &mut dyn Write,
    ) -> GcRef {
        let estimate = mem::size_of::<HeapObject>() + value.len();
        self.maybe_collect(estimate, roots, log);
        self.insert(HeapObject {
            marked: false,
            size_bytes: estimate,
            data: ObjectData::Str(value),
        })
    }

    /// Allocate a null-filled array object of the given length. May collect
    /// first.
    pub fn alloc_array<R: RootSet + ?Sized>(
        &mut self,
        length: usize,
        roots: &R,
        log: &mut dyn Write,
    ) -> GcRef {
        let estimate = mem::size_of::<HeapObject>() + length * mem::size_of::<Value>();
        self.maybe_collect(estimate, roots, log);
        self.insert(HeapObject {
            marked: false,
            size_bytes: estimate,
            data: ObjectData::Array(vec![Value::Null; length]),
        })
    }

    pub fn str_value(&self, r: GcRef) -> Result<&str, RuntimeError> {
        match &self.get(r)?.data {
            ObjectData::Str(s) => Ok(s),
            ObjectData::Array(_) => Err(RuntimeError::Expected("string")),
        }
    }

    pub fn array(&self, r: GcRef) -> Result<&[Value], RuntimeError> {
        match &self.get(r)?.data {
            ObjectData::Array(elems) => Ok(elems),
            ObjectData::Str(_) => Err(RuntimeError::Expected("array")),
        }
    }

    pub fn array_mut(&mut self, r: GcRef) -> Result<&mut Vec<Value>, RuntimeError> {
        match &mut self.get_mut(r)?.data {
            ObjectData::Array(elems) => Ok(elems),
            ObjectData::Str(_) => Err(RuntimeError::Expected("array")),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn heap_bytes(&self) -> usize {
        self.heap_bytes
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn get(&self, r: GcRef) -> Result<&HeapObject, RuntimeError> {
        self.objects
            .get(r.index)
            .and_then(Option::as_ref)
            .ok_or(RuntimeError::InvalidHeapRef)
    }

    fn get_mut(&mut self, r: GcRef) -> Result<&mut HeapObject, RuntimeError> {
        self.objects
            .get_mut(r.index)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::InvalidHeapRef)
    }

    fn insert(&mut self, obj: HeapObject) -> GcRef {
        self.heap_bytes += obj.size_bytes;
        match self.free.pop() {
            Some(index) => {
                self.objects[index] = Some(obj);
                GcRef { index }
            }
            None => {
                self.objects.push(Some(obj));
                GcRef {
                    index: self.objects.len() - 1,
                }
            }
        }
    }

    fn maybe_collect<R: RootSet + ?Sized>(
        &mut self,
        upcoming_bytes: usize,
        roots: &R,
        log: &mut dyn Write,
    ) {
        if self.heap_bytes + upcoming_bytes > self.threshold {
            self.collect(roots, log);
            self.threshold = (self.threshold * 2).max(self.heap_bytes * 2);
        }
    }

    /// Run a full mark-and-sweep cycle against the given roots.
    pub fn collect<R: RootSet + ?Sized>(&mut self, roots: &R, log: &mut dyn Write) {
        if self.gc_log {
            let _ = writeln!(
                log,
                "GC START heap={} objects={}",
                self.heap_bytes,
                self.object_count()
            );
        }

        for slot in self.objects.iter_mut().flatten() {
            slot.marked = false;
        }

        let mut marked_count = 0;
        self.mark_from_roots(roots, &mut marked_count);

        if self.gc_log {
            let _ = writeln!(log, "GC MARKED={}", marked_count);
        }

        let mut freed_count = 0;
        self.sweep(&mut freed_count);

        if self.gc_log {
            let _ = writeln!(log, "GC SWEPT freed={} heap={}", freed_count, self.heap_bytes);
        }
    }

    fn mark_from_roots<R: RootSet + ?Sized>(&mut self, roots: &R, marked_count: &mut usize) {
        let mut worklist = Vec::new();
        roots.visit(&mut |v| {
            if let Some(r) = v.heap_ref() {
                Self::mark_ref(&mut self.objects, r, &mut worklist, marked_count);
            }
        });

        while let Some(r) = worklist.pop() {
            // Strings are leaves; only arrays have outgoing references.
            let children: Vec<GcRef> = match self.objects.get(r.index()).and_then(Option::as_ref) {
                Some(obj) => match &obj.data {
                    ObjectData::Array(elems) => {
                        elems.iter().filter_map(Value::heap_ref).collect()
                    }
                    ObjectData::Str(_) => Vec::new(),
                },
                None => Vec::new(),
            };
            for child in children {
                Self::mark_ref(&mut self.objects, child, &mut worklist, marked_count);
            }
        }
    }

    fn mark_ref(
        objects: &mut [Option<HeapObject>],
        r: GcRef,
        worklist: &mut Vec<GcRef>,
        marked_count: &mut usize,
    ) {
        if let Some(Some(obj)) = objects.get_mut(r.index()) {
            if !obj.marked {
                obj.marked = true;
                *marked_count += 1;
                worklist.push(r);
            }
        }
    }

    fn sweep(&mut self, freed_count: &mut usize) {
        for (index, slot) in self.objects.iter_mut().enumerate() {
            match slot {
                Some(obj) if !obj.marked => {
                    self.heap_bytes -= obj.size_bytes;
                    *slot = None;
                    self.free.push(index);
                    *freed_count += 1;
                }
                Some(obj) => {
                    obj.marked = false;
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn sink() -> io::Sink {
        io::sink()
    }

    #[test]
    fn test_alloc_and_read_back() {
        let mut heap = Heap::new(false);
        let s = heap.alloc_str("hello".to_string(), &[][..], &mut sink());
        let a = heap.alloc_array(3, &[][..], &mut sink());

        assert_eq!(heap.str_value(s).unwrap(), "hello");
        assert_eq!(heap.array(a).unwrap().len(), 3);
        assert!(matches!(heap.array(a).unwrap()[0], Value::Null));
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_kind_mismatch() {
        let mut heap = Heap::new(false);
        let s = heap.alloc_str("x".to_string(), &[][..], &mut sink());
        assert_eq!(heap.array(s), Err(RuntimeError::Expected("array")));

        let a = heap.alloc_array(1, &[][..], &mut sink());
        assert_eq!(heap.str_value(a), Err(RuntimeError::Expected("string")));
    }

    #[test]
    fn test_heap_bytes_accounting() {
        let mut heap = Heap::new(false);
        assert_eq!(heap.heap_bytes(), 0);

        let s = heap.alloc_str("abcd".to_string(), &[][..], &mut sink());
        let expected = mem::size_of::<HeapObject>() + 4;
        assert_eq!(heap.heap_bytes(), expected);

        heap.collect(&[Value::Str(s)][..], &mut sink());
        assert_eq!(heap.heap_bytes(), expected);

        heap.collect(&[][..], &mut sink());
        assert_eq!(heap.heap_bytes(), 0);
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let mut heap = Heap::new(false);
        let keep = heap.alloc_str("keep".to_string(), &[][..], &mut sink());
        let _garbage = heap.alloc_str("garbage".to_string(), &[][..], &mut sink());

        heap.collect(&[Value::Str(keep)][..], &mut sink());

        assert_eq!(heap.object_count(), 1);
        assert_eq!(heap.str_value(keep).unwrap(), "keep");
    }

    #[test]
    fn test_collect_traces_array_children() {
        let mut heap = Heap::new(false);
        let s = heap.alloc_str("nested".to_string(), &[][..], &mut sink());
        let outer = heap.alloc_array(1, &[][..], &mut sink());
        heap.array_mut(outer).unwrap()[0] = Value::Str(s);

        heap.collect(&[Value::Array(outer)][..], &mut sink());

        assert_eq!(heap.object_count(), 2);
        assert_eq!(heap.str_value(s).unwrap(), "nested");
    }

    #[test]
    fn test_collect_handles_cycles_of_sharing() {
        // Two arrays referencing the same string: marked once, swept never.
        let mut heap = Heap::new(false);
        let s = heap.alloc_str("shared".to_string(), &[][..], &mut sink());
        let a = heap.alloc_array(1, &[][..], &mut sink());
        let b = heap.alloc_array(1, &[][..], &mut sink());
        heap.array_mut(a).unwrap()[0] = Value::Str(s);
        heap.array_mut(b).unwrap()[0] = Value::Str(s);

        heap.collect(&[Value::Array(a), Value::Array(b)][..], &mut sink());
        assert_eq!(heap.object_count(), 3);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let mut heap = Heap::new(false);
        let keep = heap.alloc_array(2, &[][..], &mut sink());
        let _dead = heap.alloc_array(2, &[][..], &mut sink());

        let roots = [Value::Array(keep)];
        heap.collect(&roots[..], &mut sink());
        let count = heap.object_count();
        let bytes = heap.heap_bytes();

        heap.collect(&roots[..], &mut sink());
        assert_eq!(heap.object_count(), count);
        assert_eq!(heap.heap_bytes(), bytes);
    }

    #[test]
    fn test_marks_cleared_after_collect() {
        let mut heap = Heap::new(false);
        let keep = heap.alloc_str("live".to_string(), &[][..], &mut sink());
        heap.collect(&[Value::Str(keep)][..], &mut sink());
        assert!(!heap.get(keep).unwrap().marked);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = Heap::new(false);
        let dead = heap.alloc_str("dead".to_string(), &[][..], &mut sink());
        heap.collect(&[][..], &mut sink());

        let fresh = heap.alloc_str("fresh".to_string(), &[][..], &mut sink());
        assert_eq!(fresh.index(), dead.index());
        assert_eq!(heap.object_count(), 1);
    }

    #[test]
    fn test_threshold_grows_after_collection() {
        let mut heap = Heap::new(false);
        assert_eq!(heap.threshold(), INITIAL_THRESHOLD);

        // A single oversized allocation forces a collection up front.
        heap.alloc_array(100_000, &[][..], &mut sink());
        assert!(heap.threshold() >= INITIAL_THRESHOLD * 2);
    }

    #[test]
    fn test_gc_log_lines() {
        let mut heap = Heap::new(true);
        let mut log = Vec::new();
        heap.alloc_str("x".to_string(), &[][..], &mut io::sink());
        heap.collect(&[][..], &mut log);

        let text = String::from_utf8(log).unwrap();
        assert!(text.contains("GC START"));
        assert!(text.contains("GC MARKED=0"));
        assert!(text.contains("GC SWEPT freed=1"));
    }
}
