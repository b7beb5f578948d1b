//! Runtime configuration types.

/// Execution options for the VM.
///
/// All channels are off by default; each one gates a line-oriented log
/// written to the VM's output sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Print every instruction before it executes.
    pub trace: bool,
    /// Print tier-up events (HOT, JIT COMPILED, ENTER JIT).
    pub jit_log: bool,
    /// Print collector events (GC START, GC MARKED, GC SWEPT).
    pub gc_log: bool,
}
