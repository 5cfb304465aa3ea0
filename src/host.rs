//! The host side of the analyzer: primitives the embedding environment
//! provides.
//!
//! The analyzer never owns a clock or a task table. Everything it needs to
//! observe (time, the current task, the pending re-schedule flag, the IRQ
//! mask) comes through this trait, so the same state machine runs against
//! a live tracing host or against the deterministic replay host in
//! [`crate::sim`].

use std::sync::Arc;

use crate::types::{CpuId, Pid, TimeNs};

/// Host-provided primitives consumed by the event handlers.
///
/// All queries are answered for the CPU an event was raised on; handlers
/// only ever ask about the CPU they are currently running for. Implementors
/// must answer without blocking; handlers run in tracing callbacks.
pub trait Host: Send + Sync {
    /// Monotonic per-CPU clock, nanoseconds.
    fn clock(&self, cpu: CpuId) -> TimeNs;

    /// The task currently running on `cpu`.
    fn current_pid(&self, cpu: CpuId) -> Pid;

    /// Whether a re-schedule request is pending on `cpu`.
    fn need_resched(&self, cpu: CpuId) -> bool;

    /// Whether IRQs are currently masked on `cpu`.
    fn irqs_disabled(&self, cpu: CpuId) -> bool;

    /// Number of online CPUs. CPUs are identified as `0..nr_cpus()`.
    fn nr_cpus(&self) -> u32;
}

impl<T: Host + ?Sized> Host for Arc<T> {
    fn clock(&self, cpu: CpuId) -> TimeNs {
        (**self).clock(cpu)
    }

    fn current_pid(&self, cpu: CpuId) -> Pid {
        (**self).current_pid(cpu)
    }

    fn need_resched(&self, cpu: CpuId) -> bool {
        (**self).need_resched(cpu)
    }

    fn irqs_disabled(&self, cpu: CpuId) -> bool {
        (**self).irqs_disabled(cpu)
    }

    fn nr_cpus(&self) -> u32 {
        (**self).nr_cpus()
    }
}
