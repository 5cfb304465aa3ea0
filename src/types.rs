//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (CPU IDs, task PIDs) prevent silent type
//! confusion between the many integer-shaped quantities handlers juggle.
//! Quantities (timestamps, durations) stay as aliases.

/// CPU identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

/// Task identifier, host-native width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    /// The idle task. Windows closed while idle is current are not reported.
    pub const IDLE: Pid = Pid(0);

    pub fn is_idle(self) -> bool {
        self == Self::IDLE
    }
}

/// Monotonic per-CPU clock value in nanoseconds.
pub type TimeNs = u64;
