//! Per-CPU window state and the interference-safe timing primitives.
//!
//! The thread-visible windows (POID, PAIE, DST) must report durations with
//! interrupt interference already removed. Instead of accumulating a
//! separate subtrahend, interrupts push the window's start timestamp forward
//! by their own duration while they execute. A single field then answers
//! three questions at once: whether the window is open (`start != 0`), how
//! long it has run, and how much interference to discount.
//!
//! Reading the clock and the start field is not atomic with respect to an
//! interrupt arriving in between, which could otherwise produce a negative
//! duration (start pushed past the clock value already read). The
//! `int_counter` optimistic-retry protocol below closes that race: every
//! interrupt entry observed on the CPU bumps the counter, and a
//! read-the-clock sequence that saw the counter change is retried.
//!
//! Fields mutated by interrupt-context handlers re-entering the owning
//! thread's sequences are relaxed atomics. There are no cross-CPU writers;
//! the atomics model same-CPU re-entrancy and keep the aggregate `Sync` so
//! a threaded host can share the analyzer.

use std::sync::atomic::{compiler_fence, AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::types::TimeNs;

/// A window is open iff its start timestamp is non-zero.
pub(crate) fn is_open(start: &AtomicU64) -> bool {
    start.load(Ordering::Relaxed) != 0
}

/// Preemption or IRQ disabled by a thread.
#[derive(Debug, Default)]
pub(crate) struct Poid {
    /// Preemption currently disabled by a thread.
    pub pd: AtomicBool,
    /// IRQs currently disabled by a thread.
    pub id: AtomicBool,
    pub start: AtomicU64,
    pub max: AtomicU64,
}

/// Preemption and IRQs enabled, re-schedule request pending.
#[derive(Debug, Default)]
pub(crate) struct Paie {
    pub start: AtomicU64,
    pub max: AtomicU64,
}

/// Preemption disabled to schedule.
#[derive(Debug, Default)]
pub(crate) struct Psd {
    pub start: AtomicU64,
    pub max: AtomicU64,
}

/// Delayed schedule tail: from the IRQ-off annotation that precedes the
/// context switch to the preempt-enable on the return from the scheduler.
#[derive(Debug, Default)]
pub(crate) struct Dst {
    /// Task that entered the scheduler; the switch is detected when the
    /// current task no longer matches.
    pub pid: AtomicI32,
    pub start: AtomicU64,
    pub max: AtomicU64,
}

/// Scratch for the hardware interrupt currently executing on this CPU.
#[derive(Debug, Default)]
pub(crate) struct IrqScratch {
    /// Report-only timestamp of the IRQ-off annotation at interrupt entry.
    pub arrival_time: AtomicU64,
    pub start: AtomicU64,
    /// PSD was already open when this interrupt masked IRQs.
    pub was_psd: AtomicBool,
    pub vector: AtomicI32,
}

/// Scratch for the NMI currently executing on this CPU.
#[derive(Debug, Default)]
pub(crate) struct NmiScratch {
    pub start: AtomicU64,
}

/// The per-CPU state record. Owned by one CPU; mutated only by handlers
/// running on that CPU (thread context plus interrupts nested above it).
#[derive(Debug, Default)]
pub(crate) struct CpuState {
    /// Bumped by every interrupt/NMI entry observed on this CPU.
    pub int_counter: AtomicU64,
    pub poid: Poid,
    pub paie: Paie,
    pub psd: Psd,
    pub dst: Dst,
    pub irq: IrqScratch,
    pub nmi: NmiScratch,
    /// This CPU reached its initial condition and is tracking.
    pub running: AtomicBool,
}

impl CpuState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero everything, including the maxima. Only called while no probe
    /// can deliver events for this CPU.
    pub fn reset(&self) {
        self.int_counter.store(0, Ordering::Relaxed);
        self.poid.pd.store(false, Ordering::Relaxed);
        self.poid.id.store(false, Ordering::Relaxed);
        self.poid.start.store(0, Ordering::Relaxed);
        self.poid.max.store(0, Ordering::Relaxed);
        self.paie.start.store(0, Ordering::Relaxed);
        self.paie.max.store(0, Ordering::Relaxed);
        self.psd.start.store(0, Ordering::Relaxed);
        self.psd.max.store(0, Ordering::Relaxed);
        self.dst.pid.store(0, Ordering::Relaxed);
        self.dst.start.store(0, Ordering::Relaxed);
        self.dst.max.store(0, Ordering::Relaxed);
        self.irq.arrival_time.store(0, Ordering::Relaxed);
        self.irq.start.store(0, Ordering::Relaxed);
        self.irq.was_psd.store(false, Ordering::Relaxed);
        self.irq.vector.store(0, Ordering::Relaxed);
        self.nmi.start.store(0, Ordering::Relaxed);
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Record an interrupt entry so concurrent clock reads retry.
    pub fn note_interrupt(&self) {
        self.int_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Open a window: `start <- now()`, retried if an interrupt fired during
    /// the read so its interference adjustment is not overwritten.
    ///
    /// The fences bracket the clock read between the two counter reads; an
    /// interrupt between them changes the counter and forces a retry.
    pub fn set_int_safe_start(&self, start: &AtomicU64, clock: impl Fn() -> TimeNs) {
        loop {
            let snap = self.int_counter.load(Ordering::Relaxed);
            compiler_fence(Ordering::SeqCst);

            let now = clock();

            compiler_fence(Ordering::SeqCst);
            if self.int_counter.load(Ordering::Relaxed) == snap {
                start.store(now, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Close a window and return its duration, tolerating interrupts that
    /// push `start` forward concurrently.
    ///
    /// Without the retry, this interleaving would go wrong:
    ///
    /// ```text
    /// now = clock()
    ///         ---> interrupt!
    ///              start += interrupt duration
    ///         <---
    /// duration = now - start       // negative if the window was short
    /// ```
    pub fn int_safe_duration(&self, start: &AtomicU64, clock: impl Fn() -> TimeNs) -> i64 {
        let mut duration;
        loop {
            let snap = self.int_counter.load(Ordering::Relaxed);
            compiler_fence(Ordering::SeqCst);

            let now = clock();
            duration = now.wrapping_sub(start.load(Ordering::Relaxed)) as i64;

            compiler_fence(Ordering::SeqCst);
            if self.int_counter.load(Ordering::Relaxed) == snap {
                break;
            }
        }

        #[cfg(debug_assertions)]
        if duration < 0 {
            // Evidence of a discounting race: a window was pushed forward
            // further than the interference that actually ran inside it.
            tracing::error!(
                duration,
                backtrace = %std::backtrace::Backtrace::capture(),
                "negative window duration"
            );
        }

        start.store(0, Ordering::Relaxed);
        duration
    }
}
