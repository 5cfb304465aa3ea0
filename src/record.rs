//! Record types emitted by the analyzer and the sinks that receive them.
//!
//! Every closed window produces one per-event record, plus a per-max record
//! whenever the window's running maximum is updated. Interrupt occurrences
//! get their own records carrying the vector and arrival time.

use std::sync::{Arc, Mutex};

use crate::fmt::fmt_grouped;
use crate::types::{CpuId, TimeNs};

/// The four thread-visible latency windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// Preemption or IRQ disabled by a thread.
    Poid,
    /// Preemption and IRQs enabled with a re-schedule request pending.
    Paie,
    /// Preemption disabled to schedule.
    Psd,
    /// Delayed schedule tail: last IRQ-off renewal to the return from schedule.
    Dst,
}

/// A single record pushed to the trace sink.
///
/// Durations are nanoseconds of the host clock, with interrupt interference
/// already removed for the thread-visible windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Poid { duration: u64 },
    MaxPoid { duration: u64 },
    Paie { duration: u64 },
    MaxPaie { duration: u64 },
    Psd { duration: u64 },
    MaxPsd { duration: u64 },
    Dst { duration: u64 },
    MaxDst { duration: u64 },
    IrqExecution { vector: i32, arrival: TimeNs, duration: u64 },
    NmiExecution { start: TimeNs, duration: u64 },
}

impl Record {
    /// The window and duration of a per-event window record.
    pub fn window_value(&self) -> Option<(WindowKind, u64)> {
        match *self {
            Record::Poid { duration } => Some((WindowKind::Poid, duration)),
            Record::Paie { duration } => Some((WindowKind::Paie, duration)),
            Record::Psd { duration } => Some((WindowKind::Psd, duration)),
            Record::Dst { duration } => Some((WindowKind::Dst, duration)),
            _ => None,
        }
    }

    /// The window and duration of a per-max window record.
    pub fn max_value(&self) -> Option<(WindowKind, u64)> {
        match *self {
            Record::MaxPoid { duration } => Some((WindowKind::Poid, duration)),
            Record::MaxPaie { duration } => Some((WindowKind::Paie, duration)),
            Record::MaxPsd { duration } => Some((WindowKind::Psd, duration)),
            Record::MaxDst { duration } => Some((WindowKind::Dst, duration)),
            _ => None,
        }
    }
}

/// Receives records from the handlers.
///
/// Emission is one-way and fire-and-forget; implementations must not block
/// and must not call back into the analyzer.
pub trait RecordSink: Send + Sync {
    fn emit(&self, cpu: CpuId, record: Record);
}

impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    fn emit(&self, cpu: CpuId, record: Record) {
        (**self).emit(cpu, record)
    }
}

/// A collecting sink: stores every record in emission order.
///
/// Cheaply cloneable: clones share the same backing store, so the replay
/// host can own one handle while tests query another.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    inner: Arc<Mutex<Vec<(CpuId, Record)>>>,
}

impl RecordSink for RecordLog {
    fn emit(&self, cpu: CpuId, record: Record) {
        self.inner.lock().unwrap().push((cpu, record));
    }
}

impl RecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in emission order.
    pub fn records(&self) -> Vec<(CpuId, Record)> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Per-event durations reported for `kind`, in emission order.
    pub fn window_values(&self, kind: WindowKind) -> Vec<u64> {
        self.records()
            .iter()
            .filter_map(|(_, r)| r.window_value())
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .collect()
    }

    /// Max-update durations reported for `kind`, in emission order.
    pub fn max_values(&self, kind: WindowKind) -> Vec<u64> {
        self.records()
            .iter()
            .filter_map(|(_, r)| r.max_value())
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| d)
            .collect()
    }

    /// The latest max reported for `kind`, if any.
    pub fn last_max(&self, kind: WindowKind) -> Option<u64> {
        self.max_values(kind).last().copied()
    }

    /// All `irq_execution` records as `(vector, arrival, duration)`.
    pub fn irq_executions(&self) -> Vec<(i32, TimeNs, u64)> {
        self.records()
            .iter()
            .filter_map(|(_, r)| match *r {
                Record::IrqExecution {
                    vector,
                    arrival,
                    duration,
                } => Some((vector, arrival, duration)),
                _ => None,
            })
            .collect()
    }

    /// All `nmi_execution` records as `(start, duration)`.
    pub fn nmi_executions(&self) -> Vec<(TimeNs, u64)> {
        self.records()
            .iter()
            .filter_map(|(_, r)| match *r {
                Record::NmiExecution { start, duration } => Some((start, duration)),
                _ => None,
            })
            .collect()
    }

    /// Pretty-print the collected records for debugging.
    pub fn dump(&self) {
        for (cpu, record) in self.records() {
            let desc = match record {
                Record::Poid { duration } => format!("poid     {}", fmt_grouped(duration)),
                Record::MaxPoid { duration } => format!("max_poid {}", fmt_grouped(duration)),
                Record::Paie { duration } => format!("paie     {}", fmt_grouped(duration)),
                Record::MaxPaie { duration } => format!("max_paie {}", fmt_grouped(duration)),
                Record::Psd { duration } => format!("psd      {}", fmt_grouped(duration)),
                Record::MaxPsd { duration } => format!("max_psd  {}", fmt_grouped(duration)),
                Record::Dst { duration } => format!("dst      {}", fmt_grouped(duration)),
                Record::MaxDst { duration } => format!("max_dst  {}", fmt_grouped(duration)),
                Record::IrqExecution {
                    vector,
                    arrival,
                    duration,
                } => format!(
                    "irq      vector={vector} arrival={} duration={}",
                    fmt_grouped(arrival),
                    fmt_grouped(duration)
                ),
                Record::NmiExecution { start, duration } => format!(
                    "nmi      start={} duration={}",
                    fmt_grouped(start),
                    fmt_grouped(duration)
                ),
            };
            eprintln!("cpu={:<3} {}", cpu.0, desc);
        }
    }
}
