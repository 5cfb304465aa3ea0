//! rtsl - Real-time scheduling latency analyzer.
//!
//! A per-CPU state machine that observes when preemption and interrupts are
//! disabled, when a re-schedule request is raised, and when the context
//! switch actually happens, and decomposes the scheduling latency of the
//! highest-priority runnable task into disjoint, additive windows:
//!
//! - **POID**: preemption or IRQs disabled by a thread
//! - **PAIE**: preemption and IRQs enabled, re-schedule request pending
//! - **PSD**: preemption disabled to schedule
//! - **DST**: delayed schedule tail up to the return from the scheduler
//!
//! Interrupts and NMIs that execute inside an open window push the window's
//! start time forward by their own duration, so every reported duration
//! excludes interference without a separate subtrahend.
//!
//! # Architecture
//!
//! - **Analyzer**: the event handlers, one per hooked tracepoint
//! - **Host**: trait for the primitives the embedding host provides
//! - **Controller / Interface**: enable/disable lifecycle and the
//!   single-boolean control file
//! - **Sim**: deterministic replay host driving the analyzer from scripted
//!   event streams
//!
//! # Usage
//!
//! ```
//! use rtsl::{Scenario, Sim, SimEvent, WindowKind};
//!
//! let sim = Sim::new(1);
//! sim.enable().unwrap();
//!
//! let scenario = Scenario::builder()
//!     .cpus(1)
//!     .prime(100, 0)
//!     .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
//!     .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
//!     .build();
//! sim.run(&scenario);
//!
//! assert_eq!(sim.log().window_values(WindowKind::Poid), vec![2_000]);
//! ```

pub mod analyzer;
pub mod fmt;
pub mod host;
pub mod interface;
pub mod probe;
pub mod record;
pub mod sim;
pub mod types;
pub mod workload;

mod state;

// Re-export the main public types for convenience.
pub use analyzer::Analyzer;
pub use fmt::{FmtTs, SimFormat};
pub use host::Host;
pub use interface::{Controller, Interface};
pub use probe::{Hook, TracepointRegistry};
pub use record::{Record, RecordLog, RecordSink, WindowKind};
pub use sim::{sim_clock, Scenario, ScenarioBuilder, Sim, SimController, SimEvent, SimHost, SimStep};
pub use types::{CpuId, Pid, TimeNs};
pub use workload::{load_workload, WorkloadError};
