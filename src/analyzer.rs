//! The latency-decomposition state machine.
//!
//! One handler per observed host event, all running on the CPU that raised
//! the event. The handlers decompose the scheduling latency of the
//! highest-priority runnable task into disjoint windows:
//!
//! - **POID**: preemption or IRQs disabled by a thread
//! - **PAIE**: preemption and IRQs enabled, re-schedule request pending
//! - **PSD**: preemption disabled to call the scheduler
//! - **DST**: delayed schedule tail, up to the return from the scheduler
//!
//! plus `irq_execution` / `nmi_execution` interference records. Interrupts
//! that run inside an open window push the window's start forward by their
//! own duration, so the closed window reports pure thread-visible time.
//!
//! Handlers are non-blocking and take no locks; same-CPU re-entrancy from
//! nested interrupts is handled by the optimistic-retry primitives in
//! [`crate::state`].

use std::sync::atomic::{AtomicBool, Ordering};

use crate::host::Host;
use crate::record::{Record, RecordSink};
use crate::state::{is_open, CpuState};
use crate::types::{CpuId, Pid};

/// Per-CPU scheduling-latency analyzer.
///
/// Owns one [`CpuState`] per online CPU. Event handlers are dispatched by
/// the host's tracepoint layer (or the replay host in [`crate::sim`]) on
/// the CPU named by `cpu`; lifecycle transitions go through
/// [`crate::Controller`].
pub struct Analyzer<H: Host, S: RecordSink> {
    host: H,
    sink: S,
    enabled: AtomicBool,
    cpus: Box<[CpuState]>,
}

impl<H: Host, S: RecordSink> Analyzer<H, S> {
    pub fn new(host: H, sink: S) -> Self {
        let nr_cpus = host.nr_cpus();
        let cpus = (0..nr_cpus).map(|_| CpuState::new()).collect();
        Self {
            host,
            sink,
            enabled: AtomicBool::new(false),
            cpus,
        }
    }

    /// Global enable gate, relaxed read on every event.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Whether `cpu` has reached its initial condition and is tracking.
    pub fn running(&self, cpu: CpuId) -> bool {
        self.state(cpu).running()
    }

    pub fn nr_cpus(&self) -> u32 {
        self.cpus.len() as u32
    }

    fn state(&self, cpu: CpuId) -> &CpuState {
        &self.cpus[cpu.0 as usize]
    }

    pub(crate) fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    /// Zero every CPU's state. Only sound while no probe is registered.
    pub(crate) fn reset_all(&self) {
        for state in self.cpus.iter() {
            state.reset();
        }
    }

    /// Stop tracking on every CPU.
    pub(crate) fn stop_all(&self) {
        for state in self.cpus.iter() {
            state.running.store(false, Ordering::Relaxed);
        }
    }

    /// Initial-condition gate for the schedule-path preempt-disable.
    ///
    /// A CPU may only start tracking from a moment where the scheduler is
    /// entered with IRQs enabled; starting mid-critical-section would open
    /// the first window at an ill-defined point. preempt_schedule() never
    /// runs with IRQs disabled, so requiring them enabled here pins the
    /// epoch start.
    fn initialized(&self, cpu: CpuId) -> bool {
        let state = self.state(cpu);
        if state.running() {
            return true;
        }
        if !self.enabled() {
            return false;
        }
        if self.host.irqs_disabled(cpu) {
            return false;
        }

        tracing::debug!(cpu = cpu.0, "initial condition reached, tracking");
        state.running.store(true, Ordering::Relaxed);
        true
    }

    /// IRQs disabled on `cpu`. `irq_entry` distinguishes the mask taken by
    /// an interrupt's own entry path from one taken by a thread.
    pub fn irq_disable(&self, cpu: CpuId, irq_entry: bool) {
        if !self.enabled() {
            return;
        }
        if !self.state(cpu).running() {
            return;
        }
        if irq_entry {
            self.irq_disable_entry(cpu);
        } else {
            self.irq_disable_normal(cpu);
        }
    }

    /// Interrupt-entry mask: the interrupt window starts here.
    fn irq_disable_entry(&self, cpu: CpuId) {
        let state = self.state(cpu);

        // Remember whether PSD was already open when this interrupt masked
        // IRQs; see irq_occurrence() for why is_open at exit is not enough.
        if is_open(&state.psd.start) {
            state.irq.was_psd.store(true, Ordering::Relaxed);
        }

        // Report-only value, a plain clock read is fine.
        state
            .irq
            .arrival_time
            .store(self.host.clock(cpu), Ordering::Relaxed);

        state.set_int_safe_start(&state.irq.start, || self.host.clock(cpu));
    }

    /// Thread-context mask: opens (or continues) POID, and renews DST while
    /// the pre-switch task is still current.
    fn irq_disable_normal(&self, cpu: CpuId) {
        let state = self.state(cpu);

        if is_open(&state.psd.start) {
            // The scheduler records the entering task in dst.pid. Until the
            // context switch replaces it, keep renewing the DST start; the
            // final renewal before the switch marks where the tail begins.
            if state.dst.pid.load(Ordering::Relaxed) == self.host.current_pid(cpu).0 {
                state.set_int_safe_start(&state.dst.start, || self.host.clock(cpu));
            }

            // No early return: the thread resumed after an IRQ-driven
            // preemption runs with IRQs masked before PSD ends, and that
            // time is POID.
        }

        state.poid.id.store(true, Ordering::Relaxed);

        // Already open via preemption; nothing to start.
        if is_open(&state.poid.start) {
            return;
        }

        state.set_int_safe_start(&state.poid.start, || self.host.clock(cpu));
    }

    /// IRQs re-enabled on `cpu`. `irq_exit` distinguishes the unmask on an
    /// interrupt's return path from one done by a thread.
    pub fn irq_enable(&self, cpu: CpuId, irq_exit: bool) {
        if !self.enabled() {
            return;
        }
        if !self.state(cpu).running() {
            return;
        }
        if irq_exit {
            self.irq_occurrence(cpu);
        } else {
            self.irq_enable_normal(cpu);
        }
    }

    /// An interrupt finished: report it and discount its duration from
    /// every window it interfered with.
    fn irq_occurrence(&self, cpu: CpuId) {
        let state = self.state(cpu);

        let duration =
            state.int_safe_duration(&state.irq.start, || self.host.clock(cpu)) as u64;

        self.sink.emit(
            cpu,
            Record::IrqExecution {
                vector: state.irq.vector.load(Ordering::Relaxed),
                arrival: state.irq.arrival_time.load(Ordering::Relaxed),
                duration,
            },
        );

        if is_open(&state.poid.start) {
            state.poid.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.dst.start) {
            state.dst.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.paie.start) {
            state.paie.start.fetch_add(duration, Ordering::Relaxed);
        }

        // PSD is discounted only when it was already open at interrupt
        // entry. An interrupt that raises a re-schedule request sees the
        // preempt-disable-to-schedule happen before IRQs are re-enabled
        // (stacked scheduler calls are avoided that way), so testing PSD
        // here would wrongly charge this interrupt to the window it caused.
        if state.irq.was_psd.load(Ordering::Relaxed) {
            state.psd.start.fetch_add(duration, Ordering::Relaxed);
        }

        state.irq.vector.store(0, Ordering::Relaxed);
        state.irq.was_psd.store(false, Ordering::Relaxed);
    }

    /// Thread re-enabled IRQs: possibly the end of POID, possibly the
    /// start of PAIE.
    fn irq_enable_normal(&self, cpu: CpuId) {
        let state = self.state(cpu);

        state.poid.id.store(false, Ordering::Relaxed);

        // POID continues if preemption is still off; inside PSD the unmask
        // does not end anything.
        if state.poid.pd.load(Ordering::Relaxed) || is_open(&state.psd.start) {
            return;
        }

        self.close_poid(cpu);

        if self.host.need_resched(cpu) {
            state.set_int_safe_start(&state.paie.start, || self.host.clock(cpu));
        }
    }

    /// Preemption disabled on `cpu`. `to_sched` distinguishes the disable
    /// that enters the scheduler from a regular critical section.
    pub fn preempt_disable(&self, cpu: CpuId, to_sched: bool) {
        if !self.enabled() {
            return;
        }
        if to_sched {
            self.preempt_disable_sched(cpu);
        } else {
            self.preempt_disable_nosched(cpu);
        }
    }

    fn preempt_disable_nosched(&self, cpu: CpuId) {
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        // Preemption disabled inside an interrupt is interference, not POID.
        if is_open(&state.irq.start) {
            return;
        }

        state.poid.pd.store(true, Ordering::Relaxed);

        if state.poid.id.load(Ordering::Relaxed) {
            return;
        }

        state.set_int_safe_start(&state.poid.start, || self.host.clock(cpu));
    }

    /// First action of the scheduler: PSD starts, and PAIE (if any) ends.
    fn preempt_disable_sched(&self, cpu: CpuId) {
        if !self.initialized(cpu) {
            return;
        }
        let state = self.state(cpu);

        // PAIE only exists when the scheduler is entered with IRQs enabled
        // and a pending request; entering from an interrupt return path or
        // with IRQs masked is not a PAIE end.
        if self.host.need_resched(cpu)
            && !is_open(&state.irq.start)
            && !state.poid.id.load(Ordering::Relaxed)
        {
            self.close_paie(cpu);
        }

        state.paie.start.store(0, Ordering::Relaxed);

        // The context switch is detected when current no longer matches.
        state
            .dst
            .pid
            .store(self.host.current_pid(cpu).0, Ordering::Relaxed);

        state.set_int_safe_start(&state.psd.start, || self.host.clock(cpu));
    }

    /// Preemption re-enabled on `cpu`. `to_sched` distinguishes the return
    /// from the scheduler from a regular critical-section exit.
    pub fn preempt_enable(&self, cpu: CpuId, to_sched: bool) {
        if !self.enabled() {
            return;
        }
        if to_sched {
            self.preempt_enable_sched(cpu);
        } else {
            self.preempt_enable_nosched(cpu);
        }
    }

    fn preempt_enable_nosched(&self, cpu: CpuId) {
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        if is_open(&state.irq.start) {
            return;
        }

        state.poid.pd.store(false, Ordering::Relaxed);

        // IRQs still masked by the thread: POID continues.
        if state.poid.id.load(Ordering::Relaxed) {
            return;
        }

        self.close_poid(cpu);

        if self.host.need_resched(cpu) {
            state.set_int_safe_start(&state.paie.start, || self.host.clock(cpu));
        }
    }

    /// Last action of the scheduler: PSD and DST end, and PAIE restarts if
    /// a request arrived after the switch.
    fn preempt_enable_sched(&self, cpu: CpuId) {
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        if is_open(&state.dst.start) {
            let duration =
                state.int_safe_duration(&state.dst.start, || self.host.clock(cpu)) as u64;
            self.sink.emit(cpu, Record::Dst { duration });

            if duration > state.dst.max.load(Ordering::Relaxed) {
                self.sink.emit(cpu, Record::MaxDst { duration });
                state.dst.max.store(duration, Ordering::Relaxed);
            }
        }

        let duration = state.int_safe_duration(&state.psd.start, || self.host.clock(cpu)) as u64;
        self.sink.emit(cpu, Record::Psd { duration });

        if duration > state.psd.max.load(Ordering::Relaxed) {
            self.sink.emit(cpu, Record::MaxPsd { duration });
            state.psd.max.store(duration, Ordering::Relaxed);
        }

        if self.host.need_resched(cpu) {
            state.set_int_safe_start(&state.paie.start, || self.host.clock(cpu));
        }
    }

    /// NMI entry: a plain clock read is enough, NMIs do not nest on a CPU.
    pub fn nmi_entry(&self, cpu: CpuId) {
        if !self.enabled() {
            return;
        }
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        state.nmi.start.store(self.host.clock(cpu), Ordering::Relaxed);
    }

    /// NMI exit: report it and discount it from every open window,
    /// including an in-flight IRQ.
    ///
    /// NMIs bypass IRQ masking, so no window is safe from them; bumping the
    /// interrupt counter makes any close() that was sampling the clock
    /// retry and observe the pushed-forward starts.
    pub fn nmi_exit(&self, cpu: CpuId) {
        if !self.enabled() {
            return;
        }
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        let duration = self
            .host
            .clock(cpu)
            .wrapping_sub(state.nmi.start.load(Ordering::Relaxed));

        self.sink.emit(
            cpu,
            Record::NmiExecution {
                start: state.nmi.start.load(Ordering::Relaxed),
                duration,
            },
        );

        state.note_interrupt();

        if is_open(&state.irq.start) {
            state.irq.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.poid.start) {
            state.poid.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.psd.start) {
            state.psd.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.dst.start) {
            state.dst.start.fetch_add(duration, Ordering::Relaxed);
        }
        if is_open(&state.paie.start) {
            state.paie.start.fetch_add(duration, Ordering::Relaxed);
        }
    }

    /// A platform vector entry point identified the executing interrupt.
    ///
    /// The interrupt window itself started earlier, at the IRQ-off
    /// annotation on the entry path; this only names it. The counter bump
    /// forces concurrent closes to retry.
    pub fn irq_vector_entry(&self, cpu: CpuId, vector: i32) {
        if !self.enabled() {
            return;
        }
        let state = self.state(cpu);
        if !state.running() {
            return;
        }

        state.irq.vector.store(vector, Ordering::Relaxed);
        state.note_interrupt();
    }

    /// Generic interrupt-handler entry; the logical IRQ number names the
    /// interrupt.
    pub fn irq_handler_entry(&self, cpu: CpuId, irq: i32) {
        self.irq_vector_entry(cpu, irq);
    }

    /// Close POID and report it, updating the running maximum.
    fn close_poid(&self, cpu: CpuId) {
        let state = self.state(cpu);

        if !is_open(&state.poid.start) {
            return;
        }

        let duration =
            state.int_safe_duration(&state.poid.start, || self.host.clock(cpu)) as u64;

        // Idle runs with preemption disabled while waiting for a wakeup;
        // counting that wait as POID would need wait-boundary annotations
        // in every idle driver. Skip idle entirely instead.
        if self.host.current_pid(cpu) == Pid::IDLE {
            return;
        }

        self.sink.emit(cpu, Record::Poid { duration });

        if duration < state.poid.max.load(Ordering::Relaxed) {
            return;
        }

        self.sink.emit(cpu, Record::MaxPoid { duration });
        state.poid.max.store(duration, Ordering::Relaxed);
    }

    /// Close PAIE and report it, updating the running maximum.
    fn close_paie(&self, cpu: CpuId) {
        let state = self.state(cpu);

        // The request may have arrived mid-POID; then no PAIE ever opened.
        if !is_open(&state.paie.start) {
            return;
        }

        let duration =
            state.int_safe_duration(&state.paie.start, || self.host.clock(cpu)) as u64;

        if self.host.current_pid(cpu) == Pid::IDLE {
            return;
        }

        self.sink.emit(cpu, Record::Paie { duration });

        if state.paie.max.load(Ordering::Relaxed) > duration {
            return;
        }

        self.sink.emit(cpu, Record::MaxPaie { duration });
        state.paie.max.store(duration, Ordering::Relaxed);
    }
}
