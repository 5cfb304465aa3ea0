//! Deterministic replay host.
//!
//! Drives the analyzer from a scripted stream of kernel-style events with
//! exact timestamps, standing in for the live tracing host: the scenario is
//! the schedule, the [`SimHost`] answers the host queries (clock, current
//! task, re-schedule flag, IRQ mask), and only hooks that are actually
//! registered get dispatched, exactly like tracepoints.
//!
//! Scripted events always update host-side state; whether the analyzer
//! sees them depends on the registered probe set, so enable/disable
//! transitions mid-experiment behave like the real thing.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::analyzer::Analyzer;
use crate::host::Host;
use crate::interface::Controller;
use crate::probe::{Hook, TracepointRegistry};
use crate::record::RecordLog;
use crate::types::{CpuId, Pid, TimeNs};

/// Current simulated time, for log formatting ([`crate::fmt::SimFormat`]).
static SIM_CLOCK: AtomicU64 = AtomicU64::new(0);

pub fn sim_clock() -> TimeNs {
    SIM_CLOCK.load(Ordering::Relaxed)
}

fn set_sim_clock(ns: TimeNs) {
    SIM_CLOCK.store(ns, Ordering::Relaxed);
}

/// A scripted kernel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// IRQs masked; `entry` marks the mask taken by an interrupt entry path.
    IrqDisable { entry: bool },
    /// IRQs unmasked; `exit` marks the unmask on an interrupt return path.
    IrqEnable { exit: bool },
    /// Preemption disabled; `sched` marks the disable that enters the
    /// scheduler.
    PreemptDisable { sched: bool },
    /// Preemption enabled; `sched` marks the return from the scheduler.
    PreemptEnable { sched: bool },
    /// A platform vector entry point identified the executing interrupt.
    IrqVectorEntry { vector: i32 },
    /// Generic interrupt-handler entry with the logical IRQ number.
    IrqHandlerEntry { irq: i32 },
    NmiEntry,
    NmiExit,
    /// The context switch completed: `pid` is now current.
    ContextSwitch { pid: Pid },
    /// The host's re-schedule flag changed.
    NeedResched { pending: bool },
}

/// One scripted event with its timestamp and CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStep {
    pub at: TimeNs,
    pub cpu: CpuId,
    pub event: SimEvent,
}

/// A complete replay scenario: CPU count plus a time-ordered event stream.
#[derive(Debug, Clone)]
pub struct Scenario {
    nr_cpus: u32,
    steps: Vec<SimStep>,
}

impl Scenario {
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder {
            nr_cpus: 1,
            steps: Vec::new(),
        }
    }

    pub fn nr_cpus(&self) -> u32 {
        self.nr_cpus
    }

    pub fn steps(&self) -> &[SimStep] {
        &self.steps
    }
}

/// Builder for replay scenarios.
pub struct ScenarioBuilder {
    nr_cpus: u32,
    steps: Vec<SimStep>,
}

impl ScenarioBuilder {
    /// Set the number of simulated CPUs.
    pub fn cpus(mut self, n: u32) -> Self {
        self.nr_cpus = n;
        self
    }

    /// Append an event. Timestamps must be non-decreasing; events at the
    /// same timestamp replay in insertion order.
    pub fn step(mut self, at: TimeNs, cpu: u32, event: SimEvent) -> Self {
        self.steps.push(SimStep {
            at,
            cpu: CpuId(cpu),
            event,
        });
        self
    }

    /// Append a schedule-path preempt disable/enable pair on `cpu` so the
    /// CPU reaches its initial condition before the events under test.
    pub fn prime(self, at: TimeNs, cpu: u32) -> Self {
        self.step(at, cpu, SimEvent::PreemptDisable { sched: true })
            .step(at + 1, cpu, SimEvent::PreemptEnable { sched: true })
    }

    pub fn build(self) -> Scenario {
        assert!(self.nr_cpus > 0, "scenario must have at least one CPU");
        let mut last = 0;
        for step in &self.steps {
            assert!(
                step.cpu.0 < self.nr_cpus,
                "step on cpu {} but scenario has {} CPUs",
                step.cpu.0,
                self.nr_cpus
            );
            assert!(
                step.at >= last,
                "steps must be time-ordered: {} after {}",
                step.at,
                last
            );
            last = step.at;
        }
        Scenario {
            nr_cpus: self.nr_cpus,
            steps: self.steps,
        }
    }
}

/// Host-side per-CPU simulation state.
#[derive(Debug)]
struct SimCpu {
    clock: AtomicU64,
    current: AtomicI32,
    need_resched: AtomicBool,
    irqs_off: AtomicBool,
}

impl SimCpu {
    fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            // A plain task, not idle: idle must be scripted explicitly.
            current: AtomicI32::new(1),
            need_resched: AtomicBool::new(false),
            irqs_off: AtomicBool::new(false),
        }
    }
}

/// The simulated host: answers the [`Host`] queries from scripted state and
/// doubles as the tracepoint registry.
///
/// Registration failures can be injected per probe name to exercise the
/// enable rollback path.
pub struct SimHost {
    cpus: Box<[SimCpu]>,
    hooks: Mutex<HashMap<Hook, usize>>,
    refuse: Mutex<Vec<&'static str>>,
}

impl SimHost {
    pub fn new(nr_cpus: u32) -> Self {
        Self {
            cpus: (0..nr_cpus).map(|_| SimCpu::new()).collect(),
            hooks: Mutex::new(HashMap::new()),
            refuse: Mutex::new(Vec::new()),
        }
    }

    /// Make future registrations of `name` fail.
    pub fn refuse_probe(&self, name: &'static str) {
        self.refuse.lock().unwrap().push(name);
    }

    /// Whether any tracepoint feeding `hook` is currently registered.
    pub fn registered(&self, hook: Hook) -> bool {
        self.hooks
            .lock()
            .unwrap()
            .get(&hook)
            .is_some_and(|n| *n > 0)
    }

    fn cpu(&self, cpu: CpuId) -> &SimCpu {
        &self.cpus[cpu.0 as usize]
    }

    fn advance_clock(&self, cpu: CpuId, at: TimeNs) {
        self.cpu(cpu).clock.store(at, Ordering::Relaxed);
        set_sim_clock(at);
    }

    fn set_current(&self, cpu: CpuId, pid: Pid) {
        self.cpu(cpu).current.store(pid.0, Ordering::Relaxed);
    }

    fn set_need_resched(&self, cpu: CpuId, pending: bool) {
        self.cpu(cpu).need_resched.store(pending, Ordering::Relaxed);
    }

    fn set_irqs_off(&self, cpu: CpuId, off: bool) {
        self.cpu(cpu).irqs_off.store(off, Ordering::Relaxed);
    }
}

impl Host for SimHost {
    fn clock(&self, cpu: CpuId) -> TimeNs {
        self.cpu(cpu).clock.load(Ordering::Relaxed)
    }

    fn current_pid(&self, cpu: CpuId) -> Pid {
        Pid(self.cpu(cpu).current.load(Ordering::Relaxed))
    }

    fn need_resched(&self, cpu: CpuId) -> bool {
        self.cpu(cpu).need_resched.load(Ordering::Relaxed)
    }

    fn irqs_disabled(&self, cpu: CpuId) -> bool {
        self.cpu(cpu).irqs_off.load(Ordering::Relaxed)
    }

    fn nr_cpus(&self) -> u32 {
        self.cpus.len() as u32
    }
}

impl TracepointRegistry for SimHost {
    fn register(&self, name: &'static str, hook: Hook) -> io::Result<()> {
        if self.refuse.lock().unwrap().contains(&name) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such tracepoint: {name}"),
            ));
        }
        *self.hooks.lock().unwrap().entry(hook).or_insert(0) += 1;
        debug!(probe = name, ?hook, "probe registered");
        Ok(())
    }

    fn unregister(&self, name: &'static str, hook: Hook) {
        if let Some(n) = self.hooks.lock().unwrap().get_mut(&hook) {
            *n = n.saturating_sub(1);
        }
        debug!(probe = name, ?hook, "probe unregistered");
    }
}

/// Controller type a [`Sim`] drives.
pub type SimController = Controller<Arc<SimHost>, RecordLog, Arc<SimHost>>;

/// A replay harness: simulated host, analyzer, controller and record log
/// wired together.
pub struct Sim {
    host: Arc<SimHost>,
    controller: Arc<SimController>,
    log: RecordLog,
}

impl Sim {
    pub fn new(nr_cpus: u32) -> Self {
        let host = Arc::new(SimHost::new(nr_cpus));
        let log = RecordLog::new();
        let analyzer = Arc::new(Analyzer::new(host.clone(), log.clone()));
        let controller = Arc::new(Controller::new(analyzer, host.clone()));
        Self {
            host,
            controller,
            log,
        }
    }

    pub fn host(&self) -> &Arc<SimHost> {
        &self.host
    }

    pub fn controller(&self) -> &Arc<SimController> {
        &self.controller
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }

    pub fn enable(&self) -> io::Result<()> {
        self.controller.enable()
    }

    pub fn disable(&self) {
        self.controller.disable()
    }

    /// Replay a scenario through the analyzer.
    ///
    /// Host-side state (clock, IRQ mask, current task, re-schedule flag)
    /// always follows the script; analyzer handlers only run for hooks
    /// whose tracepoints are registered.
    pub fn run(&self, scenario: &Scenario) {
        assert_eq!(
            scenario.nr_cpus(),
            self.host.nr_cpus(),
            "scenario CPU count does not match the sim host"
        );

        info!(
            steps = scenario.steps().len(),
            cpus = scenario.nr_cpus(),
            "replaying scenario"
        );

        let analyzer = self.controller.analyzer();

        for step in scenario.steps() {
            let cpu = step.cpu;
            self.host.advance_clock(cpu, step.at);
            debug!(at = step.at, cpu = cpu.0, event = ?step.event, "step");

            match step.event {
                SimEvent::IrqDisable { entry } => {
                    // The host's IRQ-off tracking only reports the first
                    // mask; nested disables are silent.
                    if self.host.irqs_disabled(cpu) {
                        debug!(cpu = cpu.0, "irqs already off, annotation suppressed");
                        continue;
                    }
                    self.host.set_irqs_off(cpu, true);
                    if self.host.registered(Hook::IrqDisable) {
                        analyzer.irq_disable(cpu, entry);
                    }
                }
                SimEvent::IrqEnable { exit } => {
                    if !self.host.irqs_disabled(cpu) {
                        debug!(cpu = cpu.0, "irqs already on, annotation suppressed");
                        continue;
                    }
                    self.host.set_irqs_off(cpu, false);
                    if self.host.registered(Hook::IrqEnable) {
                        analyzer.irq_enable(cpu, exit);
                    }
                }
                SimEvent::PreemptDisable { sched } => {
                    if self.host.registered(Hook::PreemptDisable) {
                        analyzer.preempt_disable(cpu, sched);
                    }
                }
                SimEvent::PreemptEnable { sched } => {
                    if self.host.registered(Hook::PreemptEnable) {
                        analyzer.preempt_enable(cpu, sched);
                    }
                }
                SimEvent::IrqVectorEntry { vector } => {
                    if self.host.registered(Hook::IrqVectorEntry) {
                        analyzer.irq_vector_entry(cpu, vector);
                    }
                }
                SimEvent::IrqHandlerEntry { irq } => {
                    if self.host.registered(Hook::IrqHandlerEntry) {
                        analyzer.irq_handler_entry(cpu, irq);
                    }
                }
                SimEvent::NmiEntry => {
                    if self.host.registered(Hook::NmiEntry) {
                        analyzer.nmi_entry(cpu);
                    }
                }
                SimEvent::NmiExit => {
                    if self.host.registered(Hook::NmiExit) {
                        analyzer.nmi_exit(cpu);
                    }
                }
                SimEvent::ContextSwitch { pid } => {
                    self.host.set_current(cpu, pid);
                }
                SimEvent::NeedResched { pending } => {
                    self.host.set_need_resched(cpu, pending);
                }
            }
        }

        info!(records = self.log.len(), "scenario done");
    }
}
