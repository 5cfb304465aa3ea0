//! End-to-end window scenarios: scripted event streams in, records out.

use rtsl::{Pid, Scenario, Sim, SimEvent, WindowKind};

mod common;

/// A plain preempt-disabled section becomes one POID record.
#[test]
fn test_plain_poid() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);
    sim.log().dump();

    assert_eq!(sim.log().window_values(WindowKind::Poid), vec![2_000]);
    assert_eq!(sim.log().max_values(WindowKind::Poid), vec![2_000]);
}

/// An IRQ inside a POID window is reported on its own and subtracted from
/// the POID duration.
#[test]
fn test_irq_inside_poid() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_500, 0, SimEvent::IrqDisable { entry: true })
        .step(1_500, 0, SimEvent::IrqHandlerEntry { irq: 42 })
        .step(1_800, 0, SimEvent::IrqEnable { exit: true })
        .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().irq_executions(), vec![(42, 1_500, 300)]);
    assert_eq!(sim.log().window_values(WindowKind::Poid), vec![1_700]);
    assert_eq!(sim.log().max_values(WindowKind::Poid), vec![1_700]);
}

/// An NMI during the scheduler's own critical section is subtracted from
/// PSD.
#[test]
fn test_nmi_during_psd() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(1_200, 0, SimEvent::NmiEntry)
        .step(1_250, 0, SimEvent::NmiExit)
        .step(2_000, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().nmi_executions(), vec![(1_200, 50)]);
    assert_eq!(sim.log().window_values(WindowKind::Psd), vec![950]);
    assert_eq!(sim.log().max_values(WindowKind::Psd), vec![950]);
}

/// DST runs from the last IRQ-off renewal that saw the pre-switch task
/// still current to the preempt-enable on the scheduler's return path.
#[test]
fn test_dst_with_context_switch() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(1_100, 0, SimEvent::IrqDisable { entry: false })
        .step(1_150, 0, SimEvent::IrqEnable { exit: false })
        .step(1_200, 0, SimEvent::IrqDisable { entry: false })
        .step(1_200, 0, SimEvent::ContextSwitch { pid: Pid(2) })
        .step(2_000, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().window_values(WindowKind::Dst), vec![800]);
    assert_eq!(sim.log().max_values(WindowKind::Dst), vec![800]);
    assert_eq!(sim.log().window_values(WindowKind::Psd), vec![1_000]);
}

/// Once the switch happened, further IRQ-off annotations must not renew
/// the DST start.
#[test]
fn test_dst_not_renewed_after_switch() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(1_100, 0, SimEvent::IrqDisable { entry: false })
        .step(1_150, 0, SimEvent::ContextSwitch { pid: Pid(2) })
        .step(1_160, 0, SimEvent::IrqEnable { exit: false })
        .step(1_300, 0, SimEvent::IrqDisable { entry: false })
        .step(2_000, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().window_values(WindowKind::Dst), vec![900]);
}

/// A re-schedule request raised during POID opens PAIE when everything
/// re-enables, and the schedule-path preempt-disable closes it.
#[test]
fn test_paie() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_400, 0, SimEvent::NeedResched { pending: true })
        .step(1_500, 0, SimEvent::PreemptEnable { sched: false })
        .step(1_700, 0, SimEvent::PreemptDisable { sched: true })
        .step(1_701, 0, SimEvent::NeedResched { pending: false })
        .step(2_500, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().window_values(WindowKind::Poid), vec![500]);
    assert_eq!(sim.log().window_values(WindowKind::Paie), vec![200]);
    assert_eq!(sim.log().max_values(WindowKind::Paie), vec![200]);
    assert_eq!(sim.log().window_values(WindowKind::Psd), vec![1, 800]);
}

/// Windows closed while the idle task is current are not reported.
#[test]
fn test_idle_suppression() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(50, 0, SimEvent::ContextSwitch { pid: Pid::IDLE })
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);

    assert!(sim.log().window_values(WindowKind::Poid).is_empty());
    assert!(sim.log().max_values(WindowKind::Poid).is_empty());
}

/// Max records only track the running maximum: a shorter window emits no
/// max record, a longer one does.
#[test]
fn test_max_updates_track_running_maximum() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_500, 0, SimEvent::PreemptEnable { sched: false })
        .step(2_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(2_300, 0, SimEvent::PreemptEnable { sched: false })
        .step(3_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(3_800, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);

    assert_eq!(
        sim.log().window_values(WindowKind::Poid),
        vec![500, 300, 800]
    );
    assert_eq!(sim.log().max_values(WindowKind::Poid), vec![500, 800]);
}

/// POID re-reports a max on an equal duration; PSD only on a strict
/// increase.
#[test]
fn test_max_update_comparison_rules() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        // Two equal POID windows.
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_500, 0, SimEvent::PreemptEnable { sched: false })
        .step(2_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(2_500, 0, SimEvent::PreemptEnable { sched: false })
        // Two equal PSD windows.
        .step(3_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(3_400, 0, SimEvent::PreemptEnable { sched: true })
        .step(4_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(4_400, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    assert_eq!(sim.log().max_values(WindowKind::Poid), vec![500, 500]);
    // The priming pair contributes the first PSD max; 400 is reported once.
    assert_eq!(sim.log().max_values(WindowKind::Psd), vec![1, 400]);
}

/// POID, PAIE and PSD tile the span from the critical section's start to
/// the scheduler's return without overlap: their durations add up to the
/// wall-clock span.
#[test]
fn test_windows_are_disjoint_and_additive() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .prime(100, 0)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_200, 0, SimEvent::NeedResched { pending: true })
        .step(1_500, 0, SimEvent::PreemptEnable { sched: false })
        .step(1_700, 0, SimEvent::PreemptDisable { sched: true })
        .step(1_800, 0, SimEvent::NeedResched { pending: false })
        .step(2_200, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    let poid: u64 = sim.log().window_values(WindowKind::Poid).iter().sum();
    let paie: u64 = sim.log().window_values(WindowKind::Paie).iter().sum();
    let psd: u64 = sim
        .log()
        .window_values(WindowKind::Psd)
        .iter()
        .skip(1) // priming pair
        .sum();

    assert_eq!(poid, 500);
    assert_eq!(paie, 200);
    assert_eq!(psd, 500);
    assert_eq!(poid + paie + psd, 2_200 - 1_000);
}

/// No window opened before the CPU's initial condition produces a record.
#[test]
fn test_initial_condition_gate() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);

    assert!(sim.log().is_empty(), "not tracking before a schedule entry");
}

/// The initial condition is only reached when the scheduler is entered
/// with IRQs enabled.
#[test]
fn test_initial_condition_requires_irqs_enabled() {
    common::setup();
    let sim = Sim::new(1);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(1)
        .step(500, 0, SimEvent::IrqDisable { entry: false })
        .step(1_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(2_000, 0, SimEvent::PreemptEnable { sched: true })
        .step(2_500, 0, SimEvent::IrqEnable { exit: false })
        .step(3_000, 0, SimEvent::PreemptDisable { sched: true })
        .step(3_500, 0, SimEvent::PreemptEnable { sched: true })
        .build();
    sim.run(&scenario);

    // Only the second schedule entry, with IRQs on, starts an epoch.
    assert_eq!(sim.log().window_values(WindowKind::Psd), vec![500]);
}

/// Events on one CPU never touch another CPU's windows.
#[test]
fn test_per_cpu_isolation() {
    common::setup();
    let sim = Sim::new(2);
    sim.enable().unwrap();

    let scenario = Scenario::builder()
        .cpus(2)
        .prime(100, 0)
        .prime(102, 1)
        .step(1_000, 0, SimEvent::PreemptDisable { sched: false })
        .step(1_500, 1, SimEvent::PreemptDisable { sched: false })
        .step(2_500, 1, SimEvent::PreemptEnable { sched: false })
        .step(3_000, 0, SimEvent::PreemptEnable { sched: false })
        .build();
    sim.run(&scenario);

    let poids: Vec<(u32, u64)> = sim
        .log()
        .records()
        .iter()
        .filter_map(|(cpu, r)| match r.window_value() {
            Some((WindowKind::Poid, d)) => Some((cpu.0, d)),
            _ => None,
        })
        .collect();

    assert_eq!(poids, vec![(1, 1_000), (0, 2_000)]);
}
