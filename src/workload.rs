//! JSON workload format for the replay binary.
//!
//! A workload file is the serialized form of a [`Scenario`]: a CPU count
//! and a time-ordered list of steps, each with a tagged event object.
//!
//! ```json
//! {
//!   "cpus": 1,
//!   "steps": [
//!     { "at": 1000, "cpu": 0, "event": { "kind": "preempt_disable", "sched": false } },
//!     { "at": 3000, "cpu": 0, "event": { "kind": "preempt_enable", "sched": false } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::sim::{Scenario, SimEvent};
use crate::types::Pid;

/// Errors from loading a workload file.
#[derive(Debug)]
pub enum WorkloadError {
    /// JSON parse error.
    Json(serde_json::Error),
    /// Structurally valid JSON describing an invalid scenario.
    InvalidValue(String),
}

impl std::fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadError::Json(e) => write!(f, "JSON parse error: {e}"),
            WorkloadError::InvalidValue(msg) => write!(f, "invalid workload: {msg}"),
        }
    }
}

impl std::error::Error for WorkloadError {}

impl From<serde_json::Error> for WorkloadError {
    fn from(e: serde_json::Error) -> Self {
        WorkloadError::Json(e)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkloadFile {
    cpus: u32,
    steps: Vec<WorkloadStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkloadStep {
    at: u64,
    #[serde(default)]
    cpu: u32,
    event: WorkloadEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WorkloadEvent {
    IrqDisable {
        #[serde(default)]
        entry: bool,
    },
    IrqEnable {
        #[serde(default)]
        exit: bool,
    },
    PreemptDisable {
        #[serde(default)]
        sched: bool,
    },
    PreemptEnable {
        #[serde(default)]
        sched: bool,
    },
    IrqVectorEntry {
        vector: i32,
    },
    IrqHandlerEntry {
        irq: i32,
    },
    NmiEntry,
    NmiExit,
    ContextSwitch {
        pid: i32,
    },
    NeedResched {
        pending: bool,
    },
}

impl From<WorkloadEvent> for SimEvent {
    fn from(event: WorkloadEvent) -> Self {
        match event {
            WorkloadEvent::IrqDisable { entry } => SimEvent::IrqDisable { entry },
            WorkloadEvent::IrqEnable { exit } => SimEvent::IrqEnable { exit },
            WorkloadEvent::PreemptDisable { sched } => SimEvent::PreemptDisable { sched },
            WorkloadEvent::PreemptEnable { sched } => SimEvent::PreemptEnable { sched },
            WorkloadEvent::IrqVectorEntry { vector } => SimEvent::IrqVectorEntry { vector },
            WorkloadEvent::IrqHandlerEntry { irq } => SimEvent::IrqHandlerEntry { irq },
            WorkloadEvent::NmiEntry => SimEvent::NmiEntry,
            WorkloadEvent::NmiExit => SimEvent::NmiExit,
            WorkloadEvent::ContextSwitch { pid } => SimEvent::ContextSwitch { pid: Pid(pid) },
            WorkloadEvent::NeedResched { pending } => SimEvent::NeedResched { pending },
        }
    }
}

/// Load a scenario from workload JSON, with `cpus` optionally overridden.
pub fn load_workload(json: &str, cpus_override: Option<u32>) -> Result<Scenario, WorkloadError> {
    let file: WorkloadFile = serde_json::from_str(json)?;

    let nr_cpus = cpus_override.unwrap_or(file.cpus);
    if nr_cpus == 0 {
        return Err(WorkloadError::InvalidValue("cpus must be positive".into()));
    }

    let mut last = 0;
    let mut builder = Scenario::builder().cpus(nr_cpus);
    for (i, step) in file.steps.into_iter().enumerate() {
        if step.cpu >= nr_cpus {
            return Err(WorkloadError::InvalidValue(format!(
                "step {i}: cpu {} out of range (cpus = {nr_cpus})",
                step.cpu
            )));
        }
        if step.at < last {
            return Err(WorkloadError::InvalidValue(format!(
                "step {i}: timestamp {} before previous step at {last}",
                step.at
            )));
        }
        last = step.at;
        builder = builder.step(step.at, step.cpu, step.event.into());
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CpuId;

    #[test]
    fn test_load_minimal_workload() {
        let json = r#"{
            "cpus": 1,
            "steps": [
                { "at": 1000, "event": { "kind": "preempt_disable", "sched": false } },
                { "at": 3000, "event": { "kind": "preempt_enable", "sched": false } }
            ]
        }"#;
        let scenario = load_workload(json, None).unwrap();
        assert_eq!(scenario.nr_cpus(), 1);
        assert_eq!(scenario.steps().len(), 2);
        assert_eq!(scenario.steps()[0].at, 1_000);
        assert_eq!(scenario.steps()[0].cpu, CpuId(0));
        assert_eq!(
            scenario.steps()[0].event,
            SimEvent::PreemptDisable { sched: false }
        );
    }

    #[test]
    fn test_load_all_event_kinds() {
        let json = r#"{
            "cpus": 2,
            "steps": [
                { "at": 10, "cpu": 1, "event": { "kind": "irq_disable", "entry": true } },
                { "at": 20, "cpu": 1, "event": { "kind": "irq_vector_entry", "vector": 42 } },
                { "at": 30, "cpu": 1, "event": { "kind": "irq_handler_entry", "irq": 7 } },
                { "at": 40, "cpu": 1, "event": { "kind": "irq_enable", "exit": true } },
                { "at": 50, "cpu": 0, "event": { "kind": "nmi_entry" } },
                { "at": 60, "cpu": 0, "event": { "kind": "nmi_exit" } },
                { "at": 70, "cpu": 0, "event": { "kind": "context_switch", "pid": 9 } },
                { "at": 80, "cpu": 0, "event": { "kind": "need_resched", "pending": true } }
            ]
        }"#;
        let scenario = load_workload(json, None).unwrap();
        assert_eq!(scenario.steps().len(), 8);
        assert_eq!(
            scenario.steps()[6].event,
            SimEvent::ContextSwitch { pid: Pid(9) }
        );
    }

    #[test]
    fn test_reject_unordered_steps() {
        let json = r#"{
            "cpus": 1,
            "steps": [
                { "at": 2000, "event": { "kind": "nmi_entry" } },
                { "at": 1000, "event": { "kind": "nmi_exit" } }
            ]
        }"#;
        assert!(matches!(
            load_workload(json, None),
            Err(WorkloadError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_reject_cpu_out_of_range() {
        let json = r#"{
            "cpus": 1,
            "steps": [
                { "at": 1000, "cpu": 4, "event": { "kind": "nmi_entry" } }
            ]
        }"#;
        assert!(matches!(
            load_workload(json, None),
            Err(WorkloadError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_reject_bad_json() {
        assert!(matches!(
            load_workload("{ not json", None),
            Err(WorkloadError::Json(_))
        ));
    }
}
