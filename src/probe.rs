//! The probe table: which host tracepoints the analyzer hooks, and how.
//!
//! The binding list is data, not code: each entry pairs a host tracepoint
//! name with the [`Hook`] the registry should dispatch it to. Registration
//! is all-or-nothing: a failure rolls back every probe registered so far.

use std::io;
use std::sync::Arc;

/// The handler a registered tracepoint feeds.
///
/// One hook can back several tracepoint names (every platform vector entry
/// point reports through [`Hook::IrqVectorEntry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    NmiEntry,
    NmiExit,
    IrqDisable,
    IrqEnable,
    PreemptDisable,
    PreemptEnable,
    IrqVectorEntry,
    IrqHandlerEntry,
}

/// Tracepoint registry provided by the host.
///
/// `register` fails with `InvalidInput` when the named tracepoint does not
/// exist or cannot be hooked; the caller rolls back and reports the failure.
pub trait TracepointRegistry: Send + Sync {
    fn register(&self, name: &'static str, hook: Hook) -> io::Result<()>;
    fn unregister(&self, name: &'static str, hook: Hook);
}

impl<T: TracepointRegistry + ?Sized> TracepointRegistry for Arc<T> {
    fn register(&self, name: &'static str, hook: Hook) -> io::Result<()> {
        (**self).register(name, hook)
    }

    fn unregister(&self, name: &'static str, hook: Hook) {
        (**self).unregister(name, hook)
    }
}

#[derive(Debug)]
struct ProbeBinding {
    name: &'static str,
    hook: Hook,
    registered: bool,
}

/// Interrupt identification when built with the `irq-vectors` feature: the
/// platform's per-vector entry tracepoints.
#[cfg(feature = "irq-vectors")]
const VECTOR_ENTRY_NAMES: &[&str] = &[
    "local_timer_entry",
    "thermal_apic_entry",
    "deferred_error_apic_entry",
    "threshold_apic_entry",
    "call_function_single_entry",
    "call_function_entry",
    "reschedule_entry",
    "irq_work_entry",
    "x86_platform_ipi_entry",
    "error_apic_entry",
    "spurious_apic_entry",
    "external_interrupt_entry",
];

/// The set of probes the analyzer binds, with per-entry registration state
/// so a partial failure can be unwound.
#[derive(Debug)]
pub(crate) struct ProbeSet {
    bindings: Vec<ProbeBinding>,
}

impl ProbeSet {
    pub fn new() -> Self {
        let mut bindings = vec![
            ProbeBinding {
                name: "nmi_entry",
                hook: Hook::NmiEntry,
                registered: false,
            },
            ProbeBinding {
                name: "nmi_exit",
                hook: Hook::NmiExit,
                registered: false,
            },
            ProbeBinding {
                name: "irq_disable",
                hook: Hook::IrqDisable,
                registered: false,
            },
            ProbeBinding {
                name: "irq_enable",
                hook: Hook::IrqEnable,
                registered: false,
            },
            ProbeBinding {
                name: "preempt_disable",
                hook: Hook::PreemptDisable,
                registered: false,
            },
            ProbeBinding {
                name: "preempt_enable",
                hook: Hook::PreemptEnable,
                registered: false,
            },
        ];

        #[cfg(feature = "irq-vectors")]
        bindings.extend(VECTOR_ENTRY_NAMES.iter().map(|name| ProbeBinding {
            name,
            hook: Hook::IrqVectorEntry,
            registered: false,
        }));

        #[cfg(not(feature = "irq-vectors"))]
        bindings.push(ProbeBinding {
            name: "irq_handler_entry",
            hook: Hook::IrqHandlerEntry,
            registered: false,
        });

        Self { bindings }
    }

    /// Register every probe, rolling back the ones already registered if
    /// any registration fails.
    pub fn register_all<R: TracepointRegistry>(&mut self, registry: &R) -> io::Result<()> {
        for i in 0..self.bindings.len() {
            let (name, hook) = (self.bindings[i].name, self.bindings[i].hook);
            match registry.register(name, hook) {
                Ok(()) => self.bindings[i].registered = true,
                Err(err) => {
                    tracing::warn!(
                        probe = name,
                        error = %err,
                        "probe registration failed, rolling back"
                    );
                    self.unregister_all(registry);
                    return Err(io::Error::from_raw_os_error(libc::EINVAL));
                }
            }
        }
        Ok(())
    }

    /// Unregister everything currently registered.
    pub fn unregister_all<R: TracepointRegistry>(&mut self, registry: &R) {
        for binding in &mut self.bindings {
            if !binding.registered {
                continue;
            }
            registry.unregister(binding.name, binding.hook);
            binding.registered = false;
        }
    }
}
