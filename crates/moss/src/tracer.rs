//! Execution tracing hooks.
//!
//! The machine drives a [`VmTracer`] at well-defined points; the default
//! tracer does nothing. A recording tracer is provided for tests and
//! debugging sessions.

/// Observer of VM execution.
pub trait VmTracer {
    /// Called before each instruction dispatch.
    fn on_opcode(&mut self, _module: &str, _bci: u32, _mnemonic: &str) {}

    /// Called when a collection cycle finishes.
    fn on_gc(&mut self, _freed_values: usize, _freed_pools: usize, _freed_vms: usize) {}

    /// Called when execution nests into another module's VM.
    fn on_cross_module(&mut self, _from: &str, _to: &str) {}
}

/// The default tracer: no output, no cost.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Records every event; handy in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub opcodes: Vec<(String, u32, String)>,
    pub gc_runs: Vec<(usize, usize, usize)>,
    pub cross_module: Vec<(String, String)>,
}

impl VmTracer for RecordingTracer {
    fn on_opcode(&mut self, module: &str, bci: u32, mnemonic: &str) {
        self.opcodes.push((module.to_string(), bci, mnemonic.to_string()));
    }

    fn on_gc(&mut self, freed_values: usize, freed_pools: usize, freed_vms: usize) {
        self.gc_runs.push((freed_values, freed_pools, freed_vms));
    }

    fn on_cross_module(&mut self, from: &str, to: &str) {
        self.cross_module.push((from.to_string(), to.to_string()));
    }
}
