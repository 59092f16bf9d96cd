//! Module import: each import builds a nested VM, runs it to completion, and
//! exposes its global frame as the module's attributes.

use crate::{
    bytecode::Register,
    machine::{Machine, RunResult, VmId},
    value::ValueKind,
};

impl Machine {
    pub(crate) fn exec_import(&mut self, vm: VmId, dst: Register, name: &str) -> RunResult<()> {
        if name == "libms" {
            let libms = self.libms.expect("libms loads during machine construction");
            self.store(vm, dst, libms);
            return Ok(());
        }

        let Some((bytecode, path)) = self.resolver.resolve(name) else {
            let class = self.builtins.module_not_found_error;
            return Err(self.raise_with(class, &format!("module '{name}' was not found")));
        };

        let module_vm = self.create_vm(bytecode, &path);
        let module = self.alloc_module(name, module_vm);
        self.vms.get_mut(module_vm).module_value = Some(module);

        // Registered so a collection mid-import cannot sweep the
        // half-constructed module.
        self.currently_imported.push(module);
        self.active_vms.push(module_vm);
        let result = self.run_vm(module_vm, 0);
        self.active_vms.pop();
        self.currently_imported.pop();
        result?;

        // Annotations applied before the module value existed.
        let pending = std::mem::take(&mut self.vms.get_mut(module_vm).mod_annotations);
        for (ann_name, val) in pending {
            self.heap.get_mut(module).annotate(ann_name, val);
        }

        self.store(vm, dst, module);
        Ok(())
    }

    /// `IMPORT_ALL` spills a module or space into the current frame so its
    /// names resolve without qualification.
    pub(crate) fn exec_import_all(&mut self, vm: VmId, src: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        if !matches!(
            self.heap.get(v).kind,
            ValueKind::Module(_) | ValueKind::Space { .. }
        ) {
            let kind = self.heap.get(v).kind.kind_name();
            return Err(self.raise_type_error(&format!("cannot import everything from a {kind} value")));
        }
        let frame = self.cur_frame(vm);
        self.pools.get_mut(frame).push_spilled_value(v);
        Ok(())
    }
}
