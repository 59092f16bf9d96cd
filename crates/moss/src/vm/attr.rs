//! Name and attribute access opcodes.

use crate::{
    bytecode::Register,
    heap::HeapId,
    machine::{Machine, RunResult, VmId},
    value::ValueKind,
};

impl Machine {
    pub(crate) fn exec_load(&mut self, vm: VmId, dst: Register, name: &str) -> RunResult<()> {
        match self.load_name(vm, name) {
            Some((v, _owner)) => {
                self.store(vm, dst, v);
                Ok(())
            }
            None => Err(self.raise_name_error(name)),
        }
    }

    pub(crate) fn exec_load_global(&mut self, vm: VmId, dst: Register, name: &str) -> RunResult<()> {
        match self.load_global_name(vm, name) {
            Some(v) => {
                self.store(vm, dst, v);
                Ok(())
            }
            None => Err(self.raise_name_error(name)),
        }
    }

    pub(crate) fn exec_load_nonloc(&mut self, vm: VmId, dst: Register, name: &str) -> RunResult<()> {
        match self.load_non_local_name(vm, name) {
            Some(v) => {
                self.store(vm, dst, v);
                Ok(())
            }
            None => Err(self.raise_name_error(name)),
        }
    }

    pub(crate) fn exec_load_attr(&mut self, vm: VmId, dst: Register, src: Register, name: &str) -> RunResult<()> {
        let base = self.load(vm, src);
        let Some(attr) = self.get_attr(base, name) else {
            return Err(self.raise_attribute_error(base, name));
        };

        // A non-static method loaded off an instance captures its receiver in
        // the open call frame, so `CALL` can prepend it.
        let receiver = match &self.heap.get(base).kind {
            ValueKind::Object => Some(base),
            ValueKind::Super(sup) => Some(sup.instance),
            _ => None,
        };
        if let Some(receiver) = receiver {
            if self.is_callable_method(attr) && !self.is_static_method(attr) {
                if let Some(cf) = self.top_call_frame_mut(vm) {
                    if !cf.matched_to_frame && cf.function.is_none() {
                        cf.bound_instance = Some(receiver);
                    }
                }
            }
        }

        self.store(vm, dst, attr);
        Ok(())
    }

    fn is_callable_method(&self, v: HeapId) -> bool {
        matches!(self.heap.get(v).kind, ValueKind::Fun(_) | ValueKind::FunList(_))
    }

    fn is_static_method(&self, v: HeapId) -> bool {
        let value = self.heap.get(v);
        if value.annotation("static_method").is_some() {
            return true;
        }
        if let ValueKind::FunList(funs) = &value.kind {
            if let Some(first) = funs.first() {
                return self.heap.get(*first).annotation("static_method").is_some();
            }
        }
        false
    }

    /// `STORE_GLOBAL`: rebinds an existing global or creates a new binding in
    /// the global frame.
    pub(crate) fn exec_store_global(&mut self, vm: VmId, name: &str, v: HeapId) -> RunResult<()> {
        let global = self.global_frame(vm);
        let pool = self.pools.get_mut(global);
        if !pool.overwrite(name, v) {
            let reg = pool.get_free_reg();
            pool.store(reg, v);
            pool.store_name(reg, name);
        }
        Ok(())
    }
}
