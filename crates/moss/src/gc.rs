//! Tracing mark-and-sweep collection.
//!
//! Roots: pinned slots (interned singletons, built-in classes, libms), the
//! main VM and every VM on the active nesting stack, modules mid-import, the
//! unwound-function list, and the generator-note buffer. Value blackening is
//! iterative over a gray worklist so deep object graphs cannot blow the
//! stack; cycles collect naturally because nothing here counts references.

use crate::{
    heap::{HeapId, GC_GROW_FACTOR},
    machine::{Machine, VmId},
    memory::PoolId,
    value::ValueKind,
};

impl Machine {
    pub(crate) fn collect_garbage(&mut self) {
        let mut gray: Vec<HeapId> = Vec::new();

        for id in self.heap.pinned.clone() {
            self.mark_value(&mut gray, id);
        }

        let mut vm_roots: Vec<VmId> = vec![self.main_vm];
        vm_roots.extend(self.active_vms.iter().copied());
        for vm in vm_roots {
            self.mark_vm(&mut gray, vm);
        }

        for id in self.currently_imported.clone() {
            self.mark_value(&mut gray, id);
        }
        for id in self.unwound_funs.clone().into_iter().flatten() {
            self.mark_value(&mut gray, id);
        }
        for id in self.generator_notes.clone() {
            self.mark_value(&mut gray, id);
        }
        for id in self.temp_roots.clone() {
            self.mark_value(&mut gray, id);
        }

        while let Some(id) = gray.pop() {
            self.blacken(&mut gray, id);
        }

        let freed_values = self.heap.sweep();
        let freed_pools = self.pools.sweep();
        let freed_vms = self.vms.sweep(self.main_vm);

        // Reclaim threshold headroom after a spike.
        if (self.heap.next_gc / GC_GROW_FACTOR) / 2 > self.heap.allocated_bytes {
            self.heap.next_gc /= GC_GROW_FACTOR;
        }

        self.tracer.on_gc(freed_values, freed_pools, freed_vms);
    }

    fn mark_value(&mut self, gray: &mut Vec<HeapId>, id: HeapId) {
        if self.heap.is_live(id) && self.heap.mark(id) {
            gray.push(id);
        }
    }

    fn mark_pool(&mut self, gray: &mut Vec<HeapId>, pool: PoolId) {
        if !self.pools.is_live(pool) || !self.pools.mark(pool) {
            return;
        }
        let (values, spilled, catch_types, owner, vm_owner) = {
            let p = self.pools.get(pool);
            (
                p.values().collect::<Vec<_>>(),
                p.spilled_values().to_vec(),
                p.catches().iter().filter_map(|ec| ec.ty).collect::<Vec<_>>(),
                p.pool_owner,
                p.vm_owner,
            )
        };
        for v in values {
            self.mark_value(gray, v);
        }
        for v in spilled {
            self.mark_value(gray, v);
        }
        for v in catch_types {
            self.mark_value(gray, v);
        }
        if let Some(owner) = owner {
            self.mark_value(gray, owner);
        }
        if let Some(vm) = vm_owner {
            self.mark_vm(gray, vm);
        }
    }

    fn mark_vm(&mut self, gray: &mut Vec<HeapId>, vm: VmId) {
        if !self.vms.is_live(vm) || self.vms.get(vm).marked {
            return;
        }
        self.vms.get_mut(vm).marked = true;

        let (frames, const_pools, parents, cf_values, pending_lists, pending_return, mod_annotations) = {
            let interp = self.vms.get(vm);
            let mut cf_values = Vec::new();
            for cf in &interp.call_frames {
                if let Some(f) = cf.function {
                    cf_values.push(f);
                }
                for arg in &cf.args {
                    cf_values.push(arg.value);
                }
                cf_values.extend(cf.extern_return_value);
                cf_values.extend(cf.bound_instance);
                cf_values.extend(cf.constructed_object);
            }
            (
                interp.frames.clone(),
                interp.const_pools.clone(),
                interp.parent_list.clone(),
                cf_values,
                interp.pending_lists.values().flatten().copied().collect::<Vec<_>>(),
                interp.pending_return,
                interp.mod_annotations.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            )
        };

        for pool in frames.into_iter().chain(const_pools) {
            self.mark_pool(gray, pool);
        }
        for v in parents
            .into_iter()
            .chain(cf_values)
            .chain(pending_lists)
            .chain(pending_return)
            .chain(mod_annotations)
        {
            self.mark_value(gray, v);
        }
    }

    /// Marks everything one value references: its type, owner module,
    /// annotations, attribute pool, and kind-specific children.
    fn blacken(&mut self, gray: &mut Vec<HeapId>, id: HeapId) {
        let mut children: Vec<HeapId> = Vec::new();
        let mut pools: Vec<PoolId> = Vec::new();
        let mut vms: Vec<VmId> = Vec::new();
        {
            let v = self.heap.get(id);
            children.push(v.ty);
            children.extend(v.owner);
            children.extend(v.annotations.iter().map(|(_, a)| *a));
            pools.extend(v.attrs);

            match &v.kind {
                ValueKind::List(vals) => children.extend(vals.iter().copied()),
                ValueKind::Dict(d) => {
                    for bucket in d.buckets.values() {
                        for (k, val) in bucket {
                            children.push(*k);
                            children.push(*val);
                        }
                    }
                }
                ValueKind::Range(r) => children.extend([r.start, r.step, r.end]),
                ValueKind::Fun(data) => {
                    for arg in &data.args {
                        children.extend(arg.types.iter().copied());
                        children.extend(arg.default_value);
                    }
                    children.extend(data.parent_class);
                    pools.extend(data.closures.iter().copied());
                    vms.push(data.vm);
                }
                ValueKind::FunList(funs) => children.extend(funs.iter().copied()),
                ValueKind::Class(c) => children.extend(c.supers.iter().copied()),
                ValueKind::Module(vm) => vms.push(*vm),
                ValueKind::Space { vm, extra_owners, .. } => {
                    children.extend(extra_owners.iter().copied());
                    vms.push(*vm);
                }
                ValueKind::EnumType(members) => children.extend(members.iter().copied()),
                ValueKind::Super(s) => children.extend([s.instance, s.parent]),
                ValueKind::StrIter { src, .. }
                | ValueKind::BytesIter { src, .. }
                | ValueKind::ListIter { src, .. }
                | ValueKind::DictIter { src, .. }
                | ValueKind::FunListIter { src, .. } => children.push(*src),
                _ => {}
            }
        }
        for c in children {
            self.mark_value(gray, c);
        }
        for p in pools {
            self.mark_pool(gray, p);
        }
        for vm in vms {
            self.mark_vm(gray, vm);
        }
    }
}
