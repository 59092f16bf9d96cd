//! Memory pools: the register file plus name map backing every frame,
//! constant pool, and attribute store.
//!
//! Pools live in their own arena so frames detached by `POP_FRAME` can keep
//! serving as closure frames or attribute stores until the collector proves
//! them unreachable.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    bytecode::Register,
    frame::{ExceptionCatch, Finally},
    heap::HeapId,
    machine::VmId,
};

/// Index of a pool in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl PoolId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A register pool with a symbol table.
#[derive(Debug, Default)]
pub(crate) struct MemoryPool {
    pool: AHashMap<Register, HeapId>,
    sym_table: IndexMap<String, Register>,
    /// Modules and spaces spilled into this frame by `IMPORT_ALL` or
    /// anonymous spaces; name lookup falls through to their attributes.
    spilled: Vec<HeapId>,
    /// Stack of finalizer levels; the innermost level is active.
    finally_stack: Vec<Vec<Finally>>,
    /// Exception handlers registered while this frame was current.
    catches: Vec<ExceptionCatch>,
    holds_consts: bool,
    global: bool,
    /// Function that owns this frame, when it is a call frame (used for
    /// closure lookup).
    pub pool_owner: Option<HeapId>,
    /// VM this pool belongs to, when it is a frame of one.
    pub vm_owner: Option<VmId>,
    /// High-register allocator state; counts down from `u32::MAX`.
    next_dynamic: Register,
}

impl MemoryPool {
    pub fn new(holds_consts: bool, global: bool) -> Self {
        Self {
            finally_stack: vec![Vec::new()],
            holds_consts,
            global,
            next_dynamic: 0,
            ..Self::default()
        }
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn store(&mut self, reg: Register, v: HeapId) {
        self.pool.insert(reg, v);
    }

    pub fn load(&self, reg: Register) -> Option<HeapId> {
        self.pool.get(&reg).copied()
    }

    pub fn store_name(&mut self, reg: Register, name: impl Into<String>) {
        self.sym_table.insert(name.into(), reg);
    }

    pub fn remove_name(&mut self, name: &str) {
        self.sym_table.shift_remove(name);
    }

    pub fn name_register(&self, name: &str) -> Option<Register> {
        self.sym_table.get(name).copied()
    }

    /// Resolves a name against this pool only (no spill fallback).
    pub fn load_name_local(&self, name: &str) -> Option<HeapId> {
        self.name_register(name).and_then(|reg| self.load(reg))
    }

    /// Rebinds an existing name in place; false when the name is absent.
    pub fn overwrite(&mut self, name: &str, v: HeapId) -> bool {
        match self.sym_table.get(name) {
            Some(&reg) => {
                self.pool.insert(reg, v);
                true
            }
            None => false,
        }
    }

    /// A register guaranteed not to collide with codegen's forward-assigned
    /// ones; counts down from the top of the register space.
    pub fn get_free_reg(&mut self) -> Register {
        self.next_dynamic += 1;
        Register::MAX - self.next_dynamic
    }

    pub fn push_spilled_value(&mut self, v: HeapId) {
        self.spilled.push(v);
    }

    pub fn spilled_values(&self) -> &[HeapId] {
        &self.spilled
    }

    pub fn push_finally(&mut self, f: Finally) {
        self.finally_stack
            .last_mut()
            .expect("finally level stack is never empty")
            .push(f);
    }

    pub fn pop_finally(&mut self) -> Option<Finally> {
        self.finally_stack
            .last_mut()
            .expect("finally level stack is never empty")
            .pop()
    }

    pub fn top_finally(&self) -> Option<Finally> {
        self.finally_stack.last().and_then(|level| level.last()).copied()
    }

    pub fn push_finally_stack(&mut self) {
        self.finally_stack.push(Vec::new());
    }

    pub fn pop_finally_stack(&mut self) {
        self.finally_stack.pop();
        if self.finally_stack.is_empty() {
            self.finally_stack.push(Vec::new());
        }
    }

    /// Total registered finalizers across all levels.
    pub fn finally_size(&self) -> usize {
        self.finally_stack.iter().map(Vec::len).sum()
    }

    /// Drops finalizers until at most `size` remain.
    pub fn truncate_finally(&mut self, size: usize) {
        while self.finally_size() > size {
            if self.pop_finally().is_none() {
                self.pop_finally_stack();
            }
        }
    }

    pub fn push_catch(&mut self, ec: ExceptionCatch) {
        self.catches.push(ec);
    }

    pub fn pop_catch(&mut self, amount: usize) {
        let keep = self.catches.len().saturating_sub(amount);
        self.catches.truncate(keep);
    }

    pub fn catches(&self) -> &[ExceptionCatch] {
        &self.catches
    }

    /// Shallow copy of bindings, used when attributes are cloned onto a new
    /// object. Finalizers and catches do not travel.
    pub fn clone_bindings(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            sym_table: self.sym_table.clone(),
            spilled: self.spilled.clone(),
            finally_stack: vec![Vec::new()],
            catches: Vec::new(),
            holds_consts: self.holds_consts,
            global: false,
            pool_owner: None,
            vm_owner: None,
            next_dynamic: self.next_dynamic,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.pool.values().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, Register)> + '_ {
        self.sym_table.iter().map(|(n, r)| (n.as_str(), *r))
    }
}

/// Arena of memory pools with GC mark bits.
#[derive(Default)]
pub(crate) struct Pools {
    slots: Vec<Option<(MemoryPool, bool)>>,
    free: Vec<u32>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, pool: MemoryPool) -> PoolId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some((pool, false));
            PoolId(idx)
        } else {
            let idx = u32::try_from(self.slots.len()).expect("pool arena index exceeds u32");
            self.slots.push(Some((pool, false)));
            PoolId(idx)
        }
    }

    /// # Panics
    /// Accessing a swept pool is a fatal implementation bug.
    pub fn get(&self, id: PoolId) -> &MemoryPool {
        self.slots[id.index()]
            .as_ref()
            .map(|(p, _)| p)
            .expect("access to a collected memory pool")
    }

    pub fn get_mut(&mut self, id: PoolId) -> &mut MemoryPool {
        self.slots[id.index()]
            .as_mut()
            .map(|(p, _)| p)
            .expect("access to a collected memory pool")
    }

    pub fn is_live(&self, id: PoolId) -> bool {
        self.slots.get(id.index()).is_some_and(Option::is_some)
    }

    /// Marks a pool; returns false when it was already marked.
    pub fn mark(&mut self, id: PoolId) -> bool {
        let slot = self.slots[id.index()].as_mut().expect("marking a collected pool");
        if slot.1 {
            false
        } else {
            slot.1 = true;
            true
        }
    }

    /// Frees unmarked pools and clears marks.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for idx in 0..self.slots.len() {
            match &mut self.slots[idx] {
                Some((_, marked)) if *marked => *marked = false,
                Some(_) => {
                    self.slots[idx] = None;
                    self.free.push(idx as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        freed
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_after_store() {
        let mut pool = MemoryPool::new(false, false);
        pool.store(4, HeapId::ZERO);
        pool.store_name(4, "answer");
        assert_eq!(pool.load_name_local("answer"), Some(HeapId::ZERO));
        assert_eq!(pool.load_name_local("missing"), None);
    }

    #[test]
    fn overwrite_rebinds_without_new_slot() {
        let mut pool = MemoryPool::new(false, false);
        pool.store(1, HeapId::ZERO);
        pool.store_name(1, "x");
        assert!(pool.overwrite("x", HeapId::ZERO));
        assert!(!pool.overwrite("y", HeapId::ZERO));
        assert_eq!(pool.name_register("x"), Some(1));
    }

    #[test]
    fn free_regs_descend_from_the_top() {
        let mut pool = MemoryPool::new(false, false);
        let a = pool.get_free_reg();
        let b = pool.get_free_reg();
        assert!(a > b);
        assert!(a > u32::MAX - 16);
    }

    #[test]
    fn finally_levels_nest() {
        let mut pool = MemoryPool::new(false, false);
        pool.push_finally(Finally { addr: 10, caller: 1 });
        pool.push_finally_stack();
        pool.push_finally(Finally { addr: 20, caller: 2 });
        assert_eq!(pool.finally_size(), 2);
        assert_eq!(pool.top_finally().unwrap().addr, 20);
        pool.pop_finally_stack();
        assert_eq!(pool.top_finally().unwrap().addr, 10);
    }
}
