//! Exception opcodes and raise plumbing.
//!
//! `CATCH` registers a handler on the current frame together with the stack
//! depths to restore. A raise that must leave a frame with a registered
//! finalizer stashes itself in the finalizer's constant slot, runs the block,
//! and `FINALLY_END` replicates the raise afterwards.

use crate::{
    bytecode::{Address, Register},
    frame::{ExceptionCatch, Finally},
    heap::HeapId,
    machine::{Machine, RunError, RunResult, VmId},
    value::ValueKind,
};

impl Machine {
    pub(crate) fn exec_assert(&mut self, vm: VmId, src: Register, msg: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        let holds = match self.heap.get(v).kind {
            ValueKind::Bool(b) => b,
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("assert expects a Bool, but got {kind}")));
            }
        };
        if holds {
            return Ok(());
        }
        let msg_val = self.load(vm, msg);
        let text = if matches!(self.heap.get(msg_val).kind, ValueKind::Nil) {
            "assertion failed".to_string()
        } else {
            self.to_display_string(vm, msg_val)?
        };
        let class = self.builtins.assertion_error;
        Err(self.raise_with(class, &text))
    }

    pub(crate) fn exec_catch(&mut self, vm: VmId, name: &str, ty: Option<HeapId>, addr: Address) -> RunResult<()> {
        let interp = self.interp(vm);
        let frame_depth = interp.frames.len();
        let call_frame_depth = interp.call_frames.len();
        let frame = self.cur_frame(vm);
        let finally_size = self.pools.get(frame).finally_size();
        self.pools.get_mut(frame).push_catch(ExceptionCatch {
            ty,
            name: name.to_string(),
            addr,
            frame_depth,
            call_frame_depth,
            finally_size,
        });
        Ok(())
    }

    pub(crate) fn exec_finally(&mut self, vm: VmId, addr: Address, caller: Register) -> RunResult<()> {
        // The slot starts Nil; a raise on the way out stashes itself there.
        let nil = self.nil();
        self.store_const(vm, caller, nil);
        let frame = self.cur_frame(vm);
        self.pools.get_mut(frame).push_finally(Finally { addr, caller });
        Ok(())
    }

    /// End of a finalizer block: re-raises a stashed exception, or falls
    /// through when the block was entered on the normal path.
    pub(crate) fn exec_finally_end(&mut self, vm: VmId, caller: Register) -> RunResult<()> {
        let pending = self.load_const(vm, caller);
        if matches!(self.heap.get(pending).kind, ValueKind::Nil) {
            return Ok(());
        }
        let nil = self.nil();
        self.store_const(vm, caller, nil);
        Err(RunError::Raise(pending))
    }

    /// Enters the innermost pending finalizer of the current frame for a
    /// raise in flight: stashes the exception and jumps to the block.
    /// Returns false when no finalizer can take the exception.
    pub(crate) fn enter_finalizer(&mut self, vm: VmId, exc: HeapId) -> RunResult<bool> {
        loop {
            let frame = self.cur_frame(vm);
            let Some(fnl) = self.pools.get(frame).top_finally() else {
                return Ok(false);
            };
            let slot = self.load_const(vm, fnl.caller);
            if matches!(self.heap.get(slot).kind, ValueKind::Nil) {
                self.store_const(vm, fnl.caller, exc);
                self.set_bci(vm, fnl.addr);
                return Ok(true);
            }
            // The block is already running for this unwind; it cannot take
            // another entry.
            self.pools.get_mut(frame).pop_finally();
        }
    }

    /// Restores the stacks recorded by the catch, binds the exception value
    /// to the handler name, and jumps to the handler.
    pub(crate) fn handle_exception(&mut self, vm: VmId, ec: &ExceptionCatch, catch_index: usize, exc: HeapId) {
        while self.interp(vm).frames.len() > ec.frame_depth {
            self.unwind_one_frame(vm);
        }
        while self.interp(vm).call_frames.len() > ec.call_frame_depth {
            let cf = self.pop_call_frame(vm).expect("call frame count checked");
            self.unwound_funs.push(cf.function);
        }
        let frame = self.cur_frame(vm);
        {
            let pool = self.pools.get_mut(frame);
            pool.truncate_finally(ec.finally_size);
            // The fired handler and anything registered after it are spent.
            let live = pool.catches().len() - catch_index;
            pool.pop_catch(live);
        }

        let reg = self.get_free_reg(vm);
        self.store(vm, reg, exc);
        self.store_name(vm, reg, &ec.name);
        self.set_bci(vm, ec.addr);
    }

    /// Pops one frame during raise propagation, recording unwound functions
    /// for the stack trace.
    pub(crate) fn unwind_one_frame(&mut self, vm: VmId) {
        // Calls still staging arguments in the dying frame never resolved a
        // function worth reporting.
        while self
            .interp(vm)
            .call_frames
            .last()
            .is_some_and(|cf| !cf.matched_to_frame)
        {
            let cf = self.pop_call_frame(vm).expect("just observed");
            self.unwound_funs.push(cf.function);
        }
        let is_fun_frame = self.pools.get(self.cur_frame(vm)).pool_owner.is_some();
        if is_fun_frame
            && self
                .interp(vm)
                .call_frames
                .last()
                .is_some_and(|cf| cf.matched_to_frame)
        {
            let cf = self.pop_call_frame(vm).expect("just observed");
            self.unwound_funs.push(cf.function);
        }
        self.pop_frame(vm);
    }
}
