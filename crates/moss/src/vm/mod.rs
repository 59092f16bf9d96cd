//! The fetch–decode–execute loop.
//!
//! One instruction executes at a time; the collector only runs between
//! instructions. Raised values travel as the error variant of [`RunResult`]
//! until a matching catch, a registered finalizer, or the VM boundary.

mod attr;
mod binary;
mod call;
mod collections;
mod exceptions;
mod format;
mod import;

use crate::{
    bytecode::OpCode,
    machine::{Machine, RunError, RunResult, VmId},
    value::{render_value, ValueKind},
};

impl Machine {
    /// Runs the main program to completion and returns the exit code.
    pub fn run(&mut self) -> i32 {
        let main = self.main_vm;
        debug_assert!(self.interp(main).main, "run() targets the main interpreter");
        self.active_vms.push(main);
        let result = self.run_vm(main, 0);
        self.active_vms.pop();

        match result {
            Ok(()) => {
                if !self.exit_called {
                    self.output_generator_notes();
                }
            }
            Err(RunError::Raise(exc)) => self.report_unhandled(exc),
        }
        self.exit_code
    }

    /// Runs one VM until its code ends, it is stopped, or a raise crosses
    /// `frame_boundary` (the frame depth at entry of this nested run).
    pub(crate) fn run_vm(&mut self, vm: VmId, frame_boundary: usize) -> RunResult<()> {
        loop {
            if self.exit_called {
                return Ok(());
            }
            {
                let interp = self.vms.get_mut(vm);
                if interp.stop {
                    interp.stop = false;
                    return Ok(());
                }
                if interp.bci as usize >= interp.code.len() {
                    return Ok(());
                }
            }

            let interp = self.vms.get(vm);
            let bci = interp.bci;
            let op = interp.code.ops()[bci as usize].clone();
            let module = interp.module_name.clone();
            self.tracer.on_opcode(&module, bci, &op.mnemonic());

            match self.exec(vm, op) {
                Ok(()) => {
                    // Reaching the next instruction after a handled raise
                    // means the trace accumulator is stale.
                    if !self.unwound_funs.is_empty() {
                        self.unwound_funs.clear();
                    }
                }
                Err(RunError::Raise(exc)) => self.dispatch_raise(vm, exc, frame_boundary)?,
            }

            let interp = self.vms.get_mut(vm);
            if interp.bci_modified {
                interp.bci_modified = false;
            } else {
                interp.bci += 1;
            }
            if interp.stop {
                interp.stop = false;
                return Ok(());
            }

            if self.heap.gc_armed {
                self.heap.gc_armed = false;
                self.collect_garbage();
            }
        }
    }

    /// One instruction. Opcode families live in the sibling modules.
    fn exec(&mut self, vm: VmId, op: OpCode) -> RunResult<()> {
        match op {
            OpCode::End => Ok(()),

            // -- moves and loads --------------------------------------------
            OpCode::Load { dst, name } => self.exec_load(vm, dst, &name),
            OpCode::LoadAttr { dst, src, name } => self.exec_load_attr(vm, dst, src, &name),
            OpCode::LoadGlobal { dst, name } => self.exec_load_global(vm, dst, &name),
            OpCode::LoadNonLoc { dst, name } => self.exec_load_nonloc(vm, dst, &name),
            OpCode::Store { dst, src } => {
                let v = self.load(vm, src);
                self.store(vm, dst, v);
                Ok(())
            }
            OpCode::StoreName { dst, name } => {
                self.store_name(vm, dst, &name);
                Ok(())
            }
            OpCode::StoreConst { dst, csrc } => {
                let v = self.load_const(vm, csrc);
                self.store(vm, dst, v);
                Ok(())
            }
            OpCode::StoreAttr { src, obj, name } => {
                let v = self.load(vm, src);
                let target = self.load(vm, obj);
                self.set_attr(target, &name, v)
            }
            OpCode::StoreConstAttr { csrc, obj, name } => {
                let v = self.load_const(vm, csrc);
                let target = self.load(vm, obj);
                self.set_attr(target, &name, v)
            }
            OpCode::StoreGlobal { src, name } => {
                let v = self.load(vm, src);
                self.exec_store_global(vm, &name, v)
            }
            OpCode::StoreNonLoc { src, name } => {
                let v = self.load(vm, src);
                if self.store_non_local(vm, &name, v) {
                    Ok(())
                } else {
                    Err(self.raise_name_error(&name))
                }
            }
            OpCode::StoreSubsc { src, obj, key } => {
                let v = self.load(vm, src);
                let target = self.load(vm, obj);
                let k = self.load(vm, key);
                self.set_subsc(vm, target, k, v)
            }
            OpCode::StoreConstSubsc { csrc, obj, key } => {
                let v = self.load_const(vm, csrc);
                let target = self.load(vm, obj);
                let k = self.load(vm, key);
                self.set_subsc(vm, target, k, v)
            }
            OpCode::StoreSubscConst { src, obj, ckey } => {
                let v = self.load(vm, src);
                let target = self.load(vm, obj);
                let k = self.load_const(vm, ckey);
                self.set_subsc(vm, target, k, v)
            }
            OpCode::StoreCSubscC { csrc, obj, ckey } => {
                let v = self.load_const(vm, csrc);
                let target = self.load(vm, obj);
                let k = self.load_const(vm, ckey);
                self.set_subsc(vm, target, k, v)
            }

            // -- literal materialisation ------------------------------------
            OpCode::StoreIntConst { dst, val } => {
                let v = self.alloc_int(val);
                self.store_const(vm, dst, v);
                Ok(())
            }
            OpCode::StoreFloatConst { dst, val } => {
                let v = self.alloc_float(val);
                self.store_const(vm, dst, v);
                Ok(())
            }
            OpCode::StoreBoolConst { dst, val } => {
                let v = self.builtins.bool_val(val);
                self.store_const(vm, dst, v);
                Ok(())
            }
            OpCode::StoreStringConst { dst, val } => {
                let v = self.alloc_str(&val);
                self.store_const(vm, dst, v);
                Ok(())
            }
            OpCode::StoreNilConst { dst } => {
                let v = self.nil();
                self.store_const(vm, dst, v);
                Ok(())
            }

            // -- control flow -----------------------------------------------
            OpCode::Jmp { addr } => {
                self.set_bci(vm, addr);
                Ok(())
            }
            OpCode::JmpIfTrue { src, addr } => {
                if self.condition(vm, src)? {
                    self.set_bci(vm, addr);
                }
                Ok(())
            }
            OpCode::JmpIfFalse { src, addr } => {
                if !self.condition(vm, src)? {
                    self.set_bci(vm, addr);
                }
                Ok(())
            }

            // -- calls ------------------------------------------------------
            OpCode::Call { dst, src } => self.exec_call(vm, dst, src),
            OpCode::PushFrame => self.exec_push_frame(vm),
            OpCode::PopFrame => {
                self.pop_frame(vm);
                Ok(())
            }
            OpCode::PushCallFrame => {
                self.push_call_frame(vm, None);
                Ok(())
            }
            OpCode::PopCallFrame => {
                self.pop_call_frame(vm);
                Ok(())
            }
            OpCode::Return { src } => {
                let v = self.load(vm, src);
                self.exec_return(vm, v)
            }
            OpCode::ReturnConst { csrc } => {
                let v = self.load_const(vm, csrc);
                self.exec_return(vm, v)
            }
            OpCode::PushArg { src } => {
                let v = self.load(vm, src);
                self.exec_push_arg(vm, v)
            }
            OpCode::PushConstArg { csrc } => {
                let v = self.load_const(vm, csrc);
                self.exec_push_arg(vm, v)
            }
            OpCode::PushNamedArg { src, name } => {
                let v = self.load(vm, src);
                self.exec_push_named_arg(vm, &name, v)
            }
            OpCode::PushUnpacked { src } => self.exec_push_unpacked(vm, src),
            OpCode::CreateFun { fun, name, arg_names } => self.exec_create_fun(vm, fun, &name, &arg_names),
            OpCode::FunBegin { fun } => self.exec_fun_begin(vm, fun),
            OpCode::SetDefault { fun, index, src } => {
                let v = self.load(vm, src);
                self.exec_set_default(vm, fun, index, v)
            }
            OpCode::SetDefaultConst { fun, index, csrc } => {
                let v = self.load_const(vm, csrc);
                self.exec_set_default(vm, fun, index, v)
            }
            OpCode::SetType { fun, index, ty } => self.exec_set_type(vm, fun, index, ty),
            OpCode::SetVararg { fun, index } => self.exec_set_vararg(vm, fun, index),
            OpCode::CallFormatter { dst, name } => self.exec_call_formatter(vm, dst, &name),

            // -- modules ----------------------------------------------------
            OpCode::Import { dst, name } => self.exec_import(vm, dst, &name),
            OpCode::ImportAll { src } => self.exec_import_all(vm, src),

            // -- classes and containers -------------------------------------
            OpCode::PushParent { parent } => self.exec_push_parent(vm, parent),
            OpCode::BuildClass { dst, name } => self.exec_build_class(vm, dst, &name),
            OpCode::ListPush { dst, src } => {
                let v = self.load(vm, src);
                self.interp_mut(vm).pending_lists.entry(dst).or_default().push(v);
                Ok(())
            }
            OpCode::ListPushConst { dst, csrc } => {
                let v = self.load_const(vm, csrc);
                self.interp_mut(vm).pending_lists.entry(dst).or_default().push(v);
                Ok(())
            }
            OpCode::BuildList { dst } => self.exec_build_list(vm, dst),
            OpCode::BuildDict { dst, keys, vals } => self.exec_build_dict(vm, dst, keys, vals),
            OpCode::BuildEnum { dst, vals, name } => self.exec_build_enum(vm, dst, vals, &name),
            OpCode::BuildSpace { dst, name, anonymous } => self.exec_build_space(vm, dst, &name, anonymous),
            OpCode::CreateRange { form, dst, start, step, end } => {
                self.exec_create_range(vm, form, dst, start, step, end)
            }

            // -- annotations and documentation ------------------------------
            OpCode::Annotate { dst, name, val } => self.exec_annotate(vm, dst, &name, val),
            OpCode::AnnotateMod { name, val } => self.exec_annotate_mod(vm, &name, val),
            OpCode::Document { dst, val } => self.exec_document(vm, dst, &val),

            // -- output -----------------------------------------------------
            OpCode::Output { src } => self.exec_output(vm, src),

            // -- expressions ------------------------------------------------
            OpCode::Bin { op, form, dst, lhs, rhs } => self.exec_bin(vm, op, form, dst, lhs, rhs),
            OpCode::Not { dst, src } => self.exec_not(vm, dst, src),
            OpCode::Neg { dst, src } => self.exec_neg(vm, dst, src),
            OpCode::SubscLast { dst, src, cindex } => self.exec_subsc_last(vm, dst, src, cindex),
            OpCode::SubscRest { dst, src, cindex } => self.exec_subsc_rest(vm, dst, src, cindex),

            // -- exceptions -------------------------------------------------
            OpCode::Assert { src, msg } => self.exec_assert(vm, src, msg),
            OpCode::Raise { src } => {
                let v = self.load(vm, src);
                Err(RunError::Raise(v))
            }
            OpCode::Catch { name, addr } => self.exec_catch(vm, &name, None, addr),
            OpCode::CatchTyped { name, ty, addr } => {
                let ty = self.load(vm, ty);
                self.exec_catch(vm, &name, Some(ty), addr)
            }
            OpCode::PopCatch => {
                let frame = self.cur_frame(vm);
                self.pools.get_mut(frame).pop_catch(1);
                Ok(())
            }
            OpCode::Finally { addr, caller } => self.exec_finally(vm, addr, caller),
            OpCode::PopFinally => {
                let frame = self.cur_frame(vm);
                self.pools.get_mut(frame).pop_finally();
                Ok(())
            }
            OpCode::FinallyEnd { caller } => self.exec_finally_end(vm, caller),

            // -- iteration --------------------------------------------------
            OpCode::Switch { src, vals, addrs, default_addr } => {
                self.exec_switch(vm, src, vals, addrs, default_addr)
            }
            OpCode::Iter { iterator, collection } => self.exec_iter(vm, iterator, collection),
            OpCode::For { index, iterator, addr } => self.exec_for(vm, index, iterator, addr),
            OpCode::ForMulti { index, count, iterator, addr } => {
                self.exec_for_multi(vm, index, count, iterator, addr)
            }
        }
    }

    /// Condition evaluation for conditional jumps; requires a Bool.
    fn condition(&mut self, vm: VmId, src: u32) -> RunResult<bool> {
        let v = self.load(vm, src);
        match self.heap.get(v).kind {
            ValueKind::Bool(b) => Ok(b),
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                Err(self.raise_type_error(&format!("expected Bool value, but got {kind}")))
            }
        }
    }

    /// Walks the raise up the frame stack: innermost catch wins, finalizers
    /// run before their frame is left, frames in between are unwound with
    /// their functions recorded for the stack trace.
    fn dispatch_raise(&mut self, vm: VmId, exc: HeapIdAlias, frame_boundary: usize) -> RunResult<()> {
        loop {
            let frame_id = self.cur_frame(vm);
            let depth = self.interp(vm).frames.len() - 1;

            // Innermost matching catch registered in this frame.
            let matched = {
                let pool = self.pools.get(frame_id);
                pool.catches()
                    .iter()
                    .enumerate()
                    .rev()
                    .find(|(_, ec)| match ec.ty {
                        None => true,
                        Some(ty) => self.exception_matches(exc, ty),
                    })
                    .map(|(idx, ec)| (idx, ec.clone()))
            };

            if let Some((idx, ec)) = matched {
                // Finalizers registered inside the guarded region run first.
                if self.pools.get(frame_id).finally_size() > ec.finally_size
                    && self.enter_finalizer(vm, exc)?
                {
                    return Ok(());
                }
                self.handle_exception(vm, &ec, idx, exc);
                return Ok(());
            }

            // No handler here: a registered finalizer still runs before the
            // exception leaves this frame.
            if self.enter_finalizer(vm, exc)? {
                return Ok(());
            }

            // Leave the frame, or the whole VM.
            if depth == 0 || self.interp(vm).frames.len() <= frame_boundary {
                return Err(RunError::Raise(exc));
            }
            self.unwind_one_frame(vm);
        }
    }
}

// The raised value is a plain heap id; aliased for signature clarity.
type HeapIdAlias = crate::heap::HeapId;

impl Machine {
    /// Reports an unhandled exception on the error sink and sets the exit
    /// code. `SystemExit` exits silently with its recorded code.
    fn report_unhandled(&mut self, exc: HeapIdAlias) {
        let ty = self.heap.get(exc).ty;
        if self.is_type_eq_or_subtype(ty, self.builtins.system_exit) {
            let code = self
                .get_attr(exc, "code")
                .and_then(|v| match self.heap.get(v).kind {
                    ValueKind::Int(i) => Some(i as i32),
                    _ => None,
                })
                .unwrap_or(0);
            self.exit_code = code;
            return;
        }

        let msg = self.exception_message(exc);
        self.out.write_err(&format!("{msg}\n"));
        let trace = self.render_call_stack();
        self.out.write_err(&trace);
        self.exit_code = 1;
    }

    /// `ClassName: msg` for exception objects, plain rendering otherwise.
    pub(crate) fn exception_message(&self, exc: HeapIdAlias) -> String {
        let v = self.heap.get(exc);
        if matches!(v.kind, ValueKind::Object) {
            let class_name = self.heap.get(v.ty).name.clone();
            match self.get_attr(exc, "msg") {
                Some(m) => {
                    let rendered = render_value(&self.heap, m);
                    if rendered.is_empty() {
                        class_name
                    } else {
                        format!("{class_name}: {rendered}")
                    }
                }
                None => class_name,
            }
        } else {
            render_value(&self.heap, exc)
        }
    }

    /// Formats the unwound-function list collected during propagation.
    pub(crate) fn render_call_stack(&self) -> String {
        let mut out = String::from("Stacktrace:\n");
        for fun in &self.unwound_funs {
            let Some(fun) = fun else {
                // Raised while the call target was still being resolved.
                continue;
            };
            let v = self.heap.get(*fun);
            if let ValueKind::Fun(data) = &v.kind {
                let module = if self.vms.is_live(data.vm) {
                    self.vms.get(data.vm).module_name.clone()
                } else {
                    "??".to_string()
                };
                out.push_str(&format!("  {} at {}\n", self.fun_signature(*fun), module));
            } else {
                out.push_str(&format!("  {}\n", v.name));
            }
        }
        let file = &self.vms.get(self.main_vm).file_path;
        out.push_str(&format!("  top-level scope at {file}\n"));
        out
    }
}
