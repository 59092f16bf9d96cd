//! The call protocol: call frames, argument matching, overload dispatch,
//! constructor calls, cross-module calls, and runtime-generated calls.

use smallvec::SmallVec;

use crate::{
    bytecode::{IntConst, Register},
    frame::{CallFrame, CallFrameArg},
    heap::HeapId,
    machine::{Machine, RunResult, VmId},
    types::{FunArg, FunBody, FunData},
    value::{Value, ValueKind},
};

impl Machine {
    // -- argument staging ---------------------------------------------------

    pub(crate) fn exec_push_arg(&mut self, vm: VmId, v: HeapId) -> RunResult<()> {
        let cf = self
            .top_call_frame_mut(vm)
            .expect("PUSH_ARG without an open call frame");
        cf.args.push(CallFrameArg::positional(v));
        Ok(())
    }

    pub(crate) fn exec_push_named_arg(&mut self, vm: VmId, name: &str, v: HeapId) -> RunResult<()> {
        let cf = self
            .top_call_frame_mut(vm)
            .expect("PUSH_NAMED_ARG without an open call frame");
        cf.args.push(CallFrameArg::named(name, v));
        Ok(())
    }

    /// Spreads a List value into positional arguments.
    pub(crate) fn exec_push_unpacked(&mut self, vm: VmId, src: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        let elements = match &self.heap.get(v).kind {
            ValueKind::List(vals) => vals.clone(),
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("cannot unpack a {kind} value")));
            }
        };
        let cf = self
            .top_call_frame_mut(vm)
            .expect("PUSH_UNPACKED without an open call frame");
        for e in elements {
            cf.args.push(CallFrameArg::positional(e));
        }
        Ok(())
    }

    // -- function construction ---------------------------------------------

    pub(crate) fn exec_create_fun(&mut self, vm: VmId, fun_reg: Register, name: &str, arg_names: &str) -> RunResult<()> {
        let mut data = FunData::new(arg_names, vm);
        // Capture the current local frames as the closure chain.
        let frames = &self.interp(vm).frames;
        if frames.len() > 1 {
            data.closures = frames[1..].to_vec();
        }
        let fun = self.alloc_fun(name, data);
        if let Some(owner) = self.interp(vm).module_value {
            self.heap.get_mut(fun).owner = Some(owner);
        }
        self.store(vm, fun_reg, fun);
        self.bind_function_name(vm, name, fun);
        Ok(())
    }

    /// Binds a function under its name in the current frame. A second
    /// function with the same name and a distinguishable signature grows a
    /// FunctionList; an equal signature replaces the binding.
    fn bind_function_name(&mut self, vm: VmId, name: &str, fun: HeapId) {
        enum Prev {
            OverloadableFun(HeapId),
            FunList(HeapId),
            Shadowed,
        }
        let frame = self.cur_frame(vm);
        let prev = match self.pools.get(frame).load_name_local(name) {
            Some(prev) => match &self.heap.get(prev).kind {
                ValueKind::Fun(_) if self.heap.get(prev).name == name => Prev::OverloadableFun(prev),
                ValueKind::FunList(_) => Prev::FunList(prev),
                _ => Prev::Shadowed,
            },
            None => Prev::Shadowed,
        };
        let binding = match prev {
            Prev::OverloadableFun(prev) => {
                if self.same_signature(prev, fun) {
                    fun
                } else {
                    self.heap.alloc(Value::new(
                        ValueKind::FunList(vec![prev, fun]),
                        name,
                        self.builtins.function_list,
                    ))
                }
            }
            Prev::FunList(prev) => {
                if let ValueKind::FunList(funs) = &mut self.heap.get_mut(prev).kind {
                    funs.push(fun);
                }
                prev
            }
            Prev::Shadowed => fun,
        };
        let pool = self.pools.get_mut(frame);
        if !pool.overwrite(name, binding) {
            let reg = pool.get_free_reg();
            pool.store(reg, binding);
            pool.store_name(reg, name);
        }
    }

    /// Signature comparison used to decide overload-vs-replacement: arity,
    /// vararg positions, and typed-argument sets must all agree.
    fn same_signature(&self, a: HeapId, b: HeapId) -> bool {
        let (ValueKind::Fun(fa), ValueKind::Fun(fb)) = (&self.heap.get(a).kind, &self.heap.get(b).kind) else {
            return false;
        };
        if fa.args.len() != fb.args.len() {
            return false;
        }
        fa.args.iter().zip(&fb.args).all(|(x, y)| {
            x.vararg == y.vararg
                && x.types.len() == y.types.len()
                && x.types.iter().all(|t| y.types.contains(t))
        })
    }

    /// `FUN_BEGIN` precedes a jump over the body; the body starts right after
    /// that jump.
    pub(crate) fn exec_fun_begin(&mut self, vm: VmId, fun_reg: Register) -> RunResult<()> {
        let body = self.interp(vm).bci + 2;
        let fun = self.load(vm, fun_reg);
        match &mut self.heap.get_mut(fun).kind {
            ValueKind::Fun(data) => {
                data.body = FunBody::Addr(body);
                Ok(())
            }
            _ => Err(self.raise_type_error("FUN_BEGIN target is not a function")),
        }
    }

    pub(crate) fn exec_set_default(&mut self, vm: VmId, fun_reg: Register, index: IntConst, v: HeapId) -> RunResult<()> {
        let fun = self.load(vm, fun_reg);
        match &mut self.heap.get_mut(fun).kind {
            ValueKind::Fun(data) => {
                let slot = usize::try_from(index).expect("argument index is non-negative");
                assert!(slot < data.args.len(), "default index out of bounds");
                data.args[slot].default_value = Some(v);
                Ok(())
            }
            _ => Err(self.raise_type_error("SET_DEFAULT target is not a function")),
        }
    }

    pub(crate) fn exec_set_type(&mut self, vm: VmId, fun_reg: Register, index: IntConst, ty: Register) -> RunResult<()> {
        let t = self.load(vm, ty);
        let fun = self.load(vm, fun_reg);
        match &mut self.heap.get_mut(fun).kind {
            ValueKind::Fun(data) => {
                let slot = usize::try_from(index).expect("argument index is non-negative");
                assert!(slot < data.args.len(), "type index out of bounds");
                data.args[slot].types.push(t);
                Ok(())
            }
            _ => Err(self.raise_type_error("SET_TYPE target is not a function")),
        }
    }

    pub(crate) fn exec_set_vararg(&mut self, vm: VmId, fun_reg: Register, index: IntConst) -> RunResult<()> {
        let fun = self.load(vm, fun_reg);
        match &mut self.heap.get_mut(fun).kind {
            ValueKind::Fun(data) => {
                let slot = usize::try_from(index).expect("argument index is non-negative");
                assert!(slot < data.args.len(), "vararg index out of bounds");
                data.args[slot].vararg = true;
                Ok(())
            }
            _ => Err(self.raise_type_error("SET_VARARG target is not a function")),
        }
    }

    // -- CALL ---------------------------------------------------------------

    pub(crate) fn exec_call(&mut self, vm: VmId, dst: Register, src: Register) -> RunResult<()> {
        let callee = self.load(vm, src);
        let caller_addr = self.interp(vm).bci + 1;

        // Take the staged arguments; the receiver captured by LOAD_ATTR is
        // prepended before overload resolution.
        let (mut raw_args, bound) = {
            let cf = self
                .top_call_frame_mut(vm)
                .expect("CALL without an open call frame");
            (std::mem::take(&mut cf.args), cf.bound_instance.take())
        };
        if let Some(receiver) = bound {
            raw_args.insert(0, CallFrameArg::positional(receiver));
        }

        match &self.heap.get(callee).kind {
            ValueKind::Fun(_) => self.begin_call(vm, callee, raw_args, dst, caller_addr, None),
            ValueKind::FunList(funs) => {
                let funs = funs.clone();
                let fun = self.pick_overload(&funs, &raw_args)?;
                self.begin_call(vm, fun, raw_args, dst, caller_addr, None)
            }
            ValueKind::Class(_) => self.begin_constructor_call(vm, callee, raw_args, dst, caller_addr),
            _ => {
                let kind = self.heap.get(callee).kind.kind_name();
                Err(self.raise_type_error(&format!("a {kind} value is not callable")))
            }
        }
    }

    /// Starts a call to a resolved function: matches arguments into the call
    /// frame and either invokes native code, jumps to the body, or nests into
    /// the owning VM.
    fn begin_call(
        &mut self,
        vm: VmId,
        fun: HeapId,
        raw_args: SmallVec<[CallFrameArg; 4]>,
        dst: Register,
        caller_addr: u32,
        constructed: Option<HeapId>,
    ) -> RunResult<()> {
        let matched = self.match_args(fun, &raw_args)?;
        let (body, fun_vm) = {
            let ValueKind::Fun(data) = &self.heap.get(fun).kind else {
                unreachable!("begin_call takes a function");
            };
            (data.body, data.vm)
        };

        {
            let cf = self.top_call_frame_mut(vm).expect("call frame vanished");
            cf.function = Some(fun);
            cf.args = matched;
            cf.return_reg = dst;
            cf.caller_addr = caller_addr;
            cf.constructor_call = constructed.is_some();
            cf.constructed_object = constructed;
        }

        match body {
            FunBody::Native(native) => {
                let result = native(self, vm);
                let cf = self.pop_call_frame(vm).expect("call frame vanished");
                let result = result?;
                let result = if cf.constructor_call {
                    cf.constructed_object.expect("constructor call carries its object")
                } else {
                    result
                };
                self.store(vm, dst, result);
                Ok(())
            }
            FunBody::Addr(addr) => {
                if fun_vm == vm {
                    self.set_bci(vm, addr);
                    Ok(())
                } else {
                    self.cross_module_call(vm, fun_vm, addr, dst)
                }
            }
        }
    }

    /// Constructor call: builds the instance, then calls the constructor (a
    /// class attribute sharing the class name, possibly inherited) with the
    /// instance prepended.
    fn begin_constructor_call(
        &mut self,
        vm: VmId,
        class: HeapId,
        mut raw_args: SmallVec<[CallFrameArg; 4]>,
        dst: Register,
        caller_addr: u32,
    ) -> RunResult<()> {
        let class_name = self.heap.get(class).name.clone();
        let obj = self.alloc_object(class);
        let ctor = self.find_constructor(class);

        match ctor {
            None => {
                if raw_args.is_empty() {
                    self.pop_call_frame(vm);
                    self.store(vm, dst, obj);
                    Ok(())
                } else {
                    Err(self.raise_type_error(&format!("class '{class_name}' has no constructor taking arguments")))
                }
            }
            Some(ctor) => {
                raw_args.insert(0, CallFrameArg::positional(obj));
                let fun = match &self.heap.get(ctor).kind {
                    ValueKind::FunList(funs) => {
                        let funs = funs.clone();
                        self.pick_overload(&funs, &raw_args)?
                    }
                    _ => ctor,
                };
                self.begin_call(vm, fun, raw_args, dst, caller_addr, Some(obj))
            }
        }
    }

    /// Walks the attribute chain for a constructor: each class is asked for
    /// an attribute carrying its own name, so subclasses inherit parent
    /// constructors.
    fn find_constructor(&self, class: HeapId) -> Option<HeapId> {
        for cls in self.class_linearization(class) {
            let cls_name = self.heap.get(cls).name.clone();
            if let Some(ctor) = self.get_attr(cls, &cls_name) {
                if matches!(self.heap.get(ctor).kind, ValueKind::Fun(_) | ValueKind::FunList(_)) {
                    return Some(ctor);
                }
            }
        }
        None
    }

    /// First overload whose formal arity and typed arguments accept the
    /// actuals, in definition order.
    fn pick_overload(&mut self, funs: &[HeapId], args: &[CallFrameArg]) -> RunResult<HeapId> {
        for fun in funs {
            if self.match_args(*fun, args).is_ok() {
                return Ok(*fun);
            }
        }
        let name = funs
            .first()
            .map(|f| self.heap.get(*f).name.clone())
            .unwrap_or_default();
        Err(self.raise_type_error(&format!("no matching overload of '{name}' for the given arguments")))
    }

    /// Matches actuals to formals: keywords resolve first, positionals fill
    /// left to right, a vararg formal collects the excess into a List, and
    /// missing optionals take their defaults.
    fn match_args(&mut self, fun: HeapId, args: &[CallFrameArg]) -> RunResult<SmallVec<[CallFrameArg; 4]>> {
        let formals: Vec<FunArg> = match &self.heap.get(fun).kind {
            ValueKind::Fun(data) => data.args.clone(),
            _ => return Err(self.raise_type_error("call target is not a function")),
        };
        let fun_name = self.heap.get(fun).name.clone();

        let mut slots: Vec<Option<HeapId>> = vec![None; formals.len()];

        // Keywords first.
        for arg in args.iter().filter(|a| !a.name.is_empty()) {
            match formals.iter().position(|f| f.name == arg.name && !f.vararg) {
                Some(idx) => {
                    if slots[idx].is_some() {
                        return Err(self.raise_type_error(&format!(
                            "duplicate argument '{}' in call to '{fun_name}'",
                            arg.name
                        )));
                    }
                    slots[idx] = Some(arg.value);
                }
                None => {
                    return Err(self.raise_type_error(&format!(
                        "'{fun_name}' has no argument named '{}'",
                        arg.name
                    )));
                }
            }
        }

        // Then positionals.
        let mut positionals = args.iter().filter(|a| a.name.is_empty()).map(|a| a.value);
        let mut out: SmallVec<[CallFrameArg; 4]> = SmallVec::new();
        for (idx, formal) in formals.iter().enumerate() {
            let value = if formal.vararg {
                let rest: Vec<HeapId> = positionals.by_ref().collect();
                self.alloc_list(rest)
            } else if let Some(v) = slots[idx] {
                v
            } else if let Some(v) = positionals.next() {
                v
            } else if let Some(v) = formal.default_value {
                v
            } else {
                return Err(self.raise_type_error(&format!(
                    "missing argument '{}' in call to '{fun_name}'",
                    formal.name
                )));
            };

            if !formal.vararg && !formal.types.is_empty() {
                let actual_ty = self.heap.get(value).ty;
                let accepted = formal
                    .types
                    .iter()
                    .any(|t| self.is_type_eq_or_subtype(actual_ty, *t));
                if !accepted {
                    let got = self.heap.get(actual_ty).name.clone();
                    return Err(self.raise_type_error(&format!(
                        "argument '{}' of '{fun_name}' does not accept a {got}",
                        formal.name
                    )));
                }
            }
            out.push(CallFrameArg::named(formal.name.clone(), value));
        }
        if positionals.next().is_some() {
            return Err(self.raise_type_error(&format!("too many arguments in call to '{fun_name}'")));
        }
        Ok(out)
    }

    // -- frames -------------------------------------------------------------

    /// `PUSH_FRAME`: consumes the pending call frame when one is open,
    /// binding its arguments into the fresh frame; otherwise pushes a plain
    /// scope frame (class and space bodies).
    pub(crate) fn exec_push_frame(&mut self, vm: VmId) -> RunResult<()> {
        let fun = match self.top_call_frame(vm) {
            Some(cf) if !cf.matched_to_frame => cf.function,
            _ => None,
        };
        match fun {
            Some(fun) => {
                let frame_id = self.push_frame(vm, Some(fun));
                let arg_count = self.top_call_frame(vm).expect("call frame vanished").args.len();
                let regs: Vec<Register> = {
                    let pool = self.pools.get_mut(frame_id);
                    (0..arg_count).map(|_| pool.get_free_reg()).collect()
                };
                let bindings: Vec<(Register, String, HeapId)> = {
                    let cf = self.top_call_frame_mut(vm).expect("call frame vanished");
                    cf.matched_to_frame = true;
                    cf.args
                        .iter_mut()
                        .zip(&regs)
                        .map(|(arg, reg)| {
                            arg.dst = *reg;
                            (arg.dst, arg.name.clone(), arg.value)
                        })
                        .collect()
                };
                let pool = self.pools.get_mut(frame_id);
                for (reg, name, value) in bindings {
                    pool.store(reg, value);
                    pool.store_name(reg, &name);
                }
                Ok(())
            }
            None => {
                self.push_frame(vm, None);
                Ok(())
            }
        }
    }

    /// `RETURN`/`RETURN_CONST`: pops the callee frame and call frame, writes
    /// the result, and resumes the caller.
    pub(crate) fn exec_return(&mut self, vm: VmId, v: HeapId) -> RunResult<()> {
        let cf = self
            .pop_call_frame(vm)
            .expect("RETURN without a call frame");
        // A constructor's return value is the constructed object; an explicit
        // user return is tolerated but ignored.
        let result = if cf.constructor_call {
            cf.constructed_object.expect("constructor call carries its object")
        } else {
            v
        };
        if cf.matched_to_frame {
            self.pop_frame(vm);
        }
        if cf.runtime_call || cf.extern_module_call {
            let interp = self.interp_mut(vm);
            interp.pending_return = Some(result);
            interp.stop = true;
        } else {
            self.store(vm, cf.return_reg, result);
            self.set_bci(vm, cf.caller_addr);
        }
        Ok(())
    }

    // -- nested runs --------------------------------------------------------

    /// A call whose target lives in another VM: the call frame moves to the
    /// callee VM, which runs nested until its matching return.
    fn cross_module_call(&mut self, vm: VmId, callee_vm: VmId, body_addr: u32, dst: Register) -> RunResult<()> {
        let mut cf = self
            .pop_call_frame(vm)
            .expect("cross-module call without a call frame");
        cf.extern_module_call = true;

        let from = self.interp(vm).module_name.clone();
        let to = self.interp(callee_vm).module_name.clone();
        self.tracer.on_cross_module(&from, &to);

        let result = self.run_nested(callee_vm, cf, body_addr)?;
        self.store(vm, dst, result);
        Ok(())
    }

    /// Runs `callee_vm` from `body_addr` with `cf` on its call stack until
    /// the matching return, preserving that VM's program counter.
    fn run_nested(&mut self, callee_vm: VmId, cf: CallFrame, body_addr: u32) -> RunResult<HeapId> {
        let (saved_bci, saved_modified) = {
            let interp = self.interp(callee_vm);
            (interp.bci, interp.bci_modified)
        };
        let boundary = self.interp(callee_vm).frames.len();
        let cf_depth = self.interp(callee_vm).call_frames.len();
        self.interp_mut(callee_vm).call_frames.push(cf);
        self.active_vms.push(callee_vm);
        self.set_bci(callee_vm, body_addr);
        // The jump above must take effect immediately, not defer one step.
        self.interp_mut(callee_vm).bci_modified = false;

        let result = self.run_vm(callee_vm, boundary);

        self.active_vms.pop();
        let interp = self.interp_mut(callee_vm);
        interp.bci = saved_bci;
        interp.bci_modified = saved_modified;
        match result {
            Ok(()) => {
                let nil = self.nil();
                Ok(self.interp_mut(callee_vm).pending_return.take().unwrap_or(nil))
            }
            Err(e) => {
                // The callee raised out of the nested run; any call frames it
                // left behind belong to the aborted call.
                self.interp_mut(callee_vm).call_frames.truncate(cf_depth);
                Err(e)
            }
        }
    }

    /// Runtime-generated call (operator overloads, `__String`, converters,
    /// the host API). Synchronous: returns the callee's result.
    pub(crate) fn call_function_with_args(
        &mut self,
        vm: VmId,
        callee: HeapId,
        args: Vec<CallFrameArg>,
    ) -> RunResult<HeapId> {
        let raw: SmallVec<[CallFrameArg; 4]> = args.into();
        let fun = match &self.heap.get(callee).kind {
            ValueKind::Fun(_) => callee,
            ValueKind::FunList(funs) => {
                let funs = funs.clone();
                self.pick_overload(&funs, &raw)?
            }
            _ => {
                let kind = self.heap.get(callee).kind.kind_name();
                return Err(self.raise_type_error(&format!("a {kind} value is not callable")));
            }
        };
        let matched = self.match_args(fun, &raw)?;
        let (body, fun_vm) = {
            let ValueKind::Fun(data) = &self.heap.get(fun).kind else {
                unreachable!()
            };
            (data.body, data.vm)
        };

        match body {
            FunBody::Native(native) => {
                let mut cf = CallFrame::new(Some(fun));
                cf.args = matched;
                cf.runtime_call = true;
                self.interp_mut(vm).call_frames.push(cf);
                let result = native(self, vm);
                self.pop_call_frame(vm);
                result
            }
            FunBody::Addr(addr) => {
                let mut cf = CallFrame::new(Some(fun));
                cf.args = matched;
                cf.runtime_call = true;
                if fun_vm == vm {
                    let (saved_bci, saved_modified) = {
                        let interp = self.interp(vm);
                        (interp.bci, interp.bci_modified)
                    };
                    let boundary = self.interp(vm).frames.len();
                    let cf_depth = self.interp(vm).call_frames.len();
                    self.interp_mut(vm).call_frames.push(cf);
                    self.set_bci(vm, addr);
                    self.interp_mut(vm).bci_modified = false;
                    let result = self.run_vm(vm, boundary);
                    let interp = self.interp_mut(vm);
                    interp.bci = saved_bci;
                    interp.bci_modified = saved_modified;
                    match result {
                        Ok(()) => {
                            let nil = self.nil();
                            Ok(self.interp_mut(vm).pending_return.take().unwrap_or(nil))
                        }
                        Err(e) => {
                            self.interp_mut(vm).call_frames.truncate(cf_depth);
                            Err(e)
                        }
                    }
                } else {
                    let from = self.interp(vm).module_name.clone();
                    let to = self.interp(fun_vm).module_name.clone();
                    self.tracer.on_cross_module(&from, &to);
                    self.run_nested(fun_vm, cf, addr)
                }
            }
        }
    }

    /// `name(args)` rendering for stack traces, `<anonymous>` for lambdas.
    pub(crate) fn fun_signature(&self, fun: HeapId) -> String {
        let v = self.heap.get(fun);
        let ValueKind::Fun(data) = &v.kind else {
            return v.name.clone();
        };
        let mut sig = if FunData::is_lambda(&v.name) {
            String::from("<anonymous>")
        } else {
            v.name.clone()
        };
        sig.push('(');
        for (i, arg) in data.args.iter().enumerate() {
            if i > 0 {
                sig.push_str(", ");
            }
            if arg.vararg {
                sig.push_str("... ");
            }
            sig.push_str(&arg.name);
            if !arg.types.is_empty() {
                sig.push_str(":[");
                for (j, t) in arg.types.iter().enumerate() {
                    if j > 0 {
                        sig.push_str(", ");
                    }
                    sig.push_str(&self.heap.get(*t).name);
                }
                sig.push(']');
            }
            if let Some(d) = arg.default_value {
                sig.push('=');
                sig.push_str(&crate::value::dump_value(&self.heap, d));
            }
        }
        sig.push(')');
        sig
    }
}
