//! The machine context: every process-wide table the VM needs, plus the
//! per-module interpreter states.
//!
//! There are no globals; converter/generator registries, interned singletons,
//! the import list, and the stack-trace accumulator all live here so nested
//! machines (tests, embedders) can co-exist.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    builtins::Builtins,
    bytecode::{Address, Bytecode, Register},
    frame::{CallFrame, CallFrameArg},
    heap::{Heap, HeapId},
    io::{OutputSink, StdoutSink},
    memory::{MemoryPool, PoolId, Pools},
    mslib,
    tracer::{NoopTracer, VmTracer},
    types::{ClassData, DictData, FunData, SuperData},
    value::{render_value, Value, ValueKind},
};

/// Result of one VM step or helper; the error carries the raised value.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Exception propagation as a dedicated result variant; user raises never
/// become panics.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RunError {
    Raise(HeapId),
}

/// Index of an interpreter in the VM arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmId(u32);

impl VmId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-module interpreter state.
pub(crate) struct Interp {
    pub code: Rc<Bytecode>,
    pub module_name: String,
    pub file_path: String,
    /// Frame stack; position 0 is the global frame.
    pub frames: Vec<PoolId>,
    /// Constant-pool stack, parallel to `frames`.
    pub const_pools: Vec<PoolId>,
    pub call_frames: Vec<CallFrame>,
    /// Classes collected by `PUSH_PARENT` for the next `BUILD_CLASS`.
    pub parent_list: Vec<HeapId>,
    /// Elements accumulated by `LIST_PUSH` per destination register.
    pub pending_lists: AHashMap<Register, Vec<HeapId>>,
    pub bci: Address,
    pub bci_modified: bool,
    pub stop: bool,
    pub main: bool,
    /// Return value handed across nested run loops (runtime and
    /// cross-module calls).
    pub pending_return: Option<HeapId>,
    /// The module value owning this VM, absent for the main program.
    pub module_value: Option<HeapId>,
    /// Annotations applied with `ANNOTATE_MOD` before a module value exists.
    pub mod_annotations: Vec<(String, HeapId)>,
    /// GC mark bit.
    pub marked: bool,
}

/// Arena of interpreters; modules keep theirs alive through their value.
#[derive(Default)]
pub(crate) struct Vms {
    slots: Vec<Option<Interp>>,
    free: Vec<u32>,
}

impl Vms {
    pub fn alloc(&mut self, interp: Interp) -> VmId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(interp);
            VmId(idx)
        } else {
            let idx = u32::try_from(self.slots.len()).expect("vm arena index exceeds u32");
            self.slots.push(Some(interp));
            VmId(idx)
        }
    }

    pub fn get(&self, id: VmId) -> &Interp {
        self.slots[id.index()].as_ref().expect("access to a collected VM")
    }

    pub fn get_mut(&mut self, id: VmId) -> &mut Interp {
        self.slots[id.index()].as_mut().expect("access to a collected VM")
    }

    pub fn is_live(&self, id: VmId) -> bool {
        self.slots.get(id.index()).is_some_and(Option::is_some)
    }

    /// Frees unmarked VMs (never the one passed as `keep`).
    pub fn sweep(&mut self, keep: VmId) -> usize {
        let mut freed = 0;
        for idx in 0..self.slots.len() {
            if idx == keep.index() {
                if let Some(vm) = &mut self.slots[idx] {
                    vm.marked = false;
                }
                continue;
            }
            match &mut self.slots[idx] {
                Some(vm) if vm.marked => vm.marked = false,
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

/// Supplies bytecode for `IMPORT`; the front end is an external collaborator.
pub trait ModuleResolver {
    /// Resolves a module name to its compiled program and source path.
    fn resolve(&mut self, name: &str) -> Option<(Bytecode, String)>;
}

/// Resolver with no modules; every import fails.
#[derive(Debug, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&mut self, _name: &str) -> Option<(Bytecode, String)> {
        None
    }
}

/// In-memory resolver used by tests and embedders.
#[derive(Debug, Default)]
pub struct MapResolver {
    modules: AHashMap<String, Bytecode>,
}

impl MapResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, code: Bytecode) {
        self.modules.insert(name.into(), code);
    }
}

impl ModuleResolver for MapResolver {
    fn resolve(&mut self, name: &str) -> Option<(Bytecode, String)> {
        self.modules.get(name).cloned().map(|bc| (bc, format!("{name}.ms")))
    }
}

/// The whole execution context.
pub struct Machine {
    pub(crate) heap: Heap,
    pub(crate) pools: Pools,
    pub(crate) vms: Vms,
    pub(crate) builtins: Builtins,
    pub(crate) main_vm: VmId,
    /// Nesting stack of VMs currently executing; main sits at the bottom.
    pub(crate) active_vms: Vec<VmId>,
    /// `(from, to) → converter function`.
    pub(crate) converters: AHashMap<(String, String), HeapId>,
    /// `format → generator function`.
    pub(crate) generators: AHashMap<String, HeapId>,
    /// Notes buffered for end-of-program generator dispatch.
    pub(crate) generator_notes: Vec<HeapId>,
    /// Modules mid-import, so a collection cannot sweep them.
    pub(crate) currently_imported: Vec<HeapId>,
    /// Functions unwound while an exception propagated, for stack traces.
    /// `None` marks a call that failed before its function resolved.
    pub(crate) unwound_funs: Vec<Option<HeapId>>,
    /// Values an opcode must keep alive across a nested run (a collection can
    /// fire between the nested run's instructions).
    pub(crate) temp_roots: Vec<HeapId>,
    pub(crate) libms: Option<HeapId>,
    pub(crate) resolver: Box<dyn ModuleResolver>,
    pub(crate) out: Box<dyn OutputSink>,
    pub(crate) tracer: Box<dyn VmTracer>,
    pub(crate) exit_called: bool,
    pub(crate) exit_code: i32,
}

impl Machine {
    /// Builds a machine for a main program: installs built-ins, loads the
    /// native `libms` module, and binds `moss`, `__FILE` and `__NAME`.
    #[must_use]
    pub fn new(code: Bytecode, file_path: &str) -> Self {
        let mut heap = Heap::new();
        let builtins = Builtins::create(&mut heap);
        let mut machine = Self {
            heap,
            pools: Pools::new(),
            vms: Vms::default(),
            builtins,
            main_vm: VmId(0),
            active_vms: Vec::new(),
            converters: AHashMap::new(),
            generators: AHashMap::new(),
            generator_notes: Vec::new(),
            currently_imported: Vec::new(),
            unwound_funs: Vec::new(),
            temp_roots: Vec::new(),
            libms: None,
            resolver: Box::new(NoModules),
            out: Box::new(StdoutSink),
            tracer: Box::new(NoopTracer),
            exit_called: false,
            exit_code: 0,
        };

        // libms first, so every later VM can spill it.
        let libms_vm = machine.create_vm(Bytecode::new(), "libms");
        mslib::install(&mut machine, libms_vm);
        let libms_mod = machine.alloc_module("libms", libms_vm);
        machine.vms.get_mut(libms_vm).module_value = Some(libms_mod);
        machine.heap.pin(libms_mod);
        machine.libms = Some(libms_mod);

        let main_vm = machine.create_vm(code, file_path);
        machine.vms.get_mut(main_vm).main = true;
        machine.main_vm = main_vm;
        machine
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn ModuleResolver>) {
        self.resolver = resolver;
    }

    pub fn set_output(&mut self, out: Box<dyn OutputSink>) {
        self.out = out;
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    /// Creates an interpreter with its global frame and constant pool set up.
    pub(crate) fn create_vm(&mut self, code: Bytecode, file_path: &str) -> VmId {
        let module_name = module_name_of(file_path);

        let mut const_pool = MemoryPool::new(true, true);
        self.builtins.install_consts(&mut const_pool);

        let mut global = MemoryPool::new(false, true);
        let mut reg = self.builtins.install_globals(&mut global);

        let interp = Interp {
            code: Rc::new(code),
            module_name: module_name.clone(),
            file_path: file_path.to_string(),
            frames: Vec::new(),
            const_pools: Vec::new(),
            call_frames: Vec::new(),
            parent_list: Vec::new(),
            pending_lists: AHashMap::new(),
            bci: 0,
            bci_modified: false,
            stop: false,
            main: false,
            pending_return: None,
            module_value: None,
            mod_annotations: Vec::new(),
            marked: false,
        };
        let vm = self.vms.alloc(interp);

        // Spill libms and bind it under the name `moss` (not in libms itself).
        if let Some(libms_mod) = self.libms {
            global.push_spilled_value(libms_mod);
            global.store(reg, libms_mod);
            global.store_name(reg, "moss");
            reg += 1;
        }

        let file_val = self.alloc_str(file_path);
        global.store(reg, file_val);
        global.store_name(reg, "__FILE");
        reg += 1;
        let name_val = self.alloc_str(&module_name);
        global.store(reg, name_val);
        global.store_name(reg, "__NAME");
        reg += 1;
        assert!(reg < crate::builtins::RESERVED_REGS, "reserved register range overflow");

        global.vm_owner = Some(vm);
        const_pool.vm_owner = Some(vm);
        let global_id = self.pools.alloc(global);
        let const_id = self.pools.alloc(const_pool);
        let interp = self.vms.get_mut(vm);
        interp.frames.push(global_id);
        interp.const_pools.push(const_id);
        vm
    }

    // ---- interpreter accessors -------------------------------------------

    pub(crate) fn interp(&self, vm: VmId) -> &Interp {
        self.vms.get(vm)
    }

    pub(crate) fn interp_mut(&mut self, vm: VmId) -> &mut Interp {
        self.vms.get_mut(vm)
    }

    pub(crate) fn cur_frame(&self, vm: VmId) -> PoolId {
        *self.interp(vm).frames.last().expect("frame stack is never empty")
    }

    pub(crate) fn cur_const(&self, vm: VmId) -> PoolId {
        *self
            .interp(vm)
            .const_pools
            .last()
            .expect("constant-pool stack is never empty")
    }

    pub(crate) fn global_frame(&self, vm: VmId) -> PoolId {
        self.interp(vm).frames[0]
    }

    pub(crate) fn set_bci(&mut self, vm: VmId, addr: Address) {
        let interp = self.interp_mut(vm);
        interp.bci = addr;
        interp.bci_modified = true;
    }

    // ---- register file ----------------------------------------------------

    pub(crate) fn store(&mut self, vm: VmId, reg: Register, v: HeapId) {
        let frame = self.cur_frame(vm);
        self.pools.get_mut(frame).store(reg, v);
    }

    /// Never fails: an absent slot yields (and is filled with) Nil.
    pub(crate) fn load(&mut self, vm: VmId, reg: Register) -> HeapId {
        let frame = self.cur_frame(vm);
        if let Some(v) = self.pools.get(frame).load(reg) {
            v
        } else {
            let nil = self.builtins.nil;
            self.pools.get_mut(frame).store(reg, nil);
            nil
        }
    }

    pub(crate) fn store_const(&mut self, vm: VmId, reg: Register, v: HeapId) {
        let pool = self.cur_const(vm);
        self.pools.get_mut(pool).store(reg, v);
    }

    pub(crate) fn load_const(&mut self, vm: VmId, reg: Register) -> HeapId {
        let pool = self.cur_const(vm);
        if let Some(v) = self.pools.get(pool).load(reg) {
            v
        } else {
            let nil = self.builtins.nil;
            self.pools.get_mut(pool).store(reg, nil);
            nil
        }
    }

    pub(crate) fn store_name(&mut self, vm: VmId, reg: Register, name: &str) {
        let frame = self.cur_frame(vm);
        self.pools.get_mut(frame).store_name(reg, name);
    }

    pub(crate) fn get_free_reg(&mut self, vm: VmId) -> Register {
        let frame = self.cur_frame(vm);
        self.pools.get_mut(frame).get_free_reg()
    }

    // ---- name resolution --------------------------------------------------

    /// Resolves a name in one pool: bindings first, then the owning
    /// function's closures, then spilled modules and spaces.
    fn resolve_in_pool(&self, pool_id: PoolId, name: &str) -> Option<(HeapId, Option<HeapId>)> {
        let pool = self.pools.get(pool_id);
        if let Some(v) = pool.load_name_local(name) {
            return Some((v, None));
        }
        if let Some(owner_fun) = pool.pool_owner {
            if let ValueKind::Fun(fun) = &self.heap.get(owner_fun).kind {
                for closure in fun.closures.iter().rev() {
                    if self.pools.is_live(*closure) {
                        if let Some(v) = self.pools.get(*closure).load_name_local(name) {
                            return Some((v, None));
                        }
                    }
                }
            }
        }
        for spilled in pool.spilled_values() {
            if let Some(attrs) = self.heap.get(*spilled).attrs {
                if let Some(v) = self.pools.get(attrs).load_name_local(name) {
                    return Some((v, Some(*spilled)));
                }
            }
        }
        None
    }

    /// Walks frames innermost to global. Returns the value and, when it came
    /// through a spilled module or space, that owner.
    pub(crate) fn load_name(&self, vm: VmId, name: &str) -> Option<(HeapId, Option<HeapId>)> {
        for frame in self.interp(vm).frames.iter().rev() {
            if let Some(found) = self.resolve_in_pool(*frame, name) {
                return Some(found);
            }
        }
        None
    }

    pub(crate) fn load_global_name(&self, vm: VmId, name: &str) -> Option<HeapId> {
        self.resolve_in_pool(self.global_frame(vm), name).map(|(v, _)| v)
    }

    /// Looks strictly between the innermost frame and the global frame.
    pub(crate) fn load_non_local_name(&self, vm: VmId, name: &str) -> Option<HeapId> {
        let frames = &self.interp(vm).frames;
        if frames.len() <= 2 {
            return None;
        }
        for frame in frames[1..frames.len() - 1].iter().rev() {
            if let Some((v, _)) = self.resolve_in_pool(*frame, name) {
                return Some(v);
            }
        }
        None
    }

    pub(crate) fn store_non_local(&mut self, vm: VmId, name: &str, v: HeapId) -> bool {
        let frames = self.interp(vm).frames.clone();
        if frames.len() <= 2 {
            return false;
        }
        for frame in frames[1..frames.len() - 1].iter().rev() {
            if self.pools.get_mut(*frame).overwrite(name, v) {
                return true;
            }
        }
        false
    }

    // ---- frame stacks -----------------------------------------------------

    /// Pushes a fresh frame and constant pool. `owner` is the function the
    /// frame belongs to, when it is a call frame.
    pub(crate) fn push_frame(&mut self, vm: VmId, owner: Option<HeapId>) -> PoolId {
        let mut frame = MemoryPool::new(false, false);
        frame.pool_owner = owner;
        frame.vm_owner = Some(vm);
        let mut consts = MemoryPool::new(true, false);
        consts.vm_owner = Some(vm);
        let frame_id = self.pools.alloc(frame);
        let const_id = self.pools.alloc(consts);
        let interp = self.interp_mut(vm);
        interp.frames.push(frame_id);
        interp.const_pools.push(const_id);
        frame_id
    }

    /// Pops the top frame. The pool stays in the arena; the collector frees
    /// it once nothing (closure, attribute store) reaches it.
    pub(crate) fn pop_frame(&mut self, vm: VmId) -> PoolId {
        let interp = self.interp_mut(vm);
        assert!(interp.frames.len() > 1, "attempt to pop the global frame");
        interp.const_pools.pop();
        interp.frames.pop().expect("frame stack is never empty")
    }

    pub(crate) fn push_call_frame(&mut self, vm: VmId, fun: Option<HeapId>) {
        self.interp_mut(vm).call_frames.push(CallFrame::new(fun));
    }

    pub(crate) fn pop_call_frame(&mut self, vm: VmId) -> Option<CallFrame> {
        self.interp_mut(vm).call_frames.pop()
    }

    pub(crate) fn top_call_frame_mut(&mut self, vm: VmId) -> Option<&mut CallFrame> {
        self.interp_mut(vm).call_frames.last_mut()
    }

    pub(crate) fn top_call_frame(&self, vm: VmId) -> Option<&CallFrame> {
        self.interp(vm).call_frames.last()
    }

    // ---- allocation helpers ----------------------------------------------

    pub(crate) fn nil(&self) -> HeapId {
        self.builtins.nil
    }

    pub(crate) fn alloc_int(&mut self, v: i64) -> HeapId {
        if let Some(id) = self.builtins.interned_int(v) {
            return id;
        }
        self.heap.alloc(Value::new(ValueKind::Int(v), "Int", self.builtins.int))
    }

    pub(crate) fn alloc_float(&mut self, v: f64) -> HeapId {
        self.heap.alloc(Value::new(ValueKind::Float(v), "Float", self.builtins.float))
    }

    pub(crate) fn alloc_str(&mut self, s: &str) -> HeapId {
        self.heap
            .alloc(Value::new(ValueKind::Str(s.to_string()), "String", self.builtins.string))
    }

    pub(crate) fn alloc_note(&mut self, format: &str, body: &str) -> HeapId {
        self.heap.alloc(Value::new(
            ValueKind::Note {
                format: format.to_string(),
                body: body.to_string(),
            },
            "Note",
            self.builtins.note,
        ))
    }

    pub(crate) fn alloc_list(&mut self, vals: Vec<HeapId>) -> HeapId {
        self.heap.alloc(Value::new(ValueKind::List(vals), "List", self.builtins.list))
    }

    pub(crate) fn alloc_dict(&mut self, data: DictData) -> HeapId {
        self.heap.alloc(Value::new(ValueKind::Dict(data), "Dict", self.builtins.dict))
    }

    pub(crate) fn alloc_module(&mut self, name: &str, vm: VmId) -> HeapId {
        let global = self.global_frame(vm);
        let id = self
            .heap
            .alloc(Value::new(ValueKind::Module(vm), name, self.builtins.module));
        self.heap.get_mut(id).attrs = Some(global);
        id
    }

    pub(crate) fn alloc_fun(&mut self, name: &str, data: FunData) -> HeapId {
        self.heap.alloc(Value::new(
            ValueKind::Fun(Box::new(data)),
            name,
            self.builtins.function,
        ))
    }

    pub(crate) fn alloc_object(&mut self, class: HeapId) -> HeapId {
        let attrs = self
            .heap
            .get(class)
            .attrs
            .map(|pool| self.pools.get(pool).clone_bindings())
            .unwrap_or_else(|| MemoryPool::new(false, false));
        let attrs_id = self.pools.alloc(attrs);
        let id = self.heap.alloc(Value::new(ValueKind::Object, "<object>", class));
        self.heap.get_mut(id).attrs = Some(attrs_id);
        id
    }

    // ---- attributes -------------------------------------------------------

    /// Breadth-first, left-to-right linearization of a class chain, starting
    /// at the class itself.
    pub(crate) fn class_linearization(&self, class: HeapId) -> Vec<HeapId> {
        ClassData::linearize(class, |cls| match &self.heap.get(cls).kind {
            ValueKind::Class(data) => data.supers.clone(),
            _ => Vec::new(),
        })
    }

    /// True when `ty` is `of` or a subclass of it.
    pub(crate) fn is_type_eq_or_subtype(&self, ty: HeapId, of: HeapId) -> bool {
        ty == of || self.class_linearization(ty).contains(&of)
    }

    fn attr_in_pool(&self, value: HeapId, name: &str) -> Option<HeapId> {
        let attrs = self.heap.get(value).attrs?;
        self.pools.get(attrs).load_name_local(name)
    }

    /// Attribute resolution per the value model: own pool first, then the
    /// class chain for objects, the super chain for classes. `None` is
    /// "not found" and distinct from an explicit Nil binding.
    pub(crate) fn get_attr(&self, value: HeapId, name: &str) -> Option<HeapId> {
        if let Some(v) = self.attr_in_pool(value, name) {
            return Some(v);
        }
        match &self.heap.get(value).kind {
            ValueKind::Object => {
                let class = self.heap.get(value).ty;
                for cls in self.class_linearization(class) {
                    if let Some(v) = self.attr_in_pool(cls, name) {
                        return Some(v);
                    }
                }
                None
            }
            ValueKind::Class(_) => {
                for cls in self.class_linearization(value) {
                    if let Some(v) = self.attr_in_pool(cls, name) {
                        return Some(v);
                    }
                }
                None
            }
            ValueKind::Super(sup) => {
                let sup = *sup;
                for cls in self.class_linearization(sup.parent) {
                    if let Some(v) = self.attr_in_pool(cls, name) {
                        return Some(v);
                    }
                }
                None
            }
            ValueKind::EnumType(members) => members
                .iter()
                .copied()
                .find(|m| self.heap.get(*m).name == name),
            _ => None,
        }
    }

    /// Sets an attribute; fails with `TypeError` for unmodifiable values.
    pub(crate) fn set_attr(&mut self, value: HeapId, name: &str, v: HeapId) -> RunResult<()> {
        if !self.heap.get(value).is_modifiable() {
            let kind = self.heap.get(value).kind.kind_name();
            return Err(self.raise_type_error(&format!("cannot set attribute on a {kind} value")));
        }
        let attrs = match self.heap.get(value).attrs {
            Some(p) => p,
            None => {
                let p = self.pools.alloc(MemoryPool::new(false, false));
                self.heap.get_mut(value).attrs = Some(p);
                p
            }
        };
        let pool = self.pools.get_mut(attrs);
        if !pool.overwrite(name, v) {
            let reg = pool.get_free_reg();
            pool.store(reg, v);
            pool.store_name(reg, name);
        }
        Ok(())
    }

    pub(crate) fn del_attr(&mut self, value: HeapId, name: &str) -> bool {
        match self.heap.get(value).attrs {
            Some(attrs) => {
                let pool = self.pools.get_mut(attrs);
                if pool.name_register(name).is_some() {
                    pool.remove_name(name);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    // ---- value cloning ----------------------------------------------------

    /// `clone` semantics: immutable and interned kinds return themselves;
    /// Object, List, Dict and Super copy deeply enough to be independent.
    pub(crate) fn clone_value(&mut self, id: HeapId) -> HeapId {
        match &self.heap.get(id).kind {
            ValueKind::Object => {
                let class = self.heap.get(id).ty;
                let copy = self.alloc_object(class);
                if let Some(src_attrs) = self.heap.get(id).attrs {
                    let cloned = self.pools.get(src_attrs).clone_bindings();
                    let cloned_id = self.pools.alloc(cloned);
                    self.heap.get_mut(copy).attrs = Some(cloned_id);
                }
                copy
            }
            ValueKind::List(vals) => {
                let vals = vals.clone();
                self.alloc_list(vals)
            }
            ValueKind::Dict(d) => {
                let d = d.clone();
                self.alloc_dict(d)
            }
            ValueKind::Super(s) => {
                let s = *s;
                self.heap.alloc(Value::new(
                    ValueKind::Super(SuperData {
                        instance: s.instance,
                        parent: s.parent,
                    }),
                    "super",
                    self.builtins.super_cls,
                ))
            }
            _ => id,
        }
    }

    // ---- exceptions -------------------------------------------------------

    /// Builds an exception object of `class` with a `msg` attribute.
    pub(crate) fn error_object(&mut self, class: HeapId, msg: &str) -> HeapId {
        let obj = self.alloc_object(class);
        let msg_val = self.alloc_str(msg);
        self.set_attr(obj, "msg", msg_val).expect("objects accept attributes");
        obj
    }

    pub(crate) fn raise_with(&mut self, class: HeapId, msg: &str) -> RunError {
        RunError::Raise(self.error_object(class, msg))
    }

    pub(crate) fn raise_type_error(&mut self, msg: &str) -> RunError {
        let class = self.builtins.type_error;
        self.raise_with(class, msg)
    }

    pub(crate) fn raise_name_error(&mut self, name: &str) -> RunError {
        let class = self.builtins.name_error;
        self.raise_with(class, &format!("name '{name}' is not defined"))
    }

    pub(crate) fn raise_attribute_error(&mut self, value: HeapId, name: &str) -> RunError {
        let owner = match &self.heap.get(value).kind {
            ValueKind::Object => self.heap.get(self.heap.get(value).ty).name.clone(),
            _ => self.heap.get(value).name.clone(),
        };
        let class = self.builtins.attribute_error;
        self.raise_with(class, &format!("'{owner}' has no attribute '{name}'"))
    }

    pub(crate) fn raise_stop_iteration(&mut self) -> RunError {
        let class = self.builtins.stop_iteration;
        self.raise_with(class, "")
    }

    /// True when the raised value would be caught by a handler for `class`.
    pub(crate) fn exception_matches(&self, exc: HeapId, class: HeapId) -> bool {
        self.is_type_eq_or_subtype(self.heap.get(exc).ty, class)
    }

    // ---- string conversion ------------------------------------------------

    /// String form, dispatching to a user `__String` method when present.
    pub(crate) fn to_display_string(&mut self, vm: VmId, v: HeapId) -> RunResult<String> {
        if matches!(self.heap.get(v).kind, ValueKind::Object) {
            if let Some(method) = self.get_attr(v, "__String") {
                if matches!(self.heap.get(method).kind, ValueKind::Fun(_)) {
                    let result = self.call_function_with_args(
                        vm,
                        method,
                        vec![CallFrameArg::positional(v)],
                    )?;
                    return match &self.heap.get(result).kind {
                        ValueKind::Str(s) => Ok(s.clone()),
                        _ => {
                            let class = self.builtins.output_error;
                            Err(self.raise_with(class, "__String did not return a String"))
                        }
                    };
                }
            }
        }
        Ok(render_value(&self.heap, v))
    }

    // ---- host API ---------------------------------------------------------

    /// Synchronously calls a Moss function from host code, returning its
    /// result or the raised value as an error string.
    pub fn call(&mut self, fun_name: &str, args: Vec<HeapIdOpaque>) -> Result<String, String> {
        let vm = self.main_vm;
        let Some((fun, _)) = self.load_name(vm, fun_name) else {
            return Err(format!("name '{fun_name}' is not defined"));
        };
        let args = args.into_iter().map(|a| CallFrameArg::positional(a.0)).collect();
        match self.call_function_with_args(vm, fun, args) {
            Ok(v) => Ok(render_value(&self.heap, v)),
            Err(RunError::Raise(e)) => Err(render_value(&self.heap, e)),
        }
    }

    /// Wraps a host-provided integer for [`Machine::call`].
    pub fn int_value(&mut self, v: i64) -> HeapIdOpaque {
        HeapIdOpaque(self.alloc_int(v))
    }

    /// Wraps a host-provided string for [`Machine::call`].
    pub fn str_value(&mut self, s: &str) -> HeapIdOpaque {
        HeapIdOpaque(self.alloc_str(s))
    }

    /// Reads a register of the main program's current frame as a rendered
    /// string; test and embedding hook.
    #[must_use]
    pub fn render_register(&self, reg: Register) -> Option<String> {
        let frame = self.cur_frame(self.main_vm);
        self.pools
            .get(frame)
            .load(reg)
            .map(|v| render_value(&self.heap, v))
    }

    /// Resolves a name in the main program and renders its value.
    #[must_use]
    pub fn render_name(&self, name: &str) -> Option<String> {
        self.load_name(self.main_vm, name)
            .map(|(v, _)| render_value(&self.heap, v))
    }

    /// Exit code after [`Machine::run`]: non-zero on unhandled exceptions or
    /// an explicit non-zero `exit(n)`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Forces a collection cycle; embedding and test hook.
    pub fn collect(&mut self) {
        self.collect_garbage();
    }

    #[must_use]
    pub fn live_values(&self) -> usize {
        self.heap.live_count()
    }

    #[must_use]
    pub fn live_pools(&self) -> usize {
        self.pools.live_count()
    }

    #[must_use]
    pub fn live_vms(&self) -> usize {
        self.vms.live_count()
    }
}

/// Opaque handle to a heap value, for the host-facing call API.
#[derive(Debug, Clone, Copy)]
pub struct HeapIdOpaque(pub(crate) HeapId);

fn module_name_of(file_path: &str) -> String {
    let base = file_path.rsplit(['/', '\\']).next().unwrap_or(file_path);
    base.strip_suffix(".ms")
        .or_else(|| base.strip_suffix(".msb"))
        .unwrap_or(base)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value_eq;

    fn machine() -> Machine {
        Machine::new(Bytecode::new(), "t.ms")
    }

    #[test]
    fn interned_ints_are_shared() {
        let mut m = machine();
        assert_eq!(m.alloc_int(5), m.alloc_int(5));
        assert_eq!(m.alloc_int(-5), m.alloc_int(-5));
        assert_ne!(m.alloc_int(1000), m.alloc_int(1000));
    }

    #[test]
    fn clone_returns_self_for_immutable_kinds() {
        let mut m = machine();
        let i = m.alloc_int(300);
        assert_eq!(m.clone_value(i), i);
        let s = m.alloc_str("hi");
        assert_eq!(m.clone_value(s), s);
        // clone(clone(v)) is v for immutable kinds.
        let once = m.clone_value(s);
        assert_eq!(m.clone_value(once), once);
    }

    #[test]
    fn clone_copies_collections() {
        let mut m = machine();
        let one = m.alloc_int(1);
        let list = m.alloc_list(vec![one]);
        let copy = m.clone_value(list);
        assert_ne!(list, copy);
        assert!(value_eq(&m.heap, list, copy));
        let two = m.alloc_int(2);
        if let ValueKind::List(vals) = &mut m.heap.get_mut(list).kind {
            vals.push(two);
        }
        assert!(!value_eq(&m.heap, list, copy));
    }

    #[test]
    fn attribute_resolution_is_breadth_first() {
        let mut m = machine();
        let ty = m.builtins.type_cls;
        let grandparent = m.heap.alloc(Value::new(ValueKind::Class(ClassData::default()), "G", ty));
        let left = m.heap.alloc(Value::new(
            ValueKind::Class(ClassData { supers: vec![grandparent] }),
            "L",
            ty,
        ));
        let right = m.heap.alloc(Value::new(ValueKind::Class(ClassData::default()), "R", ty));
        let child = m.heap.alloc(Value::new(
            ValueKind::Class(ClassData { supers: vec![left, right] }),
            "C",
            ty,
        ));

        let from_right = m.alloc_int(2);
        let from_grandparent = m.alloc_int(3);
        m.set_attr(right, "x", from_right).unwrap();
        m.set_attr(grandparent, "x", from_grandparent).unwrap();

        // Direct parents (left to right) win over grandparents.
        let obj = m.alloc_object(child);
        assert_eq!(m.get_attr(obj, "x"), Some(from_right));

        let from_left = m.alloc_int(1);
        m.set_attr(left, "x", from_left).unwrap();
        let obj = m.alloc_object(child);
        assert_eq!(m.get_attr(obj, "x"), Some(from_left));
    }

    #[test]
    fn builtins_occupy_reserved_registers() {
        let m = machine();
        let vm = m.main_vm;
        for name in ["Int", "Exception", "StopIteration", "moss", "__FILE", "__NAME"] {
            let global = m.global_frame(vm);
            let reg = m.pools.get(global).name_register(name).expect("installed");
            assert!(reg < crate::builtins::RESERVED_REGS, "{name} outside reserved range");
        }
    }

    #[test]
    fn every_value_has_a_heap_type() {
        let m = machine();
        for id in m.heap.live_ids().collect::<Vec<_>>() {
            let ty = m.heap.get(id).ty;
            assert!(m.heap.is_live(ty));
        }
        // Type is the only self-typed value.
        let ty_cls = m.builtins.type_cls;
        assert_eq!(m.heap.get(ty_cls).ty, ty_cls);
    }

    #[test]
    fn exception_taxonomy_subtyping() {
        let m = machine();
        assert!(m.is_type_eq_or_subtype(m.builtins.index_error, m.builtins.lookup_error));
        assert!(m.is_type_eq_or_subtype(m.builtins.index_error, m.builtins.exception));
        assert!(m.is_type_eq_or_subtype(m.builtins.division_by_zero_error, m.builtins.math_error));
        assert!(!m.is_type_eq_or_subtype(m.builtins.value_error, m.builtins.lookup_error));
    }
}
