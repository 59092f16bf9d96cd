//! Built-in classes and interned constants.
//!
//! Built-in classes occupy the first registers of every global frame and the
//! interned constants the first slots of every global constant pool, in a
//! fixed order the code generator relies on.

use crate::{
    heap::{Heap, HeapId},
    memory::MemoryPool,
    types::ClassData,
    value::{Value, ValueKind},
};

/// Registers reserved at the bottom of every global frame.
pub const RESERVED_REGS: u32 = 48;
/// Registers reserved at the bottom of every global constant pool.
pub const RESERVED_CREGS: u32 = 300;

/// Interned Int range.
pub(crate) const INTERNED_INT_MIN: i64 = -5;
pub(crate) const INTERNED_INT_MAX: i64 = 256;

/// Heap ids of every built-in class and interned singleton.
///
/// Created once per machine; all slots are pinned so no collection can
/// reclaim them.
#[derive(Debug, Clone)]
pub(crate) struct Builtins {
    pub type_cls: HeapId,
    pub int: HeapId,
    pub float: HeapId,
    pub bool_cls: HeapId,
    pub nil_type: HeapId,
    pub string: HeapId,
    pub bytes: HeapId,
    pub note: HeapId,
    pub list: HeapId,
    pub dict: HeapId,
    pub range: HeapId,
    pub function: HeapId,
    pub function_list: HeapId,
    pub module: HeapId,
    pub space: HeapId,
    pub enum_cls: HeapId,
    pub super_cls: HeapId,
    pub file: HeapId,

    pub exception: HeapId,
    pub name_error: HeapId,
    pub attribute_error: HeapId,
    pub module_not_found_error: HeapId,
    pub type_error: HeapId,
    pub assertion_error: HeapId,
    pub not_implemented_error: HeapId,
    pub parser_error: HeapId,
    pub syntax_error: HeapId,
    pub lookup_error: HeapId,
    pub index_error: HeapId,
    pub key_error: HeapId,
    pub value_error: HeapId,
    pub math_error: HeapId,
    pub division_by_zero_error: HeapId,
    pub os_error: HeapId,
    pub file_not_found_error: HeapId,
    pub eof_error: HeapId,
    pub output_error: HeapId,
    pub system_exit: HeapId,
    pub stop_iteration: HeapId,

    pub nil: HeapId,
    pub true_val: HeapId,
    pub false_val: HeapId,
    /// Ints 0..=256 followed by −1..=−5.
    pub small_ints: Vec<HeapId>,
}

impl Builtins {
    pub fn create(heap: &mut Heap) -> Self {
        // `Type` is self-typed; allocate it first and patch its pointer.
        let type_cls = heap.alloc_raw(Value::new(
            ValueKind::Class(ClassData::default()),
            "Type",
            HeapId::PLACEHOLDER,
        ));
        heap.get_mut(type_cls).ty = type_cls;

        let class = |heap: &mut Heap, name: &str| {
            heap.alloc_raw(Value::new(ValueKind::Class(ClassData::default()), name, type_cls))
        };
        let sub = |heap: &mut Heap, name: &str, parent: HeapId| {
            heap.alloc_raw(Value::new(
                ValueKind::Class(ClassData { supers: vec![parent] }),
                name,
                type_cls,
            ))
        };

        let int = class(heap, "Int");
        let float = class(heap, "Float");
        let bool_cls = class(heap, "Bool");
        let nil_type = class(heap, "NilType");
        let string = class(heap, "String");
        let bytes = class(heap, "Bytes");
        let note = class(heap, "Note");
        let list = class(heap, "List");
        let dict = class(heap, "Dict");
        let range = class(heap, "Range");
        let function = class(heap, "Function");
        let function_list = class(heap, "FunctionList");
        let module = class(heap, "Module");
        let space = class(heap, "Space");
        let enum_cls = class(heap, "Enum");
        let super_cls = class(heap, "super");
        let file = class(heap, "File");

        let exception = class(heap, "Exception");
        let name_error = sub(heap, "NameError", exception);
        let attribute_error = sub(heap, "AttributeError", exception);
        let module_not_found_error = sub(heap, "ModuleNotFoundError", exception);
        let type_error = sub(heap, "TypeError", exception);
        let assertion_error = sub(heap, "AssertionError", exception);
        let not_implemented_error = sub(heap, "NotImplementedError", exception);
        let parser_error = sub(heap, "ParserError", exception);
        let syntax_error = sub(heap, "SyntaxError", exception);
        let lookup_error = sub(heap, "LookupError", exception);
        let index_error = sub(heap, "IndexError", lookup_error);
        let key_error = sub(heap, "KeyError", lookup_error);
        let value_error = sub(heap, "ValueError", exception);
        let math_error = sub(heap, "MathError", exception);
        let division_by_zero_error = sub(heap, "DivisionByZeroError", math_error);
        let os_error = sub(heap, "OSError", exception);
        let file_not_found_error = sub(heap, "FileNotFoundError", os_error);
        let eof_error = sub(heap, "EOFError", exception);
        let output_error = sub(heap, "OutputError", exception);
        let system_exit = sub(heap, "SystemExit", exception);
        let stop_iteration = sub(heap, "StopIteration", exception);

        let nil = heap.alloc_raw(Value::new(ValueKind::Nil, "NilType", nil_type));
        let true_val = heap.alloc_raw(Value::new(ValueKind::Bool(true), "Bool", bool_cls));
        let false_val = heap.alloc_raw(Value::new(ValueKind::Bool(false), "Bool", bool_cls));

        let mut small_ints = Vec::with_capacity((INTERNED_INT_MAX + 1 - INTERNED_INT_MIN) as usize);
        for v in 0..=INTERNED_INT_MAX {
            small_ints.push(heap.alloc_raw(Value::new(ValueKind::Int(v), "Int", int)));
        }
        for v in 1..=(-INTERNED_INT_MIN) {
            small_ints.push(heap.alloc_raw(Value::new(ValueKind::Int(-v), "Int", int)));
        }

        let builtins = Self {
            type_cls,
            int,
            float,
            bool_cls,
            nil_type,
            string,
            bytes,
            note,
            list,
            dict,
            range,
            function,
            function_list,
            module,
            space,
            enum_cls,
            super_cls,
            file,
            exception,
            name_error,
            attribute_error,
            module_not_found_error,
            type_error,
            assertion_error,
            not_implemented_error,
            parser_error,
            syntax_error,
            lookup_error,
            index_error,
            key_error,
            value_error,
            math_error,
            division_by_zero_error,
            os_error,
            file_not_found_error,
            eof_error,
            output_error,
            system_exit,
            stop_iteration,
            nil,
            true_val,
            false_val,
            small_ints,
        };
        for id in builtins.all_ids() {
            heap.pin(id);
        }
        builtins
    }

    /// Interned Int for `v` when it is in the interned range.
    pub fn interned_int(&self, v: i64) -> Option<HeapId> {
        if (0..=INTERNED_INT_MAX).contains(&v) {
            Some(self.small_ints[v as usize])
        } else if (INTERNED_INT_MIN..0).contains(&v) {
            Some(self.small_ints[(INTERNED_INT_MAX - v) as usize])
        } else {
            None
        }
    }

    pub fn bool_val(&self, b: bool) -> HeapId {
        if b {
            self.true_val
        } else {
            self.false_val
        }
    }

    fn named_classes(&self) -> [(&'static str, HeapId); 39] {
        [
            ("Type", self.type_cls),
            ("Int", self.int),
            ("Float", self.float),
            ("Bool", self.bool_cls),
            ("NilType", self.nil_type),
            ("String", self.string),
            ("Bytes", self.bytes),
            ("Note", self.note),
            ("List", self.list),
            ("Dict", self.dict),
            ("Range", self.range),
            ("Function", self.function),
            ("FunctionList", self.function_list),
            ("Module", self.module),
            ("Space", self.space),
            ("Enum", self.enum_cls),
            ("super", self.super_cls),
            ("File", self.file),
            ("Exception", self.exception),
            ("NameError", self.name_error),
            ("AttributeError", self.attribute_error),
            ("ModuleNotFoundError", self.module_not_found_error),
            ("TypeError", self.type_error),
            ("AssertionError", self.assertion_error),
            ("NotImplementedError", self.not_implemented_error),
            ("ParserError", self.parser_error),
            ("SyntaxError", self.syntax_error),
            ("LookupError", self.lookup_error),
            ("IndexError", self.index_error),
            ("KeyError", self.key_error),
            ("ValueError", self.value_error),
            ("MathError", self.math_error),
            ("DivisionByZeroError", self.division_by_zero_error),
            ("OSError", self.os_error),
            ("FileNotFoundError", self.file_not_found_error),
            ("EOFError", self.eof_error),
            ("OutputError", self.output_error),
            ("SystemExit", self.system_exit),
            ("StopIteration", self.stop_iteration),
        ]
    }

    /// Installs built-in classes into the bottom of a global frame, returning
    /// the next free register.
    pub fn install_globals(&self, pool: &mut MemoryPool) -> u32 {
        let mut reg = 0;
        for (name, id) in self.named_classes() {
            pool.store(reg, id);
            pool.store_name(reg, name);
            reg += 1;
        }
        assert!(reg < RESERVED_REGS, "built-ins exceed the reserved register range");
        reg
    }

    /// Installs interned constants into the bottom of a constant pool.
    pub fn install_consts(&self, pool: &mut MemoryPool) {
        let mut reg = 0;
        pool.store(reg, self.nil);
        reg += 1;
        pool.store(reg, self.true_val);
        reg += 1;
        pool.store(reg, self.false_val);
        reg += 1;
        for id in &self.small_ints {
            pool.store(reg, *id);
            reg += 1;
        }
        assert!(reg < RESERVED_CREGS, "interned constants exceed the reserved range");
    }

    fn all_ids(&self) -> Vec<HeapId> {
        let mut ids: Vec<HeapId> = self.named_classes().iter().map(|(_, id)| *id).collect();
        ids.push(self.nil);
        ids.push(self.true_val);
        ids.push(self.false_val);
        ids.extend(self.small_ints.iter().copied());
        ids
    }
}
