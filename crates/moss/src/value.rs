//! Runtime values.
//!
//! Every value lives on the [`crate::heap::Heap`] and carries a pointer to
//! its type (another heap value, always a Class, EnumType or built-in class;
//! the built-in class `Type` is self-typed), an optional attribute pool, and
//! annotations. Registers and collection payloads hold [`HeapId`]s; sharing
//! is the norm and `clone_value` decides when a copy is deep.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::{
    heap::{Heap, HeapId},
    machine::VmId,
    memory::PoolId,
    types::{ClassData, DictData, ForeignData, FunData, RangeData, SuperData},
};

/// Tagged payload of a value.
#[derive(Debug)]
pub(crate) enum ValueKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Str(String),
    Bytes(Vec<u8>),
    Note { format: String, body: String },
    List(Vec<HeapId>),
    Dict(DictData),
    Range(RangeData),
    Fun(Box<FunData>),
    FunList(Vec<HeapId>),
    Class(ClassData),
    /// Attributes carry the whole state; the class is the type pointer.
    Object,
    Module(VmId),
    Space {
        vm: VmId,
        extra_owners: Vec<HeapId>,
        anonymous: bool,
    },
    EnumType(Vec<HeapId>),
    /// The enum type is the type pointer; the payload is the value name.
    EnumValue,
    Super(SuperData),

    StrIter { src: HeapId, cursor: usize },
    BytesIter { src: HeapId, cursor: usize },
    ListIter { src: HeapId, cursor: usize },
    DictIter { src: HeapId, cursor: usize },
    FunListIter { src: HeapId, cursor: usize },

    Foreign(ForeignData),
}

impl ValueKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Bool(_) => "Bool",
            Self::Nil => "NilType",
            Self::Str(_) => "String",
            Self::Bytes(_) => "Bytes",
            Self::Note { .. } => "Note",
            Self::List(_) => "List",
            Self::Dict(_) => "Dict",
            Self::Range(_) => "Range",
            Self::Fun(_) => "Function",
            Self::FunList(_) => "FunctionList",
            Self::Class(_) => "Class",
            Self::Object => "Object",
            Self::Module(_) => "Module",
            Self::Space { .. } => "Space",
            Self::EnumType(_) => "Enum",
            Self::EnumValue => "EnumValue",
            Self::Super(_) => "Super",
            Self::StrIter { .. } => "StringIterator",
            Self::BytesIter { .. } => "BytesIterator",
            Self::ListIter { .. } => "ListIterator",
            Self::DictIter { .. } => "DictIterator",
            Self::FunListIter { .. } => "FunctionListIterator",
            Self::Foreign(f) => f.kind_name(),
        }
    }
}

/// A heap value: payload plus the metadata every value carries.
#[derive(Debug)]
pub(crate) struct Value {
    pub kind: ValueKind,
    /// Type pointer. `Type` itself points at its own slot.
    pub ty: HeapId,
    pub name: String,
    /// Attribute pool, exclusively owned by this value.
    pub attrs: Option<PoolId>,
    pub annotations: Vec<(String, HeapId)>,
    /// Owner module, so the GC knows the value relies on that module's VM.
    pub owner: Option<HeapId>,
}

impl Value {
    pub fn new(kind: ValueKind, name: impl Into<String>, ty: HeapId) -> Self {
        Self {
            kind,
            ty,
            name: name.into(),
            attrs: None,
            annotations: Vec::new(),
            owner: None,
        }
    }

    /// Whether user code may assign attributes into this value.
    pub fn is_modifiable(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Class(_)
                | ValueKind::Object
                | ValueKind::Module(_)
                | ValueKind::Space { .. }
                | ValueKind::Range(_)
                | ValueKind::Fun(_)
        )
    }

    pub fn is_hashable(&self) -> bool {
        !matches!(
            self.kind,
            ValueKind::List(_)
                | ValueKind::Dict(_)
                | ValueKind::StrIter { .. }
                | ValueKind::BytesIter { .. }
                | ValueKind::ListIter { .. }
                | ValueKind::DictIter { .. }
                | ValueKind::FunListIter { .. }
        )
    }

    pub fn is_iterable(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Str(_)
                | ValueKind::Bytes(_)
                | ValueKind::Note { .. }
                | ValueKind::List(_)
                | ValueKind::Dict(_)
                | ValueKind::Range(_)
                | ValueKind::FunList(_)
                | ValueKind::Object
                | ValueKind::StrIter { .. }
                | ValueKind::BytesIter { .. }
                | ValueKind::ListIter { .. }
                | ValueKind::DictIter { .. }
                | ValueKind::FunListIter { .. }
        )
    }

    pub fn annotation(&self, name: &str) -> Option<HeapId> {
        self.annotations.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn annotate(&mut self, name: impl Into<String>, val: HeapId) {
        let name = name.into();
        if let Some(slot) = self.annotations.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = val;
        } else {
            self.annotations.push((name, val));
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Int(i) => Some(i as f64),
            ValueKind::Float(f) => Some(f),
            _ => None,
        }
    }
}

/// Rough per-value byte estimate used for the GC threshold accounting.
pub(crate) fn estimate_bytes(kind: &ValueKind) -> usize {
    let base = std::mem::size_of::<Value>();
    base + match kind {
        ValueKind::Str(s) => s.len(),
        ValueKind::Bytes(b) => b.len(),
        ValueKind::Note { format, body } => format.len() + body.len(),
        ValueKind::List(v) => v.len() * std::mem::size_of::<HeapId>(),
        ValueKind::Dict(d) => d.len() * 2 * std::mem::size_of::<HeapId>(),
        ValueKind::Fun(f) => f.args.len() * 32,
        ValueKind::FunList(v) | ValueKind::EnumType(v) => v.len() * std::mem::size_of::<HeapId>(),
        _ => 0,
    }
}

fn hash_str(tag: &str, s: &str) -> i64 {
    let mut h = DefaultHasher::new();
    tag.hash(&mut h);
    s.hash(&mut h);
    h.finish() as i64
}

/// Stable 64-bit hash of a hashable value, `None` for unhashable kinds.
///
/// Must agree with [`value_eq`]: notably Int/Float/Bool promote to a common
/// numeric hash so `2 == 2.0` implies equal hashes.
pub(crate) fn value_hash(heap: &Heap, id: HeapId) -> Option<i64> {
    let v = heap.get(id);
    Some(match &v.kind {
        ValueKind::Int(i) => *i,
        ValueKind::Float(f) => {
            // Integral floats hash like the Int they equal.
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                *f as i64
            } else {
                f.to_bits() as i64
            }
        }
        ValueKind::Bool(b) => i64::from(*b),
        ValueKind::Nil => -1,
        ValueKind::Str(s) => hash_str("0str_", s),
        ValueKind::Bytes(b) => {
            let mut h = DefaultHasher::new();
            b.hash(&mut h);
            h.finish() as i64
        }
        ValueKind::Note { format, body } => hash_str(format, body),
        ValueKind::Range(_) => hash_str("0r_", &v.name),
        ValueKind::Fun(_) => hash_str("0f_", &v.name),
        ValueKind::FunList(_) => hash_str("0fl_", &v.name),
        ValueKind::Class(_) => hash_str("0c_", &v.name),
        ValueKind::Module(_) => hash_str("0m_", &v.name),
        ValueKind::Space { .. } => hash_str("0s_", &v.name),
        ValueKind::EnumType(_) => hash_str("0e_", &v.name),
        ValueKind::EnumValue => {
            let ty_name = &heap.get(v.ty).name;
            hash_str("0ev_", &format!("{ty_name}::{}", v.name))
        }
        ValueKind::Super(_) => hash_str("0sp_", &v.name),
        // Object equality defaults to identity, so identity hashing agrees.
        ValueKind::Object | ValueKind::Foreign(_) => id.index() as i64,
        ValueKind::List(_)
        | ValueKind::Dict(_)
        | ValueKind::StrIter { .. }
        | ValueKind::BytesIter { .. }
        | ValueKind::ListIter { .. }
        | ValueKind::DictIter { .. }
        | ValueKind::FunListIter { .. } => return None,
    })
}

/// Structural equality without operator-overload dispatch.
///
/// Numeric kinds compare after promotion; disparate kinds compare unequal.
/// Objects and foreign values compare by identity here; `__eq` dispatch for
/// objects happens at the opcode layer.
pub(crate) fn value_eq(heap: &Heap, a: HeapId, b: HeapId) -> bool {
    if a == b {
        return true;
    }
    let va = heap.get(a);
    let vb = heap.get(b);
    match (&va.kind, &vb.kind) {
        (ValueKind::Int(x), ValueKind::Int(y)) => x == y,
        (ValueKind::Float(x), ValueKind::Float(y)) => x == y,
        (ValueKind::Int(x), ValueKind::Float(y)) => (*x as f64) == *y,
        (ValueKind::Float(x), ValueKind::Int(y)) => *x == (*y as f64),
        (ValueKind::Bool(x), ValueKind::Bool(y)) => x == y,
        (ValueKind::Nil, ValueKind::Nil) => true,
        (ValueKind::Str(x), ValueKind::Str(y)) => x == y,
        (ValueKind::Bytes(x), ValueKind::Bytes(y)) => x == y,
        (
            ValueKind::Note { format: fa, body: ba },
            ValueKind::Note { format: fb, body: bb },
        ) => fa == fb && ba == bb,
        (ValueKind::List(xs), ValueKind::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| value_eq(heap, *x, *y))
        }
        (ValueKind::Dict(da), ValueKind::Dict(db)) => {
            if da.len() != db.len() {
                return false;
            }
            da.entries().iter().all(|(ka, va_)| {
                db.entries()
                    .iter()
                    .any(|(kb, vb_)| value_eq(heap, *ka, *kb) && value_eq(heap, *va_, *vb_))
            })
        }
        (ValueKind::EnumValue, ValueKind::EnumValue) => va.ty == vb.ty && va.name == vb.name,
        _ => false,
    }
}

/// String form of a value without `__String` dispatch (which needs the VM).
pub(crate) fn render_value(heap: &Heap, id: HeapId) -> String {
    let v = heap.get(id);
    match &v.kind {
        ValueKind::Int(i) => i.to_string(),
        ValueKind::Float(f) => {
            if f.is_finite() {
                let mut buf = ryu::Buffer::new();
                buf.format(*f).to_string()
            } else {
                f.to_string()
            }
        }
        ValueKind::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        ValueKind::Nil => "nil".to_string(),
        ValueKind::Str(s) => s.clone(),
        ValueKind::Bytes(b) => b.iter().map(|x| format!("\\x{x:02x}")).collect(),
        ValueKind::Note { body, .. } => body.clone(),
        ValueKind::List(vals) => {
            let mut out = String::from("[");
            for (i, e) in vals.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&dump_value(heap, *e));
            }
            out.push(']');
            out
        }
        ValueKind::Dict(d) => {
            let entries = d.entries();
            if entries.is_empty() {
                return "{:}".to_string();
            }
            let mut out = String::from("{");
            for (i, (k, val)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&dump_value(heap, *k));
                out.push_str(": ");
                out.push_str(&dump_value(heap, *val));
            }
            out.push('}');
            out
        }
        ValueKind::Range(r) => format!(
            "{}..{}..{}",
            render_value(heap, r.start),
            render_value(heap, r.step),
            render_value(heap, r.end)
        ),
        ValueKind::Fun(f) => {
            if FunData::is_lambda(&v.name) {
                format!("<anonymous function at {}>", id.index())
            } else {
                format!("<function {} at {}>", v.name, id.index())
            }
        }
        ValueKind::FunList(funs) => {
            format!("<function {} with {} overloads>", v.name, funs.len())
        }
        ValueKind::Class(_) => format!("<class {}>", v.name),
        ValueKind::Object => format!("<object of class {}>", heap.get(v.ty).name),
        ValueKind::Module(_) => format!("<module {}>", v.name),
        ValueKind::Space { .. } => format!("<space {}>", v.name),
        ValueKind::EnumType(_) => format!("<Enum {}>", v.name),
        ValueKind::EnumValue => format!("{}::{}", heap.get(v.ty).name, v.name),
        ValueKind::Super(s) => format!(
            "<super of {} in class {}>",
            heap.get(heap.get(s.instance).ty).name,
            heap.get(s.parent).name
        ),
        ValueKind::StrIter { src, .. } => format!("<StringIterator of String {}>", src.index()),
        ValueKind::BytesIter { src, .. } => format!("<BytesIterator of Bytes {}>", src.index()),
        ValueKind::ListIter { src, .. } => format!("<ListIterator of List {}>", src.index()),
        ValueKind::DictIter { src, .. } => format!("<DictIterator of Dict {}>", src.index()),
        ValueKind::FunListIter { src, .. } => format!("<FunctionListIterator of FunctionList {}>", src.index()),
        ValueKind::Foreign(f) => format!("<foreign {}>", f.kind_name()),
    }
}

fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// String form with delimiters for literal kinds, used inside containers.
pub(crate) fn dump_value(heap: &Heap, id: HeapId) -> String {
    let v = heap.get(id);
    match &v.kind {
        ValueKind::Str(s) => format!("\"{}\"", sanitize(s)),
        ValueKind::Bytes(_) => format!("b\"{}\"", render_value(heap, id)),
        ValueKind::Note { format, body } => format!("{}\"{}\"", sanitize(format), sanitize(body)),
        _ => render_value(heap, id),
    }
}
