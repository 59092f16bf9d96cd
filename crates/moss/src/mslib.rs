//! The native `libms` bootstrap module.
//!
//! The full standard library lives outside the execution core; this module
//! installs the native bindings the core itself guarantees: process exit,
//! hashing, type access, and debugging dumps. Native callees follow the
//! native contract: they receive the machine and the calling VM, read their
//! arguments by name from the top call frame, and return the result value.

use std::io::Read;

use crate::{
    machine::{Machine, RunResult, VmId},
    types::{ForeignData, FunBody, FunData},
    value::{dump_value, value_hash, Value, ValueKind},
};

/// Binds every native function into the libms global frame and installs the
/// shared `Exception` constructor.
pub(crate) fn install(machine: &mut Machine, libms_vm: VmId) {
    bind(machine, libms_vm, "exit", "code", ms_exit);
    bind(machine, libms_vm, "vardump", "value", ms_vardump);
    bind(machine, libms_vm, "hash", "value", ms_hash);
    bind(machine, libms_vm, "type", "value", ms_type);
    bind(machine, libms_vm, "attrs", "value", ms_attrs);
    bind(machine, libms_vm, "note", "format,value", ms_note);
    bind(machine, libms_vm, "clone", "value", ms_clone);
    bind(machine, libms_vm, "delattr", "value,name", ms_delattr);
    bind(machine, libms_vm, "super_of", "instance,parent", ms_super_of);
    bind(machine, libms_vm, "open", "path", ms_open);
    bind(machine, libms_vm, "read", "file", ms_read);
    bind(machine, libms_vm, "regex", "pattern", ms_regex);
    bind(machine, libms_vm, "regex_match", "pattern,text", ms_regex_match);
    bind(machine, libms_vm, "cvoid", "", ms_cvoid);
    bind(machine, libms_vm, "clong", "value", ms_clong);
    bind(machine, libms_vm, "cdouble", "value", ms_cdouble);
    bind(machine, libms_vm, "cchar_ptr", "value", ms_cchar_ptr);

    // `Exception(msg)` and every subclass construct through this; the whole
    // taxonomy inherits it through the constructor chain walk.
    let mut data = FunData::new("this,msg", libms_vm);
    data.body = FunBody::Native(exception_ctor);
    let empty = machine.alloc_str("");
    data.args[1].default_value = Some(empty);
    let ctor = machine.alloc_fun("Exception", data);
    machine.heap.pin(ctor);
    let exception = machine.builtins.exception;
    machine
        .set_attr(exception, "Exception", ctor)
        .expect("classes accept attributes");
}

fn bind(
    machine: &mut Machine,
    libms_vm: VmId,
    name: &str,
    arg_names: &str,
    native: fn(&mut Machine, VmId) -> RunResult<crate::heap::HeapId>,
) {
    let mut data = FunData::new(arg_names, libms_vm);
    data.body = FunBody::Native(native);
    let fun = machine.alloc_fun(name, data);
    machine.heap.pin(fun);
    let global = machine.global_frame(libms_vm);
    let pool = machine.pools.get_mut(global);
    let reg = pool.get_free_reg();
    pool.store(reg, fun);
    pool.store_name(reg, name);
}

fn arg(machine: &mut Machine, vm: VmId, name: &str) -> crate::heap::HeapId {
    machine
        .top_call_frame(vm)
        .and_then(|cf| cf.get_arg(name))
        .unwrap_or_else(|| machine.nil())
}

/// `exit(code)`: stops every active interpreter at the next instruction
/// boundary and records the process exit code.
fn ms_exit(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let code_val = arg(machine, vm, "code");
    let code = match machine.heap.get(code_val).kind {
        ValueKind::Int(i) => i as i32,
        _ => 0,
    };
    machine.exit_called = true;
    machine.exit_code = code;
    for active in machine.active_vms.clone() {
        machine.interp_mut(active).stop = true;
    }
    Ok(machine.nil())
}

/// `vardump(value)`: delimited debug rendering.
fn ms_vardump(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    let text = dump_value(&machine.heap, v);
    Ok(machine.alloc_str(&text))
}

fn ms_hash(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    match value_hash(&machine.heap, v) {
        Some(h) => Ok(machine.alloc_int(h)),
        None => {
            let kind = machine.heap.get(v).kind.kind_name();
            Err(machine.raise_type_error(&format!("{kind} is not hashable")))
        }
    }
}

fn ms_type(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    Ok(machine.heap.get(v).ty)
}

/// `attrs(value)`: the value's attribute names as a List of Strings.
fn ms_attrs(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    let names: Vec<String> = match machine.heap.get(v).attrs {
        Some(pool) => machine
            .pools
            .get(pool)
            .names()
            .map(|(n, _)| n.to_string())
            .collect(),
        None => Vec::new(),
    };
    let mut items = Vec::with_capacity(names.len());
    for n in names {
        items.push(machine.alloc_str(&n));
    }
    Ok(machine.alloc_list(items))
}

/// Constructor shared by `Exception` and its subclasses: binds `msg`.
fn exception_ctor(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let this = arg(machine, vm, "this");
    let msg = arg(machine, vm, "msg");
    machine.set_attr(this, "msg", msg)?;
    Ok(machine.nil())
}

/// `note(format, value)`: a format-tagged string for the converter pipeline.
fn ms_note(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let format = arg(machine, vm, "format");
    let value = arg(machine, vm, "value");
    let (ValueKind::Str(f), ValueKind::Str(v)) = (&machine.heap.get(format).kind, &machine.heap.get(value).kind)
    else {
        return Err(machine.raise_type_error("note expects a format string and a body string"));
    };
    let (f, v) = (f.clone(), v.clone());
    Ok(machine.alloc_note(&f, &v))
}

/// `clone(value)`: immutable kinds return themselves; objects, lists, dicts
/// and supers copy.
fn ms_clone(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    Ok(machine.clone_value(v))
}

/// `delattr(value, name)`: removes a user-set attribute; AttributeError when
/// the attribute is absent.
fn ms_delattr(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let target = arg(machine, vm, "value");
    let name_val = arg(machine, vm, "name");
    let ValueKind::Str(name) = &machine.heap.get(name_val).kind else {
        return Err(machine.raise_type_error("delattr expects an attribute name string"));
    };
    let name = name.clone();
    if machine.del_attr(target, &name) {
        Ok(machine.nil())
    } else {
        Err(machine.raise_attribute_error(target, &name))
    }
}

fn foreign(machine: &mut Machine, data: ForeignData) -> crate::heap::HeapId {
    let file_cls = machine.builtins.file;
    let name = data.kind_name();
    machine.heap.alloc(Value::new(ValueKind::Foreign(data), name, file_cls))
}

/// `open(path)`: a readable file stream wrapped in an opaque value whose
/// lifetime is tied to collection of the wrapper.
fn ms_open(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let path_val = arg(machine, vm, "path");
    let ValueKind::Str(path) = &machine.heap.get(path_val).kind else {
        return Err(machine.raise_type_error("open expects a path string"));
    };
    let path = path.clone();
    match std::fs::File::open(&path) {
        Ok(file) => Ok(foreign(machine, ForeignData::FStream(Some(file)))),
        Err(_) => {
            let class = machine.builtins.file_not_found_error;
            Err(machine.raise_with(class, &format!("cannot open '{path}'")))
        }
    }
}

/// `read(file)`: the remaining stream content as a String.
fn ms_read(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    enum Outcome {
        Text(String),
        Closed,
        Failed,
        NotStream,
    }
    let file_val = arg(machine, vm, "file");
    let outcome = match &mut machine.heap.get_mut(file_val).kind {
        ValueKind::Foreign(ForeignData::FStream(Some(file))) => {
            let mut text = String::new();
            match file.read_to_string(&mut text) {
                Ok(_) => Outcome::Text(text),
                Err(_) => Outcome::Failed,
            }
        }
        ValueKind::Foreign(ForeignData::FStream(None)) => Outcome::Closed,
        _ => Outcome::NotStream,
    };
    match outcome {
        Outcome::Text(text) => Ok(machine.alloc_str(&text)),
        Outcome::Closed => {
            let class = machine.builtins.eof_error;
            Err(machine.raise_with(class, "stream is closed"))
        }
        Outcome::Failed => {
            let class = machine.builtins.os_error;
            Err(machine.raise_with(class, "stream read failed"))
        }
        Outcome::NotStream => Err(machine.raise_type_error("read expects a file stream")),
    }
}

/// `regex(pattern)`: a compiled pattern as an opaque value.
fn ms_regex(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let pattern_val = arg(machine, vm, "pattern");
    let ValueKind::Str(pattern) = &machine.heap.get(pattern_val).kind else {
        return Err(machine.raise_type_error("regex expects a pattern string"));
    };
    match regex::Regex::new(pattern) {
        Ok(re) => Ok(foreign(machine, ForeignData::Regex(re))),
        Err(err) => {
            let class = machine.builtins.value_error;
            let msg = format!("invalid pattern: {err}");
            Err(machine.raise_with(class, &msg))
        }
    }
}

/// `regex_match(pattern, text)`: whether a compiled pattern matches.
fn ms_regex_match(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let pattern_val = arg(machine, vm, "pattern");
    let text_val = arg(machine, vm, "text");
    let (ValueKind::Foreign(ForeignData::Regex(re)), ValueKind::Str(text)) =
        (&machine.heap.get(pattern_val).kind, &machine.heap.get(text_val).kind)
    else {
        return Err(machine.raise_type_error("regex_match expects a compiled pattern and a string"));
    };
    let matched = re.is_match(text);
    Ok(machine.builtins.bool_val(matched))
}

fn ms_cvoid(machine: &mut Machine, _vm: VmId) -> RunResult<crate::heap::HeapId> {
    Ok(foreign(machine, ForeignData::CVoid))
}

fn ms_clong(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    let ValueKind::Int(i) = machine.heap.get(v).kind else {
        return Err(machine.raise_type_error("clong expects an Int"));
    };
    Ok(foreign(machine, ForeignData::CLong(i)))
}

fn ms_cdouble(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    let Some(f) = machine.heap.get(v).as_float() else {
        return Err(machine.raise_type_error("cdouble expects a numeric value"));
    };
    Ok(foreign(machine, ForeignData::CDouble(f)))
}

fn ms_cchar_ptr(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let v = arg(machine, vm, "value");
    let ValueKind::Str(s) = &machine.heap.get(v).kind else {
        return Err(machine.raise_type_error("cchar_ptr expects a String"));
    };
    let s = s.clone();
    Ok(foreign(machine, ForeignData::CCharPtr(s)))
}

/// `super_of(instance, parent)`: a proxy resolving attributes through a
/// parent class.
fn ms_super_of(machine: &mut Machine, vm: VmId) -> RunResult<crate::heap::HeapId> {
    let instance = arg(machine, vm, "instance");
    let parent = arg(machine, vm, "parent");
    if !matches!(machine.heap.get(instance).kind, ValueKind::Object) {
        return Err(machine.raise_type_error("super_of expects an object instance"));
    }
    if !matches!(machine.heap.get(parent).kind, ValueKind::Class(_)) {
        return Err(machine.raise_type_error("super_of expects a parent class"));
    }
    let class = machine.heap.get(instance).ty;
    if !machine.is_type_eq_or_subtype(class, parent) {
        let parent_name = machine.heap.get(parent).name.clone();
        return Err(machine.raise_type_error(&format!("'{parent_name}' is not a parent of the instance")));
    }
    Ok(machine.alloc_super(instance, parent))
}
