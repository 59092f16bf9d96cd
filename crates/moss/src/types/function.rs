//! Function values: argument specs, bodies, and overload matching.

use smallvec::SmallVec;

use crate::{
    bytecode::Address,
    heap::HeapId,
    machine::{Machine, RunResult, VmId},
    memory::PoolId,
};

/// One formal argument of a function.
#[derive(Debug, Clone)]
pub(crate) struct FunArg {
    pub name: String,
    /// Accepted types; empty means untyped.
    pub types: SmallVec<[HeapId; 2]>,
    pub default_value: Option<HeapId>,
    pub vararg: bool,
}

impl FunArg {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: SmallVec::new(),
            default_value: None,
            vararg: false,
        }
    }
}

/// A natively implemented function.
///
/// Native callees receive the machine and the VM whose call frame holds their
/// arguments; they read arguments by name from the top call frame and return
/// the result value directly.
pub(crate) type NativeFn = fn(&mut Machine, VmId) -> RunResult<HeapId>;

/// Body of a function: a bytecode address in the owning VM, or native code.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FunBody {
    /// Address of the first body instruction in the owning VM's bytecode.
    Addr(Address),
    Native(NativeFn),
}

/// Payload of a Function value.
#[derive(Debug, Clone)]
pub(crate) struct FunData {
    pub args: Vec<FunArg>,
    pub body: FunBody,
    /// The VM of the module that defined this function.
    pub vm: VmId,
    /// Outer frames captured at creation time, innermost last.
    pub closures: Vec<PoolId>,
    pub parent_class: Option<HeapId>,
}

impl FunData {
    pub fn new(arg_names: &str, vm: VmId) -> Self {
        let args = arg_names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(FunArg::untyped)
            .collect();
        Self {
            args,
            body: FunBody::Addr(0),
            vm,
            closures: Vec::new(),
            parent_class: None,
        }
    }

    /// Lambdas are compiler-named with a leading digit.
    pub fn is_lambda(name: &str) -> bool {
        name.chars().next().is_some_and(|c| c.is_ascii_digit())
    }
}
