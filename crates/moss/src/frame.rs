//! Call frames and exception-handling records.

use smallvec::SmallVec;

use crate::{
    bytecode::{Address, Register},
    heap::HeapId,
};

/// One argument travelling through a call frame.
#[derive(Debug, Clone)]
pub(crate) struct CallFrameArg {
    pub name: String,
    pub value: HeapId,
    /// Destination register in the callee frame, assigned when the frame is
    /// formed.
    pub dst: Register,
}

impl CallFrameArg {
    pub fn positional(value: HeapId) -> Self {
        Self {
            name: String::new(),
            value,
            dst: 0,
        }
    }

    pub fn named(name: impl Into<String>, value: HeapId) -> Self {
        Self {
            name: name.into(),
            value,
            dst: 0,
        }
    }
}

/// Everything one call carries: the target, the actuals, where the result
/// goes and where execution resumes.
#[derive(Debug, Default)]
pub(crate) struct CallFrame {
    pub function: Option<HeapId>,
    pub args: SmallVec<[CallFrameArg; 4]>,
    pub return_reg: Register,
    pub caller_addr: Address,
    /// The return value is the constructed object, not the `return` value.
    pub constructor_call: bool,
    /// The callee lives in a different VM; the caller blocks until it returns.
    pub extern_module_call: bool,
    /// Synthesised by the interpreter itself (e.g. `__String` during output);
    /// the saved program counter is restored on completion.
    pub runtime_call: bool,
    /// Set once a `PUSH_FRAME` consumed this call frame.
    pub matched_to_frame: bool,
    pub extern_return_value: Option<HeapId>,
    /// Receiver captured when a method was loaded off an instance.
    pub bound_instance: Option<HeapId>,
    /// The instance being built during a constructor call.
    pub constructed_object: Option<HeapId>,
}

impl CallFrame {
    pub fn new(function: Option<HeapId>) -> Self {
        Self {
            function,
            ..Self::default()
        }
    }

    /// Argument lookup by formal name, used by native functions.
    pub fn get_arg(&self, name: &str) -> Option<HeapId> {
        self.args.iter().find(|a| a.name == name).map(|a| a.value)
    }
}

/// A registered `catch` handler and the stack shape to restore when it fires.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionCatch {
    /// Matching exception class; `None` catches everything.
    pub ty: Option<HeapId>,
    /// Name the exception value is bound to in the handler.
    pub name: String,
    pub addr: Address,
    /// Frame stack depth at `CATCH` time.
    pub frame_depth: usize,
    /// Call-frame stack depth at `CATCH` time.
    pub call_frame_depth: usize,
    /// Registered finalizer count in the frame at `CATCH` time.
    pub finally_size: usize,
}

/// A registered finalizer: the block address and the constant-pool slot that
/// carries its pending state (Nil when entered normally).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Finally {
    pub addr: Address,
    pub caller: Register,
}
