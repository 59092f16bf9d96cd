//! Shared helpers: build a program from opcodes, run it on a machine with a
//! capturing output sink, and hand back everything a test wants to inspect.

use std::cell::RefCell;
use std::rc::Rc;

use moss::{BinForm, BinOp, Bytecode, Machine, MapResolver, OpCode, Register, SharedSink};

pub struct Run {
    pub machine: Machine,
    pub exit: i32,
    pub out: Rc<RefCell<String>>,
    pub err: Rc<RefCell<String>>,
}

impl Run {
    pub fn reg(&self, reg: Register) -> String {
        self.machine.render_register(reg).expect("register holds a value")
    }

    pub fn stdout(&self) -> String {
        self.out.borrow().clone()
    }

    pub fn stderr(&self) -> String {
        self.err.borrow().clone()
    }
}

pub fn run_ops(ops: Vec<OpCode>) -> Run {
    run_with_modules(ops, MapResolver::new())
}

pub fn run_with_modules(ops: Vec<OpCode>, modules: MapResolver) -> Run {
    let mut machine = Machine::new(Bytecode::from_ops(ops), "test.ms");
    machine.set_resolver(Box::new(modules));
    let (sink, out, err) = SharedSink::new();
    machine.set_output(Box::new(sink));
    let exit = machine.run();
    Run {
        machine,
        exit,
        out,
        err,
    }
}

pub fn bin(op: BinOp, form: BinForm, dst: Register, lhs: Register, rhs: Register) -> OpCode {
    OpCode::Bin { op, form, dst, lhs, rhs }
}
