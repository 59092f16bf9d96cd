//! The Moss virtual machine.
//!
//! A register-based bytecode interpreter for the Moss language: the tagged
//! value model, frame-based call and closure machinery, structured exception
//! handling with finalizers, cross-module calls that nest VM instances, and
//! a tracing mark-and-sweep collector rooted in every live interpreter.
//!
//! The front end (lexer, parser, code generator) is an external collaborator:
//! it supplies a ready-made [`Bytecode`] program, which a [`Machine`]
//! executes. Modules resolve through a pluggable [`ModuleResolver`]; program
//! output goes through an [`OutputSink`].
//!
//! ```
//! use moss::{Bytecode, Machine, OpCode};
//!
//! let mut code = Bytecode::new();
//! code.push(OpCode::StoreIntConst { dst: 300, val: 2024 });
//! code.push(OpCode::StoreConst { dst: 0, csrc: 300 });
//! code.push(OpCode::StoreName { dst: 0, name: "year".into() });
//! code.push(OpCode::End);
//!
//! let mut machine = Machine::new(code, "example.ms");
//! assert_eq!(machine.run(), 0);
//! assert_eq!(machine.render_name("year").as_deref(), Some("2024"));
//! ```

mod builtins;
mod bytecode;
mod frame;
mod gc;
mod heap;
mod io;
mod machine;
mod memory;
mod mslib;
mod tracer;
mod types;
mod value;
mod vm;

pub use crate::{
    builtins::{RESERVED_CREGS, RESERVED_REGS},
    bytecode::{
        Address, BinForm, BinOp, Bytecode, BytecodeHeader, BytecodeReader, BytecodeWriter, FloatConst, IntConst,
        OpCode, OpTag, RangeForm, Register, BYTECODE_ID,
    },
    io::{BufferSink, OutputSink, SharedSink, StdoutSink},
    machine::{HeapIdOpaque, Machine, MapResolver, ModuleResolver, NoModules},
    tracer::{NoopTracer, RecordingTracer, VmTracer},
};
