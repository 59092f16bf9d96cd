//! Notes, converters, generators, and output.

mod common;

use common::{bin, run_ops};
use moss::{BinForm, BinOp, OpCode};
use pretty_assertions::assert_eq;

/// Annotation block binding `[from, to]` to a function's `converter`
/// annotation, which registers it in the converter graph.
fn annotate_converter(fun_reg: u32, list_reg: u32, from: &str, to: &str) -> Vec<OpCode> {
    vec![
        OpCode::StoreStringConst { dst: 310, val: from.into() },
        OpCode::StoreStringConst { dst: 311, val: to.into() },
        OpCode::ListPushConst { dst: list_reg, csrc: 310 },
        OpCode::ListPushConst { dst: list_reg, csrc: 311 },
        OpCode::BuildList { dst: list_reg },
        OpCode::Annotate { dst: fun_reg, name: "converter".into(), val: list_reg },
    ]
}

#[test]
fn call_formatter_finds_the_shortest_chain() {
    // Two converters md -> html -> txt; the formatter composes them.
    let mut ops = Vec::new();

    // conv1: md -> html, appends "1". Body spans fixed offsets, so lay the
    // program out by hand rather than with the helper above.
    let c1_start = 0;
    ops.extend(vec![
        /* 0 */ OpCode::CreateFun { fun: 10, name: "c1".into(), arg_names: "n".into() },
        /* 1 */ OpCode::FunBegin { fun: 10 }, // body at 3
        /* 2 */ OpCode::Jmp { addr: 15 },
        /* 3 */ OpCode::PushFrame,
        /* 4 */ OpCode::Load { dst: 1, name: "n".into() },
        /* 5 */ OpCode::StoreStringConst { dst: 300, val: "1".into() },
        /* 6 */ bin(BinOp::Concat, BinForm::RegConst, 2, 1, 300),
        /* 7 */ OpCode::StoreStringConst { dst: 301, val: "html".into() },
        /* 8 */ OpCode::StoreConst { dst: 3, csrc: 301 },
        /* 9 */ OpCode::PushCallFrame,
        /* 10 */ OpCode::PushArg { src: 3 },
        /* 11 */ OpCode::PushArg { src: 2 },
        /* 12 */ OpCode::Load { dst: 4, name: "note".into() },
        /* 13 */ OpCode::Call { dst: 5, src: 4 },
        /* 14 */ OpCode::Return { src: 5 },
    ]);
    assert_eq!(ops.len(), c1_start + 15);
    ops.extend(annotate_converter(10, 20, "md", "html")); // 15..=20

    // conv2: html -> txt, appends "2".
    let c2_start = ops.len() as u32; // 21
    ops.extend(vec![
        OpCode::CreateFun { fun: 11, name: "c2".into(), arg_names: "n".into() },
        OpCode::FunBegin { fun: 11 }, // body at c2_start+3
        OpCode::Jmp { addr: c2_start + 15 },
        OpCode::PushFrame,
        OpCode::Load { dst: 1, name: "n".into() },
        OpCode::StoreStringConst { dst: 300, val: "2".into() },
        bin(BinOp::Concat, BinForm::RegConst, 2, 1, 300),
        OpCode::StoreStringConst { dst: 301, val: "txt".into() },
        OpCode::StoreConst { dst: 3, csrc: 301 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 3 },
        OpCode::PushArg { src: 2 },
        OpCode::Load { dst: 4, name: "note".into() },
        OpCode::Call { dst: 5, src: 4 },
        OpCode::Return { src: 5 },
    ]);
    ops.extend(annotate_converter(11, 21, "html", "txt"));

    // note("md", "x"), then format to txt.
    ops.extend(vec![
        OpCode::StoreStringConst { dst: 320, val: "md".into() },
        OpCode::StoreConst { dst: 30, csrc: 320 },
        OpCode::StoreStringConst { dst: 321, val: "x".into() },
        OpCode::StoreConst { dst: 31, csrc: 321 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 30 },
        OpCode::PushArg { src: 31 },
        OpCode::Load { dst: 32, name: "note".into() },
        OpCode::Call { dst: 33, src: 32 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 33 },
        OpCode::CallFormatter { dst: 34, name: "txt".into() },
    ]);

    let run = run_ops(ops);
    assert_eq!(run.exit, 0, "{}", run.stderr());
    assert_eq!(run.reg(34), "x12");
}

#[test]
fn formatter_without_chain_raises_output_error() {
    let run = run_ops(vec![
        OpCode::StoreStringConst { dst: 300, val: "md".into() },
        OpCode::StoreConst { dst: 0, csrc: 300 },
        OpCode::StoreStringConst { dst: 301, val: "x".into() },
        OpCode::StoreConst { dst: 1, csrc: 301 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 0 },
        OpCode::PushArg { src: 1 },
        OpCode::Load { dst: 2, name: "note".into() },
        OpCode::Call { dst: 3, src: 2 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 3 },
        OpCode::CallFormatter { dst: 4, name: "pdf".into() },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("OutputError"));
}

#[test]
fn notes_buffer_until_generators_run_at_program_end() {
    let run = run_ops(vec![
        // generator for "md": returns body ++ "!"
        /* 0 */ OpCode::CreateFun { fun: 10, name: "gen".into(), arg_names: "n".into() },
        /* 1 */ OpCode::FunBegin { fun: 10 }, // body at 3
        /* 2 */ OpCode::Jmp { addr: 8 },
        /* 3 */ OpCode::PushFrame,
        /* 4 */ OpCode::Load { dst: 1, name: "n".into() },
        /* 5 */ OpCode::StoreStringConst { dst: 300, val: "!".into() },
        /* 6 */ bin(BinOp::Concat, BinForm::RegConst, 2, 1, 300),
        /* 7 */ OpCode::Return { src: 2 },
        /* 8 */ OpCode::StoreStringConst { dst: 310, val: "md".into() },
        /* 9 */ OpCode::StoreConst { dst: 20, csrc: 310 },
        /* 10 */ OpCode::Annotate { dst: 10, name: "generator".into(), val: 20 },
        // plain output first
        /* 11 */ OpCode::StoreStringConst { dst: 311, val: "reg".into() },
        /* 12 */ OpCode::StoreConst { dst: 21, csrc: 311 },
        /* 13 */ OpCode::Output { src: 21 },
        // then a note, which buffers
        /* 14 */ OpCode::StoreStringConst { dst: 312, val: "md".into() },
        /* 15 */ OpCode::StoreConst { dst: 22, csrc: 312 },
        /* 16 */ OpCode::StoreStringConst { dst: 313, val: "x".into() },
        /* 17 */ OpCode::StoreConst { dst: 23, csrc: 313 },
        /* 18 */ OpCode::PushCallFrame,
        /* 19 */ OpCode::PushArg { src: 22 },
        /* 20 */ OpCode::PushArg { src: 23 },
        /* 21 */ OpCode::Load { dst: 24, name: "note".into() },
        /* 22 */ OpCode::Call { dst: 25, src: 24 },
        /* 23 */ OpCode::Output { src: 25 },
    ]);
    assert_eq!(run.exit, 0, "{}", run.stderr());
    assert_eq!(run.stdout(), "regx!");
}

#[test]
fn notes_without_generator_print_their_body() {
    let run = run_ops(vec![
        OpCode::StoreStringConst { dst: 300, val: "md".into() },
        OpCode::StoreConst { dst: 0, csrc: 300 },
        OpCode::StoreStringConst { dst: 301, val: "raw".into() },
        OpCode::StoreConst { dst: 1, csrc: 301 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 0 },
        OpCode::PushArg { src: 1 },
        OpCode::Load { dst: 2, name: "note".into() },
        OpCode::Call { dst: 3, src: 2 },
        OpCode::Output { src: 3 },
    ]);
    assert_eq!(run.stdout(), "raw");
}

#[test]
fn output_writes_without_newline() {
    let run = run_ops(vec![
        OpCode::StoreStringConst { dst: 300, val: "a".into() },
        OpCode::StoreConst { dst: 0, csrc: 300 },
        OpCode::Output { src: 0 },
        OpCode::Output { src: 0 },
    ]);
    assert_eq!(run.stdout(), "aa");
}

#[test]
fn object_output_goes_through_string_method() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushFrame, // class body
        /* 1 */ OpCode::CreateFun { fun: 1, name: "__String".into(), arg_names: "this".into() },
        /* 2 */ OpCode::FunBegin { fun: 1 }, // body at 4
        /* 3 */ OpCode::Jmp { addr: 6 },
        /* 4 */ OpCode::PushFrame,
        /* 5 */ OpCode::ReturnConst { csrc: 0 }, // set below
        /* 6 */ OpCode::BuildClass { dst: 0, name: "Show".into() },
        /* 7 */ OpCode::PushCallFrame,
        /* 8 */ OpCode::Call { dst: 1, src: 0 },
        /* 9 */ OpCode::Output { src: 1 },
    ]);
    // The function's own constant pool has nothing at #0, which reads as nil;
    // __String must return a String, so this is an OutputError.
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("OutputError"));
}

#[test]
fn document_attaches_doc_annotation() {
    let run = run_ops(vec![
        OpCode::CreateFun { fun: 0, name: "f".into(), arg_names: String::new() },
        OpCode::FunBegin { fun: 0 },
        OpCode::Jmp { addr: 5 },
        OpCode::PushFrame,
        OpCode::ReturnConst { csrc: 0 },
        OpCode::Document { dst: 0, val: "Does the thing.".into() },
    ]);
    assert_eq!(run.exit, 0);
}
