//! Raise, catch, and finalizer semantics.

mod common;

use common::run_ops;
use moss::OpCode;
use pretty_assertions::assert_eq;

#[test]
fn catch_then_finally_runs_both_blocks() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 310, val: "bad".into() },
        /* 1 */ OpCode::StoreStringConst { dst: 311, val: "caught".into() },
        /* 2 */ OpCode::StoreStringConst { dst: 312, val: "done".into() },
        /* 3 */ OpCode::Finally { addr: 13, caller: 320 },
        /* 4 */ OpCode::Load { dst: 0, name: "ValueError".into() },
        /* 5 */ OpCode::CatchTyped { name: "e".into(), ty: 0, addr: 10 },
        /* 6 */ OpCode::PushCallFrame,
        /* 7 */ OpCode::PushConstArg { csrc: 310 },
        /* 8 */ OpCode::Call { dst: 1, src: 0 },
        /* 9 */ OpCode::Raise { src: 1 },
        /* 10 */ OpCode::StoreConst { dst: 2, csrc: 311 },
        /* 11 */ OpCode::Output { src: 2 },
        /* 12 */ OpCode::Jmp { addr: 13 },
        /* 13 */ OpCode::PopFinally,
        /* 14 */ OpCode::StoreConst { dst: 3, csrc: 312 },
        /* 15 */ OpCode::Output { src: 3 },
        /* 16 */ OpCode::FinallyEnd { caller: 320 },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.stdout(), "caughtdone");
}

#[test]
fn uncaught_raise_still_runs_finalizer() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 310, val: "bad".into() },
        /* 1 */ OpCode::StoreStringConst { dst: 312, val: "done".into() },
        /* 2 */ OpCode::Finally { addr: 7, caller: 320 },
        /* 3 */ OpCode::Load { dst: 0, name: "ValueError".into() },
        /* 4 */ OpCode::PushCallFrame,
        /* 5 */ OpCode::PushConstArg { csrc: 310 },
        /* 6 */ OpCode::Call { dst: 1, src: 0 },
        // fall through into the finalizer on the normal path would need a
        // jump; the raise below enters it through the unwind path instead
        /* 7 */ OpCode::PopFinally,
        /* 8 */ OpCode::StoreConst { dst: 2, csrc: 312 },
        /* 9 */ OpCode::Output { src: 2 },
        /* 10 */ OpCode::FinallyEnd { caller: 320 },
        /* 11 */ OpCode::End,
    ]);
    // The raise is at the end so the finalizer entry comes from unwinding.
    let run2 = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 310, val: "bad".into() },
        /* 1 */ OpCode::StoreStringConst { dst: 312, val: "done".into() },
        /* 2 */ OpCode::Finally { addr: 8, caller: 320 },
        /* 3 */ OpCode::Load { dst: 0, name: "ValueError".into() },
        /* 4 */ OpCode::PushCallFrame,
        /* 5 */ OpCode::PushConstArg { csrc: 310 },
        /* 6 */ OpCode::Call { dst: 1, src: 0 },
        /* 7 */ OpCode::Raise { src: 1 },
        /* 8 */ OpCode::PopFinally,
        /* 9 */ OpCode::StoreConst { dst: 2, csrc: 312 },
        /* 10 */ OpCode::Output { src: 2 },
        /* 11 */ OpCode::FinallyEnd { caller: 320 },
    ]);
    // Normal completion without entering the finalizer region is fine.
    assert_eq!(run.exit, 0);
    // The unwind path runs the block, then the exception leaves unhandled.
    assert_eq!(run2.stdout(), "done");
    assert_eq!(run2.exit, 1);
    assert!(run2.stderr().contains("ValueError: bad"), "{}", run2.stderr());
    assert!(run2.stderr().contains("Stacktrace"), "{}", run2.stderr());
}

#[test]
fn raise_in_callee_unwinds_to_caller_handler() {
    let run = run_ops(vec![
        /* 0 */ OpCode::CreateFun { fun: 10, name: "boom".into(), arg_names: String::new() },
        /* 1 */ OpCode::FunBegin { fun: 10 }, // body at 3
        /* 2 */ OpCode::Jmp { addr: 8 },
        /* 3 */ OpCode::PushFrame,
        /* 4 */ OpCode::Load { dst: 1, name: "ValueError".into() },
        /* 5 */ OpCode::PushCallFrame,
        /* 6 */ OpCode::Call { dst: 2, src: 1 },
        /* 7 */ OpCode::Raise { src: 2 },
        /* 8 */ OpCode::Load { dst: 20, name: "ValueError".into() },
        /* 9 */ OpCode::CatchTyped { name: "e".into(), ty: 20, addr: 14 },
        /* 10 */ OpCode::PushCallFrame,
        /* 11 */ OpCode::Load { dst: 21, name: "boom".into() },
        /* 12 */ OpCode::Call { dst: 22, src: 21 },
        /* 13 */ OpCode::End,
        /* 14 */ OpCode::StoreStringConst { dst: 300, val: "c".into() },
        /* 15 */ OpCode::StoreConst { dst: 23, csrc: 300 },
        /* 16 */ OpCode::Output { src: 23 },
        /* 17 */ OpCode::StoreStringConst { dst: 301, val: "k".into() },
        /* 18 */ OpCode::StoreConst { dst: 24, csrc: 301 },
        /* 19 */ OpCode::Output { src: 24 },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.stdout(), "ck");
}

#[test]
fn untyped_catch_takes_any_exception() {
    let run = run_ops(vec![
        /* 0 */ OpCode::Catch { name: "e".into(), addr: 5 },
        /* 1 */ OpCode::Load { dst: 0, name: "NameError".into() },
        /* 2 */ OpCode::PushCallFrame,
        /* 3 */ OpCode::Call { dst: 1, src: 0 },
        /* 4 */ OpCode::Raise { src: 1 },
        /* 5 */ OpCode::Load { dst: 2, name: "e".into() },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(2), "<object of class NameError>");
}

#[test]
fn handler_binds_the_exception_by_name() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 310, val: "boom".into() },
        /* 1 */ OpCode::Load { dst: 0, name: "ValueError".into() },
        /* 2 */ OpCode::CatchTyped { name: "err".into(), ty: 0, addr: 7 },
        /* 3 */ OpCode::PushCallFrame,
        /* 4 */ OpCode::PushConstArg { csrc: 310 },
        /* 5 */ OpCode::Call { dst: 1, src: 0 },
        /* 6 */ OpCode::Raise { src: 1 },
        /* 7 */ OpCode::Load { dst: 2, name: "err".into() },
        /* 8 */ OpCode::LoadAttr { dst: 3, src: 2, name: "msg".into() },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(3), "boom");
}

#[test]
fn subclass_exceptions_match_parent_handlers() {
    let run = run_ops(vec![
        /* 0 */ OpCode::Load { dst: 0, name: "LookupError".into() },
        /* 1 */ OpCode::CatchTyped { name: "e".into(), ty: 0, addr: 7 },
        /* 2 */ OpCode::Load { dst: 1, name: "IndexError".into() },
        /* 3 */ OpCode::PushCallFrame,
        /* 4 */ OpCode::Call { dst: 2, src: 1 },
        /* 5 */ OpCode::Raise { src: 2 },
        /* 6 */ OpCode::End,
        /* 7 */ OpCode::StoreStringConst { dst: 300, val: "caught".into() },
        /* 8 */ OpCode::StoreConst { dst: 3, csrc: 300 },
        /* 9 */ OpCode::Output { src: 3 },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.stdout(), "caught");
}

#[test]
fn non_matching_handler_does_not_fire() {
    let run = run_ops(vec![
        /* 0 */ OpCode::Load { dst: 0, name: "IndexError".into() },
        /* 1 */ OpCode::CatchTyped { name: "e".into(), ty: 0, addr: 7 },
        /* 2 */ OpCode::Load { dst: 1, name: "ValueError".into() },
        /* 3 */ OpCode::PushCallFrame,
        /* 4 */ OpCode::Call { dst: 2, src: 1 },
        /* 5 */ OpCode::Raise { src: 2 },
        /* 6 */ OpCode::End,
        /* 7 */ OpCode::Output { src: 2 },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("ValueError"));
    assert_eq!(run.stdout(), "");
}

#[test]
fn uncaught_system_exit_exits_silently_with_its_code() {
    let run = run_ops(vec![
        /* 0 */ OpCode::Load { dst: 0, name: "SystemExit".into() },
        /* 1 */ OpCode::PushCallFrame,
        /* 2 */ OpCode::Call { dst: 1, src: 0 },
        /* 3 */ OpCode::StoreIntConst { dst: 300, val: 7 },
        /* 4 */ OpCode::StoreConst { dst: 2, csrc: 300 },
        /* 5 */ OpCode::StoreAttr { src: 2, obj: 1, name: "code".into() },
        /* 6 */ OpCode::Raise { src: 1 },
    ]);
    assert_eq!(run.exit, 7);
    assert_eq!(run.stderr(), "");
}

#[test]
fn failed_assert_raises_assertion_error() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreBoolConst { dst: 300, val: false },
        /* 1 */ OpCode::StoreStringConst { dst: 301, val: "must hold".into() },
        /* 2 */ OpCode::StoreConst { dst: 0, csrc: 300 },
        /* 3 */ OpCode::StoreConst { dst: 1, csrc: 301 },
        /* 4 */ OpCode::Assert { src: 0, msg: 1 },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("AssertionError: must hold"), "{}", run.stderr());
}

#[test]
fn passing_assert_is_a_no_op() {
    let run = run_ops(vec![
        OpCode::StoreBoolConst { dst: 300, val: true },
        OpCode::StoreConst { dst: 0, csrc: 300 },
        OpCode::Assert { src: 0, msg: 1 },
    ]);
    assert_eq!(run.exit, 0);
}

#[test]
fn native_exit_stops_the_program() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushCallFrame,
        /* 1 */ OpCode::StoreIntConst { dst: 300, val: 3 },
        /* 2 */ OpCode::PushConstArg { csrc: 300 },
        /* 3 */ OpCode::Load { dst: 0, name: "exit".into() },
        /* 4 */ OpCode::Call { dst: 1, src: 0 },
        /* 5 */ OpCode::StoreStringConst { dst: 301, val: "x".into() },
        /* 6 */ OpCode::StoreConst { dst: 2, csrc: 301 },
        /* 7 */ OpCode::Output { src: 2 },
    ]);
    assert_eq!(run.exit, 3);
    assert_eq!(run.stdout(), "");
}
