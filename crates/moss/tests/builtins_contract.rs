//! Built-in installation and the native libms surface.

mod common;

use common::{bin, run_ops};
use moss::{BinForm, BinOp, OpCode};
use pretty_assertions::assert_eq;

#[test]
fn builtin_classes_resolve_in_a_fresh_vm() {
    let run = run_ops(vec![
        OpCode::Load { dst: 0, name: "Int".into() },
        OpCode::Load { dst: 1, name: "Exception".into() },
        OpCode::Load { dst: 2, name: "StopIteration".into() },
        OpCode::Load { dst: 3, name: "Type".into() },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(0), "<class Int>");
    assert_eq!(run.reg(1), "<class Exception>");
    assert_eq!(run.reg(2), "<class StopIteration>");
    assert_eq!(run.reg(3), "<class Type>");
}

#[test]
fn module_constants_are_bound() {
    let run = run_ops(vec![
        OpCode::Load { dst: 0, name: "__NAME".into() },
        OpCode::Load { dst: 1, name: "__FILE".into() },
        OpCode::Load { dst: 2, name: "moss".into() },
    ]);
    assert_eq!(run.reg(0), "test");
    assert_eq!(run.reg(1), "test.ms");
    assert_eq!(run.reg(2), "<module libms>");
}

#[test]
fn libms_functions_resolve_through_the_spilled_module() {
    // Both the bare name and the moss.name attribute path work.
    let run = run_ops(vec![
        OpCode::Load { dst: 0, name: "hash".into() },
        OpCode::Load { dst: 1, name: "moss".into() },
        OpCode::LoadAttr { dst: 2, src: 1, name: "hash".into() },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(0), run.reg(2));
}

#[test]
fn hash_agrees_across_numeric_kinds() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushCallFrame,
        /* 1 */ OpCode::StoreIntConst { dst: 300, val: 2 },
        /* 2 */ OpCode::PushConstArg { csrc: 300 },
        /* 3 */ OpCode::Load { dst: 0, name: "hash".into() },
        /* 4 */ OpCode::Call { dst: 1, src: 0 },
        /* 5 */ OpCode::PushCallFrame,
        /* 6 */ OpCode::StoreFloatConst { dst: 301, val: 2.0 },
        /* 7 */ OpCode::PushConstArg { csrc: 301 },
        /* 8 */ OpCode::Load { dst: 2, name: "hash".into() },
        /* 9 */ OpCode::Call { dst: 3, src: 2 },
        /* 10 */ bin(BinOp::Eq, BinForm::RegReg, 4, 1, 3),
    ]);
    assert_eq!(run.reg(4), "true");
}

#[test]
fn hash_rejects_unhashable_kinds() {
    let run = run_ops(vec![
        OpCode::StoreIntConst { dst: 300, val: 1 },
        OpCode::ListPushConst { dst: 0, csrc: 300 },
        OpCode::BuildList { dst: 0 },
        OpCode::PushCallFrame,
        OpCode::PushArg { src: 0 },
        OpCode::Load { dst: 1, name: "hash".into() },
        OpCode::Call { dst: 2, src: 1 },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("TypeError"));
}

#[test]
fn type_native_returns_the_class() {
    let run = run_ops(vec![
        OpCode::PushCallFrame,
        OpCode::StoreIntConst { dst: 300, val: 2 },
        OpCode::PushConstArg { csrc: 300 },
        OpCode::Load { dst: 0, name: "type".into() },
        OpCode::Call { dst: 1, src: 0 },
    ]);
    assert_eq!(run.reg(1), "<class Int>");
}

#[test]
fn vardump_renders_with_delimiters() {
    let run = run_ops(vec![
        OpCode::PushCallFrame,
        OpCode::StoreStringConst { dst: 300, val: "hi".into() },
        OpCode::PushConstArg { csrc: 300 },
        OpCode::Load { dst: 0, name: "vardump".into() },
        OpCode::Call { dst: 1, src: 0 },
    ]);
    assert_eq!(run.reg(1), "\"hi\"");
}

#[test]
fn clone_native_copies_collections() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 1 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 2 */ OpCode::BuildList { dst: 0 },
        /* 3 */ OpCode::PushCallFrame,
        /* 4 */ OpCode::PushArg { src: 0 },
        /* 5 */ OpCode::Load { dst: 1, name: "clone".into() },
        /* 6 */ OpCode::Call { dst: 2, src: 1 },
        // mutate the original; the clone keeps its shape
        /* 7 */ OpCode::StoreIntConst { dst: 301, val: 9 },
        /* 8 */ OpCode::StoreIntConst { dst: 302, val: 0 },
        /* 9 */ OpCode::StoreConst { dst: 3, csrc: 302 },
        /* 10 */ OpCode::StoreConstSubsc { csrc: 301, obj: 0, key: 3 },
    ]);
    assert_eq!(run.reg(0), "[9]");
    assert_eq!(run.reg(2), "[1]");
}

#[test]
fn regex_foreign_values_match() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushCallFrame,
        /* 1 */ OpCode::StoreStringConst { dst: 300, val: "^a+$".into() },
        /* 2 */ OpCode::PushConstArg { csrc: 300 },
        /* 3 */ OpCode::Load { dst: 0, name: "regex".into() },
        /* 4 */ OpCode::Call { dst: 1, src: 0 },
        /* 5 */ OpCode::PushCallFrame,
        /* 6 */ OpCode::PushArg { src: 1 },
        /* 7 */ OpCode::StoreStringConst { dst: 301, val: "aaa".into() },
        /* 8 */ OpCode::PushConstArg { csrc: 301 },
        /* 9 */ OpCode::Load { dst: 2, name: "regex_match".into() },
        /* 10 */ OpCode::Call { dst: 3, src: 2 },
    ]);
    assert_eq!(run.exit, 0, "{}", run.stderr());
    assert_eq!(run.reg(3), "true");
}

#[test]
fn c_foreign_wrappers_construct() {
    let run = run_ops(vec![
        OpCode::PushCallFrame,
        OpCode::StoreIntConst { dst: 300, val: 7 },
        OpCode::PushConstArg { csrc: 300 },
        OpCode::Load { dst: 0, name: "clong".into() },
        OpCode::Call { dst: 1, src: 0 },
        OpCode::PushCallFrame,
        OpCode::Load { dst: 2, name: "cvoid".into() },
        OpCode::Call { dst: 3, src: 2 },
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(1), "<foreign CLong>");
    assert_eq!(run.reg(3), "<foreign CVoid>");
}

#[test]
fn missing_file_raises_file_not_found() {
    let run = run_ops(vec![
        OpCode::PushCallFrame,
        OpCode::StoreStringConst { dst: 300, val: "/definitely/not/here.txt".into() },
        OpCode::PushConstArg { csrc: 300 },
        OpCode::Load { dst: 0, name: "open".into() },
        OpCode::Call { dst: 1, src: 0 },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("FileNotFoundError"));
}

#[test]
fn super_proxy_resolves_parent_methods() {
    let run = run_ops(vec![
        // Base with speak() returning 1.
        /* 0 */ OpCode::PushFrame,
        /* 1 */ OpCode::CreateFun { fun: 1, name: "speak".into(), arg_names: "this".into() },
        /* 2 */ OpCode::FunBegin { fun: 1 }, // body at 4
        /* 3 */ OpCode::Jmp { addr: 7 },
        /* 4 */ OpCode::PushFrame,
        /* 5 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 6 */ OpCode::ReturnConst { csrc: 300 },
        /* 7 */ OpCode::BuildClass { dst: 0, name: "Base".into() },
        /* 8 */ OpCode::StoreName { dst: 0, name: "Base".into() },
        // Derived overriding speak() to return 2.
        /* 9 */ OpCode::PushParent { parent: 0 },
        /* 10 */ OpCode::PushFrame,
        /* 11 */ OpCode::CreateFun { fun: 1, name: "speak".into(), arg_names: "this".into() },
        /* 12 */ OpCode::FunBegin { fun: 1 }, // body at 14
        /* 13 */ OpCode::Jmp { addr: 17 },
        /* 14 */ OpCode::PushFrame,
        /* 15 */ OpCode::StoreIntConst { dst: 300, val: 2 },
        /* 16 */ OpCode::ReturnConst { csrc: 300 },
        /* 17 */ OpCode::BuildClass { dst: 2, name: "Derived".into() },
        /* 18 */ OpCode::StoreName { dst: 2, name: "Derived".into() },
        /* 19 */ OpCode::PushCallFrame,
        /* 20 */ OpCode::Call { dst: 3, src: 2 },
        // Through the instance the override wins.
        /* 21 */ OpCode::PushCallFrame,
        /* 22 */ OpCode::LoadAttr { dst: 4, src: 3, name: "speak".into() },
        /* 23 */ OpCode::Call { dst: 5, src: 4 },
        // Through super_of(instance, Base) the parent method wins.
        /* 24 */ OpCode::PushCallFrame,
        /* 25 */ OpCode::PushArg { src: 3 },
        /* 26 */ OpCode::PushArg { src: 0 },
        /* 27 */ OpCode::Load { dst: 6, name: "super_of".into() },
        /* 28 */ OpCode::Call { dst: 7, src: 6 },
        /* 29 */ OpCode::PushCallFrame,
        /* 30 */ OpCode::LoadAttr { dst: 8, src: 7, name: "speak".into() },
        /* 31 */ OpCode::Call { dst: 9, src: 8 },
    ]);
    assert_eq!(run.exit, 0, "{}", run.stderr());
    assert_eq!(run.reg(5), "2");
    assert_eq!(run.reg(9), "1");
}

#[test]
fn delattr_removes_user_attributes() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushFrame,
        /* 1 */ OpCode::BuildClass { dst: 0, name: "Bag".into() },
        /* 2 */ OpCode::PushCallFrame,
        /* 3 */ OpCode::Call { dst: 1, src: 0 },
        /* 4 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 5 */ OpCode::StoreConstAttr { csrc: 300, obj: 1, name: "x".into() },
        /* 6 */ OpCode::PushCallFrame,
        /* 7 */ OpCode::PushArg { src: 1 },
        /* 8 */ OpCode::StoreStringConst { dst: 301, val: "x".into() },
        /* 9 */ OpCode::PushConstArg { csrc: 301 },
        /* 10 */ OpCode::Load { dst: 2, name: "delattr".into() },
        /* 11 */ OpCode::Call { dst: 3, src: 2 },
        // the attribute is gone now
        /* 12 */ OpCode::LoadAttr { dst: 4, src: 1, name: "x".into() },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("AttributeError"));
}

#[test]
fn host_call_reaches_program_functions() {
    let mut run = run_ops(vec![
        /* 0 */ OpCode::CreateFun { fun: 10, name: "double".into(), arg_names: "x".into() },
        /* 1 */ OpCode::FunBegin { fun: 10 }, // body at 3
        /* 2 */ OpCode::Jmp { addr: 6 },
        /* 3 */ OpCode::PushFrame,
        /* 4 */ OpCode::Load { dst: 1, name: "x".into() },
        /* 5 */ OpCode::Return { src: 1 },
        /* 6 */ OpCode::End,
    ]);
    assert_eq!(run.exit, 0);
    let arg = run.machine.int_value(21);
    assert_eq!(run.machine.call("double", vec![arg]), Ok("21".to_string()));
    assert!(run.machine.call("missing", vec![]).is_err());
}

#[test]
fn enums_build_members_and_compare() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 300, val: "Red".into() },
        /* 1 */ OpCode::StoreStringConst { dst: 301, val: "Green".into() },
        /* 2 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 3 */ OpCode::ListPushConst { dst: 0, csrc: 301 },
        /* 4 */ OpCode::BuildList { dst: 0 },
        /* 5 */ OpCode::BuildEnum { dst: 1, vals: 0, name: "Colors".into() },
        /* 6 */ OpCode::LoadAttr { dst: 2, src: 1, name: "Red".into() },
        /* 7 */ OpCode::LoadAttr { dst: 3, src: 1, name: "Green".into() },
        /* 8 */ bin(BinOp::Eq, BinForm::RegReg, 4, 2, 3),
        /* 9 */ bin(BinOp::Eq, BinForm::RegReg, 5, 2, 2),
        /* 10 */ bin(BinOp::In, BinForm::RegReg, 6, 2, 1),
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(1), "<Enum Colors>");
    assert_eq!(run.reg(2), "Colors::Red");
    assert_eq!(run.reg(4), "false");
    assert_eq!(run.reg(5), "true");
    assert_eq!(run.reg(6), "true");
}

#[test]
fn spaces_hold_names_and_anonymous_spaces_spill() {
    let run = run_ops(vec![
        /* 0 */ OpCode::PushFrame, // space body
        /* 1 */ OpCode::StoreIntConst { dst: 300, val: 5 },
        /* 2 */ OpCode::StoreConst { dst: 0, csrc: 300 },
        /* 3 */ OpCode::StoreName { dst: 0, name: "inner".into() },
        /* 4 */ OpCode::BuildSpace { dst: 1, name: "sp".into(), anonymous: false },
        /* 5 */ OpCode::LoadAttr { dst: 2, src: 1, name: "inner".into() },
        // anonymous space: its names resolve without qualification
        /* 6 */ OpCode::PushFrame,
        /* 7 */ OpCode::StoreIntConst { dst: 301, val: 6 },
        /* 8 */ OpCode::StoreConst { dst: 0, csrc: 301 },
        /* 9 */ OpCode::StoreName { dst: 0, name: "hidden".into() },
        /* 10 */ OpCode::BuildSpace { dst: 3, name: String::new(), anonymous: true },
        /* 11 */ OpCode::Load { dst: 4, name: "hidden".into() },
    ]);
    assert_eq!(run.exit, 0, "{}", run.stderr());
    assert_eq!(run.reg(1), "<space sp>");
    assert_eq!(run.reg(2), "5");
    assert_eq!(run.reg(4), "6");
}
