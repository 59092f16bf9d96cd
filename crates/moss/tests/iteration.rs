//! Iteration, ranges, switch, subscripts, and container construction.

mod common;

use common::{bin, run_ops};
use moss::{BinForm, BinOp, OpCode, RangeForm};
use pretty_assertions::assert_eq;

const ALL_CONST: RangeForm = RangeForm {
    start_const: true,
    step_const: true,
    end_const: true,
};

#[test]
fn for_sums_a_list() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 2 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 3 },
        /* 3 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 4 */ OpCode::ListPushConst { dst: 0, csrc: 301 },
        /* 5 */ OpCode::ListPushConst { dst: 0, csrc: 302 },
        /* 6 */ OpCode::BuildList { dst: 0 },
        /* 7 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 8 */ OpCode::StoreIntConst { dst: 303, val: 0 },
        /* 9 */ OpCode::StoreConst { dst: 2, csrc: 303 },
        /* 10 */ OpCode::For { index: 3, iterator: 1, addr: 13 },
        /* 11 */ bin(BinOp::Add, BinForm::RegReg, 2, 2, 3),
        /* 12 */ OpCode::Jmp { addr: 10 },
        /* 13 */ OpCode::End,
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(2), "6");
}

#[test]
fn string_iteration_yields_code_points() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 300, val: "aé!".into() },
        /* 1 */ OpCode::StoreConst { dst: 0, csrc: 300 },
        /* 2 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 3 */ OpCode::StoreStringConst { dst: 301, val: String::new() },
        /* 4 */ OpCode::StoreConst { dst: 2, csrc: 301 },
        /* 5 */ OpCode::For { index: 3, iterator: 1, addr: 8 },
        /* 6 */ bin(BinOp::Concat, BinForm::RegReg, 2, 2, 3),
        /* 7 */ OpCode::Jmp { addr: 5 },
        /* 8 */ OpCode::End,
    ]);
    assert_eq!(run.reg(2), "aé!");
}

#[test]
fn range_iterates_by_step() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 0 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 1 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 5 },
        /* 3 */ OpCode::CreateRange { form: ALL_CONST, dst: 0, start: 300, step: 301, end: 302 },
        /* 4 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 5 */ OpCode::StoreIntConst { dst: 303, val: 0 },
        /* 6 */ OpCode::StoreConst { dst: 2, csrc: 303 },
        /* 7 */ OpCode::For { index: 3, iterator: 1, addr: 10 },
        /* 8 */ bin(BinOp::Add, BinForm::RegReg, 2, 2, 3),
        /* 9 */ OpCode::Jmp { addr: 7 },
        /* 10 */ OpCode::End,
    ]);
    assert_eq!(run.reg(2), "10");
}

#[test]
fn empty_range_stops_immediately() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 0 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 1 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 0 },
        /* 3 */ OpCode::CreateRange { form: ALL_CONST, dst: 0, start: 300, step: 301, end: 302 },
        /* 4 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 5 */ OpCode::StoreIntConst { dst: 303, val: 0 },
        /* 6 */ OpCode::StoreConst { dst: 2, csrc: 303 },
        /* 7 */ OpCode::For { index: 3, iterator: 1, addr: 10 },
        /* 8 */ OpCode::StoreConst { dst: 2, csrc: 301 }, // loop body marker
        /* 9 */ OpCode::Jmp { addr: 7 },
        /* 10 */ OpCode::End,
    ]);
    assert_eq!(run.reg(2), "0");
}

#[test]
fn descending_range_defaults_to_negative_step() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 5 },
        /* 1 */ OpCode::StoreNilConst { dst: 301 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 0 },
        /* 3 */ OpCode::CreateRange { form: ALL_CONST, dst: 0, start: 300, step: 301, end: 302 },
        /* 4 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 5 */ OpCode::StoreIntConst { dst: 303, val: 0 },
        /* 6 */ OpCode::StoreConst { dst: 2, csrc: 303 },
        /* 7 */ OpCode::For { index: 3, iterator: 1, addr: 10 },
        /* 8 */ bin(BinOp::Add, BinForm::RegReg, 2, 2, 3),
        /* 9 */ OpCode::Jmp { addr: 7 },
        /* 10 */ OpCode::End,
    ]);
    // 5 + 4 + 3 + 2 + 1
    assert_eq!(run.reg(2), "15");
}

#[test]
fn zero_step_range_raises_value_error() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 0 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 0 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 5 },
        /* 3 */ OpCode::CreateRange { form: ALL_CONST, dst: 0, start: 300, step: 301, end: 302 },
        /* 4 */ OpCode::Iter { iterator: 1, collection: 0 },
        /* 5 */ OpCode::For { index: 2, iterator: 1, addr: 6 },
        /* 6 */ OpCode::End,
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("ValueError"));
}

#[test]
fn range_exposes_bound_attributes() {
    let run = run_ops(vec![
        OpCode::StoreIntConst { dst: 300, val: 2 },
        OpCode::StoreIntConst { dst: 301, val: 1 },
        OpCode::StoreIntConst { dst: 302, val: 9 },
        OpCode::CreateRange { form: ALL_CONST, dst: 0, start: 300, step: 301, end: 302 },
        OpCode::LoadAttr { dst: 1, src: 0, name: "start".into() },
        OpCode::LoadAttr { dst: 2, src: 0, name: "end".into() },
    ]);
    assert_eq!(run.reg(1), "2");
    assert_eq!(run.reg(2), "9");
}

#[test]
fn for_multi_unpacks_dict_entries() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 2 },
        /* 2 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 3 */ OpCode::BuildList { dst: 0 },
        /* 4 */ OpCode::ListPushConst { dst: 1, csrc: 301 },
        /* 5 */ OpCode::BuildList { dst: 1 },
        /* 6 */ OpCode::BuildDict { dst: 2, keys: 0, vals: 1 },
        /* 7 */ OpCode::Iter { iterator: 3, collection: 2 },
        /* 8 */ OpCode::ForMulti { index: 10, count: 2, iterator: 3, addr: 10 },
        /* 9 */ OpCode::Jmp { addr: 8 },
        /* 10 */ OpCode::End,
    ]);
    assert_eq!(run.exit, 0);
    assert_eq!(run.reg(10), "1");
    assert_eq!(run.reg(11), "2");
}

#[test]
fn switch_jumps_to_the_matching_case() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 2 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 12 },
        /* 3 */ OpCode::StoreIntConst { dst: 303, val: 15 },
        /* 4 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 5 */ OpCode::ListPushConst { dst: 0, csrc: 301 },
        /* 6 */ OpCode::BuildList { dst: 0 },
        /* 7 */ OpCode::ListPushConst { dst: 1, csrc: 302 },
        /* 8 */ OpCode::ListPushConst { dst: 1, csrc: 303 },
        /* 9 */ OpCode::BuildList { dst: 1 },
        /* 10 */ OpCode::StoreConst { dst: 2, csrc: 301 },
        /* 11 */ OpCode::Switch { src: 2, vals: 0, addrs: 1, default_addr: 18 },
        /* 12 */ OpCode::StoreStringConst { dst: 310, val: "one".into() },
        /* 13 */ OpCode::StoreConst { dst: 3, csrc: 310 },
        /* 14 */ OpCode::Jmp { addr: 20 },
        /* 15 */ OpCode::StoreStringConst { dst: 311, val: "two".into() },
        /* 16 */ OpCode::StoreConst { dst: 3, csrc: 311 },
        /* 17 */ OpCode::Jmp { addr: 20 },
        /* 18 */ OpCode::StoreStringConst { dst: 312, val: "def".into() },
        /* 19 */ OpCode::StoreConst { dst: 3, csrc: 312 },
        /* 20 */ OpCode::Output { src: 3 },
    ]);
    assert_eq!(run.stdout(), "two");
}

#[test]
fn subscripts_index_containers() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 10 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 20 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 30 },
        /* 3 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 4 */ OpCode::ListPushConst { dst: 0, csrc: 301 },
        /* 5 */ OpCode::ListPushConst { dst: 0, csrc: 302 },
        /* 6 */ OpCode::BuildList { dst: 0 },
        /* 7 */ OpCode::StoreIntConst { dst: 303, val: -1 },
        /* 8 */ bin(BinOp::Subsc, BinForm::RegConst, 1, 0, 303),
        /* 9 */ OpCode::StoreIntConst { dst: 304, val: 0 },
        /* 10 */ bin(BinOp::Subsc, BinForm::RegConst, 2, 0, 304),
        /* 11 */ OpCode::StoreStringConst { dst: 305, val: "hey".into() },
        /* 12 */ OpCode::StoreConst { dst: 3, csrc: 305 },
        /* 13 */ OpCode::StoreIntConst { dst: 306, val: 1 },
        /* 14 */ bin(BinOp::Subsc, BinForm::RegConst, 4, 3, 306),
        // store into a list slot
        /* 15 */ OpCode::StoreIntConst { dst: 307, val: 99 },
        /* 16 */ OpCode::StoreConst { dst: 5, csrc: 304 },
        /* 17 */ OpCode::StoreConstSubsc { csrc: 307, obj: 0, key: 5 },
        /* 18 */ bin(BinOp::Subsc, BinForm::RegConst, 6, 0, 304),
    ]);
    assert_eq!(run.reg(1), "30");
    assert_eq!(run.reg(2), "10");
    assert_eq!(run.reg(4), "e");
    assert_eq!(run.reg(6), "99");
}

#[test]
fn out_of_range_index_raises_index_error() {
    let run = run_ops(vec![
        OpCode::StoreIntConst { dst: 300, val: 1 },
        OpCode::ListPushConst { dst: 0, csrc: 300 },
        OpCode::BuildList { dst: 0 },
        OpCode::StoreIntConst { dst: 301, val: 1 },
        bin(BinOp::Subsc, BinForm::RegConst, 1, 0, 301),
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("IndexError"));
}

#[test]
fn dict_subscript_by_key() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreStringConst { dst: 300, val: "a".into() },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 5 },
        /* 2 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 3 */ OpCode::BuildList { dst: 0 },
        /* 4 */ OpCode::ListPushConst { dst: 1, csrc: 301 },
        /* 5 */ OpCode::BuildList { dst: 1 },
        /* 6 */ OpCode::BuildDict { dst: 2, keys: 0, vals: 1 },
        /* 7 */ bin(BinOp::Subsc, BinForm::RegConst, 3, 2, 300),
        // overwrite through subscript store, then read back
        /* 8 */ OpCode::StoreIntConst { dst: 302, val: 9 },
        /* 9 */ OpCode::StoreConst { dst: 4, csrc: 300 },
        /* 10 */ OpCode::StoreConstSubsc { csrc: 302, obj: 2, key: 4 },
        /* 11 */ bin(BinOp::Subsc, BinForm::RegConst, 5, 2, 300),
    ]);
    assert_eq!(run.reg(3), "5");
    assert_eq!(run.reg(5), "9");
}

#[test]
fn missing_dict_key_raises_key_error() {
    let run = run_ops(vec![
        OpCode::StoreStringConst { dst: 300, val: "a".into() },
        OpCode::ListPushConst { dst: 0, csrc: 300 },
        OpCode::BuildList { dst: 0 },
        OpCode::ListPushConst { dst: 1, csrc: 300 },
        OpCode::BuildList { dst: 1 },
        OpCode::BuildDict { dst: 2, keys: 0, vals: 1 },
        OpCode::StoreStringConst { dst: 301, val: "missing".into() },
        bin(BinOp::Subsc, BinForm::RegConst, 3, 2, 301),
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("KeyError"));
}

#[test]
fn subsc_last_and_rest_slice_sequences() {
    let run = run_ops(vec![
        /* 0 */ OpCode::StoreIntConst { dst: 300, val: 1 },
        /* 1 */ OpCode::StoreIntConst { dst: 301, val: 2 },
        /* 2 */ OpCode::StoreIntConst { dst: 302, val: 3 },
        /* 3 */ OpCode::StoreIntConst { dst: 303, val: 4 },
        /* 4 */ OpCode::ListPushConst { dst: 0, csrc: 300 },
        /* 5 */ OpCode::ListPushConst { dst: 0, csrc: 301 },
        /* 6 */ OpCode::ListPushConst { dst: 0, csrc: 302 },
        /* 7 */ OpCode::ListPushConst { dst: 0, csrc: 303 },
        /* 8 */ OpCode::BuildList { dst: 0 },
        // the element one place from the end
        /* 9 */ OpCode::StoreIntConst { dst: 304, val: 1 },
        /* 10 */ OpCode::SubscLast { dst: 1, src: 0, cindex: 304 },
        // rest slice with one fixed target on each side
        /* 11 */ OpCode::StoreIntConst { dst: 305, val: (1 << 32) | 1 },
        /* 12 */ OpCode::SubscRest { dst: 2, src: 0, cindex: 305 },
    ]);
    assert_eq!(run.reg(1), "4");
    assert_eq!(run.reg(2), "[2, 3]");
}

#[test]
fn rest_slice_on_short_sequence_raises() {
    let run = run_ops(vec![
        OpCode::StoreIntConst { dst: 300, val: 1 },
        OpCode::ListPushConst { dst: 0, csrc: 300 },
        OpCode::BuildList { dst: 0 },
        OpCode::StoreIntConst { dst: 301, val: (2 << 32) | 2 },
        OpCode::SubscRest { dst: 1, src: 0, cindex: 301 },
    ]);
    assert_eq!(run.exit, 1);
    assert!(run.stderr().contains("IndexError"));
}

#[test]
fn iterating_an_iterator_returns_itself() {
    let run = run_ops(vec![
        OpCode::StoreStringConst { dst: 300, val: "ab".into() },
        OpCode::StoreConst { dst: 0, csrc: 300 },
        OpCode::Iter { iterator: 1, collection: 0 },
        OpCode::Iter { iterator: 2, collection: 1 },
        // advancing through either register observes the same cursor
        OpCode::For { index: 3, iterator: 1, addr: 6 },
        OpCode::For { index: 4, iterator: 2, addr: 6 },
    ]);
    assert_eq!(run.reg(3), "a");
    assert_eq!(run.reg(4), "b");
}
