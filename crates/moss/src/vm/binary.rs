//! Binary and unary expression opcodes.
//!
//! Numeric pairs follow the promotion table: two Ints yield Int (wrapping on
//! overflow), any Float yields Float, and `/` of two Ints always yields
//! Float. Object operands dispatch by method name (`__add`, then `__radd` on
//! the right operand); missing overloads raise `TypeError`.

use crate::{
    bytecode::{BinForm, BinOp, Register},
    frame::CallFrameArg,
    heap::HeapId,
    machine::{Machine, RunResult, VmId},
    value::{value_eq, ValueKind},
};

/// Numeric shape of an operand pair.
enum NumPair {
    Ints(i64, i64),
    Floats(f64, f64),
    Other,
}

impl Machine {
    fn num_pair(&self, a: HeapId, b: HeapId) -> NumPair {
        match (&self.heap.get(a).kind, &self.heap.get(b).kind) {
            (ValueKind::Int(x), ValueKind::Int(y)) => NumPair::Ints(*x, *y),
            (ValueKind::Int(x), ValueKind::Float(y)) => NumPair::Floats(*x as f64, *y),
            (ValueKind::Float(x), ValueKind::Int(y)) => NumPair::Floats(*x, *y as f64),
            (ValueKind::Float(x), ValueKind::Float(y)) => NumPair::Floats(*x, *y),
            _ => NumPair::Other,
        }
    }

    fn is_object(&self, v: HeapId) -> bool {
        matches!(self.heap.get(v).kind, ValueKind::Object)
    }

    pub(crate) fn exec_bin(
        &mut self,
        vm: VmId,
        op: BinOp,
        form: BinForm,
        dst: Register,
        lhs: Register,
        rhs: Register,
    ) -> RunResult<()> {
        let a = match form {
            BinForm::ConstReg => self.load_const(vm, lhs),
            _ => self.load(vm, lhs),
        };
        let b = match form {
            BinForm::RegConst => self.load_const(vm, rhs),
            _ => self.load(vm, rhs),
        };
        let res = self.binary_op(vm, op, a, b)?;
        self.store(vm, dst, res);
        Ok(())
    }

    fn binary_op(&mut self, vm: VmId, op: BinOp, a: HeapId, b: HeapId) -> RunResult<HeapId> {
        // Membership tests dispatch on the container, which is the right
        // operand.
        if op == BinOp::In {
            if self.is_object(b) {
                return self.dispatch_dunder(vm, op.dunder(), b, a);
            }
            return self.membership(a, b);
        }

        if self.is_object(a) {
            if let Some(method) = self.find_dunder(a, op.dunder()) {
                return self.call_dunder(vm, method, a, b);
            }
            if self.is_object(b) {
                if let Some(method) = self.find_dunder(b, op.reflected_dunder()) {
                    return self.call_dunder(vm, method, b, a);
                }
            }
            // Equality has an identity fallback; everything else is an error.
            if op == BinOp::Eq {
                return Ok(self.builtins.bool_val(a == b));
            }
            if op == BinOp::Neq {
                return Ok(self.builtins.bool_val(a != b));
            }
            let name = self.heap.get(self.heap.get(a).ty).name.clone();
            return Err(self.raise_type_error(&format!("'{name}' does not support operator {op}")));
        }
        if self.is_object(b) {
            if let Some(method) = self.find_dunder(b, op.reflected_dunder()) {
                return self.call_dunder(vm, method, b, a);
            }
            if op == BinOp::Eq {
                return Ok(self.builtins.bool_val(false));
            }
            if op == BinOp::Neq {
                return Ok(self.builtins.bool_val(true));
            }
            let name = self.heap.get(self.heap.get(b).ty).name.clone();
            return Err(self.raise_type_error(&format!("'{name}' does not support operator {op}")));
        }

        match op {
            BinOp::Concat => {
                let left = self.to_display_string(vm, a)?;
                let right = self.to_display_string(vm, b)?;
                Ok(self.alloc_str(&format!("{left}{right}")))
            }
            BinOp::Exp => match self.num_pair(a, b) {
                NumPair::Ints(x, y) => {
                    if y >= 0 {
                        Ok(self.alloc_int(wrapping_int_pow(x, y)))
                    } else {
                        Ok(self.alloc_float((x as f64).powf(y as f64)))
                    }
                }
                NumPair::Floats(x, y) => Ok(self.alloc_float(x.powf(y))),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },
            BinOp::Add => match self.num_pair(a, b) {
                NumPair::Ints(x, y) => Ok(self.alloc_int(x.wrapping_add(y))),
                NumPair::Floats(x, y) => Ok(self.alloc_float(x + y)),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },
            BinOp::Sub => match self.num_pair(a, b) {
                NumPair::Ints(x, y) => Ok(self.alloc_int(x.wrapping_sub(y))),
                NumPair::Floats(x, y) => Ok(self.alloc_float(x - y)),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },
            BinOp::Mul => match self.num_pair(a, b) {
                NumPair::Ints(x, y) => Ok(self.alloc_int(x.wrapping_mul(y))),
                NumPair::Floats(x, y) => Ok(self.alloc_float(x * y)),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },
            BinOp::Div => match self.num_pair(a, b) {
                // Int division is non-integer division; the result is Float.
                NumPair::Ints(_, 0) => {
                    let class = self.builtins.division_by_zero_error;
                    Err(self.raise_with(class, "division by zero"))
                }
                NumPair::Ints(x, y) => Ok(self.alloc_float(x as f64 / y as f64)),
                // Float division by zero yields an infinity, no error.
                NumPair::Floats(x, y) => Ok(self.alloc_float(x / y)),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },
            BinOp::Mod => match self.num_pair(a, b) {
                NumPair::Ints(_, 0) => {
                    let class = self.builtins.division_by_zero_error;
                    Err(self.raise_with(class, "modulo by zero"))
                }
                NumPair::Ints(x, y) => Ok(self.alloc_int(x.wrapping_rem(y))),
                NumPair::Floats(x, y) => Ok(self.alloc_float(x % y)),
                NumPair::Other => Err(self.bin_type_error(op, a, b)),
            },

            BinOp::Eq => Ok(self.builtins.bool_val(value_eq(&self.heap, a, b))),
            BinOp::Neq => Ok(self.builtins.bool_val(!value_eq(&self.heap, a, b))),
            BinOp::Bt | BinOp::Lt | BinOp::Beq | BinOp::Leq => self.relational(op, a, b),

            BinOp::And | BinOp::Or | BinOp::Xor => self.logical(op, a, b),

            BinOp::Subsc => self.get_subsc(a, b),
            BinOp::In => unreachable!("membership handled above"),
        }
    }

    fn bin_type_error(&mut self, op: BinOp, a: HeapId, b: HeapId) -> crate::machine::RunError {
        let left = self.heap.get(a).kind.kind_name();
        let right = self.heap.get(b).kind.kind_name();
        self.raise_type_error(&format!("unsupported operand types for {op}: {left} and {right}"))
    }

    fn relational(&mut self, op: BinOp, a: HeapId, b: HeapId) -> RunResult<HeapId> {
        let ordering = match self.num_pair(a, b) {
            NumPair::Ints(x, y) => x.partial_cmp(&y),
            NumPair::Floats(x, y) => x.partial_cmp(&y),
            NumPair::Other => match (&self.heap.get(a).kind, &self.heap.get(b).kind) {
                (ValueKind::Str(x), ValueKind::Str(y)) => x.partial_cmp(y),
                _ => return Err(self.bin_type_error(op, a, b)),
            },
        };
        let Some(ordering) = ordering else {
            return Ok(self.builtins.bool_val(false));
        };
        let result = match op {
            BinOp::Bt => ordering.is_gt(),
            BinOp::Lt => ordering.is_lt(),
            BinOp::Beq => ordering.is_ge(),
            BinOp::Leq => ordering.is_le(),
            _ => unreachable!(),
        };
        Ok(self.builtins.bool_val(result))
    }

    fn logical(&mut self, op: BinOp, a: HeapId, b: HeapId) -> RunResult<HeapId> {
        match (&self.heap.get(a).kind, &self.heap.get(b).kind) {
            (ValueKind::Bool(x), ValueKind::Bool(y)) => {
                let r = match op {
                    BinOp::And => *x && *y,
                    BinOp::Or => *x || *y,
                    BinOp::Xor => *x != *y,
                    _ => unreachable!(),
                };
                Ok(self.builtins.bool_val(r))
            }
            (ValueKind::Int(x), ValueKind::Int(y)) => {
                let r = match op {
                    BinOp::And => *x & *y,
                    BinOp::Or => *x | *y,
                    BinOp::Xor => *x ^ *y,
                    _ => unreachable!(),
                };
                Ok(self.alloc_int(r))
            }
            _ => Err(self.bin_type_error(op, a, b)),
        }
    }

    /// `a in b` for the built-in containers.
    fn membership(&mut self, a: HeapId, b: HeapId) -> RunResult<HeapId> {
        match &self.heap.get(b).kind {
            ValueKind::List(vals) => {
                let found = vals.iter().any(|v| value_eq(&self.heap, a, *v));
                Ok(self.builtins.bool_val(found))
            }
            ValueKind::Dict(_) => {
                let found = self.dict_lookup(b, a)?.is_some();
                Ok(self.builtins.bool_val(found))
            }
            ValueKind::Str(hay) => match &self.heap.get(a).kind {
                ValueKind::Str(needle) => {
                    let found = hay.contains(needle.as_str());
                    Ok(self.builtins.bool_val(found))
                }
                _ => Err(self.bin_type_error(BinOp::In, a, b)),
            },
            ValueKind::Bytes(hay) => match &self.heap.get(a).kind {
                ValueKind::Int(byte) => {
                    let found = u8::try_from(*byte).is_ok_and(|x| hay.contains(&x));
                    Ok(self.builtins.bool_val(found))
                }
                _ => Err(self.bin_type_error(BinOp::In, a, b)),
            },
            ValueKind::EnumType(vals) => {
                let found = vals.contains(&a);
                Ok(self.builtins.bool_val(found))
            }
            _ => Err(self.bin_type_error(BinOp::In, a, b)),
        }
    }

    /// `a[b]` for the built-in containers.
    pub(crate) fn get_subsc(&mut self, a: HeapId, b: HeapId) -> RunResult<HeapId> {
        enum Looked {
            Found(HeapId),
            MakeStr(String),
            MakeInt(i64),
            OutOfRange(i64, usize),
            Dict,
            Unsupported,
        }
        let looked = match (&self.heap.get(a).kind, &self.heap.get(b).kind) {
            (ValueKind::List(vals), ValueKind::Int(i)) => match resolve_index(*i, vals.len()) {
                Some(idx) => Looked::Found(vals[idx]),
                None => Looked::OutOfRange(*i, vals.len()),
            },
            (ValueKind::Str(s), ValueKind::Int(i)) => {
                let count = s.chars().count();
                match resolve_index(*i, count) {
                    Some(idx) => Looked::MakeStr(s.chars().skip(idx).take(1).collect()),
                    None => Looked::OutOfRange(*i, count),
                }
            }
            (ValueKind::Bytes(bytes), ValueKind::Int(i)) => match resolve_index(*i, bytes.len()) {
                Some(idx) => Looked::MakeInt(i64::from(bytes[idx])),
                None => Looked::OutOfRange(*i, bytes.len()),
            },
            (ValueKind::Dict(_), _) => Looked::Dict,
            _ => Looked::Unsupported,
        };
        match looked {
            Looked::Found(v) => Ok(v),
            Looked::MakeStr(s) => Ok(self.alloc_str(&s)),
            Looked::MakeInt(i) => Ok(self.alloc_int(i)),
            Looked::OutOfRange(i, len) => {
                let class = self.builtins.index_error;
                Err(self.raise_with(class, &format!("index {i} out of range for length {len}")))
            }
            Looked::Dict => match self.dict_lookup(a, b)? {
                Some(v) => Ok(v),
                None => {
                    let key = crate::value::dump_value(&self.heap, b);
                    let class = self.builtins.key_error;
                    Err(self.raise_with(class, &key))
                }
            },
            Looked::Unsupported => Err(self.bin_type_error(BinOp::Subsc, a, b)),
        }
    }

    // -- object operator dispatch ------------------------------------------

    fn find_dunder(&self, obj: HeapId, name: &str) -> Option<HeapId> {
        let method = self.get_attr(obj, name)?;
        matches!(
            self.heap.get(method).kind,
            ValueKind::Fun(_) | ValueKind::FunList(_)
        )
        .then_some(method)
    }

    fn dispatch_dunder(&mut self, vm: VmId, name: &str, obj: HeapId, other: HeapId) -> RunResult<HeapId> {
        match self.find_dunder(obj, name) {
            Some(method) => self.call_dunder(vm, method, obj, other),
            None => {
                let cls = self.heap.get(self.heap.get(obj).ty).name.clone();
                Err(self.raise_type_error(&format!("'{cls}' has no '{name}' method")))
            }
        }
    }

    fn call_dunder(&mut self, vm: VmId, method: HeapId, this: HeapId, other: HeapId) -> RunResult<HeapId> {
        self.call_function_with_args(
            vm,
            method,
            vec![CallFrameArg::positional(this), CallFrameArg::positional(other)],
        )
    }

    // -- unary --------------------------------------------------------------

    pub(crate) fn exec_not(&mut self, vm: VmId, dst: Register, src: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        let res = match self.heap.get(v).kind {
            ValueKind::Bool(b) => self.builtins.bool_val(!b),
            ValueKind::Object => self.dispatch_unary(vm, "__not", v)?,
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("cannot negate a {kind} value")));
            }
        };
        self.store(vm, dst, res);
        Ok(())
    }

    pub(crate) fn exec_neg(&mut self, vm: VmId, dst: Register, src: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        let res = match self.heap.get(v).kind {
            ValueKind::Int(i) => self.alloc_int(i.wrapping_neg()),
            ValueKind::Float(f) => self.alloc_float(-f),
            ValueKind::Object => self.dispatch_unary(vm, "__neg", v)?,
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("cannot negate a {kind} value")));
            }
        };
        self.store(vm, dst, res);
        Ok(())
    }

    fn dispatch_unary(&mut self, vm: VmId, name: &str, obj: HeapId) -> RunResult<HeapId> {
        match self.find_dunder(obj, name) {
            Some(method) => {
                self.call_function_with_args(vm, method, vec![CallFrameArg::positional(obj)])
            }
            None => {
                let cls = self.heap.get(self.heap.get(obj).ty).name.clone();
                Err(self.raise_type_error(&format!("'{cls}' has no '{name}' method")))
            }
        }
    }

    // -- dict plumbing -------------------------------------------------------

    /// Looks a key up in a dict value; error when the key is unhashable.
    pub(crate) fn dict_lookup(&mut self, dict: HeapId, key: HeapId) -> RunResult<Option<HeapId>> {
        let Some(hash) = crate::value::value_hash(&self.heap, key) else {
            let kind = self.heap.get(key).kind.kind_name();
            return Err(self.raise_type_error(&format!("{kind} is not hashable")));
        };
        let ValueKind::Dict(data) = &self.heap.get(dict).kind else {
            return Ok(None);
        };
        let Some(bucket) = data.buckets.get(&hash) else {
            return Ok(None);
        };
        for (k, v) in bucket {
            if value_eq(&self.heap, *k, key) {
                return Ok(Some(*v));
            }
        }
        Ok(None)
    }

    /// Inserts or replaces a dict entry.
    pub(crate) fn dict_insert(&mut self, dict: HeapId, key: HeapId, val: HeapId) -> RunResult<()> {
        let Some(hash) = crate::value::value_hash(&self.heap, key) else {
            let kind = self.heap.get(key).kind.kind_name();
            return Err(self.raise_type_error(&format!("{kind} is not hashable")));
        };
        // Find the replacement position first; the bucket borrow must end
        // before we mutate.
        let existing = {
            let ValueKind::Dict(data) = &self.heap.get(dict).kind else {
                return Err(self.raise_type_error("subscript store target is not a Dict"));
            };
            data.buckets.get(&hash).and_then(|bucket| {
                bucket
                    .iter()
                    .position(|(k, _)| value_eq(&self.heap, *k, key))
            })
        };
        let ValueKind::Dict(data) = &mut self.heap.get_mut(dict).kind else {
            unreachable!("checked above");
        };
        let bucket = data.buckets.entry(hash).or_default();
        match existing {
            Some(pos) => bucket[pos].1 = val,
            None => bucket.push((key, val)),
        }
        Ok(())
    }
}

/// Negative indices count from the end; `None` is out of range.
pub(crate) fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let len_i = len as i64;
    let idx = if i < 0 { i + len_i } else { i };
    if (0..len_i).contains(&idx) {
        Some(idx as usize)
    } else {
        None
    }
}

/// Int exponentiation with the same wrap-on-overflow contract as `+`/`*`.
fn wrapping_int_pow(base: i64, mut exp: i64) -> i64 {
    let mut acc: i64 = 1;
    let mut base = base;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}
