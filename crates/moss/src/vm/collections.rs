//! Container construction, subscripts, switch, and iteration opcodes.

use crate::{
    bytecode::{Address, RangeForm, Register},
    frame::CallFrameArg,
    heap::HeapId,
    machine::{Machine, RunError, RunResult, VmId},
    types::{ClassData, DictData, RangeCursor, RangeData, SuperData},
    value::{value_eq, Value, ValueKind},
    vm::binary::resolve_index,
};

impl Machine {
    // -- builders -----------------------------------------------------------

    pub(crate) fn exec_build_list(&mut self, vm: VmId, dst: Register) -> RunResult<()> {
        let vals = self.interp_mut(vm).pending_lists.remove(&dst).unwrap_or_default();
        let list = self.alloc_list(vals);
        self.store(vm, dst, list);
        Ok(())
    }

    pub(crate) fn exec_build_dict(&mut self, vm: VmId, dst: Register, keys: Register, vals: Register) -> RunResult<()> {
        let keys_v = self.load(vm, keys);
        let vals_v = self.load(vm, vals);
        let (keys, vals) = match (&self.heap.get(keys_v).kind, &self.heap.get(vals_v).kind) {
            (ValueKind::List(k), ValueKind::List(v)) => (k.clone(), v.clone()),
            _ => return Err(self.raise_type_error("BUILD_DICT expects two lists")),
        };
        assert_eq!(keys.len(), vals.len(), "dict key and value lists must match");
        let dict = self.alloc_dict(DictData::default());
        for (k, v) in keys.into_iter().zip(vals) {
            self.dict_insert(dict, k, v)?;
        }
        self.store(vm, dst, dict);
        Ok(())
    }

    pub(crate) fn exec_build_enum(&mut self, vm: VmId, dst: Register, vals: Register, name: &str) -> RunResult<()> {
        let vals_v = self.load(vm, vals);
        let names: Vec<String> = match &self.heap.get(vals_v).kind {
            ValueKind::List(items) => items
                .iter()
                .map(|v| match &self.heap.get(*v).kind {
                    ValueKind::Str(s) => Ok(s.clone()),
                    _ => Err(()),
                })
                .collect::<Result<_, _>>()
                .map_err(|()| self.raise_type_error("enum values must be strings"))?,
            _ => return Err(self.raise_type_error("BUILD_ENUM expects a list of names")),
        };
        let enum_ty = self
            .heap
            .alloc(Value::new(ValueKind::EnumType(Vec::new()), name, self.builtins.enum_cls));
        let mut members = Vec::with_capacity(names.len());
        for value_name in names {
            members.push(self.heap.alloc(Value::new(ValueKind::EnumValue, value_name, enum_ty)));
        }
        if let ValueKind::EnumType(slots) = &mut self.heap.get_mut(enum_ty).kind {
            *slots = members;
        }
        self.store(vm, dst, enum_ty);
        Ok(())
    }

    /// `BUILD_SPACE` consumes the frame its body populated; anonymous spaces
    /// spill into the enclosing frame so their names stay visible.
    pub(crate) fn exec_build_space(&mut self, vm: VmId, dst: Register, name: &str, anonymous: bool) -> RunResult<()> {
        let body_frame = self.pop_frame(vm);
        let space = self.heap.alloc(Value::new(
            ValueKind::Space {
                vm,
                extra_owners: Vec::new(),
                anonymous,
            },
            name,
            self.builtins.space,
        ));
        self.heap.get_mut(space).attrs = Some(body_frame);
        if let Some(owner) = self.interp(vm).module_value {
            self.heap.get_mut(space).owner = Some(owner);
        }
        if anonymous {
            let frame = self.cur_frame(vm);
            self.pools.get_mut(frame).push_spilled_value(space);
        }
        self.store(vm, dst, space);
        Ok(())
    }

    pub(crate) fn exec_push_parent(&mut self, vm: VmId, parent: Register) -> RunResult<()> {
        let v = self.load(vm, parent);
        if !matches!(self.heap.get(v).kind, ValueKind::Class(_)) {
            let kind = self.heap.get(v).kind.kind_name();
            return Err(self.raise_type_error(&format!("a {kind} value cannot be a parent class")));
        }
        self.interp_mut(vm).parent_list.push(v);
        Ok(())
    }

    /// `BUILD_CLASS` consumes the class-body frame as the attribute pool and
    /// the collected parent list as the super chain.
    pub(crate) fn exec_build_class(&mut self, vm: VmId, dst: Register, name: &str) -> RunResult<()> {
        let body_frame = self.pop_frame(vm);
        let supers = std::mem::take(&mut self.interp_mut(vm).parent_list);
        let class = self
            .heap
            .alloc(Value::new(ValueKind::Class(ClassData { supers }), name, self.builtins.type_cls));
        self.heap.get_mut(class).attrs = Some(body_frame);
        if let Some(owner) = self.interp(vm).module_value {
            self.heap.get_mut(class).owner = Some(owner);
        }

        // Methods defined in the body learn their parent class.
        let methods: Vec<HeapId> = self.pools.get(body_frame).values().collect();
        for m in methods {
            match &mut self.heap.get_mut(m).kind {
                ValueKind::Fun(data) => data.parent_class = Some(class),
                ValueKind::FunList(funs) => {
                    for f in funs.clone() {
                        if let ValueKind::Fun(data) = &mut self.heap.get_mut(f).kind {
                            data.parent_class = Some(class);
                        }
                    }
                }
                _ => {}
            }
        }
        self.store(vm, dst, class);
        Ok(())
    }

    pub(crate) fn exec_create_range(
        &mut self,
        vm: VmId,
        form: RangeForm,
        dst: Register,
        start: Register,
        step: Register,
        end: Register,
    ) -> RunResult<()> {
        let start = if form.start_const {
            self.load_const(vm, start)
        } else {
            self.load(vm, start)
        };
        let step = if form.step_const {
            self.load_const(vm, step)
        } else {
            self.load(vm, step)
        };
        let end = if form.end_const {
            self.load_const(vm, end)
        } else {
            self.load(vm, end)
        };

        for v in [start, end] {
            if self.heap.get(v).as_float().is_none() {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("range bounds must be numeric, got {kind}")));
            }
        }

        let range = self.heap.alloc(Value::new(
            ValueKind::Range(RangeData {
                start,
                step,
                end,
                cursor: RangeCursor::Pending,
            }),
            "Range",
            self.builtins.range,
        ));
        self.set_attr(range, "start", start)?;
        self.set_attr(range, "step", step)?;
        self.set_attr(range, "end", end)?;
        self.store(vm, dst, range);
        Ok(())
    }

    // -- switch -------------------------------------------------------------

    pub(crate) fn exec_switch(
        &mut self,
        vm: VmId,
        src: Register,
        vals: Register,
        addrs: Register,
        default_addr: Address,
    ) -> RunResult<()> {
        let v = self.load(vm, src);
        let vals_v = self.load(vm, vals);
        let addrs_v = self.load(vm, addrs);
        let (candidates, targets) = match (&self.heap.get(vals_v).kind, &self.heap.get(addrs_v).kind) {
            (ValueKind::List(c), ValueKind::List(t)) => (c.clone(), t.clone()),
            _ => return Err(self.raise_type_error("SWITCH expects value and address lists")),
        };
        assert_eq!(candidates.len(), targets.len(), "switch value and address lists must match");
        for (candidate, target) in candidates.iter().zip(&targets) {
            if value_eq(&self.heap, v, *candidate) {
                let ValueKind::Int(addr) = self.heap.get(*target).kind else {
                    return Err(self.raise_type_error("SWITCH addresses must be Ints"));
                };
                self.set_bci(vm, addr as Address);
                return Ok(());
            }
        }
        self.set_bci(vm, default_addr);
        Ok(())
    }

    // -- subscript stores and spreads ---------------------------------------

    pub(crate) fn set_subsc(&mut self, vm: VmId, target: HeapId, key: HeapId, val: HeapId) -> RunResult<()> {
        match &self.heap.get(target).kind {
            ValueKind::List(vals) => {
                let len = vals.len();
                let ValueKind::Int(i) = self.heap.get(key).kind else {
                    let kind = self.heap.get(key).kind.kind_name();
                    return Err(self.raise_type_error(&format!("list indices must be Ints, got {kind}")));
                };
                match resolve_index(i, len) {
                    Some(idx) => {
                        if let ValueKind::List(vals) = &mut self.heap.get_mut(target).kind {
                            vals[idx] = val;
                        }
                        Ok(())
                    }
                    None => {
                        let class = self.builtins.index_error;
                        Err(self.raise_with(class, &format!("index {i} out of range for length {len}")))
                    }
                }
            }
            ValueKind::Dict(_) => self.dict_insert(target, key, val),
            ValueKind::Object => {
                let Some(method) = self.get_attr(target, "__setsubsc") else {
                    let cls = self.heap.get(self.heap.get(target).ty).name.clone();
                    return Err(self.raise_type_error(&format!("'{cls}' has no '__setsubsc' method")));
                };
                self.call_function_with_args(
                    vm,
                    method,
                    vec![
                        CallFrameArg::positional(target),
                        CallFrameArg::positional(key),
                        CallFrameArg::positional(val),
                    ],
                )?;
                Ok(())
            }
            _ => {
                let kind = self.heap.get(target).kind.kind_name();
                Err(self.raise_type_error(&format!("a {kind} value does not support subscript assignment")))
            }
        }
    }

    /// `SUBSC_LAST dst, src, #i`: the element `i` places from the end.
    pub(crate) fn exec_subsc_last(&mut self, vm: VmId, dst: Register, src: Register, cindex: Register) -> RunResult<()> {
        let s = self.load(vm, src);
        let idx_v = self.load_const(vm, cindex);
        let ValueKind::Int(i) = self.heap.get(idx_v).kind else {
            return Err(self.raise_type_error("SUBSC_LAST index must be an Int"));
        };
        let len = self.seq_len(s)?;
        let Some(pos) = (len as i64).checked_sub(i).filter(|p| (0..len as i64).contains(p)) else {
            let class = self.builtins.index_error;
            return Err(self.raise_with(class, &format!("index {i} from the end is out of range for length {len}")));
        };
        let key = self.alloc_int(pos);
        let v = self.get_subsc(s, key)?;
        self.store(vm, dst, v);
        Ok(())
    }

    /// `SUBSC_REST dst, src, #c` with `c` packing the leading fixed-target
    /// count in the low 32 bits and the trailing count in the high 32 bits:
    /// the slice `src[k .. len - t]`.
    pub(crate) fn exec_subsc_rest(&mut self, vm: VmId, dst: Register, src: Register, cindex: Register) -> RunResult<()> {
        let s = self.load(vm, src);
        let packed_v = self.load_const(vm, cindex);
        let ValueKind::Int(packed) = self.heap.get(packed_v).kind else {
            return Err(self.raise_type_error("SUBSC_REST counts must be an Int"));
        };
        let lead = (packed & 0xFFFF_FFFF) as usize;
        let trail = (packed >> 32) as usize;
        let len = self.seq_len(s)?;
        if len < lead + trail {
            let class = self.builtins.index_error;
            return Err(self.raise_with(class, &format!(
                "cannot unpack {} fixed values from a sequence of length {len}",
                lead + trail
            )));
        }
        let hi = len - trail;
        let v = match &self.heap.get(s).kind {
            ValueKind::List(vals) => {
                let slice = vals[lead..hi].to_vec();
                self.alloc_list(slice)
            }
            ValueKind::Str(text) => {
                let slice: String = text.chars().skip(lead).take(hi - lead).collect();
                self.alloc_str(&slice)
            }
            ValueKind::Bytes(bytes) => {
                let slice = bytes[lead..hi].to_vec();
                self.heap
                    .alloc(Value::new(ValueKind::Bytes(slice), "Bytes", self.builtins.bytes))
            }
            _ => unreachable!("seq_len admitted the kind"),
        };
        self.store(vm, dst, v);
        Ok(())
    }

    fn seq_len(&mut self, s: HeapId) -> RunResult<usize> {
        match &self.heap.get(s).kind {
            ValueKind::List(vals) => Ok(vals.len()),
            ValueKind::Str(text) => Ok(text.chars().count()),
            ValueKind::Bytes(bytes) => Ok(bytes.len()),
            _ => {
                let kind = self.heap.get(s).kind.kind_name();
                Err(self.raise_type_error(&format!("a {kind} value cannot be sliced")))
            }
        }
    }

    // -- iteration ----------------------------------------------------------

    pub(crate) fn exec_iter(&mut self, vm: VmId, iterator: Register, collection: Register) -> RunResult<()> {
        let v = self.load(vm, collection);
        let it = self.iter_value(vm, v)?;
        self.store(vm, iterator, it);
        Ok(())
    }

    pub(crate) fn exec_for(&mut self, vm: VmId, index: Register, iterator: Register, addr: Address) -> RunResult<()> {
        let it = self.load(vm, iterator);
        match self.next_value(vm, it) {
            Ok(v) => {
                self.store(vm, index, v);
                Ok(())
            }
            Err(RunError::Raise(e)) if self.exception_matches(e, self.builtins.stop_iteration) => {
                self.set_bci(vm, addr);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `FOR_MULTI` additionally unpacks each element into `count` registers
    /// starting at `index`.
    pub(crate) fn exec_for_multi(
        &mut self,
        vm: VmId,
        index: Register,
        count: u32,
        iterator: Register,
        addr: Address,
    ) -> RunResult<()> {
        let it = self.load(vm, iterator);
        let element = match self.next_value(vm, it) {
            Ok(v) => v,
            Err(RunError::Raise(e)) if self.exception_matches(e, self.builtins.stop_iteration) => {
                self.set_bci(vm, addr);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let parts = match &self.heap.get(element).kind {
            ValueKind::List(vals) if vals.len() == count as usize => vals.clone(),
            ValueKind::List(vals) => {
                let got = vals.len();
                let class = self.builtins.value_error;
                return Err(self.raise_with(class, &format!("expected {count} values to unpack, got {got}")));
            }
            _ => {
                let kind = self.heap.get(element).kind.kind_name();
                let class = self.builtins.value_error;
                return Err(self.raise_with(class, &format!("cannot unpack a {kind} value")));
            }
        };
        for (offset, part) in parts.into_iter().enumerate() {
            self.store(vm, index + offset as u32, part);
        }
        Ok(())
    }

    /// `__iter`: builds a fresh iterator over a value.
    pub(crate) fn iter_value(&mut self, vm: VmId, v: HeapId) -> RunResult<HeapId> {
        let ty = self.heap.get(v).ty;
        let it = match &self.heap.get(v).kind {
            ValueKind::Str(_) | ValueKind::Note { .. } => {
                self.heap
                    .alloc(Value::new(ValueKind::StrIter { src: v, cursor: 0 }, "StringIterator", ty))
            }
            ValueKind::Bytes(_) => {
                self.heap
                    .alloc(Value::new(ValueKind::BytesIter { src: v, cursor: 0 }, "BytesIterator", ty))
            }
            ValueKind::List(_) => {
                self.heap
                    .alloc(Value::new(ValueKind::ListIter { src: v, cursor: 0 }, "ListIterator", ty))
            }
            ValueKind::Dict(_) => {
                self.heap
                    .alloc(Value::new(ValueKind::DictIter { src: v, cursor: 0 }, "DictIterator", ty))
            }
            ValueKind::FunList(_) => self.heap.alloc(Value::new(
                ValueKind::FunListIter { src: v, cursor: 0 },
                "FunctionListIterator",
                ty,
            )),
            ValueKind::Range(data) => {
                let reset = RangeData {
                    cursor: RangeCursor::Pending,
                    ..*data
                };
                self.heap
                    .alloc(Value::new(ValueKind::Range(reset), "Range", self.builtins.range))
            }
            // Iterating an iterator returns the iterator itself.
            ValueKind::StrIter { .. }
            | ValueKind::BytesIter { .. }
            | ValueKind::ListIter { .. }
            | ValueKind::DictIter { .. }
            | ValueKind::FunListIter { .. } => v,
            ValueKind::Object => {
                let Some(method) = self.get_attr(v, "__iter") else {
                    let cls = self.heap.get(ty).name.clone();
                    return Err(self.raise_type_error(&format!("'{cls}' is not iterable")));
                };
                return self.call_function_with_args(vm, method, vec![CallFrameArg::positional(v)]);
            }
            _ => {
                let kind = self.heap.get(v).kind.kind_name();
                return Err(self.raise_type_error(&format!("a {kind} value is not iterable")));
            }
        };
        Ok(it)
    }

    /// `__next`: advances an iterator; `StopIteration` when exhausted.
    pub(crate) fn next_value(&mut self, vm: VmId, it: HeapId) -> RunResult<HeapId> {
        match &self.heap.get(it).kind {
            ValueKind::StrIter { src, cursor } => {
                let (src, cursor) = (*src, *cursor);
                let text = match &self.heap.get(src).kind {
                    ValueKind::Str(s) => s,
                    ValueKind::Note { body, .. } => body,
                    _ => return Err(self.raise_type_error("string iterator source changed kind")),
                };
                match text[cursor..].chars().next() {
                    Some(c) => {
                        let step = c.len_utf8();
                        if let ValueKind::StrIter { cursor, .. } = &mut self.heap.get_mut(it).kind {
                            *cursor += step;
                        }
                        Ok(self.alloc_str(&c.to_string()))
                    }
                    None => Err(self.raise_stop_iteration()),
                }
            }
            ValueKind::BytesIter { src, cursor } => {
                let (src, cursor) = (*src, *cursor);
                let byte = match &self.heap.get(src).kind {
                    ValueKind::Bytes(b) => b.get(cursor).copied(),
                    _ => return Err(self.raise_type_error("bytes iterator source changed kind")),
                };
                match byte {
                    Some(b) => {
                        if let ValueKind::BytesIter { cursor, .. } = &mut self.heap.get_mut(it).kind {
                            *cursor += 1;
                        }
                        Ok(self.alloc_int(i64::from(b)))
                    }
                    None => Err(self.raise_stop_iteration()),
                }
            }
            ValueKind::ListIter { src, cursor } => {
                let (src, cursor) = (*src, *cursor);
                let element = match &self.heap.get(src).kind {
                    ValueKind::List(vals) => vals.get(cursor).copied(),
                    _ => return Err(self.raise_type_error("list iterator source changed kind")),
                };
                match element {
                    Some(v) => {
                        if let ValueKind::ListIter { cursor, .. } = &mut self.heap.get_mut(it).kind {
                            *cursor += 1;
                        }
                        Ok(v)
                    }
                    None => Err(self.raise_stop_iteration()),
                }
            }
            ValueKind::DictIter { src, cursor } => {
                let (src, cursor) = (*src, *cursor);
                let entry = match &self.heap.get(src).kind {
                    ValueKind::Dict(d) => d.entry_at(cursor),
                    _ => return Err(self.raise_type_error("dict iterator source changed kind")),
                };
                match entry {
                    Some((k, v)) => {
                        if let ValueKind::DictIter { cursor, .. } = &mut self.heap.get_mut(it).kind {
                            *cursor += 1;
                        }
                        Ok(self.alloc_list(vec![k, v]))
                    }
                    None => Err(self.raise_stop_iteration()),
                }
            }
            ValueKind::FunListIter { src, cursor } => {
                let (src, cursor) = (*src, *cursor);
                let fun = match &self.heap.get(src).kind {
                    ValueKind::FunList(funs) => funs.get(cursor).copied(),
                    _ => return Err(self.raise_type_error("function list iterator source changed kind")),
                };
                match fun {
                    Some(f) => {
                        if let ValueKind::FunListIter { cursor, .. } = &mut self.heap.get_mut(it).kind {
                            *cursor += 1;
                        }
                        Ok(f)
                    }
                    None => Err(self.raise_stop_iteration()),
                }
            }
            ValueKind::Range(_) => self.next_range(it),
            ValueKind::Object => {
                let Some(method) = self.get_attr(it, "__next") else {
                    let cls = self.heap.get(self.heap.get(it).ty).name.clone();
                    return Err(self.raise_type_error(&format!("'{cls}' has no '__next' method")));
                };
                self.call_function_with_args(vm, method, vec![CallFrameArg::positional(it)])
            }
            _ => {
                let kind = self.heap.get(it).kind.kind_name();
                Err(self.raise_type_error(&format!("a {kind} value is not an iterator")))
            }
        }
    }

    fn next_range(&mut self, range: HeapId) -> RunResult<HeapId> {
        let ValueKind::Range(data) = &self.heap.get(range).kind else {
            unreachable!("caller matched Range");
        };
        let data = *data;
        let start = self.heap.get(data.start).as_float().expect("range bounds are numeric");
        let end = self.heap.get(data.end).as_float().expect("range bounds are numeric");
        let int_range = matches!(self.heap.get(data.start).kind, ValueKind::Int(_))
            && matches!(self.heap.get(data.end).kind, ValueKind::Int(_))
            && !matches!(self.heap.get(data.step).kind, ValueKind::Float(_));

        // Step defaults to 1, or −1 for a descending range with no explicit
        // step.
        let step = match self.heap.get(data.step).kind {
            ValueKind::Int(i) => i as f64,
            ValueKind::Float(f) => f,
            ValueKind::Nil => {
                if start > end {
                    -1.0
                } else {
                    1.0
                }
            }
            _ => {
                let kind = self.heap.get(data.step).kind.kind_name();
                return Err(self.raise_type_error(&format!("range step must be numeric, got {kind}")));
            }
        };
        if step == 0.0 {
            let class = self.builtins.value_error;
            return Err(self.raise_with(class, "range step must not be zero"));
        }

        let current = match data.cursor {
            RangeCursor::Done => return Err(self.raise_stop_iteration()),
            RangeCursor::Pending => start,
            RangeCursor::Int(i) => i as f64,
            RangeCursor::Float(f) => f,
        };
        let exhausted = if step > 0.0 { current >= end } else { current <= end };
        if exhausted {
            if let ValueKind::Range(d) = &mut self.heap.get_mut(range).kind {
                d.cursor = RangeCursor::Done;
            }
            return Err(self.raise_stop_iteration());
        }

        let next = current + step;
        let (cursor, yielded) = if int_range {
            (RangeCursor::Int(next as i64), self.alloc_int(current as i64))
        } else {
            (RangeCursor::Float(next), self.alloc_float(current))
        };
        if let ValueKind::Range(d) = &mut self.heap.get_mut(range).kind {
            d.cursor = cursor;
        }
        Ok(yielded)
    }
}

// Super is constructed by the standard library; keep the payload path alive
// for it.
impl Machine {
    pub(crate) fn alloc_super(&mut self, instance: HeapId, parent: HeapId) -> HeapId {
        self.heap.alloc(Value::new(
            ValueKind::Super(SuperData { instance, parent }),
            "super",
            self.builtins.super_cls,
        ))
    }
}
