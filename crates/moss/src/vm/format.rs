//! Annotations, documentation, output, and the Note converter pipeline.
//!
//! Functions annotated `converter("from", "to")` register into a process-wide
//! graph; `CALL_FORMATTER` finds the shortest chain through it. Functions
//! annotated `generator("fmt")` render buffered Notes of that format when the
//! program ends.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::{
    bytecode::Register,
    frame::CallFrameArg,
    heap::HeapId,
    machine::{Machine, RunError, RunResult, VmId},
    value::ValueKind,
};

impl Machine {
    pub(crate) fn exec_annotate(&mut self, vm: VmId, dst: Register, name: &str, val: Register) -> RunResult<()> {
        let target = self.load(vm, dst);
        let v = self.load(vm, val);
        self.heap.get_mut(target).annotate(name, v);
        if matches!(self.heap.get(target).kind, ValueKind::Fun(_)) {
            self.register_format_annotation(target, name, v)?;
        }
        Ok(())
    }

    pub(crate) fn exec_annotate_mod(&mut self, vm: VmId, name: &str, val: Register) -> RunResult<()> {
        let v = self.load(vm, val);
        match self.interp(vm).module_value {
            Some(module) => self.heap.get_mut(module).annotate(name, v),
            None => self.interp_mut(vm).mod_annotations.push((name.to_string(), v)),
        }
        Ok(())
    }

    pub(crate) fn exec_document(&mut self, vm: VmId, dst: Register, text: &str) -> RunResult<()> {
        let target = self.load(vm, dst);
        let doc = self.alloc_str(text);
        self.heap.get_mut(target).annotate("__doc", doc);
        Ok(())
    }

    /// Recognised format annotations: `converter(["from", "to"])` and
    /// `generator("fmt")`.
    fn register_format_annotation(&mut self, fun: HeapId, name: &str, val: HeapId) -> RunResult<()> {
        match name {
            "converter" => {
                let pair = match &self.heap.get(val).kind {
                    ValueKind::List(items) if items.len() == 2 => {
                        let from = self.string_payload(items[0]);
                        let to = self.string_payload(items[1]);
                        from.zip(to)
                    }
                    _ => None,
                };
                match pair {
                    Some((from, to)) => {
                        self.converters.insert((from, to), fun);
                        Ok(())
                    }
                    None => Err(self.raise_type_error("converter annotation expects a [from, to] string pair")),
                }
            }
            "generator" => {
                let fmt = match &self.heap.get(val).kind {
                    ValueKind::Str(s) => Some(s.clone()),
                    ValueKind::List(items) if items.len() == 1 => self.string_payload(items[0]),
                    _ => None,
                };
                match fmt {
                    Some(fmt) => {
                        self.generators.insert(fmt, fun);
                        Ok(())
                    }
                    None => Err(self.raise_type_error("generator annotation expects a format string")),
                }
            }
            _ => Ok(()),
        }
    }

    fn string_payload(&self, v: HeapId) -> Option<String> {
        match &self.heap.get(v).kind {
            ValueKind::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    // -- OUTPUT -------------------------------------------------------------

    /// Notes are buffered for the end-of-program generator pass; everything
    /// else is written immediately, without a trailing newline.
    pub(crate) fn exec_output(&mut self, vm: VmId, src: Register) -> RunResult<()> {
        let v = self.load(vm, src);
        if matches!(self.heap.get(v).kind, ValueKind::Note { .. }) {
            self.generator_notes.push(v);
            return Ok(());
        }
        let text = self.to_display_string(vm, v)?;
        self.out.write_str(&text);
        Ok(())
    }

    // -- CALL_FORMATTER ------------------------------------------------------

    /// Converts the staged Note argument to the target format through the
    /// shortest converter chain.
    pub(crate) fn exec_call_formatter(&mut self, vm: VmId, dst: Register, target_fmt: &str) -> RunResult<()> {
        let cf = self
            .pop_call_frame(vm)
            .expect("CALL_FORMATTER without an open call frame");
        let Some(note) = cf.args.first().map(|a| a.value) else {
            return Err(self.raise_type_error("CALL_FORMATTER expects one argument"));
        };
        let from = match &self.heap.get(note).kind {
            ValueKind::Note { format, .. } => format.clone(),
            ValueKind::Str(_) => "txt".to_string(),
            _ => {
                let kind = self.heap.get(note).kind.kind_name();
                return Err(self.raise_type_error(&format!("cannot format a {kind} value")));
            }
        };

        if from == target_fmt {
            self.store(vm, dst, note);
            return Ok(());
        }
        let Some(chain) = self.find_converter_chain(&from, target_fmt) else {
            let class = self.builtins.output_error;
            return Err(self.raise_with(class, &format!("no converter chain from '{from}' to '{target_fmt}'")));
        };
        // The intermediate lives only here while the next converter runs, so
        // it must be rooted across the nested run.
        self.temp_roots.push(note);
        let mut result = Ok(note);
        for converter in chain {
            let current = *self.temp_roots.last().expect("temporary root pushed above");
            match self.call_function_with_args(vm, converter, vec![CallFrameArg::positional(current)]) {
                Ok(next) => {
                    *self.temp_roots.last_mut().expect("temporary root pushed above") = next;
                    result = Ok(next);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.temp_roots.pop();
        let converted = result?;
        self.store(vm, dst, converted);
        Ok(())
    }

    /// Breadth-first search over the converter graph; the result applies
    /// source-first.
    pub(crate) fn find_converter_chain(&self, from: &str, to: &str) -> Option<Vec<HeapId>> {
        if let Some(direct) = self.converters.get(&(from.to_string(), to.to_string())) {
            return Some(vec![*direct]);
        }

        let mut queue = VecDeque::new();
        let mut visited = AHashSet::new();
        let mut parent: AHashMap<String, (String, HeapId)> = AHashMap::new();

        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            for ((conv_from, conv_to), fun) in &self.converters {
                if *conv_from != current || visited.contains(conv_to) {
                    continue;
                }
                visited.insert(conv_to.clone());
                parent.insert(conv_to.clone(), (conv_from.clone(), *fun));

                if conv_to == to {
                    let mut path = Vec::new();
                    let mut at = to.to_string();
                    while at != from {
                        let (prev, fun) = parent[&at].clone();
                        path.push(fun);
                        at = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(conv_to.clone());
            }
        }
        None
    }

    /// End-of-program pass: buffered Notes route to their format's
    /// generator; formats without one print their body verbatim. The buffer
    /// stays rooted until every note has been rendered.
    pub(crate) fn output_generator_notes(&mut self) {
        let vm = self.main_vm;
        let mut index = 0;
        while index < self.generator_notes.len() {
            let note = self.generator_notes[index];
            index += 1;
            let (format, body) = match &self.heap.get(note).kind {
                ValueKind::Note { format, body } => (format.clone(), body.clone()),
                _ => continue,
            };
            match self.generators.get(&format).copied() {
                Some(generator) => {
                    match self.call_function_with_args(vm, generator, vec![CallFrameArg::positional(note)]) {
                        Ok(result) => {
                            let text = crate::value::render_value(&self.heap, result);
                            self.out.write_str(&text);
                        }
                        Err(RunError::Raise(exc)) => {
                            let msg = self.exception_message(exc);
                            self.out.write_err(&format!("{msg}\n"));
                            self.exit_code = 1;
                        }
                    }
                }
                None => self.out.write_str(&body),
            }
        }
        self.generator_notes.clear();
    }
}
