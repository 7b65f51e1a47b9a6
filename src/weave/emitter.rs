// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instruction emission for one method being woven.

use crate::error::WeaveError;
use crate::unit::{Insn, Kind, Label, Method, MethodDescriptor};

use super::labels::{label_array, ArgumentLayout};
use super::model::MetricDescriptor;

/// Builds the rewritten body of a single method.
///
/// Labels and locals handed out here never collide with those of the
/// original body: numbering starts past the highest label the method uses
/// and past its `max_locals`.
#[derive(Debug)]
pub struct MethodWeaver<'a> {
    class_name: &'a str,
    layout: ArgumentLayout,
    next_label: u32,
    next_local: u16,
    code: Vec<Insn>,
}

impl<'a> MethodWeaver<'a> {
    pub fn new(class_name: &'a str, method: &Method, descriptor: &MethodDescriptor) -> Self {
        Self {
            class_name,
            layout: ArgumentLayout::new(
                class_name,
                method.signature(),
                method.access.is_static(),
                descriptor,
            ),
            next_label: method.next_label(),
            next_local: method.max_locals,
            code: Vec::with_capacity(method.code.len() + 32),
        }
    }

    pub fn class_name(&self) -> &str {
        self.class_name
    }

    pub fn layout(&self) -> &ArgumentLayout {
        &self.layout
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocate a fresh local of the given kind, returning its slot.
    pub fn new_local(&mut self, kind: Kind) -> u16 {
        let slot = self.next_local;
        self.next_local += kind.width();
        slot
    }

    pub fn mark(&mut self, label: Label) {
        self.code.push(Insn::Label(label));
    }

    pub fn emit(&mut self, insn: Insn) {
        self.code.push(insn);
    }

    pub fn emit_all(&mut self, insns: impl IntoIterator<Item = Insn>) {
        self.code.extend(insns);
    }

    /// Push the class's static handle for `metric`.
    pub fn load_handle(&mut self, metric: &MetricDescriptor) {
        let insn = Insn::get_static(
            self.class_name,
            metric.slot_name(),
            metric.kind.handle_descriptor(),
        );
        self.code.push(insn);
    }

    /// Push the runtime label values for `metric`.
    pub fn push_labels(&mut self, metric: &MetricDescriptor) -> Result<(), WeaveError> {
        let insns = label_array(metric, &self.layout)?;
        self.code.extend(insns);
        Ok(())
    }

    /// Emit `handle, labels, call` for a recording entry point.
    pub fn record(&mut self, metric: &MetricDescriptor, call: Insn) -> Result<(), WeaveError> {
        self.load_handle(metric);
        self.push_labels(metric)?;
        self.emit(call);
        Ok(())
    }

    /// Body built so far and the locals it needs.
    pub fn finish(self) -> (Vec<Insn>, u16) {
        (self.code, self.next_local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AccessFlags, MethodBuilder};
    use crate::weave::model::MetricKind;

    #[test]
    fn test_fresh_labels_and_locals() {
        let mut mb = MethodBuilder::new(AccessFlags::PUBLIC, "run", "(J)V");
        let l = mb.new_label();
        mb.mark(l).emit(Insn::Return(None));
        let method = mb.build();
        let descriptor = method.parsed_descriptor().unwrap();

        let mut w = MethodWeaver::new("a/B", &method, &descriptor);
        assert_eq!(w.new_label(), Label(1));
        assert_eq!(w.new_local(Kind::Long), 3);
        assert_eq!(w.new_local(Kind::Ref), 5);
        let (_, max_locals) = w.finish();
        assert_eq!(max_locals, 6);
    }

    #[test]
    fn test_record_sequence() {
        let method = MethodBuilder::new(AccessFlags::STATIC, "run", "()V").build();
        let descriptor = method.parsed_descriptor().unwrap();
        let metric = MetricDescriptor::new(MetricKind::Counter, "calls", None, vec![]).unwrap();

        let mut w = MethodWeaver::new("a/B", &method, &descriptor);
        w.record(&metric, crate::weave::contract::record_count()).unwrap();
        let (code, _) = w.finish();
        assert_eq!(
            code[0],
            Insn::get_static("a/B", "__metric$counter$calls", "Lweaver/runtime/Counter;")
        );
        assert_eq!(code[1], Insn::Const(crate::unit::Constant::Null));
        assert_eq!(code[2], crate::weave::contract::record_count());
    }
}
