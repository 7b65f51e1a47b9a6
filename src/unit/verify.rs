// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structural verification of method bodies.
//!
//! At every instruction the operand stack and locals must have the same shape
//! no matter which path reached it. The verifier computes that shape (the
//! frame) for every reachable instruction with a fix-point over the control
//! flow graph: frames flowing into a join point are unified, and any
//! instruction whose in-frame changed is revisited. Exception handlers are
//! entered from every instruction of their guarded region with the merged
//! locals and a single reference on the stack.
//!
//! Besides type consistency, the verifier checks label hygiene and that
//! exception regions are either disjoint or properly nested.

use std::collections::{HashMap, VecDeque};

use crate::error::VerifyError;

use super::descriptor::{FieldType, MethodDescriptor};
use super::insn::{Insn, Kind, Label};
use super::Method;

/// Result of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Deepest operand stack, counted in slot widths.
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Verify a method body and compute its stack requirements.
pub fn verify_method(method: &Method) -> Result<FrameInfo, VerifyError> {
    if method.code.is_empty() {
        return Err(VerifyError::NoCode);
    }
    let descriptor = method.parsed_descriptor()?;
    let labels = label_positions(&method.code)?;

    for insn in &method.code {
        if let Some(target) = insn.jump_target() {
            resolve(&labels, target)?;
        }
    }

    let mut ranges = Vec::with_capacity(method.handlers.len());
    for region in &method.handlers {
        let start = resolve(&labels, region.start)?;
        let end = resolve(&labels, region.end)?;
        let handler = resolve(&labels, region.handler)?;
        if start >= end {
            return Err(VerifyError::EmptyRegion {
                start: region.start,
                end: region.end,
            });
        }
        ranges.push(GuardRange {
            start,
            end,
            handler,
        });
    }
    check_nesting(&ranges)?;

    let entry = Frame::entry(method, &descriptor)?;
    let mut verifier = Verifier {
        code: &method.code,
        labels: &labels,
        ranges: &ranges,
        returns: descriptor.return_kind(),
        max_locals: method.max_locals,
        frames: vec![None; method.code.len()],
        queue: VecDeque::new(),
        max_stack: 0,
    };
    verifier.run(entry)?;

    Ok(FrameInfo {
        max_stack: verifier.max_stack,
        max_locals: method.max_locals,
    })
}

fn label_positions(code: &[Insn]) -> Result<HashMap<Label, usize>, VerifyError> {
    let mut positions = HashMap::new();
    for (index, insn) in code.iter().enumerate() {
        if let Insn::Label(label) = insn {
            if positions.insert(*label, index).is_some() {
                return Err(VerifyError::DuplicateLabel(*label));
            }
        }
    }
    Ok(positions)
}

fn resolve(labels: &HashMap<Label, usize>, label: Label) -> Result<usize, VerifyError> {
    labels
        .get(&label)
        .copied()
        .ok_or(VerifyError::UndefinedLabel(label))
}

#[derive(Debug, Clone, Copy)]
struct GuardRange {
    start: usize,
    end: usize,
    handler: usize,
}

impl GuardRange {
    fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

fn check_nesting(ranges: &[GuardRange]) -> Result<(), VerifyError> {
    for (i, a) in ranges.iter().enumerate() {
        for (j, b) in ranges.iter().enumerate().skip(i + 1) {
            let disjoint = a.end <= b.start || b.end <= a.start;
            let nested = (a.start <= b.start && b.end <= a.end)
                || (b.start <= a.start && a.end <= b.end);
            if !disjoint && !nested {
                return Err(VerifyError::OverlappingRegions {
                    first: i,
                    second: j,
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    /// `None` marks an unusable slot: never written, the upper half of a
    /// two-slot value, or disagreeing between incoming paths.
    locals: Vec<Option<Kind>>,
    stack: Vec<Kind>,
}

impl Frame {
    fn entry(method: &Method, descriptor: &MethodDescriptor) -> Result<Self, VerifyError> {
        let mut locals = vec![None; method.max_locals as usize];
        let mut slot = 0usize;
        let mut place = |kind: Kind, slot: &mut usize| -> Result<(), VerifyError> {
            let width = kind.width() as usize;
            if *slot + width > locals.len() {
                return Err(VerifyError::LocalOutOfRange {
                    at: 0,
                    slot: *slot as u16,
                    max_locals: method.max_locals,
                });
            }
            locals[*slot] = Some(kind);
            *slot += width;
            Ok(())
        };
        if !method.access.is_static() {
            place(Kind::Ref, &mut slot)?;
        }
        for param in &descriptor.params {
            place(param.kind(), &mut slot)?;
        }
        Ok(Self {
            locals,
            stack: Vec::new(),
        })
    }

    fn depth(&self) -> u16 {
        self.stack.iter().map(|k| k.width()).sum()
    }

    fn push(&mut self, kind: Kind) {
        self.stack.push(kind);
    }

    fn pop_any(&mut self, at: usize) -> Result<Kind, VerifyError> {
        self.stack.pop().ok_or(VerifyError::StackUnderflow { at })
    }

    fn pop(&mut self, at: usize, expected: Kind) -> Result<(), VerifyError> {
        let found = self.pop_any(at)?;
        if found != expected {
            return Err(VerifyError::TypeMismatch {
                at,
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn pop_single(&mut self, at: usize) -> Result<Kind, VerifyError> {
        let found = self.pop_any(at)?;
        if found.width() != 1 {
            return Err(VerifyError::TypeMismatch {
                at,
                expected: "single-slot value".to_string(),
                found: found.to_string(),
            });
        }
        Ok(found)
    }

    fn pop_params(&mut self, at: usize, descriptor: &MethodDescriptor) -> Result<(), VerifyError> {
        for param in descriptor.params.iter().rev() {
            self.pop(at, param.kind())?;
        }
        Ok(())
    }

    /// Unify `other` into `self`, returning whether anything changed.
    fn merge(&mut self, other: &Frame, at: usize) -> Result<bool, VerifyError> {
        if self.stack != other.stack {
            return Err(VerifyError::InconsistentStack {
                at,
                left: describe(&self.stack),
                right: describe(&other.stack),
            });
        }
        let mut changed = false;
        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            if mine.is_some() && *mine != *theirs {
                *mine = None;
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn describe(stack: &[Kind]) -> String {
    let kinds: Vec<String> = stack.iter().map(|k| k.to_string()).collect();
    format!("[{}]", kinds.join(", "))
}

struct Verifier<'a> {
    code: &'a [Insn],
    labels: &'a HashMap<Label, usize>,
    ranges: &'a [GuardRange],
    returns: Option<Kind>,
    max_locals: u16,
    frames: Vec<Option<Frame>>,
    queue: VecDeque<usize>,
    max_stack: u16,
}

impl Verifier<'_> {
    fn run(&mut self, entry: Frame) -> Result<(), VerifyError> {
        self.flow_into(0, &entry)?;

        while let Some(index) = self.queue.pop_front() {
            let Some(before) = self.frames[index].clone() else {
                continue;
            };
            self.flow_into_handlers(index, &before)?;

            let mut after = before;
            self.step(index, &mut after)?;
            self.max_stack = self.max_stack.max(after.depth());

            if matches!(self.code[index], Insn::Store(..)) {
                self.flow_into_handlers(index, &after)?;
            }

            let insn = &self.code[index];
            if let Some(target) = insn.jump_target() {
                let position = resolve(self.labels, target)?;
                self.flow_into(position, &after)?;
            }
            if insn.falls_through() {
                let next = index + 1;
                if next >= self.code.len() {
                    return Err(VerifyError::FallsOffEnd);
                }
                self.flow_into(next, &after)?;
            }
        }
        Ok(())
    }

    fn flow_into(&mut self, index: usize, frame: &Frame) -> Result<(), VerifyError> {
        self.max_stack = self.max_stack.max(frame.depth());
        match &mut self.frames[index] {
            Some(existing) => {
                if existing.merge(frame, index)? {
                    self.queue.push_back(index);
                }
            }
            slot @ None => {
                *slot = Some(frame.clone());
                self.queue.push_back(index);
            }
        }
        Ok(())
    }

    fn flow_into_handlers(&mut self, index: usize, frame: &Frame) -> Result<(), VerifyError> {
        let handlers: Vec<usize> = self
            .ranges
            .iter()
            .filter(|r| r.covers(index))
            .map(|r| r.handler)
            .collect();
        for handler in handlers {
            let caught = Frame {
                locals: frame.locals.clone(),
                stack: vec![Kind::Ref],
            };
            self.flow_into(handler, &caught)?;
        }
        Ok(())
    }

    fn check_slot(&self, at: usize, kind: Kind, slot: u16) -> Result<(), VerifyError> {
        if slot as usize + kind.width() as usize > self.max_locals as usize {
            return Err(VerifyError::LocalOutOfRange {
                at,
                slot,
                max_locals: self.max_locals,
            });
        }
        Ok(())
    }

    fn step(&self, at: usize, frame: &mut Frame) -> Result<(), VerifyError> {
        match &self.code[at] {
            Insn::Label(_) | Insn::Goto(_) => {}
            Insn::Const(constant) => frame.push(constant.kind()),
            Insn::Load(kind, slot) => {
                self.check_slot(at, *kind, *slot)?;
                if frame.locals[*slot as usize] != Some(*kind) {
                    return Err(VerifyError::UninitializedLocal {
                        at,
                        slot: *slot,
                        kind: kind.to_string(),
                    });
                }
                frame.push(*kind);
            }
            Insn::Store(kind, slot) => {
                self.check_slot(at, *kind, *slot)?;
                frame.pop(at, *kind)?;
                let slot = *slot as usize;
                if slot > 0 {
                    if let Some(previous) = frame.locals[slot - 1] {
                        if previous.width() == 2 {
                            frame.locals[slot - 1] = None;
                        }
                    }
                }
                frame.locals[slot] = Some(*kind);
                if kind.width() == 2 {
                    frame.locals[slot + 1] = None;
                }
            }
            Insn::Arith(_, kind) => {
                frame.pop(at, *kind)?;
                frame.pop(at, *kind)?;
                frame.push(*kind);
            }
            Insn::Dup => {
                let top = frame.pop_single(at)?;
                frame.push(top);
                frame.push(top);
            }
            Insn::Pop => {
                frame.pop_single(at)?;
            }
            Insn::Swap => {
                let top = frame.pop_single(at)?;
                let below = frame.pop_single(at)?;
                frame.push(top);
                frame.push(below);
            }
            Insn::New(_) => frame.push(Kind::Ref),
            Insn::NewArray(_) => {
                frame.pop(at, Kind::Int)?;
                frame.push(Kind::Ref);
            }
            Insn::ArrayStore => {
                frame.pop(at, Kind::Ref)?;
                frame.pop(at, Kind::Int)?;
                frame.pop(at, Kind::Ref)?;
            }
            Insn::ArrayLoad => {
                frame.pop(at, Kind::Int)?;
                frame.pop(at, Kind::Ref)?;
                frame.push(Kind::Ref);
            }
            Insn::GetStatic(member) => {
                frame.push(FieldType::parse(&member.descriptor)?.kind());
            }
            Insn::PutStatic(member) => {
                frame.pop(at, FieldType::parse(&member.descriptor)?.kind())?;
            }
            Insn::GetField(member) => {
                let kind = FieldType::parse(&member.descriptor)?.kind();
                frame.pop(at, Kind::Ref)?;
                frame.push(kind);
            }
            Insn::PutField(member) => {
                frame.pop(at, FieldType::parse(&member.descriptor)?.kind())?;
                frame.pop(at, Kind::Ref)?;
            }
            Insn::InvokeStatic(member) => {
                let descriptor = MethodDescriptor::parse(&member.descriptor)?;
                frame.pop_params(at, &descriptor)?;
                if let Some(kind) = descriptor.return_kind() {
                    frame.push(kind);
                }
            }
            Insn::InvokeVirtual(member) | Insn::InvokeSpecial(member) => {
                let descriptor = MethodDescriptor::parse(&member.descriptor)?;
                frame.pop_params(at, &descriptor)?;
                frame.pop(at, Kind::Ref)?;
                if let Some(kind) = descriptor.return_kind() {
                    frame.push(kind);
                }
            }
            Insn::If(_, _) => frame.pop(at, Kind::Int)?,
            Insn::IfCmp(_, _) => {
                frame.pop(at, Kind::Int)?;
                frame.pop(at, Kind::Int)?;
            }
            Insn::Return(kind) => {
                if *kind != self.returns {
                    return Err(VerifyError::TypeMismatch {
                        at,
                        expected: return_name(self.returns),
                        found: return_name(*kind),
                    });
                }
                if let Some(kind) = kind {
                    frame.pop(at, *kind)?;
                }
            }
            Insn::Throw => frame.pop(at, Kind::Ref)?,
        }
        Ok(())
    }
}

fn return_name(kind: Option<Kind>) -> String {
    match kind {
        Some(kind) => format!("{} return", kind),
        None => "void return".to_string(),
    }
}
