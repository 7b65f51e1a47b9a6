// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Programmatic construction of class units.
//!
//! ```rust,ignore
//! use weaver::unit::{AccessFlags, ClassBuilder, Insn, MethodBuilder};
//!
//! let mut run = MethodBuilder::new(AccessFlags::PUBLIC, "run", "()V");
//! run.emit(Insn::Return(None));
//! let unit = ClassBuilder::new("com/acme/Job").method(run.build()).build();
//! ```

use super::descriptor::MethodDescriptor;
use super::{
    AccessFlags, Annotation, ClassUnit, Field, Insn, Label, Method, Region, CONSTRUCTOR,
    OBJECT_CLASS,
};

/// Builder for [`ClassUnit`].
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    unit: ClassUnit,
}

impl ClassBuilder {
    /// Start a public class extending `java/lang/Object`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            unit: ClassUnit {
                name: name.into(),
                access: AccessFlags(AccessFlags::PUBLIC),
                super_name: Some(OBJECT_CLASS.to_string()),
                fields: Vec::new(),
                methods: Vec::new(),
                annotations: Vec::new(),
            },
        }
    }

    pub fn access(mut self, flags: u16) -> Self {
        self.unit.access = AccessFlags(flags);
        self
    }

    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.unit.super_name = Some(super_name.into());
        self
    }

    pub fn field(mut self, access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.unit.fields.push(Field {
            access: AccessFlags(access),
            name: name.into(),
            descriptor: descriptor.into(),
        });
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.unit.methods.push(method);
        self
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.unit.annotations.push(annotation);
        self
    }

    /// Add a public no-argument constructor that calls the superclass constructor.
    pub fn default_constructor(self) -> Self {
        let super_name = self.unit.super_class().to_string();
        let mut init = MethodBuilder::new(AccessFlags::PUBLIC, CONSTRUCTOR, "()V");
        init.emit(Insn::Load(super::Kind::Ref, 0))
            .emit(Insn::invoke_special(super_name, CONSTRUCTOR, "()V"))
            .emit(Insn::Return(None));
        self.method(init.build())
    }

    pub fn build(self) -> ClassUnit {
        self.unit
    }
}

/// Builder for [`Method`].
///
/// `max_locals` starts at the receiver plus parameter slots; `max_stack` is
/// left at zero and computed by the verifier when a unit is woven.
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    method: Method,
    next_label: u32,
}

impl MethodBuilder {
    pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        let access = AccessFlags(access);
        let descriptor = descriptor.into();
        let receiver = if access.is_static() { 0 } else { 1 };
        let params = MethodDescriptor::parse(&descriptor)
            .map(|d| d.param_slots())
            .unwrap_or(0);
        Self {
            method: Method {
                access,
                name: name.into(),
                descriptor,
                max_stack: 0,
                max_locals: receiver + params,
                code: Vec::new(),
                handlers: Vec::new(),
                annotations: Vec::new(),
            },
            next_label: 0,
        }
    }

    /// Allocate a fresh label (not yet placed).
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Place a label at the current position.
    pub fn mark(&mut self, label: Label) -> &mut Self {
        self.method.code.push(Insn::Label(label));
        self
    }

    pub fn emit(&mut self, insn: Insn) -> &mut Self {
        self.method.code.push(insn);
        self
    }

    /// Reserve extra local slots beyond the parameters.
    pub fn locals(&mut self, max_locals: u16) -> &mut Self {
        self.method.max_locals = self.method.max_locals.max(max_locals);
        self
    }

    pub fn handler(&mut self, region: Region) -> &mut Self {
        self.method.handlers.push(region);
        self
    }

    pub fn annotate(&mut self, annotation: Annotation) -> &mut Self {
        self.method.annotations.push(annotation);
        self
    }

    pub fn build(self) -> Method {
        self.method
    }
}
