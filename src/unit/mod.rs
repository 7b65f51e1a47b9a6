// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Binary unit model.
//!
//! A [`ClassUnit`] is one compiled class: its fields, its methods with their
//! instruction lists and exception regions, and the annotations declared on
//! the class and its methods. Units travel as bytes (see [`codec`]) between
//! the host loader and the weaver.
//!
//! - [`insn`] - Instructions, labels, and exception regions
//! - [`descriptor`] - Field and method descriptor parsing
//! - [`codec`] - Binary and JSON encodings
//! - [`builder`] - Programmatic construction of units
//! - [`verify`] - Stack map and region verification

pub mod builder;
pub mod codec;
pub mod descriptor;
pub mod insn;
pub mod verify;

pub use builder::{ClassBuilder, MethodBuilder};
pub use descriptor::{FieldType, MethodDescriptor};
pub use insn::{ArithOp, Cond, Constant, Insn, Kind, Label, MemberRef, Region};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::DescriptorError;

/// Name of instance constructors.
pub const CONSTRUCTOR: &str = "<init>";

/// Name of the one-time static initializer.
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Root class assumed when a unit declares no superclass.
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Access and property flags for classes, fields, and methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const BRIDGE: u16 = 0x0040;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_synthetic(self) -> bool {
        self.contains(Self::SYNTHETIC)
    }

    pub fn is_bridge(self) -> bool {
        self.contains(Self::BRIDGE)
    }

    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }
}

impl From<u16> for AccessFlags {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

/// Value of an annotation element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    Str(String),
    Int(i64),
    StrList(Vec<String>),
}

/// An annotation declared on a class or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Type descriptor, e.g. `Lweaver/annotation/Timed;`.
    pub descriptor: String,
    pub values: BTreeMap<String, AnnotationValue>,
}

impl Annotation {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            values: BTreeMap::new(),
        }
    }

    /// Add a string element.
    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(key.into(), AnnotationValue::Str(value.into()));
        self
    }

    /// Add a string-list element.
    pub fn with_list<S: Into<String>>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let list = values.into_iter().map(Into::into).collect();
        self.values.insert(key.into(), AnnotationValue::StrList(list));
        self
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(AnnotationValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list_value(&self, key: &str) -> Option<&[String]> {
        match self.values.get(key) {
            Some(AnnotationValue::StrList(list)) => Some(list),
            _ => None,
        }
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
}

/// A method declaration and, unless abstract or native, its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<Insn>,
    pub handlers: Vec<Region>,
    pub annotations: Vec<Annotation>,
}

impl Method {
    /// Name plus descriptor; the key used for policy lookups.
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER && self.access.is_static()
    }

    pub fn has_code(&self) -> bool {
        !self.access.is_abstract() && !self.access.is_native() && !self.code.is_empty()
    }

    pub fn parsed_descriptor(&self) -> Result<MethodDescriptor, DescriptorError> {
        MethodDescriptor::parse(&self.descriptor)
    }

    /// First label id not used anywhere in the body or its regions.
    pub fn next_label(&self) -> u32 {
        let in_code = self.code.iter().filter_map(|insn| match insn {
            Insn::Label(l) => Some(l.0),
            other => other.jump_target().map(|l| l.0),
        });
        let in_regions = self
            .handlers
            .iter()
            .flat_map(|r| [r.start.0, r.end.0, r.handler.0]);
        in_code.chain(in_regions).max().map_or(0, |max| max + 1)
    }

    /// Human-readable disassembly of the body.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} (stack={}, locals={})",
            self.name, self.descriptor, self.max_stack, self.max_locals
        );
        for insn in &self.code {
            match insn {
                Insn::Label(_) => {
                    let _ = writeln!(out, "  {}", insn);
                }
                _ => {
                    let _ = writeln!(out, "    {}", insn);
                }
            }
        }
        for region in &self.handlers {
            let _ = writeln!(out, "  {}", region);
        }
        out
    }
}

/// One compiled class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassUnit {
    /// Internal name, e.g. `com/acme/Service`.
    pub name: String,
    pub access: AccessFlags,
    pub super_name: Option<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub annotations: Vec<Annotation>,
}

impl ClassUnit {
    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    pub fn super_class(&self) -> &str {
        self.super_name.as_deref().unwrap_or(OBJECT_CLASS)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn static_initializer(&self) -> Option<&Method> {
        self.methods.iter().find(|m| m.is_static_initializer())
    }

    pub fn has_annotation(&self, descriptor: &str) -> bool {
        self.annotations.iter().any(|a| a.descriptor == descriptor)
    }

    /// Disassembly of every method.
    pub fn listing(&self) -> String {
        let mut out = format!("class {} extends {}\n", self.name, self.super_class());
        for field in &self.fields {
            out.push_str(&format!("  field {} {}\n", field.name, field.descriptor));
        }
        for method in &self.methods {
            out.push('\n');
            out.push_str(&method.listing());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_method() -> Method {
        Method {
            access: AccessFlags(AccessFlags::PUBLIC),
            name: "run".to_string(),
            descriptor: "(I)V".to_string(),
            max_stack: 0,
            max_locals: 2,
            code: vec![
                Insn::Label(Label(3)),
                Insn::Load(Kind::Int, 1),
                Insn::If(Cond::Eq, Label(7)),
                Insn::Label(Label(7)),
                Insn::Return(None),
            ],
            handlers: vec![Region::catch_all(Label(3), Label(7), Label(9))],
            annotations: vec![],
        }
    }

    #[test]
    fn test_signature() {
        assert_eq!(sample_method().signature(), "run(I)V");
    }

    #[test]
    fn test_next_label_considers_regions() {
        assert_eq!(sample_method().next_label(), 10);
    }

    #[test]
    fn test_access_flags() {
        let flags = AccessFlags(AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC);
        assert!(flags.is_static());
        assert!(flags.is_synthetic());
        assert!(!flags.is_bridge());
        assert!(!flags.is_interface());
    }

    #[test]
    fn test_annotation_values() {
        let ann = Annotation::new("Lweaver/annotation/Timed;")
            .with_str("name", "latency")
            .with_list("labels", ["a:b"]);
        assert_eq!(ann.str_value("name"), Some("latency"));
        assert_eq!(ann.list_value("labels"), Some(&["a:b".to_string()][..]));
        assert_eq!(ann.str_value("labels"), None);
    }

    #[test]
    fn test_listing_mentions_regions() {
        let listing = sample_method().listing();
        assert!(listing.contains("iload 1"));
        assert!(listing.contains("try L3..L7 -> L9 catch *"));
    }
}
