// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instruction set for method bodies.
//!
//! Bodies are flat instruction lists. Branch targets and region bounds are
//! [`Label`] pseudo-instructions placed in the list, so inserting code never
//! requires offset fix-ups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position marker inside a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Computational type of a local slot or operand stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Kind {
    /// Number of local slots a value of this kind occupies.
    pub fn width(self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    /// Mnemonic prefix used in listings.
    pub fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Ref => 'a',
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Ref => "reference",
        };
        write!(f, "{}", name)
    }
}

/// Constant pushed by [`Insn::Const`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Constant {
    /// Kind of the value this constant pushes.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Null | Self::Str(_) => Kind::Ref,
            Self::Int(_) => Kind::Int,
            Self::Long(_) => Kind::Long,
            Self::Float(_) => Kind::Float,
            Self::Double(_) => Kind::Double,
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    /// Evaluate the condition for `left <op> right`.
    pub fn test(self, left: i32, right: i32) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Ge => left >= right,
            Self::Gt => left > right,
            Self::Le => left <= right,
        }
    }
}

/// Symbolic reference to a field or method of some class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    /// Position marker; executes as a no-op.
    Label(Label),
    Const(Constant),
    Load(Kind, u16),
    Store(Kind, u16),
    Arith(ArithOp, Kind),
    Dup,
    Pop,
    Swap,
    /// Allocate an instance; the constructor is invoked separately.
    New(String),
    /// Pop a length and push a new reference array with the given element class.
    NewArray(String),
    /// Pop value, index, and array reference; store into a reference array.
    ArrayStore,
    /// Pop index and array reference; push the element.
    ArrayLoad,
    GetStatic(MemberRef),
    PutStatic(MemberRef),
    GetField(MemberRef),
    PutField(MemberRef),
    InvokeStatic(MemberRef),
    InvokeVirtual(MemberRef),
    InvokeSpecial(MemberRef),
    /// Compare the popped int against zero.
    If(Cond, Label),
    /// Compare two popped ints.
    IfCmp(Cond, Label),
    Goto(Label),
    Return(Option<Kind>),
    Throw,
}

impl Insn {
    pub fn invoke_static(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::InvokeStatic(MemberRef::new(owner, name, desc))
    }

    pub fn invoke_virtual(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::InvokeVirtual(MemberRef::new(owner, name, desc))
    }

    pub fn invoke_special(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::InvokeSpecial(MemberRef::new(owner, name, desc))
    }

    pub fn get_static(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::GetStatic(MemberRef::new(owner, name, desc))
    }

    pub fn put_static(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::PutStatic(MemberRef::new(owner, name, desc))
    }

    pub fn get_field(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::GetField(MemberRef::new(owner, name, desc))
    }

    pub fn put_field(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::PutField(MemberRef::new(owner, name, desc))
    }

    pub fn ldc(value: impl Into<String>) -> Self {
        Self::Const(Constant::Str(value.into()))
    }

    pub fn iconst(value: i32) -> Self {
        Self::Const(Constant::Int(value))
    }

    /// Whether control can continue to the next instruction.
    pub fn falls_through(&self) -> bool {
        !matches!(self, Self::Goto(_) | Self::Return(_) | Self::Throw)
    }

    /// Branch target, if this instruction can jump.
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Self::If(_, label) | Self::IfCmp(_, label) | Self::Goto(label) => Some(*label),
            _ => None,
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{}:", label),
            Self::Const(Constant::Null) => write!(f, "aconst_null"),
            Self::Const(Constant::Int(v)) => write!(f, "iconst {}", v),
            Self::Const(Constant::Long(v)) => write!(f, "lconst {}", v),
            Self::Const(Constant::Float(v)) => write!(f, "fconst {:?}", v),
            Self::Const(Constant::Double(v)) => write!(f, "dconst {:?}", v),
            Self::Const(Constant::Str(s)) => write!(f, "ldc {:?}", s),
            Self::Load(kind, slot) => write!(f, "{}load {}", kind.prefix(), slot),
            Self::Store(kind, slot) => write!(f, "{}store {}", kind.prefix(), slot),
            Self::Arith(op, kind) => {
                let op = match op {
                    ArithOp::Add => "add",
                    ArithOp::Sub => "sub",
                    ArithOp::Mul => "mul",
                    ArithOp::Div => "div",
                };
                write!(f, "{}{}", kind.prefix(), op)
            }
            Self::Dup => write!(f, "dup"),
            Self::Pop => write!(f, "pop"),
            Self::Swap => write!(f, "swap"),
            Self::New(class) => write!(f, "new {}", class),
            Self::NewArray(class) => write!(f, "anewarray {}", class),
            Self::ArrayStore => write!(f, "aastore"),
            Self::ArrayLoad => write!(f, "aaload"),
            Self::GetStatic(m) => write!(f, "getstatic {}", m),
            Self::PutStatic(m) => write!(f, "putstatic {}", m),
            Self::GetField(m) => write!(f, "getfield {}", m),
            Self::PutField(m) => write!(f, "putfield {}", m),
            Self::InvokeStatic(m) => write!(f, "invokestatic {}", m),
            Self::InvokeVirtual(m) => write!(f, "invokevirtual {}", m),
            Self::InvokeSpecial(m) => write!(f, "invokespecial {}", m),
            Self::If(cond, label) => write!(f, "if{:?} {}", cond, label),
            Self::IfCmp(cond, label) => write!(f, "if_icmp{:?} {}", cond, label),
            Self::Goto(label) => write!(f, "goto {}", label),
            Self::Return(None) => write!(f, "return"),
            Self::Return(Some(kind)) => write!(f, "{}return", kind.prefix()),
            Self::Throw => write!(f, "athrow"),
        }
    }
}

/// Exception-handling region: instructions between `start` (inclusive) and
/// `end` (exclusive) are guarded, control transfers to `handler` with the
/// thrown object as the only stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// Internal name of the caught class; `None` catches everything.
    pub catch_type: Option<String>,
}

impl Region {
    /// A region that catches every throwable.
    pub fn catch_all(start: Label, end: Label, handler: Label) -> Self {
        Self {
            start,
            end,
            handler,
            catch_type: None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "try {}..{} -> {} catch {}",
            self.start,
            self.end,
            self.handler,
            self.catch_type.as_deref().unwrap_or("*")
        )
    }
}
