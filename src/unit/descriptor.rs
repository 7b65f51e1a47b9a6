// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Field and method type descriptors.
//!
//! Descriptors use the compact class-file grammar: `I` int, `J` long,
//! `Lpkg/Name;` object, `[T` array, `(params)R` method with `V` for void.

use std::fmt;
use std::str::FromStr;

use crate::error::DescriptorError;

use super::insn::Kind;

/// Type of a field, parameter, or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Shorthand for an object type.
    pub fn object(name: impl Into<String>) -> Self {
        Self::Object(name.into())
    }

    /// Computational kind used on the operand stack.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int => Kind::Int,
            Self::Long => Kind::Long,
            Self::Float => Kind::Float,
            Self::Double => Kind::Double,
            Self::Object(_) | Self::Array(_) => Kind::Ref,
        }
    }

    /// Number of local slots occupied.
    pub fn width(&self) -> u16 {
        self.kind().width()
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Parse a single field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        if descriptor.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let mut parser = Parser::new(descriptor);
        let ty = parser.field_type()?;
        if !parser.at_end() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        Ok(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "Z"),
            Self::Byte => write!(f, "B"),
            Self::Char => write!(f, "C"),
            Self::Short => write!(f, "S"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Float => write!(f, "F"),
            Self::Double => write!(f, "D"),
            Self::Object(name) => write!(f, "L{};", name),
            Self::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

impl FromStr for FieldType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parameter and return types of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for void.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn new(params: Vec<FieldType>, ret: Option<FieldType>) -> Self {
        Self { params, ret }
    }

    /// Parse a method descriptor such as `(IJLjava/lang/String;)V`.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        if descriptor.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let mut parser = Parser::new(descriptor);
        if !parser.eat('(') {
            return Err(DescriptorError::NotAMethod(descriptor.to_string()));
        }

        let mut params = Vec::new();
        while !parser.eat(')') {
            if parser.at_end() {
                return Err(DescriptorError::NotAMethod(descriptor.to_string()));
            }
            if parser.peek() == Some('V') {
                return Err(DescriptorError::MisplacedVoid(descriptor.to_string()));
            }
            params.push(parser.field_type()?);
        }

        let ret = if parser.eat('V') {
            None
        } else {
            Some(parser.field_type()?)
        };

        if !parser.at_end() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }

        Ok(Self { params, ret })
    }

    /// Total local slots taken by the parameters (excluding any receiver).
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::width).sum()
    }

    /// Kind of the returned value, `None` for void.
    pub fn return_kind(&self) -> Option<Kind> {
        self.ret.as_ref().map(FieldType::kind)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => write!(f, "V"),
        }
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn field_type(&mut self) -> Result<FieldType, DescriptorError> {
        let (offset, c) = self
            .chars
            .next()
            .ok_or_else(|| DescriptorError::Trailing(self.source.to_string()))?;
        let ty = match c {
            'Z' => FieldType::Boolean,
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'S' => FieldType::Short,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'F' => FieldType::Float,
            'D' => FieldType::Double,
            'L' => {
                let mut name = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, ';')) => break,
                        Some((_, ch)) => name.push(ch),
                        None => {
                            return Err(DescriptorError::UnterminatedClass(
                                self.source.to_string(),
                            ))
                        }
                    }
                }
                if name.is_empty() {
                    return Err(DescriptorError::UnterminatedClass(self.source.to_string()));
                }
                FieldType::Object(name)
            }
            '[' => FieldType::Array(Box::new(self.field_type()?)),
            'V' => return Err(DescriptorError::MisplacedVoid(self.source.to_string())),
            found => {
                return Err(DescriptorError::UnexpectedChar {
                    descriptor: self.source.to_string(),
                    offset,
                    found,
                })
            }
        };
        Ok(ty)
    }
}
