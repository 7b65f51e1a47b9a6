// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime values of the reference host.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::telemetry::{Counter, Gauge, Histogram};
use crate::unit::{FieldType, Kind};

/// Shared, mutable heap object.
pub type ObjRef = Rc<RefCell<Object>>;

/// One operand stack entry or local.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(ObjRef),
}

impl Value {
    /// Zero value for a field or array element of the given type.
    pub fn default_for(ty: &FieldType) -> Self {
        match ty.kind() {
            Kind::Int => Self::Int(0),
            Kind::Long => Self::Long(0),
            Kind::Float => Self::Float(0.0),
            Kind::Double => Self::Double(0.0),
            Kind::Ref => Self::Null,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::Int(_) => Kind::Int,
            Self::Long(_) => Kind::Long,
            Self::Float(_) => Kind::Float,
            Self::Double(_) => Kind::Double,
            Self::Null | Self::Ref(_) => Kind::Ref,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&ObjRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Reference identity; primitives compare by value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Ref(a), Self::Ref(b)) => Rc::ptr_eq(a, b),
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    /// Contents of a string object.
    pub fn as_str(&self) -> Option<String> {
        match self {
            Self::Ref(r) => match &r.borrow().data {
                ObjectData::Str(s) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Identity of the referenced object.
    pub fn object_id(&self) -> Option<u64> {
        self.as_ref().map(|r| r.borrow().id)
    }

    /// Runtime class of the referenced object.
    pub fn class_name(&self) -> Option<String> {
        self.as_ref().map(|r| r.borrow().class.clone())
    }

    /// Textual form used by `String.valueOf`.
    pub fn display_string(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Float(v) => format!("{:?}", v),
            Self::Double(v) => format!("{:?}", v),
            Self::Null => "null".to_string(),
            Self::Ref(r) => r.borrow().to_string(),
        }
    }
}

/// Telemetry handle held by woven code.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

#[derive(Debug)]
pub enum ObjectData {
    Instance(BTreeMap<String, Value>),
    Str(String),
    Array(Vec<Value>),
    /// Boxed primitive; the object's class names the box type.
    Boxed(Value),
    Metric(MetricHandle),
}

#[derive(Debug)]
pub struct Object {
    pub id: u64,
    pub class: String,
    pub data: ObjectData,
}

impl Object {
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.data {
            ObjectData::Instance(fields) => fields.get(name),
            _ => None,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ObjectData::Str(s) => write!(f, "{}", s),
            ObjectData::Boxed(Value::Int(v)) if self.class == "java/lang/Boolean" => {
                write!(f, "{}", *v != 0)
            }
            ObjectData::Boxed(Value::Int(v)) if self.class == "java/lang/Character" => {
                let c = u32::try_from(*v).ok().and_then(char::from_u32).unwrap_or('\u{fffd}');
                write!(f, "{}", c)
            }
            ObjectData::Boxed(inner) => write!(f, "{}", inner.display_string()),
            _ => write!(f, "{}@{:x}", self.class.replace('/', "."), self.id),
        }
    }
}
