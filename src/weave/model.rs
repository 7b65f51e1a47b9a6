// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metric descriptors and per-class instrumentation plans.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WeaveError;

use super::contract;

/// Maximum labels a single metric may declare.
pub const MAX_LABELS: usize = 5;

/// Documentation used when a declaration provides none.
pub const DEFAULT_DOC: &str = "empty doc";

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));

static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$(this|\d+)(?:\.(.+))?$").expect("valid label template regex"));

/// The closed set of telemetry kinds.
///
/// Ordering is significant: it is the order in which a method's injectors are
/// registered and the order of [`ClassPlan`] entries per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    #[serde(alias = "Counted", alias = "counted")]
    Counter,
    #[serde(alias = "Gauged", alias = "gauged")]
    Gauge,
    #[serde(alias = "ExceptionCounted", alias = "exceptionCounted")]
    ExceptionCounter,
    #[serde(alias = "Timed", alias = "timed")]
    Timer,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Counter,
        MetricKind::Gauge,
        MetricKind::ExceptionCounter,
        MetricKind::Timer,
    ];

    /// Annotation type that declares this kind on a method.
    pub fn annotation_descriptor(self) -> &'static str {
        match self {
            Self::Counter => "Lweaver/annotation/Counted;",
            Self::Gauge => "Lweaver/annotation/Gauged;",
            Self::ExceptionCounter => "Lweaver/annotation/ExceptionCounted;",
            Self::Timer => "Lweaver/annotation/Timed;",
        }
    }

    pub fn from_annotation(descriptor: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.annotation_descriptor() == descriptor)
    }

    /// Runtime handle class stored in the static slot.
    pub fn handle_class(self) -> &'static str {
        match self {
            Self::Counter | Self::ExceptionCounter => contract::COUNTER_CLASS,
            Self::Gauge => contract::GAUGE_CLASS,
            Self::Timer => contract::HISTOGRAM_CLASS,
        }
    }

    /// Field descriptor of the handle slot.
    pub fn handle_descriptor(self) -> String {
        format!("L{};", self.handle_class())
    }

    /// Name of the runtime creation entry point.
    pub fn create_method(self) -> &'static str {
        match self {
            Self::Counter => "createAndRegisterCounted",
            Self::Gauge => "createAndRegisterGauged",
            Self::ExceptionCounter => "createAndRegisterExceptionCounted",
            Self::Timer => "createAndRegisterTimed",
        }
    }

    /// Short tag used in slot names.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::ExceptionCounter => "exceptions",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::ExceptionCounter => "exception counter",
            Self::Timer => "timer",
        };
        write!(f, "{}", name)
    }
}

/// Where a label's value comes from at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    Literal(String),
    /// Zero-based method argument.
    Argument(u16),
    Receiver,
    /// Property path resolved against an argument or the receiver.
    Nested { base: LabelBase, path: String },
}

/// Base object of a nested property label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelBase {
    Argument(u16),
    Receiver,
}

impl LabelSource {
    /// Argument index this source reads, if any.
    pub fn argument(&self) -> Option<u16> {
        match self {
            Self::Argument(index)
            | Self::Nested {
                base: LabelBase::Argument(index),
                ..
            } => Some(*index),
            _ => None,
        }
    }

    pub fn reads_receiver(&self) -> bool {
        matches!(
            self,
            Self::Receiver
                | Self::Nested {
                    base: LabelBase::Receiver,
                    ..
                }
        )
    }
}

/// One `name:value` label declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub name: String,
    pub source: LabelSource,
    raw: String,
}

impl LabelSpec {
    /// Parse `name:value`. Values `$N`, `$this`, `$N.path`, and `$this.path`
    /// are templates; anything else is a literal.
    pub fn parse(spec: &str) -> Result<Self, WeaveError> {
        let invalid = |reason: &str| WeaveError::InvalidLabel {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (name, value) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected 'name:value'"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(invalid("label name is empty"));
        }
        if value.is_empty() {
            return Err(invalid("label value is empty"));
        }

        let source = if value.starts_with('$') {
            let caps = TEMPLATE
                .captures(value)
                .ok_or_else(|| invalid("templates must be $N, $this, $N.path or $this.path"))?;
            let base = match &caps[1] {
                "this" => LabelBase::Receiver,
                digits => LabelBase::Argument(
                    digits
                        .parse()
                        .map_err(|_| invalid("argument index is too large"))?,
                ),
            };
            match (caps.get(2), base) {
                (Some(path), base) => LabelSource::Nested {
                    base,
                    path: path.as_str().to_string(),
                },
                (None, LabelBase::Receiver) => LabelSource::Receiver,
                (None, LabelBase::Argument(index)) => LabelSource::Argument(index),
            }
        } else {
            LabelSource::Literal(value.to_string())
        };

        Ok(Self {
            name: name.to_string(),
            source,
            raw: spec.to_string(),
        })
    }

    /// The declaration text this label was parsed from.
    pub fn as_declared(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for LabelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Immutable description of one telemetry declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub kind: MetricKind,
    pub name: String,
    pub doc: String,
    pub labels: Vec<LabelSpec>,
}

impl MetricDescriptor {
    pub fn new(
        kind: MetricKind,
        name: impl Into<String>,
        doc: Option<String>,
        labels: Vec<LabelSpec>,
    ) -> Result<Self, WeaveError> {
        let name = name.into();
        if !METRIC_NAME.is_match(&name) {
            return Err(WeaveError::InvalidDeclaration(format!(
                "'{}' is not a valid metric name",
                name
            )));
        }
        let doc = doc
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOC.to_string());
        Ok(Self {
            kind,
            name,
            doc,
            labels,
        })
    }

    /// Build from `name:value` label strings.
    pub fn parse(
        kind: MetricKind,
        name: impl Into<String>,
        doc: Option<String>,
        labels: &[impl AsRef<str>],
    ) -> Result<Self, WeaveError> {
        let labels = labels
            .iter()
            .map(|l| LabelSpec::parse(l.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(kind, name, doc, labels)
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Static slot holding this metric's runtime handle.
    pub fn slot_name(&self) -> String {
        format!("__metric${}${}", self.kind.tag(), self.name)
    }

    /// Whether two declarations describe the same runtime metric.
    pub fn same_shape(&self, other: &MetricDescriptor) -> bool {
        self.kind == other.kind && self.label_names() == other.label_names()
    }
}

/// Metrics to weave into one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPlan {
    pub name: String,
    pub descriptor: String,
    pub metrics: BTreeMap<MetricKind, MetricDescriptor>,
}

impl MethodPlan {
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

/// Everything the weaver will do to one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPlan {
    pub class_name: String,
    /// Metrics created by the static setup code, in discovery order.
    pub class_metrics: Vec<MetricDescriptor>,
    pub methods: Vec<MethodPlan>,
}

impl ClassPlan {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.class_metrics.is_empty() && self.methods.is_empty()
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodPlan> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Register a descriptor for static setup, sharing slots between
    /// identical declarations.
    pub fn register(&mut self, metric: &MetricDescriptor) -> Result<(), WeaveError> {
        match self.class_metrics.iter().find(|m| m.name == metric.name) {
            Some(existing) if existing.same_shape(metric) => Ok(()),
            Some(_) => Err(WeaveError::ConflictingMetric {
                class: self.class_name.clone(),
                name: metric.name.clone(),
            }),
            None => {
                self.class_metrics.push(metric.clone());
                Ok(())
            }
        }
    }
}
