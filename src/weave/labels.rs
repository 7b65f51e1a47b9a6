// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Label value resolution.
//!
//! Turns a metric's label declarations into the instructions that leave a
//! `String[]` of runtime label values (or `null` when there are no labels) on
//! the operand stack.

use crate::error::WeaveError;
use crate::unit::{FieldType, Insn, Kind, MethodDescriptor};

use super::contract;
use super::model::{LabelBase, LabelSource, LabelSpec, MetricDescriptor, MAX_LABELS};

/// Receiver and argument slots of the method being woven.
#[derive(Debug, Clone)]
pub struct ArgumentLayout {
    class_name: String,
    method: String,
    is_static: bool,
    params: Vec<FieldType>,
}

impl ArgumentLayout {
    pub fn new(
        class_name: impl Into<String>,
        method: impl Into<String>,
        is_static: bool,
        descriptor: &MethodDescriptor,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method: method.into(),
            is_static,
            params: descriptor.params.clone(),
        }
    }

    pub fn argument_count(&self) -> usize {
        self.params.len()
    }

    /// Local slot and type of argument `index`; wide arguments before it
    /// shift its slot by two.
    pub fn argument_slot(&self, index: u16) -> Option<(u16, &FieldType)> {
        let ty = self.params.get(index as usize)?;
        let receiver = if self.is_static { 0 } else { 1 };
        let preceding: u16 = self.params[..index as usize]
            .iter()
            .map(FieldType::width)
            .sum();
        Some((receiver + preceding, ty))
    }

    /// Check that every label can be resolved in this method.
    pub fn validate(&self, labels: &[LabelSpec]) -> Result<(), WeaveError> {
        for label in labels {
            if let Some(index) = label.source.argument() {
                if index as usize >= self.params.len() {
                    return Err(self.out_of_range(label, index));
                }
            }
            if label.source.reads_receiver() && self.is_static {
                return Err(WeaveError::ReceiverInStaticMethod {
                    class: self.class_name.clone(),
                    method: self.method.clone(),
                    label: label.as_declared().to_string(),
                });
            }
        }
        Ok(())
    }

    fn out_of_range(&self, label: &LabelSpec, index: u16) -> WeaveError {
        WeaveError::ArgumentOutOfRange {
            class: self.class_name.clone(),
            method: self.method.clone(),
            label: label.as_declared().to_string(),
            index,
            count: self.params.len(),
        }
    }
}

/// Instructions leaving the label value array (or `null`) on the stack.
pub fn label_array(
    metric: &MetricDescriptor,
    layout: &ArgumentLayout,
) -> Result<Vec<Insn>, WeaveError> {
    let labels = &metric.labels;
    if labels.is_empty() {
        return Ok(vec![Insn::Const(crate::unit::Constant::Null)]);
    }
    if labels.len() > MAX_LABELS {
        return Err(WeaveError::TooManyLabels {
            class: layout.class_name.clone(),
            name: metric.name.clone(),
            count: labels.len(),
            max: MAX_LABELS,
        });
    }
    layout.validate(labels)?;

    let mut code = vec![
        Insn::iconst(labels.len() as i32),
        Insn::NewArray(contract::STRING_CLASS.to_string()),
    ];
    for (i, label) in labels.iter().enumerate() {
        code.push(Insn::Dup);
        code.push(Insn::iconst(i as i32));
        label_value(label, layout, &mut code)?;
        code.push(Insn::ArrayStore);
    }
    Ok(code)
}

/// Instructions leaving one label's string value on the stack.
fn label_value(
    label: &LabelSpec,
    layout: &ArgumentLayout,
    code: &mut Vec<Insn>,
) -> Result<(), WeaveError> {
    match &label.source {
        LabelSource::Literal(value) => {
            code.push(Insn::ldc(value.clone()));
            return Ok(());
        }
        LabelSource::Receiver => code.push(Insn::Load(Kind::Ref, 0)),
        LabelSource::Argument(index) => load_argument(label, *index, layout, code)?,
        LabelSource::Nested { base, path } => {
            match base {
                LabelBase::Receiver => code.push(Insn::Load(Kind::Ref, 0)),
                LabelBase::Argument(index) => load_argument(label, *index, layout, code)?,
            }
            code.push(Insn::ldc(path.clone()));
            code.push(contract::get_nested_property());
        }
    }
    code.push(contract::string_value_of());
    Ok(())
}

fn load_argument(
    label: &LabelSpec,
    index: u16,
    layout: &ArgumentLayout,
    code: &mut Vec<Insn>,
) -> Result<(), WeaveError> {
    let (slot, ty) = layout
        .argument_slot(index)
        .ok_or_else(|| layout.out_of_range(label, index))?;
    code.push(Insn::Load(ty.kind(), slot));
    if let Some(boxing) = contract::box_primitive(ty) {
        code.push(boxing);
    }
    Ok(())
}
