// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metric discovery.
//!
//! Walks a unit's methods and constructors, combining metric annotations with
//! declarations supplied by a [`Policy`], and produces the [`ClassPlan`] that
//! drives the rest of the rewrite. Misconfigurations fail here, before any
//! code is touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::WeaveError;
use crate::unit::{Annotation, ClassUnit, Method};

use super::labels::ArgumentLayout;
use super::model::{ClassPlan, MethodPlan, MetricDescriptor, MetricKind, MAX_LABELS};

/// Source of weaving decisions and externally declared metrics.
pub trait Policy: Send + Sync {
    /// Whether the class may be rewritten at all.
    fn is_eligible(&self, class_name: &str) -> bool;

    /// Metrics created for the class regardless of methods.
    fn find_class_metrics(&self, class_name: &str) -> Vec<MetricDescriptor>;

    /// Metrics declared for one method, keyed by `name + descriptor`.
    fn find_method_metrics(&self, class_name: &str, method_signature: &str) -> Vec<MetricDescriptor>;
}

impl<P: Policy + ?Sized> Policy for Arc<P> {
    fn is_eligible(&self, class_name: &str) -> bool {
        (**self).is_eligible(class_name)
    }

    fn find_class_metrics(&self, class_name: &str) -> Vec<MetricDescriptor> {
        (**self).find_class_metrics(class_name)
    }

    fn find_method_metrics(&self, class_name: &str, method_signature: &str) -> Vec<MetricDescriptor> {
        (**self).find_method_metrics(class_name, method_signature)
    }
}

/// Accepts every class and declares nothing; only annotations count.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationsOnly;

impl Policy for AnnotationsOnly {
    fn is_eligible(&self, _class_name: &str) -> bool {
        true
    }

    fn find_class_metrics(&self, _class_name: &str) -> Vec<MetricDescriptor> {
        Vec::new()
    }

    fn find_method_metrics(&self, _class_name: &str, _method_signature: &str) -> Vec<MetricDescriptor> {
        Vec::new()
    }
}

/// Whether a method can carry metrics at all.
pub fn is_weavable(method: &Method) -> bool {
    !method.access.is_synthetic()
        && !method.access.is_bridge()
        && !method.is_static_initializer()
        && method.has_code()
}

/// Build the instrumentation plan for `unit`.
///
/// Ineligible classes and interfaces yield an empty plan.
pub fn extract_plan(unit: &ClassUnit, policy: &dyn Policy) -> Result<ClassPlan, WeaveError> {
    let mut plan = ClassPlan::new(unit.name.clone());
    if unit.is_interface() || !policy.is_eligible(&unit.name) {
        debug!(class = %unit.name, "Class not eligible for weaving");
        return Ok(plan);
    }

    for metric in policy.find_class_metrics(&unit.name) {
        check_label_count(&unit.name, &metric)?;
        plan.register(&metric)?;
    }

    for method in unit.methods.iter().filter(|m| is_weavable(m)) {
        let signature = method.signature();
        let mut declared = annotation_metrics(&unit.name, method)?;
        declared.extend(policy.find_method_metrics(&unit.name, &signature));
        if declared.is_empty() {
            continue;
        }

        let descriptor = method
            .parsed_descriptor()
            .map_err(|source| WeaveError::Descriptor {
                class: unit.name.clone(),
                method: signature.clone(),
                source,
            })?;
        let layout = ArgumentLayout::new(
            unit.name.clone(),
            signature.clone(),
            method.access.is_static(),
            &descriptor,
        );

        let mut metrics: BTreeMap<MetricKind, MetricDescriptor> = BTreeMap::new();
        for metric in declared {
            check_label_count(&unit.name, &metric)?;
            layout.validate(&metric.labels)?;
            match metrics.get(&metric.kind) {
                Some(existing) if *existing == metric => continue,
                Some(existing) => {
                    return Err(WeaveError::DuplicateKind {
                        class: unit.name.clone(),
                        method: signature,
                        kind: metric.kind.to_string(),
                        first: existing.name.clone(),
                        second: metric.name,
                    });
                }
                None => {
                    plan.register(&metric)?;
                    metrics.insert(metric.kind, metric);
                }
            }
        }

        debug!(
            class = %unit.name,
            method = %signature,
            kinds = ?metrics.keys().collect::<Vec<_>>(),
            "Found metrics"
        );
        plan.methods.push(MethodPlan {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            metrics,
        });
    }

    Ok(plan)
}

fn check_label_count(class_name: &str, metric: &MetricDescriptor) -> Result<(), WeaveError> {
    if metric.labels.len() > MAX_LABELS {
        return Err(WeaveError::TooManyLabels {
            class: class_name.to_string(),
            name: metric.name.clone(),
            count: metric.labels.len(),
            max: MAX_LABELS,
        });
    }
    Ok(())
}

/// Descriptors declared through metric annotations on `method`.
fn annotation_metrics(class_name: &str, method: &Method) -> Result<Vec<MetricDescriptor>, WeaveError> {
    method
        .annotations
        .iter()
        .filter_map(|ann| MetricKind::from_annotation(&ann.descriptor).map(|kind| (kind, ann)))
        .map(|(kind, ann)| from_annotation(class_name, method, kind, ann))
        .collect()
}

fn from_annotation(
    class_name: &str,
    method: &Method,
    kind: MetricKind,
    ann: &Annotation,
) -> Result<MetricDescriptor, WeaveError> {
    let name = ann.str_value("name").ok_or_else(|| {
        WeaveError::InvalidDeclaration(format!(
            "{}.{}: {} annotation has no name",
            class_name,
            method.signature(),
            kind
        ))
    })?;
    let doc = ann.str_value("doc").map(str::to_string);
    let labels = ann.list_value("labels").unwrap_or_default();
    MetricDescriptor::parse(kind, name, doc, labels)
}
