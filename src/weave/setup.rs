// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Static setup synthesis.
//!
//! Each metric of a class gets a `public static final` handle slot, filled
//! once by code prepended to the class's static initializer (synthesized if
//! the class has none). The initializer runs before any method of the class
//! can, so every handle exists before its first use.

use crate::error::WeaveError;
use crate::unit::{AccessFlags, ClassUnit, Constant, Field, Insn, Method, STATIC_INITIALIZER};

use super::contract;
use super::model::MetricDescriptor;

/// Creation sequence for one metric: `name, labelNames|null, doc -> handle`,
/// stored into its slot.
pub fn creation_sequence(class_name: &str, metric: &MetricDescriptor) -> Vec<Insn> {
    let mut code = vec![Insn::ldc(metric.name.clone())];
    if metric.labels.is_empty() {
        code.push(Insn::Const(Constant::Null));
    } else {
        code.push(Insn::iconst(metric.labels.len() as i32));
        code.push(Insn::NewArray(contract::STRING_CLASS.to_string()));
        for (i, label) in metric.labels.iter().enumerate() {
            code.push(Insn::Dup);
            code.push(Insn::iconst(i as i32));
            code.push(Insn::ldc(label.name.clone()));
            code.push(Insn::ArrayStore);
        }
    }
    code.push(Insn::ldc(metric.doc.clone()));
    code.push(contract::create_call(metric.kind));
    code.push(Insn::put_static(
        class_name,
        metric.slot_name(),
        metric.kind.handle_descriptor(),
    ));
    code
}

/// Add handle slots and their creation code to `unit`.
///
/// Creation order follows `metrics`.
pub fn synthesize(unit: &mut ClassUnit, metrics: &[MetricDescriptor]) -> Result<(), WeaveError> {
    if metrics.is_empty() {
        return Ok(());
    }

    let mut prologue = Vec::new();
    for metric in metrics {
        let slot = metric.slot_name();
        if unit.field(&slot).is_some() {
            return Err(WeaveError::SlotCollision {
                class: unit.name.clone(),
                field: slot,
            });
        }
        unit.fields.push(Field {
            access: AccessFlags(AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL),
            name: slot,
            descriptor: metric.kind.handle_descriptor(),
        });
        prologue.extend(creation_sequence(&unit.name, metric));
    }

    match unit.methods.iter_mut().find(|m| m.is_static_initializer()) {
        Some(clinit) => {
            prologue.append(&mut clinit.code);
            clinit.code = prologue;
        }
        None => {
            prologue.push(Insn::Return(None));
            unit.methods.push(Method {
                access: AccessFlags(AccessFlags::STATIC),
                name: STATIC_INITIALIZER.to_string(),
                descriptor: "()V".to_string(),
                max_stack: 0,
                max_locals: 0,
                code: prologue,
                handlers: Vec::new(),
                annotations: Vec::new(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{verify::verify_method, ClassBuilder, MethodBuilder};
    use crate::weave::model::MetricKind;

    fn metric(kind: MetricKind, name: &str, labels: &[&str]) -> MetricDescriptor {
        MetricDescriptor::parse(kind, name, Some("docs".to_string()), labels).unwrap()
    }

    #[test]
    fn test_synthesizes_missing_initializer() {
        let mut unit = ClassBuilder::new("com/acme/Svc").build();
        synthesize(&mut unit, &[metric(MetricKind::Timer, "latency", &["op:$0"])]).unwrap();

        let field = unit.field("__metric$timer$latency").unwrap();
        assert!(field.access.is_static());
        assert!(field.access.contains(AccessFlags::FINAL));
        assert_eq!(field.descriptor, "Lweaver/runtime/Histogram;");

        let clinit = unit.static_initializer().unwrap();
        assert_eq!(clinit.code.first(), Some(&Insn::ldc("latency")));
        assert_eq!(clinit.code.last(), Some(&Insn::Return(None)));
        assert!(clinit.code.contains(&Insn::ldc("op")));
        assert!(verify_method(clinit).is_ok(), "{}", clinit.listing());
    }

    #[test]
    fn test_prepends_to_existing_initializer() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, STATIC_INITIALIZER, "()V");
        mb.emit(Insn::iconst(7))
            .emit(Insn::put_static("com/acme/Svc", "LIMIT", "I"))
            .emit(Insn::Return(None));
        let mut unit = ClassBuilder::new("com/acme/Svc")
            .field(AccessFlags::STATIC, "LIMIT", "I")
            .method(mb.build())
            .build();

        synthesize(
            &mut unit,
            &[
                metric(MetricKind::Counter, "a", &[]),
                metric(MetricKind::Gauge, "b", &[]),
            ],
        )
        .unwrap();

        let clinit = unit.static_initializer().unwrap();
        let names: Vec<_> = clinit
            .code
            .iter()
            .filter_map(|i| match i {
                Insn::PutStatic(m) => Some(m.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["__metric$counter$a", "__metric$gauge$b", "LIMIT"]);
        assert_eq!(unit.methods.len(), 1);
        assert_eq!(clinit.code.last(), Some(&Insn::Return(None)));
    }

    #[test]
    fn test_slot_collision() {
        let mut unit = ClassBuilder::new("a/B")
            .field(AccessFlags::STATIC, "__metric$counter$a", "I")
            .build();
        let err = synthesize(&mut unit, &[metric(MetricKind::Counter, "a", &[])]).unwrap_err();
        assert!(err.is_structural());
    }
}
