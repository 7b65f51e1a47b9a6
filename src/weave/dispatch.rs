// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Injector selection and the per-method weaving pass.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::WeaveError;
use crate::unit::{Insn, Kind, Method, Region, CONSTRUCTOR};

use super::emitter::MethodWeaver;
use super::injectors::{
    Advice, CounterInjector, ExceptionCounterInjector, GaugeInjector,
    TimedExceptionCountedInjector, Injector, TimerInjector,
};
use super::model::{MethodPlan, MetricDescriptor, MetricKind};

/// Choose injectors for one method's metrics.
///
/// A timer and an exception counter on the same method become a single
/// combined injector, registered first; the rest follow in kind order.
pub fn select_injectors(
    metrics: &BTreeMap<MetricKind, MetricDescriptor>,
    w: &mut MethodWeaver<'_>,
) -> Vec<Injector> {
    let mut remaining = metrics.clone();
    let mut injectors = Vec::with_capacity(remaining.len());

    if remaining.contains_key(&MetricKind::Timer)
        && remaining.contains_key(&MetricKind::ExceptionCounter)
    {
        if let (Some(timer), Some(exceptions)) = (
            remaining.remove(&MetricKind::Timer),
            remaining.remove(&MetricKind::ExceptionCounter),
        ) {
            injectors.push(Injector::TimedExceptionCounted(
                TimedExceptionCountedInjector::new(timer, exceptions, w),
            ));
        }
    }

    for (kind, metric) in remaining {
        let injector = match kind {
            MetricKind::Counter => Injector::Counter(CounterInjector::new(metric)),
            MetricKind::Gauge => Injector::Gauge(GaugeInjector::new(metric)),
            MetricKind::ExceptionCounter => {
                Injector::ExceptionCounter(ExceptionCounterInjector::new(metric))
            }
            MetricKind::Timer => Injector::Timer(TimerInjector::new(metric, w)),
        };
        injectors.push(injector);
    }
    injectors
}

/// Index just past the superclass or sibling constructor call of `<init>`.
///
/// Entry advice must not run before the receiver is initialized. `new`
/// instructions pair with their own `<init>` calls, so only an unpaired
/// `<init>` call is the delegating one.
pub fn constructor_entry(code: &[Insn]) -> Option<usize> {
    let mut pending_new = 0usize;
    for (index, insn) in code.iter().enumerate() {
        match insn {
            Insn::New(_) => pending_new += 1,
            Insn::InvokeSpecial(member) if member.name == CONSTRUCTOR => {
                if pending_new == 0 {
                    return Some(index + 1);
                }
                pending_new -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Rewrite one method according to its plan.
///
/// The result is:
///
/// ```text
///   <constructor prologue, if any>
///   <enter advice>
/// start:
///   <original body, exit advice before each return>
/// end:
/// handler:
///   astore exc
///   <finalize advice>
///   aload exc
///   athrow
/// ```
///
/// with one catch-all region `start..end -> handler` appended after the
/// method's own regions so that inner handlers keep priority. The region is
/// only added when some injector needs exceptional-exit code.
pub fn weave_method(class_name: &str, method: &mut Method, plan: &MethodPlan) -> Result<(), WeaveError> {
    let descriptor = method
        .parsed_descriptor()
        .map_err(|source| WeaveError::Descriptor {
            class: class_name.to_string(),
            method: method.signature(),
            source,
        })?;

    let mut w = MethodWeaver::new(class_name, method, &descriptor);
    let mut injectors = select_injectors(&plan.metrics, &mut w);
    if injectors.is_empty() {
        return Ok(());
    }

    let original = std::mem::take(&mut method.code);
    let entry = if method.is_constructor() {
        constructor_entry(&original).unwrap_or(0)
    } else {
        0
    };

    w.emit_all(original[..entry].iter().cloned());
    for injector in &mut injectors {
        injector.on_enter(&mut w)?;
    }

    let guarded = injectors.iter().any(|i| i.guards_body());
    let start = w.new_label();
    if guarded {
        w.mark(start);
    }

    for insn in &original[entry..] {
        if matches!(insn, Insn::Return(_)) {
            for injector in &mut injectors {
                injector.on_exit(&mut w)?;
            }
        }
        w.emit(insn.clone());
    }

    let mut region = None;
    if guarded {
        let end = w.new_label();
        let handler = w.new_label();
        let caught = w.new_local(Kind::Ref);
        w.mark(end);
        w.mark(handler);
        w.emit(Insn::Store(Kind::Ref, caught));
        for injector in injectors.iter_mut().filter(|i| i.guards_body()) {
            injector.on_finalize(&mut w)?;
        }
        w.emit(Insn::Load(Kind::Ref, caught));
        w.emit(Insn::Throw);
        region = Some(Region::catch_all(start, end, handler));
    }

    let (code, max_locals) = w.finish();
    method.code = code;
    method.max_locals = max_locals;
    method.handlers.extend(region);

    trace!(
        class = class_name,
        method = %method.signature(),
        injectors = ?injectors.iter().map(Injector::name).collect::<Vec<_>>(),
        "Wove method"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{verify::verify_method, AccessFlags, Constant, MethodBuilder};

    fn plan(kinds: &[MetricKind]) -> MethodPlan {
        let metrics = kinds
            .iter()
            .map(|k| {
                let name = format!("m_{}", k.tag());
                (*k, MetricDescriptor::new(*k, name, None, vec![]).unwrap())
            })
            .collect();
        MethodPlan {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            metrics,
        }
    }

    fn simple() -> Method {
        let mut mb = MethodBuilder::new(AccessFlags::PUBLIC, "run", "()V");
        mb.emit(Insn::Return(None));
        mb.build()
    }

    #[test]
    fn test_select_combines_timer_and_exception_counter() {
        let m = simple();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let injectors = select_injectors(
            &plan(&[MetricKind::Counter, MetricKind::Timer, MetricKind::ExceptionCounter]).metrics,
            &mut w,
        );
        let names: Vec<_> = injectors.iter().map(Injector::name).collect();
        assert_eq!(names, vec!["timed-exception-counted", "counter"]);
    }

    #[test]
    fn test_select_keeps_lone_timer() {
        let m = simple();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let injectors = select_injectors(&plan(&[MetricKind::Timer, MetricKind::Gauge]).metrics, &mut w);
        let names: Vec<_> = injectors.iter().map(Injector::name).collect();
        assert_eq!(names, vec!["gauge", "timer"]);
    }

    #[test]
    fn test_constructor_entry_skips_nested_allocations() {
        let code = vec![
            Insn::Load(Kind::Ref, 0),
            Insn::New("a/Arg".to_string()),
            Insn::Dup,
            Insn::invoke_special("a/Arg", CONSTRUCTOR, "()V"),
            Insn::invoke_special("a/Base", CONSTRUCTOR, "(La/Arg;)V"),
            Insn::Return(None),
        ];
        assert_eq!(constructor_entry(&code), Some(5));
        assert_eq!(constructor_entry(&[Insn::Return(None)]), None);
    }

    #[test]
    fn test_single_guard_region_for_all_kinds() {
        let mut m = simple();
        let p = plan(&MetricKind::ALL);
        weave_method("a/B", &mut m, &p).unwrap();
        assert_eq!(m.handlers.len(), 1);
        assert_eq!(m.handlers[0].catch_type, None);
        assert!(verify_method(&m).is_ok(), "{}", m.listing());
    }

    #[test]
    fn test_counter_alone_adds_no_region() {
        let mut m = simple();
        weave_method("a/B", &mut m, &plan(&[MetricKind::Counter])).unwrap();
        assert!(m.handlers.is_empty());
        assert!(verify_method(&m).is_ok());
    }

    #[test]
    fn test_exit_advice_precedes_every_return() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "pick", "(I)I");
        let other = mb.new_label();
        mb.emit(Insn::Load(Kind::Int, 0))
            .emit(Insn::If(crate::unit::Cond::Eq, other))
            .emit(Insn::iconst(1))
            .emit(Insn::Return(Some(Kind::Int)))
            .mark(other)
            .emit(Insn::Const(Constant::Int(2)))
            .emit(Insn::Return(Some(Kind::Int)));
        let mut m = mb.build();
        let mut p = plan(&[MetricKind::Gauge]);
        p.name = "pick".to_string();
        p.descriptor = "(I)I".to_string();

        weave_method("a/B", &mut m, &p).unwrap();
        let decs = m
            .code
            .iter()
            .filter(|i| matches!(i, Insn::InvokeStatic(r) if r.name == "recordGaugeDec"))
            .count();
        assert_eq!(decs, 3);
        assert!(verify_method(&m).is_ok(), "{}", m.listing());
    }

    #[test]
    fn test_constructor_advice_follows_super_call() {
        let mut mb = MethodBuilder::new(AccessFlags::PUBLIC, CONSTRUCTOR, "()V");
        mb.emit(Insn::Load(Kind::Ref, 0))
            .emit(Insn::invoke_special("java/lang/Object", CONSTRUCTOR, "()V"))
            .emit(Insn::Return(None));
        let mut m = mb.build();
        let mut p = plan(&[MetricKind::Counter]);
        p.name = CONSTRUCTOR.to_string();

        weave_method("a/B", &mut m, &p).unwrap();
        assert!(matches!(&m.code[1], Insn::InvokeSpecial(_)));
        assert!(matches!(&m.code[2], Insn::GetStatic(_)));
    }
}
