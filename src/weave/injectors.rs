// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-kind rewrite strategies.
//!
//! Every injector contributes code at up to three points of a method:
//!
//! - **enter**: once, before the guarded body starts
//! - **exit**: before every normal return
//! - **finalize**: inside the method's single catch-all handler, which runs
//!   on any exception escaping the body and then rethrows it unchanged
//!
//! The handler region is owned by the method weaver, not by any injector, so
//! any combination of injectors yields exactly one whole-body region.

use crate::error::WeaveError;
use crate::unit::{ArithOp, Insn, Kind};

use super::contract;
use super::emitter::MethodWeaver;
use super::model::MetricDescriptor;

/// Hook points implemented by each injector.
pub trait Advice {
    fn on_enter(&mut self, _w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        Ok(())
    }

    fn on_exit(&mut self, _w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        Ok(())
    }

    /// Whether this injector needs code on exceptional exit.
    fn guards_body(&self) -> bool {
        false
    }

    /// Code run on exceptional exit. Must leave the stack as it found it.
    fn on_finalize(&mut self, _w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        Ok(())
    }
}

/// Increments a counter on entry.
#[derive(Debug, Clone)]
pub struct CounterInjector {
    metric: MetricDescriptor,
}

impl CounterInjector {
    pub fn new(metric: MetricDescriptor) -> Self {
        Self { metric }
    }
}

impl Advice for CounterInjector {
    fn on_enter(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.metric, contract::record_count())
    }
}

/// Tracks calls in flight: increment on entry, decrement on every exit.
#[derive(Debug, Clone)]
pub struct GaugeInjector {
    metric: MetricDescriptor,
}

impl GaugeInjector {
    pub fn new(metric: MetricDescriptor) -> Self {
        Self { metric }
    }
}

impl Advice for GaugeInjector {
    fn on_enter(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.metric, contract::record_gauge_inc())
    }

    fn on_exit(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.metric, contract::record_gauge_dec())
    }

    fn guards_body(&self) -> bool {
        true
    }

    fn on_finalize(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.metric, contract::record_gauge_dec())
    }
}

/// Counts exceptions escaping the method.
#[derive(Debug, Clone)]
pub struct ExceptionCounterInjector {
    metric: MetricDescriptor,
}

impl ExceptionCounterInjector {
    pub fn new(metric: MetricDescriptor) -> Self {
        Self { metric }
    }
}

impl Advice for ExceptionCounterInjector {
    fn guards_body(&self) -> bool {
        true
    }

    fn on_finalize(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.metric, contract::record_count())
    }
}

/// Observes wall-clock nanoseconds between entry and every exit.
#[derive(Debug, Clone)]
pub struct TimerInjector {
    metric: MetricDescriptor,
    start: u16,
}

impl TimerInjector {
    pub fn new(metric: MetricDescriptor, w: &mut MethodWeaver<'_>) -> Self {
        let start = w.new_local(Kind::Long);
        Self { metric, start }
    }
}

impl Advice for TimerInjector {
    fn on_enter(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        start_clock(w, self.start);
        Ok(())
    }

    fn on_exit(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        record_elapsed(w, &self.metric, self.start)
    }

    fn guards_body(&self) -> bool {
        true
    }

    fn on_finalize(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        record_elapsed(w, &self.metric, self.start)
    }
}

/// Timer and exception counter sharing one handler: on exceptional exit the
/// exception is counted first, then the duration is recorded.
#[derive(Debug, Clone)]
pub struct TimedExceptionCountedInjector {
    timer: MetricDescriptor,
    exceptions: MetricDescriptor,
    start: u16,
}

impl TimedExceptionCountedInjector {
    pub fn new(
        timer: MetricDescriptor,
        exceptions: MetricDescriptor,
        w: &mut MethodWeaver<'_>,
    ) -> Self {
        let start = w.new_local(Kind::Long);
        Self {
            timer,
            exceptions,
            start,
        }
    }
}

impl Advice for TimedExceptionCountedInjector {
    fn on_enter(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        start_clock(w, self.start);
        Ok(())
    }

    fn on_exit(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        record_elapsed(w, &self.timer, self.start)
    }

    fn guards_body(&self) -> bool {
        true
    }

    fn on_finalize(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        w.record(&self.exceptions, contract::record_count())?;
        record_elapsed(w, &self.timer, self.start)
    }
}

fn start_clock(w: &mut MethodWeaver<'_>, slot: u16) {
    w.emit(contract::nano_time());
    w.emit(Insn::Store(Kind::Long, slot));
}

fn record_elapsed(
    w: &mut MethodWeaver<'_>,
    metric: &MetricDescriptor,
    start: u16,
) -> Result<(), WeaveError> {
    w.load_handle(metric);
    w.push_labels(metric)?;
    w.emit(contract::nano_time());
    w.emit(Insn::Load(Kind::Long, start));
    w.emit(Insn::Arith(ArithOp::Sub, Kind::Long));
    w.emit(contract::record_time());
    Ok(())
}

/// The closed set of injectors.
#[derive(Debug, Clone)]
pub enum Injector {
    Counter(CounterInjector),
    Gauge(GaugeInjector),
    ExceptionCounter(ExceptionCounterInjector),
    Timer(TimerInjector),
    TimedExceptionCounted(TimedExceptionCountedInjector),
}

impl Injector {
    fn advice(&mut self) -> &mut dyn Advice {
        match self {
            Self::Counter(i) => i,
            Self::Gauge(i) => i,
            Self::ExceptionCounter(i) => i,
            Self::Timer(i) => i,
            Self::TimedExceptionCounted(i) => i,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Gauge(_) => "gauge",
            Self::ExceptionCounter(_) => "exception-counter",
            Self::Timer(_) => "timer",
            Self::TimedExceptionCounted(_) => "timed-exception-counted",
        }
    }
}

impl Advice for Injector {
    fn on_enter(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        self.advice().on_enter(w)
    }

    fn on_exit(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        self.advice().on_exit(w)
    }

    fn guards_body(&self) -> bool {
        match self {
            Self::Counter(i) => i.guards_body(),
            Self::Gauge(i) => i.guards_body(),
            Self::ExceptionCounter(i) => i.guards_body(),
            Self::Timer(i) => i.guards_body(),
            Self::TimedExceptionCounted(i) => i.guards_body(),
        }
    }

    fn on_finalize(&mut self, w: &mut MethodWeaver<'_>) -> Result<(), WeaveError> {
        self.advice().on_finalize(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AccessFlags, Method, MethodBuilder};
    use crate::weave::model::MetricKind;

    fn method() -> Method {
        MethodBuilder::new(AccessFlags::STATIC, "run", "()V").build()
    }

    fn metric(kind: MetricKind, name: &str) -> MetricDescriptor {
        MetricDescriptor::new(kind, name, None, vec![]).unwrap()
    }

    fn calls(code: &[Insn], name: &str) -> usize {
        code.iter()
            .filter(|i| matches!(i, Insn::InvokeStatic(m) if m.name == name))
            .count()
    }

    #[test]
    fn test_counter_only_enters() {
        let m = method();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let mut inj = Injector::Counter(CounterInjector::new(metric(MetricKind::Counter, "c")));
        inj.on_enter(&mut w).unwrap();
        inj.on_exit(&mut w).unwrap();
        assert!(!inj.guards_body());
        let (code, _) = w.finish();
        assert_eq!(calls(&code, "recordCount"), 1);
    }

    #[test]
    fn test_gauge_decrements_on_both_exits() {
        let m = method();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let mut inj = Injector::Gauge(GaugeInjector::new(metric(MetricKind::Gauge, "g")));
        inj.on_enter(&mut w).unwrap();
        inj.on_exit(&mut w).unwrap();
        inj.on_finalize(&mut w).unwrap();
        let (code, _) = w.finish();
        assert_eq!(calls(&code, "recordGaugeInc"), 1);
        assert_eq!(calls(&code, "recordGaugeDec"), 2);
    }

    #[test]
    fn test_timer_allocates_wide_local() {
        let m = method();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let mut inj = TimerInjector::new(metric(MetricKind::Timer, "t"), &mut w);
        inj.on_enter(&mut w).unwrap();
        inj.on_exit(&mut w).unwrap();
        let (code, max_locals) = w.finish();
        assert_eq!(max_locals, 2);
        assert_eq!(code[1], Insn::Store(Kind::Long, 0));
        assert!(code.contains(&Insn::Arith(ArithOp::Sub, Kind::Long)));
        assert_eq!(calls(&code, "recordTime"), 1);
    }

    #[test]
    fn test_combined_counts_before_timing() {
        let m = method();
        let d = m.parsed_descriptor().unwrap();
        let mut w = MethodWeaver::new("a/B", &m, &d);
        let mut inj = TimedExceptionCountedInjector::new(
            metric(MetricKind::Timer, "t"),
            metric(MetricKind::ExceptionCounter, "e"),
            &mut w,
        );
        inj.on_finalize(&mut w).unwrap();
        let (code, _) = w.finish();
        let count_at = code
            .iter()
            .position(|i| matches!(i, Insn::InvokeStatic(m) if m.name == "recordCount"))
            .unwrap();
        let time_at = code
            .iter()
            .position(|i| matches!(i, Insn::InvokeStatic(m) if m.name == "recordTime"))
            .unwrap();
        assert!(count_at < time_at);
    }
}
