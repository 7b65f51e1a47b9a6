// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the rewrite pass.
//!
//! Run with: `cargo bench --bench rewrite`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use weaver::telemetry::{exposition, Registry};
use weaver::unit::verify::verify_method;
use weaver::unit::{
    codec, AccessFlags, Annotation, ArithOp, ClassBuilder, ClassUnit, Cond, Insn, Kind,
    MethodBuilder,
};
use weaver::weave::{AnnotationsOnly, MetricKind, Weaver};

/// A unit with `methods` annotated methods, each with a small loop.
fn sample_unit(methods: usize) -> ClassUnit {
    let mut builder = ClassBuilder::new("bench/Service");
    for i in 0..methods {
        let mut mb = MethodBuilder::new(
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            format!("op{}", i),
            "(Ljava/lang/String;I)I",
        );
        let top = mb.new_label();
        let done = mb.new_label();
        mb.locals(3)
            .emit(Insn::iconst(0))
            .emit(Insn::Store(Kind::Int, 2))
            .mark(top)
            .emit(Insn::Load(Kind::Int, 1))
            .emit(Insn::If(Cond::Le, done))
            .emit(Insn::Load(Kind::Int, 2))
            .emit(Insn::Load(Kind::Int, 1))
            .emit(Insn::Arith(ArithOp::Add, Kind::Int))
            .emit(Insn::Store(Kind::Int, 2))
            .emit(Insn::Load(Kind::Int, 1))
            .emit(Insn::iconst(1))
            .emit(Insn::Arith(ArithOp::Sub, Kind::Int))
            .emit(Insn::Store(Kind::Int, 1))
            .emit(Insn::Goto(top))
            .mark(done)
            .emit(Insn::Load(Kind::Int, 2))
            .emit(Insn::Return(Some(Kind::Int)));
        mb.annotate(
            Annotation::new(MetricKind::Timer.annotation_descriptor())
                .with_str("name", format!("op{}_latency", i))
                .with_list("labels", ["caller:$0"]),
        )
        .annotate(
            Annotation::new(MetricKind::ExceptionCounter.annotation_descriptor())
                .with_str("name", format!("op{}_failures", i))
                .with_list("labels", ["caller:$0"]),
        );
        builder = builder.method(mb.build());
    }
    builder.build()
}

fn bench_rewrite(c: &mut Criterion) {
    let weaver = Weaver::new(AnnotationsOnly);
    let mut group = c.benchmark_group("rewrite");

    for methods in [1usize, 16, 64] {
        let bytes = codec::encode(&sample_unit(methods)).unwrap();
        group.throughput(Throughput::Elements(methods as u64));
        group.bench_with_input(BenchmarkId::from_parameter(methods), &bytes, |b, bytes| {
            b.iter(|| weaver.rewrite(black_box(bytes)));
        });
    }

    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let woven = Weaver::new(AnnotationsOnly)
        .weave(&sample_unit(1))
        .unwrap()
        .unwrap();
    let method = woven.method("op0", "(Ljava/lang/String;I)I").unwrap().clone();

    c.bench_function("verify_woven_method", |b| {
        b.iter(|| verify_method(black_box(&method)));
    });
}

fn bench_exposition(c: &mut Criterion) {
    let registry = Registry::new();
    for i in 0..32 {
        let labels = vec![format!("caller{}", i % 4)];
        registry
            .counter(&format!("calls_{}", i), "calls", &["caller".to_string()])
            .unwrap()
            .inc(Some(&labels));
        registry
            .histogram(&format!("latency_{}", i), "latency", &["caller".to_string()])
            .unwrap()
            .observe(Some(&labels), 1_500_000);
    }

    c.bench_function("render_exposition", |b| {
        b.iter(|| exposition::render(black_box(&registry)));
    });
}

criterion_group!(benches, bench_rewrite, bench_verify, bench_exposition);
criterion_main!(benches);
