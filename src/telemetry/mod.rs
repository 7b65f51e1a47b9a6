// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry runtime and logging.
//!
//! Two separate concerns live here:
//!
//! - **Metric runtime**: the [`Registry`] that woven code records into and
//!   its Prometheus text [`exposition`].
//! - **Tracing**: subscriber setup for the CLI and the [`RewriteSpan`] that
//!   times each rewrite.
//!
//! # Usage
//!
//! ```rust,ignore
//! use weaver::telemetry::{init_telemetry, TelemetryConfig, Verbosity, GLOBAL_REGISTRY};
//! use weaver::config::LoggingConfig;
//!
//! init_telemetry(&TelemetryConfig::new(&LoggingConfig::default(), Verbosity::Normal)?)?;
//! let calls = GLOBAL_REGISTRY.counter("calls", "Calls made", &[])?;
//! calls.inc(None);
//! println!("{}", weaver::telemetry::exposition::render(&GLOBAL_REGISTRY));
//! ```

pub mod exposition;
mod init;
pub mod registry;
mod spans;

pub use init::{init_telemetry, TelemetryConfig, Verbosity};
pub use registry::{
    Collector, Counter, Gauge, Histogram, HistogramSnapshot, MetricMeta, Registry,
    DEFAULT_BUCKETS_NANOS, GLOBAL_REGISTRY,
};
pub use spans::{RewriteSpan, REWRITE_DURATION, UNITS_TOTAL};
