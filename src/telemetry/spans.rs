// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for rewrite instrumentation.

use std::time::Instant;
use tracing::{info_span, Span};

use crate::weave::RewriteOutcome;

/// Counter of offered units by outcome.
pub const UNITS_TOTAL: &str = "weaver_units_total";

/// Histogram of rewrite durations.
pub const REWRITE_DURATION: &str = "weaver_rewrite_duration_nanos";

/// RAII guard for timing one rewrite.
///
/// Records the class name, outcome, and duration on the span and, with the
/// `telemetry` feature, in the global registry.
pub struct RewriteSpan {
    start: Instant,
    span: Span,
}

impl RewriteSpan {
    /// Start a new rewrite span.
    pub fn start() -> Self {
        let span = info_span!(
            "rewrite",
            class = tracing::field::Empty,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        Self {
            start: Instant::now(),
            span,
        }
    }

    /// Get the underlying tracing span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_class(&self, class: &str) {
        self.span.record("class", class);
    }

    /// Finish the span, recording duration and outcome.
    pub fn finish(self, outcome: &RewriteOutcome) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record("outcome", outcome.label());

        #[cfg(feature = "telemetry")]
        record_outcome(outcome.label(), duration);

        tracing::debug!(parent: &self.span, "Rewrite complete");
    }
}

#[cfg(feature = "telemetry")]
fn record_outcome(outcome: &str, duration: std::time::Duration) {
    let registry = &super::registry::GLOBAL_REGISTRY;
    let labels = ["outcome".to_string()];

    if let Ok(units) = registry.counter(UNITS_TOTAL, "Units offered to the weaver", &labels) {
        units.inc(Some(&[outcome.to_string()]));
    }
    if let Ok(hist) = registry.histogram(REWRITE_DURATION, "Time spent rewriting one unit", &[]) {
        hist.observe(None, i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_span_lifecycle() {
        let span = RewriteSpan::start();
        span.record_class("com/acme/Job");
        span.finish(&RewriteOutcome::Unchanged);
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_rewrite_span_counts_outcomes() {
        let registry = &super::super::registry::GLOBAL_REGISTRY;
        let before = registry.counter_value(UNITS_TOTAL, &["rejected"]);
        RewriteSpan::start().finish(&RewriteOutcome::Rejected("bad".to_string()));
        assert!(registry.counter_value(UNITS_TOTAL, &["rejected"]) > before);
        assert!(registry.histogram_value(REWRITE_DURATION, &[]).count >= 1);
    }
}
