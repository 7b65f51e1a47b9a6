// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prometheus text exposition of a [`Registry`].

use std::fmt::Write;

use super::registry::{Collector, Registry};

/// Render every collector in `registry`, ordered by name.
///
/// Histogram buckets are cumulative and expressed in nanoseconds.
pub fn render(registry: &Registry) -> String {
    let mut out = String::new();
    for collector in registry.collectors() {
        let meta = collector.meta();
        let _ = writeln!(out, "# HELP {} {}", meta.name, escape_help(&meta.help));
        let _ = writeln!(out, "# TYPE {} {}", meta.name, collector.type_name());

        match &collector {
            Collector::Counter(counter) => {
                for (values, value) in counter.samples() {
                    let labels = format_labels(&meta.label_names, &values, None);
                    let _ = writeln!(out, "{}{} {}", meta.name, labels, value);
                }
            }
            Collector::Gauge(gauge) => {
                for (values, value) in gauge.samples() {
                    let labels = format_labels(&meta.label_names, &values, None);
                    let _ = writeln!(out, "{}{} {}", meta.name, labels, value);
                }
            }
            Collector::Histogram(hist) => {
                for (values, snap) in hist.samples() {
                    let mut cumulative = 0;
                    for (bound, count) in hist.buckets().iter().zip(&snap.bucket_counts) {
                        cumulative += count;
                        let le = bound.to_string();
                        let labels = format_labels(&meta.label_names, &values, Some(&le));
                        let _ = writeln!(out, "{}_bucket{} {}", meta.name, labels, cumulative);
                    }
                    let labels = format_labels(&meta.label_names, &values, Some("+Inf"));
                    let _ = writeln!(out, "{}_bucket{} {}", meta.name, labels, snap.count);

                    let labels = format_labels(&meta.label_names, &values, None);
                    let _ = writeln!(out, "{}_sum{} {}", meta.name, labels, snap.sum);
                    let _ = writeln!(out, "{}_count{} {}", meta.name, labels, snap.count);
                }
            }
        }
    }
    out
}

fn format_labels(names: &[String], values: &[String], le: Option<&str>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(n, v)| format!("{}=\"{}\"", n, escape_value(v)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{}\"", le));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counter_and_gauge() {
        let registry = Registry::new();
        let counter = registry
            .counter("requests", "Requests served", &["path".to_string()])
            .unwrap();
        counter.inc(Some(&["/a\"b".to_string()]));
        registry.gauge("inflight", "In flight", &[]).unwrap().inc(None);

        insta::assert_snapshot!(render(&registry), @r###"
        # HELP inflight In flight
        # TYPE inflight gauge
        inflight 1
        # HELP requests Requests served
        # TYPE requests counter
        requests{path="/a\"b"} 1
        "###);
    }

    #[test]
    fn test_render_histogram_is_cumulative() {
        let registry = Registry::new();
        let hist = registry.histogram("latency", "Latency", &[]).unwrap();
        hist.observe(None, 500);
        hist.observe(None, 2_000);

        let text = render(&registry);
        assert!(text.contains("latency_bucket{le=\"1000\"} 1"));
        assert!(text.contains("latency_bucket{le=\"10000\"} 2"));
        assert!(text.contains("latency_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("latency_sum 2500"));
        assert!(text.contains("latency_count 2"));
    }

    #[test]
    fn test_render_empty_collector_has_header_only() {
        let registry = Registry::new();
        registry.counter("idle", "Never hit", &[]).unwrap();
        assert_eq!(render(&registry), "# HELP idle Never hit\n# TYPE idle counter\n");
    }
}
