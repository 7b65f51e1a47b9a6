// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration-backed weaving policy.

use std::collections::HashMap;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::error::ConfigError;
use crate::weave::{MetricDescriptor, Policy};

use super::types::{MetricDeclaration, ResolvedConfig};

/// Classes that are never rewritten.
pub const BUILTIN_DENY: &[&str] = &["java/**", "javax/**", "sun/**", "jdk/**", "weaver/**"];

/// A [`Policy`] built from resolved configuration.
///
/// All declarations are validated up front, so lookups during weaving
/// cannot fail.
#[derive(Debug, Clone)]
pub struct ConfigPolicy {
    allow: Option<GlobSet>,
    deny: GlobSet,
    class_metrics: HashMap<String, Vec<MetricDescriptor>>,
    method_metrics: HashMap<(String, String), Vec<MetricDescriptor>>,
}

/// Where a metrics key points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricTarget {
    Class(String),
    Method { class: String, signature: String },
}

impl MetricTarget {
    /// Parse `pkg/Class` or `pkg/Class.method(desc)R`.
    ///
    /// Dotted class names are accepted and normalized to internal form.
    pub fn parse(key: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            field: format!("metrics.{}", key),
            message: message.to_string(),
        };

        let key = key.trim();
        match key.find('(') {
            None => {
                if key.is_empty() {
                    return Err(invalid("empty class name"));
                }
                Ok(Self::Class(key.replace('.', "/")))
            }
            Some(paren) => {
                let (head, descriptor) = key.split_at(paren);
                let dot = head
                    .rfind('.')
                    .ok_or_else(|| invalid("method key needs `Class.method(desc)`"))?;
                let (class, name) = (&head[..dot], &head[dot + 1..]);
                if class.is_empty() || name.is_empty() {
                    return Err(invalid("method key needs `Class.method(desc)`"));
                }
                if !descriptor.contains(')') {
                    return Err(invalid("unterminated method descriptor"));
                }
                Ok(Self::Method {
                    class: class.replace('.', "/"),
                    signature: format!("{}{}", name, descriptor),
                })
            }
        }
    }
}

impl ConfigPolicy {
    /// Build the policy, rejecting bad patterns and declarations.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let allow = if config.allow_list.is_empty() {
            None
        } else {
            Some(build_globset(&config.allow_list)?)
        };

        let deny_patterns: Vec<String> = BUILTIN_DENY
            .iter()
            .map(|p| p.to_string())
            .chain(config.deny_list.iter().cloned())
            .collect();
        let deny = build_globset(&deny_patterns)?;

        let mut class_metrics: HashMap<String, Vec<MetricDescriptor>> = HashMap::new();
        let mut method_metrics: HashMap<(String, String), Vec<MetricDescriptor>> = HashMap::new();

        for (key, declarations) in &config.metrics {
            let descriptors = declarations
                .iter()
                .map(|d| to_descriptor(key, d))
                .collect::<Result<Vec<_>, _>>()?;

            match MetricTarget::parse(key)? {
                MetricTarget::Class(class) => {
                    class_metrics.entry(class).or_default().extend(descriptors);
                }
                MetricTarget::Method { class, signature } => {
                    method_metrics
                        .entry((class, signature))
                        .or_default()
                        .extend(descriptors);
                }
            }
        }

        debug!(
            classes = class_metrics.len(),
            methods = method_metrics.len(),
            "Built config policy"
        );

        Ok(Self {
            allow,
            deny,
            class_metrics,
            method_metrics,
        })
    }

    /// Number of declared metrics across all keys.
    pub fn declared_count(&self) -> usize {
        self.class_metrics.values().map(Vec::len).sum::<usize>()
            + self.method_metrics.values().map(Vec::len).sum::<usize>()
    }
}

impl Policy for ConfigPolicy {
    fn is_eligible(&self, class_name: &str) -> bool {
        if self.deny.is_match(class_name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.is_match(class_name),
            None => true,
        }
    }

    fn find_class_metrics(&self, class_name: &str) -> Vec<MetricDescriptor> {
        self.class_metrics.get(class_name).cloned().unwrap_or_default()
    }

    fn find_method_metrics(&self, class_name: &str, method_signature: &str) -> Vec<MetricDescriptor> {
        self.method_metrics
            .get(&(class_name.to_string(), method_signature.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

fn to_descriptor(key: &str, decl: &MetricDeclaration) -> Result<MetricDescriptor, ConfigError> {
    MetricDescriptor::parse(decl.kind, decl.name.clone(), decl.doc.clone(), &decl.labels).map_err(
        |e| ConfigError::InvalidValue {
            field: format!("metrics.{}", key),
            message: e.to_string(),
        },
    )
}

/// Build a globset where `*` stays within one package and `**` crosses.
fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(&pattern.replace('.', "/"))
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::InvalidPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weave::MetricKind;

    fn decl(kind: MetricKind, name: &str, labels: &[&str]) -> MetricDeclaration {
        MetricDeclaration {
            kind,
            name: name.to_string(),
            doc: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_class_key() {
        assert_eq!(
            MetricTarget::parse("com.acme.Orders").unwrap(),
            MetricTarget::Class("com/acme/Orders".to_string())
        );
    }

    #[test]
    fn test_parse_method_key() {
        assert_eq!(
            MetricTarget::parse("com/acme/Orders.place(Ljava/lang/String;I)V").unwrap(),
            MetricTarget::Method {
                class: "com/acme/Orders".to_string(),
                signature: "place(Ljava/lang/String;I)V".to_string(),
            }
        );
        assert_eq!(
            MetricTarget::parse("com/acme/Orders.<init>()V").unwrap(),
            MetricTarget::Method {
                class: "com/acme/Orders".to_string(),
                signature: "<init>()V".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_bad_keys() {
        assert!(MetricTarget::parse("").is_err());
        assert!(MetricTarget::parse("place()V").is_err());
        assert!(MetricTarget::parse("a/B.(I)V").is_err());
        assert!(MetricTarget::parse("a/B.run(I").is_err());
    }

    #[test]
    fn test_builtin_deny() {
        let policy = ConfigPolicy::from_config(&ResolvedConfig::default()).unwrap();
        assert!(!policy.is_eligible("java/lang/String"));
        assert!(!policy.is_eligible("weaver/runtime/MetricSystem"));
        assert!(policy.is_eligible("com/acme/Orders"));
    }

    #[test]
    fn test_allow_and_deny_lists() {
        let config = ResolvedConfig {
            allow_list: vec!["com/acme/*".to_string()],
            deny_list: vec!["com.acme.Secret".to_string()],
            ..Default::default()
        };
        let policy = ConfigPolicy::from_config(&config).unwrap();
        assert!(policy.is_eligible("com/acme/Orders"));
        assert!(!policy.is_eligible("com/acme/Secret"));
        assert!(!policy.is_eligible("com/acme/sub/Deep"));
        assert!(!policy.is_eligible("org/other/Thing"));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = ResolvedConfig {
            deny_list: vec!["com/[acme".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            ConfigPolicy::from_config(&config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_lookup_by_class_and_method() {
        let mut config = ResolvedConfig::default();
        config.metrics.insert(
            "com/acme/Orders".to_string(),
            vec![decl(MetricKind::Counter, "orders_total", &[])],
        );
        config.metrics.insert(
            "com/acme/Orders.place(Ljava/lang/String;)V".to_string(),
            vec![decl(MetricKind::Timer, "place_latency", &["customer:$0"])],
        );

        let policy = ConfigPolicy::from_config(&config).unwrap();
        assert_eq!(policy.declared_count(), 2);
        assert_eq!(policy.find_class_metrics("com/acme/Orders")[0].name, "orders_total");

        let found = policy.find_method_metrics("com/acme/Orders", "place(Ljava/lang/String;)V");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MetricKind::Timer);
        assert_eq!(found[0].label_names(), vec!["customer"]);

        assert!(policy.find_method_metrics("com/acme/Orders", "place()V").is_empty());
    }

    #[test]
    fn test_bad_label_is_config_error() {
        let mut config = ResolvedConfig::default();
        config.metrics.insert(
            "a/B.run()V".to_string(),
            vec![decl(MetricKind::Counter, "runs", &["no_separator"])],
        );
        let err = ConfigPolicy::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "metrics.a/B.run()V"));
    }

    #[test]
    fn test_bad_metric_name_is_config_error() {
        let mut config = ResolvedConfig::default();
        config.metrics.insert(
            "a/B".to_string(),
            vec![decl(MetricKind::Gauge, "has space", &[])],
        );
        assert!(ConfigPolicy::from_config(&config).is_err());
    }
}
