// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::weave::MetricKind;

/// Workspace configuration for the weaver.
/// Can be defined in weaver.yaml, weaver.json, or .weaver/config.yaml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaverConfig {
    /// Declarations keyed by `pkg/Class` (class level) or
    /// `pkg/Class.method(desc)` (method level)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Vec<MetricDeclaration>>,

    /// Glob patterns of classes that may be woven; absent means all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<Vec<String>>,

    /// Glob patterns of classes that are never woven
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_list: Option<Vec<String>>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// One metric declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDeclaration {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Label templates, `name:value`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default level (trace, debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Use ANSI colors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansi: Option<bool>,
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, and CLI configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub metrics: BTreeMap<String, Vec<MetricDeclaration>>,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub log_level: String,
    pub ansi: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            metrics: BTreeMap::new(),
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            log_level: "warn".to_string(),
            ansi: true,
        }
    }
}

impl ResolvedConfig {
    /// The merged logging settings, for subscriber setup.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: Some(self.log_level.clone()),
            ansi: Some(self.ansi),
        }
    }
}
