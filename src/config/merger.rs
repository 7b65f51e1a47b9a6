// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, WeaverConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Extra allow patterns
    pub allow: Vec<String>,
    /// Extra deny patterns
    pub deny: Vec<String>,
    pub log_level: Option<String>,
    pub no_color: bool,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (weaver.yaml and friends)
/// 3. Global config (~/.weaver/config.yaml)
/// 4. Default values
///
/// Metric entries are replaced per key. Allow and deny lists accumulate.
pub fn merge_config(
    global: Option<WeaverConfig>,
    workspace: Option<WeaverConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_weaver_config(&mut result, config);
    }

    if let Some(config) = workspace {
        apply_weaver_config(&mut result, config);
    }

    apply_cli_options(&mut result, cli);

    result
}

fn apply_weaver_config(result: &mut ResolvedConfig, config: WeaverConfig) {
    result.metrics.extend(config.metrics);

    if let Some(allow) = config.allow_list {
        extend_unique(&mut result.allow_list, allow);
    }
    if let Some(deny) = config.deny_list {
        extend_unique(&mut result.deny_list, deny);
    }

    if let Some(logging) = config.logging {
        if let Some(level) = logging.level {
            result.log_level = level;
        }
        if let Some(ansi) = logging.ansi {
            result.ansi = ansi;
        }
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: CliOptions) {
    extend_unique(&mut result.allow_list, cli.allow);
    extend_unique(&mut result.deny_list, cli.deny);

    if let Some(level) = cli.log_level {
        result.log_level = level;
    }
    if cli.no_color {
        result.ansi = false;
    }
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
