// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the weaver.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.weaver/config.yaml
//! - Workspace config: weaver.yaml, weaver.yml, weaver.json, or .weaver/config.yaml
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults)
//! and turned into a [`ConfigPolicy`] for the weaving engine.

mod loader;
mod merger;
mod policy;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use policy::{ConfigPolicy, MetricTarget, BUILTIN_DENY};

pub use types::{LoggingConfig, MetricDeclaration, ResolvedConfig, WeaverConfig};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    Ok(merge_config(global, workspace, cli_options))
}

/// Load configuration from one explicit file, skipping discovery.
pub fn load_explicit_config(
    path: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let file = load_config_file(path)?;
    Ok(merge_config(None, Some(file), cli_options))
}
