// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Weaver - load-time metrics weaving for compiled class units.
//!
//! Methods annotated (or configured) with counter, gauge, timer, and
//! exception-counter declarations are rewritten so the telemetry is recorded
//! without touching source code.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`unit`] - The class unit model, descriptors, codec, and stack verifier
//! - [`weave`] - Metric discovery, handle setup, and method rewriting
//! - [`telemetry`] - Metric registry, text exposition, and logging setup
//! - [`host`] - A reference interpreter that runs woven units
//! - [`config`] - Configuration loading, merging, and the config policy
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use weaver::config::{load_config, CliOptions, ConfigPolicy};
//! use weaver::weave::{RewriteOutcome, Weaver};
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let weaver = Weaver::new(ConfigPolicy::from_config(&config)?);
//!
//! if let RewriteOutcome::Rewritten(bytes) = weaver.rewrite(&original) {
//!     host.load_bytes(&bytes)?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod telemetry;
pub mod unit;
pub mod weave;

// Re-export commonly used types at crate root
pub use error::{
    CodecError, ConfigError, HostError, RegistryError, Result, VerifyError, WeaveError,
};
pub use host::{Host, Value};
pub use telemetry::{Registry, GLOBAL_REGISTRY};
pub use unit::{ClassUnit, Method};
pub use weave::{AnnotationsOnly, MetricDescriptor, MetricKind, Policy, RewriteOutcome, Weaver};

/// Weaver version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _weaver = Weaver::new(AnnotationsOnly);
        let registry = Registry::new();
        assert!(registry.collectors().is_empty());
        assert_eq!(MetricKind::ALL.len(), 4);
    }
}
