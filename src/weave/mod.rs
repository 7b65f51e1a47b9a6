// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The weaving engine.
//!
//! A rewrite runs in three stages over a private copy of the unit:
//!
//! 1. [`extract`] finds which methods get which metrics and validates the
//!    declarations.
//! 2. [`setup`] adds one static handle slot per metric and the code that
//!    creates the handles in the static initializer.
//! 3. [`dispatch`] rewrites each planned method through the [`injectors`].
//!
//! Every touched method is verified before and after. Any failure rejects
//! the whole unit and the input bytes are left as they were.
//!
//! # Example
//!
//! ```rust,ignore
//! use weaver::weave::{AnnotationsOnly, RewriteOutcome, Weaver};
//!
//! let weaver = Weaver::new(AnnotationsOnly);
//! match weaver.rewrite(&bytes) {
//!     RewriteOutcome::Rewritten(out) => load(out),
//!     RewriteOutcome::Unchanged => load(bytes),
//!     RewriteOutcome::Rejected(reason) => eprintln!("{reason}"),
//! }
//! ```

pub mod contract;
pub mod dispatch;
pub mod emitter;
pub mod extract;
pub mod injectors;
pub mod labels;
pub mod model;
pub mod setup;

pub use extract::{extract_plan, AnnotationsOnly, Policy};
pub use model::{
    ClassPlan, LabelBase, LabelSource, LabelSpec, MethodPlan, MetricDescriptor, MetricKind,
    DEFAULT_DOC, MAX_LABELS,
};

use tracing::{debug, info, warn};

use crate::error::WeaveError;
use crate::telemetry::RewriteSpan;
use crate::unit::verify::verify_method;
use crate::unit::{codec, Annotation, ClassUnit};

/// Result of offering a unit to the weaver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The unit was instrumented; load these bytes instead.
    Rewritten(Vec<u8>),
    /// Nothing to do; load the original bytes.
    Unchanged,
    /// Weaving failed; the reason names the class, method, and declaration.
    Rejected(String),
}

impl RewriteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rewritten(_) => "rewritten",
            Self::Unchanged => "unchanged",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Orchestrates rewrites against a fixed policy.
///
/// The weaver holds no mutable state, so one instance can serve many loader
/// threads at once.
#[derive(Debug, Clone)]
pub struct Weaver<P: Policy> {
    policy: P,
}

impl<P: Policy> Weaver<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Rewrite one encoded unit.
    pub fn rewrite(&self, bytes: &[u8]) -> RewriteOutcome {
        let span = RewriteSpan::start();
        let outcome = match codec::decode(bytes) {
            Ok(unit) => {
                span.record_class(&unit.name);
                match self.weave(&unit) {
                    Ok(Some(woven)) => match codec::encode(&woven) {
                        Ok(out) => RewriteOutcome::Rewritten(out),
                        Err(e) => RewriteOutcome::Rejected(WeaveError::from(e).to_string()),
                    },
                    Ok(None) => RewriteOutcome::Unchanged,
                    Err(e) => {
                        if e.is_structural() {
                            warn!(class = %unit.name, error = %e, "Weaving defect, unit rejected");
                        } else {
                            warn!(class = %unit.name, error = %e, "Unit rejected");
                        }
                        RewriteOutcome::Rejected(e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Undecodable unit");
                RewriteOutcome::Rejected(WeaveError::from(e).to_string())
            }
        };
        span.finish(&outcome);
        outcome
    }

    /// Weave a decoded unit, returning `None` when nothing applies.
    pub fn weave(&self, unit: &ClassUnit) -> Result<Option<ClassUnit>, WeaveError> {
        if unit.has_annotation(contract::WOVEN_MARKER) {
            debug!(class = %unit.name, "Already woven");
            return Ok(None);
        }

        let plan = extract_plan(unit, &self.policy)?;
        if plan.is_empty() {
            return Ok(None);
        }

        let mut woven = unit.clone();
        weave_unit(&mut woven, &plan)?;
        info!(
            class = %unit.name,
            methods = plan.methods.len(),
            metrics = plan.class_metrics.len(),
            "Wove unit"
        );
        Ok(Some(woven))
    }
}

/// Apply `plan` to `unit` in place.
///
/// On error the unit may be partially modified; callers work on a copy.
pub fn weave_unit(unit: &mut ClassUnit, plan: &ClassPlan) -> Result<(), WeaveError> {
    let class_name = unit.name.clone();

    for method_plan in &plan.methods {
        let method = unit
            .method_mut(&method_plan.name, &method_plan.descriptor)
            .ok_or_else(|| {
                WeaveError::InvalidDeclaration(format!(
                    "{}: planned method {} is missing",
                    class_name,
                    method_plan.signature()
                ))
            })?;

        verify_method(method).map_err(|source| WeaveError::MalformedInput {
            class: class_name.clone(),
            method: method.signature(),
            source,
        })?;

        dispatch::weave_method(&class_name, method, method_plan)?;
        finalize_frames(&class_name, method)?;
    }

    if let Some(clinit) = unit.methods.iter().find(|m| m.is_static_initializer()) {
        verify_method(clinit).map_err(|source| WeaveError::MalformedInput {
            class: class_name.clone(),
            method: clinit.signature(),
            source,
        })?;
    }

    setup::synthesize(unit, &plan.class_metrics)?;
    if let Some(clinit) = unit.methods.iter_mut().find(|m| m.is_static_initializer()) {
        finalize_frames(&class_name, clinit)?;
    }

    unit.annotations.push(Annotation::new(contract::WOVEN_MARKER));
    Ok(())
}

fn finalize_frames(class_name: &str, method: &mut crate::unit::Method) -> Result<(), WeaveError> {
    let info = verify_method(method).map_err(|source| WeaveError::Structural {
        class: class_name.to_string(),
        method: method.signature(),
        source,
    })?;
    method.max_stack = info.max_stack;
    method.max_locals = info.max_locals;
    Ok(())
}
