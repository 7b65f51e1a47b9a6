// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the weaver.
//!
//! This module provides strongly-typed errors for the different stages of a rewrite,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation.

use thiserror::Error;

use crate::unit::Label;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),


    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors raised while parsing type and method descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Empty descriptor")]
    Empty,

    #[error("Unexpected character '{found}' at offset {offset} in '{descriptor}'")]
    UnexpectedChar {
        descriptor: String,
        offset: usize,
        found: char,
    },

    #[error("Unterminated class name in '{0}'")]
    UnterminatedClass(String),

    #[error("Trailing characters in '{0}'")]
    Trailing(String),

    #[error("'{0}' is not a method descriptor")]
    NotAMethod(String),

    #[error("void is only valid as a return type in '{0}'")]
    MisplacedVoid(String),
}

/// Errors that can occur while encoding or decoding binary units.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Input too short to be a unit ({0} bytes)")]
    Truncated(usize),

    #[error("Bad magic number: not a weaver unit")]
    BadMagic,

    #[error("Unsupported unit format version {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed unit payload: {0}")]
    Malformed(String),

    #[error("JSON unit error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Structural problems found by the method verifier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("Bad descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Label {0} defined more than once")]
    DuplicateLabel(Label),

    #[error("Label {0} is referenced but never defined")]
    UndefinedLabel(Label),

    #[error("Region {start}..{end} is empty or inverted")]
    EmptyRegion { start: Label, end: Label },

    #[error("Regions {first} and {second} overlap without nesting")]
    OverlappingRegions { first: usize, second: usize },

    #[error("Operand stack underflow at instruction {at}")]
    StackUnderflow { at: usize },

    #[error("Type mismatch at instruction {at}: expected {expected}, found {found}")]
    TypeMismatch {
        at: usize,
        expected: String,
        found: String,
    },

    #[error("Inconsistent stack at instruction {at}: {left} vs {right}")]
    InconsistentStack {
        at: usize,
        left: String,
        right: String,
    },

    #[error("Local slot {slot} read before it holds a {kind} at instruction {at}")]
    UninitializedLocal { at: usize, slot: u16, kind: String },

    #[error("Local slot {slot} exceeds max_locals {max_locals} at instruction {at}")]
    LocalOutOfRange { at: usize, slot: u16, max_locals: u16 },

    #[error("Execution falls off the end of the code")]
    FallsOffEnd,

    #[error("Method has no code")]
    NoCode,
}

/// Errors raised while weaving a unit.
///
/// Configuration errors are user mistakes in declarations; structural errors
/// indicate a defect in the injector composition or a malformed input unit.
#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("{class}.{method}: label '{label}' reads argument {index} but the method takes {count} argument(s)")]
    ArgumentOutOfRange {
        class: String,
        method: String,
        label: String,
        index: u16,
        count: usize,
    },

    #[error("{class}.{method}: label '{label}' reads the receiver but the method is static")]
    ReceiverInStaticMethod {
        class: String,
        method: String,
        label: String,
    },

    #[error("{class}.{method}: more than one {kind} declaration ('{first}' and '{second}')")]
    DuplicateKind {
        class: String,
        method: String,
        kind: String,
        first: String,
        second: String,
    },

    #[error("{class}: metric '{name}' declares {count} labels, the maximum is {max}")]
    TooManyLabels {
        class: String,
        name: String,
        count: usize,
        max: usize,
    },

    #[error("{class}: metric '{name}' is declared twice with different kinds or labels")]
    ConflictingMetric { class: String, name: String },

    #[error("Invalid metric declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Invalid label '{spec}': {reason}")]
    InvalidLabel { spec: String, reason: String },

    #[error("{class}.{method}: bad descriptor: {source}")]
    Descriptor {
        class: String,
        method: String,
        #[source]
        source: DescriptorError,
    },

    #[error("{class}.{method}: input method is malformed: {source}")]
    MalformedInput {
        class: String,
        method: String,
        #[source]
        source: VerifyError,
    },

    #[error("{class}.{method}: rewritten method failed verification: {source}")]
    Structural {
        class: String,
        method: String,
        #[source]
        source: VerifyError,
    },

    #[error("{class}: handle slot '{field}' already exists")]
    SlotCollision { class: String, field: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl WeaveError {
    /// Check if this error stems from a bad metric declaration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ArgumentOutOfRange { .. }
                | Self::ReceiverInStaticMethod { .. }
                | Self::DuplicateKind { .. }
                | Self::TooManyLabels { .. }
                | Self::ConflictingMetric { .. }
                | Self::InvalidDeclaration(_)
                | Self::InvalidLabel { .. }
        )
    }

    /// Check if this error indicates a defect in the weaving logic itself.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural { .. } | Self::SlotCollision { .. })
    }
}

/// Errors raised by the telemetry registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Metric '{name}' is already registered as a {existing}")]
    KindConflict { name: String, existing: String },

    #[error("Metric '{name}' is already registered with labels {existing:?}")]
    LabelConflict { name: String, existing: Vec<String> },

    #[error("Invalid metric name '{0}'")]
    InvalidName(String),
}

/// Errors surfaced by the reference host.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Method not found: {owner}.{name}{descriptor}")]
    MethodNotFound {
        owner: String,
        name: String,
        descriptor: String,
    },

    #[error("Field not found: {owner}.{name}")]
    FieldNotFound { owner: String, name: String },

    #[error("Uncaught {class}: {}", .message.as_deref().unwrap_or("<no message>"))]
    Uncaught {
        class: String,
        message: Option<String>,
        object_id: u64,
    },

    #[error("Execution error in {method}: {message}")]
    Execution { method: String, message: String },

    #[error("Call depth exceeded ({0} frames)")]
    StackOverflow(usize),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_weave_error_classification() {
        let err = WeaveError::ArgumentOutOfRange {
            class: "a/B".to_string(),
            method: "run()V".to_string(),
            label: "arg:$3".to_string(),
            index: 3,
            count: 0,
        };
        assert!(err.is_configuration());
        assert!(!err.is_structural());

        let err = WeaveError::Structural {
            class: "a/B".to_string(),
            method: "run()V".to_string(),
            source: VerifyError::FallsOffEnd,
        };
        assert!(err.is_structural());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_error_display_names_class_method_and_label() {
        let err = WeaveError::ArgumentOutOfRange {
            class: "com/acme/Service".to_string(),
            method: "handle(I)V".to_string(),
            label: "id:$2".to_string(),
            index: 2,
            count: 1,
        };
        let display = err.to_string();
        assert!(display.contains("com/acme/Service"));
        assert!(display.contains("handle(I)V"));
        assert!(display.contains("id:$2"));
    }

    #[test]
    fn test_host_error_display_without_message() {
        let err = HostError::Uncaught {
            class: "java/lang/RuntimeException".to_string(),
            message: None,
            object_id: 7,
        };
        assert!(err.to_string().contains("<no message>"));
    }
}
