//! Error code taxonomy
//!
//! Every product owns a disjoint `ErrorCodeBase`; the code reported for a run is
//! `base + offset`, where the offset comes from the fixed table below.
//!
//! Offset ranges:
//! - 0: success
//! - 10000-19999: degraded outcomes (products delivered, verdict unfavourable)
//! - 30000-39999: fatal failures

use serde::Serialize;

/// Largest accepted `ErrorCodeBase`; keeps every code inside an `i32`
pub const MAX_ERROR_CODE_BASE: i64 = 2_147_000_000;

/// Offset within a product's error code range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOffset {
    OverallSuccess,
    QaProductMismatch,
    ConfigurationError,
    MissingInput,
    AlgorithmFailed,
    OutputValidationFailed,
    QaInternalFailure,
}

impl ErrorOffset {
    pub const fn value(self) -> i64 {
        match self {
            ErrorOffset::OverallSuccess => 0,
            ErrorOffset::QaProductMismatch => 10000,
            ErrorOffset::ConfigurationError => 30000,
            ErrorOffset::MissingInput => 30001,
            ErrorOffset::AlgorithmFailed => 30002,
            ErrorOffset::OutputValidationFailed => 30003,
            ErrorOffset::QaInternalFailure => 30004,
        }
    }

    /// True for offsets that terminate the run
    pub const fn is_fatal(self) -> bool {
        self.value() >= 30000
    }

    /// Absolute code for a product base
    pub const fn code(self, base: i64) -> i64 {
        match self {
            ErrorOffset::OverallSuccess => 0,
            other => base.saturating_add(other.value()),
        }
    }
}

impl std::fmt::Display for ErrorOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorOffset::OverallSuccess => "overall success",
            ErrorOffset::QaProductMismatch => "QA product mismatch",
            ErrorOffset::ConfigurationError => "configuration error",
            ErrorOffset::MissingInput => "missing input or permission error",
            ErrorOffset::AlgorithmFailed => "algorithm execution error",
            ErrorOffset::OutputValidationFailed => "output validation error",
            ErrorOffset::QaInternalFailure => "QA internal error",
        };
        write!(f, "{} (+{})", name, self.value())
    }
}
