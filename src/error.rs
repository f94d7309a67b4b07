//! PGE error types
//!
//! Every variant maps onto one offset of the error code taxonomy
//! (see [`crate::error_code`]), so the controller never has to guess which
//! exit code a failure deserves.

use thiserror::Error;

use crate::error_code::ErrorOffset;
use crate::schema::Violation;

pub type Result<T> = std::result::Result<T, PgeError>;

/// Format schema violations for display
fn format_violations(violations: &[Violation]) -> String {
    match violations {
        [] => "no violations".to_string(),
        [single] => single.to_string(),
        many => format!(
            "{} violations: {}",
            many.len(),
            many.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum PgeError {
    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS
    // ═══════════════════════════════════════════
    #[error("Failed to read RunConfig '{path}': {reason}")]
    ConfigRead { path: String, reason: String },

    #[error("Failed to parse RunConfig '{path}': {details}")]
    ConfigParse { path: String, details: String },

    #[error("Invalid schema '{name}': {details}")]
    InvalidSchema { name: String, details: String },

    #[error("{section} failed schema validation: {}", format_violations(.violations))]
    SchemaViolations {
        section: String,
        violations: Vec<Violation>,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ═══════════════════════════════════════════
    // INPUT / PERMISSION ERRORS
    // ═══════════════════════════════════════════
    #[error("Missing {what}: {path}")]
    MissingInput { what: String, path: String },

    #[error("Cannot prepare directory '{path}': {reason}")]
    DirectorySetup { path: String, reason: String },

    #[error("Program not found: {program}")]
    ProgramNotFound { program: String },

    // ═══════════════════════════════════════════
    // ALGORITHM ERRORS
    // ═══════════════════════════════════════════
    #[error("Failed to launch '{program}': {reason}")]
    ProgramLaunch { program: String, reason: String },

    #[error("'{program}' {status} (log: {log_path})")]
    AlgorithmFailed {
        program: String,
        status: String,
        log_path: String,
    },

    // ═══════════════════════════════════════════
    // OUTPUT VALIDATION ERRORS
    // ═══════════════════════════════════════════
    #[error("Output '{file}' matches no naming rule")]
    UnmatchedArtifact { file: String },

    #[error("No output matched required rule '{pattern}' ({label})")]
    RequiredArtifactMissing { label: String, pattern: String },

    #[error("Cataloging failed: {reason}")]
    Catalog { reason: String },

    #[error("Metadata parameter '{key}' could not be extracted")]
    MetadataParameterMissing { key: String },

    #[error("Metadata generation failed: {reason}")]
    Metadata { reason: String },

    // ═══════════════════════════════════════════
    // QA ERRORS
    // ═══════════════════════════════════════════
    #[error("QA could not render a verdict: {reason}")]
    QaFailed { reason: String },
}

impl PgeError {
    /// Offset of the error code this failure reports
    pub fn offset(&self) -> ErrorOffset {
        match self {
            PgeError::ConfigRead { .. }
            | PgeError::ConfigParse { .. }
            | PgeError::InvalidSchema { .. }
            | PgeError::SchemaViolations { .. }
            | PgeError::InvalidConfig { .. } => ErrorOffset::ConfigurationError,

            PgeError::MissingInput { .. }
            | PgeError::DirectorySetup { .. }
            | PgeError::ProgramNotFound { .. } => ErrorOffset::MissingInput,

            PgeError::ProgramLaunch { .. } | PgeError::AlgorithmFailed { .. } => {
                ErrorOffset::AlgorithmFailed
            }

            PgeError::UnmatchedArtifact { .. }
            | PgeError::RequiredArtifactMissing { .. }
            | PgeError::Catalog { .. }
            | PgeError::MetadataParameterMissing { .. }
            | PgeError::Metadata { .. } => ErrorOffset::OutputValidationFailed,

            PgeError::QaFailed { .. } => ErrorOffset::QaInternalFailure,
        }
    }

    /// Violations carried by a schema failure
    pub fn violations(&self) -> &[Violation] {
        match self {
            PgeError::SchemaViolations { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl FixSuggestion for PgeError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PgeError::ConfigRead { .. } => Some("Check the --file path and its permissions"),
            PgeError::ConfigParse { .. } => Some("Check YAML syntax: indentation and quoting"),
            PgeError::InvalidSchema { .. } => {
                Some("Check the schema expressions, e.g. str(), int(min=0), include('name')")
            }
            PgeError::SchemaViolations { .. } => {
                Some("Fix the listed fields in the RunConfig; unknown fields are ignored")
            }
            PgeError::InvalidConfig { .. } => Some("Check field types in the PGE group"),
            PgeError::MissingInput { .. } => Some("Verify input and ancillary paths exist"),
            PgeError::DirectorySetup { .. } => {
                Some("Check the output and scratch locations are writable")
            }
            PgeError::ProgramNotFound { .. } => {
                Some("Check PrimaryExecutable.ProgramPath or enable ExecuteViaShell")
            }
            PgeError::ProgramLaunch { .. } => Some("Check the program is executable"),
            PgeError::AlgorithmFailed { .. } => {
                Some("Inspect the SAS log in the output directory; partial outputs were kept")
            }
            PgeError::UnmatchedArtifact { .. } => {
                Some("Add a naming rule for the file or disable ExhaustiveMatch")
            }
            PgeError::RequiredArtifactMissing { .. } => {
                Some("Check the SAS produced every required output")
            }
            PgeError::Catalog { .. } => None,
            PgeError::MetadataParameterMissing { .. } => {
                Some("Mark the parameter optional: true if it may be absent")
            }
            PgeError::Metadata { .. } => Some("Check the ISO template and parameter descriptions"),
            PgeError::QaFailed { .. } => Some("Inspect the QA log in the output directory"),
        }
    }
}
