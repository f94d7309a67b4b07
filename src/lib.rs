//! PGE - product generation executable framework
//!
//! Wraps a science algorithm (the SAS) with configuration validation,
//! directory preparation, execution, output cataloging, metadata generation
//! and QA, and reports the outcome as a single error code.

pub mod catalog;
pub mod compare;
pub mod config;
pub mod controller;
pub mod error;
pub mod error_code;
pub mod logging;
pub mod metadata;
pub mod process;
pub mod product;
pub mod qa;
pub mod record;
pub mod schema;
pub mod usage;

pub use config::{RunConfig, RunConfigDocument};
pub use controller::ExecutionController;
pub use error::{FixSuggestion, PgeError};
pub use error_code::ErrorOffset;
pub use record::{ExecutionSummary, RunStatus, Stage};
pub use schema::{Schema, SchemaDocument, Violation};
