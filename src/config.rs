//! RunConfig model
//!
//! A RunConfig is a YAML document with two sections:
//! - `RunConfig.Groups.PGE`: framework directives, typed as [`FrameworkConfig`]
//!   and validated against the embedded framework schema
//! - `RunConfig.Groups.SAS`: algorithm directives, kept as an opaque tree
//!   ([`AlgorithmConfig`]) and validated against the schema named in
//!   `PrimaryExecutable.SchemaPath`
//!
//! Loading and validation are separate steps so the controller can report
//! them as separate stages.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PgeError, Result};
use crate::error_code::MAX_ERROR_CODE_BASE;
use crate::product;
use crate::schema::{Schema, SchemaDocument};

/// Embedded framework schema (compiled at build time)
const FRAMEWORK_SCHEMA: &str = include_str!("../schemas/pge_framework.yaml");

pub const PGE_SECTION: &str = "RunConfig.Groups.PGE";
pub const SAS_SECTION: &str = "RunConfig.Groups.SAS";

const PGE_POINTER: &str = "/RunConfig/Groups/PGE";
const SAS_POINTER: &str = "/RunConfig/Groups/SAS";

/// Version used in canonical names when the RunConfig gives none
const DEFAULT_PRODUCT_VERSION: &str = "0.0";

static FRAMEWORK: OnceLock<std::result::Result<Schema, String>> = OnceLock::new();

/// The shared framework schema (lazy initialization)
pub fn framework_schema() -> Result<&'static Schema> {
    let compiled = FRAMEWORK.get_or_init(|| {
        Schema::from_yaml("pge_framework.yaml", FRAMEWORK_SCHEMA).map_err(|e| e.to_string())
    });
    compiled.as_ref().map_err(|e| PgeError::InvalidSchema {
        name: "pge_framework.yaml".to_string(),
        details: e.clone(),
    })
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_true<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn default_true() -> bool {
    true
}

fn scalar_to_string<E: serde::de::Error>(value: Value) -> std::result::Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!("expected a scalar, got {}", other))),
    }
}

/// Program options may be written as bare YAML numbers
fn scalar_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<Value>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(scalar_to_string)
        .collect()
}

fn scalar_string_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Value>::deserialize(deserializer)?
        .filter(|v| !v.is_null())
        .map(scalar_to_string)
        .transpose()
}

// ============================================================================
// FRAMEWORK CONFIG
// ============================================================================

/// `RunConfig.Groups.PGE`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrameworkConfig {
    #[serde(rename = "PGENameGroup")]
    pub pge_name_group: PgeNameGroup,
    pub input_files_group: InputFilesGroup,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dynamic_ancillary_files_group: DynamicAncillaryFilesGroup,
    pub product_path_group: ProductPathGroup,
    pub primary_executable: PrimaryExecutable,
    #[serde(rename = "QAExecutable")]
    pub qa_executable: QaExecutable,
    pub debug_level_group: DebugLevelGroup,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_catalog_group: ProductCatalogGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgeNameGroup {
    #[serde(rename = "PGEName")]
    pub pge_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InputFilesGroup {
    pub input_file_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DynamicAncillaryFilesGroup {
    /// Arbitrary keys, e.g. `dem_file`, `worldcover_file`
    #[serde(default, deserialize_with = "null_as_default")]
    pub ancillary_file_map: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductPathGroup {
    pub output_product_path: PathBuf,
    pub scratch_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrimaryExecutable {
    pub product_identifier: String,
    #[serde(default, deserialize_with = "scalar_string_opt")]
    pub product_version: Option<String>,
    pub program_path: String,
    #[serde(default, deserialize_with = "scalar_strings")]
    pub program_options: Vec<String>,
    pub error_code_base: i64,
    pub schema_path: PathBuf,
    #[serde(default)]
    pub iso_template_path: Option<PathBuf>,
    #[serde(default)]
    pub iso_measured_parameter_descriptions: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QaExecutable {
    pub enabled: bool,
    #[serde(default)]
    pub program_path: Option<String>,
    #[serde(default, deserialize_with = "scalar_strings")]
    pub program_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebugLevelGroup {
    /// Verbose logging
    pub debug_switch: bool,
    /// Run `sh -c "<program> <options>"` instead of the program itself
    #[serde(default, deserialize_with = "null_as_default")]
    pub execute_via_shell: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sample_resource_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductCatalogGroup {
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub rename_outputs: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exhaustive_match: bool,
    /// Overrides the product's default naming rules when non-empty
    #[serde(default, deserialize_with = "null_as_default")]
    pub naming_rules: Vec<NamingRuleConfig>,
}

impl Default for ProductCatalogGroup {
    fn default() -> Self {
        Self {
            rename_outputs: true,
            exhaustive_match: false,
            naming_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamingRuleConfig {
    pub pattern: String,
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required: bool,
}

impl FrameworkConfig {
    pub fn pge_name(&self) -> &str {
        &self.pge_name_group.pge_name
    }

    pub fn product_identifier(&self) -> &str {
        &self.primary_executable.product_identifier
    }

    pub fn product_version(&self) -> &str {
        self.primary_executable
            .product_version
            .as_deref()
            .unwrap_or(DEFAULT_PRODUCT_VERSION)
    }

    pub fn error_code_base(&self) -> i64 {
        self.primary_executable.error_code_base
    }

    pub fn output_dir(&self) -> &Path {
        &self.product_path_group.output_product_path
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.product_path_group.scratch_path
    }

    /// Lowercase product name used in QA file names
    pub fn qa_product_name(&self) -> String {
        product::short_name(self.product_identifier())
    }
}

// ============================================================================
// ALGORITHM CONFIG
// ============================================================================

/// `RunConfig.Groups.SAS`, never interpreted by the framework
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AlgorithmConfig(Value);

impl AlgorithmConfig {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// A parsed but not yet validated RunConfig
#[derive(Debug, Clone)]
pub struct RunConfigDocument {
    source: PathBuf,
    root: Value,
}

/// A validated RunConfig
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: PathBuf,
    pub name: Option<String>,
    pub framework: FrameworkConfig,
    pub algorithm: AlgorithmConfig,
}

impl RunConfigDocument {
    /// Read and parse a RunConfig file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PgeError::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(path, &text)
    }

    /// Parse RunConfig text; `source` is only used for messages
    pub fn parse(source: &Path, text: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text).map_err(|e| PgeError::ConfigParse {
            path: source.display().to_string(),
            details: e.to_string(),
        })?;
        if !root.is_object() {
            return Err(PgeError::ConfigParse {
                path: source.display().to_string(),
                details: "document root must be a map".to_string(),
            });
        }
        Ok(Self {
            source: source.to_path_buf(),
            root,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Best-effort error code base for reporting failures before validation.
    ///
    /// Uses `ErrorCodeBase` when readable, else the product table entry for
    /// `ProductIdentifier`.
    pub fn error_code_base_hint(&self) -> Option<i64> {
        let primary = self.root.pointer(&format!("{}/PrimaryExecutable", PGE_POINTER))?;
        primary
            .get("ErrorCodeBase")
            .and_then(Value::as_i64)
            .filter(|base| (0..=MAX_ERROR_CODE_BASE).contains(base))
            .or_else(|| {
                primary
                    .get("ProductIdentifier")
                    .and_then(Value::as_str)
                    .and_then(product::lookup)
                    .map(|p| p.error_code_base)
            })
    }

    /// Output directory when the document names one, used to place the
    /// summary of runs that fail validation
    pub fn output_dir_hint(&self) -> Option<PathBuf> {
        self.root
            .pointer(&format!("{}/ProductPathGroup/OutputProductPath", PGE_POINTER))
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    /// Validate both sections and produce the typed RunConfig.
    ///
    /// Framework violations are reported before the SAS schema is even loaded.
    pub fn validate(&self) -> Result<RunConfig> {
        let violations = framework_schema()?.validate(&self.root);
        if !violations.is_empty() {
            return Err(PgeError::SchemaViolations {
                section: PGE_SECTION.to_string(),
                violations,
            });
        }

        let pge = self.root.pointer(PGE_POINTER).cloned().unwrap_or(Value::Null);
        let framework: FrameworkConfig =
            serde_json::from_value(pge).map_err(|e| PgeError::InvalidConfig {
                reason: format!("{}: {}", PGE_SECTION, e),
            })?;

        let schema_path = &framework.primary_executable.schema_path;
        debug!(schema = %schema_path.display(), "Loading SAS schema");
        let sas_schema = SchemaDocument::load(schema_path)?;

        let sas = self.root.pointer(SAS_POINTER).cloned().unwrap_or(Value::Null);
        let violations = sas_schema.validate_at(&sas, SAS_SECTION);
        if !violations.is_empty() {
            return Err(PgeError::SchemaViolations {
                section: SAS_SECTION.to_string(),
                violations,
            });
        }

        let name = self
            .root
            .pointer("/RunConfig/Name")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(RunConfig {
            source: self.source.clone(),
            name,
            framework,
            algorithm: AlgorithmConfig(sas),
        })
    }
}

impl RunConfig {
    /// Load, parse and validate in one step
    pub fn load(path: &Path) -> Result<Self> {
        RunConfigDocument::load(path)?.validate()
    }
}
