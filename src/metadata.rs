//! ISO-style metadata generation
//!
//! Metadata is produced in three steps:
//! 1. load the measured-parameter descriptors (YAML, keyed by value path)
//! 2. extract values from the structured artifacts the SAS produced
//!    (`.json`, `.yaml` and `.yml` files)
//! 3. render the template with [`render`], a pure function of the template,
//!    the descriptors and the extracted values
//!
//! A missing value is fatal unless its descriptor is marked `optional`, in
//! which case it renders as [`NOT_FOUND`] and produces a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tera::{Context, Tera};
use tracing::debug;

use crate::error::{PgeError, Result};

/// Rendered in place of optional values that could not be found
pub const NOT_FOUND: &str = "Not Found!";

/// Attribute types of ISO 19115 measured parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    AuxiliaryData,
    AuxiliaryInformation,
    ContentInformation,
    Coordinate,
    GeographicIdentifier,
    Image,
    ModelResult,
    PhysicalMeasurement,
    QualityInformation,
    ReferenceInformation,
    ThematicClassification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
    Float,
    Bool,
    Datetime,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDescriptor {
    pub description: String,
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub attribute_data_type: Option<DataType>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub escape_html: bool,
    #[serde(default)]
    pub optional: bool,
}

/// Descriptors in file order
#[derive(Debug, Clone, Default)]
pub struct MeasuredParameters(Vec<(String, ParameterDescriptor)>);

fn metadata_error(reason: impl Into<String>) -> PgeError {
    PgeError::Metadata {
        reason: reason.into(),
    }
}

impl MeasuredParameters {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mapping: serde_yaml::Mapping = serde_yaml::from_str(text)
            .map_err(|e| metadata_error(format!("descriptor file is not a YAML mapping: {}", e)))?;
        let mut params = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = key
                .as_str()
                .ok_or_else(|| metadata_error(format!("descriptor key {:?} is not a string", key)))?
                .to_string();
            let descriptor: ParameterDescriptor = serde_yaml::from_value(value)
                .map_err(|e| metadata_error(format!("descriptor '{}': {}", key, e)))?;
            params.push((key, descriptor));
        }
        Ok(Self(params))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| metadata_error(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterDescriptor)> {
        self.0.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// VALUE EXTRACTION
// ============================================================================

/// Merged tree of every structured artifact
#[derive(Debug, Clone)]
pub struct MetadataValues {
    tree: Value,
    /// Artifacts that looked structured but failed to parse
    pub skipped: Vec<String>,
}

impl Default for MetadataValues {
    fn default() -> Self {
        Self::from_tree(Value::Object(Map::new()))
    }
}

/// Merge `from` into `into`; keys already present win
fn merge(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        match into.get_mut(&key) {
            Some(Value::Object(existing)) => {
                if let Value::Object(incoming) = value {
                    merge(existing, incoming);
                }
            }
            Some(_) => {}
            None => {
                into.insert(key, value);
            }
        }
    }
}

fn parse_structured(path: &Path) -> Option<std::result::Result<Value, String>> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let is_json = match ext.as_str() {
        "json" => true,
        "yaml" | "yml" => false,
        _ => return None,
    };
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return Some(Err(e.to_string())),
    };
    if is_json {
        Some(serde_json::from_str(&text).map_err(|e| e.to_string()))
    } else {
        Some(serde_yaml::from_str(&text).map_err(|e| e.to_string()))
    }
}

impl MetadataValues {
    pub fn from_tree(tree: Value) -> Self {
        Self {
            tree,
            skipped: Vec::new(),
        }
    }

    /// Extract values from artifacts, first (sorted) file winning on conflicts
    pub fn from_artifacts(paths: &[PathBuf]) -> Self {
        let mut sorted: Vec<&PathBuf> = paths.iter().collect();
        sorted.sort();

        let mut tree = Map::new();
        let mut skipped = Vec::new();
        for path in sorted {
            match parse_structured(path) {
                None => {}
                Some(Ok(Value::Object(map))) => {
                    debug!(path = %path.display(), keys = map.len(), "Extracted metadata values");
                    merge(&mut tree, map);
                }
                Some(Ok(_)) => skipped.push(format!(
                    "'{}' is not a mapping; no metadata extracted",
                    path.display()
                )),
                Some(Err(e)) => skipped.push(format!(
                    "'{}' could not be parsed for metadata: {}",
                    path.display(),
                    e
                )),
            }
        }
        Self {
            tree: Value::Object(tree),
            skipped,
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Resolve a key as a literal top-level key, then as a `/` or `.` path.
    /// A null value counts as absent.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.tree.get(key).filter(|v| !v.is_null()) {
            return Some(value);
        }
        let separator = if key.contains('/') { '/' } else { '.' };
        key.split(separator)
            .filter(|s| !s.is_empty())
            .try_fold(&self.tree, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
            .filter(|v| !v.is_null())
    }
}

// ============================================================================
// RENDERING
// ============================================================================

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce an extracted value to its declared data type
fn coerce(value: &Value, data_type: Option<DataType>) -> std::result::Result<String, String> {
    let Some(data_type) = data_type else {
        return Ok(text_of(value));
    };
    let mismatch = || format!("{} is not a valid {:?}", value, data_type);
    match data_type {
        DataType::String => Ok(text_of(value)),
        DataType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Value::String(s) => s.trim().parse::<i64>().map(|i| i.to_string()).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        DataType::Float => match value {
            Value::Number(n) => n.as_f64().map(|f| f.to_string()).ok_or_else(mismatch),
            Value::String(s) => s.trim().parse::<f64>().map(|f| f.to_string()).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        DataType::Bool => match value {
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok("true".into()),
                "false" => Ok("false".into()),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        DataType::Datetime => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .ok_or_else(mismatch),
    }
}

/// One measured parameter as seen by the template
#[derive(Debug, Clone, Serialize)]
pub struct RenderedParameter {
    pub key: String,
    pub name: String,
    pub description: String,
    pub attribute_type: AttributeType,
    pub data_type: Option<DataType>,
    pub value: String,
    pub found: bool,
}

#[derive(Debug, Clone)]
pub struct RenderedMetadata {
    pub document: String,
    pub warnings: Vec<String>,
}

fn tera_error(err: &tera::Error) -> PgeError {
    let mut reason = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    metadata_error(reason)
}

/// Render `template` against the descriptors and extracted values
///
/// `product` carries run-level fields (product name, version, production
/// time, ...) and is merged into the template context as-is.
pub fn render(
    template: &str,
    params: &MeasuredParameters,
    values: &MetadataValues,
    product: &Context,
) -> Result<RenderedMetadata> {
    let mut warnings = Vec::new();
    let mut rendered = Vec::with_capacity(params.len());

    for (key, descriptor) in params.iter() {
        let coerced = match values.lookup(key) {
            Some(value) => coerce(value, descriptor.attribute_data_type).map_err(|e| (e, true)),
            None => Err(("value not found in any structured artifact".to_string(), false)),
        };
        let (value, found) = match coerced {
            Ok(text) if descriptor.escape_html => (tera::escape_html(&text), true),
            Ok(text) => (text, true),
            Err((reason, _)) if descriptor.optional => {
                warnings.push(format!("Optional metadata parameter '{}': {}", key, reason));
                (NOT_FOUND.to_string(), false)
            }
            Err((_, false)) => {
                return Err(PgeError::MetadataParameterMissing {
                    key: key.to_string(),
                })
            }
            Err((reason, true)) => {
                return Err(metadata_error(format!("parameter '{}': {}", key, reason)))
            }
        };
        rendered.push(RenderedParameter {
            key: key.to_string(),
            name: descriptor.display_name.clone().unwrap_or_else(|| key.to_string()),
            description: descriptor.description.clone(),
            attribute_type: descriptor.attribute_type,
            data_type: descriptor.attribute_data_type,
            value,
            found,
        });
    }

    let by_key: BTreeMap<&str, &str> = rendered
        .iter()
        .map(|p| (p.key.as_str(), p.value.as_str()))
        .collect();

    let mut context = Context::new();
    context.insert("measured_parameters", &rendered);
    context.insert("parameters", &by_key);
    context.insert("values", values.tree());
    context.extend(product.clone());

    let document = Tera::one_off(template, &context, false).map_err(|e| tera_error(&e))?;
    Ok(RenderedMetadata { document, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DESCRIPTORS: &str = r#"
QA/WaterPercent:
  description: Percentage of water pixels
  attribute_type: qualityInformation
  attribute_data_type: float
  display_name: WaterPercent
SensorName:
  description: Sensor
  attribute_type: contentInformation
  escape_html: true
Notes:
  description: Free text
  attribute_type: auxiliaryInformation
  optional: true
"#;

    const TEMPLATE: &str = "<md>{% for p in measured_parameters %}<p name=\"{{ p.name }}\" type=\"{{ p.attribute_type }}\">{{ p.value }}</p>{% endfor %}<v>{{ product_version }}</v></md>";

    fn product() -> Context {
        let mut ctx = Context::new();
        ctx.insert("product_version", "1.0");
        ctx
    }

    #[test]
    fn descriptors_keep_file_order() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["QA/WaterPercent", "SensorName", "Notes"]);
    }

    #[test]
    fn unknown_attribute_type_is_rejected() {
        let err = MeasuredParameters::from_yaml("X:\n  description: d\n  attribute_type: bogus\n")
            .unwrap_err();
        assert!(matches!(err, PgeError::Metadata { .. }));
    }

    #[test]
    fn renders_and_warns_on_optional() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let values = MetadataValues::from_tree(json!({
            "QA": {"WaterPercent": "12.5"},
            "SensorName": "HLS <S30>"
        }));
        let out = render(TEMPLATE, &params, &values, &product()).unwrap();
        assert_eq!(
            out.document,
            "<md><p name=\"WaterPercent\" type=\"qualityInformation\">12.5</p>\
             <p name=\"SensorName\" type=\"contentInformation\">HLS &lt;S30&gt;</p>\
             <p name=\"Notes\" type=\"auxiliaryInformation\">Not Found!</p><v>1.0</v></md>"
        );
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("Notes"));
    }

    #[test]
    fn missing_required_value_is_fatal() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let values = MetadataValues::from_tree(json!({"SensorName": "x"}));
        let err = render(TEMPLATE, &params, &values, &product()).unwrap_err();
        assert!(matches!(err, PgeError::MetadataParameterMissing { ref key } if key == "QA/WaterPercent"));
    }

    #[test]
    fn type_mismatch_is_fatal() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let values = MetadataValues::from_tree(json!({"QA": {"WaterPercent": "lots"}, "SensorName": "x"}));
        let err = render(TEMPLATE, &params, &values, &product()).unwrap_err();
        assert!(matches!(err, PgeError::Metadata { .. }));
    }

    #[test]
    fn render_is_deterministic() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let values = MetadataValues::from_tree(json!({"QA": {"WaterPercent": 3}, "SensorName": "x"}));
        let a = render(TEMPLATE, &params, &values, &product()).unwrap();
        let b = render(TEMPLATE, &params, &values, &product()).unwrap();
        assert_eq!(a.document, b.document);
    }

    #[test]
    fn broken_template_is_metadata_error() {
        let err = render("{% for %}", &MeasuredParameters::default(), &MetadataValues::default(), &product())
            .unwrap_err();
        assert!(matches!(err, PgeError::Metadata { .. }));
    }

    #[test]
    fn lookup_paths() {
        let values = MetadataValues::from_tree(json!({
            "a.b": 1,
            "a": {"b": 2, "list": [10, 20]},
            "n": null
        }));
        assert_eq!(values.lookup("a.b"), Some(&json!(1)));
        assert_eq!(values.lookup("a/b"), Some(&json!(2)));
        assert_eq!(values.lookup("a/list/1"), Some(&json!(20)));
        assert_eq!(values.lookup("a/missing"), None);
        assert_eq!(values.lookup("n/x"), None);
        assert_eq!(values.lookup("n"), None);
    }

    #[test]
    fn null_required_value_is_fatal() {
        let params = MeasuredParameters::from_yaml(DESCRIPTORS).unwrap();
        let values = MetadataValues::from_tree(json!({"QA/WaterPercent": null, "SensorName": "x"}));
        let err = render(TEMPLATE, &params, &values, &product()).unwrap_err();
        assert!(matches!(err, PgeError::MetadataParameterMissing { ref key } if key == "QA/WaterPercent"));
    }

    #[test]
    fn coercions() {
        assert_eq!(coerce(&json!("7"), Some(DataType::Int)).unwrap(), "7");
        assert!(coerce(&json!(7.5), Some(DataType::Int)).is_err());
        assert_eq!(coerce(&json!("TRUE"), Some(DataType::Bool)).unwrap(), "true");
        assert_eq!(
            coerce(&json!("2024-01-02T03:04:05+01:00"), Some(DataType::Datetime)).unwrap(),
            "2024-01-02T02:04:05Z"
        );
        assert_eq!(coerce(&json!({"k": 1}), None).unwrap(), "{\"k\":1}");
    }

    #[test]
    fn artifacts_merge_first_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.yaml");
        let bad = dir.path().join("c.json");
        let tif = dir.path().join("d.tif");
        std::fs::write(&a, r#"{"shared": "from-a", "nested": {"x": 1}}"#).unwrap();
        std::fs::write(&b, "shared: from-b\nnested:\n  y: 2\nonly_b: true\n").unwrap();
        std::fs::write(&bad, "{oops").unwrap();
        std::fs::write(&tif, [0xffu8, 0xfe, 0x00, 0x89]).unwrap();

        let values = MetadataValues::from_artifacts(&[tif, bad, b, a]);
        assert_eq!(values.lookup("shared"), Some(&json!("from-a")));
        assert_eq!(values.lookup("nested/x"), Some(&json!(1)));
        assert_eq!(values.lookup("nested/y"), Some(&json!(2)));
        assert_eq!(values.lookup("only_b"), Some(&json!(true)));
        assert_eq!(values.skipped.len(), 1);
        assert!(values.skipped[0].contains("c.json"), "{:?}", values.skipped);
    }

    #[test]
    fn binary_products_are_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let tif = dir.path().join("product.tif");
        let h5 = dir.path().join("product.h5");
        std::fs::write(&tif, [0xffu8, 0xfe, 0x00, 0x89]).unwrap();
        std::fs::write(&h5, [0x89u8, b'H', b'D', b'F', 0xff]).unwrap();

        let values = MetadataValues::from_artifacts(&[tif, h5]);
        assert!(values.skipped.is_empty(), "{:?}", values.skipped);
        assert_eq!(values.tree(), &json!({}));
    }
}
