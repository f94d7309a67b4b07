//! JSON Schema dialect
//!
//! Product teams that already publish a JSON Schema for their SAS section
//! can point `SchemaPath` at it directly.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use serde_json::Value;

use super::validate::child;
use super::Violation;
use crate::error::{PgeError, Result};

/// Compiled JSON Schema
pub struct JsonSchema {
    name: String,
    validator: Validator,
}

impl std::fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchema").field("name", &self.name).finish()
    }
}

impl JsonSchema {
    pub fn from_str(name: &str, text: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(text).map_err(|e| PgeError::InvalidSchema {
            name: name.to_string(),
            details: format!("JSON parse error: {}", e),
        })?;
        let validator = Validator::new(&schema).map_err(|e| PgeError::InvalidSchema {
            name: name.to_string(),
            details: format!("failed to compile schema: {}", e),
        })?;
        Ok(Self {
            name: name.to_string(),
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validate_at(&self, doc: &Value, base: &str) -> Vec<Violation> {
        self.validator
            .iter_errors(doc)
            .map(|e| violation(base, &e))
            .collect()
    }
}

/// A missing required property is reported by jsonschema at its parent;
/// point the violation at the property itself.
fn violation(base: &str, error: &ValidationError<'_>) -> Violation {
    let path = pointer_to_path(base, &error.instance_path.to_string());
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            let field = property
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| property.to_string());
            Violation::new(child(&path, &field), "required field", "missing")
        }
        _ => Violation::new(path, error.to_string(), error.instance.to_string()),
    }
}

/// `/Groups/Items/0/Id` -> `base.Groups.Items[0].Id`
fn pointer_to_path(base: &str, pointer: &str) -> String {
    let mut path = base.to_string();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            path = format!("{}[{}]", path, segment);
        } else {
            path = child(&path, &segment);
        }
    }
    path
}
