//! Schema Module - declarative structural validation
//!
//! Two schema dialects are accepted:
//! - `expr`: YAML documents whose leaves are validator expressions
//!   (`str()`, `int(min=0)`, `list(include('rule'), min=1)`, ...). The first
//!   YAML document is the root schema, later documents define includes.
//! - `json`: JSON Schema documents (files ending in `.json`).
//!
//! Validation is side-effect free and returns every violation with the
//! deepest path at which it was found. Unknown fields are never an error.

mod expr;
mod json;
mod validate;

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PgeError, Result};

pub use json::JsonSchema;

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Logical path, e.g. `RunConfig.Groups.PGE.InputFilesGroup.InputFilePaths[0]`
    pub path: String,
    /// Constraint that was not met
    pub expected: String,
    /// What was found instead
    pub actual: String,
}

impl Violation {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() {
            "<root>"
        } else {
            &self.path
        };
        write!(f, "[{}] expected {}, got {}", path, self.expected, self.actual)
    }
}

/// Literal accepted by `enum(...)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// A compiled validator expression
#[derive(Debug, Clone)]
pub(crate) enum Validator {
    Str {
        min: Option<usize>,
        max: Option<usize>,
    },
    Int {
        min: Option<f64>,
        max: Option<f64>,
    },
    Num {
        min: Option<f64>,
        max: Option<f64>,
    },
    Bool,
    Null,
    /// `any()` without arguments
    Anything,
    Enum(Vec<Literal>),
    Regex(Vec<Regex>),
    List {
        items: Vec<Validator>,
        min: Option<usize>,
        max: Option<usize>,
    },
    Map {
        values: Vec<Validator>,
        key: Option<Box<Validator>>,
        min: Option<usize>,
        max: Option<usize>,
    },
    Include(String),
    Any(Vec<Validator>),
    Nested(Node),
}

/// A field of a schema node
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub validator: Validator,
    pub required: bool,
}

/// A map-shaped schema: ordered fields with their rules
#[derive(Debug, Clone, Default)]
pub(crate) struct Node {
    pub fields: Vec<(String, Rule)>,
}

/// Expression-dialect schema with its named includes
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    root: Node,
    includes: HashMap<String, Node>,
}

impl Schema {
    /// Compile a (multi-document) YAML schema
    pub fn from_yaml(name: &str, text: &str) -> Result<Self> {
        let invalid = |details: String| PgeError::InvalidSchema {
            name: name.to_string(),
            details,
        };

        let mut root = None;
        let mut includes = HashMap::new();

        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| invalid(format!("YAML parse error: {}", e)))?;
            if value.is_null() {
                continue;
            }
            let node = build_node(&value, "").map_err(invalid)?;
            if root.is_none() {
                root = Some(node);
            } else {
                for (include_name, rule) in node.fields {
                    match rule.validator {
                        Validator::Nested(inner) => {
                            includes.insert(include_name, inner);
                        }
                        _ => {
                            return Err(invalid(format!(
                                "include '{}' must be a map of fields",
                                include_name
                            )))
                        }
                    }
                }
            }
        }

        let schema = Self {
            name: name.to_string(),
            root: root.ok_or_else(|| invalid("schema is empty".to_string()))?,
            includes,
        };
        schema.check_includes().map_err(invalid)?;
        Ok(schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the include definitions
    pub fn include_names(&self) -> impl Iterator<Item = &str> {
        self.includes.keys().map(String::as_str)
    }

    /// Validate a document against the root schema
    pub fn validate(&self, doc: &Value) -> Vec<Violation> {
        self.validate_at(doc, "")
    }

    /// Validate with every reported path prefixed by `base`
    pub fn validate_at(&self, doc: &Value, base: &str) -> Vec<Violation> {
        let mut out = Vec::new();
        validate::node(self, &self.root, doc, base, &mut out);
        out
    }

    pub(crate) fn include(&self, name: &str) -> Option<&Node> {
        self.includes.get(name)
    }

    fn check_includes(&self) -> std::result::Result<(), String> {
        let mut referenced = Vec::new();
        collect_node_includes(&self.root, &mut referenced);
        for node in self.includes.values() {
            collect_node_includes(node, &mut referenced);
        }
        match referenced.into_iter().find(|n| !self.includes.contains_key(n)) {
            Some(missing) => Err(format!("include('{}') is not defined", missing)),
            None => Ok(()),
        }
    }
}

fn build_node(value: &serde_yaml::Value, path: &str) -> std::result::Result<Node, String> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| format!("{}: schema node must be a map", display_path(path)))?;

    let mut node = Node::default();
    for (key, leaf) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => return Err(format!("{}: unsupported key {:?}", display_path(path), other)),
        };
        let field_path = validate::child(path, &key);
        let rule = match leaf {
            serde_yaml::Value::String(src) => {
                expr::compile(src).map_err(|e| format!("{}: {}", field_path, e))?
            }
            serde_yaml::Value::Mapping(_) => Rule {
                validator: Validator::Nested(build_node(leaf, &field_path)?),
                required: true,
            },
            other => {
                return Err(format!(
                    "{}: expected a validator expression or a map, got {:?}",
                    field_path, other
                ))
            }
        };
        node.fields.push((key, rule));
    }
    Ok(node)
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn collect_node_includes(node: &Node, out: &mut Vec<String>) {
    for (_, rule) in &node.fields {
        collect_includes(&rule.validator, out);
    }
}

fn collect_includes(validator: &Validator, out: &mut Vec<String>) {
    match validator {
        Validator::Include(name) => out.push(name.clone()),
        Validator::List { items, .. } => items.iter().for_each(|v| collect_includes(v, out)),
        Validator::Map { values, key, .. } => {
            values.iter().for_each(|v| collect_includes(v, out));
            if let Some(key) = key {
                collect_includes(key, out);
            }
        }
        Validator::Any(options) => options.iter().for_each(|v| collect_includes(v, out)),
        Validator::Nested(node) => collect_node_includes(node, out),
        _ => {}
    }
}

/// A schema loaded from disk in either dialect
#[derive(Debug)]
pub enum SchemaDocument {
    Expressions(Schema),
    Json(JsonSchema),
}

impl SchemaDocument {
    /// Load a schema file; `.json` files are JSON Schema, anything else is
    /// the expression dialect
    pub fn load(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| PgeError::InvalidSchema {
            name: name.clone(),
            details: format!("cannot read schema: {}", e),
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Ok(Self::Json(JsonSchema::from_str(&name, &text)?))
        } else {
            Ok(Self::Expressions(Schema::from_yaml(&name, &text)?))
        }
    }

    pub fn validate_at(&self, doc: &Value, base: &str) -> Vec<Violation> {
        match self {
            Self::Expressions(schema) => schema.validate_at(doc, base),
            Self::Json(schema) => schema.validate_at(doc, base),
        }
    }
}
