//! Tree walker for expression-dialect schemas

use serde_json::Value;

use super::{Literal, Node, Schema, Validator, Violation};

/// Path of a map field below `parent`
pub(crate) fn child(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn index(parent: &str, i: usize) -> String {
    format!("{}[{}]", parent, i)
}

/// Short description of a value for violation reports
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.chars().count() > 40 => {
            format!("'{}...'", s.chars().take(40).collect::<String>())
        }
        Value::String(s) => format!("'{}'", s),
        Value::Array(items) => format!("list of {}", items.len()),
        Value::Object(map) => format!("map of {}", map.len()),
    }
}

pub(crate) fn node(schema: &Schema, node: &Node, value: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(map) = value.as_object() else {
        out.push(Violation::new(path, "map", describe(value)));
        return;
    };

    for (key, rule) in &node.fields {
        let field_path = child(path, key);
        match map.get(key) {
            None if rule.required => {
                out.push(Violation::new(field_path, "required field", "missing"));
            }
            None => {}
            Some(Value::Null) if !rule.required => {}
            Some(found) => check(schema, &rule.validator, found, &field_path, out),
        }
    }
}

fn bounds_f64(value: f64, min: Option<f64>, max: Option<f64>) -> Option<String> {
    match (min, max) {
        (Some(lo), _) if value < lo => Some(format!(">= {}", lo)),
        (_, Some(hi)) if value > hi => Some(format!("<= {}", hi)),
        _ => None,
    }
}

fn bounds_len(len: usize, min: Option<usize>, max: Option<usize>, what: &str) -> Option<String> {
    match (min, max) {
        (Some(lo), _) if len < lo => Some(format!("{} with at least {} elements", what, lo)),
        (_, Some(hi)) if len > hi => Some(format!("{} with at most {} elements", what, hi)),
        _ => None,
    }
}

fn literal_matches(literal: &Literal, value: &Value) -> bool {
    match (literal, value) {
        (Literal::Str(a), Value::String(b)) => a == b,
        (Literal::Num(a), Value::Number(b)) => b.as_f64() == Some(*a),
        (Literal::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Whether a validator is about the same kind of value, ignoring constraints.
///
/// Used to pick which branch of a union should report nested violations.
fn same_kind(schema: &Schema, validator: &Validator, value: &Value) -> bool {
    match validator {
        Validator::Str { .. } | Validator::Regex(_) => value.is_string(),
        Validator::Int { .. } => is_integer(value),
        Validator::Num { .. } => value.is_number(),
        Validator::Bool => value.is_boolean(),
        Validator::Null => value.is_null(),
        Validator::Anything => true,
        Validator::Enum(literals) => literals.iter().any(|l| {
            matches!(
                (l, value),
                (Literal::Str(_), Value::String(_))
                    | (Literal::Num(_), Value::Number(_))
                    | (Literal::Bool(_), Value::Bool(_))
            )
        }),
        Validator::List { .. } => value.is_array(),
        Validator::Map { .. } | Validator::Nested(_) => value.is_object(),
        Validator::Include(name) => value.is_object() && schema.include(name).is_some(),
        Validator::Any(options) => options.iter().any(|v| same_kind(schema, v, value)),
    }
}

/// Validate against any of `options`; nested violations are reported only
/// when exactly one option is of the value's kind
fn union(schema: &Schema, options: &[Validator], value: &Value, path: &str, out: &mut Vec<Violation>) {
    let mut candidates = Vec::new();
    for option in options {
        let mut found = Vec::new();
        check(schema, option, value, path, &mut found);
        if found.is_empty() {
            return;
        }
        if same_kind(schema, option, value) {
            candidates.push(found);
        }
    }

    if candidates.len() == 1 {
        out.append(&mut candidates[0]);
    } else {
        let expected = options
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        out.push(Violation::new(path, format!("any of ({})", expected), describe(value)));
    }
}

pub(crate) fn check(
    schema: &Schema,
    validator: &Validator,
    value: &Value,
    path: &str,
    out: &mut Vec<Violation>,
) {
    match validator {
        Validator::Str { min, max } => match value.as_str() {
            Some(s) => {
                if let Some(expected) = bounds_len(s.chars().count(), *min, *max, "string") {
                    out.push(Violation::new(path, expected, describe(value)));
                }
            }
            None => out.push(Violation::new(path, validator.to_string(), describe(value))),
        },
        Validator::Int { min, max } => {
            if !is_integer(value) {
                out.push(Violation::new(path, validator.to_string(), describe(value)));
            } else if let Some(expected) = value.as_f64().and_then(|n| bounds_f64(n, *min, *max)) {
                out.push(Violation::new(path, format!("integer {}", expected), describe(value)));
            }
        }
        Validator::Num { min, max } => match value.as_f64() {
            Some(n) => {
                if let Some(expected) = bounds_f64(n, *min, *max) {
                    out.push(Violation::new(path, format!("number {}", expected), describe(value)));
                }
            }
            None => out.push(Violation::new(path, validator.to_string(), describe(value))),
        },
        Validator::Bool => {
            if !value.is_boolean() {
                out.push(Violation::new(path, "bool()", describe(value)));
            }
        }
        Validator::Null => {
            if !value.is_null() {
                out.push(Violation::new(path, "null()", describe(value)));
            }
        }
        Validator::Anything => {}
        Validator::Enum(literals) => {
            if !literals.iter().any(|l| literal_matches(l, value)) {
                out.push(Violation::new(path, validator.to_string(), describe(value)));
            }
        }
        Validator::Regex(patterns) => {
            let matched = value
                .as_str()
                .map(|s| patterns.iter().any(|p| p.is_match(s)))
                .unwrap_or(false);
            if !matched {
                out.push(Violation::new(path, validator.to_string(), describe(value)));
            }
        }
        Validator::List { items, min, max } => {
            let Some(list) = value.as_array() else {
                out.push(Violation::new(path, "list", describe(value)));
                return;
            };
            if let Some(expected) = bounds_len(list.len(), *min, *max, "list") {
                out.push(Violation::new(path, expected, describe(value)));
            }
            if items.is_empty() {
                return;
            }
            for (i, item) in list.iter().enumerate() {
                let item_path = index(path, i);
                match items.as_slice() {
                    [only] => check(schema, only, item, &item_path, out),
                    many => union(schema, many, item, &item_path, out),
                }
            }
        }
        Validator::Map {
            values,
            key,
            min,
            max,
        } => {
            let Some(map) = value.as_object() else {
                out.push(Violation::new(path, "map", describe(value)));
                return;
            };
            if let Some(expected) = bounds_len(map.len(), *min, *max, "map") {
                out.push(Violation::new(path, expected, describe(value)));
            }
            for (k, v) in map {
                let entry_path = child(path, k);
                if let Some(key_validator) = key {
                    let mut key_violations = Vec::new();
                    check(schema, key_validator, &Value::String(k.clone()), &entry_path, &mut key_violations);
                    for mut violation in key_violations {
                        violation.expected = format!("key {}", violation.expected);
                        out.push(violation);
                    }
                }
                match values.as_slice() {
                    [] => {}
                    [only] => check(schema, only, v, &entry_path, out),
                    many => union(schema, many, v, &entry_path, out),
                }
            }
        }
        Validator::Include(name) => match schema.include(name) {
            Some(included) => node(schema, included, value, path, out),
            None => out.push(Violation::new(path, format!("include('{}')", name), "undefined schema")),
        },
        Validator::Any(options) => union(schema, options, value, path, out),
        Validator::Nested(inner) => node(schema, inner, value, path, out),
    }
}

fn fmt_bounds<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    name: &str,
    prefix: &[String],
    min: &Option<T>,
    max: &Option<T>,
) -> std::fmt::Result {
    let mut parts = prefix.to_vec();
    if let Some(lo) = min {
        parts.push(format!("min={}", lo));
    }
    if let Some(hi) = max {
        parts.push(format!("max={}", hi));
    }
    write!(f, "{}({})", name, parts.join(", "))
}

impl std::fmt::Display for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validator::Str { min, max } => fmt_bounds(f, "str", &[], min, max),
            Validator::Int { min, max } => fmt_bounds(f, "int", &[], min, max),
            Validator::Num { min, max } => fmt_bounds(f, "num", &[], min, max),
            Validator::Bool => write!(f, "bool()"),
            Validator::Null => write!(f, "null()"),
            Validator::Anything => write!(f, "any()"),
            Validator::Enum(literals) => {
                let values = literals
                    .iter()
                    .map(|l| match l {
                        Literal::Str(s) => format!("'{}'", s),
                        Literal::Num(n) => n.to_string(),
                        Literal::Bool(b) => b.to_string(),
                    })
                    .collect::<Vec<_>>();
                write!(f, "enum({})", values.join(", "))
            }
            Validator::Regex(patterns) => {
                let values = patterns
                    .iter()
                    .map(|p| format!("'{}'", p.as_str()))
                    .collect::<Vec<_>>();
                write!(f, "regex({})", values.join(", "))
            }
            Validator::List { items, min, max } => {
                let inner = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                fmt_bounds(f, "list", &inner, min, max)
            }
            Validator::Map { values, min, max, .. } => {
                let inner = values.iter().map(ToString::to_string).collect::<Vec<_>>();
                fmt_bounds(f, "map", &inner, min, max)
            }
            Validator::Include(name) => write!(f, "include('{}')", name),
            Validator::Any(options) => {
                let inner = options.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "any({})", inner.join(", "))
            }
            Validator::Nested(_) => write!(f, "map"),
        }
    }
}
