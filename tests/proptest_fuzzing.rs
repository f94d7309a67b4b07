//! Property-based tests for the parsing and classification paths
//!
//! Coverage targets:
//! - schema expression parsing (schema/expr.rs)
//! - range and list validation (schema/validate.rs)
//! - naming rule classification (catalog.rs)
//! - error code arithmetic (error_code.rs)

use proptest::prelude::*;
use serde_json::json;

use pge::catalog::{NamingRule, RuleSet};
use pge::{ErrorOffset, Schema};

fn schema_with(expr: &str) -> Result<Schema, pge::PgeError> {
    Schema::from_yaml("fuzz", &format!("k: '{}'", expr.replace('\'', "''")))
}

proptest! {
    /// Property: the expression parser never panics
    #[test]
    fn expression_parsing_never_panics(expr in "[ -~]{0,40}") {
        let _ = schema_with(&expr);
    }

    /// Property: well-formed ranges accept exactly the values inside them
    #[test]
    fn int_range_is_inclusive(min in -1000i64..1000, span in 0i64..1000, value in -3000i64..3000) {
        let max = min + span;
        let schema = schema_with(&format!("int(min={}, max={})", min, max)).unwrap();
        let violations = schema.validate(&json!({ "k": value }));
        prop_assert_eq!(violations.is_empty(), (min..=max).contains(&value));
    }

    /// Property: a bad list element is reported at its own index
    #[test]
    fn list_violation_points_at_index(len in 1usize..20, bad in 0usize..20) {
        let bad = bad % len;
        let items: Vec<serde_json::Value> = (0..len)
            .map(|i| if i == bad { json!("x") } else { json!(i) })
            .collect();
        let schema = schema_with("list(int())").unwrap();
        let violations = schema.validate(&json!({ "k": items }));
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(&violations[0].path, &format!("k[{}]", bad));
    }

    /// Property: string length bounds are enforced
    #[test]
    fn str_bounds(s in "[a-z]{0,12}") {
        let schema = schema_with("str(min=3, max=8)").unwrap();
        let ok = schema.validate(&json!({ "k": s.clone() })).is_empty();
        prop_assert_eq!(ok, (3..=8).contains(&s.len()));
    }

    /// Property: dropping any required key is reported at that key
    #[test]
    fn missing_required_key_is_reported(drop in 0usize..4) {
        let keys = ["Alpha", "Beta", "Gamma", "Delta"];
        let schema_text: String = keys.iter().map(|k| format!("{}: int()\n", k)).collect();
        let schema = Schema::from_yaml("fuzz", &schema_text).unwrap();
        let mut doc = serde_json::Map::new();
        for (i, key) in keys.iter().enumerate() {
            if i != drop {
                doc.insert(key.to_string(), json!(i));
            }
        }
        let violations = schema.validate(&serde_json::Value::Object(doc));
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(&violations[0].path, keys[drop]);
    }

    /// Property: enum membership is exact
    #[test]
    fn enum_accepts_only_listed_values(s in "[a-z]{1,6}") {
        let schema = schema_with("enum('fast', 'slow')").unwrap();
        let ok = schema.validate(&json!({ "k": s.clone() })).is_empty();
        prop_assert_eq!(ok, s == "fast" || s == "slow");
    }

    /// Property: the first matching rule always wins
    #[test]
    fn first_rule_wins(stem in "[a-z]{1,10}", ext in "(tif|h5|nc)") {
        let rules = RuleSet::new(vec![
            NamingRule::new(&format!(r"\.{}$", ext), "SPECIFIC", false).unwrap(),
            NamingRule::new(r".*", "ANY", false).unwrap(),
        ]);
        let name = format!("{}.{}", stem, ext);
        prop_assert_eq!(rules.classify(&name), Some((0, "SPECIFIC".to_string())));
        prop_assert_eq!(rules.classify(&stem), Some((1, "ANY".to_string())));
    }

    /// Property: codes are base + offset, success is always zero
    #[test]
    fn error_codes_add_offset(product in 1i64..20) {
        let base = product * 100000;
        prop_assert_eq!(ErrorOffset::OverallSuccess.code(base), 0);
        for offset in [
            ErrorOffset::QaProductMismatch,
            ErrorOffset::ConfigurationError,
            ErrorOffset::MissingInput,
            ErrorOffset::AlgorithmFailed,
            ErrorOffset::OutputValidationFailed,
            ErrorOffset::QaInternalFailure,
        ] {
            prop_assert_eq!(offset.code(base) - base, offset.value());
        }
    }
}
