//! Bundled product comparison (`pge compare`)
//!
//! Compares an output directory against a directory of expected products
//! and writes the two files the QA dispatcher looks for: an HTML table and
//! the `.rc` verdict. Files are paired by the naming-rule label of the
//! product, or by relative path when no rule matches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Serialize;
use tera::Tera;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog::{RuleSet, FRAMEWORK_FILES};
use crate::qa::{rc_file_name, results_file_name, QaVerdict};

const RESULTS_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ product }} comparison</title></head>
<body>
<h1>{{ product }}: {{ verdict }}</h1>
<p>Output: {{ output_dir }}<br>Expected: {{ expected_dir }}</p>
<table border="1">
<tr><th>Result</th><th>Expected file</th><th>Output file</th><th>Comparator output</th></tr>
{% for row in rows %}<tr><td>{{ row.result }}</td><td>{{ row.expected | default(value="") }}</td><td>{{ row.output | default(value="") }}</td><td>{{ row.detail }}</td></tr>
{% endfor %}</table>
</body>
</html>
"#;

#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub output_dir: PathBuf,
    pub expected_dir: PathBuf,
    /// Product short name or identifier
    pub product: String,
    /// Where to write the HTML and `.rc` files (defaults to `output_dir`)
    pub results_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareResult {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "SKIPPED")]
    Skipped,
    #[serde(rename = "N/A")]
    NotApplicable,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub result: CompareResult,
    pub output: Option<String>,
    pub expected: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonReport {
    pub fn verdict(&self) -> QaVerdict {
        if self.rows.iter().any(|r| r.result == CompareResult::Error) {
            QaVerdict::InternalFailure
        } else if self.rows.iter().any(|r| r.result == CompareResult::Fail) {
            QaVerdict::ProductMismatch
        } else {
            QaVerdict::Pass
        }
    }
}

fn is_skipped(name: &str, product: &str) -> bool {
    name.ends_with(".log")
        || FRAMEWORK_FILES.contains(&name)
        || name == rc_file_name(product)
        || name == results_file_name(product)
}

/// Production time embedded in canonical names
static TIME_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_\d{8}T\d{6}Z_").expect("Invalid time segment pattern"));

/// Relative path with the production time removed, so canonical names
/// from different runs pair up
fn path_key(rel: &str) -> String {
    format!("path:{}", TIME_SEGMENT.replace_all(rel, "_"))
}

/// Files of one directory, keyed for pairing
#[derive(Debug, Default)]
struct DirIndex {
    keyed: BTreeMap<String, String>,
    skipped: Vec<String>,
    /// Files whose label and path keys were both taken
    unpaired: Vec<String>,
}

/// Index the files to compare. The first file carrying a label is paired by
/// label; later files with the same label fall back to their path key.
fn index(dir: &Path, rules: &RuleSet, product: &str) -> Result<DirIndex> {
    let mut index = DirIndex::default();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = entry.file_name().to_string_lossy();
        if is_skipped(&name, product) {
            index.skipped.push(rel);
            continue;
        }
        let by_path = path_key(&rel);
        let key = match rules.classify(&rel) {
            Some((_, label)) if !index.keyed.contains_key(&format!("label:{}", label)) => {
                format!("label:{}", label)
            }
            _ => by_path,
        };
        if index.keyed.contains_key(&key) {
            index.unpaired.push(rel);
        } else {
            index.keyed.insert(key, rel);
        }
    }
    Ok(index)
}

fn compare_files(output: &Path, expected: &Path) -> (CompareResult, String) {
    let read = |p: &Path| std::fs::read(p).with_context(|| format!("Failed to read {}", p.display()));
    match (read(output), read(expected)) {
        (Ok(a), Ok(b)) if a == b => (CompareResult::Pass, format!("identical ({} bytes)", a.len())),
        (Ok(a), Ok(b)) => {
            let first = a
                .iter()
                .zip(b.iter())
                .position(|(x, y)| x != y)
                .unwrap_or_else(|| a.len().min(b.len()));
            (
                CompareResult::Fail,
                format!(
                    "differs at byte {} ({} bytes vs {} expected)",
                    first,
                    a.len(),
                    b.len()
                ),
            )
        }
        (Err(e), _) | (_, Err(e)) => (CompareResult::Error, format!("{:#}", e)),
    }
}

/// Pair and compare the two directory trees
pub fn compare_directories(opts: &CompareOptions) -> Result<ComparisonReport> {
    for (what, dir) in [("output", &opts.output_dir), ("expected", &opts.expected_dir)] {
        if !dir.is_dir() {
            bail!("{} directory '{}' does not exist", what, dir.display());
        }
    }
    let rules = RuleSet::for_product(&opts.product)?;
    let outputs = index(&opts.output_dir, &rules, &opts.product)?;
    let mut expected_index = index(&opts.expected_dir, &rules, &opts.product)?;
    let mut expected = std::mem::take(&mut expected_index.keyed);

    let mut rows = Vec::new();
    for (key, out_rel) in outputs.keyed {
        let row = match expected.remove(&key) {
            Some(exp_rel) => {
                let (result, detail) = compare_files(
                    &opts.output_dir.join(&out_rel),
                    &opts.expected_dir.join(&exp_rel),
                );
                ComparisonRow {
                    result,
                    output: Some(out_rel),
                    expected: Some(exp_rel),
                    detail,
                }
            }
            None => ComparisonRow {
                result: CompareResult::NotApplicable,
                output: Some(out_rel),
                expected: None,
                detail: "no expected counterpart".to_string(),
            },
        };
        rows.push(row);
    }
    rows.extend(expected.into_values().map(|exp_rel| ComparisonRow {
        result: CompareResult::Fail,
        output: None,
        expected: Some(exp_rel),
        detail: "missing from output".to_string(),
    }));
    rows.extend(outputs.unpaired.into_iter().map(|rel| ComparisonRow {
        result: CompareResult::Error,
        output: Some(rel),
        expected: None,
        detail: "cannot be paired unambiguously".to_string(),
    }));
    rows.extend(expected_index.unpaired.into_iter().map(|rel| ComparisonRow {
        result: CompareResult::Error,
        output: None,
        expected: Some(rel),
        detail: "cannot be paired unambiguously".to_string(),
    }));
    rows.extend(outputs.skipped.into_iter().map(|rel| ComparisonRow {
        result: CompareResult::Skipped,
        output: Some(rel),
        expected: None,
        detail: "not compared".to_string(),
    }));
    rows.extend(expected_index.skipped.into_iter().map(|rel| ComparisonRow {
        result: CompareResult::Skipped,
        output: None,
        expected: Some(rel),
        detail: "not compared".to_string(),
    }));
    Ok(ComparisonReport { rows })
}

/// Write the HTML table and `.rc` verdict; returns their paths
pub fn write_results(
    report: &ComparisonReport,
    opts: &CompareOptions,
) -> Result<(PathBuf, PathBuf)> {
    let dir = opts.results_dir.as_deref().unwrap_or(&opts.output_dir);
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let verdict = report.verdict();
    let mut context = tera::Context::new();
    context.insert("product", &opts.product);
    context.insert("verdict", &verdict.to_string().to_uppercase());
    context.insert("output_dir", &opts.output_dir.display().to_string());
    context.insert("expected_dir", &opts.expected_dir.display().to_string());
    context.insert("rows", &report.rows);
    let html = Tera::one_off(RESULTS_TEMPLATE, &context, true).context("Failed to render comparison report")?;

    let html_path = dir.join(results_file_name(&opts.product));
    let rc_path = dir.join(rc_file_name(&opts.product));
    std::fs::write(&html_path, html).with_context(|| format!("Failed to write {}", html_path.display()))?;
    std::fs::write(&rc_path, format!("{}\n", verdict.code()))
        .with_context(|| format!("Failed to write {}", rc_path.display()))?;
    Ok((html_path, rc_path))
}

/// Entry point of `pge compare`
///
/// Fails only when the comparison could not start (missing directories or
/// an unwritable results directory). Product differences are reported in
/// the `.rc` file, never in the return value.
pub fn run(opts: &CompareOptions) -> Result<QaVerdict> {
    let report = compare_directories(opts)?;
    let verdict = report.verdict();
    for row in report.rows.iter().filter(|r| r.result == CompareResult::Fail) {
        warn!(
            output = ?row.output,
            expected = ?row.expected,
            detail = %row.detail,
            "Product mismatch"
        );
    }
    let (html, rc) = write_results(&report, opts)?;
    info!(
        verdict = %verdict,
        compared = report.rows.len(),
        html = %html.display(),
        rc = %rc.display(),
        "Comparison finished"
    );
    Ok(verdict)
}
