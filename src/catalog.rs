//! Artifact cataloging
//!
//! After the SAS exits, every file it added to the output directory is
//! classified against an ordered list of naming rules. The first rule whose
//! pattern matches wins, so more specific rules must come first. Matched
//! files are renamed to
//! `<file prefix>_<production time>_v<version>_<label><ext>`.
//!
//! All classification happens before any rename, so a catalog failure never
//! leaves the output directory half renamed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::FrameworkConfig;
use crate::controller::{QA_LOG_FILE, SAS_LOG_FILE, USAGE_FILE};
use crate::error::{PgeError, Result};
use crate::product;
use crate::record::SUMMARY_FILE;

/// Files the framework itself writes into the output directory
pub const FRAMEWORK_FILES: &[&str] = &[SAS_LOG_FILE, QA_LOG_FILE, USAGE_FILE, SUMMARY_FILE];

/// Production time format used in canonical names
pub const TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone)]
pub struct NamingRule {
    pub pattern: Regex,
    /// May reference capture groups as `${name}` or `$1`
    pub label: String,
    pub required: bool,
}

impl NamingRule {
    pub fn new(pattern: &str, label: &str, required: bool) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| PgeError::InvalidConfig {
            reason: format!("naming rule pattern '{}' does not compile: {}", pattern, e),
        })?;
        Ok(Self {
            pattern,
            label: label.to_string(),
            required,
        })
    }

    fn expand(&self, subject: &str) -> Option<String> {
        let caps = self.pattern.captures(subject)?;
        let mut label = String::new();
        caps.expand(&self.label, &mut label);
        Some(label)
    }
}

/// Ordered naming rules plus catalog switches
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<NamingRule>,
    pub rename: bool,
    pub exhaustive: bool,
}

impl RuleSet {
    pub fn new(rules: Vec<NamingRule>) -> Self {
        Self {
            rules,
            rename: true,
            exhaustive: false,
        }
    }

    /// Built-in rules of a known product; empty for unknown ones
    pub fn for_product(identifier: &str) -> Result<Self> {
        let rules = product::lookup(identifier)
            .map(|spec| spec.naming_rules)
            .unwrap_or_default()
            .iter()
            .map(|r| NamingRule::new(r.pattern, r.label, r.required))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Configured rules take precedence over the product defaults
    pub fn from_config(framework: &FrameworkConfig) -> Result<Self> {
        let group = &framework.product_catalog_group;
        let mut set = if group.naming_rules.is_empty() {
            Self::for_product(framework.product_identifier())?
        } else {
            Self::new(
                group
                    .naming_rules
                    .iter()
                    .map(|r| NamingRule::new(&r.pattern, &r.label, r.required))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        set.rename = group.rename_outputs;
        set.exhaustive = group.exhaustive_match;
        Ok(set)
    }

    pub fn rules(&self) -> &[NamingRule] {
        &self.rules
    }

    /// First matching rule and its expanded label
    pub fn classify(&self, subject: &str) -> Option<(usize, String)> {
        self.rules
            .iter()
            .enumerate()
            .find_map(|(i, rule)| rule.expand(subject).map(|label| (i, label)))
    }
}

/// One cataloged output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub original_path: PathBuf,
    pub canonical_path: PathBuf,
    pub label: Option<String>,
    pub renamed: bool,
}

/// `<file prefix>_<production time>_v<version>`
pub fn canonical_core(identifier: &str, version: &str, production: DateTime<Utc>) -> String {
    format!(
        "{}_{}_v{}",
        product::file_prefix(identifier),
        production.format(TIME_FORMAT),
        version
    )
}

/// Set of files present in a directory tree
#[derive(Debug, Clone, Default)]
pub struct OutputSnapshot(BTreeSet<PathBuf>);

fn walk(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| PgeError::Catalog {
            reason: format!("cannot scan '{}': {}", dir.display(), e),
        })?;
        if entry.file_type().is_file() {
            files.insert(entry.into_path());
        }
    }
    Ok(files)
}

impl OutputSnapshot {
    pub fn capture(dir: &Path) -> Result<Self> {
        Ok(Self(walk(dir)?))
    }

    /// Files present now but not at capture time, sorted by path
    pub fn new_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(walk(dir)?.difference(&self.0).cloned().collect())
    }
}

fn is_framework_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| FRAMEWORK_FILES.contains(&n))
        .unwrap_or(false)
}

/// Relative path with `/` separators, used as the match subject
fn match_subject(output_dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(output_dir).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_target(path: &Path, core: &str, label: &str) -> PathBuf {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}{}", core, label, ext))
}

/// Classify and rename the SAS outputs
pub fn catalog(
    rules: &RuleSet,
    output_dir: &Path,
    new_files: &[PathBuf],
    core: &str,
) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    let mut matched_rules = BTreeSet::new();
    let mut targets: HashMap<PathBuf, PathBuf> = HashMap::new();

    for path in new_files.iter().filter(|p| !is_framework_file(p)) {
        let subject = match_subject(output_dir, path);
        match rules.classify(&subject) {
            Some((index, label)) => {
                debug!(file = %subject, rule = index, label = %label, "Matched naming rule");
                matched_rules.insert(index);
                let target = if rules.rename {
                    canonical_target(path, core, &label)
                } else {
                    path.clone()
                };
                if let Some(previous) = targets.insert(target.clone(), path.clone()) {
                    return Err(PgeError::Catalog {
                        reason: format!(
                            "'{}' and '{}' both map to '{}'",
                            previous.display(),
                            path.display(),
                            target.display()
                        ),
                    });
                }
                entries.push(CatalogEntry {
                    original_path: path.clone(),
                    renamed: &target != path,
                    canonical_path: target,
                    label: Some(label),
                });
            }
            None if rules.exhaustive => {
                return Err(PgeError::UnmatchedArtifact { file: subject });
            }
            None => {
                debug!(file = %subject, "No naming rule matched, keeping name");
                entries.push(CatalogEntry {
                    original_path: path.clone(),
                    canonical_path: path.clone(),
                    label: None,
                    renamed: false,
                });
            }
        }
    }

    if let Some(rule) = rules
        .rules
        .iter()
        .enumerate()
        .find(|(i, r)| r.required && !matched_rules.contains(i))
        .map(|(_, r)| r)
    {
        return Err(PgeError::RequiredArtifactMissing {
            label: rule.label.clone(),
            pattern: rule.pattern.as_str().to_string(),
        });
    }

    let originals: BTreeSet<&PathBuf> = entries.iter().map(|e| &e.original_path).collect();
    for entry in entries.iter().filter(|e| e.renamed) {
        if entry.canonical_path.exists() && !originals.contains(&entry.canonical_path) {
            return Err(PgeError::Catalog {
                reason: format!("'{}' already exists", entry.canonical_path.display()),
            });
        }
    }

    rename_all(&entries)?;
    info!(
        artifacts = entries.len(),
        renamed = entries.iter().filter(|e| e.renamed).count(),
        "Cataloged outputs"
    );
    Ok(entries)
}

/// Renames through temporary names so swaps between outputs are safe
fn rename_all(entries: &[CatalogEntry]) -> Result<()> {
    let io = |path: &Path, e: std::io::Error| PgeError::Catalog {
        reason: format!("cannot rename '{}': {}", path.display(), e),
    };
    let mut staged: BTreeMap<PathBuf, &Path> = BTreeMap::new();
    for (i, entry) in entries.iter().filter(|e| e.renamed).enumerate() {
        let tmp = entry
            .original_path
            .with_file_name(format!(".pge-catalog-{}.tmp", i));
        std::fs::rename(&entry.original_path, &tmp).map_err(|e| io(&entry.original_path, e))?;
        staged.insert(tmp, entry.canonical_path.as_path());
    }
    for (tmp, target) in staged {
        std::fs::rename(&tmp, target).map_err(|e| io(&tmp, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, name).unwrap();
        path
    }

    fn rules(specs: &[(&str, &str, bool)]) -> RuleSet {
        RuleSet::new(
            specs
                .iter()
                .map(|(p, l, r)| NamingRule::new(p, l, *r).unwrap())
                .collect(),
        )
    }

    #[test]
    fn canonical_core_format() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            canonical_core("DSWX_HLS", "1.0", t),
            "OPERA_L3_DSWx-HLS_20240305T070809Z_v1.0"
        );
        assert_eq!(canonical_core("MY_PRODUCT", "2", t), "MY_PRODUCT_20240305T070809Z_v2");
    }

    #[test]
    fn first_match_wins() {
        let set = rules(&[(r"_static\.h5$", "STATIC", false), (r"\.h5$", "BURST", false)]);
        assert_eq!(set.classify("t1_static.h5"), Some((0, "STATIC".into())));
        assert_eq!(set.classify("t1.h5"), Some((1, "BURST".into())));

        let swapped = rules(&[(r"\.h5$", "BURST", false), (r"_static\.h5$", "STATIC", false)]);
        assert_eq!(swapped.classify("t1_static.h5"), Some((0, "BURST".into())));
    }

    #[test]
    fn labels_expand_captures() {
        let set = rules(&[(r"_(?P<band>B\d\d)_(?P<layer>\w+)\.tif$", "${band}_${layer}", false)]);
        assert_eq!(set.classify("x_B02_BWTR.tif"), Some((0, "B02_BWTR".into())));
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let err = NamingRule::new("([", "X", false).unwrap_err();
        assert!(matches!(err, PgeError::InvalidConfig { .. }));
    }

    #[test]
    fn unknown_product_has_no_default_rules() {
        assert!(RuleSet::for_product("SOMETHING_ELSE").unwrap().rules().is_empty());
        assert!(!RuleSet::for_product("CSLC_S1").unwrap().rules().is_empty());
    }

    #[test]
    fn snapshot_reports_only_new_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "old.txt");
        let snap = OutputSnapshot::capture(dir.path()).unwrap();
        let a = touch(dir.path(), "b.tif");
        let b = touch(dir.path(), "sub/a.tif");
        assert_eq!(snap.new_files(dir.path()).unwrap(), vec![a, b]);
    }

    #[test]
    fn renames_matched_and_keeps_unmatched() {
        let dir = TempDir::new().unwrap();
        let tif = touch(dir.path(), "sas_B01_WTR.tif");
        let txt = touch(dir.path(), "notes.txt");
        let log = touch(dir.path(), SAS_LOG_FILE);
        let set = rules(&[(r"_B01_WTR\.tif$", "B01_WTR", true)]);

        let entries = catalog(&set, dir.path(), &[tif.clone(), txt.clone(), log.clone()], "P_T_v1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].canonical_path, dir.path().join("P_T_v1_B01_WTR.tif"));
        assert!(entries[0].renamed);
        assert_eq!(entries[1].label, None);
        assert!(!tif.exists());
        assert!(dir.path().join("P_T_v1_B01_WTR.tif").exists());
        assert!(txt.exists());
        assert!(log.exists());
    }

    #[test]
    fn rename_disabled_keeps_names() {
        let dir = TempDir::new().unwrap();
        let tif = touch(dir.path(), "a.tif");
        let mut set = rules(&[(r"\.tif$", "IMG", false)]);
        set.rename = false;
        let entries = catalog(&set, dir.path(), &[tif.clone()], "P").unwrap();
        assert_eq!(entries[0].canonical_path, tif);
        assert_eq!(entries[0].label.as_deref(), Some("IMG"));
        assert!(tif.exists());
    }

    #[test]
    fn exhaustive_rejects_unmatched_without_renaming() {
        let dir = TempDir::new().unwrap();
        let tif = touch(dir.path(), "a.tif");
        let stray = touch(dir.path(), "stray.bin");
        let mut set = rules(&[(r"\.tif$", "IMG", false)]);
        set.exhaustive = true;
        let err = catalog(&set, dir.path(), &[tif.clone(), stray], "P").unwrap_err();
        assert!(matches!(err, PgeError::UnmatchedArtifact { ref file } if file == "stray.bin"));
        assert!(tif.exists());
    }

    #[test]
    fn missing_required_output_fails() {
        let dir = TempDir::new().unwrap();
        let png = touch(dir.path(), "a.png");
        let set = rules(&[(r"\.nc$", "DISP", true), (r"\.png$", "BROWSE", false)]);
        let err = catalog(&set, dir.path(), &[png.clone()], "P").unwrap_err();
        assert!(matches!(err, PgeError::RequiredArtifactMissing { ref label, .. } if label == "DISP"));
        assert!(png.exists());
    }

    #[test]
    fn colliding_targets_are_rejected() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.tif");
        let b = touch(dir.path(), "b.tif");
        let set = rules(&[(r"\.tif$", "IMG", false)]);
        let err = catalog(&set, dir.path(), &[a.clone(), b.clone()], "P").unwrap_err();
        assert!(matches!(err, PgeError::Catalog { .. }));
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn subdirectory_subjects_use_slashes() {
        let dir = TempDir::new().unwrap();
        let nested = touch(dir.path(), "browse/img.png");
        let set = rules(&[(r"^browse/.*\.png$", "BROWSE", false)]);
        let entries = catalog(&set, dir.path(), &[nested], "P").unwrap();
        assert_eq!(entries[0].canonical_path, dir.path().join("browse/P_BROWSE.png"));
    }
}
