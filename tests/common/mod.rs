//! Shared RunConfig fixtures for the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub const SAS_SCHEMA: &str = "runconfig:\n  threshold: num(min=0, max=1)\n";

/// Single-quoted YAML scalar
pub fn yaml_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub struct Fixture {
    pub dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub scratch: PathBuf,
    pub sas_schema: PathBuf,
}

/// Knobs for one generated RunConfig
#[derive(Clone)]
pub struct RunOptions {
    pub product: String,
    pub base: i64,
    pub program: String,
    pub options: Vec<String>,
    pub via_shell: bool,
    pub qa: Option<String>,
    pub qa_options: Vec<String>,
    pub naming_rules: Vec<(String, String, bool)>,
    pub exhaustive: bool,
    pub iso_template: Option<PathBuf>,
    pub descriptors: Option<PathBuf>,
    pub debug: bool,
    pub sample_usage: bool,
    pub scratch: Option<PathBuf>,
    pub extra_inputs: Vec<PathBuf>,
    pub threshold: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            product: "TEST_PRODUCT".to_string(),
            base: 900000,
            program: "true".to_string(),
            options: Vec::new(),
            via_shell: false,
            qa: None,
            qa_options: Vec::new(),
            naming_rules: Vec::new(),
            exhaustive: false,
            iso_template: None,
            descriptors: None,
            debug: false,
            sample_usage: false,
            scratch: None,
            extra_inputs: Vec::new(),
            threshold: "0.5".to_string(),
        }
    }
}

impl RunOptions {
    pub fn shell(program: &str) -> Self {
        Self {
            program: program.to_string(),
            via_shell: true,
            ..Self::default()
        }
    }

    pub fn rule(mut self, pattern: &str, label: &str, required: bool) -> Self {
        self.naming_rules
            .push((pattern.to_string(), label.to_string(), required));
        self
    }
}

fn list(items: &[String]) -> String {
    format!(
        "[{}]",
        items.iter().map(|s| yaml_str(s)).collect::<Vec<_>>().join(", ")
    )
}

fn opt_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| yaml_str(&p.display().to_string()))
        .unwrap_or_else(|| "~".to_string())
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.h5");
        fs::write(&input, b"granule").unwrap();
        let sas_schema = dir.path().join("sas_schema.yaml");
        fs::write(&sas_schema, SAS_SCHEMA).unwrap();
        Self {
            output: dir.path().join("output"),
            scratch: dir.path().join("scratch"),
            input,
            sas_schema,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Shell-quoted path of a file in the output directory
    pub fn out(&self, name: &str) -> String {
        format!("\"{}\"", self.output.join(name).display())
    }

    pub fn runconfig_text(&self, opts: &RunOptions) -> String {
        let mut inputs = vec![self.input.display().to_string()];
        inputs.extend(opts.extra_inputs.iter().map(|p| p.display().to_string()));
        let scratch = opts.scratch.as_ref().unwrap_or(&self.scratch);

        let mut rules = String::new();
        for (pattern, label, required) in &opts.naming_rules {
            rules.push_str(&format!(
                "          - Pattern: {}\n            Label: {}\n            Required: {}\n",
                yaml_str(pattern),
                yaml_str(label),
                required
            ));
        }
        let rules = if rules.is_empty() {
            "        NamingRules: []\n".to_string()
        } else {
            format!("        NamingRules:\n{}", rules)
        };

        format!(
            "RunConfig:
  Name: integration-test
  Groups:
    PGE:
      PGENameGroup:
        PGEName: TEST_PGE
      InputFilesGroup:
        InputFilePaths: {inputs}
      DynamicAncillaryFilesGroup:
        AncillaryFileMap: {{}}
      ProductPathGroup:
        OutputProductPath: {output}
        ScratchPath: {scratch}
      PrimaryExecutable:
        ProductIdentifier: {product}
        ProductVersion: '1.0'
        ProgramPath: {program}
        ProgramOptions: {options}
        ErrorCodeBase: {base}
        SchemaPath: {schema}
        IsoTemplatePath: {template}
        IsoMeasuredParameterDescriptions: {descriptors}
      QAExecutable:
        Enabled: {qa_enabled}
        ProgramPath: {qa_program}
        ProgramOptions: {qa_options}
      DebugLevelGroup:
        DebugSwitch: {debug}
        ExecuteViaShell: {via_shell}
        SampleResourceUsage: {sample}
      ProductCatalogGroup:
        RenameOutputs: true
        ExhaustiveMatch: {exhaustive}
{rules}    SAS:
      runconfig:
        threshold: {threshold}
",
            inputs = list(&inputs),
            output = yaml_str(&self.output.display().to_string()),
            scratch = yaml_str(&scratch.display().to_string()),
            product = opts.product,
            program = yaml_str(&opts.program),
            options = list(&opts.options),
            base = opts.base,
            schema = yaml_str(&self.sas_schema.display().to_string()),
            template = opt_path(&opts.iso_template),
            descriptors = opt_path(&opts.descriptors),
            qa_enabled = opts.qa.is_some(),
            qa_program = opts.qa.as_deref().map(yaml_str).unwrap_or_else(|| "~".to_string()),
            qa_options = list(&opts.qa_options),
            debug = opts.debug,
            via_shell = opts.via_shell,
            sample = opts.sample_usage,
            exhaustive = opts.exhaustive,
            rules = rules,
            threshold = opts.threshold,
        )
    }

    pub fn runconfig(&self, opts: &RunOptions) -> PathBuf {
        let path = self.path("runconfig.yaml");
        fs::write(&path, self.runconfig_text(opts)).unwrap();
        path
    }

    /// Names of the files in the output directory
    pub fn output_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn find_output(&self, suffix: &str) -> Option<PathBuf> {
        self.output_files()
            .into_iter()
            .find(|n| n.ends_with(suffix))
            .map(|n| self.output.join(n))
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}
