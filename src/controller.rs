//! Execution controller
//!
//! Drives one invocation through
//! `LOADING -> VALIDATING -> PREPARING_DIRS -> EXECUTING -> CATALOGING ->
//! QA_RUNNING -> DONE`, stopping in `FAILED` at the first fatal error.
//! Every stage returns [`PgeError`]; the error's offset decides the exit
//! code, so stages never pick codes themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tera::Context;
use tracing::{debug, info, warn};

use crate::catalog::{self, OutputSnapshot, RuleSet};
use crate::config::{FrameworkConfig, RunConfig, RunConfigDocument};
use crate::error::{PgeError, Result};
use crate::logging::VerbosityHandle;
use crate::metadata::{self, MeasuredParameters, MetadataValues};
use crate::process::{Invocation, ProcessLauncher, TokioLauncher};
use crate::product;
use crate::qa::{self, QaVerdict};
use crate::record::{ExecutionRecord, ExecutionSummary, Stage};

/// SAS stdout and stderr
pub const SAS_LOG_FILE: &str = "pge_sas.log";
/// QA program stdout and stderr
pub const QA_LOG_FILE: &str = "pge_qa.log";
/// Resource usage samples of the SAS
pub const USAGE_FILE: &str = "pge_sas_usage.csv";

const WRITE_PROBE: &str = ".pge_write_probe";

pub struct ExecutionController {
    config_path: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    verbosity: Option<VerbosityHandle>,
}

impl ExecutionController {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            launcher: Arc::new(TokioLauncher),
            verbosity: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Lets `DebugSwitch` raise the log level at runtime
    pub fn with_verbosity(mut self, handle: VerbosityHandle) -> Self {
        self.verbosity = Some(handle);
        self
    }

    /// Run to a terminal state and return the summary
    ///
    /// Never fails: every error ends up in the summary instead.
    pub async fn run(&self) -> ExecutionSummary {
        let mut record = ExecutionRecord::new();
        info!(config = %self.config_path.display(), "PGE starting");

        if let Err(err) = self.drive(&mut record).await {
            record.fail(&err);
        }

        let output_dir = record.output_dir().map(Path::to_path_buf);
        let summary = record.finish();
        if let Some(dir) = output_dir.filter(|d| d.is_dir()) {
            match summary.write_to(&dir) {
                Ok(path) => debug!(path = %path.display(), "Summary written"),
                Err(e) => warn!(error = %e, "Could not write summary file"),
            }
        }
        info!(target: "pge::summary", "{}", summary);
        summary
    }

    async fn drive(&self, record: &mut ExecutionRecord) -> Result<()> {
        record.enter(Stage::Loading);
        let document = RunConfigDocument::load(&self.config_path)?;
        if let Some(base) = document.error_code_base_hint() {
            record.set_error_code_base(base);
        }
        if let Some(dir) = document.output_dir_hint() {
            record.set_output_dir(dir);
        }

        record.enter(Stage::Validating);
        let config = document.validate()?;
        let fw = &config.framework;
        record.identify(fw.pge_name(), fw.product_identifier(), fw.error_code_base());
        let rules = check_config(&config, record)?;
        if fw.debug_level_group.debug_switch {
            match &self.verbosity {
                Some(handle) => handle.enable_debug(),
                None => debug!("DebugSwitch set but no reloadable logger installed"),
            }
        }

        record.enter(Stage::PreparingDirs);
        prepare_directories(fw)?;
        record.set_output_dir(fw.output_dir().to_path_buf());

        record.enter(Stage::Executing);
        let snapshot = OutputSnapshot::capture(fw.output_dir())?;
        self.execute(fw, record).await?;

        record.enter(Stage::Cataloging);
        let core = catalog::canonical_core(
            fw.product_identifier(),
            fw.product_version(),
            record.started_at(),
        );
        let new_files = snapshot.new_files(fw.output_dir())?;
        record.artifacts = catalog::catalog(&rules, fw.output_dir(), &new_files, &core)?;
        if let Some(template) = &fw.primary_executable.iso_template_path {
            let path = generate_metadata(&config, template, &core, record)?;
            record.metadata_path = Some(path);
        }

        if fw.qa_executable.enabled {
            record.enter(Stage::QaRunning);
            let report = qa::dispatch(
                self.launcher.as_ref(),
                &fw.qa_executable,
                fw.output_dir(),
                &fw.qa_product_name(),
                fw.debug_level_group.execute_via_shell,
            )
            .await?;
            let verdict = report.verdict;
            record.qa = Some(report);
            match verdict {
                QaVerdict::Pass => {}
                QaVerdict::ProductMismatch => {
                    record.degrade("QA found differences between produced and expected products")
                }
                QaVerdict::InternalFailure => {
                    return Err(PgeError::QaFailed {
                        reason: "QA program reported an internal failure".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, fw: &FrameworkConfig, record: &mut ExecutionRecord) -> Result<()> {
        let exe = &fw.primary_executable;
        let debug = &fw.debug_level_group;
        let invocation = Invocation::new(
            exe.program_path.as_str(),
            &exe.program_options,
            fw.output_dir().join(SAS_LOG_FILE),
        )
        .via_shell(debug.execute_via_shell)
        .sample_usage(
            debug
                .sample_resource_usage
                .then(|| fw.output_dir().join(USAGE_FILE)),
        );

        let report = self.launcher.launch(&invocation).await?;
        let outcome = (report.success, report.status(), report.log_path.clone());
        record.sas = Some(report);
        match outcome {
            (true, _, _) => Ok(()),
            (false, status, log_path) => Err(PgeError::AlgorithmFailed {
                program: exe.program_path.clone(),
                status,
                log_path: log_path.display().to_string(),
            }),
        }
    }
}

/// Cross-field checks the schema cannot express
fn check_config(config: &RunConfig, record: &mut ExecutionRecord) -> Result<RuleSet> {
    let fw = &config.framework;
    if fw.qa_executable.enabled && fw.qa_executable.program_path.is_none() {
        return Err(PgeError::InvalidConfig {
            reason: "QAExecutable.Enabled is true but ProgramPath is empty".to_string(),
        });
    }
    if fw.output_dir() == fw.scratch_dir() {
        return Err(PgeError::InvalidConfig {
            reason: "OutputProductPath and ScratchPath must differ".to_string(),
        });
    }
    if fw.primary_executable.iso_measured_parameter_descriptions.is_some()
        && fw.primary_executable.iso_template_path.is_none()
    {
        record.warn("IsoMeasuredParameterDescriptions is set without IsoTemplatePath; no metadata will be generated");
    }
    if let Some(spec) = product::lookup(fw.product_identifier()) {
        if spec.error_code_base != fw.error_code_base() {
            record.warn(format!(
                "ErrorCodeBase {} differs from the {} default of {}",
                fw.error_code_base(),
                spec.identifier,
                spec.error_code_base
            ));
        }
    }
    RuleSet::from_config(fw)
}

fn require(path: &Path, what: impl Into<String>) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PgeError::MissingInput {
            what: what.into(),
            path: path.display().to_string(),
        })
    }
}

/// Directories created by this run, removed again if setup fails
#[derive(Default)]
struct CreatedDirs(Vec<PathBuf>);

impl CreatedDirs {
    fn create(&mut self, dir: &Path) -> Result<()> {
        let setup = |reason: String| PgeError::DirectorySetup {
            path: dir.display().to_string(),
            reason,
        };
        if dir.is_dir() {
            return Ok(());
        }
        if dir.exists() {
            return Err(setup("exists and is not a directory".to_string()));
        }
        let topmost = dir
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .last()
            .unwrap_or(dir)
            .to_path_buf();
        std::fs::create_dir_all(dir).map_err(|e| setup(e.to_string()))?;
        debug!(dir = %dir.display(), "Created directory");
        self.0.push(topmost);
        Ok(())
    }

    fn rollback(self) {
        for dir in self.0.into_iter().rev() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "Could not remove directory");
            }
        }
    }
}

fn check_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(WRITE_PROBE);
    std::fs::write(&probe, b"")
        .and_then(|_| std::fs::remove_file(&probe))
        .map_err(|e| PgeError::DirectorySetup {
            path: dir.display().to_string(),
            reason: format!("not writable: {}", e),
        })
}

/// Check inputs, then create and probe the output and scratch directories
fn prepare_directories(fw: &FrameworkConfig) -> Result<()> {
    for input in &fw.input_files_group.input_file_paths {
        require(input, "input file")?;
    }
    for (key, path) in &fw.dynamic_ancillary_files_group.ancillary_file_map {
        require(path, format!("ancillary file '{}'", key))?;
    }
    let exe = &fw.primary_executable;
    if let Some(template) = &exe.iso_template_path {
        require(template, "ISO metadata template")?;
    }
    if let Some(descriptions) = &exe.iso_measured_parameter_descriptions {
        require(descriptions, "measured parameter descriptions")?;
    }
    let program = Path::new(&exe.program_path);
    if !fw.debug_level_group.execute_via_shell && program.components().count() > 1 && !program.exists()
    {
        return Err(PgeError::ProgramNotFound {
            program: exe.program_path.clone(),
        });
    }

    let mut created = CreatedDirs::default();
    let result = [fw.output_dir(), fw.scratch_dir()]
        .into_iter()
        .try_for_each(|dir| created.create(dir).and_then(|_| check_writable(dir)));
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            created.rollback();
            Err(e)
        }
    }
}

/// Render the ISO metadata document next to the products
fn generate_metadata(
    config: &RunConfig,
    template_path: &Path,
    core: &str,
    record: &mut ExecutionRecord,
) -> Result<PathBuf> {
    let fw = &config.framework;
    let template = std::fs::read_to_string(template_path).map_err(|e| PgeError::Metadata {
        reason: format!("cannot read template '{}': {}", template_path.display(), e),
    })?;
    let params = match &fw.primary_executable.iso_measured_parameter_descriptions {
        Some(path) => MeasuredParameters::load(path)?,
        None => MeasuredParameters::default(),
    };
    let products: Vec<PathBuf> = record.artifacts.iter().map(|a| a.canonical_path.clone()).collect();
    let values = MetadataValues::from_artifacts(&products);
    for skipped in &values.skipped {
        record.warn(skipped.clone());
    }

    let mut context = Context::new();
    context.insert("pge_name", fw.pge_name());
    context.insert("product_identifier", fw.product_identifier());
    context.insert("product_version", fw.product_version());
    context.insert("production_datetime", &record.started_at().to_rfc3339());
    context.insert("run_config_name", &config.name);
    context.insert("input_files", &fw.input_files_group.input_file_paths);
    context.insert("artifacts", &record.artifacts);

    let rendered = metadata::render(&template, &params, &values, &context)?;
    for warning in rendered.warnings {
        record.warn(warning);
    }
    let path = fw.output_dir().join(format!("{}.iso.xml", core));
    std::fs::write(&path, rendered.document).map_err(|e| PgeError::Metadata {
        reason: format!("cannot write '{}': {}", path.display(), e),
    })?;
    info!(path = %path.display(), parameters = params.len(), "Metadata written");
    Ok(path)
}
