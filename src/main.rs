//! PGE CLI

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use pge::compare::{self, CompareOptions};
use pge::logging::{self, VerbosityHandle};
use pge::{ErrorOffset, ExecutionController, FixSuggestion, PgeError, RunConfigDocument, RunStatus};

#[derive(Parser)]
#[command(name = "pge")]
#[command(about = "PGE - run a science algorithm and deliver its products")]
#[command(version)]
struct Cli {
    /// Start with debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a PGE from a RunConfig
    Run {
        /// Path to the RunConfig YAML file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a RunConfig without running anything
    Validate {
        /// Path to the RunConfig YAML file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Compare produced products against expected ones
    Compare {
        /// Directory holding the produced products
        output_dir: PathBuf,

        /// Directory holding the expected products
        expected_dir: PathBuf,

        /// Product short name, e.g. dswx_hls
        #[arg(short, long)]
        product: String,

        /// Where to write the report and verdict (defaults to OUTPUT_DIR)
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbosity = logging::init(cli.verbose);

    let code = match cli.command {
        Commands::Run { file } => run(file, verbosity).await,
        Commands::Validate { file } => validate(&file),
        Commands::Compare {
            output_dir,
            expected_dir,
            product,
            results_dir,
        } => run_compare(CompareOptions {
            output_dir,
            expected_dir,
            product,
            results_dir,
        }),
    };
    std::process::exit(code);
}

/// Exit codes wider than the platform allows are truncated by the OS.
/// A failure code that would truncate to 0 exits with 1 instead.
fn exit_code(code: i64) -> i32 {
    let code = i32::try_from(code).unwrap_or(i32::MAX);
    if code != 0 && code % 256 == 0 {
        1
    } else {
        code
    }
}

fn report_error(e: &PgeError) {
    eprintln!("{} {}", "Error:".red().bold(), e);
    for violation in e.violations() {
        eprintln!("  {} {}", "-".red(), violation);
    }
    if let Some(suggestion) = e.fix_suggestion() {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}

async fn run(file: PathBuf, verbosity: VerbosityHandle) -> i32 {
    let controller = ExecutionController::new(file).with_verbosity(verbosity);
    let summary = controller.run().await;

    let status = match summary.status {
        RunStatus::Success => "✓".green(),
        RunStatus::Warning => "!".yellow(),
        RunStatus::Degraded => "~".yellow().bold(),
        RunStatus::Failed => "✗".red().bold(),
    };
    println!("{} {}", status, summary);
    if let Some(failure) = &summary.failure {
        for violation in &summary.violations {
            eprintln!("  {} {}", "-".red(), violation);
        }
        if let Some(hint) = &failure.hint {
            eprintln!("  {} {}", "Fix:".yellow(), hint);
        }
    }
    exit_code(summary.exit_code)
}

fn validate(file: &Path) -> i32 {
    let document = match RunConfigDocument::load(file) {
        Ok(document) => document,
        Err(e) => {
            report_error(&e);
            return exit_code(ErrorOffset::ConfigurationError.code(0));
        }
    };
    let base = document.error_code_base_hint().unwrap_or(0);
    match document.validate() {
        Ok(config) => {
            let fw = &config.framework;
            println!("{} RunConfig '{}' is valid", "✓".green(), file.display());
            println!("  PGE: {}", fw.pge_name());
            println!("  Product: {} v{}", fw.product_identifier(), fw.product_version());
            println!("  Inputs: {}", fw.input_files_group.input_file_paths.len());
            println!("  Output: {}", fw.output_dir().display());
            println!(
                "  QA: {}",
                if fw.qa_executable.enabled { "enabled" } else { "disabled" }
            );
            0
        }
        Err(e) => {
            report_error(&e);
            exit_code(e.offset().code(base))
        }
    }
}

fn run_compare(opts: CompareOptions) -> i32 {
    match compare::run(&opts) {
        Ok(verdict) => {
            println!("{} {}: {}", "→".cyan(), opts.product.cyan().bold(), verdict);
            0
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            1
        }
    }
}
