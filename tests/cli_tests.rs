//! Integration tests for the pge CLI
//!
//! These tests run the actual binary. Exit statuses are checked for
//! success or failure only, since the OS truncates the wide PGE codes; the
//! full code is asserted through the printed summary line.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

use common::{read, Fixture, RunOptions};

fn pge_cmd() -> Command {
    Command::cargo_bin("pge").unwrap()
}

#[test]
fn test_help_flag() {
    pge_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run a science algorithm"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("compare"));
}

#[test]
fn test_run_requires_file() {
    pge_cmd()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--file"));
}

// ============================================================================
// validate
// ============================================================================

#[test]
fn test_validate_valid_runconfig() {
    let fx = Fixture::new();
    let config = fx.runconfig(&RunOptions::default());

    pge_cmd()
        .args(["validate", "--file"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("TEST_PGE"))
        .stdout(predicate::str::contains("TEST_PRODUCT v1.0"));

    // validation never touches the filesystem
    assert!(!fx.output.exists());
}

#[test]
fn test_validate_reports_violation_paths() {
    let fx = Fixture::new();
    let text = fx
        .runconfig_text(&RunOptions::default())
        .replace("        PGEName: TEST_PGE\n", "        PGEName: ''\n");
    let config = fx.write("bad.yaml", &text);

    pge_cmd()
        .args(["validate", "-f"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("RunConfig.Groups.PGE.PGENameGroup.PGEName"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_validate_bad_yaml() {
    let fx = Fixture::new();
    let config = fx.write("broken.yaml", "RunConfig: [unclosed\n");

    pge_cmd()
        .args(["validate", "--file"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse RunConfig"));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_success() {
    let fx = Fixture::new();
    let config = fx.runconfig(&RunOptions::default());

    pge_cmd()
        .args(["run", "--file"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("status=success"))
        .stdout(predicate::str::contains("exit_code=0"));
    assert!(fx.output.join("pge_summary.json").exists());
}

#[test]
fn test_run_sas_failure() {
    let fx = Fixture::new();
    let config = fx.runconfig(&RunOptions {
        program: "/bin/false".to_string(),
        base: 100000,
        product: "DSWX_HLS".to_string(),
        ..RunOptions::default()
    });

    pge_cmd()
        .args(["run", "--file"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("status=failed"))
        .stdout(predicate::str::contains("exit_code=130002"))
        .stdout(predicate::str::contains("failed_stage=EXECUTING"));
}

#[test]
fn test_run_missing_config() {
    pge_cmd()
        .args(["run", "--file", "/nonexistent/runconfig.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("exit_code=30000"));
}

// ============================================================================
// compare
// ============================================================================

#[test]
fn test_compare_identical_directories() {
    let fx = Fixture::new();
    let out = fx.path("out");
    let expected = fx.path("expected");
    fs::create_dir_all(&out).unwrap();
    fs::create_dir_all(&expected).unwrap();
    fs::write(out.join("product.nc"), "same").unwrap();
    fs::write(expected.join("product.nc"), "same").unwrap();

    pge_cmd()
        .arg("compare")
        .arg(&out)
        .arg(&expected)
        .args(["--product", "tropo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pass"));
    assert_eq!(read(&out.join("compare_tropo_products.rc")).trim(), "0");
    assert!(out.join("test_int_tropo_results.html").exists());
}

#[test]
fn test_compare_missing_directory() {
    let fx = Fixture::new();
    let out = fx.path("out");
    fs::create_dir_all(&out).unwrap();

    pge_cmd()
        .arg("compare")
        .arg(&out)
        .arg(fx.path("missing"))
        .args(["--product", "tropo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    assert!(!out.join("compare_tropo_products.rc").exists());
}

#[test]
fn test_run_with_bundled_compare_as_qa() {
    let fx = Fixture::new();
    let expected = fx.path("expected");
    fs::create_dir_all(&expected).unwrap();
    fs::write(expected.join("result.txt"), "expected").unwrap();

    let pge = assert_cmd::cargo::cargo_bin("pge");
    let opts = RunOptions {
        qa: Some(pge.display().to_string()),
        qa_options: vec![
            "compare".to_string(),
            fx.output.display().to_string(),
            expected.display().to_string(),
            "--product".to_string(),
            "test_product".to_string(),
        ],
        ..RunOptions::shell(&format!("printf produced > {}", fx.out("result.txt")))
    };
    let config = fx.runconfig(&opts);

    pge_cmd()
        .args(["run", "--file"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("status=degraded"))
        .stdout(predicate::str::contains("exit_code=910000"));

    let html = read(&fx.output.join("test_int_test_product_results.html"));
    assert!(html.contains("FAIL"), "{html}");
    assert_eq!(read(&fx.output.join("compare_test_product_products.rc")).trim(), "2");
}
