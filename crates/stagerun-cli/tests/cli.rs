//! End-to-end tests of the stagerun binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Variables the runner settings read from the host CI.
const HOST_CI_VARS: &[&str] = &[
    "STAGERUN_BUILD_NUMBER",
    "APPVEYOR_BUILD_NUMBER",
    "STAGERUN_PULL_REQUEST_NUMBER",
    "APPVEYOR_PULL_REQUEST_NUMBER",
    "STAGERUN_ACCOUNT_NAME",
    "APPVEYOR_ACCOUNT_NAME",
    "STAGERUN_PROJECT_SLUG",
    "APPVEYOR_PROJECT_SLUG",
    "STAGERUN_REPO_BRANCH",
    "APPVEYOR_REPO_BRANCH",
    "STAGERUN_HISTORY_DEPTH",
    "STAGERUN_MAX_PARALLEL",
];

/// The stagerun binary, isolated from the host CI's settings.
fn stagerun_cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("stagerun");
    for var in HOST_CI_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// A temp directory holding `stagerun.kdl` with a two-entry matrix.
fn temp_manifest(test_command: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    let manifest = format!(
        r#"
        environment {{
            global {{
                PYTHONUNBUFFERED "1"
            }}
            matrix {{
                entry {{
                    PYTHON_VERSION "3.6"
                }}
                entry {{
                    PYTHON_VERSION "3.7"
                }}
            }}
        }}
        install {{
            run "echo installing ${{env.PYTHON_VERSION}}"
        }}
        test_script {{
            run "{}"
        }}
        "#,
        test_command
    );
    std::fs::write(temp.path().join("stagerun.kdl"), manifest).unwrap();
    temp
}

fn manifest_path(temp: &TempDir) -> String {
    temp.path().join("stagerun.kdl").display().to_string()
}

#[test]
fn validate_accepts_valid_manifest() {
    let temp = temp_manifest("true");
    stagerun_cmd()
        .args(["validate", &manifest_path(&temp)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("2 job(s)"));
}

#[test]
fn validate_rejects_duplicate_sections() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("stagerun.kdl");
    std::fs::write(
        &path,
        "test_script {\n    run \"a\"\n}\ntest_script {\n    run \"b\"\n}\n",
    )
    .unwrap();

    stagerun_cmd()
        .args(["validate", &path.display().to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn matrix_json_lists_jobs() {
    let temp = temp_manifest("true");
    let output = stagerun_cmd()
        .args(["matrix", &manifest_path(&temp), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["job_number"], 1);
    assert_eq!(jobs[1]["job_name"], "PYTHON_VERSION=3.7");
}

#[cfg(unix)]
#[test]
fn run_exits_zero_when_all_jobs_pass() {
    let temp = temp_manifest("test $PYTHONUNBUFFERED = 1");
    stagerun_cmd()
        .args(["run", "--config", &manifest_path(&temp)])
        .assert()
        .success()
        .stdout(predicate::str::contains("installing 3.7"))
        .stdout(predicate::str::contains("Build succeeded"));
}

#[cfg(unix)]
#[test]
fn run_exits_non_zero_when_a_job_fails() {
    let temp = temp_manifest("test $PYTHON_VERSION = 3.6");
    stagerun_cmd()
        .args(["run", "--config", &manifest_path(&temp)])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("job 2 (PYTHON_VERSION=3.7) - ✗ test failed"));
}

#[cfg(unix)]
#[test]
fn run_single_job_decides_exit_code() {
    let temp = temp_manifest("test $PYTHON_VERSION = 3.6");
    stagerun_cmd()
        .args(["run", "--config", &manifest_path(&temp), "--job", "1"])
        .assert()
        .success();
}
