//! Binary smoke tests for the tandem CLI.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("tandem")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("churn"));
}

#[test]
fn demo_runs_to_convergence() {
    Command::cargo_bin("tandem")
        .unwrap()
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("all views converged"));
}

#[test]
fn churn_converges_with_a_fixed_seed() {
    Command::cargo_bin("tandem")
        .unwrap()
        .args(["churn", "--edits", "25", "--seed", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("all views converged"));
}
