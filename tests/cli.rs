use assert_cmd::Command;
use predicates::prelude::*;

fn galign() -> Command {
    Command::new(env!("CARGO_BIN_EXE_galign"))
}

#[test]
fn test_frequency_flag_is_mandatory() {
    galign()
        .args(["srcA", "srcB"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("-f").or(predicate::str::contains("frequency")));
}

#[test]
fn test_identity_range_is_enforced() {
    for bad in ["0.5", "1.0", "1.5"] {
        galign()
            .args(["-f", "10", "-e", bad, "srcA", "srcB"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("identity"));
    }
}

#[test]
fn test_zero_frequency_rejected() {
    galign()
        .args(["-f", "0", "srcA", "srcB"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("frequency cutoff"));
}

#[test]
fn test_missing_index_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("nonexistent");
    let src = src.to_string_lossy().into_owned();
    galign()
        .args(["-f", "10", &src, &src])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nonexistent"));
}

#[test]
fn test_bad_scratch_dir_rejected() {
    galign()
        .args(["-f", "10", "-P", "/definitely/not/a/dir", "srcA", "srcB"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("scratch"));
}

#[test]
fn test_help_lists_knobs() {
    galign()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("-f")
                .and(predicate::str::contains("-e"))
                .and(predicate::str::contains("-P")),
        );
}
