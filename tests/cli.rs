//! End-to-end runs of the `paramreg` binary: exit codes and published files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

const EXIT_OK: i32 = 0;
const EXIT_REJECTED: i32 = 1;
const EXIT_STRUCTURAL: i32 = 2;

fn manifest(max: f64, g_value: Option<f64>) -> String {
    let value = g_value.map_or(String::new(), |v| format!(", value: {:?}", v));
    format!(
        r#"
apiVersion: paramreg/v1
kind: Registry
label: cli

parameters:
  g: {{ unit: "1", kind: fundamental{value} }}
  x: {{ unit: "1" }}

modules:
  X:
    inputs: [g]
    outputs:
      x: "g * 3"

gates:
  x_range:
    check: [x]
    predicate: {{ type: in_range, min: 0.0, max: {max:?} }}
"#
    )
}

fn write_manifest(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn paramreg(args: &[&str]) -> i32 {
    let status = Command::new(env!("CARGO_BIN_EXE_paramreg")).args(args).status().unwrap();
    status.code().unwrap()
}

fn run(manifest: &Path, output: &Path, extra: &[&str]) -> i32 {
    let mut args = vec!["run", "--manifest", manifest.to_str().unwrap(), "--output", output.to_str().unwrap()];
    args.extend_from_slice(extra);
    paramreg(&args)
}

#[test]
fn test_run_published_writes_artifact_and_exports() {
    let dir = tempdir().unwrap();
    let m = write_manifest(&dir, "registry.yaml", &manifest(10.0, Some(2.0)));
    let output = dir.path().join("build").join("registry.json");

    assert_eq!(run(&m, &output, &[]), EXIT_OK);
    assert!(output.exists());
    assert!(dir.path().join("build").join("constants.csv").exists());

    let values: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("build").join("values.json")).unwrap()).unwrap();
    assert_eq!(values["x"], 6.0);
}

#[test]
fn test_run_rejected_publishes_nothing() {
    let dir = tempdir().unwrap();
    let m = write_manifest(&dir, "registry.yaml", &manifest(5.0, Some(2.0)));
    let output = dir.path().join("registry.json");

    assert_eq!(run(&m, &output, &[]), EXIT_REJECTED);
    assert_eq!(run(&m, &output, &["--fail-fast"]), EXIT_REJECTED);
    assert!(!output.exists());

    // An override brings x back in range.
    assert_eq!(run(&m, &output, &["--set", "g=1.0"]), EXIT_OK);
    assert!(output.exists());
}

#[test]
fn test_run_structural_errors() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("registry.json");

    let missing_axiom = write_manifest(&dir, "missing.yaml", &manifest(10.0, None));
    assert_eq!(run(&missing_axiom, &output, &[]), EXIT_STRUCTURAL);
    assert_eq!(run(&missing_axiom, &output, &["--parallel"]), EXIT_STRUCTURAL);

    let absent = dir.path().join("absent.yaml");
    assert_eq!(run(&absent, &output, &[]), EXIT_STRUCTURAL);

    let valid = write_manifest(&dir, "valid.yaml", &manifest(10.0, Some(2.0)));
    assert_eq!(run(&valid, &output, &["--set", "x=1.0"]), EXIT_STRUCTURAL);
    assert!(!output.exists());
}

#[test]
fn test_check_exit_codes() {
    let dir = tempdir().unwrap();

    let clean = write_manifest(&dir, "clean.yaml", &manifest(10.0, Some(2.0)));
    assert_eq!(paramreg(&["check", "--manifest", clean.to_str().unwrap()]), EXIT_OK);

    let dimensional = write_manifest(
        &dir,
        "dims.yaml",
        r#"
apiVersion: paramreg/v1
kind: Registry
parameters:
  m: { unit: "GeV", kind: fundamental, value: 1.0 }
  r: { unit: "1" }
modules:
  R:
    inputs: [m]
    outputs: { r: "m * 2" }
"#,
    );
    assert_eq!(paramreg(&["check", "--manifest", dimensional.to_str().unwrap()]), EXIT_REJECTED);

    let cyclic = write_manifest(
        &dir,
        "cycle.yaml",
        r#"
apiVersion: paramreg/v1
kind: Registry
parameters:
  a: { unit: "1" }
  b: { unit: "1" }
modules:
  A:
    inputs: [b]
    outputs: { a: "b" }
  B:
    inputs: [a]
    outputs: { b: "a" }
"#,
    );
    assert_eq!(paramreg(&["check", "--manifest", cyclic.to_str().unwrap()]), EXIT_STRUCTURAL);
}

#[test]
fn test_diff_flags_unexplained_drift() {
    let dir = tempdir().unwrap();
    let m = write_manifest(&dir, "registry.yaml", &manifest(10.0, Some(2.0)));
    let first = dir.path().join("first").join("registry.json");
    let second = dir.path().join("second").join("registry.json");
    assert_eq!(run(&m, &first, &[]), EXIT_OK);
    assert_eq!(run(&m, &second, &["--set", "g=1.0"]), EXIT_OK);

    let (a, b) = (first.to_str().unwrap(), second.to_str().unwrap());
    assert_eq!(paramreg(&["diff", a, a]), EXIT_OK);
    // Values changed because an axiom changed: explained.
    assert_eq!(paramreg(&["diff", a, b]), EXIT_OK);

    // Same hashes, different derived value: not reproducible.
    let mut forged: serde_json::Value = serde_json::from_str(&fs::read_to_string(&first).unwrap()).unwrap();
    forged["parameters"]["x"]["value"] = serde_json::json!(6.5);
    let forged_path = dir.path().join("forged.json");
    fs::write(&forged_path, serde_json::to_string_pretty(&forged).unwrap()).unwrap();
    assert_eq!(paramreg(&["diff", a, forged_path.to_str().unwrap()]), EXIT_REJECTED);

    assert_eq!(paramreg(&["diff", a, dir.path().join("nope.json").to_str().unwrap()]), EXIT_STRUCTURAL);
}
