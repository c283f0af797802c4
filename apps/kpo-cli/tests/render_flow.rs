// render_flow.rs - End-to-end test of the `kpo` binary.
//
// Flow:
//   1. Write a manifest directory (one policy, two exceptions)
//   2. kpo render -> PolicyExceptions on stdout
//   3. kpo reconcile twice against one state directory -> second run is a no-op
//   4. kpo config -> effective configuration as TOML

use std::fs;
use std::process::Command;

use tempfile::TempDir;

const MANIFESTS: &str = r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: disallow-privileged
spec:
  rules:
    - name: restrict-privileged
      match:
        any:
          - resources:
              kinds: [Pod]
      validate:
        message: privileged containers are not allowed
status:
  autogen:
    rules:
      - name: autogen-restrict-privileged
---
apiVersion: policy.giantswarm.io/v1alpha1
kind: PolicyException
metadata:
  name: app-1
  namespace: default
spec:
  policies: [disallow-privileged]
  targets:
    - kind: Deployment
      namespaces: [default]
      names: [app-1]
---
apiVersion: policy.giantswarm.io/v1alpha1
kind: PolicyException
metadata:
  name: orphan
  namespace: default
spec:
  policies: [not-installed]
  targets:
    - kind: Pod
      namespaces: [default]
      names: [orphan]
"#;

fn kpo(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_kpo"))
        .args(args)
        .args(["--config", "/nonexistent/kpo.toml"])
        .output()
        .unwrap()
}

fn manifest_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sources.yaml"), MANIFESTS).unwrap();
    dir
}

#[test]
fn render_prints_generated_exceptions() {
    let manifests = manifest_dir();
    let output = kpo(&[
        "render",
        "--manifests",
        manifests.path().to_str().unwrap(),
        "--destination-namespace",
        "policy-exceptions",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("kind: PolicyException"));
    assert!(stdout.contains("name: gs-kpo-polex-app-1-exceptions"));
    assert!(stdout.contains("namespace: policy-exceptions"));
    assert!(stdout.contains("app-1*"));
    assert!(stdout.contains("- ReplicaSet"));
    assert!(stdout.contains("- autogen-restrict-privileged"));
    assert!(!stdout.contains("orphan"));

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("default/orphan is waiting for policies: not-installed"));
}

#[test]
fn render_requires_destination_namespace() {
    let manifests = manifest_dir();
    let output = kpo(&["render", "--manifests", manifests.path().to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("destination namespace must be set"));
}

#[test]
fn reconcile_converges_across_runs() {
    let manifests = manifest_dir();
    let state = TempDir::new().unwrap();
    let args = [
        "reconcile",
        "--manifests",
        manifests.path().to_str().unwrap(),
        "--state",
        state.path().to_str().unwrap(),
        "--destination-namespace",
        "policy-exceptions",
    ];

    let first = kpo(&args);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let first = String::from_utf8(first.stdout).unwrap();
    assert!(first.contains("1 created, 0 updated, 0 unchanged"));

    let second = kpo(&args);
    assert!(second.status.success());
    let second = String::from_utf8(second.stdout).unwrap();
    assert!(second.contains("0 created, 0 updated, 1 unchanged"));
}

#[test]
fn config_prints_effective_values() {
    let output = kpo(&[
        "config",
        "--destination-namespace",
        "policy-exceptions",
        "--max-jitter-percent",
        "25",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("destination_namespace = \"policy-exceptions\""));
    assert!(stdout.contains("max_jitter_percent = 25"));
    assert!(stdout.contains("service_account = \"chart-operator\""));
}
