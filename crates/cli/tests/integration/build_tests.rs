//! Build command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, fixture_content};

#[test]
#[cfg(unix)]
fn build_installs_and_promotes() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built hello 0.3.1"))
    .stdout(predicate::str::contains("Output bin"));

  assert_eq!(env.artifact_count(), 1);
  assert_eq!(std::fs::read_dir(env.store_path().join("tmp")).unwrap().count(), 0);
}

#[test]
#[cfg(unix)]
fn rebuild_reports_identical_artifact() {
  let env = TestEnv::from_fixture("hello");

  env.cmd().arg("build").assert().success();
  env
    .cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("identical artifact already present"));

  assert_eq!(env.artifact_count(), 1);
}

#[test]
#[cfg(unix)]
fn build_json_lists_every_state() {
  let env = TestEnv::from_fixture("hello");

  let output = env.cmd().args(["build", "--json", "--jobs", "1"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let states: Vec<&str> = json["states"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s["state"].as_str().unwrap())
    .collect();
  assert_eq!(
    states,
    ["pending", "fetched", "patched", "configured", "built", "verified", "done"]
  );
  assert_eq!(json["promotion"]["result"], "installed");
  assert_eq!(json["phases"].as_array().unwrap().len(), 5);
}

#[test]
#[cfg(unix)]
fn option_override_changes_installed_tool() {
  let env = TestEnv::from_fixture("hello");

  let output = env
    .cmd()
    .args(["build", "--json", "-o", "greeting=hello"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let tool = std::path::Path::new(json["artifact"]["path"].as_str().unwrap()).join("bin/hello");
  let script = std::fs::read_to_string(tool).unwrap();
  assert!(script.contains("echo hello hello 0.3.1"));
}

#[test]
fn tampered_source_exits_with_fetch_code() {
  let env = TestEnv::from_fixture("hello");
  env.write_file("src/README.txt", "tampered\n");

  env
    .cmd()
    .arg("build")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("Build of hello failed"));

  assert_eq!(env.artifact_count(), 0);
}

#[test]
fn stale_patch_exits_with_patch_code() {
  let env = TestEnv::from_fixture("hello");
  let spec = fixture_content("hello/pinbuild.toml").replace(
    "version = \"0.3.1\"\n",
    "version = \"0.3.1\"\npatches = [\"patches/stale.patch\"]\n",
  );
  env.write_spec(&spec);

  env.cmd().arg("build").assert().code(3);
  assert_eq!(env.artifact_count(), 0);
}

#[test]
fn invalid_option_choice_exits_with_configure_code() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["build", "-o", "greeting=howdy"])
    .assert()
    .code(4)
    .stderr(predicate::str::contains("greeting"));
}

#[test]
#[cfg(unix)]
fn failing_build_step_exits_with_build_code() {
  let env = TestEnv::from_fixture("hello");
  let spec = fixture_content("hello/pinbuild.toml").replace(
    "build = [\"echo $${option:greeting} > greeting.txt\"]",
    "build = [\"echo compiling; exit 3\"]",
  );
  env.write_spec(&spec);

  env
    .cmd()
    .arg("build")
    .assert()
    .code(5)
    .stderr(predicate::str::contains("compiling"));

  assert_eq!(env.artifact_count(), 0);
}

#[test]
#[cfg(unix)]
fn failing_check_exits_with_check_code() {
  let env = TestEnv::from_fixture("hello");
  let spec = fixture_content("hello/pinbuild.toml").replace(
    "command = [\"bin/hello\"]",
    "command = [\"bin/hello\"]\nexpect_output = \"goodbye\"",
  );
  env.write_spec(&spec);

  env.cmd().arg("build").assert().code(6);
  assert_eq!(env.artifact_count(), 0);
}

#[test]
fn timeout_flag_requires_a_duration() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["build", "--timeout", "soon"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--timeout"));
}
