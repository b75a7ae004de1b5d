//! Env command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, fixture_content};

#[test]
fn env_without_built_artifact_exits_with_tool_code() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .arg("env")
    .assert()
    .code(7)
    .stderr(predicate::str::contains("pinbuild build"));
}

#[test]
#[cfg(unix)]
fn env_after_build_exports_artifact() {
  let env = TestEnv::from_fixture("hello");
  env.cmd().arg("build").assert().success();

  let store = env.store_path().display().to_string();
  env
    .cmd()
    .args(["env", "--shell", "bash"])
    .assert()
    .success()
    .stdout(predicate::str::contains("export PATH='"))
    .stdout(predicate::str::contains(store))
    .stdout(predicate::str::contains("export HELLO_GREETING='yes'"));

  env
    .cmd()
    .args(["env", "--shell", "fish"])
    .assert()
    .success()
    .stdout(predicate::str::contains("set -gx HELLO_GREETING 'yes'"));
}

#[test]
fn env_json_is_an_object() {
  let env = TestEnv::from_fixture("hello");
  let spec = fixture_content("hello/pinbuild.toml").replace("include_artifact = true", "include_artifact = false");
  env.write_spec(&spec);

  let output = env.cmd().args(["env", "--json"]).output().unwrap();
  assert!(output.status.success(), "env failed: {output:?}");
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["HELLO_GREETING"], "yes");
}

#[test]
fn env_with_missing_shell_tool_exits_with_tool_code() {
  let env = TestEnv::from_fixture("hello");
  let spec = fixture_content("hello/pinbuild.toml").replace("include_artifact = true", "include_artifact = false");
  env.write_spec(&spec);
  env.append_spec("[[shell.dependencies]]\nname = \"glslc-not-installed-pinbuild\"\n");

  env
    .cmd()
    .arg("env")
    .assert()
    .code(7)
    .stderr(predicate::str::contains("glslc-not-installed-pinbuild"));
}

#[test]
fn env_rejects_unknown_shell() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["env", "--shell", "tcsh"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unsupported shell"));
}
