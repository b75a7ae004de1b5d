//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

fn plan_hash(env: &TestEnv, extra: &[&str]) -> String {
  let output = env.cmd().arg("plan").arg("--json").args(extra).output().unwrap();
  assert!(output.status.success(), "plan failed: {output:?}");
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  json["plan_hash"].as_str().unwrap().to_string()
}

#[test]
fn plan_shows_options_and_dependencies() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("hello 0.3.1"))
    .stdout(predicate::str::contains("greeting = hi"))
    .stdout(predicate::str::contains("mkdir"))
    .stdout(predicate::str::is_match(r"Built:\s+no").unwrap());
}

#[test]
fn plan_accepts_explicit_spec_path() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .current_dir(env.temp.path())
    .arg("plan")
    .arg(&env.spec_path)
    .assert()
    .success();
}

#[test]
fn plan_hash_is_stable() {
  let env = TestEnv::from_fixture("hello");
  assert_eq!(plan_hash(&env, &[]), plan_hash(&env, &[]));
}

#[test]
fn variant_and_options_change_plan_hash() {
  let env = TestEnv::from_fixture("hello");

  let base = plan_hash(&env, &[]);
  let loud = plan_hash(&env, &["--variant", "loud"]);
  let overridden = plan_hash(&env, &["-o", "greeting=hello"]);

  assert_ne!(base, loud);
  assert_ne!(base, overridden);
}

#[test]
fn unknown_variant_fails() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["plan", "--variant", "quiet"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("quiet"));
}

#[test]
fn unknown_option_exits_with_configure_code() {
  let env = TestEnv::from_fixture("hello");

  env.cmd().args(["plan", "-o", "colour=red"]).assert().code(4);
}

#[test]
fn missing_dependency_exits_with_configure_code() {
  let env = TestEnv::from_fixture("hello");
  env.append_spec("[[variants.loud.dependencies]]\nname = \"definitely-not-installed-pinbuild\"\n");

  env.cmd().arg("plan").assert().success();
  env
    .cmd()
    .args(["plan", "--variant", "loud"])
    .assert()
    .code(4)
    .stderr(predicate::str::contains("definitely-not-installed-pinbuild"));
}

#[test]
fn malformed_spec_fails() {
  let env = TestEnv::from_fixture("hello");
  env.write_file("pinbuild.toml", "name = \"broken\"\n[source\n");

  env
    .cmd()
    .arg("plan")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Failed to load spec"));
}
