//! Fetch command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn fetch_verifies_pinned_source() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .arg("fetch")
    .assert()
    .success()
    .stdout(predicate::str::contains("Verified 1 source tree(s)"))
    .stdout(predicate::str::contains(env.source_hash()));

  assert_eq!(env.artifact_count(), 0);
}

#[test]
fn fetch_json_reports_hash() {
  let env = TestEnv::from_fixture("hello");

  let output = env.cmd().args(["fetch", "--json"]).output().unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["hash"], env.source_hash().as_str());
  assert_eq!(json["location"], "path:src");
}

#[test]
fn fetch_rejects_modified_source() {
  let env = TestEnv::from_fixture("hello");
  env.write_file("src/extra.txt", "unexpected\n");

  env
    .cmd()
    .arg("fetch")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("Fetch of hello failed"));
}
