//! Hash command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn hash_of_directory_is_hex_digest() {
  let env = TestEnv::from_fixture("hello");
  let hash = env.source_hash();

  assert_eq!(hash.len(), 64);
  assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn hash_follows_content() {
  let env = TestEnv::from_fixture("hello");
  let before = env.source_hash();
  env.write_file("src/VERSION", "0.3.2\n");

  assert_ne!(before, env.source_hash());
}

#[test]
fn hash_json_names_path() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["hash", "--json", "src"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"sha256\""))
    .stdout(predicate::str::contains(env.source_hash()));
}

#[test]
fn hash_rejects_unknown_file_type() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["hash", "src/README.txt"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("neither a directory"));
}

#[test]
fn hash_of_missing_path_fails() {
  let env = TestEnv::from_fixture("hello");

  env
    .cmd()
    .args(["hash", "does-not-exist"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("does not exist"));
}
