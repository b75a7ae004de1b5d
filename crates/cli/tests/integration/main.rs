//! CLI integration tests: each test drives the `pinbuild` binary against an
//! isolated store.

mod build_tests;
mod common;
mod env_tests;
mod fetch_tests;
mod hash_tests;
mod plan_tests;
