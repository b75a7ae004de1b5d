//! pinbuild-lib: reproducible native builds from pinned descriptors
//!
//! A build spec pins a source tree by content hash and describes how to
//! turn it into an installed artifact:
//! - `spec`: the TOML descriptor, its validation and variants
//! - `fetch` / `patch`: verified source retrieval and atomic patching
//! - `configure` / `env`: option resolution and host dependency lookup
//! - `build` / `check`: native build phases, install check and the store
//! - `pipeline`: the state machine tying the steps together
//! - `env::compose`: development shell activation

pub mod build;
pub mod check;
pub mod configure;
pub mod consts;
pub mod env;
pub mod fetch;
pub mod patch;
pub mod pipeline;
pub mod placeholder;
pub mod platform;
pub mod process;
pub mod spec;
pub mod store_lock;
pub mod util;
