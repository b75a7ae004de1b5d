//! Shared utilities.
//!
//! Hashing used for pinning and content addressing, plus test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
