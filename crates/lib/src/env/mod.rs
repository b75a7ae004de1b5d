//! Dependency resolution and development shell composition.
//!
//! [`resolve`] locates declared tools and libraries on the host and yields a
//! [`ResolvedEnvironment`]; the build pipeline and the dev shell share it.
//! [`compose`] turns a resolved shell environment into an ordered
//! activation descriptor.

pub mod compose;
pub mod resolve;

pub use compose::{ActivationDescriptor, ComposeError, ShellKind, compose_environment};
pub use resolve::{ResolveError, ResolvedDependency, ResolvedEnvironment, resolve_environment};
