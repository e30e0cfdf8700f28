//! Sandbox primitives shared by every tool entry point.
//!
//! The virtual `/repo` root is an in-process rewrite, not a filesystem
//! construct: mapping happens once at the boundary and containment is
//! always enforced on the resolved path.

pub mod gitignore;
pub mod paths;
pub mod shell;

pub use paths::{map_path_no_resolve, resolve_repo_path, validate_file_path, ResolveOptions};
