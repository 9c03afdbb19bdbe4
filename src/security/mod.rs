//! Security utilities.
//!
//! - Path validation keeping collected files and command outputs inside the
//!   workspace

pub mod path_validator;

pub use path_validator::{mirror_path, workspace_relative_path};
