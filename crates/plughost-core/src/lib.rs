//! # plughost-core
//!
//! Core crate for PlugHost. Contains the unified error system, the runtime
//! settings schema, and the content digest used for change detection.
//!
//! This crate has **no** internal dependencies on other PlugHost crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
pub use types::digest::ContentDigest;
