//! # plughost-config
//!
//! Plugin configuration store backed by a single TOML file.
//!
//! - Each subscribed plugin owns the top-level table named after its id
//! - Reloads reconfigure only plugins whose table digest changed
//! - Writes go through a temp file and a rename, keeping a `.old` backup

pub mod persist;
pub mod store;
pub mod tree;

pub use store::ConfigStore;
