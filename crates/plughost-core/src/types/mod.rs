//! Shared value types.

pub mod digest;

pub use digest::ContentDigest;
