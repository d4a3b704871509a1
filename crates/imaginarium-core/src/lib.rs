//! Imaginarium Core - Foundational types for the imaginarium client
//!
//! This crate provides the types the rest of the workspace depends on:
//! - `ContentHash` - SHA-256 based content hashing for the asset store
//! - Error types and Result alias

mod error;
mod hash;

pub use error::{ImaginariumError, Result};
pub use hash::ContentHash;
