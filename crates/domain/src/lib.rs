//! # Bulwark Domain
//!
//! Gateway domain types.
//!
//! This crate contains:
//! - The configuration snapshot, its validation and per-API resolution
//! - Request metadata, request/response snapshots and execution modes
//! - The mailbox request lifecycle
//! - Optimizer metric samples
//! - The gateway error taxonomy
//!
//! ## Architecture
//! - Depends only on the foundation tier of `bulwark-common`
//! - No I/O, no async runtime

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
