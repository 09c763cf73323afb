//! Feedback loop from cached samples to configuration overrides

pub mod service;

pub use service::*;
