//! In-memory port implementations for tests
//!
//! Available to this crate's unit tests and, behind the `test-utils`
//! feature, to integration tests and other crates.

pub mod fixtures;
pub mod mocks;

pub use mocks::{
    MemoryMailboxStore, RecordingCallbackTransport, ScriptedDownstream, StaticDiscovery, Step,
};
