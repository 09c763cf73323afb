//! HTTP adapters

pub mod callback;

pub use callback::{HttpCallbackTransport, HttpCallbackTransportBuilder};
