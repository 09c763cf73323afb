//! Mailbox lifecycle and callback delivery

pub mod callback;
pub mod ports;
pub mod service;

pub use callback::{CallbackDispatcher, DeliveryReport};
pub use ports::{
    CallbackDelivery, CallbackError, CallbackTransport, MailboxScope, MailboxStore,
};
pub use service::MailboxService;
