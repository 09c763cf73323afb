//! # Bulwark Core
//!
//! Gateway engine - no network or storage code.
//!
//! This crate contains:
//! - The live configuration holder and degrade registry
//! - Command building, the strategy registry and the three resilience
//!   strategies with retry
//! - The mailbox lifecycle and callback dispatch
//! - The metrics cache, gauge collector and optimizer
//! - Port interfaces (traits) for downstream calls, discovery, mailbox
//!   storage and callback delivery
//!
//! ## Architecture Principles
//! - Depends only on `bulwark-common` and `bulwark-domain`
//! - All external collaborators via traits
//! - Every command resolves configuration from exactly one snapshot

pub mod config_holder;
pub mod degrade;
pub mod execution;
pub mod gateway;
pub mod mailbox;
pub mod metrics;
pub mod optimizer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config_holder::{content_hash, ConfigHolder, ConfigSnapshot};
pub use degrade::DegradeRegistry;
pub use execution::{
    Command, DiscoveryResolver, Downstream, Execution, NoDiscovery, ResilienceStrategy,
    RuntimeGauges, StrategyRegistry,
};
pub use gateway::{Gateway, GatewayBuilder, Submission};
pub use mailbox::{
    CallbackDelivery, CallbackDispatcher, CallbackError, CallbackTransport, MailboxScope,
    MailboxService, MailboxStore,
};
pub use metrics::{CompositeGaugeSource, GaugeSource, MetricsCache, MetricsCollector};
pub use optimizer::{Optimizer, OptimizerReport};
