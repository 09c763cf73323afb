//! Command execution engine
//!
//! A [`Command`] is resolved from one configuration snapshot, handed to the
//! [`ResilienceStrategy`] its API is configured for, and invoked through the
//! [`Invoker`] inside that strategy's isolation boundary.

pub mod admission;
pub mod bulkhead;
pub mod command;
pub mod gauges;
pub mod invoker;
pub mod outcome;
pub mod pool_isolation;
pub mod ports;
pub mod retry;
pub mod strategy;

pub use admission::AdmissionControlStrategy;
pub use bulkhead::BulkheadStrategy;
pub use command::Command;
pub use gauges::RuntimeGauges;
pub use invoker::Invoker;
pub use outcome::Execution;
pub use pool_isolation::PoolIsolationStrategy;
pub use ports::{resolve_endpoint, DiscoveryResolver, Downstream, NoDiscovery};
pub use retry::{AcceptabilityPolicy, RetryerCache};
pub use strategy::{ResilienceStrategy, StrategyDeps, StrategyRegistry};
