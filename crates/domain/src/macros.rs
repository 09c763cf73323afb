//! Macro for implementing Display and FromStr for wire-level enums
//!
//! Lifecycle states, execution modes and metric kinds travel as plain strings
//! in headers, metric names and persisted entries. The macro keeps one table
//! per enum for both directions.
//!
//! # Example
//!
//! ```rust
//! use bulwark_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Mode {
//!     Sync,
//!     Polling,
//! }
//!
//! impl_domain_status_conversions!(Mode {
//!     Sync => "sync",
//!     Polling => "polling",
//! });
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the table string verbatim
/// - FromStr matches case-insensitively
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
