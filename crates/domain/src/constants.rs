//! Gateway constants
//!
//! Header names are lower-case; lookups normalise incoming names first.

// Inbound metadata headers
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_TRANSACTION_ID: &str = "x-transaction-id";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_EXECUTION_MODE: &str = "x-execution-mode";
pub const HEADER_MAILBOX_ID: &str = "x-mailbox-id";
pub const HEADER_MAILBOX_AUTH_ID: &str = "x-mailbox-auth-id";
pub const HEADER_CALLBACK_URL: &str = "x-callback-url";
pub const HEADER_CALLBACK_TIMEOUT: &str = "x-callback-timeout";
pub const HEADER_CALLBACK_METHOD: &str = "x-callback-method";

pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

// Status codes surfaced by the gateway itself
pub const STATUS_ACCEPTED: u16 = 202;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;
pub const STATUS_BAD_GATEWAY: u16 = 502;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;
pub const STATUS_GATEWAY_TIMEOUT: u16 = 504;

/// Separator in runtime gauge names; reserved in service, API and pool names.
pub const METRIC_NAME_SEPARATOR: char = '.';

/// Smallest admission threshold accepted; one call per ~17 minutes.
pub const MIN_ADMISSION_THRESHOLD: f64 = 0.001;
