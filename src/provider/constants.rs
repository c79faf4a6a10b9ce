//! Provider constants
//!
//! Wire-level constants shared by the gateway and the streaming transport.

/// Prefix of every payload line in a streaming body
pub const DATA_PREFIX: &str = "data: ";

/// Stream termination sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Path of the generation endpoint, relative to the service base URL
pub const GENERATE_PATH: &str = "/generate";

/// Default batch call timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Longest streaming line kept in memory while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;
