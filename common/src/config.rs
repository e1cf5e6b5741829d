// Constants shared between the daemon and external tooling

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Millis per second, it is used to prevent having random 1000 values anywhere
pub const MILLIS_PER_SECOND: u64 = 1000;

pub const BYTES_PER_KB: u64 = 1024;
pub const BYTES_PER_MB: u64 = BYTES_PER_KB * 1024;

// Namespace used when none is configured explicitly
pub const DEFAULT_NAMESPACE: &str = "default";

// Hard limit on the number of topics a single message may carry
pub const MAX_MESSAGE_TOPICS: usize = 10;

// Hard limit on data elements per message
pub const MAX_MESSAGE_DATA: usize = 64;
