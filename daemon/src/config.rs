use std::path::PathBuf;

use clap::Parser;
use weft_common::{
    config::{BYTES_PER_MB, DEFAULT_NAMESPACE},
    subscription::RetryOptions,
};

// Batch assembly
pub const DEFAULT_MAX_BATCH_MESSAGES: usize = 100;
pub const DEFAULT_MAX_BATCH_BYTES: u64 = BYTES_PER_MB;
pub const DEFAULT_BATCH_TIMEOUT_MILLIS: u64 = 500;
// An idle dispatcher with no open batch is torn down after this long
pub const DEFAULT_QUIESCENCE_MILLIS: u64 = 30_000;

// Aggregator
pub const DEFAULT_AGGREGATOR_PAGE_SIZE: usize = 100;
// How far behind the current pin sequence a rewind may reach
pub const DEFAULT_REWIND_LOOKBACK: u64 = 1_000;
// How long an unresolved cid parks a message before it is treated as
// unknown-to-this-node
pub const DEFAULT_CID_GRACE_MILLIS: u64 = 30_000;
// Idle poll of the pin log, a safety net under the notifier
pub const AGGREGATOR_POLL_MILLIS: u64 = 5_000;

// Operation retries
pub const DEFAULT_RETRY_BASE_MILLIS: u64 = 250;
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_CAP_MILLIS: u64 = 30_000;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

// Operation reconciliation
pub const DEFAULT_RECONCILE_INTERVAL_MILLIS: u64 = 15_000;
pub const DEFAULT_STALE_THRESHOLD_MILLIS: u64 = 60_000;

// Subscriptions
pub const SUBSCRIPTION_POLL_MILLIS: u64 = 5_000;

// Channel sizes. Wakeup channels are size 1 on purpose: a full channel means
// a wakeup is already queued and the nudge can be dropped.
pub const PLUGIN_EVENT_CHANNEL_SIZE: usize = 256;
pub const BATCH_KEY_CHANNEL_SIZE: usize = 64;
pub const SEALED_BATCH_CHANNEL_SIZE: usize = 64;
pub const REWIND_CHANNEL_SIZE: usize = 64;
pub const NOTIFIER_CHANNEL_SIZE: usize = 1;

#[derive(Debug, Clone, Parser)]
#[command(name = "weftd", version, about = "Weft multi-party orchestration daemon")]
pub struct NodeConfig {
    // Directory holding the node database
    #[arg(long, default_value = "weft-data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    // Local identity, resolved against the identity plugin at startup
    #[arg(long, default_value = "org0")]
    pub org: String,

    #[arg(long, default_value = "node0")]
    pub node: String,

    #[arg(long, default_value = "0x0")]
    pub signing_key: String,

    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_MESSAGES)]
    pub max_batch_messages: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_BYTES)]
    pub max_batch_bytes: u64,

    #[arg(long, default_value_t = DEFAULT_BATCH_TIMEOUT_MILLIS)]
    pub batch_timeout_millis: u64,

    #[arg(long, default_value_t = DEFAULT_QUIESCENCE_MILLIS)]
    pub quiescence_millis: u64,

    #[arg(long, default_value_t = DEFAULT_AGGREGATOR_PAGE_SIZE)]
    pub aggregator_page_size: usize,

    #[arg(long, default_value_t = DEFAULT_REWIND_LOOKBACK)]
    pub rewind_lookback: u64,

    #[arg(long, default_value_t = DEFAULT_CID_GRACE_MILLIS)]
    pub cid_grace_millis: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_BASE_MILLIS)]
    pub retry_base_millis: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_FACTOR)]
    pub retry_factor: f64,

    #[arg(long, default_value_t = DEFAULT_RETRY_CAP_MILLIS)]
    pub retry_cap_millis: u64,

    #[arg(long, default_value_t = DEFAULT_RETRY_MAX_ATTEMPTS)]
    pub retry_max_attempts: u32,

    #[arg(long, default_value_t = DEFAULT_RECONCILE_INTERVAL_MILLIS)]
    pub reconcile_interval_millis: u64,

    #[arg(long, default_value_t = DEFAULT_STALE_THRESHOLD_MILLIS)]
    pub stale_threshold_millis: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("weft-data"),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            org: "org0".to_owned(),
            node: "node0".to_owned(),
            signing_key: "0x0".to_owned(),
            max_batch_messages: DEFAULT_MAX_BATCH_MESSAGES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            batch_timeout_millis: DEFAULT_BATCH_TIMEOUT_MILLIS,
            quiescence_millis: DEFAULT_QUIESCENCE_MILLIS,
            aggregator_page_size: DEFAULT_AGGREGATOR_PAGE_SIZE,
            rewind_lookback: DEFAULT_REWIND_LOOKBACK,
            cid_grace_millis: DEFAULT_CID_GRACE_MILLIS,
            retry_base_millis: DEFAULT_RETRY_BASE_MILLIS,
            retry_factor: DEFAULT_RETRY_FACTOR,
            retry_cap_millis: DEFAULT_RETRY_CAP_MILLIS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            reconcile_interval_millis: DEFAULT_RECONCILE_INTERVAL_MILLIS,
            stale_threshold_millis: DEFAULT_STALE_THRESHOLD_MILLIS,
        }
    }
}

impl NodeConfig {
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            base_millis: self.retry_base_millis,
            factor: self.retry_factor,
            cap_millis: self.retry_cap_millis,
            max_attempts: self.retry_max_attempts,
        }
    }
}
