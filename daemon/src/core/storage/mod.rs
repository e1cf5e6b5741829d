mod snapshot;

pub mod providers;
pub mod sled;

pub use self::{
    providers::*,
    sled::SledStorage,
    snapshot::{Changes, EntryState, Snapshot},
};

// Logical column families of the storage backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    Messages,
    Data,
    Blobs,
    Batches,
    // Wire payloads received before their pin, keyed by payload hash
    PendingPayloads,
    Pins,
    // (batch, index) -> pin sequence, for idempotent pin inserts
    PinRefs,
    Nonces,
    NextPins,
    Transactions,
    Operations,
    // idempotency key prefix index over operations
    OperationKeys,
    Events,
    Subscriptions,
    DeadLetters,
    Offsets,
    Groups,
    TokenPools,
    TokenTransfers,
    TokenApprovals,
    Counters,
}

impl Column {
    pub const fn name(&self) -> &'static str {
        match self {
            Column::Messages => "messages",
            Column::Data => "data",
            Column::Blobs => "blobs",
            Column::Batches => "batches",
            Column::PendingPayloads => "pending_payloads",
            Column::Pins => "pins",
            Column::PinRefs => "pin_refs",
            Column::Nonces => "nonces",
            Column::NextPins => "next_pins",
            Column::Transactions => "transactions",
            Column::Operations => "operations",
            Column::OperationKeys => "operation_keys",
            Column::Events => "events",
            Column::Subscriptions => "subscriptions",
            Column::DeadLetters => "dead_letters",
            Column::Offsets => "offsets",
            Column::Groups => "groups",
            Column::TokenPools => "token_pools",
            Column::TokenTransfers => "token_transfers",
            Column::TokenApprovals => "token_approvals",
            Column::Counters => "counters",
        }
    }
}

// The persistence contract of the node: provider traits per entity plus the
// commit point control, composed into one supertrait. The storage is the
// serialization point between every dispatcher.
pub trait Storage:
    MessageProvider
    + DataProvider
    + BlobProvider
    + BatchProvider
    + PinProvider
    + NonceProvider
    + NextPinProvider
    + TransactionProvider
    + OperationProvider
    + EventProvider
    + SubscriptionProvider
    + OffsetProvider
    + GroupProvider
    + TokenProvider
    + CommitPointProvider
    + Sync
    + Send
    + 'static
{
}
