use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{crypto::Hash, pin::Pin};

use crate::core::error::CoreError;

#[async_trait]
pub trait PinProvider {
    // Assigns the local arrival sequence and stores the pin. Re-inserting
    // the same (batch, index) is idempotent and returns the prior sequence.
    async fn insert_pin(&mut self, pin: Pin) -> Result<u64, CoreError>;

    // Pins strictly above the given sequence, ascending, up to limit
    async fn get_pins_after(&self, sequence: u64, limit: usize) -> Result<Vec<Pin>, CoreError>;

    async fn get_pin(&self, sequence: u64) -> Result<Option<Pin>, CoreError>;

    async fn get_pins_for_batch(&self, batch: &Uuid) -> Result<Vec<Pin>, CoreError>;

    // Pins announcing a batch with the given payload hash, used to bind an
    // early-arriving wire payload to its batch
    async fn get_pins_for_batch_hash(&self, batch_hash: &Hash)
        -> Result<Vec<Pin>, CoreError>;

    async fn set_pin_dispatched(&mut self, sequence: u64) -> Result<(), CoreError>;

    // Highest pin sequence assigned so far, 0 when no pin exists
    async fn latest_pin_sequence(&self) -> Result<u64, CoreError>;
}
