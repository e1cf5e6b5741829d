use async_trait::async_trait;
use log::trace;
use uuid::Uuid;
use weft_common::{crypto::Hash, pin::Pin};

use crate::core::{
    error::CoreError,
    storage::{
        sled::{decode_u64, COUNTER_PINS},
        Column, PinProvider, SledStorage,
    },
};

fn pin_ref_key(batch: &Uuid, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(batch.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

#[async_trait]
impl PinProvider for SledStorage {
    async fn insert_pin(&mut self, mut pin: Pin) -> Result<u64, CoreError> {
        // Chain listeners may replay events across restarts: the same
        // (batch, index) keeps its original sequence
        let ref_key = pin_ref_key(&pin.batch, pin.index);
        if let Some(existing) = self.get_raw(Column::PinRefs, &ref_key)? {
            let sequence = decode_u64(&existing)?;
            if log::log_enabled!(log::Level::Trace) {
                trace!(
                    "Pin for batch {} index {} already stored at sequence {}",
                    pin.batch,
                    pin.index,
                    sequence
                );
            }
            return Ok(sequence);
        }

        let sequence = self.counter_next(COUNTER_PINS)?;
        pin.sequence = sequence;
        self.save(Column::Pins, sequence.to_be_bytes().to_vec(), &pin)?;
        self.insert_raw(Column::PinRefs, ref_key, sequence.to_be_bytes().to_vec())?;
        Ok(sequence)
    }

    async fn get_pins_after(&self, sequence: u64, limit: usize) -> Result<Vec<Pin>, CoreError> {
        self.scan_after(Column::Pins, &sequence.to_be_bytes(), limit)
    }

    async fn get_pin(&self, sequence: u64) -> Result<Option<Pin>, CoreError> {
        self.load(Column::Pins, &sequence.to_be_bytes())
    }

    async fn get_pins_for_batch(&self, batch: &Uuid) -> Result<Vec<Pin>, CoreError> {
        let refs = self.scan_raw(Column::PinRefs, Some(batch.as_bytes()), None)?;
        let mut pins = Vec::with_capacity(refs.len());
        for (_, sequence) in refs {
            let sequence = decode_u64(&sequence)?;
            if let Some(pin) = self.get_pin(sequence).await? {
                pins.push(pin);
            }
        }
        pins.sort_by_key(|pin| pin.index);
        Ok(pins)
    }

    async fn get_pins_for_batch_hash(&self, batch_hash: &Hash) -> Result<Vec<Pin>, CoreError> {
        let mut pins: Vec<Pin> = self
            .scan_values::<Pin>(Column::Pins)?
            .into_iter()
            .filter(|pin| pin.batch_hash == *batch_hash)
            .collect();
        pins.sort_by_key(|pin| pin.sequence);
        Ok(pins)
    }

    async fn set_pin_dispatched(&mut self, sequence: u64) -> Result<(), CoreError> {
        let mut pin = self
            .get_pin(sequence)
            .await?
            .ok_or(CoreError::NotFound("Pin"))?;
        pin.dispatched = true;
        self.save(Column::Pins, sequence.to_be_bytes().to_vec(), &pin)
    }

    async fn latest_pin_sequence(&self) -> Result<u64, CoreError> {
        self.counter_peek(COUNTER_PINS)
    }
}
