// Per-message readiness: a candidate message delivers only when its batch
// and data are local, every context it carries is at the expected nonce for
// its author, and any cid predecessor has been resolved. Anything less
// parks the pin; integrity violations quarantine it so the stream can move.

use log::{debug, trace, warn};
use metrics::counter;
use uuid::Uuid;
use weft_common::{
    event::{Event, EventType},
    message::{context_hash, Message, MessageState},
    pin::{expected_pin_hash, NextPin, Pin},
    time::get_current_time_in_millis,
};

use crate::core::{
    aggregator::{Aggregator, Disposition, SideRequest},
    error::CoreError,
    storage::Storage,
};

impl<S: Storage> Aggregator<S> {
    pub(super) async fn process_pin(
        &self,
        storage: &mut S,
        pin: &Pin,
    ) -> Result<Disposition, CoreError> {
        // (a) the batch body must be held locally
        let batch = match storage.get_batch(&pin.batch).await? {
            Some(batch) => batch,
            None => {
                let request = pin.payload_ref.as_ref().map(|payload_ref| {
                    SideRequest::FetchBatch {
                        batch: pin.batch,
                        payload_ref: payload_ref.clone(),
                        namespace: pin.namespace.clone(),
                    }
                });
                return Ok(Disposition::Parked(request));
            }
        };

        let order = batch.payload.pin_order();
        let (message, _) = match order.get(pin.index as usize) {
            Some(target) => *target,
            None => {
                // A pin pointing outside the payload can never deliver
                return self
                    .quarantine(storage, pin, None, "pin index outside the batch payload")
                    .await;
            }
        };

        let local = match storage.get_message(&message.id).await? {
            Some(local) => local,
            None => {
                // The batch row exists, so its messages do too; be safe
                return Ok(Disposition::Parked(None));
            }
        };
        if matches!(
            local.state,
            MessageState::Confirmed | MessageState::Rejected
        ) {
            // Another pin of this message already concluded it
            storage.set_pin_dispatched(pin.sequence).await?;
            return Ok(Disposition::Dispatched);
        }

        // Integrity gates
        if batch.header.author != message.header.author {
            return self
                .quarantine(storage, pin, Some(message), "author differs from batch author")
                .await;
        }
        if !message.verify_hash()? {
            return self
                .quarantine(storage, pin, Some(message), "message hash mismatch")
                .await;
        }

        // (b) every data row, and every blob behind it, present locally
        let data = storage.get_data_many(&message.data).await?;
        if data.len() != message.data.len() {
            return Ok(Disposition::Parked(None));
        }
        for row in &data {
            if let Some(blob) = &row.blob {
                if storage.get_blob(&blob.hash).await?.is_none() {
                    if log::log_enabled!(log::Level::Trace) {
                        trace!(
                            "Message {} parked awaiting blob {}",
                            message.id,
                            blob.hash
                        );
                    }
                    return Ok(Disposition::Parked(Some(SideRequest::FetchBlob {
                        hash: blob.hash.clone(),
                        author: message.header.author.clone(),
                        namespace: pin.namespace.clone(),
                    })));
                }
            }
        }

        // (c) every context the message carries must be exactly at this
        // message's nonce for its author, and the hash on-chain must be the
        // expected form for the batch type: the mask within a private
        // group, the bare context for broadcast. The pin rows only carry
        // the on-chain form, so the true contexts come from the message.
        let private = batch.header.batch_type.is_private();
        let batch_pins = storage.get_pins_for_batch(&pin.batch).await?;
        let mut message_pins: Vec<(&str, &Pin)> = Vec::new();
        for (index, &(m, topic)) in order.iter().enumerate() {
            if m.id != message.id {
                continue;
            }
            match batch_pins.iter().find(|p| p.index == index as u64) {
                Some(message_pin) => message_pins.push((topic, message_pin)),
                // All pins of a batch arrive together; a gap here means the
                // chain listener is mid-replay
                None => return Ok(Disposition::Parked(None)),
            }
        }
        for &(topic, message_pin) in &message_pins {
            let context = context_hash(
                &message.header.namespace,
                topic,
                message.header.group.as_ref(),
            )?;
            let author = &message.header.author;
            let (expected_nonce, expected_hash) =
                match storage.get_next_pin(&context, author).await? {
                    Some(next) => (next.nonce, next.hash),
                    None => (0, expected_pin_hash(&context, author, 0, private)),
                };
            if message_pin.nonce > expected_nonce {
                // A gap that survived the whole lookback window will never
                // repair itself: flag it instead of blocking forever
                let head = storage.latest_pin_sequence().await?;
                if head.saturating_sub(pin.sequence) > self.config.rewind_lookback {
                    return self
                        .quarantine(storage, pin, Some(message), "nonce gap past lookback")
                        .await;
                }
                if log::log_enabled!(log::Level::Trace) {
                    trace!(
                        "Message {} parked on context {}: nonce {} expected {}",
                        message.id,
                        context,
                        message_pin.nonce,
                        expected_nonce
                    );
                }
                return Ok(Disposition::Parked(None));
            }
            if message_pin.nonce < expected_nonce {
                // This nonce was already consumed: a replayed duplicate,
                // never delivered twice
                debug!(
                    "Deduplicating replayed pin {} for message {}",
                    message_pin.sequence, message.id
                );
                for &(_, message_pin) in &message_pins {
                    storage.set_pin_dispatched(message_pin.sequence).await?;
                }
                return Ok(Disposition::Dispatched);
            }
            if message_pin.context != expected_hash {
                return self
                    .quarantine(
                        storage,
                        pin,
                        Some(message),
                        "pin hash does not match the expected form for its context",
                    )
                    .await;
            }
        }

        // (d) cid chains deliver in order
        if let Some(cid) = message.header.cid {
            let now = get_current_time_in_millis();
            match storage.get_message(&cid).await? {
                Some(prior)
                    if matches!(
                        prior.state,
                        MessageState::Confirmed | MessageState::Rejected
                    ) => {}
                Some(_) => return Ok(Disposition::Parked(None)),
                None => {
                    // Unknown cid: give the predecessor a grace window to
                    // arrive before treating it as foreign to this node
                    if now.saturating_sub(pin.created) < self.config.cid_grace_millis {
                        return Ok(Disposition::Parked(None));
                    }
                }
            }
        }

        self.deliver(storage, pin, &batch, message, &message_pins).await
    }

    async fn deliver(
        &self,
        storage: &mut S,
        pin: &Pin,
        batch: &weft_common::batch::Batch,
        message: &Message,
        message_pins: &[(&str, &Pin)],
    ) -> Result<Disposition, CoreError> {
        let now = get_current_time_in_millis();
        let private = batch.header.batch_type.is_private();

        storage
            .set_message_confirmed(&message.id, MessageState::Confirmed, now)
            .await?;
        for &(topic, message_pin) in message_pins {
            storage.set_pin_dispatched(message_pin.sequence).await?;
            let context = context_hash(
                &message.header.namespace,
                topic,
                message.header.group.as_ref(),
            )?;
            let next_nonce = message_pin.nonce + 1;
            storage
                .upsert_next_pin(&NextPin {
                    namespace: pin.namespace.clone(),
                    context: context.clone(),
                    identity: message.header.author.clone(),
                    nonce: next_nonce,
                    hash: expected_pin_hash(
                        &context,
                        &message.header.author,
                        next_nonce,
                        private,
                    ),
                })
                .await?;
        }
        storage
            .insert_event(Event::new(
                pin.namespace.clone(),
                EventType::MessageConfirmed,
                message.id,
                batch.tx.as_ref().map(|tx| tx.id),
                message.header.topics.first().cloned(),
                now,
            ))
            .await?;

        // Close out the batch once its last message concluded
        let mut all_done = true;
        for sibling in &batch.payload.messages {
            if sibling.id == message.id {
                continue;
            }
            let state = storage
                .get_message(&sibling.id)
                .await?
                .map(|row| row.state);
            if !matches!(
                state,
                Some(MessageState::Confirmed) | Some(MessageState::Rejected)
            ) {
                all_done = false;
                break;
            }
        }
        if all_done && batch.confirmed.is_none() {
            storage.set_batch_confirmed(&batch.header.id, now).await?;
        }

        counter!("weft_messages_confirmed_total").increment(1);
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Delivered message {} from batch {} at pin {}",
                message.id, batch.header.id, pin.sequence
            );
        }
        Ok(Disposition::Dispatched)
    }

    // Mark the offending message rejected and consume its pins so the
    // stream stays live; the event flags it for the operator
    async fn quarantine(
        &self,
        storage: &mut S,
        pin: &Pin,
        message: Option<&Message>,
        reason: &str,
    ) -> Result<Disposition, CoreError> {
        let now = get_current_time_in_millis();
        warn!(
            "Quarantining pin {} of batch {}: {}",
            pin.sequence, pin.batch, reason
        );
        counter!("weft_messages_rejected_total").increment(1);

        // Only this pin is consumed here: the message's remaining pins hit
        // the rejected-state early path and drain one by one
        storage.set_pin_dispatched(pin.sequence).await?;
        let reference = match message {
            Some(message) => {
                if storage.get_message(&message.id).await?.is_some() {
                    storage
                        .set_message_confirmed(&message.id, MessageState::Rejected, now)
                        .await?;
                }
                message.id
            }
            None => Uuid::nil(),
        };

        storage
            .insert_event(Event::new(
                pin.namespace.clone(),
                EventType::MessageRejected,
                reference,
                None,
                None,
                now,
            ))
            .await?;
        Ok(Disposition::Dispatched)
    }
}
