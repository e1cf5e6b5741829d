use async_trait::async_trait;
use log::trace;
use uuid::Uuid;
use weft_common::{
    event::Event,
    query::{Filter, QueryParams},
};

use crate::core::{
    error::CoreError,
    storage::{sled::COUNTER_EVENTS, Column, CommitPointProvider, EventProvider, SledStorage},
};

#[async_trait]
impl EventProvider for SledStorage {
    async fn insert_event(&mut self, mut event: Event) -> Result<Event, CoreError> {
        // The sequence must be assigned inside the same commit point as the
        // state change that caused the event
        if !self.has_commit_point() {
            return Err(CoreError::NoCommitPoint);
        }
        let sequence = self.counter_next(COUNTER_EVENTS)?;
        event.sequence = sequence;
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "Inserting {} event at sequence {} for {}",
                event.event_type,
                sequence,
                event.reference
            );
        }
        self.save(Column::Events, sequence.to_be_bytes().to_vec(), &event)?;
        Ok(event)
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>, CoreError> {
        Ok(self
            .scan_values::<Event>(Column::Events)?
            .into_iter()
            .find(|event| event.id == *id))
    }

    async fn get_events_after(
        &self,
        sequence: u64,
        limit: usize,
    ) -> Result<Vec<Event>, CoreError> {
        self.scan_after(Column::Events, &sequence.to_be_bytes(), limit)
    }

    async fn query_events(
        &self,
        namespace: &str,
        filter: Option<&Filter>,
        params: &QueryParams,
    ) -> Result<Vec<Event>, CoreError> {
        self.query_column(Column::Events, "namespace", namespace, filter, params)
    }

    async fn latest_sequence(&self) -> Result<u64, CoreError> {
        self.counter_peek(COUNTER_EVENTS)
    }
}
