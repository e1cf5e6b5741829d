use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{
    event::Event,
    query::{Filter, QueryParams},
};

use crate::core::error::CoreError;

#[async_trait]
pub trait EventProvider {
    // Assigns the next value of the single event sequence counter inside the
    // active commit point and stores the row. This is the only code path
    // that touches the counter, which makes the sequence gap-free and the
    // canonical local order.
    async fn insert_event(&mut self, event: Event) -> Result<Event, CoreError>;

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>, CoreError>;

    // Events strictly above the given sequence, ascending, up to limit
    async fn get_events_after(
        &self,
        sequence: u64,
        limit: usize,
    ) -> Result<Vec<Event>, CoreError>;

    async fn query_events(
        &self,
        namespace: &str,
        filter: Option<&Filter>,
        params: &QueryParams,
    ) -> Result<Vec<Event>, CoreError>;

    // Highest sequence assigned so far, 0 when no event exists
    async fn latest_sequence(&self) -> Result<u64, CoreError>;
}
