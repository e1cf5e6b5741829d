use async_trait::async_trait;
use log::trace;
use uuid::Uuid;
use weft_common::{
    message::{Message, MessageState},
    query::{Filter, QueryParams},
    time::TimestampMillis,
};

use crate::core::{
    batch::BatchKey,
    error::CoreError,
    storage::{Column, MessageProvider, SledStorage},
};

#[async_trait]
impl MessageProvider for SledStorage {
    async fn insert_message(&mut self, message: &Message) -> Result<(), CoreError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("Inserting message {}", message.id);
        }
        self.save(Column::Messages, message.id.as_bytes().to_vec(), message)
    }

    async fn upsert_message(&mut self, message: &Message) -> Result<(), CoreError> {
        if let Some(existing) = self.get_message(&message.id).await? {
            if existing.hash != message.hash {
                return Err(CoreError::IntegrityViolation(format!(
                    "Message {} already stored with a different hash",
                    message.id
                )));
            }
            // Keep the existing local lifecycle fields
            return Ok(());
        }
        self.save(Column::Messages, message.id.as_bytes().to_vec(), message)
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<Message>, CoreError> {
        self.load(Column::Messages, id.as_bytes())
    }

    async fn get_staged_messages(
        &self,
        key: &BatchKey,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError> {
        let mut staged: Vec<Message> = self
            .scan_values::<Message>(Column::Messages)?
            .into_iter()
            .filter(|msg| msg.state == MessageState::Staged && key.matches(msg))
            .collect();
        staged.sort_by_key(|msg| msg.header.created);
        staged.truncate(limit);
        Ok(staged)
    }

    async fn get_messages_in_state(
        &self,
        state: MessageState,
    ) -> Result<Vec<Message>, CoreError> {
        Ok(self
            .scan_values::<Message>(Column::Messages)?
            .into_iter()
            .filter(|msg| msg.state == state)
            .collect())
    }

    async fn get_messages_for_data(&self, data_id: &Uuid) -> Result<Vec<Message>, CoreError> {
        Ok(self
            .scan_values::<Message>(Column::Messages)?
            .into_iter()
            .filter(|msg| msg.data.iter().any(|data_ref| data_ref.id == *data_id))
            .collect())
    }

    async fn set_message_batch(
        &mut self,
        id: &Uuid,
        batch: &Uuid,
        state: MessageState,
    ) -> Result<(), CoreError> {
        let mut message = self
            .get_message(id)
            .await?
            .ok_or(CoreError::NotFound("Message"))?;
        message.batch = Some(*batch);
        message.state = state;
        self.save(Column::Messages, id.as_bytes().to_vec(), &message)
    }

    async fn set_message_confirmed(
        &mut self,
        id: &Uuid,
        state: MessageState,
        when: TimestampMillis,
    ) -> Result<(), CoreError> {
        let mut message = self
            .get_message(id)
            .await?
            .ok_or(CoreError::NotFound("Message"))?;
        message.state = state;
        message.confirmed = Some(when);
        self.save(Column::Messages, id.as_bytes().to_vec(), &message)
    }

    async fn query_messages(
        &self,
        namespace: &str,
        filter: Option<&Filter>,
        params: &QueryParams,
    ) -> Result<Vec<Message>, CoreError> {
        self.query_column(Column::Messages, "header.namespace", namespace, filter, params)
    }
}
