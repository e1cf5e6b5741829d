use std::sync::Arc;

use log::debug;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use weft_common::{
    data::{Blob, BlobRef, Data, DataRef},
    group::{Group, GroupDefinition},
    message::{Message, MessageHeader, MessageState, MessageType},
    time::get_current_time_in_millis,
};

use crate::{
    core::{batch::BatchKey, error::CoreError, storage::Storage},
    plugins::IdentityPlugin,
};

// Topic carrying group definition broadcasts
pub const DEFINITION_TOPIC: &str = "definitions";

// How callers hand data to a message: inline JSON, a reference to an
// existing data row, or a blob already staged at the data exchange
#[derive(Clone, Debug)]
pub enum DataElement {
    Inline(Value),
    Ref(DataRef),
    Blob(BlobRef),
}

// Accepts outbound messages: resolves data, verifies authorship, computes
// hashes and stages the message for the batch manager
pub struct MessageAssembler<S: Storage> {
    storage: Arc<RwLock<S>>,
    identity: Arc<dyn IdentityPlugin>,
    batch_keys: mpsc::Sender<BatchKey>,
}

impl<S: Storage> MessageAssembler<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        identity: Arc<dyn IdentityPlugin>,
        batch_keys: mpsc::Sender<BatchKey>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            identity,
            batch_keys,
        })
    }

    // Resolve (or register) a private group. A group seen for the first
    // time is stored and announced to the network as a definition broadcast
    // so every member can resolve it.
    pub async fn ensure_group(&self, definition: GroupDefinition) -> Result<Group, CoreError> {
        let now = get_current_time_in_millis();
        let namespace = definition.namespace.clone();
        let group = Group::new(definition, now)?;

        {
            let storage = self.storage.read().await;
            if let Some(existing) = storage.get_group(&group.hash).await? {
                return Ok(existing);
            }
        }

        debug!("Registering new group {}", group.hash);
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        if let Err(e) = storage.upsert_group(&group).await {
            storage.end_commit_point(false).await?;
            return Err(e);
        }
        storage.end_commit_point(true).await?;
        drop(storage);

        // Announce the definition on the shared definitions topic
        let announce = Message {
            id: Uuid::new_v4(),
            header: MessageHeader {
                author: self.identity.local_org().to_owned(),
                key: self.identity.local_signing_key().to_owned(),
                namespace,
                group: None,
                topics: vec![DEFINITION_TOPIC.to_owned()],
                tag: Some("group".to_owned()),
                msg_type: MessageType::Definition,
                created: now,
                cid: None,
            },
            data: Vec::new(),
            hash: None,
            state: MessageState::Staged,
            batch: None,
            confirmed: None,
        };
        let payload = vec![DataElement::Inline(serde_json::to_value(&group)?)];
        self.send_message(announce, payload).await?;
        Ok(group)
    }

    // Stage an outbound message. The message row and every new data row are
    // written in one commit point; the batch manager is nudged afterwards.
    pub async fn send_message(
        &self,
        mut message: Message,
        elements: Vec<DataElement>,
    ) -> Result<Message, CoreError> {
        if !self.identity.is_local(&message.header.author) {
            return Err(CoreError::Unauthorized(message.header.author));
        }
        if message.header.key.is_empty() {
            message.header.key = self.identity.local_signing_key().to_owned();
        }

        let now = get_current_time_in_millis();
        message.header.created = now;
        message.state = MessageState::Staged;
        message.batch = None;
        message.confirmed = None;

        if message.header.msg_type.is_private() {
            let group = message
                .header
                .group
                .as_ref()
                .ok_or_else(|| CoreError::InvalidInput("Private message without group".into()))?;
            let storage = self.storage.read().await;
            if storage.get_group(group).await?.is_none() {
                return Err(CoreError::GroupNotFound(group.clone()));
            }
        }

        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let staged = self
            .stage_message(&mut *storage, &mut message, elements, now)
            .await;
        match staged {
            Ok(()) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);

        counter!("weft_messages_submitted_total").increment(1);
        let key = BatchKey::for_message(&message);
        if self.batch_keys.send(key).await.is_err() {
            debug!("Batch key channel closed, message stays staged");
        }
        Ok(message)
    }

    async fn stage_message(
        &self,
        storage: &mut S,
        message: &mut Message,
        elements: Vec<DataElement>,
        now: u64,
    ) -> Result<(), CoreError> {
        let mut refs = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                DataElement::Inline(value) => {
                    let mut data =
                        Data::new_value(message.header.namespace.clone(), value, now);
                    data.seal()?;
                    storage.insert_data(&data).await?;
                    refs.push(data.as_ref()?);
                }
                DataElement::Ref(data_ref) => {
                    let stored = storage
                        .get_data(&data_ref.id)
                        .await?
                        .ok_or(CoreError::InvalidRef(data_ref.id))?;
                    if stored.hash.as_ref() != Some(&data_ref.hash) {
                        return Err(CoreError::InvalidRef(data_ref.id));
                    }
                    refs.push(data_ref);
                }
                DataElement::Blob(blob) => {
                    // The blob content must already be staged locally
                    let held: Option<Blob> = storage.get_blob(&blob.hash).await?;
                    if held.is_none() {
                        return Err(CoreError::InvalidInput(format!(
                            "Blob {} is not held locally",
                            blob.hash
                        )));
                    }
                    let mut data = Data::new_blob(message.header.namespace.clone(), blob, now);
                    data.seal()?;
                    storage.insert_data(&data).await?;
                    refs.push(data.as_ref()?);
                }
            }
        }

        message.data = refs;
        message.validate()?;
        message.seal()?;
        storage.insert_message(message).await?;
        Ok(())
    }
}

// Convenience constructor for the common broadcast/private submission shape
pub fn new_message(
    namespace: &str,
    author: &str,
    msg_type: MessageType,
    topics: Vec<String>,
    group: Option<weft_common::crypto::Hash>,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        header: MessageHeader {
            author: author.to_owned(),
            key: String::new(),
            namespace: namespace.to_owned(),
            group,
            topics,
            tag: None,
            msg_type,
            created: 0,
            cid: None,
        },
        data: Vec::new(),
        hash: None,
        state: MessageState::Staged,
        batch: None,
        confirmed: None,
    }
}
