mod providers;

use std::{collections::BTreeMap, ops::Bound, path::Path};

use async_trait::async_trait;
use log::{debug, trace};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sled::{Db, Tree};
use weft_common::query::{self, Filter, QueryParams};

use crate::core::{
    error::CoreError,
    storage::{Column, CommitPointProvider, EntryState, Snapshot, Storage},
};

// Counter names inside the Counters column
pub const COUNTER_EVENTS: &str = "events";
pub const COUNTER_PINS: &str = "pins";

pub struct SledStorage {
    #[allow(dead_code)]
    db: Db,
    messages: Tree,
    data: Tree,
    blobs: Tree,
    batches: Tree,
    pending_payloads: Tree,
    pins: Tree,
    pin_refs: Tree,
    nonces: Tree,
    next_pins: Tree,
    transactions: Tree,
    operations: Tree,
    operation_keys: Tree,
    events: Tree,
    subscriptions: Tree,
    dead_letters: Tree,
    offsets: Tree,
    groups: Tree,
    token_pools: Tree,
    token_transfers: Tree,
    token_approvals: Tree,
    counters: Tree,
    // Active commit point, if any
    snapshot: Option<Snapshot>,
}

impl SledStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("Opening storage at {}", path.as_ref().display());
        }
        let db = sled::Config::new().path(path).open()?;
        Self::with_db(db)
    }

    // In-memory database backed by a temp dir, dropped on close
    pub fn temporary() -> Result<Self, CoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: Db) -> Result<Self, CoreError> {
        Ok(Self {
            messages: db.open_tree(Column::Messages.name())?,
            data: db.open_tree(Column::Data.name())?,
            blobs: db.open_tree(Column::Blobs.name())?,
            batches: db.open_tree(Column::Batches.name())?,
            pending_payloads: db.open_tree(Column::PendingPayloads.name())?,
            pins: db.open_tree(Column::Pins.name())?,
            pin_refs: db.open_tree(Column::PinRefs.name())?,
            nonces: db.open_tree(Column::Nonces.name())?,
            next_pins: db.open_tree(Column::NextPins.name())?,
            transactions: db.open_tree(Column::Transactions.name())?,
            operations: db.open_tree(Column::Operations.name())?,
            operation_keys: db.open_tree(Column::OperationKeys.name())?,
            events: db.open_tree(Column::Events.name())?,
            subscriptions: db.open_tree(Column::Subscriptions.name())?,
            dead_letters: db.open_tree(Column::DeadLetters.name())?,
            offsets: db.open_tree(Column::Offsets.name())?,
            groups: db.open_tree(Column::Groups.name())?,
            token_pools: db.open_tree(Column::TokenPools.name())?,
            token_transfers: db.open_tree(Column::TokenTransfers.name())?,
            token_approvals: db.open_tree(Column::TokenApprovals.name())?,
            counters: db.open_tree(Column::Counters.name())?,
            db,
            snapshot: None,
        })
    }

    fn tree_for(&self, column: Column) -> &Tree {
        match column {
            Column::Messages => &self.messages,
            Column::Data => &self.data,
            Column::Blobs => &self.blobs,
            Column::Batches => &self.batches,
            Column::PendingPayloads => &self.pending_payloads,
            Column::Pins => &self.pins,
            Column::PinRefs => &self.pin_refs,
            Column::Nonces => &self.nonces,
            Column::NextPins => &self.next_pins,
            Column::Transactions => &self.transactions,
            Column::Operations => &self.operations,
            Column::OperationKeys => &self.operation_keys,
            Column::Events => &self.events,
            Column::Subscriptions => &self.subscriptions,
            Column::DeadLetters => &self.dead_letters,
            Column::Offsets => &self.offsets,
            Column::Groups => &self.groups,
            Column::TokenPools => &self.token_pools,
            Column::TokenTransfers => &self.token_transfers,
            Column::TokenApprovals => &self.token_approvals,
            Column::Counters => &self.counters,
        }
    }

    // ---- raw access, snapshot overlay first ----

    pub(super) fn get_raw(
        &self,
        column: Column,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, CoreError> {
        if let Some(snapshot) = &self.snapshot {
            if let Some(changes) = snapshot.changes(column) {
                match changes.get(key) {
                    EntryState::Stored(value) => return Ok(Some(value.to_vec())),
                    EntryState::Deleted => return Ok(None),
                    EntryState::Absent => {}
                }
            }
        }
        Ok(self.tree_for(column).get(key)?.map(|v| v.to_vec()))
    }

    pub(super) fn insert_raw(
        &mut self,
        column: Column,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), CoreError> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.changes_mut(column).insert(key, value);
            return Ok(());
        }
        self.tree_for(column).insert(key, value)?;
        Ok(())
    }

    pub(super) fn remove_raw(&mut self, column: Column, key: &[u8]) -> Result<(), CoreError> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.changes_mut(column).remove(key.to_vec());
            return Ok(());
        }
        self.tree_for(column).remove(key)?;
        Ok(())
    }

    // Merged scan over disk and overlay, ascending key order.
    // `prefix` restricts keys, `after` is an exclusive lower bound.
    pub(super) fn scan_raw(
        &self,
        column: Column,
        prefix: Option<&[u8]>,
        after: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
        let tree = self.tree_for(column);
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
            match (prefix, after) {
                (Some(prefix), _) => Box::new(tree.scan_prefix(prefix)),
                (None, Some(after)) => Box::new(
                    tree.range::<Vec<u8>, _>((Bound::Excluded(after.to_vec()), Bound::Unbounded)),
                ),
                (None, None) => Box::new(tree.iter()),
            };
        for row in iter {
            let (key, value) = row?;
            rows.insert(key.to_vec(), value.to_vec());
        }

        if let Some(snapshot) = &self.snapshot {
            if let Some(changes) = snapshot.changes(column) {
                for (key, value) in changes.iter() {
                    let key_slice: &[u8] = key.as_ref();
                    if let Some(prefix) = prefix {
                        if !key_slice.starts_with(prefix) {
                            continue;
                        }
                    }
                    match value {
                        Some(value) => {
                            rows.insert(key_slice.to_vec(), value.to_vec());
                        }
                        None => {
                            rows.remove(key_slice);
                        }
                    }
                }
            }
        }

        if let Some(after) = after {
            rows.retain(|key, _| key.as_slice() > after);
        }

        Ok(rows.into_iter().collect())
    }

    // ---- typed helpers, rows are stored as JSON ----

    pub(super) fn load<T: DeserializeOwned>(
        &self,
        column: Column,
        key: &[u8],
    ) -> Result<Option<T>, CoreError> {
        match self.get_raw(column, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(super) fn save<T: Serialize>(
        &mut self,
        column: Column,
        key: Vec<u8>,
        value: &T,
    ) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.insert_raw(column, key, bytes)
    }

    pub(super) fn scan_values<T: DeserializeOwned>(
        &self,
        column: Column,
    ) -> Result<Vec<T>, CoreError> {
        self.scan_raw(column, None, None)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(CoreError::from))
            .collect()
    }

    pub(super) fn scan_after<T: DeserializeOwned>(
        &self,
        column: Column,
        after: &[u8],
        limit: usize,
    ) -> Result<Vec<T>, CoreError> {
        self.scan_raw(column, None, Some(after))?
            .into_iter()
            .take(limit)
            .map(|(_, value)| serde_json::from_slice(&value).map_err(CoreError::from))
            .collect()
    }

    // Generic filtered query over one column, applying the namespace scope
    // (at the given field path) and the shared filter algebra to the JSON
    // form of each row
    pub(super) fn query_column<T: DeserializeOwned>(
        &self,
        column: Column,
        namespace_field: &str,
        namespace: &str,
        filter: Option<&Filter>,
        params: &QueryParams,
    ) -> Result<Vec<T>, CoreError> {
        let rows = self
            .scan_raw(column, None, None)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<Value>(&value).map_err(CoreError::from))
            .collect::<Result<Vec<Value>, CoreError>>()?;

        let mut scoped = vec![Filter::Eq(
            namespace_field.to_owned(),
            Value::String(namespace.to_owned()),
        )];
        if let Some(filter) = filter {
            scoped.push(filter.clone());
        }
        let scoped = Filter::And(scoped);

        query::query_rows(rows, Some(&scoped), params)
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(CoreError::from))
            .collect()
    }

    // ---- monotonic counters, overlay aware so they roll back ----

    pub(super) fn counter_next(&mut self, name: &str) -> Result<u64, CoreError> {
        let current = self.counter_peek(name)?;
        let next = current + 1;
        self.insert_raw(
            Column::Counters,
            name.as_bytes().to_vec(),
            next.to_be_bytes().to_vec(),
        )?;
        if log::log_enabled!(log::Level::Trace) {
            trace!("Counter {} advanced to {}", name, next);
        }
        Ok(next)
    }

    pub(super) fn counter_peek(&self, name: &str) -> Result<u64, CoreError> {
        match self.get_raw(Column::Counters, name.as_bytes())? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }
}

pub(super) fn decode_u64(bytes: &[u8]) -> Result<u64, CoreError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CoreError::IntegrityViolation("Corrupt counter value".to_owned()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl CommitPointProvider for SledStorage {
    async fn start_commit_point(&mut self) -> Result<(), CoreError> {
        if self.snapshot.is_some() {
            return Err(CoreError::CommitPointActive);
        }
        self.snapshot = Some(Snapshot::default());
        Ok(())
    }

    async fn end_commit_point(&mut self, apply: bool) -> Result<(), CoreError> {
        let snapshot = self.snapshot.take().ok_or(CoreError::NoCommitPoint)?;
        if !apply {
            if log::log_enabled!(log::Level::Trace) {
                trace!("Commit point discarded");
            }
            return Ok(());
        }
        for (column, changes) in snapshot.into_trees() {
            let mut batch = sled::Batch::default();
            for (key, value) in changes {
                match value {
                    Some(value) => batch.insert(key.as_ref(), value.as_ref()),
                    None => batch.remove(key.as_ref()),
                }
            }
            self.tree_for(column).apply_batch(batch)?;
        }
        Ok(())
    }

    fn has_commit_point(&self) -> bool {
        self.snapshot.is_some()
    }
}

impl Storage for SledStorage {}
