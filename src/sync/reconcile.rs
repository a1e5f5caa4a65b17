//! Realtime change reconciliation
//!
//! Change events pushed by the backend are folded into a local
//! [`Collection`] without a refetch. Within one batch, events are applied by
//! kind: inserts, then updates, then deletes. [`split_batches`] cuts an
//! arrival-ordered stream into batches where that reordering is harmless.

use std::collections::{HashMap, HashSet};

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReconcileError;

/// A row with a unique identifier.
pub trait Record:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn record_id(&self) -> &str;
}

/// Ordered records with unique ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Collection<T> {
    records: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows, keeping the first occurrence of a duplicated id.
    pub fn from_records(records: Vec<T>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.record_id().to_string()))
            .collect();
        Self { records }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.record_id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(Record::record_id).collect()
    }
}

impl<T> Collection<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

}

impl<'de, T: Record> Deserialize<'de> for Collection<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Collection::from_records)
    }
}

impl<T: Record> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Collection::from_records(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// A single change to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    /// Partial record: top-level fields to overwrite.
    Update { id: String, patch: Map<String, Value> },
    Delete { id: String },
}

impl<T> ChangeEvent<T> {
    pub fn id(&self) -> &str
    where
        T: Record,
    {
        match self {
            ChangeEvent::Insert(record) => record.record_id(),
            ChangeEvent::Update { id, .. } | ChangeEvent::Delete { id } => id,
        }
    }

    /// Position of this kind in the order a batch is applied.
    fn apply_rank(&self) -> u8 {
        match self {
            ChangeEvent::Insert(_) => 0,
            ChangeEvent::Update { .. } => 1,
            ChangeEvent::Delete { .. } => 2,
        }
    }
}

/// Change notification as delivered by the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    /// INSERT, UPDATE or DELETE
    pub event_type: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl<T: Record> ChangeEvent<T> {
    /// Convert a wire payload into a typed event.
    pub fn from_payload(payload: ChangePayload) -> Result<Self, ReconcileError> {
        let kind = payload.event_type.to_ascii_uppercase();
        match kind.as_str() {
            "INSERT" => {
                let row = payload
                    .new
                    .ok_or_else(|| ReconcileError::MissingId(kind.clone()))?;
                let id = row_id(&row).ok_or_else(|| ReconcileError::MissingId(kind.clone()))?;
                let record = serde_json::from_value(row).map_err(|e| ReconcileError::Decode {
                    id,
                    reason: e.to_string(),
                })?;
                Ok(ChangeEvent::Insert(record))
            }
            "UPDATE" => {
                let row = payload.new.unwrap_or(Value::Null);
                let id = row_id(&row)
                    .or_else(|| payload.old.as_ref().and_then(row_id))
                    .ok_or_else(|| ReconcileError::MissingId(kind.clone()))?;
                let Value::Object(patch) = row else {
                    return Err(ReconcileError::Decode {
                        id,
                        reason: "update payload is not an object".to_string(),
                    });
                };
                Ok(ChangeEvent::Update { id, patch })
            }
            "DELETE" => {
                let id = payload
                    .old
                    .as_ref()
                    .and_then(row_id)
                    .or_else(|| payload.new.as_ref().and_then(row_id))
                    .ok_or_else(|| ReconcileError::MissingId(kind.clone()))?;
                Ok(ChangeEvent::Delete { id })
            }
            _ => Err(ReconcileError::UnknownEvent(payload.event_type)),
        }
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert wire payloads, dropping (and logging) the malformed ones.
pub fn decode_payloads<T: Record>(payloads: Vec<ChangePayload>) -> Vec<ChangeEvent<T>> {
    payloads
        .into_iter()
        .filter_map(|payload| match ChangeEvent::from_payload(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Dropping change event: {}", e);
                None
            }
        })
        .collect()
}

/// Split arrival-ordered events into batches for [`apply_changes`].
///
/// A batch is closed when an event would be applied before an earlier event
/// for the same id, such as a re-insert following a delete. Each batch then
/// converges to the same rows as replaying its events one by one.
pub fn split_batches<T: Record>(changes: Vec<ChangeEvent<T>>) -> Vec<Vec<ChangeEvent<T>>> {
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut ranks: HashMap<String, u8> = HashMap::new();

    for change in changes {
        let rank = change.apply_rank();
        if ranks.get(change.id()).is_some_and(|&seen| rank < seen) {
            batches.push(std::mem::take(&mut batch));
            ranks.clear();
        }
        let seen = ranks.entry(change.id().to_string()).or_insert(rank);
        *seen = (*seen).max(rank);
        batch.push(change);
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// Apply a batch of changes to `current`, returning the new collection.
///
/// Inserts skip ids already present. Updates shallow-merge onto an existing
/// record and ignore unknown ids. Deletes of unknown ids are no-ops.
/// Untouched records keep their relative order and inserts are appended.
pub fn apply_changes<T: Record>(changes: Vec<ChangeEvent<T>>, current: &Collection<T>) -> Collection<T> {
    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = HashSet::new();
    for change in changes {
        match change {
            ChangeEvent::Insert(record) => inserts.push(record),
            ChangeEvent::Update { id, patch } => updates.push((id, patch)),
            ChangeEvent::Delete { id } => {
                deletes.insert(id);
            }
        }
    }

    let mut records = current.records.clone();
    let mut index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.record_id().to_string(), i))
        .collect();

    for record in inserts {
        if index.contains_key(record.record_id()) {
            continue;
        }
        index.insert(record.record_id().to_string(), records.len());
        records.push(record);
    }

    for (id, patch) in updates {
        let Some(&pos) = index.get(&id) else {
            continue;
        };
        match merge(&records[pos], &id, patch) {
            Ok(merged) => records[pos] = merged,
            Err(e) => warn!("Dropping change event: {}", e),
        }
    }

    if !deletes.is_empty() {
        records.retain(|r| !deletes.contains(r.record_id()));
    }

    Collection { records }
}

fn merge<T: Record>(existing: &T, id: &str, patch: Map<String, Value>) -> Result<T, ReconcileError> {
    let merge_err = |reason: String| ReconcileError::Merge {
        id: id.to_string(),
        reason,
    };

    let Value::Object(mut fields) = serde_json::to_value(existing).map_err(|e| merge_err(e.to_string()))?
    else {
        return Err(merge_err("record does not serialize to an object".to_string()));
    };

    for (key, value) in patch {
        if key == "id" {
            continue;
        }
        fields.insert(key, value);
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| merge_err(e.to_string()))
}
