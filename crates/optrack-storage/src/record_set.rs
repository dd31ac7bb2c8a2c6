use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use optrack_core::{DomainError, Extra, NaturalKey, Pipeline, Record};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::StoreError;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn current_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

/// Result of an upsert: the stored record and whether it was newly inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<R> {
    pub record: R,
    pub created: bool,
}

/// In-memory form of one store document.
///
/// Records keep insertion order. Ids come from `next_id`, which only ever
/// grows, so a deleted record's id is never handed out again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: serde::de::DeserializeOwned"))]
pub struct RecordSet<R> {
    #[serde(default = "current_schema_version")]
    schema_version: u32,
    #[serde(default)]
    next_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    records: Vec<R>,
    #[serde(flatten)]
    extra: Extra,
    #[serde(skip)]
    dirty: bool,
}

impl<R: Record> Default for RecordSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordSet<R> {
    pub fn new() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            next_id: 1,
            last_updated: None,
            records: Vec::new(),
            extra: Extra::new(),
            dirty: false,
        }
    }

    /// Parses and validates a persisted document. Errors are reasons for
    /// [`StoreError::Corrupt`].
    pub fn from_json(text: &str) -> Result<Self, String> {
        let mut set: Self = serde_json::from_str(text).map_err(|err| err.to_string())?;
        set.validate()?;
        Ok(set)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    fn validate(&mut self) -> Result<(), String> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema_version {} (this build reads up to {CURRENT_SCHEMA_VERSION})",
                self.schema_version
            ));
        }

        let mut ids = HashSet::new();
        for record in &self.records {
            if record.id() == 0 {
                return Err(format!("{} with id 0", R::KIND));
            }
            if !ids.insert(record.id()) {
                return Err(format!("duplicate {} id {}", R::KIND, record.id()));
            }
        }

        let mut keys: HashMap<NaturalKey, u64> = HashMap::new();
        for record in &self.records {
            if let Some(first) = keys.insert(record.natural_key(), record.id()) {
                warn!(
                    kind = %R::KIND,
                    first,
                    duplicate = record.id(),
                    "store holds records sharing a natural key; upserts update the first"
                );
            }
        }

        let highest = self.records.iter().map(|r| r.id()).max().unwrap_or(0);
        let floor = highest
            .checked_add(1)
            .ok_or_else(|| format!("{} id {highest} leaves no room for new ids", R::KIND))?;
        self.next_id = self.next_id.max(floor);
        Ok(())
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once any mutation has happened since load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, id: u64) -> Result<&R, StoreError> {
        self.records
            .iter()
            .find(|r| r.id() == id)
            .ok_or(StoreError::NotFound { kind: R::KIND, id })
    }

    pub fn find_by_key(&self, key: &NaturalKey) -> Option<&R> {
        self.records.iter().find(|r| &r.natural_key() == key)
    }

    fn position(&self, id: u64) -> Result<usize, StoreError> {
        self.records
            .iter()
            .position(|r| r.id() == id)
            .ok_or(StoreError::NotFound { kind: R::KIND, id })
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.dirty = true;
        self.last_updated = Some(now);
    }

    /// Inserts the draft, or merges it into the record with the same natural key.
    pub fn upsert(&mut self, draft: R::Draft, now: DateTime<Utc>) -> Result<Upserted<R>, StoreError> {
        let key = R::draft_key(&draft)?;

        if let Some(existing) = self.records.iter_mut().find(|r| r.natural_key() == key) {
            existing.merge_draft(draft, now);
            let record = existing.clone();
            self.touch(now);
            info!(kind = %R::KIND, id = record.id(), %key, "record updated");
            return Ok(Upserted {
                record,
                created: false,
            });
        }

        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or_else(|| {
            DomainError::validation(format!("{} ids are exhausted", R::KIND))
        })?;
        let record = R::from_draft(id, draft, now);
        self.records.push(record.clone());
        self.touch(now);
        info!(kind = %R::KIND, id, %key, "record created");
        Ok(Upserted {
            record,
            created: true,
        })
    }

    /// Validates `raw` against the kind's vocabulary before touching anything.
    pub fn set_status(&mut self, id: u64, raw: &str, now: DateTime<Utc>) -> Result<&R, StoreError> {
        let index = self.position(id)?;
        let status = R::Status::parse(raw)?;
        let record = &mut self.records[index];
        let previous = record.status();
        record.apply_status(status, now);
        self.touch(now);
        info!(kind = %R::KIND, id, from = %previous, to = %status, "status changed");
        Ok(&self.records[index])
    }

    /// Edits one mutable field. The record is replaced only if the edit succeeds.
    pub fn update_field(
        &mut self,
        id: u64,
        field: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<&R, StoreError> {
        let index = self.position(id)?;
        let mut edited = self.records[index].clone();
        edited.set_field(field.trim(), value, now)?;
        self.records[index] = edited;
        self.touch(now);
        info!(kind = %R::KIND, id, field, "field updated");
        Ok(&self.records[index])
    }

    /// Removes the record. Records never reference each other, so nothing cascades.
    pub fn delete(&mut self, id: u64, now: DateTime<Utc>) -> Result<R, StoreError> {
        let index = self.position(id)?;
        let removed = self.records.remove(index);
        self.touch(now);
        info!(kind = %R::KIND, id, "record deleted");
        Ok(removed)
    }
}
