use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::{DomainError, NaturalKey, Pipeline, Priority};

/// Unknown persisted fields, carried through load/save untouched.
pub type Extra = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Opportunity,
    Prospect,
    Channel,
    Task,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Opportunity,
        RecordKind::Prospect,
        RecordKind::Channel,
        RecordKind::Task,
    ];

    pub fn noun(self) -> &'static str {
        match self {
            RecordKind::Opportunity => "opportunity",
            RecordKind::Prospect => "prospect",
            RecordKind::Channel => "channel",
            RecordKind::Task => "task",
        }
    }

    /// File stem of the store document for this kind.
    pub fn file_stem(self) -> &'static str {
        match self {
            RecordKind::Opportunity => "opportunities",
            RecordKind::Prospect => "prospects",
            RecordKind::Channel => "channels",
            RecordKind::Task => "tasks",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// A persisted entity with a natural key and a status pipeline.
///
/// Records are created from a `Draft` (the hand-off shape used by `add` and by
/// ingest collaborators) and later mutated only through [`Record::merge_draft`],
/// [`Record::apply_status`] and [`Record::set_field`], all of which refresh
/// `updated_at`.
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned {
    type Status: Pipeline;
    type Draft: Clone + fmt::Debug;

    const KIND: RecordKind;

    fn id(&self) -> u64;
    fn natural_key(&self) -> NaturalKey;

    /// Validates the draft's natural-key fields and returns its key.
    fn draft_key(draft: &Self::Draft) -> Result<NaturalKey, DomainError>;

    /// Builds a new record at the pipeline's initial status.
    fn from_draft(id: u64, draft: Self::Draft, now: DateTime<Utc>) -> Self;

    /// Overwrites fields the draft actually carries. Status and `created_at` stay put.
    fn merge_draft(&mut self, draft: Self::Draft, now: DateTime<Utc>);

    fn display_name(&self) -> &str;
    fn status(&self) -> Self::Status;

    /// Sets the status and refreshes `updated_at`, even when unchanged.
    fn apply_status(&mut self, status: Self::Status, now: DateTime<Utc>);

    fn priority(&self) -> Option<Priority>;
    fn category(&self) -> Option<&str>;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;

    /// Text searched by the `text` list filter.
    fn search_text(&self) -> Vec<&str>;

    fn mutable_fields() -> &'static [&'static str];

    /// Edits one mutable field from its CLI string form.
    fn set_field(&mut self, field: &str, value: &str, now: DateTime<Utc>)
        -> Result<(), DomainError>;
}

pub(crate) fn unknown_field(kind: RecordKind, field: &str, allowed: &[&str]) -> DomainError {
    DomainError::validation(format!(
        "{kind} field {field:?} cannot be updated (mutable fields: {})",
        allowed.join(", ")
    ))
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, DomainError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            DomainError::validation(format!(
                "{field} must be an RFC 3339 timestamp or YYYY-MM-DD date, got {value:?}"
            ))
        })
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: &str,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    if is_clear_value(value) {
        return Ok(None);
    }
    parse_timestamp(field, value).map(Some)
}

/// Blank, `none` and `-` clear optional fields.
pub(crate) fn is_clear_value(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "" | "none" | "-")
}

pub(crate) fn optional_text(value: &str) -> Option<String> {
    if is_clear_value(value) {
        None
    } else {
        Some(value.trim().to_string())
    }
}
