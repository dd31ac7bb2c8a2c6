//! Core domain model for optrack: records, drafts, status pipelines and natural keys.

use std::fmt;

use thiserror::Error;

mod channel;
mod opportunity;
mod pipeline;
mod prospect;
mod record;
mod task;

pub use channel::{Channel, ChannelDraft, ChannelState, DEFAULT_CHANNEL_CATEGORY};
pub use opportunity::{Category, Opportunity, OpportunityDraft, OpportunityStatus};
pub use pipeline::{Pipeline, Priority};
pub use prospect::{Prospect, ProspectDraft, ProspectStatus};
pub use record::{parse_timestamp, Extra, Record, RecordKind};
pub use task::{Task, TaskDraft, TaskStatus, DEFAULT_ROI_INPUT};

pub const CRATE_NAME: &str = "optrack-core";

/// Errors raised while validating drafts, field edits and status values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid {kind} status {value:?} (expected one of: {allowed})")]
    InvalidStatus {
        kind: &'static str,
        value: String,
        allowed: String,
    },
    #[error("{0}")]
    Validation(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_invalid_status(&self) -> bool {
        matches!(self, Self::InvalidStatus { .. })
    }
}

/// Identity of a real-world entity, used for deduplication.
///
/// Every component is stored already normalized, so two keys compare equal
/// exactly when their records describe the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            parts
                .into_iter()
                .map(|part| normalize_key_fragment(part.as_ref()))
                .collect(),
        )
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" | "))
    }
}

/// Trim, case-fold and collapse internal whitespace.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn normalize_url(input: &str) -> String {
    input.trim().trim_end_matches('/').to_string()
}

pub(crate) fn required<'a>(
    kind: &str,
    field: &str,
    value: &'a str,
) -> Result<&'a str, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!(
            "{kind} {field} is required"
        )));
    }
    Ok(trimmed)
}

/// Trimmed value, or `None` when blank.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reduces `@name`, `t.me/name` and full `https://t.me/name/` links to `name`.
pub fn normalize_channel_handle(raw: &str) -> String {
    let mut handle = raw.trim();
    for prefix in ["https://", "http://", "www."] {
        handle = handle.strip_prefix(prefix).unwrap_or(handle);
    }
    handle = handle.strip_prefix("t.me/").unwrap_or(handle);
    handle.trim_start_matches('@').trim_end_matches('/').to_string()
}
