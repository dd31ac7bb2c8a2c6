use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::status_pipeline;
use crate::record::{parse_optional_timestamp, unknown_field};
use crate::{
    non_empty, normalize_channel_handle, required, DomainError, Extra, NaturalKey, Pipeline,
    Priority, Record, RecordKind,
};

pub const DEFAULT_CHANNEL_CATEGORY: &str = "crypto";

status_pipeline! {
    /// Watchlist state, persisted as the channel's `active` flag.
    ChannelState, kind = "channel", initial = Active,
    terminal = [Inactive],
    {
        Active => "active",
        Inactive => "inactive",
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelDraft {
    pub handle: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u64,
    pub handle: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_active() -> bool {
    true
}

impl Channel {
    pub fn link(&self) -> String {
        format!("https://t.me/{}", self.handle)
    }
}

impl Record for Channel {
    type Status = ChannelState;
    type Draft = ChannelDraft;

    const KIND: RecordKind = RecordKind::Channel;

    fn id(&self) -> u64 {
        self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::new([self.handle.as_str()])
    }

    fn draft_key(draft: &ChannelDraft) -> Result<NaturalKey, DomainError> {
        let handle = normalize_channel_handle(&draft.handle);
        let handle = required(Self::KIND.noun(), "handle", &handle)?;
        Ok(NaturalKey::new([handle]))
    }

    fn from_draft(id: u64, draft: ChannelDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            handle: normalize_channel_handle(&draft.handle),
            category: non_empty(draft.category)
                .unwrap_or_else(|| DEFAULT_CHANNEL_CATEGORY.to_string()),
            last_scraped_at: None,
            active: true,
            created_at: now,
            updated_at: now,
            extra: Extra::new(),
        }
    }

    fn merge_draft(&mut self, draft: ChannelDraft, now: DateTime<Utc>) {
        if let Some(category) = non_empty(draft.category) {
            self.category = category;
        }
        self.updated_at = now;
    }

    fn display_name(&self) -> &str {
        &self.handle
    }

    fn status(&self) -> ChannelState {
        if self.active {
            ChannelState::Active
        } else {
            ChannelState::Inactive
        }
    }

    fn apply_status(&mut self, status: ChannelState, now: DateTime<Utc>) {
        self.active = status == ChannelState::Active;
        self.updated_at = now;
    }

    fn priority(&self) -> Option<Priority> {
        None
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn search_text(&self) -> Vec<&str> {
        vec![self.handle.as_str(), self.category.as_str()]
    }

    fn mutable_fields() -> &'static [&'static str] {
        &["category", "last_scraped_at", "status"]
    }

    fn set_field(&mut self, field: &str, value: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        match field {
            "category" => {
                self.category = non_empty(Some(value.to_string()))
                    .ok_or_else(|| DomainError::validation("channel category cannot be blank"))?;
            }
            "last_scraped_at" => {
                self.last_scraped_at = parse_optional_timestamp(field, value)?;
            }
            "status" => {
                let status = ChannelState::parse(value)?;
                self.apply_status(status, now);
            }
            other => return Err(unknown_field(Self::KIND, other, Self::mutable_fields())),
        }
        self.updated_at = now;
        Ok(())
    }
}
