use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{normalize_token, status_pipeline};
use crate::record::{optional_text, unknown_field};
use crate::{
    non_empty, normalize_url, required, DomainError, Extra, NaturalKey, Pipeline, Priority, Record,
    RecordKind,
};

status_pipeline! {
    /// Hackathon/grant/job pipeline. `won` and `lost` close it.
    OpportunityStatus, kind = "opportunity", initial = Discovered,
    terminal = [Won, Lost],
    {
        Discovered => "discovered",
        Tracking => "tracking",
        Submitted => "submitted",
        Won => "won",
        Lost => "lost",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hackathon,
    Grant,
    Job,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Hackathon,
        Category::Grant,
        Category::Job,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Hackathon => "hackathon",
            Category::Grant => "grant",
            Category::Job => "job",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_token(s);
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "invalid category {:?} (expected one of: hackathon, grant, job, other)",
                    s.trim()
                ))
            })
    }
}

/// Hand-off shape for `add` and ingest bundles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: OpportunityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Record for Opportunity {
    type Status = OpportunityStatus;
    type Draft = OpportunityDraft;

    const KIND: RecordKind = RecordKind::Opportunity;

    fn id(&self) -> u64 {
        self.id
    }

    fn natural_key(&self) -> NaturalKey {
        let url = normalize_url(&self.url);
        NaturalKey::new([self.name.as_str(), url.as_str()])
    }

    fn draft_key(draft: &OpportunityDraft) -> Result<NaturalKey, DomainError> {
        let name = required(Self::KIND.noun(), "name", &draft.name)?;
        let url = normalize_url(draft.url.as_deref().unwrap_or_default());
        Ok(NaturalKey::new([name, url.as_str()]))
    }

    fn from_draft(id: u64, draft: OpportunityDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            description: non_empty(draft.description).unwrap_or_default(),
            url: non_empty(draft.url).unwrap_or_default(),
            category: draft.category.unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            status: OpportunityStatus::INITIAL,
            source: non_empty(draft.source),
            submitted_at: None,
            created_at: now,
            updated_at: now,
            extra: Extra::new(),
        }
    }

    fn merge_draft(&mut self, draft: OpportunityDraft, now: DateTime<Utc>) {
        if let Some(description) = non_empty(draft.description) {
            self.description = description;
        }
        if let Some(category) = draft.category {
            self.category = category;
        }
        if let Some(priority) = draft.priority {
            self.priority = priority;
        }
        if let Some(source) = non_empty(draft.source) {
            self.source = Some(source);
        }
        self.updated_at = now;
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> OpportunityStatus {
        self.status
    }

    fn apply_status(&mut self, status: OpportunityStatus, now: DateTime<Utc>) {
        if status == OpportunityStatus::Submitted && self.submitted_at.is_none() {
            self.submitted_at = Some(now);
        }
        self.status = status;
        self.updated_at = now;
    }

    fn priority(&self) -> Option<Priority> {
        Some(self.priority)
    }

    fn category(&self) -> Option<&str> {
        Some(self.category.as_str())
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.name.as_str(), self.description.as_str()];
        text.extend(self.source.as_deref());
        text
    }

    fn mutable_fields() -> &'static [&'static str] {
        &["description", "category", "priority", "source", "status"]
    }

    fn set_field(&mut self, field: &str, value: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        match field {
            "description" => self.description = value.trim().to_string(),
            "category" => self.category = value.parse()?,
            "priority" => self.priority = value.parse()?,
            "source" => self.source = optional_text(value),
            "status" => {
                let status = OpportunityStatus::parse(value)?;
                self.apply_status(status, now);
            }
            other => return Err(unknown_field(Self::KIND, other, Self::mutable_fields())),
        }
        self.updated_at = now;
        Ok(())
    }
}
