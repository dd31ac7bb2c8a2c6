use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::status_pipeline;
use crate::record::{is_clear_value, parse_optional_timestamp, unknown_field};
use crate::{
    non_empty, required, DomainError, Extra, NaturalKey, Pipeline, Priority, Record, RecordKind,
};

/// Score assumed for a missing impact/urgency/effort input.
pub const DEFAULT_ROI_INPUT: u8 = 5;

status_pipeline! {
    TaskStatus, kind = "task", initial = Todo,
    terminal = [Done],
    {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub impact: Option<u8>,
    #[serde(default)]
    pub urgency: Option<u8>,
    #[serde(default)]
    pub effort: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u8>,
    /// Set the first time the task moves to in-progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on completion; cleared if the task is reopened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Task {
    /// `impact × urgency ÷ effort`, with effort floored at 1.
    pub fn roi_score(&self) -> f64 {
        let impact = self.impact.unwrap_or(DEFAULT_ROI_INPUT) as f64;
        let urgency = self.urgency.unwrap_or(DEFAULT_ROI_INPUT) as f64;
        let effort = self.effort.unwrap_or(DEFAULT_ROI_INPUT).max(1) as f64;
        impact * urgency / effort
    }
}

fn check_score(field: &str, score: Option<u8>) -> Result<Option<u8>, DomainError> {
    match score {
        Some(value) if !(1..=10).contains(&value) => Err(DomainError::validation(format!(
            "task {field} must be between 1 and 10, got {value}"
        ))),
        other => Ok(other),
    }
}

fn parse_score(field: &str, value: &str) -> Result<Option<u8>, DomainError> {
    if is_clear_value(value) {
        return Ok(None);
    }
    let parsed = value.trim().parse::<u8>().map_err(|_| {
        DomainError::validation(format!("task {field} must be a number from 1 to 10, got {value:?}"))
    })?;
    check_score(field, Some(parsed))
}

impl Record for Task {
    type Status = TaskStatus;
    type Draft = TaskDraft;

    const KIND: RecordKind = RecordKind::Task;

    fn id(&self) -> u64 {
        self.id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::new([self.title.as_str()])
    }

    fn draft_key(draft: &TaskDraft) -> Result<NaturalKey, DomainError> {
        let title = required(Self::KIND.noun(), "title", &draft.title)?;
        check_score("impact", draft.impact)?;
        check_score("urgency", draft.urgency)?;
        check_score("effort", draft.effort)?;
        Ok(NaturalKey::new([title]))
    }

    fn from_draft(id: u64, draft: TaskDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.trim().to_string(),
            description: non_empty(draft.description).unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            status: TaskStatus::INITIAL,
            due_at: draft.due_at,
            impact: draft.impact,
            urgency: draft.urgency,
            effort: draft.effort,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            extra: Extra::new(),
        }
    }

    fn merge_draft(&mut self, draft: TaskDraft, now: DateTime<Utc>) {
        if let Some(description) = non_empty(draft.description) {
            self.description = description;
        }
        if let Some(priority) = draft.priority {
            self.priority = priority;
        }
        if draft.due_at.is_some() {
            self.due_at = draft.due_at;
        }
        if draft.impact.is_some() {
            self.impact = draft.impact;
        }
        if draft.urgency.is_some() {
            self.urgency = draft.urgency;
        }
        if draft.effort.is_some() {
            self.effort = draft.effort;
        }
        self.updated_at = now;
    }

    fn display_name(&self) -> &str {
        &self.title
    }

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn apply_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        match status {
            TaskStatus::Todo => self.completed_at = None,
            TaskStatus::InProgress => {
                self.started_at.get_or_insert(now);
                self.completed_at = None;
            }
            TaskStatus::Done => self.completed_at = Some(now),
        }
        self.status = status;
        self.updated_at = now;
    }

    fn priority(&self) -> Option<Priority> {
        Some(self.priority)
    }

    fn category(&self) -> Option<&str> {
        None
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn search_text(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.description.as_str()]
    }

    fn mutable_fields() -> &'static [&'static str] {
        &["description", "priority", "due_at", "impact", "urgency", "effort", "status"]
    }

    fn set_field(&mut self, field: &str, value: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        match field {
            "description" => self.description = value.trim().to_string(),
            "priority" => self.priority = value.parse()?,
            "due_at" => self.due_at = parse_optional_timestamp(field, value)?,
            "impact" => self.impact = parse_score(field, value)?,
            "urgency" => self.urgency = parse_score(field, value)?,
            "effort" => self.effort = parse_score(field, value)?,
            "status" => {
                let status = TaskStatus::parse(value)?;
                self.apply_status(status, now);
            }
            other => return Err(unknown_field(Self::KIND, other, Self::mutable_fields())),
        }
        self.updated_at = now;
        Ok(())
    }
}
