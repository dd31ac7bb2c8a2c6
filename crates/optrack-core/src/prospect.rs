use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::status_pipeline;
use crate::record::{optional_text, unknown_field};
use crate::{
    non_empty, normalize_channel_handle, required, DomainError, Extra, NaturalKey, Pipeline,
    Priority, Record, RecordKind,
};

status_pipeline! {
    /// Outreach pipeline for the prospect CRM.
    ProspectStatus, kind = "prospect", initial = New,
    terminal = [Won, Lost],
    {
        New => "new",
        Contacted => "contacted",
        Meeting => "meeting",
        Proposal => "proposal",
        Won => "won",
        Lost => "lost",
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProspectDraft {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub telegram_handle: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub telegram_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: ProspectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn normalize_handle(raw: Option<String>) -> Option<String> {
    non_empty(raw)
        .map(|handle| normalize_channel_handle(&handle))
        .filter(|handle| !handle.is_empty())
}

fn prospect_key(name: &str, handle: Option<&str>) -> NaturalKey {
    match handle {
        Some(handle) => NaturalKey::new([name, handle]),
        None => NaturalKey::new([name]),
    }
}

impl Record for Prospect {
    type Status = ProspectStatus;
    type Draft = ProspectDraft;

    const KIND: RecordKind = RecordKind::Prospect;

    fn id(&self) -> u64 {
        self.id
    }

    fn natural_key(&self) -> NaturalKey {
        prospect_key(&self.name, self.telegram_handle.as_deref())
    }

    fn draft_key(draft: &ProspectDraft) -> Result<NaturalKey, DomainError> {
        let name = required(Self::KIND.noun(), "name", &draft.name)?;
        let handle = normalize_handle(draft.telegram_handle.clone());
        Ok(prospect_key(name, handle.as_deref()))
    }

    fn from_draft(id: u64, draft: ProspectDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            role: non_empty(draft.role).unwrap_or_default(),
            company: non_empty(draft.company).unwrap_or_default(),
            email: non_empty(draft.email),
            telegram_handle: normalize_handle(draft.telegram_handle),
            source: non_empty(draft.source),
            notes: non_empty(draft.notes).unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            status: ProspectStatus::INITIAL,
            created_at: now,
            updated_at: now,
            extra: Extra::new(),
        }
    }

    fn merge_draft(&mut self, draft: ProspectDraft, now: DateTime<Utc>) {
        if let Some(role) = non_empty(draft.role) {
            self.role = role;
        }
        if let Some(company) = non_empty(draft.company) {
            self.company = company;
        }
        if let Some(email) = non_empty(draft.email) {
            self.email = Some(email);
        }
        if let Some(source) = non_empty(draft.source) {
            self.source = Some(source);
        }
        if let Some(notes) = non_empty(draft.notes) {
            self.notes = notes;
        }
        if let Some(priority) = draft.priority {
            self.priority = priority;
        }
        self.updated_at = now;
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ProspectStatus {
        self.status
    }

    fn apply_status(&mut self, status: ProspectStatus, now: DateTime<Utc>) {
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
        let mut text = vec![
            self.name.as_str(),
            self.notes.as_str(),
            self.company.as_str(),
            self.role.as_str(),
        ];
        text.extend(self.telegram_handle.as_deref());
        text
    }

    fn mutable_fields() -> &'static [&'static str] {
        &["role", "company", "email", "source", "notes", "priority", "status"]
    }

    fn set_field(&mut self, field: &str, value: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        match field {
            "role" => self.role = value.trim().to_string(),
            "company" => self.company = value.trim().to_string(),
            "email" => self.email = optional_text(value),
            "source" => self.source = optional_text(value),
            "notes" => self.notes = value.trim().to_string(),
            "priority" => self.priority = value.parse()?,
            "status" => {
                let status = ProspectStatus::parse(value)?;
                self.apply_status(status, now);
            }
            other => return Err(unknown_field(Self::KIND, other, Self::mutable_fields())),
        }
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn handle_joins_the_key_only_when_present() {
        let with_handle = ProspectDraft {
            name: "Ana Ruiz".into(),
            telegram_handle: Some("@AnaR".into()),
            ..Default::default()
        };
        let without = ProspectDraft {
            name: "ana ruiz".into(),
            ..Default::default()
        };
        let key = Prospect::draft_key(&with_handle).unwrap();
        assert_eq!(key.parts(), ["ana ruiz", "anar"]);
        assert_eq!(Prospect::draft_key(&without).unwrap().parts(), ["ana ruiz"]);
        assert_ne!(key, Prospect::draft_key(&without).unwrap());

        let record = Prospect::from_draft(1, with_handle, now());
        assert_eq!(record.telegram_handle.as_deref(), Some("AnaR"));
        assert_eq!(record.natural_key(), key);
    }

    #[test]
    fn pasted_telegram_links_share_one_key() {
        let key = |handle: &str| {
            Prospect::draft_key(&ProspectDraft {
                name: "Ana".into(),
                telegram_handle: Some(handle.into()),
                ..Default::default()
            })
            .unwrap()
        };
        assert_eq!(key("t.me/ana"), key("@ana"));
        assert_eq!(key("https://t.me/ana/"), key("ana"));
        assert_eq!(key("@ana").parts(), ["ana", "ana"]);
    }

    #[test]
    fn bare_at_sign_counts_as_no_handle() {
        let draft = ProspectDraft {
            name: "Lee".into(),
            telegram_handle: Some("@".into()),
            ..Default::default()
        };
        assert_eq!(Prospect::draft_key(&draft).unwrap().parts(), ["lee"]);
    }

    #[test]
    fn notes_are_editable_and_status_is_validated() {
        let mut record = Prospect::from_draft(
            3,
            ProspectDraft {
                name: "Sam".into(),
                ..Default::default()
            },
            now(),
        );
        record.set_field("notes", "met at ETHDenver", now()).unwrap();
        assert_eq!(record.notes, "met at ETHDenver");
        let err = record.set_field("status", "replied", now()).unwrap_err();
        assert!(err.is_invalid_status());
        assert_eq!(record.status, ProspectStatus::New);
    }
}
