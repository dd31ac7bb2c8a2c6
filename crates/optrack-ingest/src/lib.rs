//! Batch upsert of drafts handed off by collaborators (scanners, channel
//! monitors) as JSON ingest bundles.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use optrack_core::{
    Channel, ChannelDraft, Opportunity, OpportunityDraft, Pipeline, Prospect, ProspectDraft,
    Record, Task, TaskDraft,
};
use optrack_storage::{RecordSet, Store, StoreError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "optrack-ingest";

/// Title prefix of the follow-up task kept for each open ingested opportunity.
pub const FOLLOW_UP_PREFIX: &str = "Apply: ";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IngestBundle {
    pub source_id: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opportunities: Vec<OpportunityDraft>,
    #[serde(default)]
    pub prospects: Vec<ProspectDraft>,
    #[serde(default)]
    pub channels: Vec<ChannelDraft>,
}

impl IngestBundle {
    pub fn draft_count(&self) -> usize {
        self.opportunities.len() + self.prospects.len() + self.channels.len()
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed ingest bundle: {0}")]
    Malformed(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Where bundles come from.
pub trait IngestSource {
    fn describe(&self) -> String;
    fn load(&self) -> Result<IngestBundle, IngestError>;
}

/// A bundle written to disk as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonBundleSource {
    path: PathBuf,
}

impl JsonBundleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IngestSource for JsonBundleSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<IngestBundle, IngestError> {
        let bundle: IngestBundle = read_json_file(&self.path)?;
        if bundle.source_id.trim().is_empty() {
            return Err(IngestError::Malformed(format!(
                "{} has an empty source_id",
                self.path.display()
            )));
        }
        Ok(bundle)
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|err| IngestError::Malformed(format!("parsing {}: {err}", path.display())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub follow_up_tasks: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            follow_up_tasks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KindCounts {
    pub created: usize,
    pub updated: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IngestSummary {
    pub source_id: String,
    pub opportunities: KindCounts,
    pub prospects: KindCounts,
    pub channels: KindCounts,
    pub follow_up_tasks: KindCounts,
}

impl IngestSummary {
    pub fn rejected(&self) -> usize {
        self.opportunities.rejected + self.prospects.rejected + self.channels.rejected
    }
}

/// The four stores a bundle can touch.
pub struct IngestTargets<'a, O, P, C, T> {
    pub opportunities: &'a O,
    pub prospects: &'a P,
    pub channels: &'a C,
    pub tasks: &'a T,
}

/// Upserts every draft in `bundle`, one critical section per record kind.
///
/// Drafts that fail validation are counted and skipped; store failures abort.
pub fn ingest_bundle<O, P, C, T>(
    targets: &IngestTargets<'_, O, P, C, T>,
    bundle: IngestBundle,
    options: IngestOptions,
    now: DateTime<Utc>,
) -> Result<IngestSummary, StoreError>
where
    O: Store<Opportunity>,
    P: Store<Prospect>,
    C: Store<Channel>,
    T: Store<Task>,
{
    let IngestBundle {
        source_id,
        opportunities,
        prospects,
        channels,
        ..
    } = bundle;
    let mut summary = IngestSummary {
        source_id: source_id.clone(),
        ..IngestSummary::default()
    };

    let opportunities = opportunities
        .into_iter()
        .map(|mut draft| {
            draft.source.get_or_insert_with(|| source_id.clone());
            draft
        })
        .collect::<Vec<_>>();
    let (counts, ingested) = targets
        .opportunities
        .write(|set| upsert_all(set, opportunities, &source_id, now))?;
    summary.opportunities = counts;

    let prospects = prospects
        .into_iter()
        .map(|mut draft| {
            draft.source.get_or_insert_with(|| source_id.clone());
            draft
        })
        .collect::<Vec<_>>();
    let (counts, _) = targets
        .prospects
        .write(|set| upsert_all(set, prospects, &source_id, now))?;
    summary.prospects = counts;

    let (counts, _) = targets
        .channels
        .write(|set| upsert_all(set, channels, &source_id, now))?;
    summary.channels = counts;

    // Keyed on what the opportunities store holds, not on what this call
    // created, so a retry after a failed tasks write still adds them.
    let drafts = ingested
        .iter()
        .filter(|opportunity| !opportunity.status.is_terminal())
        .map(follow_up_task)
        .collect::<Vec<_>>();
    if options.follow_up_tasks && !drafts.is_empty() {
        let (counts, _) = targets.tasks.write(|set| {
            let missing = drafts
                .into_iter()
                .filter(|draft| {
                    Task::draft_key(draft).map_or(true, |key| set.find_by_key(&key).is_none())
                })
                .collect::<Vec<_>>();
            upsert_all(set, missing, &source_id, now)
        })?;
        summary.follow_up_tasks = counts;
    }

    info!(
        source = %source_id,
        opportunities_created = summary.opportunities.created,
        prospects_created = summary.prospects.created,
        channels_created = summary.channels.created,
        rejected = summary.rejected(),
        "ingest bundle applied"
    );
    Ok(summary)
}

pub fn follow_up_task(opportunity: &Opportunity) -> TaskDraft {
    TaskDraft {
        title: format!("{FOLLOW_UP_PREFIX}{}", opportunity.name),
        priority: Some(opportunity.priority),
        ..TaskDraft::default()
    }
}

/// Returns the counts and every record this call created or updated.
fn upsert_all<R: Record>(
    set: &mut RecordSet<R>,
    drafts: Vec<R::Draft>,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<(KindCounts, Vec<R>), StoreError> {
    let mut counts = KindCounts::default();
    let mut stored = Vec::new();
    for draft in drafts {
        match set.upsert(draft, now) {
            Ok(upserted) => {
                if upserted.created {
                    counts.created += 1;
                } else {
                    counts.updated += 1;
                }
                stored.push(upserted.record);
            }
            Err(StoreError::Domain(err)) => {
                counts.rejected += 1;
                warn!(source = %source_id, kind = %R::KIND, error = %err, "ingest draft rejected");
            }
            Err(err) => return Err(err),
        }
    }
    Ok((counts, stored))
}
