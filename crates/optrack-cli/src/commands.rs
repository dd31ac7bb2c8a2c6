use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use optrack_core::{
    parse_timestamp, Channel, ChannelDraft, DomainError, Opportunity, OpportunityDraft, Priority,
    Prospect, ProspectDraft, Record, Task, TaskDraft,
};
use optrack_ingest::{ingest_bundle, IngestOptions, IngestSource, IngestTargets, JsonBundleSource};
use optrack_report::{
    encode, export_table, list, next_task, render_digest, render_table, similar_records, summary,
    write_export, DigestInput, ExportFormat, ListFilter, Tabular,
};
use optrack_storage::{write_atomic, JsonStore, Store};

use crate::cli::{
    AddChannel, AddOpportunity, AddProspect, AddTask, ChannelAction, Cli, Command, CommonAction,
    ExportArgs, ListArgs, OpportunityAction, ProspectAction, TaskAction,
};
use crate::config::TrackerConfig;

/// Resolved configuration plus the clock reading shared by one invocation.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: TrackerConfig,
    pub now: DateTime<Utc>,
}

impl Session {
    pub fn new(config: TrackerConfig, now: DateTime<Utc>) -> Self {
        Self { config, now }
    }

    fn store<R: Record>(&self) -> JsonStore<R> {
        JsonStore::open(&self.config.data_dir, self.config.lock_options())
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let config = TrackerConfig::load(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let session = Session::new(config, Utc::now());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Opportunity(action) => {
            let store = session.store::<Opportunity>();
            match action {
                OpportunityAction::Add(args) => {
                    add(&store, opportunity_draft(args)?, &session, &mut out)
                }
                OpportunityAction::Common(action) => {
                    run_common(&store, action, &session, &mut out)
                }
            }
        }
        Command::Prospect(action) => {
            let store = session.store::<Prospect>();
            match action {
                ProspectAction::Add(args) => {
                    add(&store, prospect_draft(args)?, &session, &mut out)
                }
                ProspectAction::Common(action) => run_common(&store, action, &session, &mut out),
            }
        }
        Command::Channel(action) => {
            let store = session.store::<Channel>();
            match action {
                ChannelAction::Add(args) => add(&store, channel_draft(args), &session, &mut out),
                ChannelAction::Scraped { id } => mark_scraped(&store, id, &session, &mut out),
                ChannelAction::Common(action) => run_common(&store, action, &session, &mut out),
            }
        }
        Command::Task(action) => {
            let store = session.store::<Task>();
            match action {
                TaskAction::Add(args) => add(&store, task_draft(args)?, &session, &mut out),
                TaskAction::Next => show_next_task(&store, &mut out),
                TaskAction::Common(action) => run_common(&store, action, &session, &mut out),
            }
        }
        Command::Ingest {
            path,
            no_follow_up_tasks,
        } => ingest(&path, !no_follow_up_tasks, &session, &mut out),
        Command::Digest { output } => digest(output.as_deref(), &session, &mut out),
    }
}

fn parse_priority(raw: Option<String>) -> Result<Option<Priority>, DomainError> {
    raw.map(|p| p.parse()).transpose()
}

fn opportunity_draft(args: AddOpportunity) -> Result<OpportunityDraft, DomainError> {
    Ok(OpportunityDraft {
        name: args.name,
        description: args.description,
        url: args.url,
        category: args.category.map(|c| c.parse()).transpose()?,
        priority: parse_priority(args.priority)?,
        source: args.source,
    })
}

fn prospect_draft(args: AddProspect) -> Result<ProspectDraft, DomainError> {
    Ok(ProspectDraft {
        name: args.name,
        role: args.role,
        company: args.company,
        email: args.email,
        telegram_handle: args.handle,
        source: args.source,
        notes: args.notes,
        priority: parse_priority(args.priority)?,
    })
}

fn channel_draft(args: AddChannel) -> ChannelDraft {
    ChannelDraft {
        handle: args.handle,
        category: args.category,
    }
}

fn task_draft(args: AddTask) -> Result<TaskDraft, DomainError> {
    Ok(TaskDraft {
        title: args.title,
        description: args.description,
        priority: parse_priority(args.priority)?,
        due_at: args
            .due
            .as_deref()
            .map(|due| parse_timestamp("due_at", due))
            .transpose()?,
        impact: args.impact,
        urgency: args.urgency,
        effort: args.effort,
    })
}

fn list_filter(args: &ListArgs) -> Result<ListFilter, DomainError> {
    Ok(ListFilter {
        status: args.status.clone(),
        category: args.category.clone(),
        priority: parse_priority(args.priority.clone())?,
        text: args.text.clone(),
    })
}

/// Upsert by natural key, then point out near-duplicate names.
pub fn add<R: Tabular>(
    store: &impl Store<R>,
    draft: R::Draft,
    session: &Session,
    out: &mut impl Write,
) -> Result<()> {
    // Reject incomplete drafts before the store is touched.
    R::draft_key(&draft)?;

    let threshold = session.config.similarity_threshold;
    let (upserted, similar) = store.write(|set| {
        let upserted = set.upsert(draft, session.now)?;
        let similar = if upserted.created {
            similar_records(set.records(), &upserted.record, threshold)
        } else {
            Vec::new()
        };
        Ok((upserted, similar))
    })?;

    let verb = if upserted.created { "created" } else { "updated" };
    writeln!(
        out,
        "{verb} {} #{} {}",
        R::KIND,
        upserted.record.id(),
        upserted.record.display_name()
    )?;
    for hit in similar {
        writeln!(
            out,
            "possible duplicate: {} #{} {} (similarity {:.2})",
            R::KIND,
            hit.id,
            hit.name,
            hit.score
        )?;
    }
    Ok(())
}

fn filtered<R: Tabular>(store: &impl Store<R>, filter: &ListFilter) -> Result<Vec<R>> {
    let records = store.read(|set| {
        list(set.records(), filter).map(|hits| hits.into_iter().cloned().collect::<Vec<_>>())
    })??;
    Ok(records)
}

pub fn run_common<R: Tabular>(
    store: &impl Store<R>,
    action: CommonAction,
    session: &Session,
    out: &mut impl Write,
) -> Result<()> {
    let now = session.now;
    match action {
        CommonAction::List(args) => {
            let records = filtered(store, &list_filter(&args)?)?;
            out.write_all(render_table(&export_table(&records)).as_bytes())?;
        }
        CommonAction::Show { id } => {
            let record = store.read(|set| set.get(id).cloned())??;
            writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
        }
        CommonAction::Update { id, field, value } => {
            let name = store.write(|set| {
                set.update_field(id, &field, &value, now)
                    .map(|r| r.display_name().to_string())
            })?;
            writeln!(out, "updated {} #{id} {name}: {field}", R::KIND)?;
        }
        CommonAction::Status { id, status } => {
            let status = store.write(|set| set.set_status(id, &status, now).map(|r| r.status()))?;
            writeln!(out, "{} #{id} is now {status}", R::KIND)?;
        }
        CommonAction::Delete { id } => {
            let removed = store.write(|set| set.delete(id, now))?;
            writeln!(out, "deleted {} #{id} {}", R::KIND, removed.display_name())?;
        }
        CommonAction::Summary => {
            let counts = store.read(|set| summary(set.records()))?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            for (status, count) in counts {
                writeln!(out, "{:<12} {count}", status.to_string())?;
            }
            writeln!(out, "{:<12} {total}", "total")?;
        }
        CommonAction::Export(args) => export(store, &args, out)?,
        CommonAction::Repair => match store.repair()? {
            Some(aside) => writeln!(
                out,
                "{} store was corrupt; moved it to {}",
                R::KIND,
                aside.display()
            )?,
            None => writeln!(out, "{} store is healthy", R::KIND)?,
        },
    }
    Ok(())
}

fn export<R: Tabular>(store: &impl Store<R>, args: &ExportArgs, out: &mut impl Write) -> Result<()> {
    let format: ExportFormat = args.format.parse()?;
    let records = filtered(store, &list_filter(&args.filter)?)?;
    let table = export_table(&records);

    match &args.output {
        Some(path) => {
            let artifact = write_export(path, &table, format)?;
            writeln!(
                out,
                "wrote {} {} rows to {} ({} bytes, sha256 {})",
                artifact.rows,
                artifact.format,
                artifact.path.display(),
                artifact.bytes,
                artifact.sha256
            )?;
        }
        None if format.is_binary() => {
            return Err(DomainError::validation(format!("{format} export requires --output")).into());
        }
        None => out.write_all(&encode(&table, format)?)?,
    }
    Ok(())
}

fn mark_scraped(
    store: &impl Store<Channel>,
    id: u64,
    session: &Session,
    out: &mut impl Write,
) -> Result<()> {
    let stamp = session.now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let handle = store.write(|set| {
        set.update_field(id, "last_scraped_at", &stamp, session.now)
            .map(|c| c.handle.clone())
    })?;
    writeln!(out, "channel #{id} @{handle} scraped at {stamp}")?;
    Ok(())
}

fn show_next_task(store: &impl Store<Task>, out: &mut impl Write) -> Result<()> {
    match store.read(|set| next_task(set.records()).cloned())? {
        Some(task) => writeln!(
            out,
            "#{} {} (roi {:.1}, priority {}, status {})",
            task.id,
            task.title,
            task.roi_score(),
            task.priority,
            task.status
        )?,
        None => writeln!(out, "no open tasks")?,
    }
    Ok(())
}

fn ingest(path: &Path, follow_up: bool, session: &Session, out: &mut impl Write) -> Result<()> {
    let source = JsonBundleSource::new(path);
    let bundle = source
        .load()
        .with_context(|| format!("loading ingest bundle {}", source.describe()))?;

    let opportunities = session.store::<Opportunity>();
    let prospects = session.store::<Prospect>();
    let channels = session.store::<Channel>();
    let tasks = session.store::<Task>();
    let targets = IngestTargets {
        opportunities: &opportunities,
        prospects: &prospects,
        channels: &channels,
        tasks: &tasks,
    };
    let options = IngestOptions {
        follow_up_tasks: follow_up && session.config.follow_up_tasks,
    };
    let summary = ingest_bundle(&targets, bundle, options, session.now)?;

    writeln!(out, "ingested bundle from {}", summary.source_id)?;
    for (label, counts) in [
        ("opportunities", summary.opportunities),
        ("prospects", summary.prospects),
        ("channels", summary.channels),
        ("follow-up tasks", summary.follow_up_tasks),
    ] {
        writeln!(
            out,
            "  {label:<16} created {} updated {} rejected {}",
            counts.created, counts.updated, counts.rejected
        )?;
    }
    Ok(())
}

fn digest(output: Option<&Path>, session: &Session, out: &mut impl Write) -> Result<()> {
    let opportunities = session.store::<Opportunity>().read(|set| set.records().to_vec())?;
    let prospects = session.store::<Prospect>().read(|set| set.records().to_vec())?;
    let channels = session.store::<Channel>().read(|set| set.records().to_vec())?;
    let tasks = session.store::<Task>().read(|set| set.records().to_vec())?;

    let text = render_digest(&DigestInput {
        opportunities: &opportunities,
        prospects: &prospects,
        channels: &channels,
        tasks: &tasks,
        generated_at: session.now,
    });
    match output {
        Some(path) => {
            write_atomic(path, text.as_bytes())
                .with_context(|| format!("writing digest {}", path.display()))?;
            writeln!(out, "wrote digest to {}", path.display())?;
        }
        None => out.write_all(text.as_bytes())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use optrack_core::{Category, OpportunityStatus};
    use optrack_storage::{MemoryStore, StoreError};

    fn session() -> Session {
        Session::new(
            TrackerConfig::default(),
            Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    fn tokyo() -> OpportunityDraft {
        OpportunityDraft {
            name: "ETHGlobal Tokyo".into(),
            url: Some("https://ethglobal.com".into()),
            category: Some(Category::Hackathon),
            priority: Some(Priority::High),
            ..Default::default()
        }
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).expect("utf8 output")
    }

    #[test]
    fn add_status_export_scenario() {
        let store = MemoryStore::<Opportunity>::new();
        let session = session();
        let mut out = Vec::new();

        add(&store, tokyo(), &session, &mut out).unwrap();
        add(&store, tokyo(), &session, &mut out).unwrap();
        run_common(
            &store,
            CommonAction::Status {
                id: 1,
                status: "Submitted".into(),
            },
            &session,
            &mut out,
        )
        .unwrap();
        let log = text(out);
        assert!(log.contains("created opportunity #1 ETHGlobal Tokyo"));
        assert!(log.contains("updated opportunity #1 ETHGlobal Tokyo"));
        assert!(log.contains("opportunity #1 is now submitted"));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot().records()[0].status, OpportunityStatus::Submitted);

        let mut out = Vec::new();
        let args = ExportArgs {
            filter: ListArgs::default(),
            format: "tsv".into(),
            output: None,
        };
        run_common(&store, CommonAction::Export(args), &session, &mut out).unwrap();
        let tsv = text(out);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1\tETHGlobal Tokyo\thackathon\thigh\tsubmitted\t"));
    }

    #[test]
    fn near_duplicates_are_reported_on_create() {
        let store = MemoryStore::<Opportunity>::new();
        let session = session();
        add(&store, tokyo(), &session, &mut io::sink()).unwrap();

        let mut out = Vec::new();
        let draft = OpportunityDraft {
            name: "ETHGlobal  Tokyo".into(),
            url: Some("https://ethglobal.com/tokyo".into()),
            ..Default::default()
        };
        add(&store, draft, &session, &mut out).unwrap();
        let log = text(out);
        assert!(log.contains("created opportunity #2"));
        assert!(log.contains("possible duplicate: opportunity #1 ETHGlobal Tokyo"));
    }

    #[test]
    fn empty_name_is_rejected_before_the_store() {
        let store = MemoryStore::<Opportunity>::new();
        let err = add(
            &store,
            OpportunityDraft::default(),
            &session(),
            &mut io::sink(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<DomainError>().is_some());
        assert_eq!(store.snapshot().next_id(), 1);
    }

    #[test]
    fn failures_carry_typed_errors() {
        let store = MemoryStore::<Opportunity>::new();
        let session = session();
        add(&store, tokyo(), &session, &mut io::sink()).unwrap();

        let err = run_common(
            &store,
            CommonAction::Status {
                id: 1,
                status: "archived".into(),
            },
            &session,
            &mut io::sink(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Domain(e)) if e.is_invalid_status()
        ));

        let err = run_common(&store, CommonAction::Show { id: 9 }, &session, &mut io::sink())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { id: 9, .. })
        ));

        let args = ExportArgs {
            filter: ListArgs::default(),
            format: "parquet".into(),
            output: None,
        };
        let err = run_common(&store, CommonAction::Export(args), &session, &mut io::sink())
            .unwrap_err();
        assert!(err.downcast_ref::<DomainError>().is_some());
    }

    #[test]
    fn update_summary_and_delete() {
        let store = MemoryStore::<Task>::new();
        let session = session();
        let draft = TaskDraft {
            title: "Submit grant report".into(),
            ..Default::default()
        };
        add(&store, draft, &session, &mut io::sink()).unwrap();

        let mut out = Vec::new();
        run_common(
            &store,
            CommonAction::Update {
                id: 1,
                field: "impact".into(),
                value: "9".into(),
            },
            &session,
            &mut out,
        )
        .unwrap();
        run_common(&store, CommonAction::Summary, &session, &mut out).unwrap();
        show_next_task(&store, &mut out).unwrap();
        run_common(&store, CommonAction::Delete { id: 1 }, &session, &mut out).unwrap();
        show_next_task(&store, &mut out).unwrap();

        let log = text(out);
        assert!(log.contains("updated task #1 Submit grant report: impact"));
        assert!(log.contains("todo         1"));
        assert!(log.contains("total        1"));
        assert!(log.contains("#1 Submit grant report (roi 9.0, priority medium, status todo)"));
        assert!(log.contains("deleted task #1 Submit grant report"));
        assert!(log.ends_with("no open tasks\n"));
    }

    #[test]
    fn scraped_channels_get_a_timestamp() {
        let store = MemoryStore::<Channel>::new();
        let session = session();
        let draft = ChannelDraft {
            handle: "https://t.me/web3jobs/".into(),
            category: None,
        };
        add(&store, draft, &session, &mut io::sink()).unwrap();

        let mut out = Vec::new();
        mark_scraped(&store, 1, &session, &mut out).unwrap();
        assert_eq!(
            text(out),
            "channel #1 @web3jobs scraped at 2026-05-01T12:00:00Z\n"
        );
        assert_eq!(
            store.snapshot().records()[0].last_scraped_at,
            Some(session.now)
        );
    }
}
