use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use optrack_core::{Channel, Opportunity, Pipeline, Priority, Prospect, Record, Task};

use crate::query::{next_task, sort_for_listing, summary};

const TOP_ITEMS: usize = 5;

/// Snapshot of every store, taken by the caller.
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    pub opportunities: &'a [Opportunity],
    pub prospects: &'a [Prospect],
    pub channels: &'a [Channel],
    pub tasks: &'a [Task],
    pub generated_at: DateTime<Utc>,
}

fn push_counts<R: Record>(out: &mut String, title: &str, records: &[R]) {
    let counts = summary(records)
        .into_iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "- {title} ({}): {counts}", records.len());
}

fn push_top_open<R: Record>(out: &mut String, title: &str, records: &[R]) {
    let mut open: Vec<&R> = records
        .iter()
        .filter(|r| !r.status().is_terminal() && r.priority() == Some(Priority::High))
        .collect();
    sort_for_listing(&mut open);

    let _ = writeln!(out, "\n## {title}\n");
    if open.is_empty() {
        out.push_str("- none\n");
        return;
    }
    for record in open.iter().take(TOP_ITEMS) {
        let _ = writeln!(
            out,
            "- #{} {} ({})",
            record.id(),
            record.display_name(),
            record.status()
        );
    }
    if open.len() > TOP_ITEMS {
        let _ = writeln!(out, "- … and {} more", open.len() - TOP_ITEMS);
    }
}

/// Markdown brief: status counts per kind, open high-priority items, channels
/// that were never scraped and the next task worth doing.
pub fn render_digest(input: &DigestInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Opportunity Tracker Digest\n");
    let _ = writeln!(
        out,
        "- Generated: {}\n",
        input.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    out.push_str("## Status Counts\n\n");
    push_counts(&mut out, "Opportunities", input.opportunities);
    push_counts(&mut out, "Prospects", input.prospects);
    push_counts(&mut out, "Channels", input.channels);
    push_counts(&mut out, "Tasks", input.tasks);

    push_top_open(&mut out, "High-Priority Opportunities", input.opportunities);
    push_top_open(&mut out, "High-Priority Prospects", input.prospects);

    let unscraped: Vec<&str> = input
        .channels
        .iter()
        .filter(|c| c.active && c.last_scraped_at.is_none())
        .map(|c| c.handle.as_str())
        .collect();
    out.push_str("\n## Channels Never Scraped\n\n");
    if unscraped.is_empty() {
        out.push_str("- none\n");
    } else {
        for handle in unscraped {
            let _ = writeln!(out, "- @{handle}");
        }
    }

    out.push_str("\n## Next Task\n\n");
    match next_task(input.tasks) {
        Some(task) => {
            let _ = writeln!(
                out,
                "- #{} {} (roi {:.1}, {})",
                task.id,
                task.title,
                task.roi_score(),
                task.priority
            );
        }
        None => out.push_str("- none\n"),
    }
    out
}
