use optrack_core::{normalize_key_fragment, DomainError, Pipeline, Priority, Record, Task};
use serde::Serialize;
use strsim::jaro_winkler;

/// Predicates for `list`; every one that is set must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub text: Option<String>,
}

impl ListFilter {
    pub fn is_empty(&self) -> bool {
        self == &ListFilter::default()
    }
}

/// Matching records, highest priority first and oldest first within a priority.
///
/// A status filter outside the kind's vocabulary is an error rather than an
/// empty result.
pub fn list<'a, R: Record>(records: &'a [R], filter: &ListFilter) -> Result<Vec<&'a R>, DomainError> {
    let status = filter
        .status
        .as_deref()
        .map(<R::Status as Pipeline>::parse)
        .transpose()?;
    let category = filter.category.as_deref().map(normalize_key_fragment);
    let text = filter
        .text
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());

    let mut matches: Vec<&R> = records
        .iter()
        .filter(|r| status.map_or(true, |s| r.status() == s))
        .filter(|r| filter.priority.map_or(true, |p| r.priority() == Some(p)))
        .filter(|r| {
            category.as_deref().map_or(true, |wanted| {
                r.category().map(normalize_key_fragment).as_deref() == Some(wanted)
            })
        })
        .filter(|r| {
            text.as_deref().map_or(true, |needle| {
                r.search_text()
                    .iter()
                    .any(|haystack| haystack.to_lowercase().contains(needle))
            })
        })
        .collect();
    sort_for_listing(&mut matches);
    Ok(matches)
}

/// Stable sort, so equal priority and `created_at` keep insertion order.
pub fn sort_for_listing<R: Record>(records: &mut [&R]) {
    records.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.created_at().cmp(&b.created_at()))
    });
}

/// Count per status, in vocabulary order, zeros included.
pub fn summary<R: Record>(records: &[R]) -> Vec<(R::Status, usize)> {
    R::Status::ALL
        .iter()
        .map(|&status| {
            let count = records.iter().filter(|r| r.status() == status).count();
            (status, count)
        })
        .collect()
}

/// The open task with the best ROI; ties go to priority, then age.
pub fn next_task(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|t| !t.status.is_terminal())
        .max_by(|a, b| {
            a.roi_score()
                .total_cmp(&b.roi_score())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Names at or above this Jaro-Winkler score are reported as likely duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarRecord {
    pub id: u64,
    pub name: String,
    pub score: f64,
}

/// Other records whose display name is close to `target`'s, best match first.
///
/// Only advisory: near matches under a different natural key are separate
/// records and stay that way.
pub fn similar_records<R: Record>(records: &[R], target: &R, threshold: f64) -> Vec<SimilarRecord> {
    let wanted = normalize_key_fragment(target.display_name());
    if wanted.is_empty() {
        return Vec::new();
    }
    let mut hits: Vec<SimilarRecord> = records
        .iter()
        .filter(|r| r.id() != target.id())
        .filter_map(|r| {
            let score = jaro_winkler(&wanted, &normalize_key_fragment(r.display_name()));
            (score >= threshold).then(|| SimilarRecord {
                id: r.id(),
                name: r.display_name().to_string(),
                score,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use optrack_core::{
        Category, Opportunity, OpportunityDraft, OpportunityStatus, Prospect, ProspectDraft,
        TaskDraft, TaskStatus,
    };

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0).unwrap()
    }

    fn opp(id: u64, name: &str, priority: Priority, created: DateTime<Utc>) -> Opportunity {
        Opportunity::from_draft(
            id,
            OpportunityDraft {
                name: name.into(),
                priority: Some(priority),
                category: Some(if id % 2 == 0 { Category::Grant } else { Category::Hackathon }),
                ..Default::default()
            },
            created,
        )
    }

    #[test]
    fn listing_orders_by_priority_then_insertion() {
        let records = vec![
            opp(1, "low", Priority::Low, at(0)),
            opp(2, "high", Priority::High, at(0)),
            opp(3, "medium", Priority::Medium, at(0)),
        ];
        let names: Vec<_> = list(&records, &ListFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["high", "medium", "low"]);
    }

    #[test]
    fn older_items_come_first_within_a_priority() {
        let records = vec![
            opp(1, "newer", Priority::High, at(30)),
            opp(2, "older", Priority::High, at(5)),
            opp(3, "oldest-but-low", Priority::Low, at(0)),
        ];
        let names: Vec<_> = list(&records, &ListFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["older", "newer", "oldest-but-low"]);
    }

    #[test]
    fn filters_combine() {
        let mut records = vec![
            opp(1, "ETHGlobal Tokyo", Priority::High, at(0)),
            opp(2, "Optimism RetroPGF", Priority::High, at(1)),
            opp(3, "ETHDenver", Priority::Low, at(2)),
        ];
        records[0].apply_status(OpportunityStatus::Submitted, at(3));

        let filter = ListFilter {
            category: Some("Hackathon".into()),
            text: Some("eth".into()),
            ..Default::default()
        };
        let ids: Vec<u64> = list(&records, &filter).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, [1u64, 3]);

        let filter = ListFilter {
            status: Some("submitted".into()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        let ids: Vec<u64> = list(&records, &filter).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, [1u64]);
    }

    #[test]
    fn unknown_status_filter_is_an_error() {
        let records: Vec<Prospect> = vec![Prospect::from_draft(
            1,
            ProspectDraft {
                name: "Ana".into(),
                ..Default::default()
            },
            at(0),
        )];
        let filter = ListFilter {
            status: Some("replied".into()),
            ..Default::default()
        };
        assert!(list(&records, &filter).unwrap_err().is_invalid_status());
    }

    #[test]
    fn text_filter_searches_prospect_notes() {
        let records = vec![Prospect::from_draft(
            1,
            ProspectDraft {
                name: "Ana".into(),
                notes: Some("Met at ETHDenver".into()),
                ..Default::default()
            },
            at(0),
        )];
        let filter = ListFilter {
            text: Some("ethdenver".into()),
            ..Default::default()
        };
        assert_eq!(list(&records, &filter).unwrap().len(), 1);
    }

    #[test]
    fn summary_counts_every_status() {
        let mut records = vec![
            opp(1, "a", Priority::Low, at(0)),
            opp(2, "b", Priority::Low, at(0)),
        ];
        records[1].apply_status(OpportunityStatus::Won, at(1));
        let counts = summary(&records);
        assert_eq!(counts.len(), OpportunityStatus::ALL.len());
        assert_eq!(counts[0], (OpportunityStatus::Discovered, 1));
        assert_eq!(counts[3], (OpportunityStatus::Won, 1));
        assert_eq!(counts[4], (OpportunityStatus::Lost, 0));
    }

    #[test]
    fn next_task_skips_done_and_prefers_roi() {
        let make = |id: u64, title: &str, impact: u8, effort: u8| {
            Task::from_draft(
                id,
                TaskDraft {
                    title: title.into(),
                    impact: Some(impact),
                    urgency: Some(5),
                    effort: Some(effort),
                    ..Default::default()
                },
                at(id as u32),
            )
        };
        let mut tasks = vec![
            make(1, "big win, done", 10, 1),
            make(2, "cheap", 6, 1),
            make(3, "expensive", 9, 9),
        ];
        tasks[0].apply_status(TaskStatus::Done, at(10));
        assert_eq!(next_task(&tasks).map(|t| t.id), Some(2));

        let tie = vec![make(4, "first", 5, 5), make(5, "second", 5, 5)];
        assert_eq!(next_task(&tie).map(|t| t.id), Some(4));
        assert!(next_task(&[]).is_none());
    }

    fn named(id: u64, name: &str, url: &str) -> Opportunity {
        Opportunity::from_draft(
            id,
            OpportunityDraft {
                name: name.into(),
                url: Some(url.into()),
                ..Default::default()
            },
            Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn near_names_are_flagged_best_first() {
        let records = vec![
            named(1, "ETHGlobal Tokyo", "https://ethglobal.com"),
            named(2, "ETHGlobal  tokyo", "https://ethglobal.com/tokyo"),
            named(3, "ETHGlobal Tokyo 2026", "https://ethglobal.com/2026"),
            named(4, "Gitcoin Grants", "https://gitcoin.co"),
        ];
        let hits = similar_records(&records, &records[0], DEFAULT_SIMILARITY_THRESHOLD);
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, [2u64, 3]);
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn target_never_matches_itself() {
        let records = vec![named(1, "Solana Breakpoint", "")];
        assert!(similar_records(&records, &records[0], 0.0).is_empty());
    }
}
