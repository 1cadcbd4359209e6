use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{AuthorSummary, OutlookBucket, ReflectionEntry, TeamOutlook};
use crate::store::Document;

const DEFAULT_SCORE: f64 = 5.0;
const DEFAULT_SENTIMENT: &str = "Neutral";

const SUMMARY_THRIVING: &str = "Team is thriving today!";
const SUMMARY_STABLE: &str = "Team is mostly stable.";
const SUMMARY_MIXED: &str = "Team outlook is mixed.";
const SUMMARY_CONCERN: &str = "Team needs support. Some concern.";
const SUMMARY_CRITICAL: &str = "Team outlook is critical. Most athletes need attention.";

/// Raw stored shape before validation; every field optional so a malformed
/// document is defaulted rather than dropped.
#[derive(Debug, Default, Deserialize)]
struct RawReflection {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    athlete: Option<String>,
    name: Option<String>,
    sentiment: Option<String>,
    score: Option<f64>,
    #[serde(default)]
    anonymous: bool,
    timestamp: Option<DateTime<Utc>>,
}

/// Resolve each document of one snapshot into a typed, fully defaulted
/// entry. Anonymous authors get a sequential "Anonymous N" alias in
/// first-seen order; the alias memo lives and dies with this call, so
/// aliases are stable within a snapshot and nowhere else.
pub fn normalize(snapshot: &[Document]) -> Vec<ReflectionEntry> {
    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut next_alias = 1usize;

    snapshot
        .iter()
        .map(|doc| {
            let raw: RawReflection =
                serde_json::from_value(doc.data.clone()).unwrap_or_default();

            let author_id = raw
                .user_id
                .clone()
                .or_else(|| raw.athlete.clone())
                .unwrap_or_else(|| "unknown".to_string());

            let mut display_name = raw
                .name
                .clone()
                .or_else(|| raw.athlete.clone())
                .unwrap_or_else(|| author_id.clone());

            if raw.anonymous {
                let alias = aliases.entry(author_id.clone()).or_insert_with(|| {
                    let alias = format!("Anonymous {next_alias}");
                    next_alias += 1;
                    alias
                });
                display_name = alias.clone();
            }

            ReflectionEntry {
                author_id,
                display_name,
                sentiment: raw
                    .sentiment
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| DEFAULT_SENTIMENT.to_string()),
                score: raw.score.unwrap_or(DEFAULT_SCORE),
                timestamp: raw.timestamp.unwrap_or(DateTime::UNIX_EPOCH),
            }
        })
        .collect()
}

struct AuthorAcc {
    total: f64,
    count: usize,
    latest: ReflectionEntry,
}

/// Group entries by author and reduce each group to its mean score plus the
/// latest entry's name/sentiment/timestamp. When two entries share the
/// maximum timestamp, the one later in the snapshot wins. Output order is
/// unspecified; consumers re-sort.
pub fn summarize_authors(entries: &[ReflectionEntry]) -> Vec<AuthorSummary> {
    let mut groups: HashMap<String, AuthorAcc> = HashMap::new();

    for entry in entries {
        match groups.get_mut(&entry.author_id) {
            Some(acc) => {
                acc.total += entry.score;
                acc.count += 1;
                if entry.timestamp >= acc.latest.timestamp {
                    acc.latest = entry.clone();
                }
            }
            None => {
                groups.insert(
                    entry.author_id.clone(),
                    AuthorAcc {
                        total: entry.score,
                        count: 1,
                        latest: entry.clone(),
                    },
                );
            }
        }
    }

    groups
        .into_iter()
        .map(|(author_id, acc)| AuthorSummary {
            author_id,
            display_name: acc.latest.display_name,
            average_score: acc.total / acc.count as f64,
            sentiment: acc.latest.sentiment,
            timestamp: acc.latest.timestamp,
        })
        .collect()
}

pub fn bucket(score: f64) -> OutlookBucket {
    if score >= 8.0 {
        OutlookBucket::Thriving
    } else if score >= 5.0 {
        OutlookBucket::Stable
    } else {
        OutlookBucket::NeedsSupport
    }
}

fn summary_text(average: f64) -> &'static str {
    if average > 8.0 {
        SUMMARY_THRIVING
    } else if average > 6.0 {
        SUMMARY_STABLE
    } else if average > 4.0 {
        SUMMARY_MIXED
    } else if average > 2.0 {
        SUMMARY_CONCERN
    } else {
        SUMMARY_CRITICAL
    }
}

/// Classify every author summary into a bucket and derive the team average
/// as the unweighted mean of per-author averages, not of raw records.
pub fn team_outlook(summaries: &[AuthorSummary]) -> TeamOutlook {
    let mut thriving = 0;
    let mut stable = 0;
    let mut needs_support = 0;
    let mut total = 0.0;

    for summary in summaries {
        match bucket(summary.average_score) {
            OutlookBucket::Thriving => thriving += 1,
            OutlookBucket::Stable => stable += 1,
            OutlookBucket::NeedsSupport => needs_support += 1,
        }
        total += summary.average_score;
    }

    let average_score = if summaries.is_empty() {
        0.0
    } else {
        total / summaries.len() as f64
    };

    TeamOutlook {
        thriving,
        stable,
        needs_support,
        average_score,
        summary: summary_text(average_score),
    }
}

/// One pipeline pass over a snapshot: normalize, group, classify.
pub fn run(snapshot: &[Document]) -> (Vec<AuthorSummary>, TeamOutlook) {
    let entries = normalize(snapshot);
    let summaries = summarize_authors(&entries);
    let outlook = team_outlook(&summaries);
    (summaries, outlook)
}
