use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{AuthorSummary, CoachStats, ReflectionEntry, TeamOutlook};
use crate::store::{collections, Filter, Store};

/// Coach-facing label for a stored sentiment value.
pub fn sentiment_label(sentiment: &str) -> &str {
    match sentiment {
        "Positive" => "Thriving",
        "Neutral" => "Stable",
        "Red Flag" => "Needs Support",
        other => other,
    }
}

pub async fn leaderboard(store: &dyn Store) -> Result<Vec<CoachStats>> {
    let docs = store.list(collections::COACH_STATS, &Filter::none()).await?;

    let mut rankings: Vec<CoachStats> = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.parse::<CoachStats>() {
            Ok(stats) => rankings.push(stats),
            Err(err) => {
                tracing::warn!(coach = %doc.id, error = %err, "skipping malformed stats doc");
            }
        }
    }
    rankings.sort_by(|a, b| {
        b.average_score
            .partial_cmp(&a.average_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(rankings)
}

/// The coach dashboard as text: outlook header plus one line per athlete,
/// most concerning first.
pub fn render_dashboard(outlook: &TeamOutlook, summaries: &[AuthorSummary]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Overall Team Outlook");
    let _ = writeln!(
        output,
        "{} (Avg: {:.2})",
        outlook.summary, outlook.average_score
    );
    let _ = writeln!(
        output,
        "Thriving: {} | Stable: {} | Needs Support: {}",
        outlook.thriving, outlook.stable, outlook.needs_support
    );

    let mut sorted = summaries.to_vec();
    sorted.sort_by(|a, b| {
        a.average_score
            .partial_cmp(&b.average_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for summary in &sorted {
        let _ = writeln!(
            output,
            "- {}: score {:.1} ({})",
            summary.display_name,
            summary.average_score,
            sentiment_label(&summary.sentiment)
        );
    }

    output
}

pub fn build_report(
    team_id: &str,
    generated_at: DateTime<Utc>,
    outlook: &TeamOutlook,
    summaries: &[AuthorSummary],
    rankings: &[CoachStats],
    recent: &[ReflectionEntry],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Team Reflection Report");
    let _ = writeln!(
        output,
        "Generated for team {} on {}",
        team_id,
        generated_at.date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Team Outlook");
    let _ = writeln!(
        output,
        "{} (Avg: {:.2})",
        outlook.summary, outlook.average_score
    );
    let _ = writeln!(
        output,
        "Thriving: {} | Stable: {} | Needs Support: {}",
        outlook.thriving, outlook.stable, outlook.needs_support
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Athlete Summaries");

    if summaries.is_empty() {
        let _ = writeln!(output, "No reflections recorded for this team yet.");
    } else {
        let mut sorted = summaries.to_vec();
        sorted.sort_by(|a, b| {
            a.average_score
                .partial_cmp(&b.average_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for summary in &sorted {
            let _ = writeln!(
                output,
                "- {}: avg score {:.1} ({})",
                summary.display_name,
                summary.average_score,
                sentiment_label(&summary.sentiment)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Coach Leaderboard");

    if rankings.is_empty() {
        let _ = writeln!(output, "No evaluated simulations yet.");
    } else {
        for (rank, stats) in rankings.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {}: avg {:.2} across {} sessions",
                rank + 1,
                stats.name,
                stats.average_score,
                stats.total_sessions
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Reflections");

    if recent.is_empty() {
        let _ = writeln!(output, "No reflections recorded for this team yet.");
    } else {
        let mut latest = recent.to_vec();
        latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        for entry in latest.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}: score {:.1}",
                entry.display_name,
                sentiment_label(&entry.sentiment),
                entry.timestamp.date_naive(),
                entry.score
            );
        }
    }

    output
}
