//! Notification rendering.
//!
//! Pure functions from matches and standings to chat payloads. Output only
//! depends on the input, so re-rendering unchanged data is a no-op edit.

pub mod locale;

pub use locale::Locale;

use crate::chat::{Payload, PayloadField};
use crate::football::models::{MatchRecord, Outcome, StandingRow, StandingsTable, TeamLine};

pub const MATCHES_COLOR: u32 = 0x0099ff;
pub const STANDINGS_COLOR: u32 = 0x1f8b4c;

const SEPARATOR: &str = "⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯⎯";

/// One payload for a chunk of matches from the same league.
pub fn render_matches(league_name: &str, chunk: &[MatchRecord], locale: Locale) -> Payload {
    let mut fields = Vec::with_capacity(chunk.len() * 4);
    for record in chunk {
        fields.extend(match_fields(record, locale));
    }

    Payload {
        title: locale.planning(league_name),
        color: MATCHES_COLOR,
        fields,
        footer: Some(locale.last_update().to_string()),
    }
}

pub fn render_standings(table: &StandingsTable, title: &str, locale: Locale) -> Payload {
    Payload {
        title: format!("🏆 {title}"),
        color: STANDINGS_COLOR,
        fields: table
            .rows
            .iter()
            .map(|row| PayloadField {
                name: format!("**{}**. **{}**", row.rank, row.team_name),
                value: standing_line(row, locale),
                inline: false,
            })
            .collect(),
        footer: Some(locale.last_update().to_string()),
    }
}

pub fn status_line(record: &MatchRecord, locale: Locale) -> String {
    let status = &record.status;
    let ts = record.kickoff_epoch_seconds;
    if status.is_live() {
        let minute = status
            .elapsed_minutes
            .map(|m| m.to_string())
            .unwrap_or_default();
        format!("🔴 **{}** | {minute}\"", locale.live())
    } else if status.is_half_time() {
        format!("⏸️ **{}**", locale.half_time())
    } else if status.is_finished() {
        format!("🏁 **{}** <t:{ts}:F> (<t:{ts}:R>)", locale.finished())
    } else {
        format!("▶️ **{}**: <t:{ts}:F> (<t:{ts}:R>)", locale.kick_off())
    }
}

pub fn score_line(record: &MatchRecord) -> String {
    if record.status.is_scoreless() {
        return "**VS**".to_string();
    }
    let mut line = format!("**{} - {}**", record.home_team.score, record.away_team.score);
    if record.status.went_to_penalties() {
        line.push_str(&format!(
            "\n\nPEN\n {} - {}",
            record.home_team.penalty_score, record.away_team.penalty_score
        ));
    }
    line
}

fn match_fields(record: &MatchRecord, locale: Locale) -> [PayloadField; 4] {
    let penalties = record.status.went_to_penalties();
    [
        PayloadField {
            name: SEPARATOR.to_string(),
            value: status_line(record, locale),
            inline: false,
        },
        PayloadField {
            name: "\n".to_string(),
            value: team_column(&record.home_team, penalties),
            inline: true,
        },
        PayloadField {
            name: "\n".to_string(),
            value: score_line(record),
            inline: true,
        },
        PayloadField {
            name: "\n".to_string(),
            value: team_column(&record.away_team, penalties),
            inline: true,
        },
    ]
}

fn team_column(team: &TeamLine, penalties: bool) -> String {
    let marker = match team.outcome {
        Outcome::Win => " ✅ ",
        Outcome::Loss => " ❌ ",
        Outcome::Undetermined => "",
    };
    let shootout = if penalties {
        "⚽".repeat(team.penalty_score as usize)
    } else {
        String::new()
    };
    let events = team
        .events
        .iter()
        .map(|e| format!("{} {} {}'", e.kind.symbol(), e.player_name, e.minute_label))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{}{marker}\n\n{shootout}\n\n{events}", team.name)
        .trim_end()
        .to_string()
}

fn standing_line(row: &StandingRow, locale: Locale) -> String {
    let [points, played, wdl, goals, form] = locale.standings_labels();
    let diff = if row.goals_diff > 0 {
        format!("+{}", row.goals_diff)
    } else {
        row.goals_diff.to_string()
    };
    let form_symbols = match row.form.as_deref() {
        Some(f) if !f.is_empty() => form_to_symbols(f),
        _ => "N/A".to_string(),
    };
    format!(
        "{points}: **{}** | {played}: {} | {wdl}: {}/{}/{} | {goals}: {}:{} ({diff}) | {form}: {form_symbols}",
        row.points, row.played, row.win, row.draw, row.lose, row.goals_for, row.goals_against
    )
}

pub fn form_to_symbols(form: &str) -> String {
    form.chars()
        .map(|c| match c {
            'W' => "✅".to_string(),
            'D' => "⭕".to_string(),
            'L' => "❌".to_string(),
            other => other.to_string(),
        })
        .collect()
}
