//! Fixture enrichment.
//!
//! Merges raw fixtures with their goal and card events and produces
//! normalized [`MatchRecord`]s. Enrichment is total: every fixture yields
//! exactly one record, with empty event lists when events are unavailable.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, instrument};

use crate::football::api::{FootballProvider, RawEvent, RawFixture, RawTeam};
use crate::football::leagues;
use crate::football::models::{
    EventKind, League, MatchEvent, MatchRecord, MatchStatus, Outcome, TeamLine,
};
use crate::pipeline::batcher::run_batched;

#[derive(Debug, Clone, Copy)]
pub struct EnrichSettings {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            inter_batch_delay: Duration::from_secs(1),
        }
    }
}

pub struct MatchEnricher<'a> {
    provider: &'a dyn FootballProvider,
    settings: EnrichSettings,
}

impl<'a> MatchEnricher<'a> {
    pub fn new(provider: &'a dyn FootballProvider, settings: EnrichSettings) -> Self {
        Self { provider, settings }
    }

    #[instrument(skip(self, fixtures), fields(fixtures = fixtures.len()))]
    pub async fn enrich(&self, fixtures: Vec<RawFixture>) -> Vec<MatchRecord> {
        // Only started or finished fixtures have events worth fetching.
        let started: Vec<i64> = fixtures
            .iter()
            .filter(|f| f.fixture.status.elapsed.is_some())
            .map(|f| f.fixture.id)
            .collect();

        let events: HashMap<i64, Vec<MatchEvent>> = if started.is_empty() {
            HashMap::new()
        } else {
            let provider = self.provider;
            let report = run_batched(
                started,
                self.settings.batch_size,
                self.settings.inter_batch_delay,
                |fixture_id| async move { provider.fixture_events(fixture_id).await },
            )
            .await;

            info!(
                fetched = report.results.len(),
                failed = report.failed_count(),
                batches = report.batches,
                "Fixture events fetched"
            );

            report
                .results
                .into_iter()
                .map(|(id, raw)| (id, raw.iter().filter_map(classify_event).collect()))
                .collect()
        };

        fixtures
            .into_iter()
            .map(|fixture| {
                let fixture_events = events.get(&fixture.fixture.id).cloned().unwrap_or_default();
                to_match_record(fixture, fixture_events)
            })
            .collect()
    }
}

/// Keep goal and card events and map them to a display kind.
pub fn classify_event(raw: &RawEvent) -> Option<MatchEvent> {
    let kind = match raw.kind.as_str() {
        "Goal" => match raw.detail.as_str() {
            "Missed Penalty" => EventKind::MissedPenalty,
            "Own Goal" => EventKind::OwnGoal,
            "Penalty" => EventKind::PenaltyGoal,
            _ => EventKind::Goal,
        },
        "Card" => match raw.detail.as_str() {
            "Yellow Card" => EventKind::Yellow,
            "Red Card" | "Second Yellow card" => EventKind::Red,
            _ => EventKind::Card,
        },
        _ => return None,
    };

    Some(MatchEvent {
        team_id: raw.team.id?,
        minute_label: minute_label(raw.time.elapsed, raw.time.extra),
        kind,
        player_name: raw.player.name.clone().unwrap_or_default(),
    })
}

pub fn minute_label(elapsed: Option<u32>, extra: Option<u32>) -> String {
    let base = elapsed.map(|m| m.to_string()).unwrap_or_default();
    match extra {
        Some(extra) if extra > 0 => format!("{base}+{extra}"),
        _ => base,
    }
}

fn to_match_record(fixture: RawFixture, events: Vec<MatchEvent>) -> MatchRecord {
    let home_id = fixture.teams.home.id;
    let away_id = fixture.teams.away.id;

    let mut home = team_line(&fixture.teams.home, fixture.goals.home, fixture.score.penalty.home);
    let mut away = team_line(&fixture.teams.away, fixture.goals.away, fixture.score.penalty.away);

    // Events matching neither side are dropped.
    for event in events {
        if event.team_id == home_id {
            home.events.push(event);
        } else if event.team_id == away_id {
            away.events.push(event);
        }
    }

    let league_id = fixture.league.id.to_string();
    let display_name = leagues::display_name(&league_id)
        .map(str::to_string)
        .unwrap_or(fixture.league.name);

    MatchRecord {
        id: fixture.fixture.id,
        kickoff_epoch_seconds: fixture.fixture.timestamp,
        status: MatchStatus {
            code: fixture.fixture.status.short,
            elapsed_minutes: fixture.fixture.status.elapsed,
        },
        league: League {
            id: league_id,
            display_name,
        },
        home_team: home,
        away_team: away,
    }
}

fn team_line(team: &RawTeam, goals: Option<u32>, penalties: Option<u32>) -> TeamLine {
    TeamLine {
        team_id: team.id,
        name: team.name.clone(),
        score: goals.unwrap_or(0),
        penalty_score: penalties.unwrap_or(0),
        outcome: Outcome::from_provider(team.winner),
        events: Vec::new(),
    }
}
