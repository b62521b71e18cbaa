use serde::{Deserialize, Serialize};

/// A league from the static catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct League {
    pub id: String,
    pub display_name: String,
}

/// Normalized match as consumed by the sync engine and renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: i64,
    pub kickoff_epoch_seconds: i64,
    pub status: MatchStatus,
    pub league: League,
    pub home_team: TeamLine,
    pub away_team: TeamLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatus {
    /// Provider short code: NS, 1H, HT, 2H, ET, FT, AET, PEN, ...
    pub code: String,
    pub elapsed_minutes: Option<u32>,
}

impl MatchStatus {
    pub fn is_live(&self) -> bool {
        matches!(self.code.as_str(), "1H" | "2H" | "ET")
    }

    pub fn is_half_time(&self) -> bool {
        self.code == "HT"
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.code.as_str(), "FT" | "AET" | "PEN")
    }

    /// Statuses for which no score is shown.
    pub fn is_scoreless(&self) -> bool {
        matches!(
            self.code.as_str(),
            "NS" | "TBD" | "PST" | "CANC" | "ABD" | "AWD"
        )
    }

    pub fn went_to_penalties(&self) -> bool {
        self.code == "PEN"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Undetermined,
}

impl Outcome {
    pub fn from_provider(winner: Option<bool>) -> Self {
        match winner {
            Some(true) => Self::Win,
            Some(false) => Self::Loss,
            None => Self::Undetermined,
        }
    }
}

/// One side of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLine {
    pub team_id: i64,
    pub name: String,
    pub score: u32,
    pub penalty_score: u32,
    pub outcome: Outcome,
    pub events: Vec<MatchEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub team_id: i64,
    pub minute_label: String,
    pub kind: EventKind,
    pub player_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Goal,
    OwnGoal,
    PenaltyGoal,
    MissedPenalty,
    Yellow,
    Red,
    /// A card whose colour the provider did not report.
    Card,
}

impl EventKind {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Goal => "⚽",
            Self::OwnGoal => "⚽(OG)",
            Self::PenaltyGoal => "⚽(PEN)",
            Self::MissedPenalty => "❌",
            Self::Yellow => "🟨",
            Self::Red | Self::Card => "🟥",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingRow {
    pub rank: u32,
    pub team_name: String,
    pub points: i32,
    pub played: u32,
    pub win: u32,
    pub draw: u32,
    pub lose: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub goals_diff: i32,
    pub form: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsTable {
    pub league_id: String,
    pub league_name: String,
    /// Ordered by rank.
    pub rows: Vec<StandingRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_tri_state() {
        assert_eq!(Outcome::from_provider(Some(true)), Outcome::Win);
        assert_eq!(Outcome::from_provider(Some(false)), Outcome::Loss);
        assert_eq!(Outcome::from_provider(None), Outcome::Undetermined);
    }

    #[test]
    fn test_status_classes() {
        let status = |code: &str| MatchStatus {
            code: code.to_string(),
            elapsed_minutes: None,
        };
        assert!(status("2H").is_live());
        assert!(status("HT").is_half_time());
        assert!(status("AET").is_finished());
        assert!(status("PST").is_scoreless());
        assert!(!status("FT").is_scoreless());
        assert!(status("PEN").went_to_penalties());
    }
}
