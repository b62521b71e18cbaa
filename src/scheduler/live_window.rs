use crate::football::models::MatchRecord;

/// Seconds after kickoff during which a match may still change (2h21m).
pub const LIVE_WINDOW_SECONDS: i64 = 8460;

pub fn is_live_windowed(now_epoch: i64, kickoff_epoch: i64, window_seconds: i64) -> bool {
    now_epoch >= kickoff_epoch && now_epoch < kickoff_epoch + window_seconds
}

/// True iff at least one tracked match is inside its live window.
pub fn should_sync<'a, I>(now_epoch: i64, tracked: I, window_seconds: i64) -> bool
where
    I: IntoIterator<Item = &'a MatchRecord>,
{
    tracked
        .into_iter()
        .any(|m| is_live_windowed(now_epoch, m.kickoff_epoch_seconds, window_seconds))
}
