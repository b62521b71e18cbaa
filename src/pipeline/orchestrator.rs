//! Per-league fetch orchestration and the process-scoped match cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::{info, instrument, warn};

use crate::football::api::{to_standings_table, FootballProvider};
use crate::football::models::{League, MatchRecord, StandingsTable};
use crate::pipeline::enricher::{EnrichSettings, MatchEnricher};

/// Matches keyed by league id.
///
/// Owned by [`WeeklyFetchOrchestrator`]; cleared and repopulated once per
/// daily priming cycle and read by the live-window check on every tick.
#[derive(Debug, Default)]
pub struct MatchCache {
    by_league: HashMap<String, Vec<MatchRecord>>,
    /// Leagues requested by the last priming, including those without matches.
    primed_for: BTreeSet<String>,
}

impl MatchCache {
    pub fn set(&mut self, league_id: &str, matches: Vec<MatchRecord>) {
        self.by_league.insert(league_id.to_string(), matches);
    }

    pub fn get(&self, league_id: &str) -> Option<&[MatchRecord]> {
        self.by_league.get(league_id).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.by_league.clear();
        self.primed_for.clear();
    }

    pub fn primed_for(&self) -> &BTreeSet<String> {
        &self.primed_for
    }

    pub fn all_matches(&self) -> Vec<&MatchRecord> {
        self.by_league.values().flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_league.values().all(Vec::is_empty)
    }

    pub fn league_count(&self) -> usize {
        self.by_league.len()
    }
}

pub struct WeeklyFetchOrchestrator {
    provider: Arc<dyn FootballProvider>,
    settings: EnrichSettings,
    season: Option<i32>,
    cache: MatchCache,
}

impl WeeklyFetchOrchestrator {
    pub fn new(
        provider: Arc<dyn FootballProvider>,
        settings: EnrichSettings,
        season: Option<i32>,
    ) -> Self {
        Self {
            provider,
            settings,
            season,
            cache: MatchCache::default(),
        }
    }

    fn season_for(&self, date: NaiveDate) -> i32 {
        self.season.unwrap_or_else(|| date.year())
    }

    /// Fetch and enrich matches for every distinct league in `leagues`.
    ///
    /// Leagues whose fetch fails or yields no matches are absent from the map.
    #[instrument(skip(self, leagues))]
    pub async fn fetch_for_leagues<'a, I>(
        &self,
        leagues: I,
        from: NaiveDate,
        to: NaiveDate,
    ) -> HashMap<String, Vec<MatchRecord>>
    where
        I: IntoIterator<Item = &'a League>,
    {
        let unique: BTreeMap<&str, &League> =
            leagues.into_iter().map(|l| (l.id.as_str(), l)).collect();
        let season = self.season_for(from);
        let enricher = MatchEnricher::new(self.provider.as_ref(), self.settings);

        let mut by_league = HashMap::new();
        for (league_id, league) in unique {
            let fixtures = match self.provider.fixtures(league_id, season, from, to).await {
                Ok(fixtures) => fixtures,
                Err(e) => {
                    warn!(league_id, error = %e, "Fixture fetch failed, skipping league");
                    continue;
                }
            };

            if fixtures.is_empty() {
                continue;
            }

            let matches = enricher.enrich(fixtures).await;
            info!(
                league_id,
                league = %league.display_name,
                matches = matches.len(),
                "League matches fetched"
            );
            by_league.insert(league_id.to_string(), matches);
        }

        by_league
    }

    /// Current standings for a league, or `None` when unavailable.
    pub async fn standings(&self, league_id: &str, today: NaiveDate) -> Option<StandingsTable> {
        match self.provider.standings(league_id, self.season_for(today)).await {
            Ok(raw) => to_standings_table(&raw),
            Err(e) => {
                warn!(league_id, error = %e, "Standings fetch failed");
                None
            }
        }
    }

    /// Reset the cache and fill it with the given day's matches.
    pub async fn prime<'a, I>(&mut self, leagues: I, day: NaiveDate)
    where
        I: IntoIterator<Item = &'a League>,
    {
        let leagues: Vec<&League> = leagues.into_iter().collect();
        let fetched = self.fetch_for_leagues(leagues.iter().copied(), day, day).await;
        self.cache.clear();
        self.cache.primed_for = leagues.iter().map(|l| l.id.clone()).collect();
        for (league_id, matches) in fetched {
            self.cache.set(&league_id, matches);
        }
        info!(
            leagues = self.cache.league_count(),
            matches = self.cache.all_matches().len(),
            "Match cache primed"
        );
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut MatchCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::enricher::tests::{raw_fixture, CannedProvider};
    use std::time::Duration;

    fn league(id: &str) -> League {
        League {
            id: id.to_string(),
            display_name: format!("League {id}"),
        }
    }

    fn orchestrator(provider: Arc<CannedProvider>) -> WeeklyFetchOrchestrator {
        WeeklyFetchOrchestrator::new(
            provider,
            EnrichSettings {
                batch_size: 5,
                inter_batch_delay: Duration::ZERO,
            },
            Some(2024),
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn test_dedupes_and_omits_empty_leagues() {
        let provider = Arc::new(CannedProvider {
            fixtures: HashMap::from([
                ("39".to_string(), vec![raw_fixture(1, 39, None), raw_fixture(2, 39, None)]),
                ("61".to_string(), Vec::new()),
            ]),
            ..Default::default()
        });
        let orch = orchestrator(provider.clone());

        let leagues = [league("39"), league("61"), league("39")];
        let result = orch.fetch_for_leagues(&leagues, day(13), day(19)).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result["39"].len(), 2);
        assert!(!result.contains_key("61"));

        let calls = provider.fixture_calls.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|c| *c == "39").count(), 1);
    }

    #[tokio::test]
    async fn test_prime_replaces_cache_contents() {
        let provider = Arc::new(CannedProvider {
            fixtures: HashMap::from([("39".to_string(), vec![raw_fixture(1, 39, None)])]),
            ..Default::default()
        });
        let mut orch = orchestrator(provider);
        orch.cache_mut().set("140", Vec::new());

        orch.prime(&[league("39")], day(14)).await;

        assert!(orch.cache().get("140").is_none());
        assert_eq!(orch.cache().get("39").map(<[MatchRecord]>::len), Some(1));
        assert!(!orch.cache().is_empty());

        // Leagues without matches today still count as primed.
        orch.prime(&[league("39"), league("61")], day(14)).await;
        assert_eq!(
            orch.cache().primed_for().iter().collect::<Vec<_>>(),
            vec!["39", "61"]
        );
        assert!(orch.cache().get("61").is_none());
    }

    #[test]
    fn test_cache_clear() {
        let mut cache = MatchCache::default();
        cache.set("39", Vec::new());
        assert!(cache.is_empty());
        cache.clear();
        assert_eq!(cache.league_count(), 0);
    }
}
