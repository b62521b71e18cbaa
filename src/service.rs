//! Trigger dispatch.
//!
//! Owns the fetch orchestrator, the sync engine and the store, and runs one
//! pipeline per [`Trigger`]. Failures are contained per subscriber and per
//! league: a broken unit is logged and its siblings carry on.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::chat::MessageHandle;
use crate::db::store::{Store, SubscriberConfig};
use crate::football::models::{League, MatchRecord, StandingsTable};
use crate::monitoring::health::HealthState;
use crate::pipeline::orchestrator::WeeklyFetchOrchestrator;
use crate::scheduler::live_window::should_sync;
use crate::scheduler::triggers::Trigger;
use crate::sync::engine::{SyncEngine, SyncMode, SyncReport};
use crate::sync::week::WeekKey;

pub struct Service {
    orchestrator: WeeklyFetchOrchestrator,
    engine: SyncEngine,
    health: HealthState,
    live_window_seconds: i64,
    timezone: Tz,
}

/// Distinct leagues across all subscribers, in first-seen order.
fn union_of_leagues(subscribers: &[SubscriberConfig]) -> Vec<League> {
    let mut seen = HashSet::new();
    subscribers
        .iter()
        .flat_map(|s| s.leagues.iter())
        .filter(|l| seen.insert(l.id.clone()))
        .cloned()
        .collect()
}

impl Service {
    pub fn new(
        orchestrator: WeeklyFetchOrchestrator,
        engine: SyncEngine,
        health: HealthState,
        live_window_seconds: i64,
        timezone: Tz,
    ) -> Self {
        Self {
            orchestrator,
            engine,
            health,
            live_window_seconds,
            timezone,
        }
    }

    pub fn store(&self) -> &Store {
        self.engine.store()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> &WeeklyFetchOrchestrator {
        &self.orchestrator
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Handle triggers until every sender is dropped.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<Trigger>) {
        while let Some(trigger) = rx.recv().await {
            if let Err(e) = self.handle(trigger).await {
                error!(trigger = %trigger, error = %e, "Trigger failed");
            }
        }
        info!("Trigger channel closed, stopping");
    }

    pub async fn handle(&mut self, trigger: Trigger) -> Result<()> {
        let today = self.today();
        let report = match trigger {
            Trigger::DailyPrime => {
                self.prime(today).await?;
                None
            }
            Trigger::WeeklyPublish => Some(self.publish_week(today).await?),
            Trigger::Tick => {
                self.reprime_if_leagues_changed(today).await?;
                self.update_if_live(today, Utc::now().timestamp()).await?
            }
        };
        self.health.record_trigger(trigger, report).await;
        Ok(())
    }

    /// Clear the match cache and refill it with `day`'s matches.
    pub async fn prime(&mut self, day: NaiveDate) -> Result<()> {
        let subscribers = self.store().list_subscribers().await?;
        let leagues = union_of_leagues(&subscribers);
        self.orchestrator.prime(&leagues, day).await;
        Ok(())
    }

    /// Re-prime when leagues were added or removed since the last priming.
    ///
    /// Subscription commands run in their own process, so the cache only
    /// learns about them here.
    pub async fn reprime_if_leagues_changed(&mut self, day: NaiveDate) -> Result<bool> {
        let subscribers = self.store().list_subscribers().await?;
        let leagues = union_of_leagues(&subscribers);
        let wanted: BTreeSet<String> = leagues.iter().map(|l| l.id.clone()).collect();
        if &wanted == self.orchestrator.cache().primed_for() {
            return Ok(false);
        }
        info!(leagues = wanted.len(), "Subscribed leagues changed, re-priming");
        self.orchestrator.prime(&leagues, day).await;
        Ok(true)
    }

    /// Publish standings and the week's match notifications for every subscriber.
    #[instrument(skip(self))]
    pub async fn publish_week(&self, today: NaiveDate) -> Result<SyncReport> {
        let subscribers = self.store().list_subscribers().await?;
        let leagues = union_of_leagues(&subscribers);
        if leagues.is_empty() {
            return Ok(SyncReport::default());
        }

        let week = WeekKey::containing(today);
        let matches = self
            .orchestrator
            .fetch_for_leagues(&leagues, week.from(), week.to())
            .await;
        let mut standings: HashMap<String, Option<StandingsTable>> = HashMap::new();

        let mut report = SyncReport::default();
        for subscriber in &subscribers {
            if subscriber.channel_id.is_none() {
                continue;
            }
            for league in &subscriber.leagues {
                let Some(league_matches) = matches.get(&league.id) else {
                    continue;
                };
                if !standings.contains_key(&league.id) {
                    let table = self.orchestrator.standings(&league.id, today).await;
                    standings.insert(league.id.clone(), table);
                }
                let table = standings.get(&league.id).and_then(Option::as_ref);
                report += self
                    .sync_subscriber_league(subscriber, league, &week, league_matches, table, SyncMode::Publish)
                    .await;
            }
        }

        self.prune_rendered(&week).await?;

        info!(
            week = %week,
            created = report.created,
            edited = report.edited,
            failed = report.failed,
            "Weekly publication complete"
        );
        Ok(report)
    }

    /// Forget rendered payloads of handles outside `week` and the standings.
    async fn prune_rendered(&self, week: &WeekKey) -> Result<()> {
        let week_key = week.to_string();
        let mut keep: HashSet<MessageHandle> = HashSet::new();
        for subscriber in self.store().list_subscribers().await? {
            if let Some(by_league) = subscriber.league_bindings.get(&week_key) {
                keep.extend(by_league.values().flatten().cloned());
            }
            keep.extend(subscriber.standings_bindings.into_values());
        }
        self.engine.retain_rendered(&keep).await;
        Ok(())
    }

    /// Re-sync the current week when a cached match is inside its live window.
    ///
    /// Returns `None` when the gate is closed.
    pub async fn update_if_live(&self, today: NaiveDate, now_epoch: i64) -> Result<Option<SyncReport>> {
        let cache = self.orchestrator.cache();
        if cache.is_empty() {
            debug!("No match today");
            return Ok(None);
        }
        if !should_sync(now_epoch, cache.all_matches(), self.live_window_seconds) {
            return Ok(None);
        }
        self.update_week(today).await.map(Some)
    }

    /// Edit the notifications already bound for the current week.
    #[instrument(skip(self))]
    pub async fn update_week(&self, today: NaiveDate) -> Result<SyncReport> {
        let subscribers = self.store().list_subscribers().await?;
        let week = WeekKey::containing(today);
        let week_key = week.to_string();

        // Only leagues with something bound this week need fresh data.
        let bound: Vec<League> = union_of_leagues(&subscribers)
            .into_iter()
            .filter(|l| {
                subscribers.iter().any(|s| {
                    s.league_bindings
                        .get(&week_key)
                        .is_some_and(|by_league| by_league.contains_key(&l.id))
                })
            })
            .collect();
        if bound.is_empty() {
            return Ok(SyncReport::default());
        }

        let matches = self
            .orchestrator
            .fetch_for_leagues(&bound, week.from(), week.to())
            .await;

        let mut report = SyncReport::default();
        for subscriber in &subscribers {
            for league in &subscriber.leagues {
                let Some(league_matches) = matches.get(&league.id) else {
                    continue;
                };
                report += self
                    .sync_subscriber_league(subscriber, league, &week, league_matches, None, SyncMode::Update)
                    .await;
            }
        }

        info!(
            week = %week,
            edited = report.edited,
            unchanged = report.unchanged,
            failed = report.failed,
            "Live update complete"
        );
        Ok(report)
    }

    /// Publish the current week and standings for a league just added by `subscriber`.
    pub async fn publish_league(&self, subscriber: &SubscriberConfig, league: &League) -> SyncReport {
        let today = self.today();
        let week = WeekKey::containing(today);
        let matches = self
            .orchestrator
            .fetch_for_leagues([league], week.from(), week.to())
            .await;
        let table = self.orchestrator.standings(&league.id, today).await;

        let league_matches = matches.get(&league.id).map(Vec::as_slice).unwrap_or_default();
        self.sync_subscriber_league(subscriber, league, &week, league_matches, table.as_ref(), SyncMode::Publish)
            .await
    }

    /// Retire every notification and the standings for (subscriber, league).
    pub async fn retire_league(&self, subscriber_id: &str, league_id: &str) -> Result<SyncReport> {
        let mut report = self.engine.retire_league(subscriber_id, league_id).await?;
        report += self.engine.retire_standings(subscriber_id, league_id).await?;
        Ok(report)
    }

    async fn sync_subscriber_league(
        &self,
        subscriber: &SubscriberConfig,
        league: &League,
        week: &WeekKey,
        matches: &[MatchRecord],
        standings: Option<&StandingsTable>,
        mode: SyncMode,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        if let Some(table) = standings {
            match self.engine.sync_standings(subscriber, league, table).await {
                Ok(r) => report += r,
                Err(e) => {
                    warn!(subscriber = %subscriber.subscriber_id, league = %league.id, error = %e, "Standings sync failed");
                    report.failed += 1;
                }
            }
        }

        match self.engine.sync_league(subscriber, league, week, matches, mode).await {
            Ok(r) => report += r,
            Err(e) => {
                warn!(subscriber = %subscriber.subscriber_id, league = %league.id, error = %e, "League sync failed");
                report.failed += 1;
            }
        }
        report
    }
}
