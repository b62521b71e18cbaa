//! End-to-end synchronization scenarios against a scripted provider and the
//! in-memory chat platform.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use matchday_sync::chat::memory::{ChatOp, InMemoryChat};
use matchday_sync::commands::{self, CommandContext, CommandOutcome};
use matchday_sync::db::store::Store;
use matchday_sync::error::ProviderError;
use matchday_sync::football::api::{FootballProvider, RawEvent, RawFixture, RawLeagueStandings};
use matchday_sync::football::leagues::ChoiceKind;
use matchday_sync::monitoring::health::HealthState;
use matchday_sync::pipeline::enricher::EnrichSettings;
use matchday_sync::pipeline::orchestrator::WeeklyFetchOrchestrator;
use matchday_sync::render::Locale;
use matchday_sync::service::Service;
use matchday_sync::sync::engine::{SyncEngine, SyncSettings};
use matchday_sync::sync::week::WeekKey;

#[derive(Default)]
struct ScriptedProvider {
    fixtures: Mutex<HashMap<String, Vec<RawFixture>>>,
    events: Mutex<HashMap<i64, Vec<RawEvent>>>,
    failing_leagues: Mutex<HashSet<String>>,
}

impl ScriptedProvider {
    fn set_fixtures(&self, league_id: &str, fixtures: Vec<RawFixture>) {
        self.fixtures
            .lock()
            .unwrap()
            .insert(league_id.to_string(), fixtures);
    }
}

#[async_trait]
impl FootballProvider for ScriptedProvider {
    async fn fixtures(
        &self,
        league_id: &str,
        _season: i32,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<RawFixture>, ProviderError> {
        if self.failing_leagues.lock().unwrap().contains(league_id) {
            return Err(ProviderError::Api {
                endpoint: "/fixtures".to_string(),
                message: "quota exceeded".to_string(),
            });
        }
        Ok(self
            .fixtures
            .lock()
            .unwrap()
            .get(league_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fixture_events(&self, fixture_id: i64) -> Result<Vec<RawEvent>, ProviderError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&fixture_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn standings(
        &self,
        _league_id: &str,
        _season: i32,
    ) -> Result<Vec<RawLeagueStandings>, ProviderError> {
        Ok(Vec::new())
    }
}

fn fixture(id: i64, league_id: i64, home_goals: u32, away_goals: u32) -> RawFixture {
    serde_json::from_value(serde_json::json!({
        "fixture": {
            "id": id,
            "timestamp": 1_715_788_800 + id * 600,
            "status": {"short": "2H", "elapsed": 70}
        },
        "league": {"id": league_id, "name": "Provider League"},
        "teams": {
            "home": {"id": id * 100, "name": format!("Home {id}"), "winner": null},
            "away": {"id": id * 100 + 1, "name": format!("Away {id}"), "winner": null}
        },
        "goals": {"home": home_goals, "away": away_goals},
        "score": {"penalty": {"home": null, "away": null}}
    }))
    .unwrap()
}

fn week_of(league_id: i64, count: i64) -> Vec<RawFixture> {
    (1..=count).map(|id| fixture(id, league_id, 0, 0)).collect()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

async fn setup(provider: Arc<ScriptedProvider>) -> (Service, Arc<InMemoryChat>) {
    let chat = Arc::new(InMemoryChat::new());
    let store = Arc::new(Store::new(":memory:").await.unwrap());
    let orchestrator = WeeklyFetchOrchestrator::new(
        provider,
        EnrichSettings {
            batch_size: 5,
            inter_batch_delay: Duration::ZERO,
        },
        Some(2024),
    );
    let engine = SyncEngine::new(chat.clone(), store, SyncSettings::default());
    let service = Service::new(
        orchestrator,
        engine,
        HealthState::new(),
        8460,
        chrono_tz::Europe::Paris,
    );
    (service, chat)
}

async fn subscribe(service: &Service, subscriber_id: &str, league_id: &str) {
    let store = service.store();
    store
        .upsert_subscriber(subscriber_id, &format!("{subscriber_id}-chan"), Locale::En)
        .await
        .unwrap();
    let league = matchday_sync::football::leagues::find(league_id).unwrap();
    store.add_league(subscriber_id, &league).await.unwrap();
}

#[tokio::test]
async fn seven_matches_publish_two_notifications_and_rescore_edits_only_the_first() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.set_fixtures("39", week_of(39, 7));
    let (service, chat) = setup(provider.clone()).await;
    subscribe(&service, "S", "39").await;

    let report = service.publish_week(today()).await.unwrap();
    assert_eq!(report.created, 2);

    let week = WeekKey::containing(today());
    let handles = service.store().league_bindings("S", &week, "39").await.unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(chat.message(&handles[0]).await.unwrap().fields.len(), 6 * 4);
    assert_eq!(chat.message(&handles[1]).await.unwrap().fields.len(), 4);

    // Match #3 scores.
    let mut rescored = week_of(39, 7);
    rescored[2] = fixture(3, 39, 1, 0);
    provider.set_fixtures("39", rescored);
    chat.clear_operations().await;

    let report = service.update_week(today()).await.unwrap();
    assert_eq!(report.edited, 1);
    assert_eq!(chat.operations().await, vec![ChatOp::Edit(handles[0].clone())]);
    let first = chat.message(&handles[0]).await.unwrap();
    assert!(first.fields.iter().any(|f| f.value == "**1 - 0**"));
}

#[tokio::test]
async fn repeated_sync_with_unchanged_data_creates_nothing() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.set_fixtures("140", week_of(140, 9));
    let (service, chat) = setup(provider).await;
    subscribe(&service, "S", "140").await;

    service.publish_week(today()).await.unwrap();
    let week = WeekKey::containing(today());
    let before = service.store().league_bindings("S", &week, "140").await.unwrap();

    service.publish_week(today()).await.unwrap();
    service.update_week(today()).await.unwrap();

    let after = service.store().league_bindings("S", &week, "140").await.unwrap();
    assert_eq!(before, after);
    assert_eq!(chat.message_count().await, 2);
}

#[tokio::test]
async fn failing_league_does_not_block_other_subscribers() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.set_fixtures("39", week_of(39, 3));
    provider.set_fixtures("61", week_of(61, 3));
    provider.failing_leagues.lock().unwrap().insert("39".to_string());
    let (service, _chat) = setup(provider).await;
    subscribe(&service, "A", "39").await;
    subscribe(&service, "B", "61").await;

    let report = service.publish_week(today()).await.unwrap();
    assert_eq!(report.created, 1);

    let week = WeekKey::containing(today());
    assert!(service.store().league_bindings("A", &week, "39").await.unwrap().is_empty());
    assert_eq!(service.store().league_bindings("B", &week, "61").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unsubscribing_removes_every_week_and_the_removal_choice() {
    let provider = Arc::new(ScriptedProvider::default());
    provider.set_fixtures("78", week_of(78, 7));
    let (service, chat) = setup(provider).await;
    subscribe(&service, "S", "78").await;

    let last_week = today() - chrono::Duration::days(7);
    service.publish_week(last_week).await.unwrap();
    service.publish_week(today()).await.unwrap();
    assert_eq!(service.store().week_keys_for("S", "78").await.unwrap().len(), 2);
    assert_eq!(chat.message_count().await, 4);

    let ctx = CommandContext::new("S", Locale::En);
    let outcome = commands::remove_league(&service, &ctx, "78").await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Removed { .. }));

    assert!(service.store().week_keys_for("S", "78").await.unwrap().is_empty());
    assert_eq!(chat.message_count().await, 0);
    let removable = commands::league_choices(&service, &ctx, ChoiceKind::Remove)
        .await
        .unwrap();
    assert!(removable.iter().all(|l| l.id != "78"));
}
