//! Reconciliation of published match notifications.
//!
//! For one (subscriber, league, week) the engine compares the current chunked
//! match list with the bound handles and issues send, edit or delete calls so
//! that handle `i` always shows chunk `i`.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::chat::{ChatPlatform, MessageHandle, Payload};
use crate::db::store::{Store, SubscriberConfig};
use crate::error::ChatError;
use crate::football::models::{League, MatchRecord};
use crate::render::render_matches;
use crate::sync::week::WeekKey;

pub const DEFAULT_CHUNK_SIZE: usize = 6;

/// Split matches into consecutive slices of at most `size`, preserving order.
pub fn chunk_matches(matches: &[MatchRecord], size: usize) -> Vec<&[MatchRecord]> {
    matches.chunks(size.max(1)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Weekly publication: create notifications when none are bound.
    Publish,
    /// Live tick: only touch notifications that already exist.
    Update,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub edited: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.edited += other.edited;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub chunk_size: usize,
    /// Create or delete handles so their count matches the chunk count.
    pub reconcile_drift: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            reconcile_drift: true,
        }
    }
}

pub struct SyncEngine {
    pub(crate) chat: Arc<dyn ChatPlatform>,
    pub(crate) store: Arc<Store>,
    settings: SyncSettings,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    /// Last payload written to each handle during this process lifetime.
    rendered: Mutex<HashMap<MessageHandle, Payload>>,
}

impl SyncEngine {
    pub fn new(chat: Arc<dyn ChatPlatform>, store: Arc<Store>, settings: SyncSettings) -> Self {
        Self {
            chat,
            store,
            settings,
            locks: Mutex::new(HashMap::new()),
            rendered: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serializes every operation on one (subscriber, league) pair.
    pub(crate) async fn key_lock(&self, subscriber_id: &str, league_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((subscriber_id.to_string(), league_id.to_string()))
            .or_default()
            .clone()
    }

    pub(crate) async fn remember(&self, handle: &MessageHandle, payload: &Payload) {
        self.rendered
            .lock()
            .await
            .insert(handle.clone(), payload.clone());
    }

    pub(crate) async fn forget(&self, handles: &[MessageHandle]) {
        let mut rendered = self.rendered.lock().await;
        for handle in handles {
            rendered.remove(handle);
        }
    }

    /// Drop remembered payloads for every handle not in `keep`.
    pub(crate) async fn retain_rendered(&self, keep: &HashSet<MessageHandle>) {
        let mut rendered = self.rendered.lock().await;
        let before = rendered.len();
        rendered.retain(|handle, _| keep.contains(handle));
        debug!(pruned = before - rendered.len(), "Rendered payload cache pruned");
    }

    #[cfg(test)]
    pub(crate) async fn rendered_handles(&self) -> HashSet<MessageHandle> {
        self.rendered.lock().await.keys().cloned().collect()
    }

    async fn is_current(&self, handle: &MessageHandle, payload: &Payload) -> bool {
        self.rendered.lock().await.get(handle) == Some(payload)
    }

    async fn publish_chunk(
        &self,
        channel_id: &str,
        payload: &Payload,
    ) -> Result<MessageHandle, ChatError> {
        let handle = self.chat.send_message(channel_id, payload).await?;
        self.remember(&handle, payload).await;
        Ok(handle)
    }

    /// Bring one league's notifications for `week` in line with `matches`.
    ///
    /// A subscriber without a channel, or an empty match list, is a no-op.
    #[instrument(skip(self, subscriber, matches), fields(subscriber = %subscriber.subscriber_id, league = %league.id, week = %week))]
    pub async fn sync_league(
        &self,
        subscriber: &SubscriberConfig,
        league: &League,
        week: &WeekKey,
        matches: &[MatchRecord],
        mode: SyncMode,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let Some(channel_id) = subscriber.channel_id.as_deref() else {
            debug!("Subscriber has no channel, skipping");
            return Ok(report);
        };
        if matches.is_empty() {
            return Ok(report);
        }

        let subscriber_id = subscriber.subscriber_id.as_str();
        let lock = self.key_lock(subscriber_id, &league.id).await;
        let _guard = lock.lock().await;

        let payloads: Vec<Payload> = chunk_matches(matches, self.settings.chunk_size)
            .into_iter()
            .map(|chunk| render_matches(&league.display_name, chunk, subscriber.language))
            .collect();
        let bound = self.store.league_bindings(subscriber_id, week, &league.id).await?;

        if bound.is_empty() {
            if mode == SyncMode::Update {
                debug!("No notifications bound yet, nothing to update");
                return Ok(report);
            }
            for payload in &payloads {
                match self.publish_chunk(channel_id, payload).await {
                    Ok(handle) => {
                        self.store
                            .push_league_binding(subscriber_id, week, &league.id, &handle)
                            .await?;
                        report.created += 1;
                    }
                    Err(e) => {
                        // Later chunks would land at the wrong index.
                        warn!(error = %e, "Failed to publish chunk, stopping");
                        report.failed += 1;
                        break;
                    }
                }
            }
            info!(created = report.created, "League notifications published");
            return Ok(report);
        }

        let mut handles = bound.clone();
        for (index, (handle, payload)) in bound.iter().zip(&payloads).enumerate() {
            if self.is_current(handle, payload).await {
                report.unchanged += 1;
                continue;
            }
            match self.chat.edit_message(handle, payload).await {
                Ok(()) => {
                    self.remember(handle, payload).await;
                    report.edited += 1;
                }
                Err(e) if e.is_not_found() && self.settings.reconcile_drift => {
                    warn!(handle = %handle, "Notification vanished, republishing");
                    self.forget(std::slice::from_ref(handle)).await;
                    match self.publish_chunk(channel_id, payload).await {
                        Ok(replacement) => {
                            handles[index] = replacement;
                            report.created += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, index, "Failed to republish chunk");
                            report.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, index, "Failed to edit chunk");
                    report.failed += 1;
                }
            }
        }

        if bound.len() != payloads.len() {
            if self.settings.reconcile_drift {
                self.reconcile_drift(channel_id, &payloads, &mut handles, &mut report)
                    .await;
            } else {
                debug!(
                    handles = bound.len(),
                    chunks = payloads.len(),
                    "Chunk count drift left untouched"
                );
            }
        }

        if handles != bound {
            self.store
                .replace_league_bindings(subscriber_id, week, &league.id, &handles)
                .await?;
        }

        debug!(
            edited = report.edited,
            unchanged = report.unchanged,
            created = report.created,
            deleted = report.deleted,
            "League notifications synchronized"
        );
        Ok(report)
    }

    async fn reconcile_drift(
        &self,
        channel_id: &str,
        payloads: &[Payload],
        handles: &mut Vec<MessageHandle>,
        report: &mut SyncReport,
    ) {
        if handles.len() > payloads.len() {
            let surplus = handles[payloads.len()..].to_vec();
            // Surplus stays bound until deleted so a later sync or retirement can retry.
            match self.chat.delete_messages(&surplus).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(count = surplus.len(), "Surplus notifications already gone");
                }
                Err(e) => {
                    warn!(error = %e, count = surplus.len(), "Failed to delete surplus notifications, keeping them bound");
                    report.failed += 1;
                    return;
                }
            }
            handles.truncate(payloads.len());
            report.deleted += surplus.len();
            self.forget(&surplus).await;
            info!(count = surplus.len(), "Surplus notifications removed");
            return;
        }
        for payload in &payloads[handles.len()..] {
            match self.publish_chunk(channel_id, payload).await {
                Ok(handle) => {
                    handles.push(handle);
                    report.created += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to publish extra chunk, stopping");
                    report.failed += 1;
                    break;
                }
            }
        }
    }

    /// Delete every notification bound to (subscriber, league) across all weeks.
    ///
    /// Weeks whose deletion fails keep their bindings so a later call can retry.
    #[instrument(skip(self))]
    pub async fn retire_league(&self, subscriber_id: &str, league_id: &str) -> Result<SyncReport> {
        let lock = self.key_lock(subscriber_id, league_id).await;
        let _guard = lock.lock().await;

        let mut report = SyncReport::default();
        for week_key in self.store.week_keys_for(subscriber_id, league_id).await? {
            let handles = self
                .store
                .league_bindings_raw(subscriber_id, &week_key, league_id)
                .await?;

            match self.chat.delete_messages(&handles).await {
                Ok(()) => report.deleted += handles.len(),
                Err(e) => {
                    warn!(week = %week_key, error = %e, "Failed to delete week notifications");
                    report.failed += 1;
                    continue;
                }
            }
            self.forget(&handles).await;
            self.store
                .unset_league_bindings(subscriber_id, &week_key, league_id)
                .await?;
        }

        info!(deleted = report.deleted, "League notifications retired");
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chat::memory::{ChatOp, InMemoryChat};
    use crate::football::models::{MatchStatus, Outcome, TeamLine};
    use crate::render::Locale;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory chat whose deletes can be made to fail like a platform outage.
    struct FlakyDeletes {
        inner: Arc<InMemoryChat>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ChatPlatform for FlakyDeletes {
        async fn send_message(
            &self,
            channel_id: &str,
            payload: &Payload,
        ) -> Result<MessageHandle, ChatError> {
            self.inner.send_message(channel_id, payload).await
        }

        async fn edit_message(
            &self,
            handle: &MessageHandle,
            payload: &Payload,
        ) -> Result<(), ChatError> {
            self.inner.edit_message(handle, payload).await
        }

        async fn delete_messages(&self, handles: &[MessageHandle]) -> Result<(), ChatError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    body: String::new(),
                });
            }
            self.inner.delete_messages(handles).await
        }

        async fn ensure_thread(&self, channel_id: &str, title: &str) -> Result<String, ChatError> {
            self.inner.ensure_thread(channel_id, title).await
        }

        async fn delete_thread(&self, thread_id: &str) -> Result<(), ChatError> {
            self.inner.delete_thread(thread_id).await
        }
    }

    pub(crate) fn league() -> League {
        League {
            id: "39".to_string(),
            display_name: "Premier League".to_string(),
        }
    }

    pub(crate) fn team(id: i64, score: u32) -> TeamLine {
        TeamLine {
            team_id: id,
            name: format!("Team {id}"),
            score,
            penalty_score: 0,
            outcome: Outcome::Undetermined,
            events: Vec::new(),
        }
    }

    pub(crate) fn matches(count: i64) -> Vec<MatchRecord> {
        (1..=count)
            .map(|id| MatchRecord {
                id,
                kickoff_epoch_seconds: 1_715_600_000 + id * 3600,
                status: MatchStatus {
                    code: "2H".to_string(),
                    elapsed_minutes: Some(60),
                },
                league: league(),
                home_team: team(id * 10, 0),
                away_team: team(id * 10 + 1, 0),
            })
            .collect()
    }

    pub(crate) fn week() -> WeekKey {
        WeekKey::containing(NaiveDate::from_ymd_opt(2024, 5, 15).unwrap())
    }

    pub(crate) fn subscriber() -> SubscriberConfig {
        SubscriberConfig {
            subscriber_id: "s1".to_string(),
            channel_id: Some("chan".to_string()),
            language: Locale::En,
            leagues: vec![league()],
            league_bindings: Default::default(),
            standings_bindings: Default::default(),
        }
    }

    pub(crate) async fn engine(reconcile_drift: bool) -> (SyncEngine, Arc<InMemoryChat>) {
        let chat = Arc::new(InMemoryChat::new());
        let store = Arc::new(Store::new(":memory:").await.unwrap());
        let engine = SyncEngine::new(
            chat.clone(),
            store,
            SyncSettings {
                chunk_size: 6,
                reconcile_drift,
            },
        );
        (engine, chat)
    }

    #[test]
    fn test_chunking_preserves_order() {
        let all = matches(13);
        let chunks = chunk_matches(&all, 6);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![6, 6, 1]);
        let flattened: Vec<i64> = chunks.iter().flat_map(|c| c.iter().map(|m| m.id)).collect();
        assert_eq!(flattened, (1..=13).collect::<Vec<_>>());
        assert!(chunk_matches(&[], 6).is_empty());
    }

    #[tokio::test]
    async fn test_seven_matches_then_rescore_edits_first_handle_only() {
        let (engine, chat) = engine(true).await;
        let sub = subscriber();
        let mut data = matches(7);

        let report = engine
            .sync_league(&sub, &league(), &week(), &data, SyncMode::Publish)
            .await
            .unwrap();
        assert_eq!(report.created, 2);
        let handles = engine.store().league_bindings("s1", &week(), "39").await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(chat.message(&handles[1]).await.unwrap().fields.len(), 4);

        chat.clear_operations().await;
        data[2].home_team.score = 1;
        let report = engine
            .sync_league(&sub, &league(), &week(), &data, SyncMode::Update)
            .await
            .unwrap();

        assert_eq!(report.edited, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(chat.operations().await, vec![ChatOp::Edit(handles[0].clone())]);
    }

    #[tokio::test]
    async fn test_sync_twice_is_idempotent() {
        let (engine, chat) = engine(true).await;
        let sub = subscriber();
        let data = matches(8);

        for _ in 0..2 {
            engine
                .sync_league(&sub, &league(), &week(), &data, SyncMode::Publish)
                .await
                .unwrap();
        }

        assert_eq!(chat.message_count().await, 2);
        let sends = chat
            .operations()
            .await
            .into_iter()
            .filter(|op| matches!(op, ChatOp::Send(_)))
            .count();
        assert_eq!(sends, 2);
    }

    #[tokio::test]
    async fn test_update_mode_never_creates() {
        let (engine, chat) = engine(true).await;
        engine
            .sync_league(&subscriber(), &league(), &week(), &matches(3), SyncMode::Update)
            .await
            .unwrap();
        assert!(chat.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_drift_reconciled_both_ways() {
        let (engine, chat) = engine(true).await;
        let sub = subscriber();

        engine
            .sync_league(&sub, &league(), &week(), &matches(7), SyncMode::Publish)
            .await
            .unwrap();
        let report = engine
            .sync_league(&sub, &league(), &week(), &matches(13), SyncMode::Update)
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(engine.store().league_bindings("s1", &week(), "39").await.unwrap().len(), 3);

        let report = engine
            .sync_league(&sub, &league(), &week(), &matches(4), SyncMode::Update)
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(engine.store().league_bindings("s1", &week(), "39").await.unwrap().len(), 1);
        assert_eq!(chat.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_drift_left_alone_when_disabled() {
        let (engine, chat) = engine(false).await;
        let sub = subscriber();

        engine
            .sync_league(&sub, &league(), &week(), &matches(7), SyncMode::Publish)
            .await
            .unwrap();
        engine
            .sync_league(&sub, &league(), &week(), &matches(2), SyncMode::Update)
            .await
            .unwrap();

        assert_eq!(engine.store().league_bindings("s1", &week(), "39").await.unwrap().len(), 2);
        assert_eq!(chat.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_vanished_notification_is_republished() {
        let (engine, chat) = engine(true).await;
        let sub = subscriber();
        let mut data = matches(2);

        engine
            .sync_league(&sub, &league(), &week(), &data, SyncMode::Publish)
            .await
            .unwrap();
        let original = engine.store().league_bindings("s1", &week(), "39").await.unwrap();
        chat.remove_externally(&original[0]).await;

        data[0].away_team.score = 2;
        engine
            .sync_league(&sub, &league(), &week(), &data, SyncMode::Update)
            .await
            .unwrap();

        let current = engine.store().league_bindings("s1", &week(), "39").await.unwrap();
        assert_eq!(current.len(), 1);
        assert_ne!(current[0], original[0]);
        assert!(chat.message(&current[0]).await.is_some());
    }

    #[tokio::test]
    async fn test_retire_removes_every_week() {
        let (engine, chat) = engine(true).await;
        let sub = subscriber();
        let previous = WeekKey::containing(week().from() - chrono::Duration::days(3));

        for w in [previous, week()] {
            engine
                .sync_league(&sub, &league(), &w, &matches(7), SyncMode::Publish)
                .await
                .unwrap();
        }
        let first = engine.store().league_bindings("s1", &week(), "39").await.unwrap();
        chat.remove_externally(&first[0]).await;

        let report = engine.retire_league("s1", "39").await.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(chat.message_count().await, 0);
        assert!(engine.store().week_keys_for("s1", "39").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_without_channel_is_noop() {
        let (engine, chat) = engine(true).await;
        let mut sub = subscriber();
        sub.channel_id = None;

        let report = engine
            .sync_league(&sub, &league(), &week(), &matches(3), SyncMode::Publish)
            .await
            .unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(chat.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_surplus_kept_bound_when_delete_fails() {
        let inner = Arc::new(InMemoryChat::new());
        let chat = Arc::new(FlakyDeletes {
            inner: inner.clone(),
            failing: AtomicBool::new(true),
        });
        let store = Arc::new(Store::new(":memory:").await.unwrap());
        let engine = SyncEngine::new(chat.clone(), store, SyncSettings::default());
        let sub = subscriber();

        engine
            .sync_league(&sub, &league(), &week(), &matches(13), SyncMode::Publish)
            .await
            .unwrap();
        let report = engine
            .sync_league(&sub, &league(), &week(), &matches(4), SyncMode::Update)
            .await
            .unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(engine.store().league_bindings("s1", &week(), "39").await.unwrap().len(), 3);
        assert_eq!(inner.message_count().await, 3);

        // Once the platform recovers, retirement reaches every message.
        chat.failing.store(false, Ordering::SeqCst);
        let report = engine.retire_league("s1", "39").await.unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(inner.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_retain_rendered_drops_other_handles() {
        let (engine, _chat) = engine(true).await;
        let sub = subscriber();
        let previous = WeekKey::containing(week().from() - chrono::Duration::days(3));

        for w in [previous, week()] {
            engine
                .sync_league(&sub, &league(), &w, &matches(7), SyncMode::Publish)
                .await
                .unwrap();
        }
        assert_eq!(engine.rendered_handles().await.len(), 4);

        let current: HashSet<MessageHandle> = engine
            .store()
            .league_bindings("s1", &week(), "39")
            .await
            .unwrap()
            .into_iter()
            .collect();
        engine.retain_rendered(&current).await;
        assert_eq!(engine.rendered_handles().await, current);
    }
}
