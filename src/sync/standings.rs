//! Single-handle standings synchronization.
//!
//! One standings message per (subscriber, league), posted in a thread named
//! after the localized standings title and edited in place afterwards.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::db::store::SubscriberConfig;
use crate::football::models::{League, StandingsTable};
use crate::render::render_standings;
use crate::sync::engine::{SyncEngine, SyncReport};

impl SyncEngine {
    #[instrument(skip(self, subscriber, table), fields(subscriber = %subscriber.subscriber_id, league = %league.id))]
    pub async fn sync_standings(
        &self,
        subscriber: &SubscriberConfig,
        league: &League,
        table: &StandingsTable,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let Some(channel_id) = subscriber.channel_id.as_deref() else {
            debug!("Subscriber has no channel, skipping standings");
            return Ok(report);
        };

        let subscriber_id = subscriber.subscriber_id.as_str();
        let lock = self.key_lock(subscriber_id, &league.id).await;
        let _guard = lock.lock().await;

        let title = subscriber.language.standings_title(&league.display_name);
        let payload = render_standings(table, &title, subscriber.language);

        if let Some(handle) = self.store.standings_binding(subscriber_id, &league.id).await? {
            match self.chat.edit_message(&handle, &payload).await {
                Ok(()) => {
                    self.remember(&handle, &payload).await;
                    report.edited += 1;
                    return Ok(report);
                }
                Err(e) if e.is_not_found() => {
                    warn!(handle = %handle, "Standings message vanished, republishing");
                    self.forget(std::slice::from_ref(&handle)).await;
                    self.store
                        .unset_standings_binding(subscriber_id, &league.id)
                        .await?;
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to edit standings");
                    report.failed += 1;
                    return Ok(report);
                }
            }
        }

        let published = async {
            let thread_id = self.chat.ensure_thread(channel_id, &title).await?;
            self.chat.send_message(&thread_id, &payload).await
        };
        match published.await {
            Ok(handle) => {
                self.remember(&handle, &payload).await;
                self.store
                    .set_standings_binding(subscriber_id, &league.id, &handle)
                    .await?;
                report.created += 1;
                info!(handle = %handle, "Standings published");
            }
            Err(e) => {
                warn!(error = %e, "Failed to publish standings");
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Delete the standings message and its thread, then clear the binding.
    ///
    /// The binding is cleared even when nothing could be deleted.
    #[instrument(skip(self))]
    pub async fn retire_standings(&self, subscriber_id: &str, league_id: &str) -> Result<SyncReport> {
        let lock = self.key_lock(subscriber_id, league_id).await;
        let _guard = lock.lock().await;

        let mut report = SyncReport::default();
        let Some(handle) = self.store.standings_binding(subscriber_id, league_id).await? else {
            return Ok(report);
        };

        match self.chat.delete_messages(std::slice::from_ref(&handle)).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to delete standings message");
                report.failed += 1;
            }
        }
        // The message lives in the league's standings thread.
        match self.chat.delete_thread(&handle.channel_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(thread_id = %handle.channel_id, "Standings thread already deleted");
            }
            Err(e) => {
                warn!(thread_id = %handle.channel_id, error = %e, "Failed to delete standings thread");
                report.failed += 1;
            }
        }
        self.forget(std::slice::from_ref(&handle)).await;
        self.store.unset_standings_binding(subscriber_id, league_id).await?;
        Ok(report)
    }
}
