use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use crate::chat::MessageHandle;
use crate::football::models::League;
use crate::render::Locale;
use crate::sync::week::WeekKey;

pub struct Store {
    pool: SqlitePool,
}

/// Everything persisted for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberConfig {
    pub subscriber_id: String,
    pub channel_id: Option<String>,
    pub language: Locale,
    pub leagues: Vec<League>,
    /// week key -> league id -> handles in chunk order
    pub league_bindings: BTreeMap<String, BTreeMap<String, Vec<MessageHandle>>>,
    pub standings_bindings: BTreeMap<String, MessageHandle>,
}

impl SubscriberConfig {
    pub fn is_subscribed(&self, league_id: &str) -> bool {
        self.leagues.iter().any(|l| l.id == league_id)
    }
}

fn parse_handle(raw: &str) -> Option<MessageHandle> {
    match raw.parse() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(handle = raw, error = %e, "Skipping malformed stored handle");
            None
        }
    }
}

impl Store {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open (or create) the database. `":memory:"` gives a private in-memory store.
    pub async fn new(database_path: &str) -> Result<Self> {
        let in_memory = database_path == ":memory:";
        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: opens a distinct database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        // sqlx runs one statement per call
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to execute migration: {trimmed}"))?;
            }
        }
        Ok(())
    }

    // --- Subscribers ---

    pub async fn upsert_subscriber(
        &self,
        subscriber_id: &str,
        channel_id: &str,
        language: Locale,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscribers (subscriber_id, channel_id, language) VALUES (?, ?, ?)
             ON CONFLICT(subscriber_id) DO UPDATE SET channel_id = excluded.channel_id, language = excluded.language",
        )
        .bind(subscriber_id)
        .bind(channel_id)
        .bind(language.tag())
        .execute(&self.pool)
        .await
        .context("Failed to upsert subscriber")?;
        Ok(())
    }

    pub async fn find_subscriber(&self, subscriber_id: &str) -> Result<Option<SubscriberConfig>> {
        let row: Option<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT subscriber_id, channel_id, language FROM subscribers WHERE subscriber_id = ?",
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch subscriber")?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_subscribers(&self) -> Result<Vec<SubscriberConfig>> {
        let rows: Vec<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT subscriber_id, channel_id, language FROM subscribers ORDER BY subscriber_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list subscribers")?;

        let mut subscribers = Vec::with_capacity(rows.len());
        for row in rows {
            subscribers.push(self.load(row).await?);
        }
        Ok(subscribers)
    }

    async fn load(
        &self,
        (subscriber_id, channel_id, language): (String, Option<String>, String),
    ) -> Result<SubscriberConfig> {
        let leagues: Vec<(String, String)> = sqlx::query_as(
            "SELECT league_id, league_name FROM subscribed_leagues WHERE subscriber_id = ? ORDER BY rowid",
        )
        .bind(&subscriber_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch subscribed leagues")?;

        let bindings: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT week_key, league_id, handle FROM league_bindings
             WHERE subscriber_id = ? ORDER BY week_key, league_id, position",
        )
        .bind(&subscriber_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch league bindings")?;

        let standings: Vec<(String, String)> = sqlx::query_as(
            "SELECT league_id, handle FROM standings_bindings WHERE subscriber_id = ?",
        )
        .bind(&subscriber_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch standings bindings")?;

        let mut league_bindings: BTreeMap<String, BTreeMap<String, Vec<MessageHandle>>> =
            BTreeMap::new();
        for (week_key, league_id, raw) in bindings {
            if let Some(handle) = parse_handle(&raw) {
                league_bindings
                    .entry(week_key)
                    .or_default()
                    .entry(league_id)
                    .or_default()
                    .push(handle);
            }
        }

        let language: Locale = language.parse().unwrap_or_else(|e| {
            warn!(subscriber_id = %subscriber_id, error = %e, "Falling back to default language");
            Locale::default()
        });

        Ok(SubscriberConfig {
            subscriber_id,
            channel_id,
            language,
            leagues: leagues
                .into_iter()
                .map(|(id, display_name)| League { id, display_name })
                .collect(),
            league_bindings,
            standings_bindings: standings
                .into_iter()
                .filter_map(|(league_id, raw)| parse_handle(&raw).map(|h| (league_id, h)))
                .collect(),
        })
    }

    // --- Subscribed leagues (set semantics) ---

    /// Returns false when the league was already present.
    pub async fn add_league(&self, subscriber_id: &str, league: &League) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO subscribed_leagues (subscriber_id, league_id, league_name) VALUES (?, ?, ?)",
        )
        .bind(subscriber_id)
        .bind(&league.id)
        .bind(&league.display_name)
        .execute(&self.pool)
        .await
        .context("Failed to add league")?;
        Ok(result.rows_affected() == 1)
    }

    /// Returns false when the league was not subscribed.
    pub async fn remove_league(&self, subscriber_id: &str, league_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM subscribed_leagues WHERE subscriber_id = ? AND league_id = ?",
        )
        .bind(subscriber_id)
        .bind(league_id)
        .execute(&self.pool)
        .await
        .context("Failed to remove league")?;
        Ok(result.rows_affected() > 0)
    }

    // --- League bindings ---

    pub async fn league_bindings(
        &self,
        subscriber_id: &str,
        week: &WeekKey,
        league_id: &str,
    ) -> Result<Vec<MessageHandle>> {
        self.league_bindings_raw(subscriber_id, &week.to_string(), league_id)
            .await
    }

    /// Append a handle after the last bound position.
    pub async fn push_league_binding(
        &self,
        subscriber_id: &str,
        week: &WeekKey,
        league_id: &str,
        handle: &MessageHandle,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO league_bindings (subscriber_id, week_key, league_id, position, handle)
             SELECT ?1, ?2, ?3, COALESCE(MAX(position) + 1, 0), ?4 FROM league_bindings
             WHERE subscriber_id = ?1 AND week_key = ?2 AND league_id = ?3",
        )
        .bind(subscriber_id)
        .bind(week.to_string())
        .bind(league_id)
        .bind(handle.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to push league binding")?;
        Ok(())
    }

    /// Replace the whole ordered handle list for one (subscriber, week, league).
    pub async fn replace_league_bindings(
        &self,
        subscriber_id: &str,
        week: &WeekKey,
        league_id: &str,
        handles: &[MessageHandle],
    ) -> Result<()> {
        let week_key = week.to_string();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "DELETE FROM league_bindings WHERE subscriber_id = ? AND week_key = ? AND league_id = ?",
        )
        .bind(subscriber_id)
        .bind(&week_key)
        .bind(league_id)
        .execute(&mut *tx)
        .await
        .context("Failed to clear league bindings")?;

        for (position, handle) in handles.iter().enumerate() {
            sqlx::query(
                "INSERT INTO league_bindings (subscriber_id, week_key, league_id, position, handle)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(subscriber_id)
            .bind(&week_key)
            .bind(league_id)
            .bind(position as i64)
            .bind(handle.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert league binding")?;
        }

        tx.commit().await.context("Failed to commit league bindings")?;
        Ok(())
    }

    pub async fn unset_league_bindings(
        &self,
        subscriber_id: &str,
        week_key: &str,
        league_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM league_bindings WHERE subscriber_id = ? AND week_key = ? AND league_id = ?",
        )
        .bind(subscriber_id)
        .bind(week_key)
        .bind(league_id)
        .execute(&self.pool)
        .await
        .context("Failed to unset league bindings")?;
        Ok(())
    }

    /// Every stored week key with at least one handle for (subscriber, league).
    pub async fn week_keys_for(&self, subscriber_id: &str, league_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT week_key FROM league_bindings
             WHERE subscriber_id = ? AND league_id = ? ORDER BY week_key",
        )
        .bind(subscriber_id)
        .bind(league_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list week keys")?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    /// Handles of one stored week, addressed by its serialized key.
    pub async fn league_bindings_raw(
        &self,
        subscriber_id: &str,
        week_key: &str,
        league_id: &str,
    ) -> Result<Vec<MessageHandle>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT handle FROM league_bindings
             WHERE subscriber_id = ? AND week_key = ? AND league_id = ? ORDER BY position",
        )
        .bind(subscriber_id)
        .bind(week_key)
        .bind(league_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch league bindings")?;
        Ok(rows.iter().filter_map(|(raw,)| parse_handle(raw)).collect())
    }

    // --- Standings bindings ---

    pub async fn standings_binding(
        &self,
        subscriber_id: &str,
        league_id: &str,
    ) -> Result<Option<MessageHandle>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT handle FROM standings_bindings WHERE subscriber_id = ? AND league_id = ?",
        )
        .bind(subscriber_id)
        .bind(league_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch standings binding")?;
        Ok(row.and_then(|(raw,)| parse_handle(&raw)))
    }

    pub async fn set_standings_binding(
        &self,
        subscriber_id: &str,
        league_id: &str,
        handle: &MessageHandle,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO standings_bindings (subscriber_id, league_id, handle) VALUES (?, ?, ?)
             ON CONFLICT(subscriber_id, league_id) DO UPDATE SET handle = excluded.handle",
        )
        .bind(subscriber_id)
        .bind(league_id)
        .bind(handle.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to set standings binding")?;
        Ok(())
    }

    pub async fn unset_standings_binding(&self, subscriber_id: &str, league_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM standings_bindings WHERE subscriber_id = ? AND league_id = ?")
            .bind(subscriber_id)
            .bind(league_id)
            .execute(&self.pool)
            .await
            .context("Failed to unset standings binding")?;
        Ok(())
    }
}
