//! Football data provider client.
//!
//! Wraps the fixtures, fixture-events and standings endpoints with
//! rate limiting, retry logic, and conversion of raw payloads.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::{ProviderConfig, RateLimitConfig};
use crate::error::ProviderError;
use crate::football::models::{StandingRow, StandingsTable};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const API_KEY_HEADER: &str = "x-apisports-key";

/// The three provider operations the pipeline consumes.
#[async_trait]
pub trait FootballProvider: Send + Sync {
    async fn fixtures(
        &self,
        league_id: &str,
        season: i32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawFixture>, ProviderError>;

    async fn fixture_events(&self, fixture_id: i64) -> Result<Vec<RawEvent>, ProviderError>;

    async fn standings(
        &self,
        league_id: &str,
        season: i32,
    ) -> Result<Vec<RawLeagueStandings>, ProviderError>;
}

pub struct FootballClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    limiter: Arc<Limiter>,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl FootballClient {
    pub fn new(
        config: &ProviderConfig,
        rate_limit: &RateLimitConfig,
        api_key: SecretString,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: create_rate_limiter(rate_limit),
            max_retries: rate_limit.max_retries,
            backoff_base_ms: rate_limit.backoff_base_ms,
            backoff_max_ms: rate_limit.backoff_max_ms,
        })
    }

    /// GET `{base}{endpoint}` and unwrap the `response` envelope.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ProviderError> {
        self.with_retry(endpoint, move || async move {
            self.limiter.until_ready().await;

            let url = format!("{}{}", self.base_url, endpoint);
            let response = self
                .http
                .get(&url)
                .header(API_KEY_HEADER, self.api_key.expose_secret())
                .query(query)
                .send()
                .await
                .map_err(|source| ProviderError::Http {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                    body,
                });
            }

            let envelope: Envelope<T> =
                response.json().await.map_err(|source| ProviderError::Decode {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

            if has_errors(&envelope.errors) {
                return Err(ProviderError::Api {
                    endpoint: endpoint.to_string(),
                    message: envelope.errors.to_string(),
                });
            }

            debug!(endpoint, results = envelope.response.len(), "Provider response");
            Ok(envelope.response)
        })
        .await
    }

    async fn with_retry<F, Fut, T>(&self, endpoint: &str, operation: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if !e.is_retryable() || attempt > self.max_retries {
                        return Err(e);
                    }

                    let backoff_ms =
                        backoff_delay_ms(self.backoff_base_ms, self.backoff_max_ms, attempt);

                    warn!(
                        endpoint,
                        attempt,
                        backoff_ms,
                        error = %e,
                        "Retrying provider call after transient failure"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}

#[async_trait]
impl FootballProvider for FootballClient {
    #[instrument(skip(self))]
    async fn fixtures(
        &self,
        league_id: &str,
        season: i32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawFixture>, ProviderError> {
        self.get(
            "/fixtures",
            &[
                ("league", league_id.to_string()),
                ("season", season.to_string()),
                ("from", from.format("%Y-%m-%d").to_string()),
                ("to", to.format("%Y-%m-%d").to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn fixture_events(&self, fixture_id: i64) -> Result<Vec<RawEvent>, ProviderError> {
        self.get("/fixtures/events", &[("fixture", fixture_id.to_string())])
            .await
    }

    #[instrument(skip(self))]
    async fn standings(
        &self,
        league_id: &str,
        season: i32,
    ) -> Result<Vec<RawLeagueStandings>, ProviderError> {
        self.get(
            "/standings",
            &[
                ("league", league_id.to_string()),
                ("season", season.to_string()),
            ],
        )
        .await
    }
}

// === Helper Functions ===

fn create_rate_limiter(config: &RateLimitConfig) -> Arc<Limiter> {
    let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);

    let quota = Quota::per_second(rps).allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

/// Exponential backoff for the given 1-based attempt, capped at `max_ms`.
fn backoff_delay_ms(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(max_ms)
}

/// The provider reports errors as either an empty array or a keyed object.
fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Null => false,
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Flatten the first standings group of the first league into a table.
pub fn to_standings_table(raw: &[RawLeagueStandings]) -> Option<StandingsTable> {
    let league = &raw.first()?.league;
    let rows = league
        .standings
        .first()
        .map(|group| {
            group
                .iter()
                .map(|s| StandingRow {
                    rank: s.rank,
                    team_name: s.team.name.clone(),
                    points: s.points,
                    played: s.all.played,
                    win: s.all.win,
                    draw: s.all.draw,
                    lose: s.all.lose,
                    goals_for: s.all.goals.goals_for,
                    goals_against: s.all.goals.against,
                    goals_diff: s.goals_diff,
                    form: s.form.clone().filter(|f| !f.is_empty()),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(StandingsTable {
        league_id: league.id.to_string(),
        league_name: league.name.clone(),
        rows,
    })
}

// --- Provider Response Types ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    errors: serde_json::Value,
    #[serde(default = "Vec::new")]
    response: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFixture {
    pub fixture: RawFixtureInfo,
    pub league: RawLeague,
    pub teams: RawTeams,
    #[serde(default)]
    pub goals: RawScorePair,
    #[serde(default)]
    pub score: RawScore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFixtureInfo {
    pub id: i64,
    pub timestamp: i64,
    pub status: RawStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub long: String,
    pub short: String,
    pub elapsed: Option<u32>,
    #[serde(default)]
    pub extra: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLeague {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTeams {
    pub home: RawTeam,
    pub away: RawTeam,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTeam {
    pub id: i64,
    pub name: String,
    pub winner: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScorePair {
    pub home: Option<u32>,
    pub away: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScore {
    #[serde(default)]
    pub penalty: RawScorePair,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub time: RawEventTime,
    pub team: RawEventTeam,
    #[serde(default)]
    pub player: RawEventPlayer,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEventTime {
    pub elapsed: Option<u32>,
    pub extra: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEventTeam {
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEventPlayer {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLeagueStandings {
    pub league: RawStandingsLeague,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStandingsLeague {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub standings: Vec<Vec<RawStanding>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStanding {
    pub rank: u32,
    pub team: RawStandingTeam,
    pub points: i32,
    pub goals_diff: i32,
    pub form: Option<String>,
    pub all: RawStandingRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStandingTeam {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStandingRecord {
    pub played: u32,
    pub win: u32,
    pub draw: u32,
    pub lose: u32,
    pub goals: RawStandingGoals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStandingGoals {
    #[serde(rename = "for")]
    pub goals_for: u32,
    pub against: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> FootballClient {
        let provider = ProviderConfig {
            base_url: base_url.to_string(),
            timeout_seconds: 5,
            season: None,
        };
        let rate_limit = RateLimitConfig {
            requests_per_second: 100,
            burst_size: 100,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            max_retries: 2,
            event_batch_size: 5,
            event_batch_delay_ms: 0,
        };
        FootballClient::new(&provider, &rate_limit, SecretString::from("test-key")).unwrap()
    }

    fn fixture_json() -> serde_json::Value {
        serde_json::json!({
            "errors": [],
            "response": [{
                "fixture": {
                    "id": 1001,
                    "timestamp": 1_700_000_000,
                    "status": {"long": "Second Half", "short": "2H", "elapsed": 67, "extra": null}
                },
                "league": {"id": 39, "name": "Premier League"},
                "teams": {
                    "home": {"id": 40, "name": "Liverpool", "winner": null},
                    "away": {"id": 50, "name": "Manchester City", "winner": null}
                },
                "goals": {"home": 2, "away": 1},
                "score": {"penalty": {"home": null, "away": null}}
            }]
        })
    }

    #[tokio::test]
    async fn test_fixtures_sends_key_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures"))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(query_param("league", "39"))
            .and(query_param("from", "2024-05-13"))
            .and(query_param("to", "2024-05-19"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture_json()))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let from = NaiveDate::from_ymd_opt(2024, 5, 13).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 5, 19).unwrap();
        let fixtures = client.fixtures("39", 2024, from, to).await.unwrap();

        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].fixture.id, 1001);
        assert_eq!(fixtures[0].fixture.status.elapsed, Some(67));
        assert_eq!(fixtures[0].goals.home, Some(2));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures/events"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.fixture_events(7).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { .. }));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures/events"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert!(client.fixture_events(7).await.is_err());
    }

    #[tokio::test]
    async fn test_envelope_errors_surface_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/standings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": {"token": "Error/Missing application key"},
                "response": []
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.standings("39", 2024).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { .. }));
    }

    #[test]
    fn test_standings_table_conversion() {
        let raw: Vec<RawLeagueStandings> = serde_json::from_value(serde_json::json!([{
            "league": {
                "id": 61,
                "name": "Ligue 1",
                "standings": [[
                    {
                        "rank": 1,
                        "team": {"name": "PSG"},
                        "points": 30,
                        "goalsDiff": 18,
                        "form": "WWDWL",
                        "all": {"played": 12, "win": 9, "draw": 3, "lose": 0,
                                "goals": {"for": 28, "against": 10}}
                    },
                    {
                        "rank": 2,
                        "team": {"name": "Monaco"},
                        "points": 26,
                        "goalsDiff": -2,
                        "form": null,
                        "all": {"played": 12, "win": 8, "draw": 2, "lose": 2,
                                "goals": {"for": 20, "against": 22}}
                    }
                ]]
            }
        }]))
        .unwrap();

        let table = to_standings_table(&raw).expect("table");
        assert_eq!(table.league_id, "61");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].goals_for, 28);
        assert_eq!(table.rows[1].goals_diff, -2);
        assert!(table.rows[1].form.is_none());
    }

    #[test]
    fn test_empty_standings_response() {
        assert!(to_standings_table(&[]).is_none());
    }

    #[test]
    fn test_rate_limiter_creation() {
        let config = RateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            max_retries: 0,
            event_batch_size: 1,
            event_batch_delay_ms: 0,
        };
        let limiter = create_rate_limiter(&config);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay_ms(500, 8000, 1), 500);
        assert_eq!(backoff_delay_ms(500, 8000, 3), 2000);
        assert_eq!(backoff_delay_ms(500, 8000, 5), 8000);
        // Attempts past 64 would overflow a plain shift or pow.
        assert_eq!(backoff_delay_ms(500, 8000, 100), 8000);
        assert_eq!(backoff_delay_ms(500, u64::MAX, 200), u64::MAX);
    }
}
