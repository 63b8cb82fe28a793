//! Upstream insights API client: paced HTTP fetches + typed failure surface.

use std::sync::Arc;
use std::time::Duration;

use adpulse_core::{EntityKind, RawEntityInsight, RawHourlyInsight, RawInsight};
use anyhow::Context;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const CRATE_NAME: &str = "adpulse-client";

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";

const ACCOUNT_FIELDS: &str = "spend,impressions,clicks,reach,frequency,actions,action_values";
const HOURLY_FIELDS: &str = "spend,impressions,clicks,actions";
const HOURLY_BREAKDOWN: &str = "hourly_stats_aggregated_by_advertiser_time_zone";
const PAGE_LIMIT: &str = "500";

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("upstream transport failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream api error: {message}")]
    Upstream { message: String },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Date selector for insight queries: a named upstream preset or an explicit
/// inclusive day range. Both shapes are first-class; callers pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateWindow {
    Preset(String),
    Range { since: NaiveDate, until: NaiveDate },
}

impl DateWindow {
    pub fn single_day(date: NaiveDate) -> Self {
        Self::Range {
            since: date,
            until: date,
        }
    }

    fn query_pair(&self) -> (&'static str, String) {
        match self {
            DateWindow::Preset(preset) => ("date_preset", preset.clone()),
            DateWindow::Range { since, until } => (
                "time_range",
                format!("{{'since':'{since}','until':'{until}'}}"),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        // One request per 300ms matches the upstream rate-limit spacing.
        Self {
            capacity: 1,
            refill_every: Duration::from_millis(300),
        }
    }
}

/// Token bucket consulted before every upstream request. Injected into the
/// client so pacing is tunable independently of orchestration.
#[derive(Debug)]
pub struct RequestPacer {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<PacerState>,
}

#[derive(Debug, Clone, Copy)]
struct PacerState {
    tokens: u32,
    last_refill: Instant,
}

impl RequestPacer {
    pub fn new(config: PacerConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            refill_every: config.refill_every,
            state: Mutex::new(PacerState {
                tokens: config.capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub pacer: Option<PacerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            pacer: Some(PacerConfig::default()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
    #[serde(default)]
    error: Option<ApiErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorPayload {
    message: String,
}

/// Thin wrapper over the upstream insights endpoints. Performs no retries;
/// retry policy, if any, belongs to the caller.
#[derive(Debug)]
pub struct RemoteInsightsClient {
    http: reqwest::Client,
    base_url: String,
    pacer: Option<Arc<RequestPacer>>,
}

impl RemoteInsightsClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let http = builder.build().context("building reqwest client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pacer: config.pacer.map(|c| Arc::new(RequestPacer::new(c))),
        })
    }

    /// Single-day account-level insights. `Ok(None)` means upstream reported
    /// zero rows for the day, a valid no-activity outcome.
    pub async fn account_insights(
        &self,
        account_id: &str,
        date: NaiveDate,
        token: &str,
    ) -> Result<Option<RawInsight>, InsightsError> {
        let window = DateWindow::single_day(date);
        let (window_key, window_value) = window.query_pair();
        let rows: Vec<RawInsight> = self
            .fetch(
                account_id,
                &[
                    (window_key, window_value.as_str()),
                    ("level", "account"),
                    ("fields", ACCOUNT_FIELDS),
                    ("access_token", token),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Hour-of-day breakdown for a preset or explicit range. The result may
    /// be sparse: hours with zero activity are absent entirely.
    pub async fn hourly_insights(
        &self,
        account_id: &str,
        window: &DateWindow,
        token: &str,
    ) -> Result<Vec<RawHourlyInsight>, InsightsError> {
        let (window_key, window_value) = window.query_pair();
        self.fetch(
            account_id,
            &[
                (window_key, window_value.as_str()),
                ("level", "account"),
                ("fields", HOURLY_FIELDS),
                ("breakdowns", HOURLY_BREAKDOWN),
                ("limit", PAGE_LIMIT),
                ("access_token", token),
            ],
        )
        .await
    }

    /// Single-day campaign/ad-set/ad level insights, one row per entity
    /// active that day.
    pub async fn level_insights(
        &self,
        account_id: &str,
        level: EntityKind,
        date: NaiveDate,
        token: &str,
    ) -> Result<Vec<RawEntityInsight>, InsightsError> {
        let window = DateWindow::single_day(date);
        let (window_key, window_value) = window.query_pair();
        let fields = format!(
            "{id_field},{name_field},{ACCOUNT_FIELDS}",
            id_field = level_id_field(level),
            name_field = level_name_field(level),
        );
        self.fetch(
            account_id,
            &[
                (window_key, window_value.as_str()),
                ("level", level.as_str()),
                ("fields", fields.as_str()),
                ("limit", PAGE_LIMIT),
                ("access_token", token),
            ],
        )
        .await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        account_id: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, InsightsError> {
        if let Some(pacer) = &self.pacer {
            pacer.take().await;
        }

        let url = format!("{}/{}/insights", self.base_url, account_id);
        debug!(account_id, url = %url, "fetching upstream insights");

        let body = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await?
            .text()
            .await?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
        if let Some(error) = envelope.error {
            return Err(InsightsError::Upstream {
                message: error.message,
            });
        }
        Ok(envelope.data)
    }
}

fn level_id_field(level: EntityKind) -> &'static str {
    match level {
        EntityKind::Campaign => "campaign_id",
        EntityKind::AdSet => "adset_id",
        EntityKind::Ad => "ad_id",
    }
}

fn level_name_field(level: EntityKind) -> &'static str {
    match level {
        EntityKind::Campaign => "campaign_name",
        EntityKind::AdSet => "adset_name",
        EntityKind::Ad => "ad_name",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RemoteInsightsClient {
        RemoteInsightsClient::new(ClientConfig {
            base_url: server.uri(),
            pacer: None,
            ..Default::default()
        })
        .expect("client")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn account_insights_parses_single_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param("level", "account"))
            .and(query_param(
                "time_range",
                "{'since':'2024-05-01','until':'2024-05-01'}",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "spend": "150.5",
                    "impressions": "10000",
                    "clicks": "200",
                    "actions": [{"action_type": "lead", "value": "4"}],
                    "date_start": "2024-05-01",
                    "date_stop": "2024-05-01"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let insight = client
            .account_insights("act_1", day(), "token")
            .await
            .expect("fetch")
            .expect("one row");
        assert_eq!(insight.spend.as_deref(), Some("150.5"));
        assert_eq!(insight.actions.len(), 1);
    }

    #[tokio::test]
    async fn empty_data_is_none_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let insight = client
            .account_insights("act_1", day(), "token")
            .await
            .expect("fetch");
        assert!(insight.is_none());
    }

    #[tokio::test]
    async fn error_payload_surfaces_upstream_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"message": "Invalid OAuth access token."}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .account_insights("act_1", day(), "bad-token")
            .await
            .expect_err("error payload");
        match err {
            InsightsError::Upstream { message } => {
                assert_eq!(message, "Invalid OAuth access token.")
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hourly_result_may_be_sparse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param("breakdowns", HOURLY_BREAKDOWN))
            .and(query_param("date_preset", "today"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {
                        "spend": "3.2",
                        "impressions": "410",
                        "clicks": "9",
                        "date_start": "2024-05-01",
                        "hourly_stats_aggregated_by_advertiser_time_zone": "05:00:00 - 05:59:59"
                    },
                    {
                        "spend": "1.1",
                        "impressions": "120",
                        "clicks": "2",
                        "date_start": "2024-05-01",
                        "hourly_stats_aggregated_by_advertiser_time_zone": "23:00:00 - 23:59:59"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rows = client
            .hourly_insights("act_1", &DateWindow::Preset("today".into()), "token")
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn level_insights_requests_entity_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param("level", "campaign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "campaign_id": "c1",
                    "campaign_name": "Launch",
                    "spend": "50",
                    "impressions": "1000",
                    "clicks": "20",
                    "date_start": "2024-05-01"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rows = client
            .level_insights("act_1", EntityKind::Campaign, day(), "token")
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].campaign_id.as_deref(), Some("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_consecutive_takes() {
        let pacer = RequestPacer::new(PacerConfig {
            capacity: 1,
            refill_every: Duration::from_millis(300),
        });
        let started = tokio::time::Instant::now();
        pacer.take().await;
        pacer.take().await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
