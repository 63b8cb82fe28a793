//! Core domain model for ad performance insights.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-core";

/// An advertiser account connected to the upstream ads platform.
///
/// Owned by business management, which is outside this engine; the sync
/// engine only ever reads these rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub ad_account_id: String,
    pub access_token: Option<String>,
    pub is_active: bool,
}

/// Named event-count entry inside an insight record. The upstream list is
/// unordered; callers pick entries via [`extract_action_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAction {
    pub action_type: String,
    pub value: String,
}

/// Account-level single-day insight payload as returned by the upstream API.
/// Every metric arrives as a string; nothing here is trusted to be numeric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInsight {
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub reach: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub action_values: Vec<RawAction>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_stop: Option<String>,
}

/// Hour-of-day breakdown row. The breakdown label is the upstream bucket
/// string, e.g. `"05:00:00 - 05:59:59"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHourlyInsight {
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub hourly_stats_aggregated_by_advertiser_time_zone: Option<String>,
}

/// Campaign / ad-set / ad level row. Only the id/name pair for the queried
/// level is populated by upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntityInsight {
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub campaign_name: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub adset_name: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub ad_name: Option<String>,
    #[serde(default)]
    pub spend: Option<String>,
    #[serde(default)]
    pub impressions: Option<String>,
    #[serde(default)]
    pub clicks: Option<String>,
    #[serde(default)]
    pub reach: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub action_values: Vec<RawAction>,
    #[serde(default)]
    pub date_start: Option<String>,
}

/// Action-type candidate orders used when extracting event counts.
///
/// Order is a policy decision: the first candidate that matches any entry in
/// the unordered action list wins, so a specific lead type outranks the
/// generic messaging type even when both are present.
pub mod action_types {
    pub const LEAD: &str = "lead";
    pub const MESSAGING_CONVERSATIONS: &str = "messaging_conversations";
    pub const WELCOME_MESSAGE_VIEW: &str = "onsite_conversion.messaging_welcome_message_view";
    pub const VIDEO_VIEW: &str = "video_view";
    pub const VIDEO_THRUPLAY: &str = "video_thruplay";
    pub const PURCHASE: &str = "purchase";
    pub const OMNI_PURCHASE: &str = "omni_purchase";

    /// Daily lead count: specific lead events before messaging conversations.
    pub const DAILY_LEADS: &[&str] = &[LEAD, MESSAGING_CONVERSATIONS];
    /// Hourly messaging-conversation count.
    pub const HOURLY_MESSAGING: &[&str] = &[WELCOME_MESSAGE_VIEW];
    /// Purchase revenue, read from `action_values`.
    pub const REVENUE: &[&str] = &[PURCHASE, OMNI_PURCHASE];
}

/// Parses a stringly numeric field to `f64`. Missing, empty, or non-numeric
/// input yields 0; the result is always finite.
pub fn parse_f64(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parses a stringly count to `i64`. Decimal strings truncate toward zero
/// ("12.5" -> 12); missing or non-numeric input yields 0.
pub fn parse_i64(raw: Option<&str>) -> i64 {
    let Some(s) = raw else { return 0 };
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return v;
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
        .unwrap_or(0)
}

/// Scans the unordered action list for the first entry matching any of
/// `candidates`, tried in the caller-specified priority order. Returns 0
/// when none match.
pub fn extract_action_value(actions: &[RawAction], candidates: &[&str]) -> i64 {
    for candidate in candidates {
        if let Some(action) = actions.iter().find(|a| a.action_type == *candidate) {
            return parse_i64(Some(&action.value));
        }
    }
    0
}

/// Same precedence scan, but parsed as a monetary value.
pub fn extract_action_amount(actions: &[RawAction], candidates: &[&str]) -> f64 {
    for candidate in candidates {
        if let Some(action) = actions.iter().find(|a| a.action_type == *candidate) {
            return parse_f64(Some(&action.value));
        }
    }
    0.0
}

/// Numeric counters converted from a raw payload at the API boundary.
/// Strings never travel past this point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightCounters {
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub reach: i64,
    pub frequency: f64,
    pub leads: i64,
    pub video_views: i64,
    pub thru_plays: i64,
    pub revenue: f64,
}

impl InsightCounters {
    pub fn from_raw(raw: &RawInsight) -> Self {
        Self {
            spend: parse_f64(raw.spend.as_deref()),
            impressions: parse_i64(raw.impressions.as_deref()),
            clicks: parse_i64(raw.clicks.as_deref()),
            reach: parse_i64(raw.reach.as_deref()),
            frequency: parse_f64(raw.frequency.as_deref()),
            leads: extract_action_value(&raw.actions, action_types::DAILY_LEADS),
            video_views: extract_action_value(&raw.actions, &[action_types::VIDEO_VIEW]),
            thru_plays: extract_action_value(&raw.actions, &[action_types::VIDEO_THRUPLAY]),
            revenue: extract_action_amount(&raw.action_values, action_types::REVENUE),
        }
    }

    pub fn from_entity(raw: &RawEntityInsight) -> Self {
        Self {
            spend: parse_f64(raw.spend.as_deref()),
            impressions: parse_i64(raw.impressions.as_deref()),
            clicks: parse_i64(raw.clicks.as_deref()),
            reach: parse_i64(raw.reach.as_deref()),
            frequency: parse_f64(raw.frequency.as_deref()),
            leads: extract_action_value(&raw.actions, action_types::DAILY_LEADS),
            video_views: extract_action_value(&raw.actions, &[action_types::VIDEO_VIEW]),
            thru_plays: extract_action_value(&raw.actions, &[action_types::VIDEO_THRUPLAY]),
            revenue: extract_action_amount(&raw.action_values, action_types::REVENUE),
        }
    }
}

/// Ratio metrics recomputed from raw counters at write time. Every division
/// is zero-guarded; no field is ever NaN or infinite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub ctr: f64,
    pub cpc: f64,
    pub cpl: f64,
    pub cpm: f64,
    pub hook_rate: f64,
    pub hold_rate: f64,
    pub roas: f64,
}

impl DerivedMetrics {
    pub fn from_counters(c: &InsightCounters) -> Self {
        let impressions = c.impressions as f64;
        let clicks = c.clicks as f64;
        let leads = c.leads as f64;
        Self {
            ctr: if c.impressions > 0 { clicks / impressions * 100.0 } else { 0.0 },
            cpc: if c.clicks > 0 { c.spend / clicks } else { 0.0 },
            cpl: if c.leads > 0 { c.spend / leads } else { 0.0 },
            cpm: if c.impressions > 0 { c.spend / impressions * 1000.0 } else { 0.0 },
            hook_rate: if c.impressions > 0 {
                c.video_views as f64 / impressions * 100.0
            } else {
                0.0
            },
            hold_rate: if c.impressions > 0 {
                c.thru_plays as f64 / impressions * 100.0
            } else {
                0.0
            },
            roas: if c.spend > 0.0 { c.revenue / c.spend } else { 0.0 },
        }
    }
}

/// Strips time-of-day so every instant within the same UTC calendar day
/// yields the same storage key.
pub fn normalize_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

/// Parses an upstream `date_start` string (`YYYY-MM-DD`) to a day key.
pub fn parse_date_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Extracts the leading hour from an `"HH:MM:SS - HH:MM:SS"` bucket label.
/// Returns `None` for anything outside 0..=23 or malformed labels.
pub fn parse_hour_bucket(label: &str) -> Option<u32> {
    let hour: u32 = label.split(':').next()?.trim().parse().ok()?;
    (hour <= 23).then_some(hour)
}

/// Which entity level a daily insight row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Campaign,
    AdSet,
    Ad,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Campaign => "campaign",
            EntityKind::AdSet => "adset",
            EntityKind::Ad => "ad",
        }
    }
}

/// Account-level daily row, natural key `(business_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDailyInsight {
    pub business_id: Uuid,
    pub date: NaiveDate,
    pub counters: InsightCounters,
    pub derived: DerivedMetrics,
}

impl AccountDailyInsight {
    /// Builds the stored row from a raw payload; derived fields are a pure
    /// function of the raw counters at this moment.
    pub fn from_raw(business_id: Uuid, date: NaiveDate, raw: &RawInsight) -> Self {
        let counters = InsightCounters::from_raw(raw);
        Self {
            business_id,
            date,
            derived: DerivedMetrics::from_counters(&counters),
            counters,
        }
    }
}

/// Campaign/ad-set/ad daily row, natural key `(entity_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDailyInsight {
    pub business_id: Uuid,
    pub entity_id: String,
    pub entity_name: String,
    pub date: NaiveDate,
    pub counters: InsightCounters,
    pub derived: DerivedMetrics,
}

impl EntityDailyInsight {
    /// Builds an entity row from a level-query payload. Returns `None` when
    /// upstream omitted the id for the requested level.
    pub fn from_raw(
        business_id: Uuid,
        kind: EntityKind,
        date: NaiveDate,
        raw: &RawEntityInsight,
    ) -> Option<Self> {
        let (id, name) = match kind {
            EntityKind::Campaign => (raw.campaign_id.as_deref(), raw.campaign_name.as_deref()),
            EntityKind::AdSet => (raw.adset_id.as_deref(), raw.adset_name.as_deref()),
            EntityKind::Ad => (raw.ad_id.as_deref(), raw.ad_name.as_deref()),
        };
        let entity_id = id?.to_string();
        let counters = InsightCounters::from_entity(raw);
        Some(Self {
            business_id,
            entity_id,
            entity_name: name.unwrap_or_default().to_string(),
            date,
            derived: DerivedMetrics::from_counters(&counters),
            counters,
        })
    }
}

/// Hour-of-day row, natural key `(business_id, date, hour)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyStat {
    pub business_id: Uuid,
    pub date: NaiveDate,
    pub hour: u32,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub messaging_conversations: i64,
}

impl HourlyStat {
    /// Builds an hourly row from a breakdown payload. Returns `None` when the
    /// hour label or day key cannot be parsed; such rows are dropped rather
    /// than failing the page.
    pub fn from_raw(business_id: Uuid, raw: &RawHourlyInsight) -> Option<Self> {
        let hour = parse_hour_bucket(
            raw.hourly_stats_aggregated_by_advertiser_time_zone
                .as_deref()?,
        )?;
        let date = parse_date_key(raw.date_start.as_deref()?)?;
        Some(Self {
            business_id,
            date,
            hour,
            spend: parse_f64(raw.spend.as_deref()),
            impressions: parse_i64(raw.impressions.as_deref()),
            clicks: parse_i64(raw.clicks.as_deref()),
            messaging_conversations: extract_action_value(
                &raw.actions,
                action_types::HOURLY_MESSAGING,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn action(action_type: &str, value: &str) -> RawAction {
        RawAction {
            action_type: action_type.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn parse_f64_defaults_to_zero() {
        assert_eq!(parse_f64(None), 0.0);
        assert_eq!(parse_f64(Some("")), 0.0);
        assert_eq!(parse_f64(Some("abc")), 0.0);
        assert_eq!(parse_f64(Some("12.5")), 12.5);
        assert_eq!(parse_f64(Some(" 150.5 ")), 150.5);
        assert_eq!(parse_f64(Some("inf")), 0.0);
    }

    #[test]
    fn parse_i64_truncates_decimals() {
        assert_eq!(parse_i64(None), 0);
        assert_eq!(parse_i64(Some("10000")), 10000);
        assert_eq!(parse_i64(Some("12.5")), 12);
        assert_eq!(parse_i64(Some("nope")), 0);
    }

    #[test]
    fn action_extraction_follows_candidate_order() {
        let actions = vec![
            action("lead", "3"),
            action("messaging_conversations", "5"),
        ];
        assert_eq!(
            extract_action_value(&actions, &["lead", "messaging_conversations"]),
            3
        );
        // Reversing the candidate order flips the winner.
        assert_eq!(
            extract_action_value(&actions, &["messaging_conversations", "lead"]),
            5
        );
        assert_eq!(extract_action_value(&actions, &["purchase"]), 0);
    }

    #[test]
    fn action_extraction_scans_unordered_lists() {
        let actions = vec![
            action("messaging_conversations", "5"),
            action("video_view", "900"),
            action("lead", "3"),
        ];
        assert_eq!(extract_action_value(&actions, action_types::DAILY_LEADS), 3);
    }

    #[test]
    fn derived_metrics_are_zero_guarded() {
        let counters = InsightCounters {
            spend: 100.0,
            ..Default::default()
        };
        let derived = DerivedMetrics::from_counters(&counters);
        assert_eq!(derived.ctr, 0.0);
        assert_eq!(derived.cpc, 0.0);
        assert_eq!(derived.cpl, 0.0);
        assert_eq!(derived.cpm, 0.0);
        assert_eq!(derived.hook_rate, 0.0);
        assert_eq!(derived.hold_rate, 0.0);
        assert!(derived.roas.is_finite());
    }

    #[test]
    fn derived_metrics_match_counters() {
        let raw = RawInsight {
            spend: Some("150.5".into()),
            impressions: Some("10000".into()),
            clicks: Some("200".into()),
            actions: vec![action("lead", "4")],
            ..Default::default()
        };
        let counters = InsightCounters::from_raw(&raw);
        assert_eq!(counters.leads, 4);
        let derived = DerivedMetrics::from_counters(&counters);
        assert_eq!(derived.cpc, 0.7525);
        assert_eq!(derived.cpl, 37.625);
        assert_eq!(derived.ctr, 2.0);
        assert_eq!(derived.cpm, 15.05);
    }

    #[test]
    fn hour_bucket_parsing() {
        assert_eq!(parse_hour_bucket("05:00:00 - 05:59:59"), Some(5));
        assert_eq!(parse_hour_bucket("23:00:00 - 23:59:59"), Some(23));
        assert_eq!(parse_hour_bucket("0:00:00 - 0:59:59"), Some(0));
        assert_eq!(parse_hour_bucket("24:00:00 - 24:59:59"), None);
        assert_eq!(parse_hour_bucket("garbage"), None);
    }

    #[test]
    fn normalize_date_is_stable_within_a_day() {
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).single().unwrap();
        let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).single().unwrap();
        let next = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).single().unwrap();
        assert_eq!(normalize_date(morning), normalize_date(night));
        assert_ne!(normalize_date(night), normalize_date(next));
    }

    #[test]
    fn hourly_row_drops_malformed_labels() {
        let ok = RawHourlyInsight {
            spend: Some("10".into()),
            impressions: Some("100".into()),
            clicks: Some("5".into()),
            date_start: Some("2024-05-01".into()),
            hourly_stats_aggregated_by_advertiser_time_zone: Some("05:00:00 - 05:59:59".into()),
            actions: vec![action(action_types::WELCOME_MESSAGE_VIEW, "2")],
        };
        let business_id = Uuid::new_v4();
        let stat = HourlyStat::from_raw(business_id, &ok).unwrap();
        assert_eq!(stat.hour, 5);
        assert_eq!(stat.messaging_conversations, 2);

        let bad_label = RawHourlyInsight {
            hourly_stats_aggregated_by_advertiser_time_zone: Some("??".into()),
            date_start: Some("2024-05-01".into()),
            ..ok.clone()
        };
        assert!(HourlyStat::from_raw(business_id, &bad_label).is_none());

        let bad_date = RawHourlyInsight {
            date_start: Some("yesterday".into()),
            ..ok
        };
        assert!(HourlyStat::from_raw(business_id, &bad_date).is_none());
    }

    #[test]
    fn entity_row_requires_the_level_id() {
        let raw = RawEntityInsight {
            campaign_id: Some("c1".into()),
            campaign_name: Some("Launch".into()),
            spend: Some("50".into()),
            impressions: Some("1000".into()),
            clicks: Some("20".into()),
            ..Default::default()
        };
        let business_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let row = EntityDailyInsight::from_raw(business_id, EntityKind::Campaign, date, &raw)
            .expect("campaign id present");
        assert_eq!(row.entity_id, "c1");
        assert_eq!(row.derived.ctr, 2.0);
        assert!(EntityDailyInsight::from_raw(business_id, EntityKind::Ad, date, &raw).is_none());
    }
}
