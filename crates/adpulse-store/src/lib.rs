//! Postgres persistence for insight rows: natural-key upserts behind an
//! injected store handle.

use adpulse_core::{AccountDailyInsight, Business, EntityDailyInsight, EntityKind, HourlyStat};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "adpulse-store";

/// Settings key gating the scheduled daily sync.
pub const AUTO_SYNC_SETTING: &str = "auto_sync_enabled";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database failure: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failure: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistence surface consumed by the orchestrator. Upserts are keyed by
/// each row's natural key; repeated writes for the same key update the same
/// row in place.
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn list_active_businesses(&self) -> Result<Vec<Business>, StoreError>;
    async fn get_business(&self, id: Uuid) -> Result<Option<Business>, StoreError>;
    async fn upsert_account_daily(&self, row: &AccountDailyInsight) -> Result<(), StoreError>;
    async fn upsert_entity_daily(
        &self,
        kind: EntityKind,
        row: &EntityDailyInsight,
    ) -> Result<(), StoreError>;
    /// Persists one fetched hourly page in a single transaction: either every
    /// row lands or none do.
    async fn replace_hourly_page(&self, rows: &[HourlyStat]) -> Result<(), StoreError>;
    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Interprets a stored boolean-ish setting value. Unset defaults to enabled.
pub fn setting_is_enabled(value: Option<&str>) -> bool {
    match value {
        Some(v) => v == "true",
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct PgInsightStore {
    pool: PgPool,
}

impl PgInsightStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn business_from_row(row: &sqlx::postgres::PgRow) -> Result<Business, sqlx::Error> {
    Ok(Business {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        ad_account_id: row.try_get("ad_account_id")?,
        access_token: row.try_get("access_token")?,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl InsightStore for PgInsightStore {
    async fn list_active_businesses(&self) -> Result<Vec<Business>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, ad_account_id, access_token, is_active
              FROM businesses
             WHERE is_active = TRUE
             ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(business_from_row(&row)?);
        }
        Ok(out)
    }

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, ad_account_id, access_token, is_active
              FROM businesses
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(business_from_row(&row)?),
            None => None,
        })
    }

    async fn upsert_account_daily(&self, row: &AccountDailyInsight) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO daily_insights (
                business_id, date,
                spend, impressions, clicks, reach, frequency,
                leads, video_views, thru_plays, revenue,
                ctr, cpc, cpl, cpm, hook_rate, hold_rate, roas, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, NOW())
            ON CONFLICT (business_id, date) DO UPDATE SET
                spend = EXCLUDED.spend,
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks,
                reach = EXCLUDED.reach,
                frequency = EXCLUDED.frequency,
                leads = EXCLUDED.leads,
                video_views = EXCLUDED.video_views,
                thru_plays = EXCLUDED.thru_plays,
                revenue = EXCLUDED.revenue,
                ctr = EXCLUDED.ctr,
                cpc = EXCLUDED.cpc,
                cpl = EXCLUDED.cpl,
                cpm = EXCLUDED.cpm,
                hook_rate = EXCLUDED.hook_rate,
                hold_rate = EXCLUDED.hold_rate,
                roas = EXCLUDED.roas,
                updated_at = NOW()
            "#,
        )
        .bind(row.business_id)
        .bind(row.date)
        .bind(row.counters.spend)
        .bind(row.counters.impressions)
        .bind(row.counters.clicks)
        .bind(row.counters.reach)
        .bind(row.counters.frequency)
        .bind(row.counters.leads)
        .bind(row.counters.video_views)
        .bind(row.counters.thru_plays)
        .bind(row.counters.revenue)
        .bind(row.derived.ctr)
        .bind(row.derived.cpc)
        .bind(row.derived.cpl)
        .bind(row.derived.cpm)
        .bind(row.derived.hook_rate)
        .bind(row.derived.hold_rate)
        .bind(row.derived.roas)
        .execute(&self.pool)
        .await?;
        debug!(business_id = %row.business_id, date = %row.date, "upserted account daily row");
        Ok(())
    }

    async fn upsert_entity_daily(
        &self,
        kind: EntityKind,
        row: &EntityDailyInsight,
    ) -> Result<(), StoreError> {
        // Table and id column are fixed per level; only binds are dynamic.
        let sql = match kind {
            EntityKind::Campaign => ENTITY_UPSERT_CAMPAIGN,
            EntityKind::AdSet => ENTITY_UPSERT_ADSET,
            EntityKind::Ad => ENTITY_UPSERT_AD,
        };
        sqlx::query(sql)
            .bind(row.business_id)
            .bind(&row.entity_id)
            .bind(&row.entity_name)
            .bind(row.date)
            .bind(row.counters.spend)
            .bind(row.counters.impressions)
            .bind(row.counters.clicks)
            .bind(row.counters.reach)
            .bind(row.counters.frequency)
            .bind(row.counters.leads)
            .bind(row.counters.video_views)
            .bind(row.counters.thru_plays)
            .bind(row.counters.revenue)
            .bind(row.derived.ctr)
            .bind(row.derived.cpc)
            .bind(row.derived.cpl)
            .bind(row.derived.cpm)
            .bind(row.derived.hook_rate)
            .bind(row.derived.hold_rate)
            .bind(row.derived.roas)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_hourly_page(&self, rows: &[HourlyStat]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO hourly_stats (
                    business_id, date, hour,
                    spend, impressions, clicks, messaging_conversations, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (business_id, date, hour) DO UPDATE SET
                    spend = EXCLUDED.spend,
                    impressions = EXCLUDED.impressions,
                    clicks = EXCLUDED.clicks,
                    messaging_conversations = EXCLUDED.messaging_conversations,
                    updated_at = NOW()
                "#,
            )
            .bind(row.business_id)
            .bind(row.date)
            .bind(row.hour as i32)
            .bind(row.spend)
            .bind(row.impressions)
            .bind(row.clicks)
            .bind(row.messaging_conversations)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(rows = rows.len(), "committed hourly page");
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(r#"SELECT value FROM system_settings WHERE key = $1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("value")?),
            None => None,
        })
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const ENTITY_UPSERT_CAMPAIGN: &str = r#"
    INSERT INTO campaign_daily_insights (
        business_id, campaign_id, campaign_name, date,
        spend, impressions, clicks, reach, frequency,
        leads, video_views, thru_plays, revenue,
        ctr, cpc, cpl, cpm, hook_rate, hold_rate, roas, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, NOW())
    ON CONFLICT (campaign_id, date) DO UPDATE SET
        campaign_name = EXCLUDED.campaign_name,
        spend = EXCLUDED.spend,
        impressions = EXCLUDED.impressions,
        clicks = EXCLUDED.clicks,
        reach = EXCLUDED.reach,
        frequency = EXCLUDED.frequency,
        leads = EXCLUDED.leads,
        video_views = EXCLUDED.video_views,
        thru_plays = EXCLUDED.thru_plays,
        revenue = EXCLUDED.revenue,
        ctr = EXCLUDED.ctr,
        cpc = EXCLUDED.cpc,
        cpl = EXCLUDED.cpl,
        cpm = EXCLUDED.cpm,
        hook_rate = EXCLUDED.hook_rate,
        hold_rate = EXCLUDED.hold_rate,
        roas = EXCLUDED.roas,
        updated_at = NOW()
"#;

const ENTITY_UPSERT_ADSET: &str = r#"
    INSERT INTO adset_daily_insights (
        business_id, adset_id, adset_name, date,
        spend, impressions, clicks, reach, frequency,
        leads, video_views, thru_plays, revenue,
        ctr, cpc, cpl, cpm, hook_rate, hold_rate, roas, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, NOW())
    ON CONFLICT (adset_id, date) DO UPDATE SET
        adset_name = EXCLUDED.adset_name,
        spend = EXCLUDED.spend,
        impressions = EXCLUDED.impressions,
        clicks = EXCLUDED.clicks,
        reach = EXCLUDED.reach,
        frequency = EXCLUDED.frequency,
        leads = EXCLUDED.leads,
        video_views = EXCLUDED.video_views,
        thru_plays = EXCLUDED.thru_plays,
        revenue = EXCLUDED.revenue,
        ctr = EXCLUDED.ctr,
        cpc = EXCLUDED.cpc,
        cpl = EXCLUDED.cpl,
        cpm = EXCLUDED.cpm,
        hook_rate = EXCLUDED.hook_rate,
        hold_rate = EXCLUDED.hold_rate,
        roas = EXCLUDED.roas,
        updated_at = NOW()
"#;

const ENTITY_UPSERT_AD: &str = r#"
    INSERT INTO ad_daily_insights (
        business_id, ad_id, ad_name, date,
        spend, impressions, clicks, reach, frequency,
        leads, video_views, thru_plays, revenue,
        ctr, cpc, cpl, cpm, hook_rate, hold_rate, roas, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, NOW())
    ON CONFLICT (ad_id, date) DO UPDATE SET
        ad_name = EXCLUDED.ad_name,
        spend = EXCLUDED.spend,
        impressions = EXCLUDED.impressions,
        clicks = EXCLUDED.clicks,
        reach = EXCLUDED.reach,
        frequency = EXCLUDED.frequency,
        leads = EXCLUDED.leads,
        video_views = EXCLUDED.video_views,
        thru_plays = EXCLUDED.thru_plays,
        revenue = EXCLUDED.revenue,
        ctr = EXCLUDED.ctr,
        cpc = EXCLUDED.cpc,
        cpl = EXCLUDED.cpl,
        cpm = EXCLUDED.cpm,
        hook_rate = EXCLUDED.hook_rate,
        hold_rate = EXCLUDED.hold_rate,
        roas = EXCLUDED.roas,
        updated_at = NOW()
"#;
