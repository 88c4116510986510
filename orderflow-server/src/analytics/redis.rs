//! Redis-backed analytics store

use async_trait::async_trait;
use chrono::NaiveDate;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::analytics::{AnalyticsStore, CustomerScore, DailyKpis, LEADERBOARD_KEY, kpi_key};
use crate::error::Result;

/// Daily KPI keys expire after 90 days, refreshed on every write.
const KPI_TTL_SECS: i64 = 60 * 60 * 24 * 90;

pub struct RedisAnalytics {
    conn: ConnectionManager,
}

impl RedisAnalytics {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AnalyticsStore for RedisAnalytics {
    async fn track_finalized(
        &self,
        day: NaiveDate,
        customer_id: i64,
        total_cents: i64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = kpi_key(day);

        let _: () = conn.hincr(&key, "revenue_cents", total_cents).await?;
        let _: () = conn.hincr(&key, "order_count", 1_i64).await?;
        let _: () = conn.expire(&key, KPI_TTL_SECS).await?;

        let _: () = conn
            .zincr(LEADERBOARD_KEY, customer_id.to_string(), total_cents)
            .await?;
        Ok(())
    }

    async fn track_refund(
        &self,
        day: NaiveDate,
        customer_id: i64,
        amount_cents: i64,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = kpi_key(day);

        let _: () = conn.hincr(&key, "revenue_cents", -amount_cents).await?;
        let _: () = conn.hincr(&key, "refund_count", 1_i64).await?;
        let _: () = conn
            .hincr(&key, "refund_amount_cents", amount_cents)
            .await?;
        let _: () = conn.expire(&key, KPI_TTL_SECS).await?;

        let _: () = conn
            .zincr(LEADERBOARD_KEY, customer_id.to_string(), -amount_cents)
            .await?;
        Ok(())
    }

    async fn daily_kpis(&self, day: NaiveDate) -> Result<DailyKpis> {
        let mut conn = self.conn.clone();
        let counters: std::collections::HashMap<String, i64> =
            conn.hgetall(kpi_key(day)).await?;

        let get = |field: &str| counters.get(field).copied().unwrap_or(0);
        Ok(DailyKpis::from_counters(
            get("revenue_cents"),
            get("order_count"),
            get("refund_count"),
            get("refund_amount_cents"),
        ))
    }

    async fn top_customers(&self, limit: usize) -> Result<Vec<CustomerScore>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let entries: Vec<(String, i64)> = conn
            .zrevrange_withscores(LEADERBOARD_KEY, 0, limit as isize - 1)
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|(member, score_cents)| {
                member.parse().ok().map(|customer_id| CustomerScore {
                    customer_id,
                    score_cents,
                })
            })
            .collect())
    }
}
