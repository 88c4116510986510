//! In-memory analytics store for tests and standalone development

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::analytics::{AnalyticsStore, CustomerScore, DailyKpis};
use crate::error::Result;

#[derive(Default)]
struct Counters {
    revenue_cents: i64,
    order_count: i64,
    refund_count: i64,
    refund_amount_cents: i64,
}

#[derive(Default)]
struct MemAnalyticsState {
    days: HashMap<NaiveDate, Counters>,
    leaderboard: HashMap<i64, i64>,
}

#[derive(Default)]
pub struct MemoryAnalytics {
    state: Mutex<MemAnalyticsState>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalytics {
    async fn track_finalized(
        &self,
        day: NaiveDate,
        customer_id: i64,
        total_cents: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let counters = state.days.entry(day).or_default();
        counters.revenue_cents += total_cents;
        counters.order_count += 1;
        *state.leaderboard.entry(customer_id).or_default() += total_cents;
        Ok(())
    }

    async fn track_refund(
        &self,
        day: NaiveDate,
        customer_id: i64,
        amount_cents: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let counters = state.days.entry(day).or_default();
        counters.revenue_cents -= amount_cents;
        counters.refund_count += 1;
        counters.refund_amount_cents += amount_cents;
        *state.leaderboard.entry(customer_id).or_default() -= amount_cents;
        Ok(())
    }

    async fn daily_kpis(&self, day: NaiveDate) -> Result<DailyKpis> {
        let state = self.state.lock().await;
        let counters = state.days.get(&day);
        Ok(match counters {
            Some(c) => DailyKpis::from_counters(
                c.revenue_cents,
                c.order_count,
                c.refund_count,
                c.refund_amount_cents,
            ),
            None => DailyKpis::default(),
        })
    }

    async fn top_customers(&self, limit: usize) -> Result<Vec<CustomerScore>> {
        let state = self.state.lock().await;
        let mut scores: Vec<CustomerScore> = state
            .leaderboard
            .iter()
            .map(|(&customer_id, &score_cents)| CustomerScore {
                customer_id,
                score_cents,
            })
            .collect();
        scores.sort_by(|a, b| {
            b.score_cents
                .cmp(&a.score_cents)
                .then(a.customer_id.cmp(&b.customer_id))
        });
        scores.truncate(limit);
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    #[tokio::test]
    async fn finalize_then_refund_balances_out() {
        let analytics = MemoryAnalytics::new();
        analytics.track_finalized(day(1), 5, 10_000).await.unwrap();
        analytics.track_finalized(day(1), 6, 2_000).await.unwrap();
        analytics.track_refund(day(1), 5, 4_000).await.unwrap();

        let kpis = analytics.daily_kpis(day(1)).await.unwrap();
        assert_eq!(kpis.revenue_cents, 8_000);
        assert_eq!(kpis.order_count, 2);
        assert_eq!(kpis.refund_count, 1);
        assert_eq!(kpis.refund_amount_cents, 4_000);
        // Gross AOV: (8000 + 4000) / 2
        assert_eq!(kpis.average_order_value_cents, 6_000);
    }

    #[tokio::test]
    async fn refund_lands_on_processing_day() {
        let analytics = MemoryAnalytics::new();
        analytics.track_finalized(day(1), 5, 10_000).await.unwrap();
        analytics.track_refund(day(2), 5, 10_000).await.unwrap();

        assert_eq!(
            analytics.daily_kpis(day(1)).await.unwrap().revenue_cents,
            10_000
        );
        let later = analytics.daily_kpis(day(2)).await.unwrap();
        assert_eq!(later.revenue_cents, -10_000);
        assert_eq!(later.refund_amount_cents, 10_000);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_score() {
        let analytics = MemoryAnalytics::new();
        analytics.track_finalized(day(1), 1, 500).await.unwrap();
        analytics.track_finalized(day(1), 2, 900).await.unwrap();
        analytics.track_finalized(day(1), 3, 700).await.unwrap();
        analytics.track_refund(day(1), 2, 600).await.unwrap();

        let top = analytics.top_customers(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].customer_id, 3);
        assert_eq!(top[0].score_cents, 700);
        assert_eq!(top[1].customer_id, 1);
    }
}
