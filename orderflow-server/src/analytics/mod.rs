//! Analytics aggregates
//!
//! Two independent aggregates kept outside the relational store: daily KPI
//! counters (`kpi:daily:<date>` hash) and a customer lifetime-revenue
//! leaderboard (`leaderboard:customers` sorted set). Updates are atomic
//! counter increments; consistency with relational state is eventual — a
//! crash between the relational commit and the aggregate update leaves the
//! aggregate stale, and no reconciliation sweep exists.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;

/// KPI counters for one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyKpis {
    pub revenue_cents: i64,
    pub order_count: i64,
    pub refund_count: i64,
    pub refund_amount_cents: i64,
    /// Gross average order value: stored revenue already had refunds
    /// subtracted, so the refund amount is added back before dividing.
    pub average_order_value_cents: i64,
}

impl DailyKpis {
    pub fn from_counters(
        revenue_cents: i64,
        order_count: i64,
        refund_count: i64,
        refund_amount_cents: i64,
    ) -> Self {
        let average_order_value_cents = if order_count > 0 {
            (revenue_cents + refund_amount_cents) / order_count
        } else {
            0
        };
        Self {
            revenue_cents,
            order_count,
            refund_count,
            refund_amount_cents,
            average_order_value_cents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerScore {
    pub customer_id: i64,
    pub score_cents: i64,
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Record a finalized order: bump the day's revenue and order count and
    /// the customer's leaderboard score.
    async fn track_finalized(&self, day: NaiveDate, customer_id: i64, total_cents: i64)
    -> Result<()>;

    /// Record a processed refund against the day it was processed (not the
    /// original order day): revenue down, refund counters up, leaderboard
    /// score down.
    async fn track_refund(&self, day: NaiveDate, customer_id: i64, amount_cents: i64)
    -> Result<()>;

    async fn daily_kpis(&self, day: NaiveDate) -> Result<DailyKpis>;

    /// Top customers by descending lifetime score; tie order is left to the
    /// underlying store.
    async fn top_customers(&self, limit: usize) -> Result<Vec<CustomerScore>>;
}

pub(crate) fn kpi_key(day: NaiveDate) -> String {
    format!("kpi:daily:{}", day.format("%Y-%m-%d"))
}

pub(crate) const LEADERBOARD_KEY: &str = "leaderboard:customers";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gross_average_order_value() {
        // 3 orders totalling 9000 gross, 2000 refunded: stored revenue 7000.
        let kpis = DailyKpis::from_counters(7000, 3, 1, 2000);
        assert_eq!(kpis.average_order_value_cents, 3000);
    }

    #[test]
    fn average_is_zero_without_orders() {
        let kpis = DailyKpis::from_counters(0, 0, 0, 0);
        assert_eq!(kpis.average_order_value_cents, 0);
    }

    #[test]
    fn kpi_key_uses_iso_date() {
        let day = NaiveDate::from_ymd_opt(2025, 9, 13).unwrap();
        assert_eq!(kpi_key(day), "kpi:daily:2025-09-13");
    }
}
