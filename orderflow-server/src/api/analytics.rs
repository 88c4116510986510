//! Daily KPI and leaderboard endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::analytics::{CustomerScore, DailyKpis};
use crate::error::{Result, WorkflowError};
use crate::state::AppState;

/// GET /api/analytics/daily/{date}
///
/// Days with no recorded activity return zeroed counters, matching what
/// the aggregate store reports after its TTL has expired.
pub async fn daily_kpis(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DailyKpis>> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| WorkflowError::InvalidIntake(format!("invalid date: {date}")))?;
    Ok(Json(state.analytics.daily_kpis(day).await?))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

/// GET /api/analytics/leaderboard?limit=N
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<CustomerScore>>> {
    let limit = query.limit.unwrap_or(10).min(100);
    Ok(Json(state.analytics.top_customers(limit).await?))
}
