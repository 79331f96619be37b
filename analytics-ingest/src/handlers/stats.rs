//! `GET /v1/stats/*`: read-only aggregate views, each parameterized
//! by an optional `?period=` query string defaulting to 30 days.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use analytics_stats::period::Period;

use crate::error::IngestError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PeriodQuery {
    period: Option<String>,
}

fn parse_period(query: &PeriodQuery) -> Result<Period, IngestError> {
    match &query.period {
        None => Ok(Period::default()),
        Some(raw) => raw
            .parse()
            .map_err(|_| IngestError::Validation(vec![format!("unknown period: {raw}")])),
    }
}

pub async fn overview(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, IngestError> {
    let period = parse_period(&query)?;
    let overview = state.stats.overview(period).await?;
    Ok(Json(serde_json::to_value(overview).unwrap_or(json!({}))))
}

pub async fn tools(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, IngestError> {
    let period = parse_period(&query)?;
    let tools = state.stats.tools_stats(period).await?;
    Ok(Json(serde_json::to_value(tools).unwrap_or(json!([]))))
}

pub async fn tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<(StatusCode, Json<Value>), IngestError> {
    let period = parse_period(&query)?;
    match state.stats.tool_stats(&name, period).await? {
        Some(stats) => Ok((
            StatusCode::OK,
            Json(serde_json::to_value(stats).unwrap_or(json!({}))),
        )),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "tool_not_found"})),
        )),
    }
}

pub async fn errors(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, IngestError> {
    let period = parse_period(&query)?;
    let errors = state.stats.error_stats(period).await?;
    Ok(Json(serde_json::to_value(errors).unwrap_or(json!([]))))
}

pub async fn performance(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, IngestError> {
    let period = parse_period(&query)?;
    let performance = state.stats.performance_stats(period).await?;
    Ok(Json(serde_json::to_value(performance).unwrap_or(json!({}))))
}
