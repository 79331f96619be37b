//! The event schema. `Event` is the validated, level-discriminated sum
//! type every downstream component (queue, worker, aggregator) operates
//! on: an enum keyed by `AnalyticsLevel`, with a decode step that chooses
//! the variant from the discriminator, rather than one struct with a mix
//! of required and optional fields. The request body envelope itself is
//! scanned as raw `serde_json::Value` by the validator (PII field names
//! must be checked before any typed decode would discard them), so there
//! is no separate wire-envelope type here.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "analytics_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsLevel {
    Minimal,
    Standard,
    Detailed,
}

impl FromStr for AnalyticsLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(AnalyticsLevel::Minimal),
            "standard" => Ok(AnalyticsLevel::Standard),
            "detailed" => Ok(AnalyticsLevel::Detailed),
            other => Err(format!("unknown analytics_level '{other}'")),
        }
    }
}

impl fmt::Display for AnalyticsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalyticsLevel::Minimal => "minimal",
            AnalyticsLevel::Standard => "standard",
            AnalyticsLevel::Detailed => "detailed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Status::Success),
            "error" => Ok(Status::Error),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Closed enumeration of tool names for a weather analytics fleet. This
/// choice is recorded as an Open Question decision in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tool_name", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetForecast,
    GetHistorical,
    GetAlerts,
    SearchLocations,
    GetCurrentWeather,
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_forecast" => Ok(ToolName::GetForecast),
            "get_historical" => Ok(ToolName::GetHistorical),
            "get_alerts" => Ok(ToolName::GetAlerts),
            "search_locations" => Ok(ToolName::SearchLocations),
            "get_current_weather" => Ok(ToolName::GetCurrentWeather),
            other => Err(format!("unknown tool '{other}'")),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolName::GetForecast => "get_forecast",
            ToolName::GetHistorical => "get_historical",
            ToolName::GetAlerts => "get_alerts",
            ToolName::SearchLocations => "search_locations",
            ToolName::GetCurrentWeather => "get_current_weather",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "service_name", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Noaa,
    Openmeteo,
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noaa" => Ok(Service::Noaa),
            "openmeteo" => Ok(Service::Openmeteo),
            other => Err(format!("unknown service '{other}'")),
        }
    }
}

/// Fields required at every analytics level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreFields {
    pub version: String,
    pub tool: ToolName,
    pub status: Status,
    pub timestamp_hour: DateTime<Utc>,
    pub analytics_level: AnalyticsLevel,
}

/// Added at `standard` level and above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardFields {
    pub response_time_ms: Option<i32>,
    pub service: Option<Service>,
    pub cache_hit: Option<bool>,
    pub retry_count: Option<i16>,
    pub country: Option<String>,
    pub error_type: Option<String>,
}

/// Added at `detailed` level only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedFields {
    pub parameters: Option<HashMap<String, Value>>,
    pub session_id: Option<String>,
    pub sequence_number: Option<i64>,
}

/// A validated event, tagged by its analytics level. Only the validator
/// constructs these; every other component can assume its invariants
/// already hold (hour-aligned timestamp, no PII, level-scoped fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analytics_level", rename_all = "lowercase")]
pub enum Event {
    Minimal { core: CoreFields },
    Standard { core: CoreFields, standard: StandardFields },
    Detailed {
        core: CoreFields,
        standard: StandardFields,
        detailed: DetailedFields,
    },
}

impl Event {
    pub fn core(&self) -> &CoreFields {
        match self {
            Event::Minimal { core } => core,
            Event::Standard { core, .. } => core,
            Event::Detailed { core, .. } => core,
        }
    }

    pub fn standard(&self) -> Option<&StandardFields> {
        match self {
            Event::Minimal { .. } => None,
            Event::Standard { standard, .. } => Some(standard),
            Event::Detailed { standard, .. } => Some(standard),
        }
    }

    pub fn detailed(&self) -> Option<&DetailedFields> {
        match self {
            Event::Detailed { detailed, .. } => Some(detailed),
            _ => None,
        }
    }

    pub fn response_time_ms(&self) -> Option<i32> {
        self.standard().and_then(|s| s.response_time_ms)
    }

    pub fn cache_hit(&self) -> Option<bool> {
        self.standard().and_then(|s| s.cache_hit)
    }

    pub fn retry_count(&self) -> Option<i16> {
        self.standard().and_then(|s| s.retry_count)
    }

    pub fn country(&self) -> String {
        self.standard()
            .and_then(|s| s.country.clone())
            .unwrap_or_default()
    }

    pub fn service(&self) -> Option<Service> {
        self.standard().and_then(|s| s.service)
    }

    pub fn error_type(&self) -> Option<&str> {
        self.standard().and_then(|s| s.error_type.as_deref())
    }
}
