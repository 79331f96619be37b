//! Groups a batch of validated events into the three local aggregates
//! the upsert paths need. Grouping and merging within a batch happens in
//! memory before any of it reaches the store: upserts sharing a key
//! within a batch must be merged locally first.

use std::collections::{BTreeSet, HashMap};

use analytics_common::event::{Event, Service, Status, ToolName};
use chrono::{DateTime, NaiveDate, Utc};

use crate::percentile::percentile;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DailyKey {
    pub date: NaiveDate,
    pub tool: ToolName,
    pub version: String,
    pub country: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct HourlyKey {
    pub hour: DateTime<Utc>,
    pub tool: ToolName,
    pub version: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ErrorKey {
    pub hour: DateTime<Utc>,
    pub tool: ToolName,
    pub error_type: String,
}

#[derive(Debug, Default, Clone)]
pub struct DailyGroup {
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
    pub response_times: Vec<i64>,
    pub cache_hit_count: i64,
    pub cache_miss_count: i64,
    pub noaa_calls: i64,
    pub openmeteo_calls: i64,
    pub retry_sum: i64,
    pub retry_sample_count: i64,
}

impl DailyGroup {
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_times.is_empty() {
            0.0
        } else {
            self.response_times.iter().sum::<i64>() as f64 / self.response_times.len() as f64
        }
    }

    pub fn avg_retry_count(&self) -> f64 {
        if self.retry_sample_count == 0 {
            0.0
        } else {
            self.retry_sum as f64 / self.retry_sample_count as f64
        }
    }

    pub fn sorted_response_times(&self) -> Vec<i64> {
        let mut times = self.response_times.clone();
        times.sort_unstable();
        times
    }

    pub fn percentiles(&self) -> (i64, i64, i64) {
        let sorted = self.sorted_response_times();
        (percentile(&sorted, 50), percentile(&sorted, 95), percentile(&sorted, 99))
    }

    pub fn min_response_time_ms(&self) -> Option<i64> {
        self.response_times.iter().min().copied()
    }

    pub fn max_response_time_ms(&self) -> Option<i64> {
        self.response_times.iter().max().copied()
    }
}

#[derive(Debug, Default, Clone)]
pub struct HourlyGroup {
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
    pub response_times: Vec<i64>,
    pub cache_hit_count: i64,
    pub cache_miss_count: i64,
}

impl HourlyGroup {
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_times.is_empty() {
            0.0
        } else {
            self.response_times.iter().sum::<i64>() as f64 / self.response_times.len() as f64
        }
    }

    pub fn p95_response_time_ms(&self) -> i64 {
        let mut sorted = self.response_times.clone();
        sorted.sort_unstable();
        percentile(&sorted, 95)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorGroup {
    pub count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub affected_versions: BTreeSet<String>,
}

pub struct GroupedBatch {
    pub daily: HashMap<DailyKey, DailyGroup>,
    pub hourly: HashMap<HourlyKey, HourlyGroup>,
    pub errors: HashMap<ErrorKey, ErrorGroup>,
}

pub fn group_batch(events: &[Event]) -> GroupedBatch {
    let mut daily: HashMap<DailyKey, DailyGroup> = HashMap::new();
    let mut hourly: HashMap<HourlyKey, HourlyGroup> = HashMap::new();
    let mut errors: HashMap<ErrorKey, ErrorGroup> = HashMap::new();

    for event in events {
        let core = event.core();
        let country = event.country();

        let daily_key = DailyKey {
            date: core.timestamp_hour.date_naive(),
            tool: core.tool,
            version: core.version.clone(),
            country: country.clone(),
        };
        let daily_group = daily.entry(daily_key).or_default();
        accumulate_daily(daily_group, event);

        let hourly_key = HourlyKey {
            hour: core.timestamp_hour,
            tool: core.tool,
            version: core.version.clone(),
        };
        let hourly_group = hourly.entry(hourly_key).or_default();
        accumulate_hourly(hourly_group, event);

        if core.status == Status::Error {
            if let Some(error_type) = event.error_type() {
                let error_key = ErrorKey {
                    hour: core.timestamp_hour,
                    tool: core.tool,
                    error_type: error_type.to_string(),
                };
                let group = errors.entry(error_key).or_insert_with(|| ErrorGroup {
                    count: 0,
                    first_seen: core.timestamp_hour,
                    last_seen: core.timestamp_hour,
                    affected_versions: BTreeSet::new(),
                });
                group.count += 1;
                group.first_seen = group.first_seen.min(core.timestamp_hour);
                group.last_seen = group.last_seen.max(core.timestamp_hour);
                group.affected_versions.insert(core.version.clone());
            }
        }
    }

    GroupedBatch { daily, hourly, errors }
}

fn accumulate_daily(group: &mut DailyGroup, event: &Event) {
    group.total_calls += 1;
    match event.core().status {
        Status::Success => group.success_calls += 1,
        Status::Error => group.error_calls += 1,
    }
    if let Some(rt) = event.response_time_ms() {
        group.response_times.push(rt as i64);
    }
    match event.cache_hit() {
        Some(true) => group.cache_hit_count += 1,
        Some(false) => group.cache_miss_count += 1,
        None => {}
    }
    match event.service() {
        Some(Service::Noaa) => group.noaa_calls += 1,
        Some(Service::Openmeteo) => group.openmeteo_calls += 1,
        None => {}
    }
    if let Some(retries) = event.retry_count() {
        group.retry_sum += retries as i64;
        group.retry_sample_count += 1;
    }
}

fn accumulate_hourly(group: &mut HourlyGroup, event: &Event) {
    group.total_calls += 1;
    match event.core().status {
        Status::Success => group.success_calls += 1,
        Status::Error => group.error_calls += 1,
    }
    if let Some(rt) = event.response_time_ms() {
        group.response_times.push(rt as i64);
    }
    match event.cache_hit() {
        Some(true) => group.cache_hit_count += 1,
        Some(false) => group.cache_miss_count += 1,
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_common::event::{AnalyticsLevel, CoreFields, StandardFields};
    use chrono::TimeZone;

    fn standard_event(rt: i32, status: Status) -> Event {
        Event::Standard {
            core: CoreFields {
                version: "1.0.0".to_string(),
                tool: ToolName::GetForecast,
                status,
                timestamp_hour: Utc.with_ymd_and_hms(2025, 11, 12, 20, 0, 0).unwrap(),
                analytics_level: AnalyticsLevel::Standard,
            },
            standard: StandardFields {
                response_time_ms: Some(rt),
                error_type: if status == Status::Error {
                    Some("timeout".to_string())
                } else {
                    None
                },
                ..Default::default()
            },
        }
    }

    #[test]
    fn groups_by_date_tool_version_country() {
        let batch = vec![standard_event(100, Status::Success), standard_event(200, Status::Success)];
        let grouped = group_batch(&batch);
        assert_eq!(grouped.daily.len(), 1);
        let group = grouped.daily.values().next().unwrap();
        assert_eq!(group.total_calls, 2);
        assert_eq!(group.avg_response_time_ms(), 150.0);
    }

    #[test]
    fn error_events_group_into_error_summary() {
        let batch = vec![standard_event(50, Status::Error)];
        let grouped = group_batch(&batch);
        assert_eq!(grouped.errors.len(), 1);
        let group = grouped.errors.values().next().unwrap();
        assert_eq!(group.count, 1);
        assert!(group.affected_versions.contains("1.0.0"));
    }
}
