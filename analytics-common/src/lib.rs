//! Shared types for the analytics ingestion pipeline: the event schema,
//! database pool configuration and the hour-alignment check used by the
//! validator, queue, aggregator, stats and the two binaries
//! (`analytics-ingest`, `analytics-worker`).

pub mod config;
pub mod event;
pub mod time;

pub use config::DatabaseConfig;
pub use event::{
    AnalyticsLevel, CoreFields, DetailedFields, Event, Service, StandardFields, Status, ToolName,
};
pub use time::is_hour_aligned;
