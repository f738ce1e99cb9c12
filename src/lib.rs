// Funding Watch - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod adapters;
pub mod aggregator;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod entities;
pub mod error;
pub mod extractor;
pub mod monitor;
pub mod quota;
pub mod registry;
pub mod report;
pub mod scoring;
pub mod snapshot;

// Re-export commonly used types
pub use adapters::{
    build_profile_source, build_search_adapter, AdapterKind, FetchRequest, FetchResponse,
    HttpFetcher, PageFetcher, ProfileSource, SearchItem, SourceAdapter,
};
pub use aggregator::{AggregationResult, Aggregator, AggregatorSettings, SourceOutcome, SourceReport};
pub use config::{MonitorConfig, NotificationSettings, Thresholds, DEFAULT_CONFIG_PATH};
pub use db::{
    append_changes, append_snapshot, get_assessments, get_assessments_for_day, get_changes_for_day,
    get_events_for_entity, get_usage, insert_assessment, insert_event, latest_snapshot, open_database,
    setup_database, snapshot_history, ChangeRecord, Event,
};
pub use deduplication::DeduplicationEngine;
pub use entities::{default_sources, Entity, EntityRegistry, Priority, Source, SourceClass, SourceRole};
pub use error::{MonitorError, MonitorResult, SourceError};
pub use extractor::{extract_amount, extract_round, Extraction, KeywordSets, SignalExtractor};
pub use monitor::{CheckOutcome, CheckedEntity, DailySummary, FundingMonitor, ManualFallback, ManualLookup};
pub use quota::{Clock, FixedClock, LocalClock, MemoryUsageStore, QuotaRotator, SourceUsage, SqliteUsageStore, UsageStore};
pub use registry::{parse_profile_html, RegistryProfile};
pub use report::{
    format_alert, format_daily_report, format_manual_fallback, format_usage, LogNotifier, Notifier,
    WebhookNotifier,
};
pub use scoring::{FundingAssessment, FundingScorer, ScoringConfig, Signal, SignalOrigin};
pub use snapshot::{Change, ChangeKind, SignalStrength, Snapshot, SnapshotDiffer, SnapshotHistory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
