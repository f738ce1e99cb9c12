// 🛰️ Funding Monitor - the check pipeline
//
// Per entity, strictly in this order:
//   rotator selection → concurrent search → registry snapshot + diff
//   → scoring → persistence → notification
//
// Source trouble is absorbed at every step: a source that errors sits out
// the rest of the day. Only persistence and configuration failures leave
// `check_entity` as errors.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapters::{build_profile_source, build_search_adapter, HttpFetcher, PageFetcher, SourceAdapter};
use crate::aggregator::{Aggregator, SourceReport};
use crate::config::MonitorConfig;
use crate::db;
use crate::entities::{Entity, EntityRegistry, Priority, SourceRole};
use crate::error::{MonitorError, MonitorResult, SourceError};
use crate::quota::{Clock, LocalClock, QuotaRotator, SourceUsage, SqliteUsageStore};
use crate::report::{format_alert, format_daily_report, LogNotifier, Notifier, WebhookNotifier};
use crate::scoring::{FundingAssessment, FundingScorer};
use crate::snapshot::{Change, SnapshotDiffer};

/// Fields an operator collects when looking a company up by hand
pub const MANUAL_FIELDS: &[&str] = &["公司全称", "法定代表人", "注册资本", "成立日期", "统一社会信用代码", "股东信息"];

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualLookup {
    pub source_name: String,
    pub url: String,
}

/// Registry lookup the operator has to do by hand (no registry budget left)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualFallback {
    pub entity: String,
    pub lookups: Vec<ManualLookup>,
    pub fields: Vec<String>,
}

/// Result of checking one entity
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub assessment: FundingAssessment,
    /// One entry per search source considered
    pub reports: Vec<SourceReport>,
    /// Version of the snapshot recorded in this check
    pub snapshot_version: Option<i64>,
    /// No search source had budget left; text search was deferred
    pub search_deferred: bool,
    pub manual_fallback: Option<ManualFallback>,
    pub alerted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedEntity {
    pub name: String,
    pub category: String,
    pub priority: Priority,
    pub assessment: FundingAssessment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total: usize,
    pub checked: usize,
    pub signals_found: usize,
    pub high_confidence: usize,
    /// Priority order, high → normal → low
    pub results: Vec<CheckedEntity>,
    /// Sources taken out of rotation today, with the reason
    #[serde(default)]
    pub unavailable_sources: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

struct SnapshotStep {
    changes: Vec<Change>,
    version: Option<i64>,
    manual_fallback: Option<ManualFallback>,
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct FundingMonitor {
    config: MonitorConfig,
    conn: Arc<Mutex<Connection>>,
    rotator: QuotaRotator,
    fetcher: Arc<dyn PageFetcher>,
    scorer: FundingScorer,
    differ: SnapshotDiffer,
    aggregator: Aggregator,
    notifier: Arc<dyn Notifier>,
    firecrawl_key: Option<String>,
}

impl FundingMonitor {
    /// Wire the pipeline over an existing connection (schema is created if missing)
    pub fn new(
        config: MonitorConfig,
        conn: Arc<Mutex<Connection>>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> MonitorResult<Self> {
        config.validate()?;
        {
            let guard = conn
                .lock()
                .map_err(|_| MonitorError::Persistence("database lock poisoned".into()))?;
            db::setup_database(&guard)?;
        }

        let store = Arc::new(SqliteUsageStore::new(Arc::clone(&conn)));
        let rotator = QuotaRotator::new(config.sources.clone(), store, clock);
        let scorer = FundingScorer::new(config.scoring.clone(), &config.keywords)?;
        let aggregator = Aggregator::from_settings(&config.aggregator);
        let firecrawl_key = config.firecrawl_api_key();

        Ok(FundingMonitor {
            config,
            conn,
            rotator,
            fetcher,
            scorer,
            differ: SnapshotDiffer::default(),
            aggregator,
            notifier,
            firecrawl_key,
        })
    }

    /// Production wiring: on-disk database, HTTP fetcher, configured notifier
    pub fn open(config: MonitorConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir: {}", config.data_dir.display()))?;
        let conn = db::open_database(&config.database_path())?;

        let fetcher = HttpFetcher::new(Duration::from_secs(config.aggregator.per_call_timeout_secs))?;
        let notifier: Arc<dyn Notifier> = match &config.notification.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => Arc::new(LogNotifier),
        };

        Ok(Self::new(
            config,
            Arc::new(Mutex::new(conn)),
            Arc::new(fetcher),
            notifier,
            Arc::new(LocalClock),
        )?)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn rotator(&self) -> &QuotaRotator {
        &self.rotator
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn usage(&self) -> MonitorResult<Vec<SourceUsage>> {
        self.rotator.usage()
    }

    fn db(&self) -> MonitorResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MonitorError::Persistence("database lock poisoned".into()))
    }

    // ------------------------------------------------------------------------
    // One entity
    // ------------------------------------------------------------------------

    pub async fn check_entity(&self, entity: &Entity) -> MonitorResult<CheckOutcome> {
        let name = entity.canonical_name.as_str();
        let day = self.rotator.today();
        info!(entity = name, "checking entity");

        // 1. Search sources within budget
        let (search_sources, search_deferred) = match self.rotator.select(SourceRole::Search) {
            Ok(sources) => (sources, false),
            Err(MonitorError::QuotaExhausted { .. }) => {
                warn!(entity = name, "search deferred, no search source left for today");
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        for source in &search_sources {
            match build_search_adapter(source, Arc::clone(&self.fetcher), self.firecrawl_key.as_deref()) {
                Ok(Some(adapter)) => adapters.push(adapter),
                Ok(None) => {}
                Err(e) => self.rotator.mark_unavailable(&source.id, &e.to_string())?,
            }
        }

        // 2. Concurrent fan-out
        let aggregation = self.aggregator.run(entity, &adapters, &self.rotator).await?;

        // 3. Registry snapshot and diff
        let snapshot = self.refresh_snapshot(entity, day).await?;

        // 4. Score
        let assessment = self.scorer.assess(
            name,
            &aggregation.items,
            &snapshot.changes,
            self.rotator.sources(),
            self.config.thresholds.alert,
        );
        info!(
            entity = name,
            has_signal = assessment.has_signal,
            confidence = assessment.confidence,
            sources = assessment.source_count(),
            "assessment"
        );

        // 5. Persist
        {
            let conn = self.db()?;
            db::insert_assessment(&conn, day, &assessment)?;
            db::insert_event(
                &conn,
                &db::Event::new(
                    "assessment_recorded",
                    "entity",
                    name,
                    serde_json::json!({
                        "assessment_id": assessment.id,
                        "confidence": assessment.confidence,
                        "has_signal": assessment.has_signal,
                    }),
                    "monitor",
                ),
            )?;
        }

        // 6. Notify
        let alerted = assessment.has_signal && assessment.confidence >= self.config.thresholds.notify;
        if alerted {
            let message = format_alert(entity, &assessment);
            self.notifier.send(&self.config.notification.channel, &message).await;
        }

        Ok(CheckOutcome {
            assessment,
            reports: aggregation.reports,
            snapshot_version: snapshot.version,
            search_deferred,
            manual_fallback: snapshot.manual_fallback,
            alerted,
        })
    }

    /// Fetch a registry profile from the least-used registry source that
    /// answers, append it as the new current snapshot and diff it against
    /// the previous one.
    async fn refresh_snapshot(&self, entity: &Entity, day: NaiveDate) -> MonitorResult<SnapshotStep> {
        let name = entity.canonical_name.as_str();
        let candidates = self.rotator.available_for(SourceRole::Profile)?;
        let per_call = self.aggregator.per_call_timeout();

        let mut dispatched = 0;
        for source in &candidates {
            let Some(profile_source) = build_profile_source(source, Arc::clone(&self.fetcher)) else {
                continue;
            };
            if !self.rotator.claim(&source.id)? {
                continue;
            }
            dispatched += 1;

            let profile = match timeout(per_call, profile_source.fetch_profile(name)).await {
                Ok(Ok(Some(profile))) => profile,
                Ok(Ok(None)) => {
                    debug!(entity = name, source = %source.id, "no registry record");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(entity = name, source = %source.id, error = %e, "registry fetch failed");
                    self.rotator.mark_unavailable(&source.id, &e.to_string())?;
                    continue;
                }
                Err(_) => {
                    let e = SourceError::Timeout(per_call.as_secs());
                    warn!(entity = name, source = %source.id, error = %e, "registry fetch timed out");
                    self.rotator.mark_unavailable(&source.id, &e.to_string())?;
                    continue;
                }
            };

            let conn = self.db()?;
            let previous = db::latest_snapshot(&conn, name)?;
            let snapshot = db::append_snapshot(&conn, name, &profile)?;
            let changes = self.differ.diff(previous.as_ref().map(|s| &s.profile), &snapshot.profile);

            if previous.is_none() {
                info!(entity = name, source = %source.id, "first snapshot recorded as baseline");
            } else if !changes.is_empty() {
                info!(entity = name, changes = changes.len(), "registry changes detected");
                db::append_changes(&conn, day, name, &changes)?;
            }

            return Ok(SnapshotStep {
                changes,
                version: Some(snapshot.version),
                manual_fallback: None,
            });
        }

        let manual_fallback = (dispatched == 0).then(|| self.manual_fallback(entity));
        if manual_fallback.is_some() {
            warn!(entity = name, "no registry source within budget, manual lookup needed");
        }
        Ok(SnapshotStep {
            changes: Vec::new(),
            version: None,
            manual_fallback,
        })
    }

    /// Search pages of every enabled registry source, exhausted or not
    pub fn manual_fallback(&self, entity: &Entity) -> ManualFallback {
        let lookup_name = entity.full_name.as_deref().unwrap_or(&entity.canonical_name);
        let lookups = self
            .rotator
            .sources()
            .iter()
            .filter(|s| s.enabled && s.role() == SourceRole::Profile)
            .filter_map(|s| build_profile_source(s, Arc::clone(&self.fetcher)))
            .map(|p| ManualLookup {
                source_name: p.source().name.clone(),
                url: p.manual_url(lookup_name),
            })
            .collect();

        ManualFallback {
            entity: entity.canonical_name.clone(),
            lookups,
            fields: MANUAL_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    // ------------------------------------------------------------------------
    // All entities
    // ------------------------------------------------------------------------

    /// Check every entity in priority order and send the daily report
    pub async fn check_all(&self, registry: &EntityRegistry) -> MonitorResult<DailySummary> {
        let entities = registry.by_priority();
        let delay = Duration::from_millis(self.config.entity_delay_ms);

        let mut summary = DailySummary {
            date: self.rotator.today(),
            total: entities.len(),
            checked: 0,
            signals_found: 0,
            high_confidence: 0,
            results: Vec::new(),
            unavailable_sources: Vec::new(),
            generated_at: Utc::now(),
        };

        for (i, entity) in entities.into_iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.check_entity(entity).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(entity = %entity.canonical_name, error = %e, "check skipped");
                    continue;
                }
            };

            summary.checked += 1;
            if outcome.assessment.has_signal {
                summary.signals_found += 1;
            }
            if outcome.assessment.is_high_confidence(self.config.thresholds.high_confidence) {
                summary.high_confidence += 1;
            }
            summary.results.push(CheckedEntity {
                name: entity.canonical_name.clone(),
                category: entity.category.clone(),
                priority: entity.priority,
                assessment: outcome.assessment,
            });
        }

        summary.unavailable_sources = self.rotator.unavailable()?.iter().map(ToString::to_string).collect();
        summary.generated_at = Utc::now();
        info!(
            checked = summary.checked,
            signals = summary.signals_found,
            high = summary.high_confidence,
            unavailable = summary.unavailable_sources.len(),
            "daily check finished"
        );

        let report = format_daily_report(&summary);
        self.notifier.send(&self.config.notification.channel, &report).await;
        Ok(summary)
    }
}
