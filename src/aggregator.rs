// ⚡ Concurrent Aggregator - bounded fan-out with partial results
//
// One query per source, at most `concurrency` in flight. Each call has its
// own timeout; the whole pass has an overall deadline. Whatever returned
// before the deadline is kept, the rest is abandoned.
//
// A source is claimed against its quota right before its query is spawned,
// so the counter moves exactly when a request is dispatched. A source that
// fails or times out is taken out of rotation for the rest of the day.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::adapters::{SearchItem, SourceAdapter};
use crate::entities::Entity;
use crate::error::{MonitorResult, SourceError};
use crate::quota::QuotaRotator;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    pub concurrency: usize,
    pub per_call_timeout_secs: u64,
    pub overall_timeout_secs: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        AggregatorSettings {
            concurrency: 4,
            per_call_timeout_secs: 30,
            // Two full waves of the default catalog plus slack
            overall_timeout_secs: 90,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SourceOutcome {
    Responded { items: usize },
    Failed { reason: String },
    TimedOut,
    /// Still running when the overall deadline passed
    Abandoned,
    /// Quota spent (or source disabled) at claim time; never dispatched
    NotClaimed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub outcome: SourceOutcome,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    /// Union of all returned items, completion order
    pub items: Vec<SearchItem>,
    pub reports: Vec<SourceReport>,
}

impl AggregationResult {
    pub fn responded(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Responded { .. }))
            .map(|r| r.source_id.as_str())
            .collect()
    }

    /// Sources that were dispatched (claimed), whatever happened next
    pub fn dispatched(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome != SourceOutcome::NotClaimed)
            .count()
    }

    pub fn is_partial(&self) -> bool {
        self.responded().len() < self.dispatched()
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator {
    concurrency: usize,
    per_call_timeout: Duration,
    overall_timeout: Duration,
}

struct TaskResult {
    index: usize,
    outcome: Result<Vec<SearchItem>, SourceError>,
    elapsed_ms: u64,
}

impl Aggregator {
    pub fn new(concurrency: usize, per_call_timeout: Duration, overall_timeout: Duration) -> Self {
        Aggregator {
            concurrency: concurrency.max(1),
            per_call_timeout,
            overall_timeout,
        }
    }

    pub fn from_settings(settings: &AggregatorSettings) -> Self {
        Self::new(
            settings.concurrency,
            Duration::from_secs(settings.per_call_timeout_secs),
            Duration::from_secs(settings.overall_timeout_secs),
        )
    }

    pub fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Query every adapter for `entity`. Source failures are reported,
    /// never raised; only a quota-store failure is returned as an error.
    pub async fn run(
        &self,
        entity: &Entity,
        adapters: &[Arc<dyn SourceAdapter>],
        rotator: &QuotaRotator,
    ) -> MonitorResult<AggregationResult> {
        let entity_name = entity.canonical_name.as_str();
        let deadline = Instant::now() + self.overall_timeout;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<TaskResult>(adapters.len().max(1));

        let mut reports: Vec<Option<SourceReport>> = vec![None; adapters.len()];
        let mut dispatched = vec![false; adapters.len()];
        let mut handles = Vec::new();

        for (index, adapter) in adapters.iter().enumerate() {
            let source_id = adapter.source().id.clone();

            let permit = match timeout_at(deadline, semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                _ => {
                    warn!(source = %source_id, "deadline passed before dispatch");
                    break;
                }
            };

            if !rotator.claim(&source_id)? {
                reports[index] = Some(SourceReport {
                    source_id,
                    outcome: SourceOutcome::NotClaimed,
                    elapsed_ms: 0,
                });
                continue;
            }

            debug!(source = %source_id, entity = entity_name, "dispatching query");
            dispatched[index] = true;
            let adapter = Arc::clone(adapter);
            let entity = entity.clone();
            let per_call = self.per_call_timeout;
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let outcome = match timeout(per_call, adapter.query_entity(&entity)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(per_call.as_secs())),
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;
                // Receiver gone means the deadline passed; nothing to do
                let _ = tx.send(TaskResult { index, outcome, elapsed_ms }).await;
            }));
        }
        drop(tx);

        let mut items = Vec::new();
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(result)) => {
                    let source_id = adapters[result.index].source().id.clone();
                    let outcome = match result.outcome {
                        Ok(found) => {
                            debug!(source = %source_id, count = found.len(), "source responded");
                            let count = found.len();
                            items.extend(found);
                            SourceOutcome::Responded { items: count }
                        }
                        Err(e @ SourceError::Timeout(_)) => {
                            warn!(source = %source_id, error = %e, "source timed out");
                            rotator.mark_unavailable(&source_id, &e.to_string())?;
                            SourceOutcome::TimedOut
                        }
                        Err(e) => {
                            warn!(source = %source_id, error = %e, "source failed");
                            rotator.mark_unavailable(&source_id, &e.to_string())?;
                            SourceOutcome::Failed { reason: e.to_string() }
                        }
                    };
                    reports[result.index] = Some(SourceReport {
                        source_id,
                        outcome,
                        elapsed_ms: result.elapsed_ms,
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(entity = entity_name, "aggregation deadline reached, scoring partial results");
                    break;
                }
            }
        }

        for handle in &handles {
            handle.abort();
        }

        // Dispatched but unreported ⇒ abandoned; never reached ⇒ left out
        let reports: Vec<SourceReport> = reports
            .into_iter()
            .enumerate()
            .filter_map(|(index, report)| {
                report.or_else(|| {
                    dispatched[index].then(|| SourceReport {
                        source_id: adapters[index].source().id.clone(),
                        outcome: SourceOutcome::Abandoned,
                        elapsed_ms: self.overall_timeout.as_millis() as u64,
                    })
                })
            })
            .collect();

        let result = AggregationResult { items, reports };
        info!(
            entity = entity_name,
            items = result.items.len(),
            responded = result.responded().len(),
            dispatched = result.dispatched(),
            "aggregation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterKind;
    use crate::entities::{Source, SourceClass};
    use crate::quota::{FixedClock, MemoryUsageStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Items(Vec<&'static str>),
        Fail,
        Sleep(Duration),
    }

    struct FakeAdapter {
        source: Source,
        behavior: Behavior,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> &Source {
            &self.source
        }

        async fn query(&self, entity_name: &str) -> Result<Vec<SearchItem>, SourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            let result = match &self.behavior {
                Behavior::Items(titles) => Ok(titles
                    .iter()
                    .map(|t| SearchItem::new(&format!("{} {}", entity_name, t), "", &self.source.id))
                    .collect()),
                Behavior::Fail => Err(SourceError::Status(503)),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(vec![])
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    struct Harness {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn adapter(&self, id: &str, quota: Option<u32>, behavior: Behavior) -> Arc<dyn SourceAdapter> {
            Arc::new(FakeAdapter {
                source: Source::new(id, id, SourceClass::TechMedia, quota, AdapterKind::Kr36),
                behavior,
                in_flight: self.in_flight.clone(),
                peak: self.peak.clone(),
            })
        }
    }

    fn rotator_for(adapters: &[Arc<dyn SourceAdapter>]) -> QuotaRotator {
        let sources = adapters.iter().map(|a| a.source().clone()).collect();
        QuotaRotator::new(
            sources,
            Arc::new(MemoryUsageStore::new()),
            Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())),
        )
    }

    fn acme() -> Entity {
        Entity::new("Acme", "医疗器械", crate::entities::Priority::High)
    }

    fn aggregator(concurrency: usize, per_call_ms: u64, overall_ms: u64) -> Aggregator {
        Aggregator::new(
            concurrency,
            Duration::from_millis(per_call_ms),
            Duration::from_millis(overall_ms),
        )
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let h = Harness::new();
        let adapters = vec![
            h.adapter("a", Some(10), Behavior::Items(vec!["完成A轮融资", "news"])),
            h.adapter("b", Some(10), Behavior::Fail),
            h.adapter("c", Some(10), Behavior::Items(vec!["获投"])),
        ];
        let rotator = rotator_for(&adapters);

        let result = aggregator(4, 1_000, 2_000).run(&acme(), &adapters, &rotator).await.unwrap();

        assert_eq!(result.items.len(), 3);
        let mut responded = result.responded();
        responded.sort();
        assert_eq!(responded, vec!["a", "c"]);
        assert!(result.is_partial());

        let failed = result.reports.iter().find(|r| r.source_id == "b").unwrap();
        assert!(matches!(failed.outcome, SourceOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_failed_and_timed_out_sources_sit_out_the_day() {
        let h = Harness::new();
        let adapters = vec![
            h.adapter("ok", Some(10), Behavior::Items(vec!["获投"])),
            h.adapter("bad", Some(10), Behavior::Fail),
            h.adapter("slow", Some(10), Behavior::Sleep(Duration::from_secs(5))),
        ];
        let rotator = rotator_for(&adapters);
        let agg = aggregator(4, 100, 2_000);

        agg.run(&acme(), &adapters, &rotator).await.unwrap();
        let second = agg.run(&acme(), &adapters, &rotator).await.unwrap();

        assert_eq!(second.dispatched(), 1);
        for id in ["bad", "slow"] {
            let report = second.reports.iter().find(|r| r.source_id == id).unwrap();
            assert_eq!(report.outcome, SourceOutcome::NotClaimed);
        }
        let usage = rotator.usage().unwrap();
        assert_eq!(usage.iter().map(|u| u.used).collect::<Vec<_>>(), vec![2, 1, 1]);
        assert_eq!(rotator.unavailable().unwrap().len(), 2);
        let available: Vec<String> = rotator.available_sources().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(available, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_dispatch_counts_toward_quota() {
        let h = Harness::new();
        let adapters = vec![
            h.adapter("ok", Some(10), Behavior::Items(vec!["x"])),
            h.adapter("bad", Some(10), Behavior::Fail),
            h.adapter("spent", Some(0), Behavior::Items(vec!["never"])),
        ];
        let rotator = rotator_for(&adapters);

        let result = aggregator(2, 1_000, 2_000).run(&acme(), &adapters, &rotator).await.unwrap();

        let usage = rotator.usage().unwrap();
        assert_eq!(usage[0].used, 1);
        assert_eq!(usage[1].used, 1);
        assert_eq!(usage[2].used, 0);
        assert_eq!(result.dispatched(), 2);
        let spent = result.reports.iter().find(|r| r.source_id == "spent").unwrap();
        assert_eq!(spent.outcome, SourceOutcome::NotClaimed);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let h = Harness::new();
        let adapters: Vec<_> = (0..8)
            .map(|i| h.adapter(&format!("s{}", i), None, Behavior::Items(vec!["y"])))
            .collect();
        let rotator = rotator_for(&adapters);

        let result = aggregator(3, 1_000, 5_000).run(&acme(), &adapters, &rotator).await.unwrap();

        assert_eq!(result.items.len(), 8);
        assert!(h.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_per_call_timeout() {
        let h = Harness::new();
        let adapters = vec![
            h.adapter("slow", Some(10), Behavior::Sleep(Duration::from_secs(5))),
            h.adapter("fast", Some(10), Behavior::Items(vec!["获投"])),
        ];
        let rotator = rotator_for(&adapters);

        let result = aggregator(4, 100, 2_000).run(&acme(), &adapters, &rotator).await.unwrap();

        assert_eq!(result.items.len(), 1);
        let slow = result.reports.iter().find(|r| r.source_id == "slow").unwrap();
        assert_eq!(slow.outcome, SourceOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_overall_deadline_keeps_partial_results() {
        let h = Harness::new();
        let adapters = vec![
            h.adapter("fast", Some(10), Behavior::Items(vec!["获投"])),
            h.adapter("slow", Some(10), Behavior::Sleep(Duration::from_secs(5))),
        ];
        let rotator = rotator_for(&adapters);

        // per-call limit longer than the overall deadline
        let result = aggregator(4, 10_000, 300).run(&acme(), &adapters, &rotator).await.unwrap();

        assert_eq!(result.items.len(), 1);
        let slow = result.reports.iter().find(|r| r.source_id == "slow").unwrap();
        assert_eq!(slow.outcome, SourceOutcome::Abandoned);
        // Abandoned is the deadline's doing, not the source's
        assert!(rotator.unavailable().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_adapters() {
        let rotator = rotator_for(&[]);
        let result = aggregator(4, 100, 200).run(&acme(), &[], &rotator).await.unwrap();
        assert!(result.items.is_empty());
        assert!(result.reports.is_empty());
        assert!(!result.is_partial());
    }
}
