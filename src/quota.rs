// 🔄 Quota-Aware Rotator - least-used-first source selection within free budgets
//
// Counters are keyed by local calendar day, so a new day naturally starts
// from an empty mapping. A source that errors is excluded until the day
// rolls over. The store is injected; the rotator holds no process-wide
// state of its own.

use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db;
use crate::entities::{Source, SourceRole};
use crate::error::{MonitorError, MonitorResult};

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock: Send + Sync {
    /// Current local calendar day
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    day: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(day: NaiveDate) -> Self {
        FixedClock { day: Mutex::new(day) }
    }

    pub fn set(&self, day: NaiveDate) {
        if let Ok(mut guard) = self.day.lock() {
            *guard = day;
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        match self.day.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ============================================================================
// USAGE STORE
// ============================================================================

/// Durable per-day counters with atomic read-modify-write
pub trait UsageStore: Send + Sync {
    fn usage_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, u32>>;

    /// Unconditional increment, returns the new count
    fn increment(&self, day: NaiveDate, source_id: &str) -> MonitorResult<u32>;

    /// Increment only if still under `quota` (None = unbounded)
    fn claim(&self, day: NaiveDate, source_id: &str, quota: Option<u32>) -> MonitorResult<bool>;

    /// Take a source out of rotation for `day`
    fn exclude(&self, day: NaiveDate, source_id: &str, reason: &str) -> MonitorResult<()>;

    /// source_id → reason of the sources excluded on `day`
    fn exclusions_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, String>>;
}

#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    counts: Mutex<HashMap<(NaiveDate, String), u32>>,
    exclusions: Mutex<HashMap<(NaiveDate, String), String>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MonitorResult<std::sync::MutexGuard<'_, HashMap<(NaiveDate, String), u32>>> {
        self.counts
            .lock()
            .map_err(|_| MonitorError::Persistence("usage counters lock poisoned".into()))
    }
}

impl UsageStore for MemoryUsageStore {
    fn usage_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, u32>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|((d, _), _)| *d == day)
            .map(|((_, id), count)| (id.clone(), *count))
            .collect())
    }

    fn increment(&self, day: NaiveDate, source_id: &str) -> MonitorResult<u32> {
        let mut counts = self.lock()?;
        let count = counts.entry((day, source_id.to_string())).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn claim(&self, day: NaiveDate, source_id: &str, quota: Option<u32>) -> MonitorResult<bool> {
        let mut counts = self.lock()?;
        let count = counts.entry((day, source_id.to_string())).or_insert(0);
        match quota {
            Some(q) if *count >= q => Ok(false),
            _ => {
                *count += 1;
                Ok(true)
            }
        }
    }

    fn exclude(&self, day: NaiveDate, source_id: &str, reason: &str) -> MonitorResult<()> {
        let mut exclusions = self
            .exclusions
            .lock()
            .map_err(|_| MonitorError::Persistence("exclusions lock poisoned".into()))?;
        exclusions
            .entry((day, source_id.to_string()))
            .or_insert_with(|| reason.to_string());
        Ok(())
    }

    fn exclusions_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, String>> {
        let exclusions = self
            .exclusions
            .lock()
            .map_err(|_| MonitorError::Persistence("exclusions lock poisoned".into()))?;
        Ok(exclusions
            .iter()
            .filter(|((d, _), _)| *d == day)
            .map(|((_, id), reason)| (id.clone(), reason.clone()))
            .collect())
    }
}

/// Counters in the `usage_counters` table
#[derive(Clone)]
pub struct SqliteUsageStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUsageStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        SqliteUsageStore { conn }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> MonitorResult<T>) -> MonitorResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| MonitorError::Persistence("database lock poisoned".into()))?;
        f(&conn)
    }
}

impl UsageStore for SqliteUsageStore {
    fn usage_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, u32>> {
        self.with_conn(|conn| db::get_usage(conn, day))
    }

    fn increment(&self, day: NaiveDate, source_id: &str) -> MonitorResult<u32> {
        self.with_conn(|conn| db::increment_usage(conn, day, source_id))
    }

    fn claim(&self, day: NaiveDate, source_id: &str, quota: Option<u32>) -> MonitorResult<bool> {
        self.with_conn(|conn| db::claim_usage(conn, day, source_id, quota))
    }

    fn exclude(&self, day: NaiveDate, source_id: &str, reason: &str) -> MonitorResult<()> {
        self.with_conn(|conn| db::exclude_source(conn, day, source_id, reason))
    }

    fn exclusions_for(&self, day: NaiveDate) -> MonitorResult<HashMap<String, String>> {
        self.with_conn(|conn| db::get_exclusions(conn, day))
    }
}

// ============================================================================
// USAGE REPORT ROW
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUsage {
    pub source_id: String,
    pub name: String,
    pub used: u32,
    /// None = unbounded
    pub quota: Option<u32>,
    pub enabled: bool,
    /// Why the source is out for the rest of the day
    #[serde(default)]
    pub unavailable: Option<String>,
}

impl SourceUsage {
    pub fn remaining(&self) -> Option<u32> {
        self.quota.map(|q| q.saturating_sub(self.used))
    }

    /// 🟢 plenty left, 🟡 running low, 🔴 exhausted, ⛔ excluded after an error
    pub fn status_icon(&self) -> &'static str {
        if self.unavailable.is_some() {
            return "⛔";
        }
        match self.remaining() {
            None => "🟢",
            Some(r) if r > 5 => "🟢",
            Some(r) if r > 0 => "🟡",
            Some(_) => "🔴",
        }
    }
}

// ============================================================================
// ROTATOR
// ============================================================================

pub struct QuotaRotator {
    sources: Vec<Source>,
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    last_day: Mutex<Option<NaiveDate>>,
}

impl QuotaRotator {
    /// `sources` in declared priority order
    pub fn new(sources: Vec<Source>, store: Arc<dyn UsageStore>, clock: Arc<dyn Clock>) -> Self {
        QuotaRotator {
            sources,
            store,
            clock,
            last_day: Mutex::new(None),
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, source_id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == source_id)
    }

    /// Today's date; logs the first access of a new day
    pub fn today(&self) -> NaiveDate {
        let today = self.clock.today();
        if let Ok(mut last) = self.last_day.lock() {
            if *last != Some(today) {
                if last.is_some() {
                    info!(day = %today, "quota day rolled over, counters start empty");
                }
                *last = Some(today);
            }
        }
        today
    }

    /// Enabled sources still under budget and not excluded today, least
    /// used first. Ties: bounded before unbounded, then declared order.
    pub fn available_sources(&self) -> MonitorResult<Vec<Source>> {
        let day = self.today();
        let usage = self.store.usage_for(day)?;
        let excluded = self.store.exclusions_for(day)?;

        let mut ranked: Vec<(u32, bool, usize, &Source)> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled && !excluded.contains_key(&s.id))
            .map(|(i, s)| (usage.get(&s.id).copied().unwrap_or(0), s.is_unbounded(), i, s))
            .filter(|(used, _, _, s)| s.has_budget(*used))
            .collect();
        ranked.sort_by_key(|(used, unbounded, index, _)| (*used, *unbounded, *index));

        Ok(ranked.into_iter().map(|(_, _, _, s)| s.clone()).collect())
    }

    pub fn available_for(&self, role: SourceRole) -> MonitorResult<Vec<Source>> {
        Ok(self
            .available_sources()?
            .into_iter()
            .filter(|s| s.role() == role)
            .collect())
    }

    /// Like `available_for`, but an empty result is QuotaExhausted
    pub fn select(&self, role: SourceRole) -> MonitorResult<Vec<Source>> {
        let available = self.available_for(role)?;
        if available.is_empty() {
            let day = self.today();
            warn!(%day, ?role, "no source within its daily quota");
            return Err(MonitorError::QuotaExhausted { day });
        }
        Ok(available)
    }

    /// Count one dispatch against a source, persisted immediately
    pub fn record_use(&self, source_id: &str) -> MonitorResult<u32> {
        let count = self.store.increment(self.today(), source_id)?;
        debug!(source = source_id, count, "recorded use");
        Ok(count)
    }

    /// Atomically reserve one request on a source. False when spent,
    /// disabled, excluded for today or unknown.
    pub fn claim(&self, source_id: &str) -> MonitorResult<bool> {
        let Some(source) = self.source(source_id).filter(|s| s.enabled) else {
            return Ok(false);
        };
        let day = self.today();
        if self.store.exclusions_for(day)?.contains_key(source_id) {
            debug!(source = source_id, "claim refused, source excluded for today");
            return Ok(false);
        }
        let claimed = self.store.claim(day, source_id, source.daily_quota)?;
        if !claimed {
            debug!(source = source_id, "claim refused, quota spent");
        }
        Ok(claimed)
    }

    /// Take a source that errored out of rotation until the day rolls over
    pub fn mark_unavailable(&self, source_id: &str, reason: &str) -> MonitorResult<()> {
        let day = self.today();
        self.store.exclude(day, source_id, reason)?;
        let error = MonitorError::SourceUnavailable {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        };
        warn!(%day, %error, "source excluded for the rest of the day");
        Ok(())
    }

    /// Sources excluded today, declared order
    pub fn unavailable(&self) -> MonitorResult<Vec<MonitorError>> {
        let excluded = self.store.exclusions_for(self.today())?;
        Ok(self
            .sources
            .iter()
            .filter_map(|s| {
                excluded.get(&s.id).map(|reason| MonitorError::SourceUnavailable {
                    source_id: s.id.clone(),
                    reason: reason.clone(),
                })
            })
            .collect())
    }

    /// Per-source usage for today, declared order
    pub fn usage(&self) -> MonitorResult<Vec<SourceUsage>> {
        let day = self.today();
        let usage = self.store.usage_for(day)?;
        let excluded = self.store.exclusions_for(day)?;
        Ok(self
            .sources
            .iter()
            .map(|s| SourceUsage {
                source_id: s.id.clone(),
                name: s.name.clone(),
                used: usage.get(&s.id).copied().unwrap_or(0),
                quota: s.daily_quota,
                enabled: s.enabled,
                unavailable: excluded.get(&s.id).cloned(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterKind;
    use crate::entities::SourceClass;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn create_test_sources() -> Vec<Source> {
        vec![
            Source::new("tianyancha", "天眼查", SourceClass::Registry, Some(20), AdapterKind::Tianyancha),
            Source::new("qichacha", "企查查", SourceClass::Registry, Some(2), AdapterKind::Qichacha),
            Source::new("gsxt", "公示系统", SourceClass::Registry, None, AdapterKind::Gsxt),
            Source::new("kr36", "36氪", SourceClass::TechMedia, Some(100), AdapterKind::Kr36),
        ]
    }

    fn rotator(store: Arc<dyn UsageStore>, clock: Arc<FixedClock>) -> QuotaRotator {
        QuotaRotator::new(create_test_sources(), store, clock)
    }

    fn ids(sources: &[Source]) -> Vec<&str> {
        sources.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_least_used_first_unbounded_last() {
        let r = rotator(Arc::new(MemoryUsageStore::new()), Arc::new(FixedClock::new(day(1))));

        let fresh = r.available_for(SourceRole::Profile).unwrap();
        assert_eq!(ids(&fresh), vec!["tianyancha", "qichacha", "gsxt"]);

        r.record_use("tianyancha").unwrap();
        let after = r.available_for(SourceRole::Profile).unwrap();
        assert_eq!(ids(&after), vec!["qichacha", "gsxt", "tianyancha"]);
    }

    #[test]
    fn test_quota_exclusion_at_limit() {
        let r = rotator(Arc::new(MemoryUsageStore::new()), Arc::new(FixedClock::new(day(1))));

        r.record_use("qichacha").unwrap();
        assert!(ids(&r.available_sources().unwrap()).contains(&"qichacha"));
        r.record_use("qichacha").unwrap();
        assert!(!ids(&r.available_sources().unwrap()).contains(&"qichacha"));
        assert!(!r.claim("qichacha").unwrap());
    }

    #[test]
    fn test_day_rollover_resets() {
        let clock = Arc::new(FixedClock::new(day(1)));
        let r = rotator(Arc::new(MemoryUsageStore::new()), clock.clone());

        assert!(r.claim("qichacha").unwrap());
        assert!(r.claim("qichacha").unwrap());
        assert!(!r.claim("qichacha").unwrap());

        clock.set(day(2));
        assert!(r.claim("qichacha").unwrap());
        assert_eq!(r.usage().unwrap()[1].used, 1);
    }

    #[test]
    fn test_exhaustion_is_signalled() {
        let sources = vec![Source::new("only", "Only", SourceClass::Registry, Some(1), AdapterKind::Qichacha)];
        let r = QuotaRotator::new(sources, Arc::new(MemoryUsageStore::new()), Arc::new(FixedClock::new(day(1))));

        assert_eq!(r.select(SourceRole::Profile).unwrap().len(), 1);
        r.record_use("only").unwrap();
        let err = r.select(SourceRole::Profile).unwrap_err();
        assert!(matches!(err, MonitorError::QuotaExhausted { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_failed_source_excluded_until_rollover() {
        let clock = Arc::new(FixedClock::new(day(1)));
        let r = rotator(Arc::new(MemoryUsageStore::new()), clock.clone());

        r.mark_unavailable("tianyancha", "Rate limited by source").unwrap();
        assert_eq!(ids(&r.available_for(SourceRole::Profile).unwrap()), vec!["qichacha", "gsxt"]);
        assert!(!r.claim("tianyancha").unwrap());

        let unavailable = r.unavailable().unwrap();
        assert_eq!(unavailable.len(), 1);
        assert!(matches!(
            &unavailable[0],
            MonitorError::SourceUnavailable { source_id, .. } if source_id == "tianyancha"
        ));
        assert_eq!(r.usage().unwrap()[0].status_icon(), "⛔");

        clock.set(day(2));
        assert!(r.claim("tianyancha").unwrap());
        assert!(r.unavailable().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_exclusions_survive_a_new_rotator() {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let clock = Arc::new(FixedClock::new(day(1)));

        let first = rotator(Arc::new(SqliteUsageStore::new(conn.clone())), clock.clone());
        first.mark_unavailable("kr36", "Unexpected HTTP status 503").unwrap();

        let second = rotator(Arc::new(SqliteUsageStore::new(conn)), clock);
        assert!(second.available_for(SourceRole::Search).unwrap().is_empty());
        assert_eq!(second.usage().unwrap()[3].unavailable.as_deref(), Some("Unexpected HTTP status 503"));
    }

    #[test]
    fn test_disabled_and_unknown_sources() {
        let mut sources = create_test_sources();
        sources[3] = sources[3].clone().disabled();
        let r = QuotaRotator::new(sources, Arc::new(MemoryUsageStore::new()), Arc::new(FixedClock::new(day(1))));

        assert!(r.available_for(SourceRole::Search).unwrap().is_empty());
        assert!(!r.claim("kr36").unwrap());
        assert!(!r.claim("nope").unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_across_rotators() {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let clock = Arc::new(FixedClock::new(day(1)));

        let first = rotator(Arc::new(SqliteUsageStore::new(conn.clone())), clock.clone());
        assert!(first.claim("qichacha").unwrap());
        assert!(first.claim("qichacha").unwrap());

        let second = rotator(Arc::new(SqliteUsageStore::new(conn)), clock);
        assert!(!second.claim("qichacha").unwrap());
        let usage = second.usage().unwrap();
        assert_eq!(usage[1].used, 2);
        assert_eq!(usage[1].status_icon(), "🔴");
        assert_eq!(usage[0].status_icon(), "🟢");
    }

    #[test]
    fn test_usage_icons() {
        let row = |used, quota| SourceUsage {
            source_id: "x".into(),
            name: "X".into(),
            used,
            quota,
            enabled: true,
            unavailable: None,
        };
        assert_eq!(row(0, Some(20)).status_icon(), "🟢");
        assert_eq!(row(17, Some(20)).status_icon(), "🟡");
        assert_eq!(row(20, Some(20)).status_icon(), "🔴");
        assert_eq!(row(500, None).status_icon(), "🟢");
    }

    proptest! {
        #[test]
        fn prop_available_never_includes_spent_sources(uses in prop::collection::vec(0usize..4, 0..60)) {
            let r = rotator(Arc::new(MemoryUsageStore::new()), Arc::new(FixedClock::new(day(1))));
            let sources = create_test_sources();
            for i in uses {
                r.record_use(&sources[i].id).unwrap();
            }

            let usage: HashMap<String, u32> = r
                .usage()
                .unwrap()
                .into_iter()
                .map(|u| (u.source_id, u.used))
                .collect();
            for s in r.available_sources().unwrap() {
                prop_assert!(s.has_budget(usage[&s.id]));
            }
            for s in &sources {
                let listed = r.available_sources().unwrap().iter().any(|a| a.id == s.id);
                prop_assert_eq!(listed, s.has_budget(usage[&s.id]));
            }
        }
    }
}
