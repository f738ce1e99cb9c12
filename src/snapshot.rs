// 📸 Snapshots - point-in-time registry profiles and their deltas
//
// Identity (the entity) has many values over time. A new snapshot never
// mutates an old one: versions are appended, and `valid_until` of a
// version is simply the `valid_from` of its successor.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::registry::RegistryProfile;

/// Capital increase (percent) at or above which a change is "strong"
pub const STRONG_CAPITAL_PCT: f64 = 10.0;

// ============================================================================
// CAPITAL NORMALIZATION
// ============================================================================

fn re_capital_amount() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*(亿|万)?").expect("hardcoded regex"))
}

/// "5000万人民币" → 50_000_000.0, "1.2亿" → 120_000_000.0, "300" → 300.0
pub fn normalize_capital(raw: &str) -> Option<f64> {
    let caps = re_capital_amount().captures(raw)?;
    let value: f64 = caps[1].replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("亿") => 100_000_000.0,
        Some("万") => 10_000.0,
        _ => 1.0,
    };
    Some((value * multiplier * 100.0).round() / 100.0)
}

/// Currency named in a capital string; None when unstated
pub fn capital_currency(raw: &str) -> Option<&'static str> {
    const CURRENCIES: &[(&str, &str)] = &[
        ("美元", "美元"),
        ("港元", "港元"),
        ("港币", "港元"),
        ("欧元", "欧元"),
        ("人民币", "人民币"),
        ("元", "人民币"),
    ];
    CURRENCIES.iter().find(|(label, _)| raw.contains(label)).map(|(_, currency)| *currency)
}

// ============================================================================
// INSTITUTIONAL SHAREHOLDER HEURISTIC
// ============================================================================

const INSTITUTIONAL_CJK: &[&str] = &[
    "投资", "资本", "基金", "创投", "创业投资", "合伙企业", "有限合伙", "控股", "集团", "资产管理",
];

fn re_institutional_latin() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(capital|ventures?|investments?|funds?|partners|holdings?|LP|GP)\b")
            .expect("hardcoded regex")
    })
}

/// Shareholder name that looks like a fund / investment vehicle
pub fn is_institutional(name: &str) -> bool {
    INSTITUTIONAL_CJK.iter().any(|kw| name.contains(kw)) || re_institutional_latin().is_match(name)
}

// ============================================================================
// SNAPSHOT + HISTORY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable id of this version
    pub id: String,

    /// Canonical entity name
    pub entity: String,

    /// 1-based, monotonically increasing per entity
    pub version: i64,

    pub profile: RegistryProfile,

    pub valid_from: DateTime<Utc>,

    /// Derived on read from the successor version (None = current)
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(entity: &str, version: i64, profile: RegistryProfile) -> Self {
        Snapshot {
            id: uuid::Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            version,
            profile,
            valid_from: Utc::now(),
            valid_until: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn was_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.valid_from <= time && self.valid_until.map_or(true, |until| until > time)
    }
}

/// All versions of one entity's profile, oldest first
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    versions: Vec<Snapshot>,
}

impl SnapshotHistory {
    /// Build from stored versions (any order); derives valid_until
    pub fn from_versions(mut versions: Vec<Snapshot>) -> Self {
        versions.sort_by_key(|s| s.version);
        let successors: Vec<Option<DateTime<Utc>>> =
            versions.iter().skip(1).map(|s| Some(s.valid_from)).chain(std::iter::once(None)).collect();
        for (snapshot, until) in versions.iter_mut().zip(successors) {
            snapshot.valid_until = until;
        }
        SnapshotHistory { versions }
    }

    /// Append a new current version; the previous one is kept untouched
    pub fn append(&mut self, entity: &str, profile: RegistryProfile) -> &Snapshot {
        let version = self.versions.last().map(|s| s.version + 1).unwrap_or(1);
        let snapshot = Snapshot::new(entity, version, profile);
        if let Some(last) = self.versions.last_mut() {
            last.valid_until = Some(snapshot.valid_from);
        }
        self.versions.push(snapshot);
        &self.versions[self.versions.len() - 1]
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.versions.last()
    }

    pub fn previous(&self) -> Option<&Snapshot> {
        self.versions.len().checked_sub(2).map(|i| &self.versions[i])
    }

    pub fn as_of(&self, time: DateTime<Utc>) -> Option<&Snapshot> {
        self.versions.iter().find(|s| s.was_valid_at(time))
    }

    pub fn versions(&self) -> &[Snapshot] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

// ============================================================================
// CHANGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    CapitalChange,
    LegalRepresentativeChange,
    StatusChange,
    ShareholderAdded,
    ShareholderRemoved,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::CapitalChange => "capital_change",
            ChangeKind::LegalRepresentativeChange => "legal_representative_change",
            ChangeKind::StatusChange => "status_change",
            ChangeKind::ShareholderAdded => "shareholder_added",
            ChangeKind::ShareholderRemoved => "shareholder_removed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Strong,
    Weak,
    /// Observed, but not funding evidence (e.g. capital decrease)
    Neutral,
}

/// Typed delta between two consecutive snapshots of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,

    #[serde(default)]
    pub old: Option<String>,

    #[serde(default)]
    pub new: Option<String>,

    /// Normalized amounts, capital changes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_amount: Option<f64>,

    /// Percentage delta, capital changes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<f64>,

    pub strength: SignalStrength,

    /// Registry source of the newer snapshot
    pub source_id: String,
}

impl Change {
    fn new(kind: ChangeKind, old: Option<&str>, new: Option<&str>, strength: SignalStrength, source_id: &str) -> Self {
        Change {
            kind,
            old: old.map(str::to_string),
            new: new.map(str::to_string),
            old_amount: None,
            new_amount: None,
            pct: None,
            strength,
            source_id: source_id.to_string(),
        }
    }

    /// Capital increase in base units (None for anything else)
    pub fn capital_increase(&self) -> Option<f64> {
        match (self.kind, self.old_amount, self.new_amount) {
            (ChangeKind::CapitalChange, Some(old), Some(new)) if new > old => Some(new - old),
            _ => None,
        }
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        let old = self.old.as_deref().unwrap_or("-");
        let new = self.new.as_deref().unwrap_or("-");
        match self.kind {
            ChangeKind::CapitalChange => match self.pct {
                Some(pct) => format!("注册资本变更: {} → {} ({:+.1}%)", old, new, pct),
                None => format!("注册资本变更: {} → {}", old, new),
            },
            ChangeKind::LegalRepresentativeChange => format!("法定代表人变更: {} → {}", old, new),
            ChangeKind::StatusChange => format!("登记状态变更: {} → {}", old, new),
            ChangeKind::ShareholderAdded => format!("新增股东: {}", new),
            ChangeKind::ShareholderRemoved => format!("退出股东: {}", old),
        }
    }
}

// ============================================================================
// DIFFER
// ============================================================================

/// Pure comparison of two profiles; no state, no I/O
#[derive(Debug, Clone)]
pub struct SnapshotDiffer {
    /// Percent increase at or above which a capital change is strong
    pub strong_capital_pct: f64,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        SnapshotDiffer {
            strong_capital_pct: STRONG_CAPITAL_PCT,
        }
    }
}

impl SnapshotDiffer {
    pub fn new(strong_capital_pct: f64) -> Self {
        SnapshotDiffer { strong_capital_pct }
    }

    /// Changes from `old` to `new`. No previous profile ⇒ no changes.
    pub fn diff(&self, old: Option<&RegistryProfile>, new: &RegistryProfile) -> Vec<Change> {
        let Some(old) = old else {
            return Vec::new();
        };
        let source = new.source_id.as_str();
        let mut changes = Vec::new();

        if let Some(change) = self.diff_capital(old, new) {
            changes.push(change);
        }

        // Fields missing on either side are parse gaps, not changes
        if let (Some(before), Some(after)) = (&old.legal_representative, &new.legal_representative) {
            if before != after {
                changes.push(Change::new(
                    ChangeKind::LegalRepresentativeChange,
                    Some(before),
                    Some(after),
                    SignalStrength::Weak,
                    source,
                ));
            }
        }

        if let (Some(before), Some(after)) = (&old.status, &new.status) {
            if before != after {
                changes.push(Change::new(
                    ChangeKind::StatusChange,
                    Some(before),
                    Some(after),
                    SignalStrength::Weak,
                    source,
                ));
            }
        }

        if !old.shareholders.is_empty() && !new.shareholders.is_empty() {
            let before: BTreeSet<&str> = old.shareholders.iter().map(String::as_str).collect();
            let after: BTreeSet<&str> = new.shareholders.iter().map(String::as_str).collect();

            for name in after.difference(&before) {
                let strength = if is_institutional(name) {
                    SignalStrength::Strong
                } else {
                    SignalStrength::Weak
                };
                changes.push(Change::new(ChangeKind::ShareholderAdded, None, Some(name), strength, source));
            }
            for name in before.difference(&after) {
                changes.push(Change::new(
                    ChangeKind::ShareholderRemoved,
                    Some(name),
                    None,
                    SignalStrength::Weak,
                    source,
                ));
            }
        }

        changes
    }

    /// Diff the two most recent versions of a history
    pub fn diff_latest(&self, history: &SnapshotHistory) -> Vec<Change> {
        match (history.previous(), history.current()) {
            (Some(prev), Some(curr)) => self.diff(Some(&prev.profile), &curr.profile),
            _ => Vec::new(),
        }
    }

    fn diff_capital(&self, old: &RegistryProfile, new: &RegistryProfile) -> Option<Change> {
        let before = old.capital_amount?;
        let after = new.capital_amount?;

        // Amounts in different currencies don't compare
        let old_currency = old.capital.as_deref().and_then(capital_currency);
        let new_currency = new.capital.as_deref().and_then(capital_currency);
        if let (Some(a), Some(b)) = (old_currency, new_currency) {
            if a != b {
                return Some(Change::new(
                    ChangeKind::CapitalChange,
                    old.capital.as_deref(),
                    new.capital.as_deref(),
                    SignalStrength::Neutral,
                    &new.source_id,
                ));
            }
        }

        if (after - before).abs() < f64::EPSILON {
            return None;
        }

        let pct = if before > 0.0 {
            Some((after - before) / before * 100.0)
        } else {
            None
        };

        let strength = match pct {
            _ if after < before => SignalStrength::Neutral,
            Some(p) if p >= self.strong_capital_pct => SignalStrength::Strong,
            Some(_) => SignalStrength::Weak,
            None => SignalStrength::Strong,
        };

        let mut change = Change::new(
            ChangeKind::CapitalChange,
            old.capital.as_deref(),
            new.capital.as_deref(),
            strength,
            &new.source_id,
        );
        change.old_amount = Some(before);
        change.new_amount = Some(after);
        change.pct = pct;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(capital: &str, legal: &str, shareholders: &[&str]) -> RegistryProfile {
        let mut p = RegistryProfile::new("Acme", "tianyancha")
            .with_capital(capital)
            .with_shareholders(shareholders);
        p.legal_representative = Some(legal.to_string());
        p.status = Some("存续".to_string());
        p
    }

    #[test]
    fn test_normalize_capital() {
        assert_eq!(normalize_capital("5000万人民币"), Some(50_000_000.0));
        assert_eq!(normalize_capital("1.2亿"), Some(120_000_000.0));
        assert_eq!(normalize_capital("1,000万美元"), Some(10_000_000.0));
        assert_eq!(normalize_capital("300"), Some(300.0));
        assert_eq!(normalize_capital("未公开"), None);
        // A stray comma is not a number
        assert_eq!(normalize_capital("注册资本, 2000万"), Some(20_000_000.0));
    }

    #[test]
    fn test_capital_currency() {
        assert_eq!(capital_currency("1,000万美元"), Some("美元"));
        assert_eq!(capital_currency("5000万人民币"), Some("人民币"));
        assert_eq!(capital_currency("800元"), Some("人民币"));
        assert_eq!(capital_currency("300万港币"), Some("港元"));
        assert_eq!(capital_currency("100"), None);
    }

    #[test]
    fn test_currency_switch_is_not_an_increase() {
        let differ = SnapshotDiffer::default();
        let changes = differ.diff(
            Some(&profile("1000万美元", "张三", &[])),
            &profile("7000万人民币", "张三", &[]),
        );

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::CapitalChange);
        assert_eq!(changes[0].strength, SignalStrength::Neutral);
        assert!(changes[0].pct.is_none());
        assert!(changes[0].capital_increase().is_none());

        // Same amount, same currency: nothing to report
        let same = differ.diff(Some(&profile("1000万美元", "张三", &[])), &profile("1000万美元", "张三", &[]));
        assert!(same.is_empty());
    }

    #[test]
    fn test_institutional_heuristic() {
        assert!(is_institutional("深圳市创新投资集团有限公司"));
        assert!(is_institutional("XYZ Capital"));
        assert!(is_institutional("Acme Ventures LP"));
        assert!(!is_institutional("张三"));
        assert!(!is_institutional("Philip Wong"));
    }

    #[test]
    fn test_first_snapshot_yields_no_changes() {
        let differ = SnapshotDiffer::default();
        let mut history = SnapshotHistory::default();
        history.append("Acme", profile("100", "张三", &["张三"]));

        assert!(differ.diff(None, &history.current().unwrap().profile).is_empty());
        assert!(differ.diff_latest(&history).is_empty());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_capital_increase_is_strong() {
        let differ = SnapshotDiffer::default();
        let changes = differ.diff(Some(&profile("100", "张三", &[])), &profile("135", "张三", &[]));

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.kind, ChangeKind::CapitalChange);
        assert_eq!(change.old.as_deref(), Some("100"));
        assert_eq!(change.new.as_deref(), Some("135"));
        assert!((change.pct.unwrap() - 35.0).abs() < 1e-9);
        assert_eq!(change.strength, SignalStrength::Strong);
        assert_eq!(change.capital_increase(), Some(35.0));
    }

    #[test]
    fn test_small_increase_is_weak_and_decrease_neutral() {
        let differ = SnapshotDiffer::default();
        let weak = differ.diff(Some(&profile("100", "a", &[])), &profile("105", "a", &[]));
        assert_eq!(weak[0].strength, SignalStrength::Weak);

        let down = differ.diff(Some(&profile("100", "a", &[])), &profile("80", "a", &[]));
        assert_eq!(down[0].strength, SignalStrength::Neutral);
        assert!(down[0].capital_increase().is_none());
    }

    #[test]
    fn test_shareholder_and_legal_changes() {
        let differ = SnapshotDiffer::default();
        let old = profile("100", "张三", &["张三", "李四"]);
        let new = profile("100", "王五", &["张三", "红杉资本中国基金", "赵六"]);

        let changes = differ.diff(Some(&old), &new);
        let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();

        assert!(kinds.contains(&ChangeKind::LegalRepresentativeChange));
        assert_eq!(kinds.iter().filter(|k| **k == ChangeKind::ShareholderAdded).count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == ChangeKind::ShareholderRemoved).count(), 1);

        let fund = changes.iter().find(|c| c.new.as_deref() == Some("红杉资本中国基金")).unwrap();
        assert_eq!(fund.strength, SignalStrength::Strong);
        let person = changes.iter().find(|c| c.new.as_deref() == Some("赵六")).unwrap();
        assert_eq!(person.strength, SignalStrength::Weak);
    }

    #[test]
    fn test_history_is_append_only() {
        let mut history = SnapshotHistory::default();
        history.append("Acme", profile("100", "a", &[]));
        let first_id = history.current().unwrap().id.clone();
        history.append("Acme", profile("135", "a", &[]));

        assert_eq!(history.len(), 2);
        assert_eq!(history.previous().unwrap().id, first_id);
        assert!(!history.previous().unwrap().is_current());
        assert!(history.current().unwrap().is_current());
        assert_eq!(history.current().unwrap().version, 2);

        let changes = SnapshotDiffer::default().diff_latest(&history);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_from_versions_derives_validity() {
        let mut v1 = Snapshot::new("Acme", 1, profile("100", "a", &[]));
        let mut v2 = Snapshot::new("Acme", 2, profile("135", "a", &[]));
        v1.valid_from = Utc::now() - chrono::Duration::days(2);
        v2.valid_from = Utc::now() - chrono::Duration::days(1);

        let history = SnapshotHistory::from_versions(vec![v2.clone(), v1]);
        assert_eq!(history.versions()[0].valid_until, Some(v2.valid_from));
        assert!(history.current().unwrap().is_current());

        let yesterday_noon = Utc::now() - chrono::Duration::hours(36);
        assert_eq!(history.as_of(yesterday_noon).unwrap().version, 1);
    }
}
