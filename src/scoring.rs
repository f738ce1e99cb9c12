// 🎯 Funding Scorer - signals, weighting and the per-entity verdict
//
// Pipeline per check:
//   SearchItem → extract → per-item confidence × class weight (cap 95)
//   Change     → fixed base weight (cap 95)
//   all signals → dedup → top N → aggregate confidence → verdict
//
// Scoring is a pure function of its inputs: same items and changes, same
// confidence and verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::adapters::SearchItem;
use crate::deduplication::{DeduplicationEngine, DEFAULT_PREFIX_CHARS};
use crate::entities::{Source, SourceClass};
use crate::error::MonitorResult;
use crate::extractor::{KeywordSets, SignalExtractor, MAX_INVESTORS};
use crate::snapshot::{Change, ChangeKind, SignalStrength};

const MAX_TITLE_CHARS: usize = 100;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Base weights for registry changes (used as the signal's confidence)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeWeights {
    pub capital_strong: u32,
    pub capital_weak: u32,
    pub capital_decrease: u32,
    pub shareholder_institutional: u32,
    pub shareholder_individual: u32,
    pub shareholder_removed: u32,
    pub legal_representative: u32,
    pub status: u32,
}

impl Default for ChangeWeights {
    fn default() -> Self {
        ChangeWeights {
            capital_strong: 35,
            capital_weak: 10,
            capital_decrease: 0,
            shareholder_institutional: 30,
            shareholder_individual: 15,
            shareholder_removed: 5,
            legal_representative: 10,
            status: 5,
        }
    }
}

impl ChangeWeights {
    pub fn weight_for(&self, change: &Change) -> u32 {
        match (change.kind, change.strength) {
            (ChangeKind::CapitalChange, SignalStrength::Strong) => self.capital_strong,
            (ChangeKind::CapitalChange, SignalStrength::Weak) => self.capital_weak,
            (ChangeKind::CapitalChange, SignalStrength::Neutral) => self.capital_decrease,
            (ChangeKind::ShareholderAdded, SignalStrength::Strong) => self.shareholder_institutional,
            (ChangeKind::ShareholderAdded, _) => self.shareholder_individual,
            (ChangeKind::ShareholderRemoved, _) => self.shareholder_removed,
            (ChangeKind::LegalRepresentativeChange, _) => self.legal_representative,
            (ChangeKind::StatusChange, _) => self.status,
        }
    }
}

/// Every number the scorer uses. Class weights and bonuses are tuning
/// parameters; only "higher class weight ⇒ more trust" is relied upon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub class_weights: BTreeMap<SourceClass, f64>,
    pub funding_keyword_points: u32,
    pub investor_keyword_points: u32,
    pub round_points: u32,
    pub amount_points: u32,
    pub investor_points: u32,
    pub item_cap: u32,
    pub aggregate_cap: u32,
    /// Signals kept on an assessment after dedup
    pub max_signals: usize,
    pub bonus_two_sources: u32,
    pub bonus_three_sources: u32,
    pub dedup_prefix_chars: usize,
    pub change_weights: ChangeWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            class_weights: SourceClass::all().iter().map(|c| (*c, c.default_weight())).collect(),
            funding_keyword_points: 10,
            investor_keyword_points: 8,
            round_points: 20,
            amount_points: 15,
            investor_points: 5,
            item_cap: 95,
            aggregate_cap: 95,
            max_signals: 10,
            bonus_two_sources: 15,
            bonus_three_sources: 25,
            dedup_prefix_chars: DEFAULT_PREFIX_CHARS,
            change_weights: ChangeWeights::default(),
        }
    }
}

impl ScoringConfig {
    pub fn class_weight(&self, class: SourceClass) -> f64 {
        self.class_weights
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_weight())
            .max(0.0)
    }

    fn corroboration_bonus(&self, distinct_sources: usize) -> u32 {
        match distinct_sources {
            n if n >= 3 => self.bonus_three_sources,
            2 => self.bonus_two_sources,
            _ => 0,
        }
    }
}

// ============================================================================
// SIGNAL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    /// Keyword-matched text item
    Text,
    /// Registry snapshot change
    Registry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub title: String,

    #[serde(default)]
    pub url: Option<String>,

    pub source_id: String,
    pub source_class: SourceClass,
    pub origin: SignalOrigin,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub investor_keywords: Vec<String>,

    #[serde(default)]
    pub investors: Vec<String>,

    #[serde(default)]
    pub round: Option<String>,

    #[serde(default)]
    pub amount: Option<String>,

    /// Registry change behind this signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Change>,

    /// 0..=item cap
    pub confidence: u32,

    /// Class weight applied (1.0 for registry changes)
    pub class_weight: f64,
}

impl Signal {
    /// Bare text signal; confidence filled by the scorer
    pub fn text(title: &str, source_id: &str, class: SourceClass, class_weight: f64) -> Self {
        Signal {
            title: title.chars().take(MAX_TITLE_CHARS).collect(),
            url: None,
            source_id: source_id.to_string(),
            source_class: class,
            origin: SignalOrigin::Text,
            keywords: Vec::new(),
            investor_keywords: Vec::new(),
            investors: Vec::new(),
            round: None,
            amount: None,
            change: None,
            confidence: 0,
            class_weight,
        }
    }

    pub fn is_registry(&self) -> bool {
        self.origin == SignalOrigin::Registry
    }
}

// ============================================================================
// FUNDING ASSESSMENT
// ============================================================================

/// Verdict for one entity for one check. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAssessment {
    pub id: String,
    pub entity: String,
    pub has_signal: bool,

    /// 0..=95
    pub confidence: u32,

    /// Distinct sources behind the kept signals, sorted
    pub sources: Vec<String>,

    /// Deduplicated, highest confidence first, capped
    pub signals: Vec<Signal>,

    /// Registry changes observed in this check
    #[serde(default)]
    pub changes: Vec<Change>,

    #[serde(default)]
    pub estimated_round: Option<String>,

    #[serde(default)]
    pub estimated_amount: Option<String>,

    /// Threshold the verdict was taken against
    pub threshold: u32,

    pub checked_at: DateTime<Utc>,
}

impl FundingAssessment {
    /// Zero-confidence verdict (no items from any source)
    pub fn empty(entity: &str, threshold: u32) -> Self {
        FundingAssessment {
            id: uuid::Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            has_signal: false,
            confidence: 0,
            sources: Vec::new(),
            signals: Vec::new(),
            changes: Vec::new(),
            estimated_round: None,
            estimated_amount: None,
            threshold,
            checked_at: Utc::now(),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_high_confidence(&self, threshold: u32) -> bool {
        self.has_signal && self.confidence >= threshold
    }
}

// ============================================================================
// ESTIMATES FROM REGISTRY CHANGES
// ============================================================================

/// "1.5亿", "3500万", "800元"
pub fn format_amount(amount: f64) -> String {
    if amount >= 100_000_000.0 {
        format!("{:.1}亿", amount / 100_000_000.0)
    } else if amount >= 10_000.0 {
        format!("{:.0}万", amount / 10_000.0)
    } else {
        format!("{:.0}元", amount)
    }
}

/// Round and amount range implied by a registered-capital increase.
/// Registered capital usually moves by 10-30% of the money raised.
pub fn estimate_from_capital(change: &Change) -> Option<(String, String)> {
    let increase = change.capital_increase()?;
    let round = match change.pct {
        Some(pct) if pct >= 30.0 => "A轮",
        Some(pct) if pct >= 15.0 => "B轮",
        _ => "C轮+",
    };
    let amount = format!("{} - {}", format_amount(increase * 3.0), format_amount(increase * 10.0));
    Some((round.to_string(), amount))
}

// ============================================================================
// SCORER
// ============================================================================

pub struct FundingScorer {
    config: ScoringConfig,
    extractor: SignalExtractor,
    dedup: DeduplicationEngine,
}

impl FundingScorer {
    pub fn new(config: ScoringConfig, keywords: &KeywordSets) -> MonitorResult<Self> {
        let dedup = DeduplicationEngine::with_prefix(config.dedup_prefix_chars);
        Ok(FundingScorer {
            extractor: SignalExtractor::new(keywords)?,
            config,
            dedup,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Per-item signal, None when the item is noise or has no funding keyword
    pub fn score_item(&self, item: &SearchItem, class: SourceClass) -> Option<Signal> {
        let extraction = self.extractor.extract(&item.text())?;
        let cfg = &self.config;

        let mut raw = cfg.funding_keyword_points * extraction.funding_keywords.len() as u32
            + cfg.investor_keyword_points * extraction.investor_keywords.len() as u32
            + cfg.investor_points * extraction.investors.len().min(MAX_INVESTORS) as u32;
        if extraction.round.is_some() {
            raw += cfg.round_points;
        }
        if extraction.amount.is_some() {
            raw += cfg.amount_points;
        }

        let weight = cfg.class_weight(class);
        let weighted = (raw as f64 * weight).floor() as u32;

        let mut signal = Signal::text(&item.title, &item.source_id, class, weight);
        signal.url = item.url.clone();
        signal.keywords = extraction.funding_keywords;
        signal.investor_keywords = extraction.investor_keywords;
        signal.investors = extraction.investors;
        signal.round = extraction.round;
        signal.amount = extraction.amount;
        signal.confidence = weighted.min(cfg.item_cap);
        Some(signal)
    }

    /// Registry change as a signal with its fixed base weight (None at weight 0)
    pub fn change_signal(&self, change: &Change) -> Option<Signal> {
        let weight = self.config.change_weights.weight_for(change);
        if weight == 0 {
            return None;
        }
        let mut signal = Signal::text(&change.describe(), &change.source_id, SourceClass::Registry, 1.0);
        signal.origin = SignalOrigin::Registry;
        signal.keywords = vec![change.kind.as_str().to_string()];
        if let Some(investor) = change.new.as_ref().filter(|_| change.kind == ChangeKind::ShareholderAdded) {
            signal.investors = vec![investor.clone()];
        }
        signal.change = Some(change.clone());
        signal.confidence = weight.min(self.config.item_cap);
        Some(signal)
    }

    /// Dedup, rank and cap a signal list; returns it with its aggregate
    pub fn combine(&self, signals: Vec<Signal>) -> (Vec<Signal>, u32) {
        let mut kept = self.dedup.deduplicate(signals);
        kept.truncate(self.config.max_signals);
        let confidence = self.aggregate(&kept);
        (kept, confidence)
    }

    /// Aggregate confidence over signals ranked highest first.
    ///
    /// For every prefix of the ranking: mean confidence + corroboration
    /// bonus for the distinct sources in that prefix. The best prefix wins.
    /// Over the full list this is the plain mean + bonus; taking the best
    /// prefix keeps a weaker corroborating story from dragging the score
    /// below what the stronger ones already established.
    pub fn aggregate(&self, ranked: &[Signal]) -> u32 {
        let mut best = 0.0_f64;
        let mut sum = 0.0_f64;
        let mut sources: HashSet<&str> = HashSet::new();

        for (i, signal) in ranked.iter().enumerate() {
            sum += signal.confidence as f64;
            sources.insert(signal.source_id.as_str());
            let mean = sum / (i + 1) as f64;
            let candidate = mean + self.config.corroboration_bonus(sources.len()) as f64;
            best = best.max(candidate);
        }

        (best.floor().max(0.0) as u32).min(self.config.aggregate_cap)
    }

    /// Score one check. Items whose source is missing from `catalog` are
    /// weighted as general media.
    pub fn assess(
        &self,
        entity: &str,
        items: &[SearchItem],
        changes: &[Change],
        catalog: &[Source],
        threshold: u32,
    ) -> FundingAssessment {
        let classes: HashMap<&str, SourceClass> =
            catalog.iter().map(|s| (s.id.as_str(), s.class)).collect();

        let mut signals: Vec<Signal> = items
            .iter()
            .filter_map(|item| {
                let class = classes
                    .get(item.source_id.as_str())
                    .copied()
                    .unwrap_or(SourceClass::GeneralMedia);
                self.score_item(item, class)
            })
            .collect();
        signals.extend(changes.iter().filter_map(|c| self.change_signal(c)));

        let mut assessment = FundingAssessment::empty(entity, threshold);
        assessment.changes = changes.to_vec();
        if signals.is_empty() {
            debug!(entity, items = items.len(), "no signals");
            return assessment;
        }

        let (kept, confidence) = self.combine(signals);

        let mut sources: Vec<String> = kept.iter().map(|s| s.source_id.clone()).collect();
        sources.sort();
        sources.dedup();

        let (round, amount) = self.estimates(&kept, changes);

        assessment.has_signal = !kept.is_empty() && confidence >= threshold;
        assessment.confidence = confidence;
        assessment.sources = sources;
        assessment.signals = kept;
        assessment.estimated_round = round;
        assessment.estimated_amount = amount;
        assessment
    }

    /// Most frequent extracted round (ties → highest ranked), first ranked
    /// amount; registry capital increase as fallback for either
    fn estimates(&self, ranked: &[Signal], changes: &[Change]) -> (Option<String>, Option<String>) {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for round in ranked.iter().filter_map(|s| s.round.as_deref()) {
            match counts.iter_mut().find(|(r, _)| *r == round) {
                Some((_, n)) => *n += 1,
                None => counts.push((round, 1)),
            }
        }
        let mut round = counts
            .iter()
            .fold(None::<(&str, usize)>, |best, &(r, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((r, n)),
            })
            .map(|(r, _)| r.to_string());

        let mut amount = ranked.iter().find_map(|s| s.amount.clone());

        if round.is_none() || amount.is_none() {
            if let Some((est_round, est_amount)) = changes.iter().find_map(estimate_from_capital) {
                round = round.or(Some(est_round));
                amount = amount.or(Some(est_amount));
            }
        }
        (round, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterKind;
    use crate::registry::RegistryProfile;
    use crate::snapshot::SnapshotDiffer;
    use proptest::prelude::*;

    fn scorer() -> FundingScorer {
        FundingScorer::new(ScoringConfig::default(), &KeywordSets::default()).unwrap()
    }

    fn catalog() -> Vec<Source> {
        vec![
            Source::new("itjuzi", "IT桔子", SourceClass::FundingDatabase, Some(30), AdapterKind::ItJuzi),
            Source::new("kr36", "36氪", SourceClass::TechMedia, Some(100), AdapterKind::Kr36),
            Source::new("vcbeat", "动脉网", SourceClass::VerticalMedia, Some(100), AdapterKind::Vcbeat),
            Source::new("aiqicha_search", "爱企查", SourceClass::RegistryLookup, Some(50), AdapterKind::AiqichaSearch),
        ]
    }

    fn signal(title: &str, source: &str, confidence: u32) -> Signal {
        let mut s = Signal::text(title, source, SourceClass::GeneralMedia, 1.0);
        s.confidence = confidence;
        s
    }

    #[test]
    fn test_single_item_score() {
        let item = SearchItem::new("Acme raises Series B led by XYZ Capital", "", "itjuzi");
        let s = scorer().score_item(&item, SourceClass::FundingDatabase).unwrap();

        // (3×10 + 8 + 20 + 5) × 1.5 = 94.5
        assert_eq!(s.confidence, 94);
        assert_eq!(s.round.as_deref(), Some("B轮"));
        assert_eq!(s.class_weight, 1.5);
    }

    #[test]
    fn test_item_cap() {
        let item = SearchItem::new(
            "Acme 完成5亿元C轮融资 红杉资本领投 高瓴资本 IDG 跟投 估值 战略投资",
            "",
            "itjuzi",
        );
        let s = scorer().score_item(&item, SourceClass::FundingDatabase).unwrap();
        assert_eq!(s.confidence, 95);
    }

    #[test]
    fn test_near_duplicate_scenario() {
        let items = vec![
            SearchItem::new("Acme raises Series B led by XYZ Capital", "", "itjuzi"),
            SearchItem::new("Acme raises Series B led by XYZ Capital", "", "kr36"),
        ];
        let a = scorer().assess("Acme", &items, &[], &catalog(), 30);

        assert_eq!(a.signals.len(), 1);
        assert_eq!(a.signals[0].source_id, "itjuzi");
        assert_eq!(a.sources, vec!["itjuzi"]);
        assert_eq!(a.confidence, 94);
        assert!(a.has_signal);
    }

    #[test]
    fn test_distinct_stories_corroborate() {
        let single = scorer().assess(
            "Acme",
            &[SearchItem::new("Acme closes Series B funding round", "", "kr36")],
            &[],
            &catalog(),
            30,
        );
        let items = vec![
            SearchItem::new("Acme closes Series B funding round", "", "kr36"),
            SearchItem::new("Acme 完成B轮融资", "", "vcbeat"),
        ];
        let both = scorer().assess("Acme", &items, &[], &catalog(), 30);

        assert_eq!(both.source_count(), 2);
        assert!(both.confidence > single.confidence);
    }

    #[test]
    fn test_bonus_tiers() {
        let s = scorer();
        assert_eq!(s.aggregate(&[signal("a", "x", 40)]), 40);
        assert_eq!(s.aggregate(&[signal("a", "x", 40), signal("b", "y", 40)]), 55);
        assert_eq!(
            s.aggregate(&[signal("a", "x", 40), signal("b", "y", 40), signal("c", "z", 40)]),
            65
        );
        assert_eq!(s.aggregate(&[signal("a", "x", 40), signal("b", "x", 40)]), 40);
        assert_eq!(s.aggregate(&[]), 0);
    }

    #[test]
    fn test_no_items_is_zero_not_error() {
        let a = scorer().assess("Acme", &[], &[], &catalog(), 30);
        assert!(!a.has_signal);
        assert_eq!(a.confidence, 0);
        assert!(a.sources.is_empty());
    }

    #[test]
    fn test_noise_only_items_produce_nothing() {
        let items = vec![SearchItem::new("Acme 融资余额增加，融资买入额居前", "", "itjuzi")];
        let a = scorer().assess("Acme", &items, &[], &catalog(), 30);
        assert!(a.signals.is_empty());
        assert!(!a.has_signal);
    }

    #[test]
    fn test_threshold_controls_verdict() {
        let items = vec![SearchItem::new("Acme 获投", "", "aiqicha_search")];
        let low = scorer().assess("Acme", &items, &[], &catalog(), 5);
        let high = scorer().assess("Acme", &items, &[], &catalog(), 60);
        assert_eq!(low.confidence, high.confidence);
        assert!(low.has_signal);
        assert!(!high.has_signal);
    }

    #[test]
    fn test_registry_changes_only() {
        let old = RegistryProfile::new("Acme", "tianyancha")
            .with_capital("100万")
            .with_shareholders(&["张三"]);
        let new = RegistryProfile::new("Acme", "tianyancha")
            .with_capital("135万")
            .with_shareholders(&["张三", "红杉资本中国基金"]);
        let changes = SnapshotDiffer::default().diff(Some(&old), &new);

        let a = scorer().assess("Acme", &[], &changes, &catalog(), 30);

        // capital strong 35, institutional shareholder 30, one source
        assert_eq!(a.signals.len(), 2);
        assert!(a.signals.iter().all(|s| s.is_registry()));
        assert_eq!(a.confidence, 35);
        assert!(a.has_signal);
        assert_eq!(a.sources, vec!["tianyancha"]);
        assert_eq!(a.estimated_round.as_deref(), Some("A轮"));
        assert_eq!(a.estimated_amount.as_deref(), Some("105万 - 350万"));
    }

    #[test]
    fn test_capital_decrease_is_not_a_signal() {
        let old = RegistryProfile::new("Acme", "gsxt").with_capital("100万");
        let new = RegistryProfile::new("Acme", "gsxt").with_capital("80万");
        let changes = SnapshotDiffer::default().diff(Some(&old), &new);
        assert_eq!(changes.len(), 1);

        let a = scorer().assess("Acme", &[], &changes, &catalog(), 30);
        assert!(a.signals.is_empty());
        assert_eq!(a.changes.len(), 1);
    }

    #[test]
    fn test_estimates_prefer_text() {
        let items = vec![
            SearchItem::new("Acme 完成2亿元B轮融资", "", "itjuzi"),
            SearchItem::new("Acme B轮融资落地", "", "kr36"),
            SearchItem::new("Acme 获战略投资", "", "vcbeat"),
        ];
        let a = scorer().assess("Acme", &items, &[], &catalog(), 30);
        assert_eq!(a.estimated_round.as_deref(), Some("B轮"));
        assert_eq!(a.estimated_amount.as_deref(), Some("2亿元"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(150_000_000.0), "1.5亿");
        assert_eq!(format_amount(35_000_000.0), "3500万");
        assert_eq!(format_amount(800.0), "800元");
    }

    #[test]
    fn test_custom_class_weights() {
        let mut config = ScoringConfig::default();
        config.class_weights.insert(SourceClass::TechMedia, 2.0);
        let s = FundingScorer::new(config, &KeywordSets::default()).unwrap();

        let item = SearchItem::new("Acme 获投", "", "kr36");
        assert_eq!(s.score_item(&item, SourceClass::TechMedia).unwrap().confidence, 20);
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    const HEADLINES: &[&str] = &[
        "Acme 完成B轮融资",
        "Acme raises Series A led by XYZ Capital",
        "Acme 获红杉资本战略投资",
        "Acme 融资余额创新高",
        "Acme opens a new office",
        "Acme 完成3亿元C轮融资，高瓴资本领投",
        "Acme secures $20M funding",
    ];
    const SOURCES: &[&str] = &["itjuzi", "kr36", "vcbeat", "aiqicha_search", "unknown"];

    fn arb_items() -> impl Strategy<Value = Vec<SearchItem>> {
        prop::collection::vec((0..HEADLINES.len(), 0..SOURCES.len()), 0..20).prop_map(|picks| {
            picks
                .into_iter()
                .map(|(h, s)| SearchItem::new(HEADLINES[h], "", SOURCES[s]))
                .collect()
        })
    }

    fn arb_signals() -> impl Strategy<Value = Vec<Signal>> {
        prop::collection::vec((0u32..=95, 0usize..8, 0usize..6), 0..30).prop_map(|raw| {
            raw.into_iter()
                .map(|(c, t, s)| signal(&format!("headline {}", t), &format!("src{}", s), c))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_confidence_is_clamped(signals in arb_signals()) {
            let (_, confidence) = scorer().combine(signals);
            prop_assert!(confidence <= 95);
        }

        #[test]
        fn prop_assessment_is_deterministic(items in arb_items()) {
            let s = scorer();
            let a = s.assess("Acme", &items, &[], &catalog(), 30);
            let b = s.assess("Acme", &items, &[], &catalog(), 30);
            prop_assert_eq!(a.confidence, b.confidence);
            prop_assert_eq!(a.has_signal, b.has_signal);
            prop_assert_eq!(a.sources, b.sources);
            prop_assert!(a.confidence <= 95);
        }

        #[test]
        fn prop_assessment_ignores_item_order(items in arb_items()) {
            let s = scorer();
            let mut reversed = items.clone();
            reversed.reverse();
            let a = s.assess("Acme", &items, &[], &catalog(), 30);
            let b = s.assess("Acme", &reversed, &[], &catalog(), 30);
            prop_assert_eq!(a.confidence, b.confidence);
        }

        #[test]
        fn prop_new_source_never_lowers_confidence(
            signals in arb_signals(),
            confidence in 0u32..=95,
            title in 0usize..10,
        ) {
            let s = scorer();
            let (_, before) = s.combine(signals.clone());

            let mut extended = signals;
            extended.push(signal(&format!("headline {}", title), "brand_new_source", confidence));
            let (_, after) = s.combine(extended);

            prop_assert!(after >= before);
        }
    }
}
