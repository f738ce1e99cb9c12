// 📡 Source Entity - static description of one external data provider
//
// A Source never changes at runtime. Usage counters live in the
// QuotaRotator, not here.

use serde::{Deserialize, Serialize};

use crate::adapters::AdapterKind;

// ============================================================================
// SOURCE CLASS
// ============================================================================

/// Category of a source, used to pick its trust multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    /// Investment/financing databases (IT桔子 and the like)
    FundingDatabase,

    /// Official business registry mirrors returning structured profiles
    Registry,

    /// Industry vertical and VC/PE media
    VerticalMedia,

    /// Technology / startup media
    TechMedia,

    /// Search engines and general finance news
    GeneralMedia,

    /// Registry lookup pages that only echo company headlines
    RegistryLookup,

    /// Job boards
    HiringBoard,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceClass::FundingDatabase => "funding_database",
            SourceClass::Registry => "registry",
            SourceClass::VerticalMedia => "vertical_media",
            SourceClass::TechMedia => "tech_media",
            SourceClass::GeneralMedia => "general_media",
            SourceClass::RegistryLookup => "registry_lookup",
            SourceClass::HiringBoard => "hiring_board",
        }
    }

    /// Built-in trust multiplier; overridable through ScoringConfig
    pub fn default_weight(&self) -> f64 {
        match self {
            SourceClass::FundingDatabase | SourceClass::Registry => 1.5,
            SourceClass::VerticalMedia => 1.3,
            SourceClass::TechMedia => 1.2,
            SourceClass::GeneralMedia => 1.0,
            SourceClass::RegistryLookup | SourceClass::HiringBoard => 0.8,
        }
    }

    pub fn all() -> [SourceClass; 7] {
        [
            SourceClass::FundingDatabase,
            SourceClass::Registry,
            SourceClass::VerticalMedia,
            SourceClass::TechMedia,
            SourceClass::GeneralMedia,
            SourceClass::RegistryLookup,
            SourceClass::HiringBoard,
        ]
    }
}

/// What a source is queried for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// Text search returning SearchItems
    Search,

    /// Structured registry profile used for snapshots
    Profile,
}

// ============================================================================
// SOURCE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier, also the usage-counter key
    pub id: String,

    /// Human readable name
    pub name: String,

    pub class: SourceClass,

    /// Free requests per local calendar day (None = unbounded)
    #[serde(default)]
    pub daily_quota: Option<u32>,

    /// Typical response latency range in milliseconds
    #[serde(default = "default_latency")]
    pub latency_ms: (u64, u64),

    /// Which adapter implementation serves this source
    pub adapter: AdapterKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_latency() -> (u64, u64) {
    (1_000, 5_000)
}

fn default_enabled() -> bool {
    true
}

impl Source {
    pub fn new(
        id: &str,
        name: &str,
        class: SourceClass,
        daily_quota: Option<u32>,
        adapter: AdapterKind,
    ) -> Self {
        Source {
            id: id.to_string(),
            name: name.to_string(),
            class,
            daily_quota,
            latency_ms: default_latency(),
            adapter,
            enabled: true,
        }
    }

    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn role(&self) -> SourceRole {
        self.adapter.role()
    }

    pub fn is_unbounded(&self) -> bool {
        self.daily_quota.is_none()
    }

    /// True while `used` is still under the daily budget
    pub fn has_budget(&self, used: u32) -> bool {
        match self.daily_quota {
            Some(quota) => used < quota,
            None => true,
        }
    }
}

// ============================================================================
// DEFAULT CATALOG
// ============================================================================

/// Built-in source catalog, in declared priority order
pub fn default_sources() -> Vec<Source> {
    vec![
        // Text search sources
        Source::new("itjuzi", "IT桔子", SourceClass::FundingDatabase, Some(30), AdapterKind::ItJuzi)
            .with_latency(2_000, 6_000),
        Source::new("vcbeat", "动脉网", SourceClass::VerticalMedia, Some(100), AdapterKind::Vcbeat)
            .with_latency(1_500, 5_000),
        Source::new("pedaily", "投资界", SourceClass::VerticalMedia, Some(100), AdapterKind::Pedaily)
            .with_latency(1_500, 5_000),
        Source::new("kr36", "36氪", SourceClass::TechMedia, Some(100), AdapterKind::Kr36)
            .with_latency(1_000, 4_000),
        Source::new("firecrawl", "Firecrawl", SourceClass::GeneralMedia, Some(50), AdapterKind::Firecrawl)
            .with_latency(2_000, 8_000),
        Source::new("sina_finance", "新浪财经", SourceClass::GeneralMedia, None, AdapterKind::SinaFinance)
            .with_latency(1_000, 3_000),
        Source::new("aiqicha_search", "爱企查", SourceClass::RegistryLookup, Some(50), AdapterKind::AiqichaSearch)
            .with_latency(2_000, 6_000)
            .disabled(),
        Source::new("boss_zhipin", "BOSS直聘", SourceClass::HiringBoard, Some(20), AdapterKind::BossZhipin)
            .with_latency(2_000, 6_000),
        // Registry profile sources
        Source::new("tianyancha", "天眼查", SourceClass::Registry, Some(20), AdapterKind::Tianyancha)
            .with_latency(3_000, 8_000),
        Source::new("qichacha", "企查查", SourceClass::Registry, Some(10), AdapterKind::Qichacha)
            .with_latency(5_000, 12_000),
        Source::new("aiqicha", "爱企查", SourceClass::Registry, Some(50), AdapterKind::AiqichaProfile)
            .with_latency(2_000, 6_000),
        Source::new("gsxt", "国家企业信用信息公示系统", SourceClass::Registry, None, AdapterKind::Gsxt)
            .with_latency(3_000, 10_000),
    ]
}
