// 🏛️ Registry Profiles - structured company records from registry mirrors
//
// Registry pages are fetched as HTML; fields are pulled out of the
// rendered text with label patterns (注册资本, 法定代表人, ...).

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::snapshot::normalize_capital;

const MAX_SHAREHOLDERS: usize = 20;

// ============================================================================
// REGISTRY PROFILE
// ============================================================================

/// Structured profile of an entity as reported by one registry source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryProfile {
    pub name: String,

    /// Registered capital as displayed, e.g. "5000万人民币"
    #[serde(default)]
    pub capital: Option<String>,

    /// Registered capital in base units (yuan / dollars)
    #[serde(default)]
    pub capital_amount: Option<f64>,

    #[serde(default)]
    pub legal_representative: Option<String>,

    /// Registration status (存续, 在业, 注销, ...)
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub credit_code: Option<String>,

    #[serde(default)]
    pub established_date: Option<String>,

    #[serde(default)]
    pub shareholders: Vec<String>,

    /// Registry source that produced the profile
    pub source_id: String,

    pub fetched_at: DateTime<Utc>,
}

impl RegistryProfile {
    pub fn new(name: &str, source_id: &str) -> Self {
        RegistryProfile {
            name: name.to_string(),
            capital: None,
            capital_amount: None,
            legal_representative: None,
            status: None,
            credit_code: None,
            established_date: None,
            shareholders: Vec::new(),
            source_id: source_id.to_string(),
            fetched_at: Utc::now(),
        }
    }

    /// Set display capital and its normalized amount together
    pub fn with_capital(mut self, capital: &str) -> Self {
        self.capital_amount = normalize_capital(capital);
        self.capital = Some(capital.to_string());
        self
    }

    pub fn with_shareholders(mut self, names: &[&str]) -> Self {
        self.shareholders = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// A profile with none of the registry fields carries no information
    pub fn is_empty(&self) -> bool {
        self.capital.is_none()
            && self.legal_representative.is_none()
            && self.status.is_none()
            && self.credit_code.is_none()
            && self.established_date.is_none()
            && self.shareholders.is_empty()
    }

    /// Year the company was established, if the date parses
    pub fn established_year(&self) -> Option<i32> {
        self.established_date
            .as_deref()
            .and_then(|d| d.get(0..4))
            .and_then(|y| y.parse().ok())
    }
}

// ============================================================================
// HTML → TEXT
// ============================================================================

fn re_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|<[^>]+>").expect("hardcoded regex"))
}

fn re_spaces() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("hardcoded regex"))
}

/// Plain text of an HTML page or fragment: scripts, styles and tags are
/// dropped, character references (named and numeric) are decoded by
/// html2text and whitespace is collapsed.
pub fn html_to_text(html: &str) -> String {
    // Markup goes first so links and tables render as bare words
    let stripped = re_tags().replace_all(html, " ");
    // Byte length bounds the display width, so nothing gets wrapped
    let width = stripped.len().max(80);
    let decoded = match html2text::from_read(stripped.as_bytes(), width) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "html2text failed, keeping undecoded text");
            stripped.into_owned()
        }
    };
    re_spaces().replace_all(&decoded, " ").trim().to_string()
}

// ============================================================================
// FIELD PATTERNS
// ============================================================================

fn re_capital() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"注册资本[：:]?\s*([\d,]+(?:\.\d+)?)\s*(万|亿)?\s*(美元|人民币|元)?").expect("hardcoded regex")
    })
}

fn re_legal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"法定代表人[：:]?\s*([^\s：:]{2,20})").expect("hardcoded regex"))
}

fn re_status() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:登记状态|经营状态)[：:]?\s*([^\s：:（(]{2,10})").expect("hardcoded regex"))
}

fn re_established() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"成立日期[：:]?\s*(\d{4}[-/年]\d{1,2}[-/月]?\d{0,2}日?)").expect("hardcoded regex")
    })
}

fn re_credit_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"统一社会信用代码[：:]?\s*([0-9A-Z]{18})").expect("hardcoded regex"))
}

fn re_shareholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"股东名称[：:]?\s*(\S+?)\s*持股").expect("hardcoded regex"))
}

/// Parse a registry detail page. Returns None when no registry field is found.
pub fn parse_profile_html(html: &str, entity_name: &str, source_id: &str) -> Option<RegistryProfile> {
    let text = html_to_text(html);
    let mut profile = RegistryProfile::new(entity_name, source_id);

    if let Some(caps) = re_capital().captures(&text) {
        let amount = caps[1].replace(',', "");
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("万");
        let currency = caps.get(3).map(|m| m.as_str()).unwrap_or("人民币");
        let currency = if currency == "元" { "人民币" } else { currency };
        profile = profile.with_capital(&format!("{}{}{}", amount, unit, currency));
    }

    profile.legal_representative = re_legal().captures(&text).map(|c| c[1].to_string());
    profile.status = re_status().captures(&text).map(|c| c[1].to_string());
    profile.established_date = re_established().captures(&text).map(|c| c[1].to_string());
    profile.credit_code = re_credit_code().captures(&text).map(|c| c[1].to_string());

    for caps in re_shareholder().captures_iter(&text) {
        let name = caps[1].trim().to_string();
        if !name.is_empty() && !profile.shareholders.contains(&name) {
            profile.shareholders.push(name);
        }
        if profile.shareholders.len() >= MAX_SHAREHOLDERS {
            break;
        }
    }

    if profile.is_empty() {
        None
    } else {
        Some(profile)
    }
}
