// 🔍 Signal Extractor - noise filter, keyword matching, attribute extraction
//
// Order matters: noise terms are checked before any positive match, so
// margin-trading headlines ("融资融券", "融资买入") never reach scoring.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{MonitorError, MonitorResult};

/// Investor names kept per item
pub const MAX_INVESTORS: usize = 5;

// ============================================================================
// KEYWORD SETS
// ============================================================================

const FUNDING_TERMS: &[&str] = &[
    "融资", "投资", "获投", "完成融资", "宣布融资",
    "A轮", "B轮", "C轮", "D轮", "E轮", "F轮",
    "Pre-A", "Pre-B", "天使轮", "种子轮",
    "战略投资", "股权融资", "增资", "入股",
    "领投", "跟投", "估值", "IPO",
    "financing", "funding", "raises", "raised", "investment",
    "Series A", "Series B", "Series C", "Series D", "Series E", "Series F",
    "seed round", "angel round", "strategic investment", "led by", "valuation",
];

const INVESTOR_TERMS: &[&str] = &[
    "资本", "投资", "基金", "创投", "风投", "VC", "PE",
    "红杉", "高瓴", "IDG", "经纬", "启明", "软银", "腾讯投资",
    "阿里健康", "百度风投", "字节跳动", "美团龙珠",
    "君联", "达晨", "深创投", "同创伟业", "北极光",
    "GGV", "源码", "五源", "云锋", "淡马锡",
    "Capital", "Ventures", "Venture", "Fund", "Partners",
    "Sequoia", "Hillhouse", "Temasek", "SoftBank",
];

const NOISE_TERMS: &[&str] = &[
    "融资融券", "融资余额", "融资买入", "融资净买入",
    "融资净偿还", "两融", "融资客", "融资盘",
    "涨停", "跌停", "股价", "市值蒸发", "股票",
    "margin trading", "margin financing", "short selling", "stock price", "limit up", "limit down",
];

fn to_strings(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

/// Vocabulary used by the extractor; each list can be overridden from config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSets {
    pub funding: Vec<String>,
    pub investor: Vec<String>,
    pub noise: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        KeywordSets {
            funding: to_strings(FUNDING_TERMS),
            investor: to_strings(INVESTOR_TERMS),
            noise: to_strings(NOISE_TERMS),
        }
    }
}

// ============================================================================
// KEYWORD MATCHER
// ============================================================================

/// CJK terms match as substrings. ASCII terms match on word boundaries,
/// case-insensitively unless the term is an all-caps acronym (VC, PE, IDG).
#[derive(Debug, Clone)]
enum Term {
    Substring(String),
    Word(String, Regex),
}

#[derive(Debug, Clone)]
struct KeywordMatcher {
    terms: Vec<Term>,
}

impl KeywordMatcher {
    fn new(keywords: &[String]) -> MonitorResult<Self> {
        let mut terms = Vec::new();
        for keyword in keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            if keyword.is_ascii() {
                let acronym = keyword.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
                let flags = if acronym { "" } else { "(?i)" };
                let pattern = format!(r"{}\b{}\b", flags, regex::escape(keyword));
                let re = Regex::new(&pattern)
                    .map_err(|e| MonitorError::Config(format!("bad keyword {:?}: {}", keyword, e)))?;
                terms.push(Term::Word(keyword.to_string(), re));
            } else {
                terms.push(Term::Substring(keyword.to_string()));
            }
        }
        Ok(KeywordMatcher { terms })
    }

    /// Distinct terms found in `text`, in keyword-list order
    fn matches(&self, text: &str) -> Vec<String> {
        self.terms
            .iter()
            .filter_map(|term| match term {
                Term::Substring(kw) if text.contains(kw.as_str()) => Some(kw.clone()),
                Term::Word(kw, re) if re.is_match(text) => Some(kw.clone()),
                _ => None,
            })
            .collect()
    }

    fn any(&self, text: &str) -> bool {
        self.terms.iter().any(|term| match term {
            Term::Substring(kw) => text.contains(kw.as_str()),
            Term::Word(_, re) => re.is_match(text),
        })
    }
}

// ============================================================================
// ROUND / AMOUNT PATTERNS
// ============================================================================

fn round_patterns() -> &'static [Regex; 5] {
    static RE: OnceLock<[Regex; 5]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(种子轮|天使轮|(?i:seed round|angel round))").expect("hardcoded regex"),
            Regex::new(r"(Pre-[A-Z]\+?)(轮)?").expect("hardcoded regex"),
            Regex::new(r"([A-Z]\+?)轮|\b(?i:series)\s+([A-Z]\+?)\b").expect("hardcoded regex"),
            Regex::new(r"(战略投资|战略融资|(?i:strategic (?:investment|financing|round)))").expect("hardcoded regex"),
            Regex::new(r"(IPO|上市)").expect("hardcoded regex"),
        ]
    })
}

/// Funding round label, first pattern family that matches wins.
/// English labels are folded onto the Chinese form ("Series B" → "B轮").
pub fn extract_round(text: &str) -> Option<String> {
    let [seed, pre, lettered, strategic, ipo] = round_patterns();

    if let Some(caps) = seed.captures(text) {
        let label = caps[1].to_lowercase();
        return Some(if label.starts_with("seed") {
            "种子轮".to_string()
        } else if label.starts_with("angel") {
            "天使轮".to_string()
        } else {
            caps[1].to_string()
        });
    }
    if let Some(caps) = pre.captures(text) {
        return Some(format!("{}轮", &caps[1]));
    }
    if let Some(caps) = lettered.captures(text) {
        let letter = caps.get(1).or_else(|| caps.get(2))?.as_str().to_uppercase();
        return Some(format!("{}轮", letter));
    }
    if let Some(caps) = strategic.captures(text) {
        let label = &caps[1];
        return Some(if label.is_ascii() { "战略投资".to_string() } else { label.to_string() });
    }
    ipo.captures(text).map(|caps| caps[1].to_string())
}

fn amount_patterns() -> &'static [(Regex, &'static str); 8] {
    static RE: OnceLock<[(Regex, &'static str); 8]> = OnceLock::new();
    RE.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("hardcoded regex");
        [
            (re(r"(\d+(?:\.\d+)?)\s*(亿美元)"), ""),
            (re(r"(\d+(?:\.\d+)?)\s*(亿人民币|亿元|亿)"), ""),
            (re(r"(\d+(?:\.\d+)?)\s*(千万美元)"), ""),
            (re(r"(\d+(?:\.\d+)?)\s*(千万人民币|千万元|千万)"), ""),
            (re(r"(\d+(?:\.\d+)?)\s*(百万美元|万美元)"), ""),
            (re(r"(\d+(?:\.\d+)?)\s*(万人民币|万元|万)"), ""),
            (re(r"(?i)\$(\d+(?:\.\d+)?)\s*(billion|B)\b"), "$"),
            (re(r"(?i)\$(\d+(?:\.\d+)?)\s*(million|M)\b"), "$"),
        ]
    })
}

/// Monetary amount, largest unit family first ("2亿元", "$50million")
pub fn extract_amount(text: &str) -> Option<String> {
    amount_patterns().iter().find_map(|(re, prefix)| {
        re.captures(text)
            .map(|caps| format!("{}{}{}", prefix, &caps[1], &caps[2]))
    })
}

fn re_latin_investor() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b((?:[A-Z][A-Za-z0-9&.]*\s+){1,3}(?:Capital|Ventures|Venture|Partners|Fund))\b")
            .expect("hardcoded regex")
    })
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// What one surviving item yielded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub funding_keywords: Vec<String>,
    pub investor_keywords: Vec<String>,
    pub round: Option<String>,
    pub amount: Option<String>,
    pub investors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SignalExtractor {
    funding: KeywordMatcher,
    investor: KeywordMatcher,
    noise: KeywordMatcher,
    /// "<2-10 CJK chars><investor keyword>" per CJK investor keyword
    investor_names: Vec<Regex>,
}

impl SignalExtractor {
    pub fn new(sets: &KeywordSets) -> MonitorResult<Self> {
        let investor_names = sets
            .investor
            .iter()
            .filter(|kw| !kw.is_ascii())
            .map(|kw| {
                Regex::new(&format!(r"([\p{{Han}}]{{2,10}}{})", regex::escape(kw)))
                    .map_err(|e| MonitorError::Config(format!("bad investor keyword {:?}: {}", kw, e)))
            })
            .collect::<MonitorResult<Vec<_>>>()?;

        Ok(SignalExtractor {
            funding: KeywordMatcher::new(&sets.funding)?,
            investor: KeywordMatcher::new(&sets.investor)?,
            noise: KeywordMatcher::new(&sets.noise)?,
            investor_names,
        })
    }

    pub fn is_noise(&self, text: &str) -> bool {
        self.noise.any(text)
    }

    /// None when the text is noise or carries no funding keyword
    pub fn extract(&self, text: &str) -> Option<Extraction> {
        if self.is_noise(text) {
            return None;
        }

        let funding_keywords = self.funding.matches(text);
        if funding_keywords.is_empty() {
            return None;
        }

        Some(Extraction {
            funding_keywords,
            investor_keywords: self.investor.matches(text),
            round: extract_round(text),
            amount: extract_amount(text),
            investors: self.extract_investors(text),
        })
    }

    /// Investor name candidates, first-seen order, at most MAX_INVESTORS
    pub fn extract_investors(&self, text: &str) -> Vec<String> {
        let mut investors: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            let name = name.trim();
            if !name.is_empty() && !investors.iter().any(|i| i == name) {
                investors.push(name.to_string());
            }
        };

        for re in &self.investor_names {
            for caps in re.captures_iter(text) {
                push(&caps[1]);
            }
        }
        for caps in re_latin_investor().captures_iter(text) {
            push(&caps[1]);
        }

        investors.truncate(MAX_INVESTORS);
        investors
    }
}
