// 🔌 Source Adapters - uniform query interface over heterogeneous back-ends
//
// The set of back-ends is closed (AdapterKind). Each Source in the catalog
// names its kind; the factories below turn a Source into either a text
// search adapter or a registry profile source.
//
// Network access goes through the PageFetcher capability so adapters can be
// exercised against canned pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

use crate::entities::{Entity, Source, SourceRole};
use crate::error::SourceError;
use crate::registry::{html_to_text, parse_profile_html, RegistryProfile};

/// Max items a listing page contributes
const MAX_LISTING_ITEMS: usize = 5;

const FIRECRAWL_ENDPOINT: &str = "https://api.firecrawl.dev/v1/search";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

// ============================================================================
// SEARCH ITEM
// ============================================================================

/// One raw result from querying a Source for an Entity.
/// Lives only for the duration of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,

    #[serde(default)]
    pub snippet: String,

    /// Source id the item came from
    pub source_id: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub retrieved_at: Option<DateTime<Utc>>,
}

impl SearchItem {
    pub fn new(title: &str, snippet: &str, source_id: &str) -> Self {
        SearchItem {
            title: title.trim().to_string(),
            snippet: snippet.trim().to_string(),
            source_id: source_id.to_string(),
            url: None,
            retrieved_at: Some(Utc::now()),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        if !url.is_empty() {
            self.url = Some(url.to_string());
        }
        self
    }

    /// Title and snippet joined, the text all matching runs against
    pub fn text(&self) -> String {
        if self.snippet.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.snippet)
        }
    }
}

// ============================================================================
// ADAPTER KIND (closed set of back-ends)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Firecrawl,
    Kr36,
    Vcbeat,
    ItJuzi,
    SinaFinance,
    Pedaily,
    AiqichaSearch,
    BossZhipin,
    Tianyancha,
    Qichacha,
    AiqichaProfile,
    Gsxt,
}

impl AdapterKind {
    pub fn role(&self) -> SourceRole {
        match self {
            AdapterKind::Tianyancha
            | AdapterKind::Qichacha
            | AdapterKind::AiqichaProfile
            | AdapterKind::Gsxt => SourceRole::Profile,
            _ => SourceRole::Search,
        }
    }

    /// Public search page for an entity (also used for manual lookups)
    pub fn search_url(&self, entity_name: &str) -> Result<Url, SourceError> {
        let with_query = |base: &str, key: &str, value: &str| {
            Url::parse_with_params(base, &[(key, value)])
                .map_err(|e| SourceError::Malformed(format!("bad url {}: {}", base, e)))
        };
        let funding_query = format!("{} 融资", entity_name);

        match self {
            AdapterKind::Firecrawl => Url::parse(FIRECRAWL_ENDPOINT)
                .map_err(|e| SourceError::Malformed(e.to_string())),
            AdapterKind::Kr36 => {
                let mut url = Url::parse("https://36kr.com/search/articles/")
                    .map_err(|e| SourceError::Malformed(e.to_string()))?;
                url.path_segments_mut()
                    .map_err(|_| SourceError::Malformed("36kr url cannot be a base".into()))?
                    .pop_if_empty()
                    .push(entity_name);
                Ok(url)
            }
            AdapterKind::Vcbeat => with_query("https://vcbeat.top/search", "q", &funding_query),
            AdapterKind::ItJuzi => with_query("https://www.itjuzi.com/search", "kw", entity_name),
            AdapterKind::SinaFinance => with_query("https://search.sina.com.cn/", "q", &funding_query),
            AdapterKind::Pedaily => with_query("https://www.pedaily.cn/search/", "q", entity_name),
            AdapterKind::AiqichaSearch | AdapterKind::AiqichaProfile => {
                with_query("https://aiqicha.baidu.com/s", "q", entity_name)
            }
            AdapterKind::BossZhipin => with_query("https://www.zhipin.com/job_detail/", "query", entity_name),
            AdapterKind::Tianyancha => with_query("https://www.tianyancha.com/search", "key", entity_name),
            AdapterKind::Qichacha => with_query("https://www.qcc.com/search", "key", entity_name),
            AdapterKind::Gsxt => with_query("https://www.gsxt.gov.cn/corp-query-search-1.html", "searchword", entity_name),
        }
    }
}

// ============================================================================
// PAGE FETCHER CAPABILITY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FetchMethod {
    Get,
    PostJson(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: FetchMethod,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        FetchRequest {
            url: url.to_string(),
            method: FetchMethod::Get,
            headers: Vec::new(),
        }
    }

    pub fn post_json(url: &str, body: serde_json::Value) -> Self {
        FetchRequest {
            url: url.to_string(),
            method: FetchMethod::PostJson(body),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: &str) -> Self {
        FetchResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    /// Map non-success statuses onto SourceError
    pub fn into_body(self) -> Result<String, SourceError> {
        match self.status {
            200..=299 => Ok(self.body),
            429 => Err(SourceError::RateLimited),
            code => Err(SourceError::Status(code)),
        }
    }
}

/// Generic "fetch page / call API" capability
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SourceError>;
}

/// reqwest-backed fetcher rotating through a small user agent pool
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| SourceError::Http(format!("failed to build client: {}", e)))?;

        Ok(HttpFetcher {
            client,
            timeout,
            next_agent: AtomicUsize::new(0),
        })
    }

    fn user_agent(&self) -> &'static str {
        let i = self.next_agent.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[i % USER_AGENTS.len()]
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SourceError> {
        let builder = match &request.method {
            FetchMethod::Get => self.client.get(&request.url),
            FetchMethod::PostJson(body) => self.client.post(&request.url).json(body),
        };

        let mut builder = builder
            .header("User-Agent", self.user_agent())
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout.as_secs())
            } else {
                SourceError::Http(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Malformed(format!("unreadable body: {}", e)))?;

        Ok(FetchResponse { status, body })
    }
}

// ============================================================================
// ADAPTER TRAITS
// ============================================================================

/// Text search over one Source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> &Source;

    /// Query the source for an entity. Must not block beyond the fetcher timeout.
    async fn query(&self, entity_name: &str) -> Result<Vec<SearchItem>, SourceError>;

    /// Query by canonical name; adapters that filter hits may also accept
    /// the full name and aliases.
    async fn query_entity(&self, entity: &Entity) -> Result<Vec<SearchItem>, SourceError> {
        self.query(&entity.canonical_name).await
    }
}

/// Structured registry lookup over one Source
#[async_trait]
pub trait ProfileSource: Send + Sync {
    fn source(&self) -> &Source;

    /// `Ok(None)` when the registry has no record for the entity
    async fn fetch_profile(&self, entity_name: &str) -> Result<Option<RegistryProfile>, SourceError>;

    /// Search page an operator can open by hand
    fn manual_url(&self, entity_name: &str) -> String {
        self.source()
            .adapter
            .search_url(entity_name)
            .map(|u| u.to_string())
            .unwrap_or_default()
    }
}

// ============================================================================
// FIRECRAWL (JSON search API)
// ============================================================================

pub struct FirecrawlAdapter {
    source: Source,
    fetcher: Arc<dyn PageFetcher>,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FirecrawlResponse {
    #[serde(default)]
    data: Vec<FirecrawlHit>,
}

#[derive(Debug, Deserialize)]
struct FirecrawlHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl FirecrawlAdapter {
    pub fn new(source: Source, fetcher: Arc<dyn PageFetcher>, api_key: &str) -> Self {
        FirecrawlAdapter {
            source,
            fetcher,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for FirecrawlAdapter {
    fn source(&self) -> &Source {
        &self.source
    }

    async fn query(&self, entity_name: &str) -> Result<Vec<SearchItem>, SourceError> {
        let body = serde_json::json!({
            "query": format!("{} 融资", entity_name),
            "limit": 10,
            "lang": "zh",
        });
        let request = FetchRequest::post_json(FIRECRAWL_ENDPOINT, body)
            .header("Authorization", &format!("Bearer {}", self.api_key));

        let text = self.fetcher.fetch(request).await?.into_body()?;
        let parsed: FirecrawlResponse =
            serde_json::from_str(&text).map_err(|e| SourceError::Malformed(e.to_string()))?;

        Ok(parsed
            .data
            .into_iter()
            .filter(|hit| !hit.title.is_empty())
            .map(|hit| SearchItem::new(&hit.title, &hit.description, &self.source.id).with_url(&hit.url))
            .collect())
    }
}

// ============================================================================
// HTML LISTING PAGES (media, funding databases, job boards)
// ============================================================================

fn re_anchor() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)<a\s[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).expect("hardcoded regex"))
}

fn re_article_list() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)"articleList"\s*:\s*(\[.*?\])"#).expect("hardcoded regex"))
}

/// Search results page scraped for headlines mentioning the entity
pub struct HtmlListingAdapter {
    source: Source,
    fetcher: Arc<dyn PageFetcher>,
}

impl HtmlListingAdapter {
    pub fn new(source: Source, fetcher: Arc<dyn PageFetcher>) -> Self {
        HtmlListingAdapter { source, fetcher }
    }

    /// 36kr embeds its results as JSON in a script tag
    fn parse_embedded_articles(&self, html: &str) -> Vec<SearchItem> {
        let Some(caps) = re_article_list().captures(html) else {
            return Vec::new();
        };
        let Ok(articles) = serde_json::from_str::<Vec<serde_json::Value>>(&caps[1]) else {
            return Vec::new();
        };

        articles
            .iter()
            .filter_map(|a| {
                let title = a.get("title")?.as_str()?;
                let summary = a.get("summary").and_then(|s| s.as_str()).unwrap_or("");
                let mut item = SearchItem::new(title, summary, &self.source.id);
                if let Some(id) = a.get("id") {
                    let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
                    item = item.with_url(&format!("https://36kr.com/p/{}", id));
                }
                Some(item)
            })
            .take(MAX_LISTING_ITEMS)
            .collect()
    }

    /// Anchors whose text mentions one of `names`
    fn parse_anchors(&self, html: &str, base: &Url, names: &[String]) -> Vec<SearchItem> {
        let mut items: Vec<SearchItem> = Vec::new();

        for caps in re_anchor().captures_iter(html) {
            let title = html_to_text(&caps[2]);
            if title.chars().count() < 8 || !names.iter().any(|n| title.contains(n.as_str())) {
                continue;
            }
            if items.iter().any(|i| i.title == title) {
                continue;
            }
            let href = base.join(&caps[1]).map(|u| u.to_string()).unwrap_or_default();
            items.push(SearchItem::new(&title, "", &self.source.id).with_url(&href));
            if items.len() >= MAX_LISTING_ITEMS {
                break;
            }
        }
        items
    }

    async fn search(&self, entity_name: &str, names: &[String]) -> Result<Vec<SearchItem>, SourceError> {
        let url = self.source.adapter.search_url(entity_name)?;
        let html = self.fetcher.fetch(FetchRequest::get(url.as_str())).await?.into_body()?;

        if self.source.adapter == AdapterKind::Kr36 {
            let items = self.parse_embedded_articles(&html);
            if !items.is_empty() {
                return Ok(items);
            }
        }

        let items = self.parse_anchors(&html, &url, names);
        debug!(source = %self.source.id, count = items.len(), "parsed listing page");
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for HtmlListingAdapter {
    fn source(&self) -> &Source {
        &self.source
    }

    async fn query(&self, entity_name: &str) -> Result<Vec<SearchItem>, SourceError> {
        self.search(entity_name, &[entity_name.to_string()]).await
    }

    async fn query_entity(&self, entity: &Entity) -> Result<Vec<SearchItem>, SourceError> {
        self.search(&entity.canonical_name, &entity.all_names()).await
    }
}

// ============================================================================
// REGISTRY PAGES (structured profiles)
// ============================================================================

fn re_tianyancha_detail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://www\.tianyancha\.com/company/\d+"#).expect("hardcoded regex"))
}

fn re_qcc_detail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:https?://www\.qcc\.com)?/firm/[0-9a-zA-Z_]+\.html"#).expect("hardcoded regex"))
}

fn re_aiqicha_detail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:https?://aiqicha\.baidu\.com)?/company_detail_\d+"#).expect("hardcoded regex"))
}

/// Registry mirror: search page, then the first company detail page
pub struct RegistryPageSource {
    source: Source,
    fetcher: Arc<dyn PageFetcher>,
}

impl RegistryPageSource {
    pub fn new(source: Source, fetcher: Arc<dyn PageFetcher>) -> Self {
        RegistryPageSource { source, fetcher }
    }

    fn detail_link(&self, html: &str, base: &Url) -> Option<String> {
        let pattern = match self.source.adapter {
            AdapterKind::Tianyancha => re_tianyancha_detail(),
            AdapterKind::Qichacha => re_qcc_detail(),
            AdapterKind::AiqichaProfile => re_aiqicha_detail(),
            _ => return None,
        };
        let found = pattern.find(html)?;
        base.join(found.as_str()).ok().map(|u| u.to_string())
    }
}

#[async_trait]
impl ProfileSource for RegistryPageSource {
    fn source(&self) -> &Source {
        &self.source
    }

    async fn fetch_profile(&self, entity_name: &str) -> Result<Option<RegistryProfile>, SourceError> {
        let url = self.source.adapter.search_url(entity_name)?;
        let search_page = self.fetcher.fetch(FetchRequest::get(url.as_str())).await?.into_body()?;

        let page = match self.detail_link(&search_page, &url) {
            Some(detail) => {
                debug!(source = %self.source.id, %detail, "following detail link");
                self.fetcher.fetch(FetchRequest::get(&detail)).await?.into_body()?
            }
            None => search_page,
        };

        Ok(parse_profile_html(&page, entity_name, &self.source.id))
    }
}

// ============================================================================
// FACTORIES
// ============================================================================

/// Build the search adapter for a Source. None for profile sources and for
/// Firecrawl without an API key.
pub fn build_search_adapter(
    source: &Source,
    fetcher: Arc<dyn PageFetcher>,
    firecrawl_key: Option<&str>,
) -> Result<Option<Arc<dyn SourceAdapter>>, SourceError> {
    if source.role() != SourceRole::Search {
        return Ok(None);
    }
    let adapter: Arc<dyn SourceAdapter> = match source.adapter {
        AdapterKind::Firecrawl => {
            let key = firecrawl_key
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| SourceError::MissingCredential(format!("{} API key", source.name)))?;
            Arc::new(FirecrawlAdapter::new(source.clone(), fetcher, key))
        }
        _ => Arc::new(HtmlListingAdapter::new(source.clone(), fetcher)),
    };
    Ok(Some(adapter))
}

/// Build the registry profile source for a Source. None for search sources.
pub fn build_profile_source(source: &Source, fetcher: Arc<dyn PageFetcher>) -> Option<Arc<dyn ProfileSource>> {
    if source.role() != SourceRole::Profile {
        return None;
    }
    Some(Arc::new(RegistryPageSource::new(source.clone(), fetcher)))
}
