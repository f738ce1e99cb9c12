// 📣 Reports & Notification - turning assessments into messages
//
// Formatting is pure. Delivery is fire-and-forget: the core never learns
// whether a message arrived, failures are only logged.

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::entities::Entity;
use crate::monitor::{DailySummary, ManualFallback};
use crate::quota::SourceUsage;
use crate::scoring::{FundingAssessment, Signal};

/// Companies listed in a daily report
const REPORT_MAX_ENTITIES: usize = 8;
/// Signals listed per company in a daily report
const REPORT_SIGNALS_PER_ENTITY: usize = 2;
const REPORT_TITLE_CHARS: usize = 45;

// ============================================================================
// FORMATTING
// ============================================================================

pub fn confidence_icon(confidence: u32) -> &'static str {
    if confidence >= 70 {
        "🔴"
    } else if confidence >= 50 {
        "🟡"
    } else {
        "🟢"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// "轮次: B轮 | 金额: 5亿元 | 投资方: 红杉资本, 高瓴资本"
fn signal_details(signal: &Signal) -> Option<String> {
    let mut details = Vec::new();
    if let Some(round) = &signal.round {
        details.push(format!("轮次: {}", round));
    }
    if let Some(amount) = &signal.amount {
        details.push(format!("金额: {}", amount));
    }
    if !signal.investors.is_empty() {
        let names: Vec<&str> = signal.investors.iter().take(2).map(String::as_str).collect();
        details.push(format!("投资方: {}", names.join(", ")));
    }
    (!details.is_empty()).then(|| details.join(" | "))
}

/// Alert for a single entity whose assessment crossed the notify threshold
pub fn format_alert(entity: &Entity, assessment: &FundingAssessment) -> String {
    let now = assessment.checked_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let mut message = format!(
        "🚨 **融资信号告警**\n\n**企业**: {} ({})\n**时间**: {}\n**置信度**: {}%\n\n",
        entity.canonical_name, entity.category, now, assessment.confidence
    );

    message.push_str(&format!(
        "**研判**:\n- 融资轮次: {}\n- 预估金额: {}\n",
        assessment.estimated_round.as_deref().unwrap_or("未知"),
        assessment.estimated_amount.as_deref().unwrap_or("未知"),
    ));

    let mut investors: Vec<&str> = Vec::new();
    for name in assessment.signals.iter().flat_map(|s| s.investors.iter()) {
        if !investors.contains(&name.as_str()) {
            investors.push(name);
        }
    }
    if !investors.is_empty() {
        message.push_str(&format!("- 投资方: {}\n", investors.join(", ")));
    }

    message.push_str("\n**信号详情**:\n");
    for signal in &assessment.signals {
        message.push_str(&format!("• {} ({}%)\n", signal.title, signal.confidence));
    }

    message.push_str(&format!("\n📊 数据来源: {}", assessment.sources.join(", ")));
    message
}

/// Daily summary: counters, then the strongest signals first
pub fn format_daily_report(summary: &DailySummary) -> String {
    let mut report = format!(
        "🏥 **企业融资监控日报**\n\n📅 日期: {}\n📊 监控企业: {} 家\n✅ 已检查: {} 家\n🚨 发现信号: {} 个\n⭐ 高置信度: {} 个\n\n",
        summary.date, summary.total, summary.checked, summary.signals_found, summary.high_confidence
    );

    let mut flagged: Vec<_> = summary.results.iter().filter(|r| r.assessment.has_signal).collect();
    flagged.sort_by(|a, b| b.assessment.confidence.cmp(&a.assessment.confidence));

    if flagged.is_empty() {
        report.push_str("**📭 暂无融资信号**\n\n");
    } else {
        report.push_str("**🔔 融资信号**\n\n");
        for result in flagged.iter().take(REPORT_MAX_ENTITIES) {
            let a = &result.assessment;
            report.push_str(&format!(
                "{} **{}** ({})\n置信度: {}% | 数据源: {}个\n",
                confidence_icon(a.confidence),
                result.name,
                result.category,
                a.confidence,
                a.source_count()
            ));
            for signal in a.signals.iter().take(REPORT_SIGNALS_PER_ENTITY) {
                report.push_str(&format!("• {}\n", truncate(&signal.title, REPORT_TITLE_CHARS)));
                if let Some(details) = signal_details(signal) {
                    report.push_str(&format!("  {}\n", details));
                }
            }
            report.push('\n');
        }
    }

    let mut sources: Vec<&str> = summary
        .results
        .iter()
        .flat_map(|r| r.assessment.sources.iter().map(String::as_str))
        .collect();
    sources.sort();
    sources.dedup();
    let sources = if sources.is_empty() { "无".to_string() } else { sources.join(", ") };

    report.push_str(&format!("**📡 数据源**: {}\n", sources));
    if !summary.unavailable_sources.is_empty() {
        report.push_str("**⛔ 今日暂停**:\n");
        for line in &summary.unavailable_sources {
            report.push_str(&format!("• {}\n", line));
        }
    }
    report.push_str(&format!(
        "---\n_监控时间: {}_",
        summary.generated_at.with_timezone(&Local).format("%H:%M")
    ));
    report
}

/// "🟢 天眼查: 3/20 (剩余 17)"
pub fn format_usage(usages: &[SourceUsage]) -> String {
    let mut lines = vec!["📊 今日数据源用量".to_string()];
    for usage in usages {
        let line = match (usage.enabled, usage.quota, usage.remaining(), usage.unavailable.as_deref()) {
            (false, _, _, _) => format!("⚪ {}: 已停用", usage.name),
            (true, _, _, Some(reason)) => format!("{} {}: {} 今日暂停 ({})", usage.status_icon(), usage.name, usage.used, reason),
            (true, Some(quota), Some(remaining), None) => format!(
                "{} {}: {}/{} (剩余 {})",
                usage.status_icon(),
                usage.name,
                usage.used,
                quota,
                remaining
            ),
            _ => format!("{} {}: {} (不限量)", usage.status_icon(), usage.name, usage.used),
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Instructions for looking up a registry profile by hand
pub fn format_manual_fallback(fallback: &ManualFallback) -> String {
    let mut text = format!("⚠️ 免费额度已用完，请手动查询 {}:\n", fallback.entity);
    for (i, lookup) in fallback.lookups.iter().enumerate() {
        text.push_str(&format!("{}. {}: {}\n", i + 1, lookup.source_name, lookup.url));
    }
    text.push_str(&format!("需要获取的信息: {}", fallback.fields.join("、")));
    text
}

// ============================================================================
// NOTIFIERS
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `channel`. Never fails from the caller's view.
    async fn send(&self, channel: &str, message: &str);
}

/// Writes messages to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: &str, message: &str) {
        info!(channel, chars = message.chars().count(), "notification");
        tracing::debug!(channel, %message, "notification body");
    }
}

/// POSTs an interactive markdown card to a chat webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(WebhookNotifier {
            client,
            url: url.to_string(),
        })
    }

    pub fn payload(channel: &str, message: &str) -> serde_json::Value {
        let title = message.lines().next().unwrap_or("").replace("**", "");
        let template = if title.starts_with('🚨') { "red" } else { "blue" };
        json!({
            "msg_type": "interactive",
            "channel": channel,
            "card": {
                "header": {
                    "title": {"tag": "plain_text", "content": title},
                    "template": template
                },
                "elements": [{"tag": "markdown", "content": message}]
            }
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &str, message: &str) {
        let body = Self::payload(channel, message);
        match self.client.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => info!(channel, "notification delivered"),
            Ok(resp) => warn!(channel, status = resp.status().as_u16(), "webhook rejected notification"),
            Err(e) => warn!(channel, error = %e, "webhook delivery failed"),
        }
    }
}
