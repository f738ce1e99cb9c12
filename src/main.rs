// Funding Watch - CLI
// check / check-all / usage / list / alias / history

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use funding_watch::{
    db, format_manual_fallback, format_usage, report::confidence_icon, CheckOutcome, Entity,
    EntityRegistry, FundingMonitor, MonitorConfig, Priority, DEFAULT_CONFIG_PATH,
};

#[derive(Parser)]
#[command(name = "funding-watch")]
#[command(about = "Detect likely financing events for monitored companies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (missing file = built-in defaults)
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a single company
    Check {
        entity: String,
    },
    /// Check every company in the entity list and send the daily report
    CheckAll,
    /// Today's per-source usage against the free quotas
    Usage,
    /// Monitored companies grouped by category
    List,
    /// Manage company aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Stored assessments and registry snapshots of a company
    History {
        entity: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum AliasAction {
    Add { entity: String, alias: String },
    Remove { entity: String, alias: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FUNDING_WATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)?;

    match cli.command {
        Commands::Check { entity } => run_check(config, &entity).await,
        Commands::CheckAll => run_check_all(config).await,
        Commands::Usage => run_usage(config),
        Commands::List => run_list(&config),
        Commands::Alias { action } => run_alias(&config, action),
        Commands::History { entity, limit } => run_history(config, &entity, limit),
    }
}

fn load_entities(config: &MonitorConfig) -> Result<EntityRegistry> {
    let path = config.entities_path();
    EntityRegistry::from_file(&path)
        .with_context(|| format!("Entity list unavailable: {}", path.display()))
}

fn print_outcome(entity: &Entity, outcome: &CheckOutcome) {
    let a = &outcome.assessment;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if a.has_signal {
        println!("{} {} - 融资信号 (置信度 {}%)", confidence_icon(a.confidence), entity.canonical_name, a.confidence);
    } else {
        println!("📭 {} - 暂无融资信号 (置信度 {}%)", entity.canonical_name, a.confidence);
    }
    println!("✓ 数据源: {}", if a.sources.is_empty() { "无".to_string() } else { a.sources.join(", ") });
    if let Some(round) = &a.estimated_round {
        println!("✓ 预估轮次: {}", round);
    }
    if let Some(amount) = &a.estimated_amount {
        println!("✓ 预估金额: {}", amount);
    }
    for signal in &a.signals {
        println!("  • [{}%] {} ({})", signal.confidence, signal.title, signal.source_id);
    }
    for change in &a.changes {
        println!("  Δ {}", change.describe());
    }
    for report in &outcome.reports {
        println!("  ⋯ {}: {:?} ({} ms)", report.source_id, report.outcome, report.elapsed_ms);
    }
    if outcome.search_deferred {
        println!("⚠️  所有搜索数据源今日额度已用完，文本搜索推迟");
    }
    if let Some(fallback) = &outcome.manual_fallback {
        println!("\n{}", format_manual_fallback(fallback));
    }
    if outcome.alerted {
        println!("📤 告警已发送");
    }
}

async fn run_check(config: MonitorConfig, name: &str) -> Result<()> {
    println!("🔍 Funding Watch - 单个企业检查");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Unknown names are checked ad hoc
    let entity = match load_entities(&config) {
        Ok(registry) => registry.find(name).cloned(),
        Err(e) => {
            tracing::warn!(error = %e, "checking without entity list");
            None
        }
    }
    .unwrap_or_else(|| Entity::new(name, "未分类", Priority::Normal));

    let monitor = FundingMonitor::open(config)?;
    let outcome = monitor.check_entity(&entity).await?;
    print_outcome(&entity, &outcome);
    Ok(())
}

async fn run_check_all(config: MonitorConfig) -> Result<()> {
    println!("🏥 Funding Watch - 每日检查");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let registry = load_entities(&config)?;
    println!("\n📂 Loaded {} companies", registry.len());

    let monitor = FundingMonitor::open(config)?;
    let summary = monitor.check_all(&registry).await?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {} 检查完成", summary.date);
    println!("✓ 已检查: {}/{}", summary.checked, summary.total);
    println!("✓ 发现信号: {}", summary.signals_found);
    println!("✓ 高置信度: {}", summary.high_confidence);
    for result in summary.results.iter().filter(|r| r.assessment.has_signal) {
        println!(
            "  {} {} ({}) {}%",
            confidence_icon(result.assessment.confidence),
            result.name,
            result.category,
            result.assessment.confidence
        );
    }
    Ok(())
}

fn run_usage(config: MonitorConfig) -> Result<()> {
    let monitor = FundingMonitor::open(config)?;
    let usage = monitor.usage()?;
    println!("{}", format_usage(&usage));
    Ok(())
}

fn run_list(config: &MonitorConfig) -> Result<()> {
    let registry = load_entities(config)?;
    println!("📋 监控企业 ({} 家)", registry.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (category, members) in registry.by_category() {
        println!("\n{} ({})", category, members.len());
        for entity in members {
            let aliases = if entity.aliases.is_empty() {
                String::new()
            } else {
                format!(" [{}]", entity.aliases.join(", "))
            };
            println!("  • {} ({}){}", entity.canonical_name, entity.priority.as_str(), aliases);
        }
    }
    Ok(())
}

fn run_alias(config: &MonitorConfig, action: AliasAction) -> Result<()> {
    let path = config.entities_path();
    let mut registry = load_entities(config)?;

    match action {
        AliasAction::Add { entity, alias } => {
            if registry.add_alias(&entity, &alias)? {
                registry.save(&path)?;
                println!("✓ {} ← {}", entity, alias);
            } else {
                println!("• {} already known for {}", alias, entity);
            }
        }
        AliasAction::Remove { entity, alias } => {
            if registry.remove_alias(&entity, &alias)? {
                registry.save(&path)?;
                println!("✓ removed {} from {}", alias, entity);
            } else {
                println!("• {} is not an alias of {}", alias, entity);
            }
        }
    }
    Ok(())
}

fn run_history(config: MonitorConfig, name: &str, limit: usize) -> Result<()> {
    // History is keyed by canonical name
    let name = load_entities(&config)
        .ok()
        .and_then(|r| r.find(name).map(|e| e.canonical_name.clone()))
        .unwrap_or_else(|| name.to_string());

    let monitor = FundingMonitor::open(config)?;
    let conn = monitor.connection();
    let conn = conn.lock().map_err(|_| anyhow::anyhow!("database lock poisoned"))?;

    println!("📜 {} - history", name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let assessments = db::get_assessments(&conn, &name, limit)?;
    println!("\n📊 Assessments ({})", assessments.len());
    for a in &assessments {
        println!(
            "  {} {} {}% sources={} round={}",
            a.checked_at.format("%Y-%m-%d %H:%M"),
            if a.has_signal { "🚨" } else { "·" },
            a.confidence,
            a.sources.join(","),
            a.estimated_round.as_deref().unwrap_or("-")
        );
    }

    let history = db::snapshot_history(&conn, &name)?;
    println!("\n🗂️  Snapshots ({})", history.len());
    for snapshot in history.versions() {
        let p = &snapshot.profile;
        println!(
            "  v{} {} {} capital={} legal={} status={} shareholders={}",
            snapshot.version,
            snapshot.valid_from.format("%Y-%m-%d"),
            if snapshot.is_current() { "(current)" } else { "" },
            p.capital.as_deref().unwrap_or("-"),
            p.legal_representative.as_deref().unwrap_or("-"),
            p.status.as_deref().unwrap_or("-"),
            p.shareholders.len()
        );
    }
    Ok(())
}
