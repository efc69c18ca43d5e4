//! Conflux Core CLI
//!
//! Usage:
//!   conflux-core build [--profile <id>] [--test]
//!   conflux-core update <group_id>
//!   conflux-core parse <file>

use anyhow::{anyhow, Result};
use std::sync::Arc;

use conflux_core::config::{BuildOptions, ConfigBuilder, SettingsManager};
use conflux_core::store::JsonStore;
use conflux_core::subscription::{parse_raw, GroupUpdater, HttpFetcher, UpdateOutcome};
use conflux_core::utils::{get_assets_dir, get_store_path, LocalPortAllocator};

fn print_usage() {
    eprintln!("Conflux Core");
    eprintln!("Usage:");
    eprintln!("  conflux-core build [--profile <id>] [--test]");
    eprintln!("  conflux-core update <group_id>");
    eprintln!("  conflux-core parse <file>");
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(|s| s.as_str()) {
        Some("build") => handle_build(&args[2..]),
        Some("update") => handle_update(&args[2..]).await,
        Some("parse") => handle_parse(&args[2..]),
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// 输出选中节点（或 `--profile` 指定节点）的配置
fn handle_build(args: &[String]) -> Result<()> {
    let mut settings = SettingsManager::new()?.load()?;
    if settings.external_assets.trim().is_empty() {
        settings.external_assets = get_assets_dir()?.to_string_lossy().to_string();
    }
    let store = JsonStore::open(get_store_path()?)?;

    let id = match flag_value(args, "--profile") {
        Some(id) => id.parse::<i64>()?,
        None => settings.selected_proxy,
    };
    let options = BuildOptions {
        for_test: args.iter().any(|a| a == "--test"),
        for_export: false,
    };
    let ports = LocalPortAllocator::new();
    let result = ConfigBuilder::new(&store, &settings, &ports)
        .options(options)
        .build_by_id(id)?;
    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    println!("{}", result.to_json_string()?);
    Ok(())
}

/// 更新一个订阅分组
async fn handle_update(args: &[String]) -> Result<()> {
    let group_id: i64 = args
        .first()
        .ok_or_else(|| anyhow!("Missing group id"))?
        .parse()?;
    let settings = SettingsManager::new()?.load()?;
    let store = Arc::new(JsonStore::open(get_store_path()?)?);
    let fetcher = Arc::new(HttpFetcher::new()?);

    let updater = GroupUpdater::new(store, fetcher, &settings);
    match updater.update(group_id).await {
        UpdateOutcome::Success(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        UpdateOutcome::Failure { message, .. } => Err(anyhow!(message)),
        UpdateOutcome::AlreadyRunning(id) => Err(anyhow!("Group {} is already updating", id)),
    }
}

/// 解析本地订阅内容并输出节点
fn handle_parse(args: &[String]) -> Result<()> {
    let path = args.first().ok_or_else(|| anyhow!("Missing file path"))?;
    let content = std::fs::read_to_string(path)?;
    let parsed = parse_raw(&content)?;
    for warning in &parsed.warnings {
        eprintln!("Warning: {}", warning);
    }
    println!("{}", serde_json::to_string_pretty(&parsed.beans)?);
    Ok(())
}
