//! Cache command - inspect and clean stored artifacts

use super::input::open_store;
use crate::cache::{
    format_bytes, gb_to_bytes, ArtifactStore, CacheEntry, CacheSizeStatus, CacheState,
};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::StashResult;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> StashResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config);

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Info => show_info(&ctx, &store, config).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&ctx, &store, config, days, dry_run).await,
        CacheAction::Remove { entry } => {
            store.remove(&entry).await?;
            ui::step_ok(&ctx, &format!("Removed {}", entry));
            Ok(())
        }
        CacheAction::Clear { yes } => clear_entries(&ctx.with_auto_yes(yes), &store).await,
    }
}

async fn list_entries(store: &ArtifactStore, format: OutputFormat) -> StashResult<()> {
    let entries = store.list().await?;

    match format {
        OutputFormat::Json => print_entry_json(&entries)?,
        OutputFormat::Plain => print_entry_plain(&entries),
        OutputFormat::Table if entries.is_empty() => {
            println!("No cache entries in {}", store.base_dir().display())
        }
        OutputFormat::Table => print_entry_table(&entries),
    }

    Ok(())
}

/// State padded to the table column, then colored
fn state_label(state: CacheState) -> String {
    let padded = format!("{:<10}", state.to_string());
    match state {
        CacheState::Complete => style(padded).green().to_string(),
        CacheState::Building => style(padded).yellow().to_string(),
        CacheState::Miss => style(padded).dim().to_string(),
    }
}

fn print_entry_table(entries: &[CacheEntry]) {
    println!(
        "{:<48} {:<18} {:<10} {:>10} {:<17}",
        "ENTRY", "KIND", "STATE", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(107));

    for entry in entries {
        let size = entry
            .size_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string());
        let created = entry
            .created_at()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<48} {:<18} {} {:>10} {:<17}",
            entry.dir_name,
            entry.kind(),
            state_label(entry.state),
            size,
            created
        );
    }

    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

fn print_entry_json(entries: &[CacheEntry]) -> StashResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson<'a> {
        entry: &'a str,
        name: Option<&'a str>,
        kind: &'a str,
        state: CacheState,
        fingerprint: Option<&'a str>,
        size_bytes: Option<u64>,
        created_at: Option<String>,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            entry: &e.dir_name,
            name: e.manifest.as_ref().map(|m| m.name.as_str()),
            kind: e.kind(),
            state: e.state,
            fingerprint: e.manifest.as_ref().map(|m| m.fingerprint.as_str()),
            size_bytes: e.size_bytes,
            created_at: e.created_at().map(|t| t.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

fn print_entry_plain(entries: &[CacheEntry]) {
    for entry in entries {
        println!("{}", entry.dir_name);
    }
}

async fn show_info(ctx: &UiContext, store: &ArtifactStore, config: &Config) -> StashResult<()> {
    let entries = store.list().await?;
    let total: u64 = entries.iter().filter_map(|e| e.size_bytes).sum();
    let limit = gb_to_bytes(config.cache.max_total_gb);
    let building = entries
        .iter()
        .filter(|e| e.state == CacheState::Building)
        .count();

    ui::key_value(ctx, "Location", &store.base_dir().display().to_string());
    ui::key_value(ctx, "Key mode", &config.cache.key_mode.to_string());
    ui::key_value(ctx, "Entries", &entries.len().to_string());

    let size = format!(
        "{} of {} ({:.0}%)",
        format_bytes(total),
        format_bytes(limit),
        CacheSizeStatus::percentage(total, limit)
    );
    match CacheSizeStatus::from_usage(total, limit) {
        CacheSizeStatus::Ok => ui::key_value_status(ctx, "Size", &size, true),
        CacheSizeStatus::Warning => {
            ui::key_value_status(ctx, "Size", &size, false);
            ui::step_warn_hint(ctx, "Cache is nearing its size limit", "sortstash cache gc");
        }
        CacheSizeStatus::Exceeded => {
            ui::key_value_status(ctx, "Size", &size, false);
            ui::step_warn_hint(
                ctx,
                "Cache exceeds cache.max_total_gb",
                "sortstash cache gc --days 7",
            );
        }
    }

    if building > 0 {
        let hint = if config.cache.adopt_unmarked {
            "adopted as complete (cache.adopt_unmarked = true)"
        } else {
            "recomputed on next use"
        };
        let noun = if building == 1 { "entry" } else { "entries" };
        ui::step_info(
            ctx,
            &format!("{} {} without a manifest, {}", building, noun, hint),
        );
    }

    Ok(())
}

async fn gc_entries(
    ctx: &UiContext,
    store: &ArtifactStore,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> StashResult<()> {
    let days = days_override.unwrap_or(config.cache.gc_days);
    if days == 0 {
        ui::remark(ctx, "Age-based removal is disabled (gc_days = 0)");
    }

    let report = store.gc(days, dry_run).await?;
    if report.is_empty() {
        ui::step_ok(ctx, "Nothing to collect");
        return Ok(());
    }

    for entry in &report.entries {
        let age = entry
            .created_at()
            .map(|t| format!("{} days old", (Utc::now() - t).num_days()))
            .unwrap_or_else(|| "age unknown".to_string());
        println!("  {} {} ({})", style("•").red(), entry.dir_name, age);
    }
    for dir in &report.stale_staging {
        println!("  {} {} (abandoned staging)", style("•").red(), dir.display());
    }

    if dry_run {
        ui::remark(ctx, "Dry run - nothing removed");
    } else {
        if report.locks_removed > 0 {
            ui::remark(ctx, &format!("Removed {} orphaned lock files", report.locks_removed));
        }
        ui::step_ok(
            ctx,
            &format!(
                "Removed {} entries and {} staging directories",
                report.entries.len(),
                report.stale_staging.len()
            ),
        );
    }

    Ok(())
}

async fn clear_entries(ctx: &UiContext, store: &ArtifactStore) -> StashResult<()> {
    let entries = store.list().await?;
    if entries.is_empty() {
        ui::step_ok(ctx, "Cache is already empty");
        return Ok(());
    }

    let total: u64 = entries.iter().filter_map(|e| e.size_bytes).sum();
    let question = format!(
        "Remove all {} entries ({}) from {}?",
        entries.len(),
        format_bytes(total),
        store.base_dir().display()
    );
    if !ui::confirm(ctx, &question, false).await? {
        ui::remark(ctx, "Aborted");
        return Ok(());
    }

    let removed = store.clear().await?;
    ui::step_ok(ctx, &format!("Removed {} entries", removed));
    Ok(())
}
