//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_FILE};
use crate::error::{StashError, StashResult};
use crate::sorting::SorterParams;
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;
use toml_edit::{value, Array, DocumentMut, Item, Table};

/// Keys holding comma-separated lists
const LIST_KEYS: &[&str] = &["sorter.args"];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> StashResult<()> {
    let ctx = UiContext::detect();

    match args.action {
        None | Some(ConfigAction::Show) => println!("{}", toml::to_string_pretty(config)?),
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(&ctx, manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            let path = if local {
                std::env::current_dir()
                    .map_err(|e| StashError::io("getting current directory", e))?
                    .join(LOCAL_CONFIG_FILE)
            } else {
                manager.ensure_config_dir().await?;
                manager.path().to_path_buf()
            };

            if let Err(e) = validate_config_key(&key) {
                ui::step_error_detail(&ctx, "Unknown config key", &key);
                ui::remark(&ctx, "Valid keys:");
                for key in valid_keys() {
                    eprintln!("  {}", key);
                }
                return Err(e);
            }

            set_value(&path, &key, &value).await?;
            ui::step_ok_detail(
                &ctx,
                &format!("Set {} = {}", key, value),
                &path.display().to_string(),
            );
        }
    }

    Ok(())
}

async fn init_config(ctx: &UiContext, manager: &ConfigManager, force: bool) -> StashResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

/// Every settable key, `sorter.{tetrode,probe}.*` expanded from the
/// parameter set
fn valid_keys() -> Vec<String> {
    let mut keys: Vec<String> = [
        "general.log_format",
        "cache.base_dir",
        "cache.key_mode",
        "cache.adopt_unmarked",
        "cache.lock",
        "cache.gc_days",
        "cache.max_total_gb",
        "probe.probe_file",
        "probe.tetrode_spacing_um",
        "sorter.backend",
        "sorter.command",
        "sorter.args",
        "postprocessing.peak_sign",
        "postprocessing.return_scaled",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect();

    for preset in ["tetrode", "probe"] {
        keys.extend(
            param_names()
                .into_iter()
                .map(|name| format!("sorter.{}.{}", preset, name)),
        );
    }
    keys
}

fn param_names() -> Vec<String> {
    match serde_json::to_value(SorterParams::default()) {
        Ok(serde_json::Value::Object(fields)) => fields.keys().cloned().collect(),
        _ => vec![],
    }
}

/// Validate that a config key is one we recognise
fn validate_config_key(key: &str) -> StashResult<()> {
    if valid_keys().iter().any(|k| k == key) {
        Ok(())
    } else {
        Err(StashError::User(format!("Unknown config key: {}", key)))
    }
}

/// Write `key = value` into the TOML file at `path`, keeping its comments
/// and layout, and reject the edit if the result is not a valid config
async fn set_value(path: &Path, key: &str, raw: &str) -> StashResult<()> {
    let content = if path.exists() {
        fs::read_to_string(path)
            .await
            .map_err(|e| StashError::io(format!("reading {}", path.display()), e))?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = content.parse().map_err(|e: toml_edit::TomlError| {
        StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    set_toml_value(&mut doc, key, raw)?;

    let updated = doc.to_string();
    toml::from_str::<Config>(&updated).map_err(|e| StashError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: format!("{} = {}: {}", key, raw, e.message()),
    })?;

    fs::write(path, updated)
        .await
        .map_err(|e| StashError::io(format!("writing {}", path.display()), e))
}

/// Set a dot-separated key, creating intermediate tables as needed
fn set_toml_value(doc: &mut DocumentMut, key: &str, raw: &str) -> StashResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((leaf, tables)) = parts.split_last() else {
        return Err(StashError::User("empty config key".to_string()));
    };

    let mut current = doc.as_table_mut();
    for &part in tables {
        let item = current.entry(part).or_insert_with(|| {
            let mut table = Table::new();
            table.set_implicit(true);
            Item::Table(table)
        });
        current = item
            .as_table_mut()
            .ok_or_else(|| StashError::User(format!("Expected table at key: {}", part)))?;
    }

    current.insert(leaf, parse_value(key, raw));
    Ok(())
}

fn parse_value(key: &str, raw: &str) -> Item {
    if LIST_KEYS.contains(&key) {
        let items: Array = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        return value(items);
    }

    if let Ok(b) = raw.parse::<bool>() {
        value(b)
    } else if let Ok(n) = raw.parse::<i64>() {
        value(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        value(f)
    } else {
        value(raw)
    }
}
