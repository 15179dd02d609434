use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use toml_edit::{DocumentMut, Item, Table};

use crate::config::{sanitize_config, Config};
use crate::protocol::{ControlMessage, Message};
use crate::state::SharedState;

const CONFIG_DIR_NAME: &str = "scenecast";
const CONFIG_FILE_NAME: &str = "config.toml";

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn values_equal(left: &Item, right: &Item) -> bool {
    match (left.as_value(), right.as_value()) {
        (Some(left), Some(right)) => {
            let mut left = left.clone();
            let mut right = right.clone();
            left.decor_mut().clear();
            right.decor_mut().clear();
            left.to_string() == right.to_string()
        }
        _ => false,
    }
}

fn merge_table_with_targeted_updates(destination: &mut Table, source: &Table) {
    for (key, source_item) in source.iter() {
        match source_item {
            Item::Table(source_table) => {
                if !destination.get(key).is_some_and(Item::is_table) {
                    destination.insert(key, Item::Table(Table::new()));
                }
                let Some(destination_table) = destination.get_mut(key).and_then(Item::as_table_mut)
                else {
                    continue;
                };
                merge_table_with_targeted_updates(destination_table, source_table);
            }
            _ => {
                if destination
                    .get(key)
                    .is_some_and(|current| values_equal(current, source_item))
                {
                    continue;
                }
                set_table_value_preserving_decor(destination, key, source_item.clone());
            }
        }
    }
}

/// Re-renders `config` on top of the existing file text, keeping user comments.
pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, String> {
    let next_config_text = toml::to_string(config)
        .map_err(|err| format!("failed to serialize config to TOML: {}", err))?;
    let next_document = next_config_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse serialized config TOML document: {}", err))?;
    let mut existing_document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("failed to parse existing config as TOML document: {}", err))?;

    merge_table_with_targeted_updates(existing_document.as_table_mut(), next_document.as_table());
    Ok(existing_document.to_string())
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = if let Some(existing_text) = existing_text {
        match serialize_config_with_preserved_comments(&existing_text, config) {
            Ok(updated_text) => Some(updated_text),
            Err(err) => {
                warn!(
                    "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                    path.display(),
                    err
                );
                toml::to_string(config).ok()
            }
        }
    } else {
        toml::to_string(config).ok()
    };

    let Some(config_text) = config_text else {
        log::error!("Failed to serialize config for {}", path.display());
        return;
    };

    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

/// Writes the store's config back to disk whenever the playback mode changes.
///
/// Runs on its own thread so the host tick never waits on the filesystem.
pub fn run_config_writer(state: &SharedState, config_file: &Path, mut bus_consumer: Receiver<Message>) {
    loop {
        match bus_consumer.blocking_recv() {
            Ok(Message::Control(ControlMessage::SetPlaybackMode(mode))) => {
                debug!("ConfigWriter: persisting mode {}", mode.as_str());
                persist_config_file(&state.config(), config_file);
            }
            Ok(Message::Control(ControlMessage::Shutdown)) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    "ConfigWriter: lagged on control bus, skipped {} message(s); persisting current config",
                    skipped
                );
                persist_config_file(&state.config(), config_file);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("ConfigWriter: stopped");
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Reads the config file, writing defaults first when it does not exist yet.
/// A file that fails to parse falls back to defaults without being overwritten.
pub fn load_or_create_config(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                format!("failed to create config directory {}: {}", parent.display(), err)
            })?;
        }
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        let default_text = toml::to_string(&Config::default())
            .map_err(|err| format!("failed to serialize default config: {}", err))?;
        std::fs::write(path, default_text)
            .map_err(|err| format!("failed to write {}: {}", path.display(), err))?;
    }

    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
    let parsed = match toml::from_str::<Config>(&text) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(
                "Config file {} is invalid ({}). Using defaults for this session.",
                path.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(parsed))
}
