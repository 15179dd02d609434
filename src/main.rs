mod acquisition;
mod app_bootstrap;
mod app_context;
mod cache;
mod catalog;
mod config;
mod config_persistence;
mod integration;
mod metadata;
mod playback;
mod protocol;
mod runtime;
mod state;

use std::{path::PathBuf, sync::Arc};

use app_bootstrap::services::{spawn_background_services, BackgroundServicesConfig};
use app_context::{AppSharedState, PersistencePaths};
use cache::cache_maintenance::load_cache_index;
use config_persistence::{default_config_path, load_or_create_config};
use log::info;
use protocol::Message;
use runtime::{console::spawn_console_reader, host_loop::run_host_loop};
use state::SharedState;
use tokio::sync::broadcast;

const USAGE: &str = "usage: scenecast [--config <path>]";

/// `--config <path>` or `--config=<path>`; anything else is rejected.
fn parse_config_path_arg<I>(args: I) -> Result<Option<PathBuf>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| format!("--config needs a path. {USAGE}"))?;
            config_path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(value));
        } else {
            return Err(format!("unexpected argument '{arg}'. {USAGE}"));
        }
    }
    Ok(config_path)
}

fn log_level_from_env(value: Option<String>) -> log::LevelFilter {
    value
        .and_then(|value| value.trim().parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Debug)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log_level_from_env(std::env::var("RUST_LOG").ok()));
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path =
        parse_config_path_arg(std::env::args().skip(1))?.unwrap_or_else(default_config_path);
    let config = load_or_create_config(&config_path)?;
    info!("Config loaded from {}", config_path.display());
    if config.catalog.playlist.is_empty() {
        info!(
            "No playlist configured. Set [catalog] playlist in {} and restart.",
            config_path.display()
        );
    }

    let store = Arc::new(SharedState::new(config));
    load_cache_index(&store);

    let (bus_sender, _) = broadcast::channel::<Message>(1024);
    let services = spawn_background_services(BackgroundServicesConfig {
        bus_sender: bus_sender.clone(),
        state: Arc::clone(&store),
        persistence_paths: PersistencePaths {
            config_file: config_path,
        },
    })?;
    let console = spawn_console_reader()?;

    run_host_loop(
        AppSharedState {
            bus_sender: bus_sender.clone(),
            store: Arc::clone(&store),
        },
        console,
    );

    info!("Application exiting");
    services.shutdown(&store, &bus_sender);
    Ok(())
}
