//! Main-thread loop: console commands, the scheduler tick and bus feedback.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::TryRecvError as BusTryRecvError};

use crate::app_context::AppSharedState;
use crate::integration::classifier_keyring::set_classifier_credential;
use crate::playback::scheduler::PlaybackScheduler;
use crate::playback::selection::Selector;
use crate::protocol::{CatalogMessage, ControlMessage, Message, PipelineMessage};

use super::console::{parse_console_command, ConsoleCommand, CONSOLE_HELP};
use super::headless_host::HeadlessHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleFlow {
    Continue,
    Quit,
}

fn status_line(context: &AppSharedState, scheduler: &PlaybackScheduler, host: &HeadlessHost) -> String {
    let store = &context.store;
    let flags = store.flags();
    let session = store
        .session()
        .map(|session| {
            format!(
                "{} ({}, loop={})",
                session.current_id,
                session.mode.as_str(),
                session.loop_id.as_deref().unwrap_or("-")
            )
        })
        .unwrap_or_else(|| "-".to_string());
    format!(
        "phase={} mode={} session={} cached={} queued={} in_flight={} history={} tools_ready={} scene_active={} stop_requested={} | {}",
        scheduler.phase_label().unwrap_or("busy"),
        store.playback_mode().as_str(),
        session,
        store.cache_ids().len(),
        store.queued_work().len(),
        store.in_flight_work().as_deref().unwrap_or("-"),
        store.play_history().len(),
        flags.tools_ready,
        flags.scene_active,
        flags.stop_requested,
        host.describe()
    )
}

pub(crate) fn apply_console_command(
    command: ConsoleCommand,
    context: &AppSharedState,
    scheduler: &PlaybackScheduler,
    host: &mut HeadlessHost,
) -> ConsoleFlow {
    let store = &context.store;
    match command {
        ConsoleCommand::Sync => {
            let _ = context
                .bus_sender
                .send(Message::Control(ControlMessage::SyncNow));
        }
        ConsoleCommand::Mode(mode) => {
            if store.playback_mode() == mode {
                info!("Console: already in {} mode", mode.as_str());
            } else {
                store.set_playback_mode(mode);
                let _ = context
                    .bus_sender
                    .send(Message::Control(ControlMessage::SetPlaybackMode(mode)));
            }
        }
        ConsoleCommand::Scene(scene) => host.cut_to(&scene),
        ConsoleCommand::Nest {
            parent,
            child,
            visible,
        } => host.nest(&parent, &child, visible),
        ConsoleCommand::Transition { scene, duration } => host.transition_to(&scene, duration),
        ConsoleCommand::Stop => store.set_stop_requested(true),
        ConsoleCommand::Resume => store.set_stop_requested(false),
        ConsoleCommand::Seek(position) => {
            if let Err(error) = host.seek(position) {
                warn!("Console: seek failed: {}", error);
            }
        }
        ConsoleCommand::Status => info!("Status: {}", status_line(context, scheduler, host)),
        ConsoleCommand::Credential(secret) => match set_classifier_credential(&secret) {
            Ok(()) => info!("Console: classifier credential stored; it is used from the next start"),
            Err(error) => warn!("Console: {}", error),
        },
        ConsoleCommand::Help => info!("Console: {}", CONSOLE_HELP),
        ConsoleCommand::Quit => return ConsoleFlow::Quit,
    }
    ConsoleFlow::Continue
}

fn log_bus_message(message: &Message) {
    match message {
        Message::Control(ControlMessage::SetPlaybackMode(mode)) => {
            info!("Console: playback mode set to {}", mode.as_str());
        }
        Message::Control(_) => {}
        Message::Catalog(CatalogMessage::SyncStarted) => debug!("Console: catalog sync started"),
        Message::Catalog(CatalogMessage::SyncCompleted(outcome)) => info!(
            "Console: sync done, {} remote, {} new, {} removed",
            outcome.fetched,
            outcome.enqueued.len(),
            outcome.removed.len()
        ),
        Message::Catalog(CatalogMessage::SyncFailed(reason)) => {
            warn!("Console: sync failed: {}", reason);
        }
        Message::Pipeline(PipelineMessage::ItemPublished {
            id,
            metadata_pending,
            ..
        }) => info!(
            "Console: {} is ready{}",
            id,
            if *metadata_pending { " (metadata pending)" } else { "" }
        ),
        Message::Pipeline(PipelineMessage::ItemFailed { id, stage, reason }) => {
            warn!("Console: {} failed at {}: {}", id, stage, reason);
        }
        Message::Pipeline(PipelineMessage::MetadataRetried { id, .. }) => {
            info!("Console: metadata resolved for {}", id);
        }
    }
}

fn drain_bus_messages_nonblocking(bus_consumer: &mut broadcast::Receiver<Message>) {
    loop {
        match bus_consumer.try_recv() {
            Ok(message) => log_bus_message(&message),
            Err(BusTryRecvError::Empty) => break,
            Err(BusTryRecvError::Lagged(skipped)) => {
                debug!("Console: skipped {} bus messages", skipped);
            }
            Err(BusTryRecvError::Closed) => break,
        }
    }
}

/// Runs until `quit`, end of stdin, or shutdown.
pub(crate) fn run_host_loop(context: AppSharedState, console: Receiver<String>) {
    let scene_name = context.store.config().playback.scene_name;
    let scheduler = PlaybackScheduler::new(context.store.clone(), Selector::from_os_seed());
    let mut host = HeadlessHost::new(Instant::now(), Some(scene_name.clone()));
    let mut bus_consumer = context.bus_sender.subscribe();
    info!("Host: program starts on '{}'. {}", scene_name, CONSOLE_HELP);

    loop {
        let tick_started = Instant::now();
        let tick_interval = Duration::from_millis(context.store.config().playback.tick_interval_ms);

        loop {
            let line = match console.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            };
            match parse_console_command(&line) {
                Ok(Some(command)) => {
                    if apply_console_command(command, &context, &scheduler, &mut host)
                        == ConsoleFlow::Quit
                    {
                        return;
                    }
                }
                Ok(None) => {}
                Err(error) => warn!("Console: {}", error),
            }
        }

        let now = Instant::now();
        host.advance_to(now);
        scheduler.tick(&mut host, now);
        drain_bus_messages_nonblocking(&mut bus_consumer);

        if context.store.is_shutting_down() {
            return;
        }
        std::thread::sleep(tick_interval.saturating_sub(tick_started.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_console_command, ConsoleFlow};
    use crate::app_context::AppSharedState;
    use crate::config::{Config, PlaybackMode};
    use crate::playback::scheduler::PlaybackScheduler;
    use crate::playback::selection::Selector;
    use crate::protocol::{ControlMessage, Message};
    use crate::runtime::console::ConsoleCommand;
    use crate::runtime::headless_host::HeadlessHost;
    use crate::state::SharedState;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::broadcast;

    fn context() -> (AppSharedState, broadcast::Receiver<Message>) {
        let (bus_sender, bus_receiver) = broadcast::channel(16);
        let context = AppSharedState {
            bus_sender,
            store: Arc::new(SharedState::new(Config::default())),
        };
        (context, bus_receiver)
    }

    #[test]
    fn test_mode_command_updates_store_and_announces_the_change() {
        let (context, mut bus) = context();
        let scheduler = PlaybackScheduler::new(context.store.clone(), Selector::seeded(1));
        let mut host = HeadlessHost::new(Instant::now(), None);

        let flow = apply_console_command(
            ConsoleCommand::Mode(PlaybackMode::Single),
            &context,
            &scheduler,
            &mut host,
        );
        assert_eq!(flow, ConsoleFlow::Continue);
        assert_eq!(context.store.playback_mode(), PlaybackMode::Single);
        assert!(matches!(
            bus.try_recv(),
            Ok(Message::Control(ControlMessage::SetPlaybackMode(PlaybackMode::Single)))
        ));
    }

    #[test]
    fn test_stop_resume_and_sync_commands() {
        let (context, mut bus) = context();
        let scheduler = PlaybackScheduler::new(context.store.clone(), Selector::seeded(1));
        let mut host = HeadlessHost::new(Instant::now(), None);

        apply_console_command(ConsoleCommand::Stop, &context, &scheduler, &mut host);
        assert!(context.store.flags().stop_requested);
        apply_console_command(ConsoleCommand::Resume, &context, &scheduler, &mut host);
        assert!(!context.store.flags().stop_requested);

        apply_console_command(ConsoleCommand::Sync, &context, &scheduler, &mut host);
        assert!(matches!(
            bus.try_recv(),
            Ok(Message::Control(ControlMessage::SyncNow))
        ));
        assert_eq!(
            apply_console_command(ConsoleCommand::Quit, &context, &scheduler, &mut host),
            ConsoleFlow::Quit
        );
    }

    #[test]
    fn test_scene_commands_drive_the_host() {
        let (context, _bus) = context();
        let scheduler = PlaybackScheduler::new(context.store.clone(), Selector::seeded(1));
        let mut host = HeadlessHost::new(Instant::now(), None);

        apply_console_command(
            ConsoleCommand::Scene("Music".to_string()),
            &context,
            &scheduler,
            &mut host,
        );
        scheduler.tick(&mut host, Instant::now());
        assert!(context.store.flags().scene_active);
    }
}
