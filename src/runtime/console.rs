//! Operator console: line parsing and the stdin reader thread.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::config::PlaybackMode;

pub const CONSOLE_HELP: &str = "commands: sync | mode <continuous|single|loop> | scene <name> | \
nest <parent> <child> [hidden] | transition <scene> <ms> | stop | resume | seek <secs> | \
status | credential <secret> | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Sync,
    Mode(PlaybackMode),
    /// Cut the program output to a scene.
    Scene(String),
    Nest {
        parent: String,
        child: String,
        visible: bool,
    },
    Transition {
        scene: String,
        duration: Duration,
    },
    Stop,
    Resume,
    Seek(Duration),
    Status,
    Credential(String),
    Help,
    Quit,
}

fn required<'a>(value: Option<&'a str>, usage: &str) -> Result<&'a str, String> {
    value.ok_or_else(|| format!("usage: {usage}"))
}

pub fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "sync" => ConsoleCommand::Sync,
        "mode" => {
            let value = required(words.next(), "mode <continuous|single|loop>")?;
            let mode = PlaybackMode::parse(value)
                .ok_or_else(|| format!("unknown playback mode '{value}'"))?;
            ConsoleCommand::Mode(mode)
        }
        "scene" => ConsoleCommand::Scene(required(words.next(), "scene <name>")?.to_string()),
        "nest" => {
            let parent = required(words.next(), "nest <parent> <child> [hidden]")?;
            let child = required(words.next(), "nest <parent> <child> [hidden]")?;
            let visible = match words.next() {
                None | Some("visible") => true,
                Some("hidden") => false,
                Some(other) => return Err(format!("expected 'hidden' or 'visible', got '{other}'")),
            };
            ConsoleCommand::Nest {
                parent: parent.to_string(),
                child: child.to_string(),
                visible,
            }
        }
        "transition" => {
            let scene = required(words.next(), "transition <scene> <ms>")?;
            let millis = required(words.next(), "transition <scene> <ms>")?
                .parse::<u64>()
                .map_err(|error| format!("invalid transition duration: {error}"))?;
            ConsoleCommand::Transition {
                scene: scene.to_string(),
                duration: Duration::from_millis(millis),
            }
        }
        "stop" => ConsoleCommand::Stop,
        "resume" => ConsoleCommand::Resume,
        "seek" => {
            let seconds = required(words.next(), "seek <secs>")?
                .parse::<f64>()
                .map_err(|error| format!("invalid seek position: {error}"))?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err("seek position must be a non-negative number".to_string());
            }
            ConsoleCommand::Seek(Duration::from_secs_f64(seconds))
        }
        "status" => ConsoleCommand::Status,
        "credential" => {
            ConsoleCommand::Credential(required(words.next(), "credential <secret>")?.to_string())
        }
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

/// Forwards stdin lines until EOF, then sends `quit`.
pub fn spawn_console_reader() -> Result<Receiver<String>, String> {
    let (sender, receiver) = mpsc::sync_channel(64);
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!("Console: failed to read stdin: {}", error);
                        break;
                    }
                }
            }
            let _ = sender.send("quit".to_string());
        })
        .map_err(|error| format!("failed to start console thread: {error}"))?;
    Ok(receiver)
}
