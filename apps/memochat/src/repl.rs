use std::io::Write;

use anyhow::Result;
use client_core::{ClientHandle, ExchangeOutcome};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, warn};

use crate::render::{self, View};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    ToggleMode,
    Email(String),
    Password(String),
    Name(String),
    ShowPassword,
    Submit,
    Refresh,
    Memory,
    Logout,
    Chat(String),
    Unknown(String),
    Empty,
}

pub fn parse_line(line: &str, authenticated: bool) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "quit" | "exit" | "/quit" | "/exit"
    ) {
        return Command::Quit;
    }

    let Some(rest) = trimmed.strip_prefix('/') else {
        return if authenticated {
            Command::Chat(line.to_string())
        } else {
            Command::Unknown(trimmed.to_string())
        };
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "help" => Command::Help,
        "mode" => Command::ToggleMode,
        "email" => Command::Email(arg.to_string()),
        "password" => Command::Password(arg.to_string()),
        "name" => Command::Name(arg.to_string()),
        "show" => Command::ShowPassword,
        "submit" => Command::Submit,
        "refresh" => Command::Refresh,
        "memory" => Command::Memory,
        "logout" => Command::Logout,
        other => Command::Unknown(format!("/{other}")),
    }
}

const HELP: &[&str] = &[
    "Signed out: /mode, /name <n>, /email <e>, /password <p>, /show, /submit",
    "Signed in:  any text chats with the assistant; /memory, /refresh, /logout",
    "Anywhere:   /help, quit",
];

fn print_lines(lines: impl IntoIterator<Item = String>) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    let _ = out.flush();
}

/// Reads commands from stdin until `quit` or end of input. Network-bound
/// operations run as tasks so input stays responsive while they are pending.
pub async fn run<H>(handle: H) -> Result<()>
where
    H: ClientHandle + Clone + 'static,
{
    let mut events = handle.subscribe_events();
    let mut view = View::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_lines(render::mode_banner(handle.session_snapshot().await.mode));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !dispatch(&handle, &line).await {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "view: client event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "view: dropped client events"),
                Err(RecvError::Closed) => break,
            },
        }

        let session = handle.session_snapshot().await;
        let conversation = handle.conversation_snapshot().await;
        print_lines(view.diff(&session, &conversation));
    }

    Ok(())
}

/// Applies one input line. Returns `false` when the loop should stop.
async fn dispatch<H>(handle: &H, line: &str) -> bool
where
    H: ClientHandle + Clone + 'static,
{
    let session = handle.session_snapshot().await;
    match parse_line(line, session.authenticated()) {
        Command::Quit => return false,
        Command::Empty => {}
        Command::Help => print_lines(HELP.iter().map(|s| s.to_string())),
        Command::ToggleMode => handle.toggle_mode().await,
        Command::Email(email) => {
            handle.set_email(&email).await;
            print_lines(render::form_lines(&handle.session_snapshot().await));
        }
        Command::Password(password) => {
            handle.set_password(&password).await;
            print_lines(render::form_lines(&handle.session_snapshot().await));
        }
        Command::Name(name) => {
            handle.set_name(&name).await;
            print_lines(render::form_lines(&handle.session_snapshot().await));
        }
        Command::ShowPassword => {
            handle.toggle_password_visibility().await;
            print_lines(render::form_lines(&handle.session_snapshot().await));
        }
        Command::Submit if session.authenticated() => {
            print_lines(["Already signed in.".to_string()]);
        }
        Command::Submit => {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = handle.submit().await;
            });
        }
        Command::Refresh => {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.refresh_profile().await;
            });
        }
        Command::Memory => match &session.profile {
            Some(profile) if session.authenticated() => print_lines(render::memory_lines(profile)),
            _ => print_lines(["Sign in to see your memory.".to_string()]),
        },
        Command::Logout => handle.logout().await,
        // The user entry is written here, before the next line is read; only
        // the assistant call runs in the background.
        Command::Chat(text) => match handle.begin_message(&text).await {
            Ok(pending) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle.finish_exchange(pending).await;
                });
            }
            Err(ExchangeOutcome::Busy) => {
                print_lines(["Still waiting for the assistant.".to_string()]);
            }
            Err(_) => {}
        },
        Command::Unknown(input) => {
            print_lines([format!("Unknown command '{input}'. Type /help.")]);
        }
    }
    true
}
