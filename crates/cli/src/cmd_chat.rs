//! `controlroom chat` - interactive control room.
//!
//! Stdin lines become `chat.send` to the selected session; the selected
//! session's runs stream back as text and tool steps.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use anyhow::Result;
use console::style;
use controlroom_client::{ClientConfig, ConnectionState, ControlRoom, SocketNotice};
use tokio::sync::mpsc;

use crate::render::{self, RunPrinter};

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Message(String),
    Cancel,
    New,
    Session(String),
    Sessions,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("cancel", _) => Input::Cancel,
        ("new", _) => Input::New,
        ("session", key) if !key.is_empty() => Input::Session(key.to_string()),
        ("sessions", _) => Input::Sessions,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

const HELP: &str = "/cancel  /new  /session KEY  /sessions  /quit";

fn print_notice(room: &mut ControlRoom) {
    if let Some(notice) = room.data_mut().take_notice() {
        if notice.is_error() {
            eprintln!("{}", style(format!("! {notice}")).red());
        } else {
            eprintln!("{}", style(format!("» {notice}")).cyan());
        }
    }
}

fn print_selection(room: &ControlRoom) {
    println!(
        "{} {}",
        style("session").dim(),
        style(room.selected_session_key()).bold()
    );
    if let Some(detail) = room.session_detail() {
        for line in render::history_lines(&detail.messages) {
            println!("{line}");
        }
    }
}

fn print_runs(room: &ControlRoom, printer: &mut RunPrinter) {
    let runs = room.selected_runs();
    let mut out = std::io::stdout().lock();
    for run in &runs {
        for line in printer.advance(run) {
            let _ = write!(out, "{}", render::paint(&line));
        }
    }
    let _ = out.flush();
    let live: HashSet<&str> = runs.iter().map(|run| run.run_id.as_str()).collect();
    printer.retain(|run_id| live.contains(run_id));
}

/// Stdin on a plain thread: a blocking read inside the runtime would hold
/// up shutdown until the next newline.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub async fn run(config: &ClientConfig) -> Result<()> {
    let (mut room, mut notices) = ControlRoom::connect(config)?;
    room.refresh_all().await;
    print_notice(&mut room);
    print_selection(&room);
    eprintln!("{}", style(HELP).dim());

    let mut printer = RunPrinter::default();
    let mut connection = None;
    let mut lines = spawn_stdin_reader();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Message(content) => room.send_chat(content).await,
                    Input::Cancel => {
                        let snapshot = room.socket().snapshot();
                        match snapshot.runs.active_run(room.selected_session_key()) {
                            Some(run_id) => room.cancel_run(run_id).await,
                            None => eprintln!("{}", style("no active run").dim()),
                        }
                    }
                    Input::New => {
                        room.create_thread();
                        printer = RunPrinter::default();
                        print_selection(&room);
                    }
                    Input::Session(key) => {
                        room.select_session(key).await;
                        printer = RunPrinter::default();
                        print_selection(&room);
                    }
                    Input::Sessions => {
                        room.data_mut().refresh_sessions().await;
                        println!(
                            "{}",
                            render::sessions_table(room.data().sessions(), room.selected_session_key())
                        );
                    }
                    Input::Quit => break,
                    Input::Unknown(text) => eprintln!("unknown command {text}; {HELP}"),
                }
                print_notice(&mut room);
            }
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                room.handle_notice(&notice).await;
                match &notice {
                    SocketNotice::Connection { state, reconnect_delay_ms } => {
                        if connection != Some(*state) {
                            connection = Some(*state);
                            eprintln!("{}", render::connection_line(*state, *reconnect_delay_ms));
                        }
                        if *state == ConnectionState::Disposed {
                            break;
                        }
                    }
                    SocketNotice::Event(_) => print_runs(&room, &mut printer),
                    SocketNotice::SessionUpdated { .. } | SocketNotice::Error { .. } => {}
                }
                print_notice(&mut room);
            }
        }
    }

    room.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_input("  hello there \n"), Input::Message("hello there".into()));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_input("/cancel"), Input::Cancel);
        assert_eq!(parse_input("/new"), Input::New);
        assert_eq!(parse_input("/session web:abc"), Input::Session("web:abc".into()));
        assert_eq!(parse_input("/sessions"), Input::Sessions);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/exit"), Input::Quit);
    }

    #[test]
    fn session_without_key_is_unknown() {
        assert_eq!(parse_input("/session"), Input::Unknown("/session".into()));
        assert_eq!(parse_input("/frobnicate"), Input::Unknown("/frobnicate".into()));
    }
}
