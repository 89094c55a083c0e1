//! Terminal rendering: tables for REST listings, incremental run output
//! for chat.

use std::collections::HashMap;

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use console::style;
use controlroom_client::run_stream::{RunStatus, StreamRun, ToolStepStatus};
use controlroom_client::ConnectionState;
use controlroom_protocol::{CronJob, SessionMessage, SessionSummary, SkillItem, Usage};

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn sessions_table(sessions: &[SessionSummary], selected: &str) -> Table {
    let mut out = table(vec!["", "KEY", "UPDATED", "CREATED"]);
    for session in sessions {
        out.add_row(vec![
            if session.key == selected { "*" } else { "" }.to_string(),
            session.key.clone(),
            session.updated_at.clone().unwrap_or_default(),
            session.created_at.clone().unwrap_or_default(),
        ]);
    }
    out
}

pub fn cron_table(jobs: &[CronJob]) -> Table {
    let mut out = table(vec!["ID", "NAME", "ENABLED", "SCHEDULE", "MESSAGE", "LAST STATUS"]);
    for job in jobs {
        out.add_row(vec![
            job.id.clone(),
            job.name.clone(),
            yes_no(job.enabled).to_string(),
            job.schedule.describe(),
            job.payload.message.clone(),
            job.state.last_status.clone().unwrap_or_default(),
        ]);
    }
    out
}

pub fn skills_table(skills: &[SkillItem]) -> Table {
    let mut out = table(vec!["NAME", "SOURCE", "ENABLED", "ALWAYS", "AVAILABLE", "DESCRIPTION"]);
    for skill in skills {
        out.add_row(vec![
            skill.name.clone(),
            skill.source.clone(),
            yes_no(skill.enabled).to_string(),
            skill.always.map(yes_no).unwrap_or("-").to_string(),
            yes_no(skill.available).to_string(),
            skill.description.clone(),
        ]);
    }
    out
}

pub fn history_lines(messages: &[SessionMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| {
            let content = message.content.as_deref()?.trim();
            if content.is_empty() {
                return None;
            }
            let role = match message.role.as_str() {
                "user" => style("you").cyan().bold().to_string(),
                "assistant" => style("agent").green().bold().to_string(),
                other => style(other).dim().to_string(),
            };
            Some(format!("{role}: {content}"))
        })
        .collect()
}

pub fn connection_line(state: ConnectionState, reconnect_delay_ms: u64) -> String {
    match state {
        ConnectionState::Connected => style("● connected").green().to_string(),
        ConnectionState::Connecting => style("○ connecting").yellow().to_string(),
        ConnectionState::Reconnecting => style("○ reconnecting").yellow().to_string(),
        ConnectionState::Offline => style(format!(
            "● offline (retrying in {:.1}s)",
            reconnect_delay_ms as f64 / 1000.0
        ))
        .red()
        .to_string(),
        ConnectionState::Disposed => style("● closed").dim().to_string(),
    }
}

pub fn usage_summary(usage: &Usage) -> String {
    usage
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Incremental run output
// ---------------------------------------------------------------------------

/// One piece of chat output derived from a run's progress
#[derive(Debug, Clone, PartialEq)]
pub enum ChatLine {
    /// Text to append to the current assistant output
    Delta(String),
    /// The final text disagrees with what was streamed; print it whole.
    Replace(String),
    ToolStarted { name: String },
    ToolFinished {
        name: String,
        ok: Option<bool>,
        preview: Option<String>,
    },
    Finished { usage: Option<Usage> },
    Failed { error: String },
}

#[derive(Debug, Default)]
struct RunProgress {
    printed: String,
    tools: Vec<ToolStepStatus>,
    settled: bool,
}

/// Tracks what has already been printed per run and yields only the rest.
#[derive(Debug, Default)]
pub struct RunPrinter {
    runs: HashMap<String, RunProgress>,
}

impl RunPrinter {
    pub fn advance(&mut self, run: &StreamRun) -> Vec<ChatLine> {
        let progress = self.runs.entry(run.run_id.clone()).or_default();
        let mut lines = Vec::new();
        if progress.settled {
            return lines;
        }

        for (idx, step) in run.tools.iter().enumerate() {
            match (progress.tools.get(idx).copied(), step.status) {
                (None, ToolStepStatus::Running) => {
                    lines.push(ChatLine::ToolStarted {
                        name: step.name.clone(),
                    });
                    progress.tools.push(ToolStepStatus::Running);
                }
                (None, ToolStepStatus::Done) | (Some(ToolStepStatus::Running), ToolStepStatus::Done) => {
                    lines.push(ChatLine::ToolFinished {
                        name: step.name.clone(),
                        ok: step.ok,
                        preview: step.result_preview.clone(),
                    });
                    match progress.tools.get_mut(idx) {
                        Some(status) => *status = ToolStepStatus::Done,
                        None => progress.tools.push(ToolStepStatus::Done),
                    }
                }
                _ => {}
            }
        }

        if run.content != progress.printed {
            match run.content.strip_prefix(progress.printed.as_str()) {
                Some(rest) => lines.push(ChatLine::Delta(rest.to_string())),
                None => lines.push(ChatLine::Replace(run.content.clone())),
            }
            progress.printed = run.content.clone();
        }

        match run.status {
            RunStatus::Final => {
                progress.settled = true;
                lines.push(ChatLine::Finished {
                    usage: run.usage.clone(),
                });
            }
            RunStatus::Error => {
                progress.settled = true;
                lines.push(ChatLine::Failed {
                    error: run.error.clone().unwrap_or_default(),
                });
            }
            RunStatus::Streaming => {}
        }
        lines
    }

    /// Forget runs no longer present so the map stays bounded.
    pub fn retain(&mut self, live: impl Fn(&str) -> bool) {
        self.runs.retain(|run_id, _| live(run_id));
    }
}

/// Terminal text for one line; deltas carry no trailing newline.
pub fn paint(line: &ChatLine) -> String {
    match line {
        ChatLine::Delta(text) => text.clone(),
        ChatLine::Replace(text) => format!("\n{text}"),
        ChatLine::ToolStarted { name } => {
            format!("\n{}\n", style(format!("  ⚙ {name} …")).dim())
        }
        ChatLine::ToolFinished { name, ok, preview } => {
            let mark = match ok {
                Some(false) => style("✗").red(),
                _ => style("✓").green(),
            };
            let preview = preview
                .as_deref()
                .map(|text| text.lines().next().unwrap_or_default())
                .filter(|text| !text.is_empty())
                .map(|text| format!(" {}", style(text).dim()))
                .unwrap_or_default();
            format!("\n  {mark} {name}{preview}\n")
        }
        ChatLine::Finished { usage } => match usage {
            Some(usage) if !usage.is_empty() => {
                format!("\n{}\n", style(format!("  [{}]", usage_summary(usage))).dim())
            }
            _ => "\n".to_string(),
        },
        ChatLine::Failed { error } => format!("\n{}\n", style(format!("  error: {error}")).red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlroom_client::run_stream::{reduce, RunAction};
    use controlroom_client::RunStreamState;
    use controlroom_protocol::ServerEvent;

    fn apply(state: RunStreamState, event: ServerEvent) -> RunStreamState {
        reduce(state, RunAction::from(event), 1)
    }

    fn run(state: &RunStreamState) -> &StreamRun {
        state.run("run-1").expect("run-1")
    }

    #[test]
    fn prints_only_new_text_then_finishes_once() {
        let mut printer = RunPrinter::default();
        let state = apply(
            RunStreamState::default(),
            ServerEvent::ChatDelta {
                run_id: Some("run-1".into()),
                text_delta: Some("Hel".into()),
            },
        );
        assert_eq!(printer.advance(run(&state)), vec![ChatLine::Delta("Hel".into())]);

        let state = apply(
            state,
            ServerEvent::ChatDelta {
                run_id: Some("run-1".into()),
                text_delta: Some("lo".into()),
            },
        );
        assert_eq!(printer.advance(run(&state)), vec![ChatLine::Delta("lo".into())]);
        assert!(printer.advance(run(&state)).is_empty());

        let state = apply(
            state,
            ServerEvent::ChatFinal {
                run_id: Some("run-1".into()),
                full_text: Some("Hello".into()),
                usage: None,
                session_key: None,
            },
        );
        assert_eq!(
            printer.advance(run(&state)),
            vec![ChatLine::Finished { usage: None }]
        );
        assert!(printer.advance(run(&state)).is_empty());
    }

    #[test]
    fn divergent_final_text_is_printed_whole() {
        let mut printer = RunPrinter::default();
        let state = apply(
            RunStreamState::default(),
            ServerEvent::ChatDelta {
                run_id: Some("run-1".into()),
                text_delta: Some("draft".into()),
            },
        );
        printer.advance(run(&state));
        let state = apply(
            state,
            ServerEvent::ChatFinal {
                run_id: Some("run-1".into()),
                full_text: Some("final answer".into()),
                usage: None,
                session_key: None,
            },
        );
        assert_eq!(
            printer.advance(run(&state)),
            vec![
                ChatLine::Replace("final answer".into()),
                ChatLine::Finished { usage: None },
            ]
        );
    }

    #[test]
    fn tool_steps_are_reported_on_start_and_end() {
        let mut printer = RunPrinter::default();
        let state = apply(
            RunStreamState::default(),
            ServerEvent::ToolStart {
                run_id: Some("run-1".into()),
                tool_name: Some("shell".into()),
                args: None,
            },
        );
        assert_eq!(
            printer.advance(run(&state)),
            vec![ChatLine::ToolStarted {
                name: "shell".into()
            }]
        );

        let state = apply(
            state,
            ServerEvent::ToolEnd {
                run_id: Some("run-1".into()),
                tool_name: Some("shell".into()),
                result_preview: Some("ok".into()),
                ok: Some(true),
            },
        );
        assert_eq!(
            printer.advance(run(&state)),
            vec![ChatLine::ToolFinished {
                name: "shell".into(),
                ok: Some(true),
                preview: Some("ok".into()),
            }]
        );
        assert!(printer.advance(run(&state)).is_empty());
    }

    #[test]
    fn failed_runs_report_error() {
        let mut printer = RunPrinter::default();
        let state = apply(
            RunStreamState::default(),
            ServerEvent::AgentError {
                run_id: Some("run-1".into()),
                message: Some("boom".into()),
            },
        );
        assert_eq!(
            printer.advance(run(&state)),
            vec![ChatLine::Failed {
                error: "boom".into()
            }]
        );
    }

    #[test]
    fn retain_drops_forgotten_runs() {
        let mut printer = RunPrinter::default();
        let state = apply(
            RunStreamState::default(),
            ServerEvent::ChatDelta {
                run_id: Some("run-1".into()),
                text_delta: Some("x".into()),
            },
        );
        printer.advance(run(&state));
        printer.retain(|_| false);
        assert_eq!(printer.advance(run(&state)), vec![ChatLine::Delta("x".into())]);
    }

    #[test]
    fn usage_summary_lists_counters() {
        let mut usage = Usage::new();
        usage.insert("completion_tokens".into(), 5.into());
        usage.insert("prompt_tokens".into(), 12.into());
        assert_eq!(usage_summary(&usage), "completion_tokens=5 prompt_tokens=12");
    }

    #[test]
    fn sessions_table_marks_selection() {
        let sessions = vec![
            SessionSummary {
                key: "web:one".into(),
                created_at: None,
                updated_at: Some("2026-01-01T00:00:00".into()),
                path: None,
            },
            SessionSummary {
                key: "web:two".into(),
                created_at: None,
                updated_at: None,
                path: None,
            },
        ];
        let rendered = sessions_table(&sessions, "web:two").to_string();
        assert!(rendered.contains("web:one"));
        assert!(rendered.contains("2026-01-01T00:00:00"));
        assert!(rendered.contains('*'));
    }
}
