//! One-shot REST commands: sessions, cron, heartbeat, skills, config, status.

use std::path::Path;

use anyhow::{bail, Context, Result};
use console::style;
use controlroom_client::{ClientConfig, ControlRoomData};
use controlroom_protocol::{CronJobCreate, CronJobPatch, ScheduleKind, SkillSettings};
use serde_json::Value;

use crate::render;
use crate::{ConfigCommand, CronAddArgs, CronCommand, HeartbeatCommand, SessionsCommand, SkillsCommand};

/// Fail on an error notice, print an info notice.
fn finish(data: &mut ControlRoomData) -> Result<()> {
    match data.take_notice() {
        Some(notice) if notice.is_error() => bail!("{notice}"),
        Some(notice) => {
            println!("{notice}");
            Ok(())
        }
        None => Ok(()),
    }
}

pub async fn sessions(config: &ClientConfig, cmd: SessionsCommand) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    match cmd {
        SessionsCommand::List => {
            data.refresh_sessions().await;
            finish(&mut data)?;
            if data.sessions().is_empty() {
                println!("No sessions.");
            } else {
                println!(
                    "{}",
                    render::sessions_table(data.sessions(), data.selected_session_key())
                );
            }
        }
        SessionsCommand::Show { key } => {
            data.select_session(key.clone());
            if !data.load_session_detail(&key).await {
                bail!("session {key} could not be loaded");
            }
            if let Some(detail) = data.session_detail() {
                println!("{}", style(&detail.key).bold());
                for line in render::history_lines(&detail.messages) {
                    println!("{line}");
                }
            }
        }
        SessionsCommand::Delete { key } => {
            let deleted = data.delete_session(&key).await;
            finish(&mut data)?;
            if deleted {
                println!("Deleted {key}");
            }
        }
    }
    Ok(())
}

fn cron_create(args: CronAddArgs) -> Result<CronJobCreate> {
    let schedule_kind = match (&args.every, &args.cron, &args.at) {
        (Some(_), _, _) => ScheduleKind::Every,
        (_, Some(_), _) => ScheduleKind::Cron,
        (_, _, Some(_)) => ScheduleKind::At,
        _ => bail!("one of --every, --cron or --at is required"),
    };
    Ok(CronJobCreate {
        name: args.name,
        message: args.message,
        schedule_kind,
        every_seconds: args.every,
        cron_expr: args.cron,
        at_iso: args.at,
        deliver: args.deliver,
        channel: args.channel,
        to: args.to,
        delete_after_run: args.delete_after_run,
    })
}

pub async fn cron(config: &ClientConfig, cmd: CronCommand) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    let changed = match cmd {
        CronCommand::List => {
            data.load_cron_jobs().await;
            true
        }
        CronCommand::Add(args) => {
            let job = cron_create(args)?;
            data.create_cron(&job).await
        }
        CronCommand::Enable { id } => data.patch_cron(&id, &enabled_patch(true)).await,
        CronCommand::Disable { id } => data.patch_cron(&id, &enabled_patch(false)).await,
        CronCommand::Run { id } => data.run_cron(&id).await,
        CronCommand::Remove { id } => data.remove_cron(&id).await,
    };
    finish(&mut data)?;
    if changed {
        if data.cron_jobs().is_empty() {
            println!("No cron jobs.");
        } else {
            println!("{}", render::cron_table(data.cron_jobs()));
        }
    }
    Ok(())
}

fn enabled_patch(enabled: bool) -> CronJobPatch {
    CronJobPatch {
        enabled: Some(enabled),
        ..Default::default()
    }
}

pub async fn heartbeat(config: &ClientConfig, cmd: HeartbeatCommand) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    match cmd {
        HeartbeatCommand::Show => {
            data.load_heartbeat().await;
            finish(&mut data)?;
            let heartbeat = data.heartbeat();
            println!("Interval: {}s", heartbeat.interval_seconds);
            println!();
            println!("{}", heartbeat.content);
        }
        HeartbeatCommand::Save { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            if data.save_heartbeat(&content).await {
                println!("Heartbeat saved.");
            }
            finish(&mut data)?;
        }
        HeartbeatCommand::Trigger => {
            data.trigger_heartbeat().await;
            finish(&mut data)?;
        }
    }
    Ok(())
}

/// Apply one skill's toggles over the current settings.
fn merge_skill(
    mut settings: SkillSettings,
    name: &str,
    enabled: Option<bool>,
    always: Option<bool>,
) -> SkillSettings {
    let entry = settings.entry(name.to_string()).or_default();
    if enabled.is_some() {
        entry.enabled = enabled;
    }
    if always.is_some() {
        entry.always = always;
    }
    settings
}

pub async fn skills(config: &ClientConfig, cmd: SkillsCommand) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    data.load_skills().await;
    finish(&mut data)?;
    match cmd {
        SkillsCommand::List => {}
        SkillsCommand::Set {
            name,
            enabled,
            always,
        } => {
            if enabled.is_none() && always.is_none() {
                bail!("nothing to change; pass --enabled or --always");
            }
            if !data.skills().iter().any(|skill| skill.name == name) {
                bail!("unknown skill {name}");
            }
            let settings = merge_skill(data.skill_settings().clone(), &name, enabled, always);
            data.save_skills(&settings).await;
            finish(&mut data)?;
        }
    }
    if data.skills().is_empty() {
        println!("No skills.");
    } else {
        println!("{}", render::skills_table(data.skills()));
    }
    Ok(())
}

pub async fn config(config: &ClientConfig, cmd: ConfigCommand) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    match cmd {
        ConfigCommand::Show => {
            data.load_config().await;
            finish(&mut data)?;
        }
        ConfigCommand::Set { json } => {
            let value: Value = serde_json::from_str(&json).context("config must be valid JSON")?;
            let Value::Object(document) = value else {
                bail!("config must be a JSON object");
            };
            data.save_config(document).await;
            finish(&mut data)?;
        }
    }
    println!("{}", serde_json::to_string_pretty(data.config())?);
    Ok(())
}

pub async fn status(config: &ClientConfig, data_dir: &Path) -> Result<()> {
    let mut data = ControlRoomData::new(config)?;
    println!();
    println!("  Control room v{}", crate::VERSION);
    println!("  Data dir: {}", data_dir.display());
    println!("  Server: {}", config.base_url);

    data.load_status().await;
    if let Some(notice) = data.take_notice() {
        println!("  Health: {}", style(format!("unreachable ({notice})")).red());
        println!();
        bail!("server is not reachable");
    }

    let status = data.status();
    println!("  Health: {}", style("OK").green());
    if let Some(port) = status.gateway_port {
        println!("  Gateway port: {port}");
    }
    if let Some(workspace) = &status.workspace {
        println!("  Workspace: {workspace}");
    }
    println!(
        "  Queues: {} (inbound {}, outbound {})",
        data.queue_depth(),
        status.queues.inbound,
        status.queues.outbound
    );
    println!("  Active runs: {}", data.active_runs());
    println!(
        "  Heartbeat: {} every {}s",
        if status.heartbeat.enabled { "enabled" } else { "disabled" },
        status.heartbeat.interval_seconds
    );
    println!();
    Ok(())
}
