//! Line commands read from stdin by the daemon.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Weekday;

use crate::alarm::parse_display_time;
use crate::engine::AlarmEngine;
use crate::models::{Alarm, AlarmId};

pub const HELP: &str = "\
commands:
  list
  add <time> [days=mon,wed,...] [label]
  timer <seconds> [label]
  enable <id> | disable <id> | remove <id>
  start <id> | pause <id> | resume <id>
  dismiss | snooze
  help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Add {
        display_time: String,
        weekdays: Vec<Weekday>,
        label: String,
    },
    Timer {
        seconds: u64,
        label: String,
    },
    Enable(String),
    Disable(String),
    Remove(String),
    StartCountdown(String),
    PauseCountdown(String),
    ResumeCountdown(String),
    Dismiss,
    Snooze,
    Help,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let rest: Vec<&str> = words.collect();

        let id_arg = |name: &str| -> Result<String> {
            match rest.as_slice() {
                [id] => Ok(id.to_string()),
                _ => bail!("usage: {name} <id>"),
            }
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" => Command::List,
            "add" => parse_add(&rest)?,
            "timer" => {
                let (seconds, label) = rest
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: timer <seconds> [label]"))?;
                let seconds: u64 = seconds
                    .parse()
                    .with_context(|| format!("invalid seconds '{seconds}'"))?;
                if seconds == 0 {
                    bail!("timer needs at least one second");
                }
                Command::Timer {
                    seconds,
                    label: label_or(label, "Timer"),
                }
            }
            "enable" => Command::Enable(id_arg("enable")?),
            "disable" => Command::Disable(id_arg("disable")?),
            "remove" | "rm" => Command::Remove(id_arg("remove")?),
            "start" => Command::StartCountdown(id_arg("start")?),
            "pause" => Command::PauseCountdown(id_arg("pause")?),
            "resume" => Command::ResumeCountdown(id_arg("resume")?),
            "dismiss" | "stop" => Command::Dismiss,
            "snooze" => Command::Snooze,
            "help" | "?" => Command::Help,
            other => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

fn parse_add(rest: &[&str]) -> Result<Command> {
    let (first, mut tail) = rest
        .split_first()
        .ok_or_else(|| anyhow!("usage: add <time> [days=mon,wed] [label]"))?;

    // "7:30 AM" arrives as two words.
    let mut display_time = first.to_string();
    if let Some((meridiem, after)) = tail.split_first() {
        if meridiem.eq_ignore_ascii_case("am") || meridiem.eq_ignore_ascii_case("pm") {
            display_time = format!("{display_time} {}", meridiem.to_ascii_uppercase());
            tail = after;
        }
    }
    parse_display_time(&display_time)?;

    let mut weekdays = Vec::new();
    if let Some((days, after)) = tail.split_first() {
        if let Some(list) = days.strip_prefix("days=") {
            for day in list.split(',').filter(|d| !d.is_empty()) {
                let weekday: Weekday = day
                    .parse()
                    .map_err(|_| anyhow!("invalid weekday '{day}'"))?;
                if !weekdays.contains(&weekday) {
                    weekdays.push(weekday);
                }
            }
            tail = after;
        }
    }

    Ok(Command::Add {
        display_time,
        weekdays,
        label: label_or(tail, "Alarm"),
    })
}

fn label_or(words: &[&str], fallback: &str) -> String {
    if words.is_empty() {
        fallback.to_string()
    } else {
        words.join(" ")
    }
}

/// Resolves a full id or a unique prefix of one.
fn resolve(engine: &AlarmEngine, raw: &str) -> Result<AlarmId> {
    if let Ok(id) = raw.parse::<AlarmId>() {
        return Ok(id);
    }
    let matches: Vec<AlarmId> = engine
        .alarms()
        .into_iter()
        .map(|alarm| alarm.id)
        .filter(|id| id.to_string().starts_with(raw))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no alarm matches '{raw}'"),
        _ => bail!("'{raw}' matches {} alarms", matches.len()),
    }
}

fn describe(alarm: &Alarm) -> String {
    let id = alarm.id.to_string();
    let short = id.get(..8).unwrap_or(&id);
    let when = if alarm.display_time.is_empty() {
        "timer".to_string()
    } else {
        alarm.display_time.clone()
    };
    let state = if alarm.enabled { "on" } else { "off" };
    format!("{short}  {when:<8}  {state:<3}  {}", alarm.label)
}

/// Runs one command and returns the text to show the user.
pub async fn execute(engine: &AlarmEngine, command: Command) -> Result<String> {
    let reply = match command {
        Command::List => {
            let alarms = engine.alarms();
            if alarms.is_empty() {
                "no alarms".to_string()
            } else {
                alarms.iter().map(describe).collect::<Vec<_>>().join("\n")
            }
        }
        Command::Add {
            display_time,
            weekdays,
            label,
        } => {
            let (hour, minute) = parse_display_time(&display_time)?;
            let mut alarm = Alarm::weekly(label, hour, minute, weekdays);
            alarm.display_time = display_time;
            let alarm = engine.add_alarm(alarm).await?;
            format!("added {}", describe(&alarm))
        }
        Command::Timer { seconds, label } => {
            let alarm = engine.add_alarm(Alarm::timer(label, seconds)).await?;
            engine.start_countdown(alarm.id).await?;
            format!("started {}", describe(&alarm))
        }
        Command::Enable(raw) => {
            let id = resolve(engine, &raw)?;
            engine.set_enabled(id, true).await?;
            format!("enabled {id}")
        }
        Command::Disable(raw) => {
            let id = resolve(engine, &raw)?;
            engine.set_enabled(id, false).await?;
            format!("disabled {id}")
        }
        Command::Remove(raw) => {
            let id = resolve(engine, &raw)?;
            match engine.remove_alarm(id).await? {
                Some(alarm) => format!("removed {}", alarm.label),
                None => format!("no alarm {id}"),
            }
        }
        Command::StartCountdown(raw) => {
            let id = resolve(engine, &raw)?;
            engine.start_countdown(id).await?;
            format!("countdown started for {id}")
        }
        Command::PauseCountdown(raw) => {
            let id = resolve(engine, &raw)?;
            engine.pause_countdown(id).await?;
            format!("countdown paused for {id}")
        }
        Command::ResumeCountdown(raw) => {
            let id = resolve(engine, &raw)?;
            engine.resume_countdown(id).await?;
            format!("countdown resumed for {id}")
        }
        Command::Dismiss => match engine.dismiss().await? {
            Some(session) => format!("dismissed {}", session.alarm.label),
            None => "nothing is ringing".to_string(),
        },
        Command::Snooze => match engine.snooze().await? {
            Some(snooze) => format!("snoozed until {}", snooze.due.to_rfc3339()),
            None => "nothing is ringing".to_string(),
        },
        Command::Help => HELP.to_string(),
    };
    Ok(reply)
}
