//! Event log command handlers.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Local;
use tabled::Tabled;

use lookout_core::{RangeMode, ResolvedLog, Session};

use crate::cli::{GlobalOpts, LogRangeArgs, LogsArgs, LogsCommand, OutputFormat, RangeArg};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Photo")]
    photo: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn log_row(log: &ResolvedLog) -> LogRow {
    LogRow {
        time: util::fmt_time(Some(log.created_at)),
        device: log.device_name.clone(),
        event: log.label.into(),
        photo: if log.photo_url.is_some() { "yes" } else { "" }.into(),
        id: log.id.clone(),
    }
}

fn range_mode(args: &LogRangeArgs) -> Result<RangeMode, CliError> {
    match args.range {
        RangeArg::Today => Ok(RangeMode::Today),
        RangeArg::Week => Ok(RangeMode::Last7Days),
        RangeArg::Custom => match (args.from, args.to) {
            (Some(start), Some(end)) => Ok(RangeMode::Custom { start, end }),
            _ => Err(CliError::Validation {
                field: "range".into(),
                reason: "a custom range needs --from and --to".into(),
            }),
        },
    }
}

fn filtered(logs: &[ResolvedLog], device: Option<&str>) -> Vec<ResolvedLog> {
    logs.iter()
        .filter(|log| device.is_none_or(|id| log.device_id == id))
        .cloned()
        .collect()
}

async fn list(session: &Session, args: &LogRangeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let view = session.logs_view(range_mode(args)?).await?;
    let snapshot = view
        .current()
        .await
        .ok_or_else(|| CliError::Internal("log view closed before its first snapshot".into()))?;

    let logs = filtered(&snapshot.logs, args.device.as_deref());
    let out = output::render_list(&global.output, &logs, log_row, |l| l.id.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Stream new entries as single lines. Today's window rolls over at local
/// midnight.
async fn watch(session: &Session, args: &LogRangeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mode = range_mode(args)?;
    let mut view = session.logs_view(mode).await?;
    let mut snapshots = view.snapshots();
    let mut seen: HashSet<String> = HashSet::new();
    let mut day = Local::now().date_naive();
    let mut tick = tokio::time::interval(Duration::from_secs(60));

    let mut emit = |logs: &[ResolvedLog]| -> Result<(), CliError> {
        // Oldest first so the terminal reads top-down.
        for log in filtered(logs, args.device.as_deref()).into_iter().rev() {
            if !seen.insert(log.id.clone()) {
                continue;
            }
            let line = match global.output {
                OutputFormat::Table | OutputFormat::Plain => format!(
                    "{}  {:<24} {}",
                    util::fmt_time(Some(log.created_at)),
                    log.device_name,
                    log.label
                ),
                _ => output::render_single(
                    &OutputFormat::JsonCompact,
                    &log,
                    |_| String::new(),
                    |_| String::new(),
                )?,
            };
            output::print_output(&line, global.quiet);
        }
        Ok(())
    };

    emit(&snapshots.latest().logs)?;
    loop {
        tokio::select! {
            () = util::interrupted() => return Ok(()),
            _ = tick.tick() => {
                let today = Local::now().date_naive();
                if mode == RangeMode::Today && today != day {
                    day = today;
                    let key = view.refresh()?;
                    tracing::debug!(%key, "log window rolled over");
                }
            }
            next = snapshots.changed() => {
                let Some(next) = next else { return Ok(()) };
                if next.key == view.key() {
                    emit(&next.logs)?;
                }
            }
        }
    }
}

pub async fn handle(session: &Session, args: LogsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        LogsCommand::List(range) => list(session, &range, global).await,

        LogsCommand::Watch(range) => watch(session, &range, global).await,

        LogsCommand::Delete { ids } => {
            if !util::confirm(&format!("Delete {} log entries?", ids.len()), global.yes)? {
                return Ok(());
            }
            let report = session.logs().delete_logs(&ids).await;
            for (id, err) in &report.failed {
                tracing::warn!(log_id = %id, error = %err, "log delete failed");
            }
            output::notice(
                &format!("Deleted {} of {} entries", report.deleted.len(), ids.len()),
                global.quiet,
            );
            if report.is_complete() {
                Ok(())
            } else {
                Err(CliError::PartialFailure {
                    failed: report.failed.len(),
                    total: ids.len(),
                })
            }
        }
    }
}
