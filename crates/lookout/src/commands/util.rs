//! Shared helpers for command handlers.

use chrono::{DateTime, Local, Utc};
use tokio::signal;

use lookout_core::Delivery;

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Local wall-clock rendering of an optional timestamp.
pub fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "-".into(),
        |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Human-readable delivery outcome of a device command.
pub fn delivery_message(delivery: Delivery, what: &str) -> String {
    match delivery {
        Delivery::Sent => format!("{what} sent"),
        Delivery::Dropped => format!("{what} dropped: broker is not connected"),
    }
}

/// Resolves when the user presses Ctrl-C. A failed handler install never resolves.
pub async fn interrupted() {
    if signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
