//! Command dispatch: bridges CLI args -> core services -> output formatting.

pub mod account;
pub mod config_cmd;
pub mod devices;
pub mod families;
pub mod logs;
pub mod util;

use lookout_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a session-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(session, args, global).await,
        Command::Families(args) => families::handle(session, args, global).await,
        Command::Logs(args) => logs::handle(session, args, global).await,
        Command::Account(args) => account::handle(session, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not need a session".into(),
        )),
    }
}
