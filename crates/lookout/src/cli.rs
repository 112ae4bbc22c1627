//! Clap derive structures for the `lookout` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// lookout -- manage LookOut doorbells, families and event logs
#[derive(Debug, Parser)]
#[command(
    name = "lookout",
    version,
    about = "Manage LookOut doorbells, families and event logs from the command line",
    long_about = "A command-line client for the LookOut home-security cloud.\n\n\
        Lists and claims devices, shares them with your family, enrolls\n\
        fingerprints, and browses the doorbell event log.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "LOOKOUT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Firestore API root (overrides profile), e.g. an emulator URL
    #[arg(long, env = "LOOKOUT_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Act as this user ID (overrides profile)
    #[arg(long, short = 'u', env = "LOOKOUT_USER", global = true, hide_env = true)]
    pub user: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "LOOKOUT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "LOOKOUT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List, claim and control doorbells
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Manage families, members and shared devices
    #[command(alias = "fam", alias = "f")]
    Families(FamiliesArgs),

    /// Browse and prune the event log
    #[command(alias = "l")]
    Logs(LogsArgs),

    /// Account profile and sign-in helpers
    Account(AccountArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices you own or that are shared with you
    #[command(alias = "ls")]
    List,

    /// Show one device
    Get {
        /// Device ID
        device: String,
    },

    /// Show health readings (uptime, latency, signal)
    Health {
        /// Device ID
        device: String,
    },

    /// Rename a device
    Rename {
        /// Device ID
        device: String,
        /// New display name
        name: String,
    },

    /// Delete a device record
    #[command(alias = "rm")]
    Delete {
        /// Device ID
        device: String,
    },

    /// Claim a device by the code printed on it
    Claim {
        /// Device code (from the QR label)
        code: String,
    },

    /// Release a device you own so it can be claimed again
    Release {
        /// Device ID
        device: String,
    },

    /// Ask the device to take a snapshot
    Photo {
        /// Device ID
        device: String,
    },

    /// Enroll your fingerprint on a device
    Enroll {
        /// Device ID
        device: String,

        /// Replace an existing enrollment instead of adding a new one
        #[arg(long)]
        replace: bool,
    },

    /// Print the device list every time it changes
    Watch,
}

// ── Families ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FamiliesArgs {
    #[command(subcommand)]
    pub command: FamiliesCommand,
}

#[derive(Debug, Subcommand)]
pub enum FamiliesCommand {
    /// List families you belong to
    #[command(alias = "ls")]
    List,

    /// Show a family and its members
    Get {
        /// Family ID
        family: String,
    },

    /// Create a family you own
    Create {
        /// Family name
        name: String,

        /// Optional description
        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// Delete a family (owner only)
    #[command(alias = "rm")]
    Delete {
        /// Family ID
        family: String,
    },

    /// Issue a single-use guest invite code
    Invite {
        /// Family ID
        family: String,
    },

    /// Join a family with an invite code
    Join {
        /// Invite code
        code: String,
    },

    /// Leave a family (an owner leaving deletes it)
    Leave {
        /// Family ID
        family: String,
    },

    /// Change a member's role
    Role {
        /// Family ID
        family: String,
        /// Member user ID
        user: String,
        /// New role
        role: RoleArg,
    },

    /// Remove a member
    Kick {
        /// Family ID
        family: String,
        /// Member user ID
        user: String,
    },

    /// Hand ownership to another member
    Transfer {
        /// Family ID
        family: String,
        /// New owner's user ID
        user: String,
    },

    /// Share one of your devices with the family
    Share {
        /// Family ID
        family: String,
        /// Device ID
        device: String,
    },

    /// Stop sharing a device with the family
    Unshare {
        /// Family ID
        family: String,
        /// Device ID
        device: String,
    },

    /// List devices shared with the family
    Devices {
        /// Family ID
        family: String,
    },
}

/// Roles that can be assigned directly.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Guest,
    Member,
}

// ── Logs ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LogsArgs {
    #[command(subcommand)]
    pub command: LogsCommand,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List events from your devices
    #[command(alias = "ls")]
    List(LogRangeArgs),

    /// Keep printing events as they arrive
    Watch(LogRangeArgs),

    /// Delete events (best effort; failures are reported, not rolled back)
    #[command(alias = "rm")]
    Delete {
        /// Log IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct LogRangeArgs {
    /// Date range to show
    #[arg(long, short = 'r', default_value = "today")]
    pub range: RangeArg,

    /// First day of a custom range (YYYY-MM-DD)
    #[arg(long, required_if_eq("range", "custom"))]
    pub from: Option<NaiveDate>,

    /// Last day of a custom range (YYYY-MM-DD)
    #[arg(long, required_if_eq("range", "custom"))]
    pub to: Option<NaiveDate>,

    /// Only this device
    #[arg(long, short = 'd')]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RangeArg {
    /// Midnight to midnight, local time
    Today,
    /// The last seven days including today
    Week,
    /// --from through --to
    Custom,
}

// ── Account ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub command: AccountCommand,
}

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Show your public profile
    Show,

    /// Create or overwrite your public profile
    Register {
        /// Username others can sign in with
        #[arg(long)]
        username: String,
        /// Account email
        #[arg(long)]
        email: String,
    },

    /// Print the email to sign in with for an email or username
    LoginEmail {
        /// Email or username
        identifier: String,
    },

    /// Sign in and keep the sign-in in the system keyring
    Login {
        /// Email or username
        identifier: String,
    },

    /// Create an account; a verification link is mailed to it
    Signup {
        /// Account email
        email: String,
    },

    /// Finish sign-up once the emailed link has been followed
    Verify {
        /// Username others can sign in with
        #[arg(long, required_unless_present = "resend")]
        username: Option<String>,
        /// Mail the verification link again instead
        #[arg(long)]
        resend: bool,
    },

    /// Forget the stored sign-in for this profile
    Logout,
}

impl AccountCommand {
    /// Commands that run before there is a signed-in session.
    pub fn is_sign_in(&self) -> bool {
        matches!(
            self,
            Self::Login { .. } | Self::Signup { .. } | Self::Verify { .. } | Self::Logout
        )
    }
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration (secrets masked)
    Show,

    /// Set a profile value
    Set {
        /// Key, e.g. "user_id", "broker_url", "registration_timeout"
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a secret in the system keyring
    SetSecret {
        /// Which secret to store
        kind: SecretArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SecretArg {
    /// Firebase ID token
    IdToken,
    /// Refresh token of a stored sign-in
    RefreshToken,
    /// Message broker password
    BrokerPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
