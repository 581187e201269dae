//! CLI definitions for the cronpulse daemon.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cronpulse-daemon")]
#[command(about = "Cron-driven HTTP job scheduler")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (overrides CRONPULSE_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Run the scheduler in the foreground (default)
    Run,

    /// Run one job immediately as a manual trigger
    ///
    /// The command exits once the execution is recorded. Retries and alerts
    /// scheduled by a failed run are not waited for and are dropped when the
    /// command exits; a scheduler started with `run` carries them out.
    Trigger {
        /// Job ID
        job_id: String,
    },

    /// Print upcoming fire times for a cron expression
    Next {
        /// 5-field (minute) or 6-field (second) cron expression
        expr: String,

        /// How many fire times to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Time zone to evaluate in (defaults to scheduler.timezone)
        #[arg(long)]
        tz: Option<String>,
    },
}
