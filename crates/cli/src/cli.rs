use clap::{Args, Parser, Subcommand};
use tlc_core::config::AuditPublishMode;
use tlc_core::Service;

/// Trip-data partition coverage, idempotent load and audit.
///
/// Probes the remote host for monthly parquet files, keeps a coverage
/// ledger, loads available partitions into the warehouse and publishes a
/// per-partition audit snapshot.
#[derive(Parser, Debug)]
#[command(name = "tlc", version, about = "Trip-data coverage, load and audit")]
pub struct CliArgs {
    /// Use an in-memory warehouse and never write the coverage file
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration profile (PROFILE_KEY env vars override KEY)
    #[arg(long, global = true, env = "TLC_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the expected grid. Unset fields come from configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct GridArgs {
    /// Service to include; repeat for several
    #[arg(long = "service")]
    pub services: Vec<Service>,

    #[arg(long)]
    pub year_from: Option<i32>,

    #[arg(long)]
    pub year_to: Option<i32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the remote host and update the coverage ledger
    Probe {
        /// Rebuild the ledger from this probe instead of merging into it
        #[arg(long)]
        replace: bool,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Show the coverage ledger grouped by service
    Coverage,

    /// Load partitions the ledger marks available
    Load {
        #[arg(long)]
        service: Option<Service>,

        #[arg(long)]
        year: Option<i32>,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
    },

    /// Reconcile the grid against the warehouse and publish the audit table
    Audit {
        #[command(flatten)]
        grid: GridArgs,

        /// truncate | selective
        #[arg(long)]
        mode: Option<AuditPublishMode>,
    },

    /// Probe, merge, load available partitions, then audit
    Run {
        #[command(flatten)]
        grid: GridArgs,
    },

    /// Replace the taxi-zone lookup table
    Zones,

    /// Check the warehouse connection and print the session identity
    Check,

    /// Apply pending warehouse migrations
    Migrate,
}
