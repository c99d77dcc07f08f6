mod app;
mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tlc_core::config::load_dotenv;
use tlc_core::{cancel_pair, Config};
use tracing::{info, warn};

use crate::app::App;
use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();
    if args.dry_run {
        info!("dry run: in-memory warehouse, coverage file is read-only");
    }

    // Ctrl-C stops new work at the next safe point.
    let (cancel_handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current step");
            cancel_handle.cancel();
        }
    });

    let app = App::new(config, args.dry_run, args.json)?;

    match args.command {
        Command::Probe { replace, grid } => commands::probe(&app, &grid, replace, &cancel).await?,
        Command::Coverage => commands::coverage(&app)?,
        Command::Load {
            service,
            year,
            month,
        } => {
            let records = commands::select_for_load(app.coverage()?, service, year, month);
            let pool = app.warehouse().await?;
            let summary = commands::load(&app, pool, &records, &cancel).await?;
            if summary.failed > 0 {
                anyhow::bail!("{} partition(s) failed to load", summary.failed);
            }
        }
        Command::Audit { grid, mode } => {
            let keys = app.grid(&grid);
            let pool = app.warehouse().await?;
            commands::audit(&app, pool, &keys, mode).await?;
        }
        Command::Run { grid } => commands::run(&app, &grid, &cancel).await?,
        Command::Zones => commands::zones(&app).await?,
        Command::Check => commands::check(&app).await?,
        Command::Migrate => commands::migrate(&app).await?,
    }

    Ok(())
}
