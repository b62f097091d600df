// SPDX-License-Identifier: PMPL-1.0-or-later
//! MailCore operator tool
//!
//! Inspects redo log segments and runs blob consistency checks.

mod commands;
mod config;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::config::MailcoreConfig;

#[derive(Parser, Debug)]
#[command(name = "mailcore", version, about = "MailCore redo log and blob store tool")]
struct Cli {
    /// JSON configuration file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "mailcore.json")]
    config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or create redo log segment headers.
    Header {
        #[command(subcommand)]
        action: HeaderAction,
    },

    /// List archived redo log segments.
    Segments {
        /// Archive directory. Defaults to the configured one.
        archive_dir: Option<PathBuf>,
    },

    /// Check blobs on the configured volumes against an item index.
    Check {
        /// Item index exported as a JSON array.
        #[arg(long)]
        items: PathBuf,

        /// Only check this mailbox.
        #[arg(long)]
        mailbox: Option<i64>,

        /// Also compare SHA-256 digests (reads every blob).
        #[arg(long)]
        digests: bool,

        /// Save the report here for a later `repair`.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Delete the unexpected blobs listed in a saved report.
    Repair {
        #[arg(long)]
        report: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum HeaderAction {
    /// Decode a segment header and print it as JSON.
    Show { file: PathBuf },

    /// Write a fresh header.
    Init {
        file: PathBuf,

        #[arg(long)]
        server_id: Option<String>,

        /// Overwrite the header of an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = MailcoreConfig::load(&cli.config)?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Header { action } => match action {
            HeaderAction::Show { file } => commands::header_show(&file, &mut out)?,
            HeaderAction::Init {
                file,
                server_id,
                force,
            } => commands::header_init(&file, server_id.as_deref(), force, &mut out)?,
        },
        Command::Segments { archive_dir } => {
            let dir = archive_dir.unwrap_or_else(|| config.redo.archive_dir.clone());
            commands::segments(&dir, &mut out)?;
        }
        Command::Check {
            items,
            mailbox,
            digests,
            report,
        } => {
            let report =
                commands::check(&config, &items, mailbox, digests, report.as_deref(), &mut out)?;
            if !report.is_clean() {
                return Ok(ExitCode::from(1));
            }
        }
        Command::Repair { report } => {
            commands::repair(&config, &report, &mut out)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "mailcore failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
