// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `strix scan`: scan lifecycle commands against the embedded node.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use strix_core::{Clock, JobStatus, ScanId, ScanOptions, ScanStatus, SystemClock};
use strix_engine::Config;
use strix_storage::{JobFilter, Page, ScanFilter};

use crate::output::OutputFormat;
use crate::session::Session;
use crate::table::{format_age, Table};

#[derive(Args)]
pub struct ScanArgs {
    #[command(subcommand)]
    pub command: ScanCommand,
}

#[derive(Subcommand)]
pub enum ScanCommand {
    /// Create a scan and seed its crawl phase
    Create(CreateArgs),
    /// List scans
    List(ListArgs),
    /// Show one scan with counters and stats
    Show {
        /// Scan id
        id: i64,
    },
    /// List a scan's jobs
    Jobs(JobsArgs),
    /// Pause a running scan (in-flight jobs finish)
    Pause {
        /// Scan id
        id: i64,
    },
    /// Resume a paused scan
    Resume {
        /// Scan id
        id: i64,
    },
    /// Cancel a scan
    Cancel {
        /// Scan id
        id: i64,
    },
    /// Delete a scan and its jobs
    Delete {
        /// Scan id
        id: i64,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// Start URLs (at least one)
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Scan title shown in listings
    #[arg(short, long, default_value = "ad-hoc scan")]
    pub title: String,

    /// Workspace the scan belongs to
    #[arg(long, default_value_t = 1)]
    pub workspace: i64,

    /// Skip the fingerprint phase
    #[arg(long)]
    pub no_fingerprint: bool,

    /// Skip the discovery phase
    #[arg(long)]
    pub no_discovery: bool,

    /// Skip the nuclei phase
    #[arg(long)]
    pub no_nuclei: bool,

    /// Skip the websocket phase
    #[arg(long)]
    pub no_websocket: bool,

    /// Run an embedded node until the scan reaches a terminal status
    #[arg(long)]
    pub follow: bool,

    /// Give up waiting after this many seconds (with --follow)
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by status
    #[arg(long, value_parser = parse_scan_status)]
    pub status: Option<ScanStatus>,

    /// Filter by workspace
    #[arg(long)]
    pub workspace: Option<i64>,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args)]
pub struct JobsArgs {
    /// Scan id
    pub id: i64,

    /// Filter by job status
    #[arg(long, value_parser = parse_job_status)]
    pub status: Option<JobStatus>,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

fn parse_scan_status(s: &str) -> Result<ScanStatus, String> {
    match s {
        "pending" => Ok(ScanStatus::Pending),
        "crawling" => Ok(ScanStatus::Crawling),
        "scanning" => Ok(ScanStatus::Scanning),
        "paused" => Ok(ScanStatus::Paused),
        "completed" => Ok(ScanStatus::Completed),
        "cancelled" => Ok(ScanStatus::Cancelled),
        "failed" => Ok(ScanStatus::Failed),
        other => Err(format!("unknown scan status: {other}")),
    }
}

fn parse_job_status(s: &str) -> Result<JobStatus, String> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "claimed" => Ok(JobStatus::Claimed),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        "skipped" => Ok(JobStatus::Skipped),
        other => Err(format!("unknown job status: {other}")),
    }
}

pub async fn run(
    args: ScanArgs,
    config: Config,
    output: OutputFormat,
    state: Option<PathBuf>,
) -> Result<()> {
    let session = Session::open(config, state)?;
    match args.command {
        ScanCommand::Create(args) => create(&session, args, output).await,
        ScanCommand::List(args) => list(&session, args, output).await,
        ScanCommand::Show { id } => show(&session, ScanId::new(id), output).await,
        ScanCommand::Jobs(args) => jobs(&session, args, output).await,
        ScanCommand::Pause { id } => {
            session.manager.pause_scan(ScanId::new(id)).await?;
            session.persist()?;
            println!("scan {id} paused");
            Ok(())
        }
        ScanCommand::Resume { id } => {
            let restored = session.manager.resume_scan(ScanId::new(id)).await?;
            session.persist()?;
            println!("scan {id} resumed ({restored})");
            Ok(())
        }
        ScanCommand::Cancel { id } => {
            session.manager.cancel_scan(ScanId::new(id)).await?;
            session.persist()?;
            println!("scan {id} cancelled");
            Ok(())
        }
        ScanCommand::Delete { id } => {
            let deleted = session.manager.delete_scan(ScanId::new(id)).await?;
            session.persist()?;
            if !deleted {
                bail!("scan {id} not found");
            }
            println!("scan {id} deleted");
            Ok(())
        }
    }
}

async fn create(session: &Session, args: CreateArgs, output: OutputFormat) -> Result<()> {
    let options = ScanOptions {
        start_urls: args.urls,
        fingerprint_enabled: !args.no_fingerprint,
        discovery_enabled: !args.no_discovery,
        nuclei_enabled: !args.no_nuclei,
        websocket_enabled: !args.no_websocket,
        ..ScanOptions::default()
    };

    if args.follow {
        session.manager.start().await?;
    }
    let scan = session
        .manager
        .create_scan(args.workspace, args.title, options)
        .await?;
    tracing::info!(scan_id = %scan.id, "scan created");

    if !args.follow {
        session.persist()?;
        println!("scan {} created ({})", scan.id, scan.status);
        return Ok(());
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(args.timeout);
    let terminal = loop {
        let current = session.manager.get_scan(scan.id).await?.0;
        if current.status.is_terminal() {
            break current;
        }
        if std::time::Instant::now() > deadline {
            session.manager.cancel_scan(scan.id).await?;
            session.manager.stop().await?;
            session.persist()?;
            bail!("scan did not finish within {}s", args.timeout);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    session.manager.stop().await?;
    session.persist()?;

    show(session, scan.id, output).await?;
    if terminal.status != ScanStatus::Completed {
        bail!("scan finished as {}", terminal.status);
    }
    Ok(())
}

async fn list(session: &Session, args: ListArgs, output: OutputFormat) -> Result<()> {
    let filter = ScanFilter {
        workspace_id: args.workspace,
        statuses: args.status.into_iter().collect(),
    };
    let scans = session
        .manager
        .list_scans(&filter, Page::new(0, args.limit))
        .await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scans)?),
        OutputFormat::Table => {
            let now_ms = SystemClock.epoch_ms();
            let mut table = Table::new(vec![
                "id", "title", "status", "phase", "jobs", "done", "failed", "age",
            ]);
            for scan in &scans {
                table.row(vec![
                    scan.id.to_string(),
                    scan.title.clone(),
                    scan.status.to_string(),
                    scan.phase.to_string(),
                    scan.counters.total.to_string(),
                    scan.counters.completed.to_string(),
                    scan.counters.failed.to_string(),
                    format_age(now_ms.saturating_sub(scan.created_at_ms)),
                ]);
            }
            print!("{}", table.render());
        }
    }
    Ok(())
}

async fn show(session: &Session, id: ScanId, output: OutputFormat) -> Result<()> {
    let (scan, stats) = session.manager.get_scan(id).await?;
    match output {
        OutputFormat::Json => {
            let doc = serde_json::json!({ "scan": &scan, "stats": &stats });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Table => {
            println!(
                "scan {}: {} ({}, phase {})",
                scan.id, scan.title, scan.status, scan.phase
            );
            println!(
                "jobs: {} total, {} pending, {} running, {} completed, {} failed, {} cancelled",
                scan.counters.total,
                scan.counters.pending,
                scan.counters.running,
                scan.counters.completed,
                scan.counters.failed,
                scan.counters.cancelled
            );
            println!("issues: {}", stats.total_issues);
            if !stats.jobs_by_type.is_empty() {
                let mut table = Table::new(vec!["type", "jobs"]);
                for (job_type, count) in &stats.jobs_by_type {
                    table.row(vec![job_type.clone(), count.to_string()]);
                }
                print!("{}", table.render());
            }
        }
    }
    Ok(())
}

async fn jobs(session: &Session, args: JobsArgs, output: OutputFormat) -> Result<()> {
    let filter = JobFilter {
        statuses: args.status.into_iter().collect(),
        job_types: Vec::new(),
    };
    let jobs = session
        .manager
        .list_scan_jobs(ScanId::new(args.id), &filter, Page::new(0, args.limit))
        .await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            let mut table = Table::new(vec!["id", "type", "status", "attempts", "issues", "age"]);
            for job in &jobs {
                let age_ms = job
                    .completed_at_ms
                    .unwrap_or(job.created_at_ms)
                    .saturating_sub(job.created_at_ms);
                table.row(vec![
                    job.id.to_string(),
                    job.job_type.clone(),
                    job.status.to_string(),
                    job.attempts.to_string(),
                    job.issues_found.to_string(),
                    format_age(age_ms),
                ]);
            }
            print!("{}", table.render());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;
