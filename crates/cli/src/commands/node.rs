// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `strix node`: run a worker node until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use strix_engine::Config;

use crate::session::Session;

#[derive(Args)]
pub struct NodeArgs {
    /// Override the configured worker count
    #[arg(short, long)]
    pub workers: Option<u32>,
}

pub async fn run(args: NodeArgs, mut config: Config, state: Option<PathBuf>) -> Result<()> {
    if let Some(workers) = args.workers {
        config.workers.count_per_node = workers;
    }

    let session = Session::open(config, state)?;
    session.manager.start().await?;
    println!("node {} running; ctrl-c to stop", session.manager.node_id());

    tokio::signal::ctrl_c().await?;
    println!("stopping...");
    session.manager.stop().await?;
    session.persist()?;
    Ok(())
}
