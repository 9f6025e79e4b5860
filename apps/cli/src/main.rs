//! kubepull CLI: pull an RKE2 node's admin kubeconfig into the local one.
//!
//! Fetches the credentials file over SSH, renames its entries and points it
//! at the node, then merges it into `~/.kube/config` with a backup.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
