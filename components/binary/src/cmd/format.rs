use std::path::PathBuf;

use clap::Parser;
use snafu::{ResultExt, Whatever};
use tracing::info;

use crate::cmd::open_engine;

/// Validate the configuration, connect every backend and write an empty
/// metadata chain.
#[derive(Debug, Parser)]
pub struct FormatArgs {
    #[arg(long, short, help = "Path to the YAML configuration")]
    pub config: PathBuf,
}

impl FormatArgs {
    pub async fn run(self) -> Result<(), Whatever> {
        let engine = open_engine(&self.config).await?;
        engine.flush().await.whatever_context("persisting metadata")?;
        engine.shutdown().await;
        info!("store formatted");
        Ok(())
    }
}
