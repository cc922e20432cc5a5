use std::path::PathBuf;

use clap::Parser;
use snafu::{ResultExt, Whatever};
use tracing::info;

use crate::cmd::open_engine;

/// Copy a local file into the striped filesystem.
#[derive(Debug, Parser)]
pub struct WriteArgs {
    #[arg(long, short, help = "Path to the YAML configuration")]
    pub config: PathBuf,

    #[arg(help = "Local source file")]
    pub source: PathBuf,

    #[arg(help = "Destination path inside the filesystem, e.g. /backup/a")]
    pub dest: String,
}

impl WriteArgs {
    pub async fn run(self) -> Result<(), Whatever> {
        let data = tokio::fs::read(&self.source)
            .await
            .with_whatever_context(|_| format!("reading {}", self.source.display()))?;

        let engine = open_engine(&self.config).await?;
        engine
            .create_file(&self.dest)
            .with_whatever_context(|_| format!("creating {}", self.dest))?;
        engine
            .write(&self.dest, 0, &data)
            .await
            .with_whatever_context(|_| format!("writing {}", self.dest))?;
        engine.flush().await.whatever_context("flushing")?;
        engine.shutdown().await;
        info!(bytes = data.len(), dest = %self.dest, "written");
        Ok(())
    }
}
