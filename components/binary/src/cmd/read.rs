use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use snafu::{ResultExt, Whatever};

use crate::cmd::open_engine;

/// Copy a file out of the striped filesystem.
#[derive(Debug, Parser)]
pub struct ReadArgs {
    #[arg(long, short, help = "Path to the YAML configuration")]
    pub config: PathBuf,

    #[arg(help = "Source path inside the filesystem")]
    pub source: String,

    #[arg(help = "Local destination file; stdout when omitted")]
    pub dest: Option<PathBuf>,
}

impl ReadArgs {
    pub async fn run(self) -> Result<(), Whatever> {
        let engine = open_engine(&self.config).await?;
        let size = engine
            .get_size(&self.source)
            .with_whatever_context(|_| format!("stat {}", self.source))?;
        let data = engine
            .read(&self.source, 0, size as usize)
            .await
            .with_whatever_context(|_| format!("reading {}", self.source))?;
        engine.shutdown().await;

        match self.dest {
            Some(dest) => tokio::fs::write(&dest, &data)
                .await
                .with_whatever_context(|_| format!("writing {}", dest.display()))?,
            None => std::io::stdout()
                .write_all(&data)
                .whatever_context("writing to stdout")?,
        }
        Ok(())
    }
}
