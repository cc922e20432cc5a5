use std::path::PathBuf;

use clap::Parser;
use snafu::{ResultExt, Whatever};

use crate::cmd::open_engine;

/// List a directory of the striped filesystem.
#[derive(Debug, Parser)]
pub struct LsArgs {
    #[arg(long, short, help = "Path to the YAML configuration")]
    pub config: PathBuf,

    #[arg(default_value = "/", help = "Directory to list")]
    pub path: String,
}

impl LsArgs {
    pub async fn run(self) -> Result<(), Whatever> {
        let engine = open_engine(&self.config).await?;
        let entries = engine
            .list_dir(&self.path)
            .with_whatever_context(|_| format!("listing {}", self.path))?;

        let base = self.path.trim_end_matches('/');
        for name in entries {
            let full = format!("{base}/{name}");
            if engine.is_dir(&full) {
                println!("{name}/");
            } else {
                let size = engine.get_size(&full).unwrap_or(0);
                println!("{name}\t{size}");
            }
        }
        engine.shutdown().await;
        Ok(())
    }
}
