pub mod format;
pub mod ls;
pub mod read;
pub mod write;

use std::path::Path;
use std::sync::Arc;

use cloudraid_vfs::{CloudRaid, Config};
use snafu::{ResultExt, Whatever};

pub(crate) async fn open_engine(config_path: &Path) -> Result<Arc<CloudRaid>, Whatever> {
    let config = Config::from_yaml_file(config_path)
        .with_whatever_context(|_| format!("loading {}", config_path.display()))?;
    CloudRaid::open(&config)
        .await
        .whatever_context("building the engine")
}
