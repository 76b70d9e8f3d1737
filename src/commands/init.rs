//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use std::path::PathBuf;
use tracing::info;

/// Write a default config and create the database under `base_dir`
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;
    std::fs::create_dir_all(&config.paths.repos_dir)?;
    MetaDb::connect(&config).await?;

    info!(base_dir = %config.paths.base_dir.display(), "Initialized repointel");
    Ok(config)
}
