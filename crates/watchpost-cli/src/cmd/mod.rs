pub mod config;
pub mod init;
pub mod ledger;
pub mod run;
pub mod snapshot;

use anyhow::Context;
use std::path::Path;
use watchpost_core::config::Config;
use watchpost_core::Store;

/// Load config and open the store it points at.
pub(crate) fn open(root: &Path) -> anyhow::Result<(Config, Store)> {
    let config = Config::load(root).context("failed to load config")?;
    let path = config.store_path(root);
    let store =
        Store::open(&path).with_context(|| format!("failed to open store {}", path.display()))?;
    Ok((config, store))
}
