pub mod deploy;
pub mod init;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use landfall_core::LandfallConfig;

/// Load the config file. Relative paths inside it resolve against its
/// directory.
pub fn load_config(path: &Path) -> anyhow::Result<(LandfallConfig, PathBuf)> {
    if !path.exists() {
        anyhow::bail!("{} not found; run `landfall init` to create one", path.display());
    }
    let config = LandfallConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    Ok((config, base_dir(path)))
}

pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `<state_dir>/<name>.state.json`, relative to the config directory.
pub fn state_path(config: &LandfallConfig, base: &Path, name: &str) -> PathBuf {
    base.join(&config.deployment.state_dir).join(format!("{name}.state.json"))
}
