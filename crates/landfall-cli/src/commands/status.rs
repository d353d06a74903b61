use std::path::Path;
use std::process::ExitCode;

use landfall_core::LandfallConfig;
use landfall_state::StateStore;

use super::{base_dir, load_config, state_path};
use crate::commands::deploy::summary;

fn store_for(config_path: &Path, name: &str) -> anyhow::Result<(StateStore, String)> {
    let (config, base) = if config_path.exists() {
        load_config(config_path)?
    } else {
        (LandfallConfig::default(), base_dir(config_path))
    };
    let path = state_path(&config, &base, name);
    Ok((StateStore::open_file(&path), path.display().to_string()))
}

pub fn status(config_path: &Path, name: &str, json: bool) -> anyhow::Result<ExitCode> {
    let (store, location) = store_for(config_path, name)?;
    if !store.exists()? {
        eprintln!("no state recorded for {name} at {location}");
        return Ok(ExitCode::FAILURE);
    }
    let state = store.load()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", summary(&state));
        for (key, value) in state.entries() {
            println!("  {key:<28} {value}");
        }
    }
    Ok(if state.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn reset(config_path: &Path, name: &str) -> anyhow::Result<ExitCode> {
    let (store, location) = store_for(config_path, name)?;
    if store.discard()? {
        println!("✓ Discarded {location}");
    } else {
        println!("No state recorded for {name}");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reset_removes_the_record() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("landfall.toml");
        let (store, _) = store_for(&config_path, "demo").unwrap();
        store.initialize("demo", 6).unwrap();
        assert!(dir.path().join(".landfall/demo.state.json").exists());

        reset(&config_path, "demo").unwrap();
        assert!(!store.exists().unwrap());
    }

    #[test]
    fn status_reflects_completion() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("landfall.toml");
        assert_eq!(status(&config_path, "demo", false).unwrap(), ExitCode::FAILURE);

        let (store, _) = store_for(&config_path, "demo").unwrap();
        store.initialize("demo", 1).unwrap();
        store
            .update(|s| {
                s.tested_endpoint_count = 1;
                s.database_connected = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(status(&config_path, "demo", true).unwrap(), ExitCode::SUCCESS);
    }
}
