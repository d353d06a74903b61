use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use landfall_core::LandfallConfig;

pub fn init(path: &Path, domain: Option<&str>, force: bool) -> anyhow::Result<ExitCode> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }
    let content = LandfallConfig::scaffold(domain).to_toml_string()?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    println!("  set cluster.role_arn and the workload manifests before deploying");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn scaffold_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("landfall.toml");
        init(&path, Some("demo.example.com"), false).unwrap();

        let config = LandfallConfig::from_file(&path).unwrap();
        assert_eq!(config.deployment.domain.as_deref(), Some("demo.example.com"));
        assert!(init(&path, None, false).is_err());
        assert!(init(&path, None, true).is_ok());
    }
}
