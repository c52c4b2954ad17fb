//! # Configuration
//!
//! Configuration of the pin store, read from YAML.

use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_bpffs() -> PathBuf {
    PathBuf::from("/sys/fs/bpf")
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PinStoreConfig {
    /// Directory pins are created in. Must be on a bpffs mount.
    #[serde(default = "default_bpffs")]
    pub bpffs: PathBuf,
}

impl Default for PinStoreConfig {
    fn default() -> Self {
        PinStoreConfig {
            bpffs: default_bpffs(),
        }
    }
}

impl PinStoreConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document is an empty configuration.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(
            PinStoreConfig::default().bpffs,
            PathBuf::from("/sys/fs/bpf")
        );
        assert_eq!(
            PinStoreConfig::from_yaml("").unwrap(),
            PinStoreConfig::default()
        );
        assert_eq!(
            PinStoreConfig::from_yaml("{}").unwrap(),
            PinStoreConfig::default()
        );
    }

    #[test]
    fn parse() {
        let config = PinStoreConfig::from_yaml("bpffs: /sys/fs/bpf/retis\n").unwrap();
        assert_eq!(config.bpffs, PathBuf::from("/sys/fs/bpf/retis"));

        assert!(PinStoreConfig::from_yaml("bpfs: /sys/fs/bpf").is_err());
        assert!(PinStoreConfig::from_yaml("bpffs: [1, 2]").is_err());
    }

    #[test]
    fn file() {
        let path = std::env::temp_dir().join("retis_link_config.yaml");
        fs::write(&path, "bpffs: /run/bpf\n").unwrap();
        assert_eq!(
            PinStoreConfig::from_file(&path).unwrap().bpffs,
            PathBuf::from("/run/bpf")
        );
        fs::remove_file(&path).unwrap();

        assert!(PinStoreConfig::from_file(&path).is_err());
    }
}
