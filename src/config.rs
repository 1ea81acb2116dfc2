//! Loading the desired-state document from disk

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::SachetConfig;

/// Used when neither `-c` nor `SACHET_CONVERGE_CONFIG` is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sachet-converge/config.toml";

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Format from the file extension; anything unrecognized is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Toml,
        }
    }

    pub fn parse(self, content: &str) -> Result<SachetConfig> {
        Ok(match self {
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
            Self::Yaml => serde_yaml::from_str(content)?,
        })
    }
}

/// The config path: the `-c`/`SACHET_CONVERGE_CONFIG` value, else the default.
/// `~` and `$VAR` are expanded.
pub fn resolve_path(arg: Option<&str>) -> Result<PathBuf> {
    let raw = arg.unwrap_or(DEFAULT_CONFIG_PATH);
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Failed to expand config path '{raw}'"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Read, parse and validate a config file
pub fn load(path: &Path) -> Result<SachetConfig> {
    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    let config = ConfigFormat::from_path(path)
        .parse(&content)
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    log::debug!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::InstallMethod;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Toml);
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path(None).unwrap(),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(
            resolve_path(Some("/tmp/x.toml")).unwrap(),
            PathBuf::from("/tmp/x.toml")
        );
        assert!(resolve_path(Some("$SACHET_CONVERGE_SURELY_UNSET_VAR/x")).is_err());
    }

    #[test]
    fn test_load_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("c.toml");
        fs::write(&toml_path, "version = \"1.2.3\"\ninstall_method = \"package\"\n").unwrap();
        let config = load(&toml_path).unwrap();
        assert_eq!(config.version, "1.2.3");
        assert_eq!(config.install_method, InstallMethod::Package);

        let json_path = dir.path().join("c.json");
        fs::write(&json_path, r#"{"listen_port": 9999}"#).unwrap();
        assert_eq!(load(&json_path).unwrap().listen_port, 9999);

        let yaml_path = dir.path().join("c.yaml");
        fs::write(
            &yaml_path,
            "providers:\n  telegram:\n    token: abc\nreceivers:\n  - name: ops\n",
        )
        .unwrap();
        let config = load(&yaml_path).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.receivers.len(), 1);
    }

    #[test]
    fn test_load_rejects_bad_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");

        fs::write(&path, "no_such_key = 1\n").unwrap();
        assert!(load(&path).is_err());

        fs::write(&path, "install_method = \"docker\"\n").unwrap();
        assert!(load(&path).is_err());

        fs::write(&path, "config_mode = \"999\"\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("mode"));

        assert!(load(&dir.path().join("missing.toml")).is_err());
    }
}
