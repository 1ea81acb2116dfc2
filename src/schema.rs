//! Desired-state document for the Sachet deployment
//!
//! Every field has a default, so an empty document describes a stock
//! install: release archive from GitHub, `sachet` user and group, config
//! under `/etc/sachet`, service running and enabled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::platform;

// ============================================================================
// Main Config Schema
// ============================================================================

/// The full desired state for one Sachet instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SachetConfig {
    // ---- install ----
    /// Package (and binary) name
    pub package_name: String,
    /// Release version to install
    pub version: String,
    /// How the binary gets onto the host
    pub install_method: InstallMethod,
    /// Release OS name; host OS when unset
    pub os: Option<String>,
    /// Release arch name; host arch when unset
    pub arch: Option<String>,
    /// Base of the release download URL
    pub download_url_base: String,
    /// Archive format of the release
    pub download_extension: ArchiveFormat,
    /// Explicit download URL, overriding the composed one
    pub download_url: Option<String>,
    /// `present`, `latest`, or a version (package installs only)
    pub package_ensure: String,
    /// Where release archives are extracted
    pub install_root: PathBuf,
    /// Where the binary symlink lives
    pub bin_dir: PathBuf,

    // ---- accounts ----
    pub user: String,
    pub group: String,
    pub manage_user: bool,
    pub manage_group: bool,
    /// Supplementary groups for the daemon user
    pub extra_groups: Vec<String>,

    // ---- service ----
    pub service_name: String,
    pub service_ensure: ServiceEnsure,
    pub service_enable: bool,
    pub manage_service: bool,
    /// Init system to write a unit for; detected when unset
    pub init_style: Option<InitStyle>,
    /// Restart the service when config, templates, binary or unit change
    pub restart_on_change: bool,

    // ---- configuration ----
    /// Remove files under `config_dir` that this document does not produce
    pub purge_config_dir: bool,
    pub config_dir: PathBuf,
    /// Defaults to `<config_dir>/sachet.yaml`
    pub config_file: Option<PathBuf>,
    /// Octal mode of the config file, e.g. "0640"; templates are always 0640
    pub config_mode: String,
    /// Owner of the config directory and files; the group is `group`
    pub config_owner: String,
    pub listen_port: u16,
    /// Extra command-line flags placed before the managed ones
    pub extra_options: String,
    /// Receiver definitions, passed through verbatim
    pub receivers: Vec<Value>,
    /// Provider definitions keyed by provider name, passed through verbatim
    pub providers: BTreeMap<String, Value>,
    pub templates: Vec<TemplateDef>,

    // ---- init system paths ----
    pub unit_dir: PathBuf,
    pub initd_dir: PathBuf,
}

impl Default for SachetConfig {
    fn default() -> Self {
        Self {
            package_name: "sachet".to_string(),
            version: "0.3.1".to_string(),
            install_method: InstallMethod::Url,
            os: None,
            arch: None,
            download_url_base: "https://github.com/messagebird/sachet/releases".to_string(),
            download_extension: ArchiveFormat::TarGz,
            download_url: None,
            package_ensure: "latest".to_string(),
            install_root: PathBuf::from("/opt"),
            bin_dir: PathBuf::from("/usr/local/bin"),
            user: "sachet".to_string(),
            group: "sachet".to_string(),
            manage_user: true,
            manage_group: true,
            extra_groups: Vec::new(),
            service_name: "sachet".to_string(),
            service_ensure: ServiceEnsure::Running,
            service_enable: true,
            manage_service: true,
            init_style: None,
            restart_on_change: true,
            purge_config_dir: true,
            config_dir: PathBuf::from("/etc/sachet"),
            config_file: None,
            config_mode: "0640".to_string(),
            config_owner: "root".to_string(),
            listen_port: 9876,
            extra_options: String::new(),
            receivers: Vec::new(),
            providers: BTreeMap::new(),
            templates: Vec::new(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            initd_dir: PathBuf::from("/etc/init.d"),
        }
    }
}

/// A named notification template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDef {
    /// File stem; the file is written as `<name>.tmpl`
    pub name: String,
    /// Template body, written verbatim
    pub content: String,
}

impl TemplateDef {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.tmpl", self.name)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// Download and extract the release archive
    #[default]
    Url,
    /// Install through the host package manager
    Package,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnsure {
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStyle {
    Systemd,
    Sysv,
    /// Write no init unit; the service is controlled through systemctl
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[default]
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMethod::Url => write!(f, "url"),
            InstallMethod::Package => write!(f, "package"),
        }
    }
}

impl fmt::Display for ServiceEnsure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEnsure::Running => write!(f, "running"),
            ServiceEnsure::Stopped => write!(f, "stopped"),
        }
    }
}

impl fmt::Display for InitStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStyle::Systemd => write!(f, "systemd"),
            InitStyle::Sysv => write!(f, "sysv"),
            InitStyle::None => write!(f, "none"),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration rejected before any resource is touched
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid mode '{0}': expected an octal mode such as 0640")]
    InvalidMode(String),

    #[error("{field} must be an absolute path, got '{}'", path.display())]
    RelativePath { field: &'static str, path: PathBuf },

    #[error("invalid {field} '{value}'")]
    InvalidName { field: &'static str, value: String },

    #[error("template '{0}' is defined more than once")]
    DuplicateTemplate(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("listen_port must be non-zero")]
    ZeroPort,

    #[error("config_file '{}' must not be inside the templates directory", .0.display())]
    ConfigInTemplates(PathBuf),
}

static ACCOUNT_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z_][a-z0-9_-]*$").expect("valid regex"));

static UNIT_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.@+-]*$").expect("valid regex"));

static TEMPLATE_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"));

static VERSION: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("valid regex"));

/// Parse an octal mode string ("0640", "640", "0o640")
pub fn parse_mode(mode: &str) -> Result<u32, ConfigError> {
    let digits = mode.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(m) if !digits.is_empty() && m <= 0o7777 => Ok(m),
        _ => Err(ConfigError::InvalidMode(mode.to_string())),
    }
}

fn check_absolute(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ConfigError::RelativePath {
            field,
            path: path.to_path_buf(),
        })
    }
}

fn check_name(field: &'static str, value: &str, pattern: &regex::Regex) -> Result<(), ConfigError> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

impl SachetConfig {
    /// Reject configurations that cannot be converged
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_mode(&self.config_mode)?;

        check_absolute("config_dir", &self.config_dir)?;
        check_absolute("config_file", &self.config_file())?;
        check_absolute("install_root", &self.install_root)?;
        check_absolute("bin_dir", &self.bin_dir)?;
        check_absolute("unit_dir", &self.unit_dir)?;
        check_absolute("initd_dir", &self.initd_dir)?;

        check_name("user", &self.user, &ACCOUNT_NAME)?;
        check_name("group", &self.group, &ACCOUNT_NAME)?;
        check_name("config_owner", &self.config_owner, &ACCOUNT_NAME)?;
        for group in &self.extra_groups {
            check_name("extra group", group, &ACCOUNT_NAME)?;
        }
        check_name("service_name", &self.service_name, &UNIT_NAME)?;
        check_name("package_name", &self.package_name, &UNIT_NAME)?;

        if self.version.trim().is_empty() {
            return Err(ConfigError::Empty("version"));
        }
        // Part of release_dir; must stay a single path component
        if !VERSION.is_match(&self.version) || self.version.contains("..") {
            return Err(ConfigError::InvalidName {
                field: "version",
                value: self.version.clone(),
            });
        }
        if self.package_ensure.trim().is_empty() {
            return Err(ConfigError::Empty("package_ensure"));
        }
        if self.listen_port == 0 {
            return Err(ConfigError::ZeroPort);
        }

        let config_file = self.config_file();
        if config_file.starts_with(self.templates_dir()) {
            return Err(ConfigError::ConfigInTemplates(config_file));
        }

        let mut seen = HashSet::new();
        for template in &self.templates {
            check_name("template name", &template.name, &TEMPLATE_NAME)?;
            if !seen.insert(template.name.as_str()) {
                return Err(ConfigError::DuplicateTemplate(template.name.clone()));
            }
        }

        Ok(())
    }

    /// Path of the rendered config file
    pub fn config_file(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.config_dir.join("sachet.yaml"))
    }

    /// Directory holding the `*.tmpl` files
    pub fn templates_dir(&self) -> PathBuf {
        self.config_dir.join("templates")
    }

    /// Path of one template file
    pub fn template_path(&self, template: &TemplateDef) -> PathBuf {
        self.templates_dir().join(template.file_name())
    }

    /// Config file mode; call `validate` first
    pub fn mode(&self) -> Result<u32, ConfigError> {
        parse_mode(&self.config_mode)
    }

    /// Release OS, host OS unless overridden
    pub fn os(&self) -> String {
        self.os.clone().unwrap_or_else(|| platform::host_os().to_string())
    }

    /// Release arch, host arch unless overridden
    pub fn arch(&self) -> String {
        self.arch
            .clone()
            .unwrap_or_else(|| platform::host_arch().to_string())
    }

    /// Init style, detected from the host unless set
    pub fn init_style(&self) -> InitStyle {
        self.init_style.unwrap_or_else(platform::detect_init_style)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_example_config() {
        let toml = r#"
version = "1.0.0"
install_method = "package"
package_ensure = "1.0.0"
extra_groups = ["ssl-cert"]
listen_port = 9877
extra_options = "-debug"
purge_config_dir = false

[providers.messagebird]
access_key = "secret"
gateway = 240

[[receivers]]
name = "team-sms"
provider = "messagebird"
to = ["+3161234567"]

[[templates]]
name = "sms"
content = "{{ .CommonAnnotations.summary }}"
"#;

        let config: SachetConfig = toml::from_str(toml).expect("Failed to parse config");
        config.validate().expect("valid config");

        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.install_method, InstallMethod::Package);
        assert_eq!(config.extra_groups, vec!["ssl-cert"]);
        assert_eq!(config.listen_port, 9877);
        assert!(!config.purge_config_dir);
        assert_eq!(config.providers["messagebird"]["gateway"], 240);
        assert_eq!(config.receivers[0]["to"][0], "+3161234567");
        assert_eq!(config.templates[0].file_name(), "sms.tmpl");

        // Untouched fields keep their defaults
        assert_eq!(config.user, "sachet");
        assert_eq!(config.service_ensure, ServiceEnsure::Running);
        assert_eq!(config.config_file(), PathBuf::from("/etc/sachet/sachet.yaml"));
    }

    #[test]
    fn test_empty_document_is_valid() {
        let config: SachetConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.install_method, InstallMethod::Url);
        assert_eq!(config.download_extension.extension(), "tar.gz");
        assert_eq!(config.mode().unwrap(), 0o640);
    }

    #[test]
    fn test_unsupported_install_method_rejected() {
        let err = toml::from_str::<SachetConfig>(r#"install_method = "docker""#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown variant"), "{msg}");
        assert!(msg.contains("url"), "{msg}");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = toml::from_str::<SachetConfig>(r#"listen_prot = 1"#).unwrap_err();
        assert!(err.to_string().contains("listen_prot"));
    }

    #[test]
    fn test_archive_format_names() {
        let config: SachetConfig = toml::from_str(r#"download_extension = "zip""#).unwrap();
        assert_eq!(config.download_extension, ArchiveFormat::Zip);
        assert!(toml::from_str::<SachetConfig>(r#"download_extension = "rar""#).is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0640"), Ok(0o640));
        assert_eq!(parse_mode("750"), Ok(0o750));
        assert_eq!(parse_mode("0o600"), Ok(0o600));
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SachetConfig {
            config_dir: PathBuf::from("etc/sachet"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RelativePath { field: "config_dir", .. })
        ));

        let config = SachetConfig {
            templates: vec![TemplateDef::new("../escape", "x")],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidName { field: "template name", .. })
        ));

        let config = SachetConfig {
            templates: vec![TemplateDef::new("a", "1"), TemplateDef::new("a", "2")],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateTemplate("a".into()))
        );

        let config = SachetConfig {
            user: "Bad User".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SachetConfig {
            listen_port: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroPort));
    }

    #[test]
    fn test_config_file_inside_templates_dir_rejected() {
        let config = SachetConfig {
            config_file: Some(PathBuf::from("/etc/sachet/templates/sachet.yaml")),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ConfigInTemplates(PathBuf::from(
                "/etc/sachet/templates/sachet.yaml"
            )))
        );

        // A sibling whose name only starts with "templates" is fine
        let config = SachetConfig {
            config_file: Some(PathBuf::from("/etc/sachet/templates.yaml")),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_version_must_be_single_component() {
        for version in ["../../tmp", "1.0/evil", "..", "1..0", " 1.0"] {
            let config = SachetConfig {
                version: version.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidName { field: "version", .. })
                ),
                "{version} accepted"
            );
        }

        for version in ["0.3.1", "1.0.0-rc.1", "2.0+build5", "v1.2"] {
            let config = SachetConfig {
                version: version.to_string(),
                ..Default::default()
            };
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_default_config_file_ignores_package_name() {
        let config = SachetConfig {
            package_name: "prometheus-sachet".into(),
            ..Default::default()
        };
        assert_eq!(config.config_file(), PathBuf::from("/etc/sachet/sachet.yaml"));
    }

    #[test]
    fn test_paths() {
        let config = SachetConfig {
            config_dir: PathBuf::from("/srv/sachet"),
            templates: vec![TemplateDef::new("a", "A")],
            ..Default::default()
        };
        assert_eq!(config.config_file(), PathBuf::from("/srv/sachet/sachet.yaml"));
        assert_eq!(config.templates_dir(), PathBuf::from("/srv/sachet/templates"));
        assert_eq!(
            config.template_path(&config.templates[0]),
            PathBuf::from("/srv/sachet/templates/a.tmpl")
        );
    }
}
