//! Configuration management using the prefer crate for discovery.

pub mod browser;
pub mod company;
pub mod popups;
pub mod selectors;
mod settings;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use browser::BrowserEngineConfig;
pub use company::{
    CompanyConfig, CompanyKind, CompanyProfile, FieldSpec, KeyFields, LoginConfig, Timeouts,
    ValidatorConfig,
};
pub use popups::{PopupAction, PopupSignature};
pub use selectors::{roles, SelectorCandidateSet, SelectorMap};
pub use settings::{Settings, DEFAULT_DATABASE_FILENAME};

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Object store root (defaults to `<data_dir>/objects`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects_dir: Option<String>,
    /// Browser engine settings.
    #[serde(default, skip_serializing_if = "BrowserEngineConfig::is_default")]
    pub browser: BrowserEngineConfig,
    /// Company profiles keyed by company name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub companies: BTreeMap<String, CompanyConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery.
    /// Falls back to defaults when no pqracquire config file is found.
    pub async fn load() -> Self {
        match prefer::load("pqracquire").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default_with_env()
                    }
                },
                None => Self::default_with_env(),
            },
            Err(_) => Self::default_with_env(),
        }
    }

    /// Defaults plus environment overrides.
    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.browser = config.browser.with_env_overrides();
        config
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        config.browser = config.browser.with_env_overrides();
        Ok(config)
    }

    /// Parse config text in the given format.
    pub fn parse(contents: &str, ext: &str) -> Result<Self> {
        let config = match ext {
            "toml" => toml::from_str(contents).context("Failed to parse TOML config")?,
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).context("Failed to parse YAML config")?
            }
            _ => serde_json::from_str(contents).context("Failed to parse JSON config")?,
        };
        Ok(config)
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// Absolute paths are returned as-is and `~` is expanded.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref objects_dir) = self.objects_dir {
            settings.objects_dir = self.resolve_path(objects_dir, base_dir);
        }
    }

    /// Resolved profile for `company`.
    pub fn company_profile(&self, company: &str) -> Result<CompanyProfile> {
        let key = company.to_lowercase();
        let entry = self
            .companies
            .get(&key)
            .or_else(|| self.companies.get(company))
            .ok_or_else(|| {
                let known: Vec<&str> = self.companies.keys().map(String::as_str).collect();
                anyhow!(
                    "Unknown company '{}'. Configured: {}",
                    company,
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            })?;
        entry.resolve(&key)
    }

    /// SHA-256 of the serialized config, shown by `pqr config`.
    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Load settings and config together.
///
/// `config_path` skips discovery. Relative paths resolve against the config
/// file's directory, or the CWD without one.
pub async fn load_settings(config_path: Option<&Path>) -> Result<(Settings, Config)> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
data_dir = "./data"

[browser]
headless = false

[companies.afinia]
base_url = "https://pqr.afinia.test/"
listing_url = "PQR/Consulta.aspx"
max_records = 30

[companies.electrohuila]
kind = "custom"
base_url = "https://pqr.electrohuila.test/"

[[companies.electrohuila.fields]]
name = "radicado"
selectors = ["#radicado"]
"##;

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(SAMPLE, "toml").unwrap();
        assert_eq!(config.companies.len(), 2);
        assert!(!config.browser.headless);

        let afinia = config.company_profile("Afinia").unwrap();
        assert_eq!(afinia.max_records, Some(30));
        assert_eq!(afinia.kind, CompanyKind::Afinia);

        let custom = config.company_profile("electrohuila").unwrap();
        assert_eq!(custom.fields.len(), 1);
    }

    #[test]
    fn test_unknown_company() {
        let config = Config::parse(SAMPLE, "toml").unwrap();
        let err = config.company_profile("nope").unwrap_err().to_string();
        assert!(err.contains("afinia"));
    }

    #[test]
    fn test_apply_to_settings_resolves_relative() {
        let config = Config::parse(SAMPLE, "toml").unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/etc/pqr"));
        assert_eq!(settings.data_dir, PathBuf::from("/etc/pqr/./data"));
        assert_eq!(settings.objects_dir, PathBuf::from("/etc/pqr/./data/objects"));
    }

    #[test]
    fn test_parse_json_and_yaml() {
        let json = r#"{"companies": {"aire": {"base_url": "https://aire.test/"}}}"#;
        assert!(Config::parse(json, "json").unwrap().companies.contains_key("aire"));

        let yaml = "companies:\n  aire:\n    base_url: https://aire.test/\n";
        assert!(Config::parse(yaml, "yaml").unwrap().companies.contains_key("aire"));
    }

    #[tokio::test]
    async fn test_load_from_path_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pqracquire.toml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.base_dir().as_deref(), Some(dir.path()));
    }
}
