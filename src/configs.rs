use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::key_generator::{KeyAlgorithm, RSA_KEY_SIZE_DEFAULT};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub defaults: CertificateDefaults,
    #[serde(default)]
    pub exports: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/certificates.json")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmName {
    #[default]
    EcdsaP256,
    Rsa,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    #[serde(default)]
    pub algorithm: AlgorithmName,
    /// Only read when `algorithm = "rsa"`.
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: u32,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmName::default(),
            rsa_bits: default_rsa_bits(),
        }
    }
}

impl KeysConfig {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.algorithm {
            AlgorithmName::EcdsaP256 => KeyAlgorithm::EcdsaP256,
            AlgorithmName::Rsa => KeyAlgorithm::Rsa {
                bits: self.rsa_bits,
            },
        }
    }
}

fn default_rsa_bits() -> u32 {
    RSA_KEY_SIZE_DEFAULT
}

/// Subject values applied when the command line leaves them out.
#[derive(Debug, Deserialize, Clone)]
pub struct CertificateDefaults {
    #[serde(default = "default_root_validity")]
    pub root_validity_days: u32,
    #[serde(default = "default_leaf_validity")]
    pub leaf_validity_days: u32,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub organization: String,
}

impl Default for CertificateDefaults {
    fn default() -> Self {
        Self {
            root_validity_days: default_root_validity(),
            leaf_validity_days: default_leaf_validity(),
            country: String::new(),
            organization: String::new(),
        }
    }
}

fn default_root_validity() -> u32 {
    3650 // 10 years
}

fn default_leaf_validity() -> u32 {
    365
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub directory: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_dir(),
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Like [`AppConfig::from_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(_) => Self::from_file(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display())),
        }
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(config_str).context("Invalid TOML configuration")?;
        Ok(config)
    }
}
