use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::kubernetes::{KubeConfigConnector, KubeconfigSource};
use crate::target::DEFAULT_NAMESPACE;

/// Errors that can occur during config operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// How to reach the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Overrides the server address found in the kubeconfig
    #[serde(default)]
    pub master_url: Option<String>,
    /// Path to a kubeconfig file
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Inline base64-encoded kubeconfig; wins over `kubeconfig`
    #[serde(default)]
    pub kubeconfig_base64: Option<String>,
    /// Kubeconfig context to use
    #[serde(default)]
    pub context: Option<String>,
}

/// Forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Local address ports are allocated and listened on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Namespace used when a request does not name one
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Optional deadline for a whole session, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            bind_address: default_bind_address(),
            default_namespace: default_namespace(),
            timeout_secs: None,
        }
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ForwarderConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("podforward");
        Ok(config_dir)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Apply `K8S_MASTER_URL`, `K8S_CONFIG`, `KUBECONFIG` and `KUBE_CONTEXT`
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = var("K8S_MASTER_URL") {
            self.cluster.master_url = Some(url);
        }
        if let Some(encoded) = var("K8S_CONFIG") {
            self.cluster.kubeconfig_base64 = Some(encoded);
        }
        if let Some(path) = var("KUBECONFIG") {
            // Only the first entry of a colon-separated list is used
            let first = path.split(':').next().unwrap_or(&path).to_string();
            self.cluster.kubeconfig = Some(PathBuf::from(first));
        }
        if let Some(context) = var("KUBE_CONTEXT") {
            self.cluster.context = Some(context);
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Build the cluster connector these settings describe
    pub fn connector(&self) -> KubeConfigConnector {
        let cluster = &self.cluster;
        let source = if let Some(encoded) = &cluster.kubeconfig_base64 {
            KubeconfigSource::Base64(encoded.clone())
        } else if let Some(path) = &cluster.kubeconfig {
            KubeconfigSource::Path(path.clone())
        } else if let Some(context) = &cluster.context {
            KubeconfigSource::Context(context.clone())
        } else {
            KubeconfigSource::Infer
        };

        let context = match &source {
            KubeconfigSource::Base64(_) | KubeconfigSource::Path(_) => cluster.context.clone(),
            _ => None,
        };

        KubeConfigConnector::new(source)
            .with_context(context)
            .with_master_url(cluster.master_url.clone())
    }
}
