//! Cluster connection
//!
//! Turns a kubeconfig source into an authenticated kube client.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::prelude::*;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to create client: {0}")]
    Client(#[from] kube::Error),
    #[error("Failed to load config: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    #[error("Failed to infer config: {0}")]
    Infer(#[from] kube::config::InferConfigError),
    #[error("Failed to decode kubeconfig: {0}")]
    Decode(String),
    #[error("Invalid master URL {url}: {reason}")]
    MasterUrl { url: String, reason: String },
}

/// Authenticated access to one cluster
#[derive(Clone)]
pub struct ClusterConnection {
    /// API server address as configured, e.g. `https://10.0.0.1:6443`
    pub host: String,
    pub client: Client,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Something that can hand out a cluster connection
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> Result<ClusterConnection, ConnectError>;
}

/// Where the kubeconfig comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeconfigSource {
    /// In-cluster config, `$KUBECONFIG` or `~/.kube/config`
    Infer,
    /// A named context from the default kubeconfig
    Context(String),
    /// A kubeconfig file
    Path(PathBuf),
    /// Base64-encoded kubeconfig YAML
    Base64(String),
}

/// Connector backed by a kubeconfig
#[derive(Debug, Clone)]
pub struct KubeConfigConnector {
    source: KubeconfigSource,
    context: Option<String>,
    master_url: Option<String>,
}

impl KubeConfigConnector {
    pub fn new(source: KubeconfigSource) -> Self {
        Self {
            source,
            context: None,
            master_url: None,
        }
    }

    /// Use the ambient configuration
    pub fn infer() -> Self {
        Self::new(KubeconfigSource::Infer)
    }

    /// Use a context from the default kubeconfig
    pub fn for_context(context: impl Into<String>) -> Self {
        Self::new(KubeconfigSource::Context(context.into()))
    }

    /// Use a base64-encoded kubeconfig, optionally overriding its server
    pub fn from_base64(master_url: impl Into<String>, kubeconfig: impl Into<String>) -> Self {
        let master_url = master_url.into();
        Self::new(KubeconfigSource::Base64(kubeconfig.into()))
            .with_master_url(Some(master_url).filter(|u| !u.is_empty()))
    }

    pub fn with_master_url(mut self, master_url: Option<String>) -> Self {
        self.master_url = master_url;
        self
    }

    /// Select a context inside a file or base64 kubeconfig
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn source(&self) -> &KubeconfigSource {
        &self.source
    }

    fn options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            ..Default::default()
        }
    }

    async fn load_config(&self) -> Result<Config, ConnectError> {
        let config = match &self.source {
            KubeconfigSource::Infer => Config::infer().await?,
            KubeconfigSource::Context(name) => {
                let options = KubeConfigOptions {
                    context: Some(name.clone()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options).await?
            }
            KubeconfigSource::Path(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.options()).await?
            }
            KubeconfigSource::Base64(encoded) => {
                let yaml = decode_kubeconfig(encoded)?;
                let kubeconfig = Kubeconfig::from_yaml(&yaml)?;
                Config::from_custom_kubeconfig(kubeconfig, &self.options()).await?
            }
        };
        Ok(config)
    }
}

#[async_trait]
impl ClusterConnector for KubeConfigConnector {
    async fn connect(&self) -> Result<ClusterConnection, ConnectError> {
        let start = std::time::Instant::now();
        let mut config = self.load_config().await?;
        tracing::debug!("Config loaded in {:?}", start.elapsed());

        if let Some(url) = &self.master_url {
            config.cluster_url = url.parse().map_err(|e| ConnectError::MasterUrl {
                url: url.clone(),
                reason: format!("{}", e),
            })?;
        }

        install_crypto_provider();
        let host = config.cluster_url.to_string();
        let client = Client::try_from(config)?;
        tracing::info!("Connected to cluster {} in {:?}", host, start.elapsed());

        Ok(ClusterConnection { host, client })
    }
}

/// Install the process-wide rustls provider unless one is already set
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn decode_kubeconfig(encoded: &str) -> Result<String, ConnectError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConnectError::Decode(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ConnectError::Decode(format!("invalid utf-8: {}", e)))
}
