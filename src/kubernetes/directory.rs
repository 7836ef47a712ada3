//! Pod lookup
//!
//! Wraps the kube crate to find the pod a forward should target.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use thiserror::Error;

use crate::target::TargetPod;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("could not find pod to forward ports: {0}")]
    PodNotFound(String),
    #[error("failed to list pods in namespace {namespace} with selector {selector:?}: {source}")]
    List {
        namespace: String,
        selector: String,
        #[source]
        source: kube::Error,
    },
}

/// A pod as seen by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubePod {
    pub name: String,
    pub namespace: String,
    pub phase: String,
}

impl KubePod {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            phase: "Unknown".to_string(),
        }
    }

    fn from_pod(pod: Pod) -> Self {
        let name = pod.metadata.name.unwrap_or_default();
        let namespace = pod.metadata.namespace.unwrap_or_default();
        let phase = pod
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            name,
            namespace,
            phase,
        }
    }
}

/// Cluster-side pod lookups
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// Fetch one pod by exact name
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<KubePod, DirectoryError>;

    /// List pods matching the selectors, in the order the API returns them
    async fn list_by_selector(
        &self,
        namespace: &str,
        label_selector: &BTreeMap<String, String>,
        field_selector: &BTreeMap<String, String>,
    ) -> Result<Vec<KubePod>, DirectoryError>;
}

/// Pod directory backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodDirectory {
    client: Client,
}

impl KubePodDirectory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodDirectory for KubePodDirectory {
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<KubePod, DirectoryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(name).await.map_err(|e| {
            DirectoryError::PodNotFound(format!(
                "failed to get pod {} in namespace {}: {}",
                name, namespace, e
            ))
        })?;

        Ok(KubePod::from_pod(pod))
    }

    async fn list_by_selector(
        &self,
        namespace: &str,
        label_selector: &BTreeMap<String, String>,
        field_selector: &BTreeMap<String, String>,
    ) -> Result<Vec<KubePod>, DirectoryError> {
        let start = std::time::Instant::now();
        let labels = build_selector(label_selector);
        let fields = build_selector(field_selector);

        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&labels);
        }
        if !fields.is_empty() {
            params = params.fields(&fields);
        }

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&params)
            .await
            .map_err(|source| DirectoryError::List {
                namespace: namespace.to_string(),
                selector: labels.clone(),
                source,
            })?;
        tracing::debug!(
            "list_pods({}, {}) API call took {:?}",
            namespace,
            labels,
            start.elapsed()
        );

        Ok(list.items.into_iter().map(KubePod::from_pod).collect())
    }
}

/// Join `key=value` pairs with commas
pub fn build_selector(pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve the pod name a target refers to
///
/// A set name is looked up directly. Otherwise the first pod the selector
/// listing returns wins; no sorting happens on this side.
pub async fn resolve_pod_name(
    directory: &dyn PodDirectory,
    target: &TargetPod,
) -> Result<String, DirectoryError> {
    if let Some(name) = target.pod_name() {
        let pod = directory.get_by_name(&target.namespace, name).await?;
        if pod.name.is_empty() {
            return Err(DirectoryError::PodNotFound(format!(
                "pod {} in namespace {} has no name",
                name, target.namespace
            )));
        }
        tracing::debug!("Resolved pod {} by name (phase {})", pod.name, pod.phase);
        return Ok(pod.name);
    }

    let pods = directory
        .list_by_selector(
            &target.namespace,
            &target.label_selector,
            &target.field_selector,
        )
        .await?;

    let first = pods.into_iter().next().ok_or_else(|| {
        DirectoryError::PodNotFound(format!(
            "pods not found in [{}] namespace with selector {:?}",
            target.namespace,
            build_selector(&target.label_selector)
        ))
    })?;

    if first.name.is_empty() {
        return Err(DirectoryError::PodNotFound(
            "pod name should not be empty".to_string(),
        ));
    }

    tracing::debug!(
        "Resolved pod {} by selector (phase {})",
        first.name,
        first.phase
    );
    Ok(first.name)
}
