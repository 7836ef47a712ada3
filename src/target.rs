//! Forwarding request descriptor

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ForwardError;

/// Namespace used when a request leaves it empty
pub const DEFAULT_NAMESPACE: &str = "default";

/// The pod and port to forward to
///
/// A pod is found either by exact `name` or, when no name is given, by
/// `label_selector` within `namespace`. The name always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPod {
    /// Port of the pod in the cluster
    pub port: u16,
    /// Exact pod name, if known
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace to look for the pod in
    #[serde(default)]
    pub namespace: String,
    /// Labels the pod must carry
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,
    /// Extra field constraints for selector lookups, e.g. `status.phase=Running`
    #[serde(default)]
    pub field_selector: BTreeMap<String, String>,
}

impl TargetPod {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.label_selector.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.field_selector.insert(key.into(), value.into());
        self
    }

    /// The pod name, treating an empty string as unset
    pub fn pod_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    pub(crate) fn apply_defaults(&mut self) {
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ForwardError> {
        if self.port == 0 {
            return Err(ForwardError::TargetValidation(
                "target port is required".to_string(),
            ));
        }

        if self.namespace.is_empty() {
            return Err(ForwardError::TargetValidation(
                "namespace cannot be empty".to_string(),
            ));
        }

        if self.pod_name().is_none() && self.label_selector.is_empty() {
            return Err(ForwardError::TargetValidation(
                "pod name or label selector should be specified".to_string(),
            ));
        }

        Ok(())
    }
}
