//! Error types for podforward
//!
//! [`ForwardError`] covers everything that fails before a session exists and
//! is returned from [`crate::PortForwarder::forward_pod`]. [`SessionError`] is
//! the terminal error captured on a running session.

use std::sync::Arc;

use podforward_sync::ContextError;
use thiserror::Error;

use crate::kubernetes::{ConnectError, DirectoryError, TunnelError};

/// Coarse classification shared by both error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TargetValidation,
    PodNotFound,
    AllocationFailure,
    Cluster,
    TunnelFailure,
    Cancelled,
}

/// Errors surfaced synchronously while setting up a forward
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("target pod validation failed: {0}")]
    TargetValidation(String),

    #[error("get free port failed: {0}")]
    Allocation(#[source] std::io::Error),

    #[error("could not forward: {0}")]
    Directory(#[from] DirectoryError),

    #[error("invalid cluster server url: {0}")]
    ServerUrl(#[from] url::ParseError),

    #[error("failed to connect to cluster: {0}")]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Cancelled(ContextError),
}

impl ForwardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TargetValidation(_) => ErrorKind::TargetValidation,
            Self::Allocation(_) => ErrorKind::AllocationFailure,
            Self::Directory(DirectoryError::PodNotFound(_)) => ErrorKind::PodNotFound,
            Self::Directory(_) | Self::ServerUrl(_) | Self::Connect(_) => ErrorKind::Cluster,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

/// Terminal error of a forwarding session
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Cancelled(ContextError),

    #[error("port forward {local_port}:{remote_port} to pod {pod} in namespace {namespace} failed: {source}")]
    Tunnel {
        pod: String,
        namespace: String,
        local_port: u16,
        remote_port: u16,
        #[source]
        source: Arc<TunnelError>,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Tunnel { .. } => ErrorKind::TunnelFailure,
        }
    }

    /// The context error, if the session ended because its context was done
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Cancelled(err) => Some(*err),
            Self::Tunnel { .. } => None,
        }
    }
}

impl From<ContextError> for SessionError {
    fn from(err: ContextError) -> Self {
        Self::Cancelled(err)
    }
}
