//! Kubernetes integration module
//!
//! Provides the cluster connector, pod lookup, and the websocket tunnel used
//! for port forwarding.

pub mod connector;
pub mod directory;
pub mod tunnel;

pub use connector::{
    install_crypto_provider, ClusterConnection, ClusterConnector, ConnectError,
    KubeConfigConnector, KubeconfigSource,
};
pub use directory::{
    build_selector, resolve_pod_name, DirectoryError, KubePod, KubePodDirectory, PodDirectory,
};
pub use tunnel::{
    resolve_server_url, PodTunnel, PortPair, TunnelError, TunnelTarget, WebSocketTunnel,
};
