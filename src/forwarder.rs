//! Port forwarder
//!
//! Validates a [`TargetPod`], allocates a local port, resolves the pod and
//! hands back a running [`PortForwardSession`] without waiting for the tunnel.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use podforward_sync::Context;

use crate::config::ForwarderConfig;
use crate::error::ForwardError;
use crate::kubernetes::{
    resolve_pod_name, ClusterConnector, KubePodDirectory, PodDirectory, PodTunnel, PortPair,
    TunnelTarget, WebSocketTunnel,
};
use crate::port::{PortAllocator, TcpPortAllocator};
use crate::session::PortForwardSession;
use crate::target::TargetPod;

/// Entry point for starting port forwards against one cluster
pub struct PortForwarder {
    host: String,
    allocator: Arc<dyn PortAllocator>,
    directory: Arc<dyn PodDirectory>,
    tunnel: Arc<dyn PodTunnel>,
}

impl PortForwarder {
    /// Connect once and wire the production collaborators
    pub async fn new(connector: &dyn ClusterConnector) -> Result<Self, ForwardError> {
        Self::with_bind_address(connector, IpAddr::V4(Ipv4Addr::LOCALHOST)).await
    }

    /// Like [`new`](Self::new), listening on `bind_address` instead of loopback
    pub async fn with_bind_address(
        connector: &dyn ClusterConnector,
        bind_address: IpAddr,
    ) -> Result<Self, ForwardError> {
        let connection = connector.connect().await?;

        Ok(Self::from_parts(
            connection.host,
            Arc::new(TcpPortAllocator::new(bind_address)),
            Arc::new(KubePodDirectory::new(connection.client.clone())),
            Arc::new(WebSocketTunnel::new(connection.client).with_bind_address(bind_address)),
        ))
    }

    /// Build from configuration
    pub async fn from_config(config: &ForwarderConfig) -> Result<Self, ForwardError> {
        Self::with_bind_address(&config.connector(), config.bind_address).await
    }

    /// Wire arbitrary collaborators
    pub fn from_parts(
        host: impl Into<String>,
        allocator: Arc<dyn PortAllocator>,
        directory: Arc<dyn PodDirectory>,
        tunnel: Arc<dyn PodTunnel>,
    ) -> Self {
        Self {
            host: host.into(),
            allocator,
            directory,
            tunnel,
        }
    }

    /// Start forwarding a local port to `target`
    ///
    /// Returns as soon as the pod is resolved; the tunnel comes up in the
    /// background. When `ctx` is cancelled or expires the session stops and
    /// records the context's error.
    pub async fn forward_pod(
        &self,
        ctx: &Context,
        mut target: TargetPod,
    ) -> Result<PortForwardSession, ForwardError> {
        target.apply_defaults();
        target.validate()?;

        let local_port = self
            .allocator
            .allocate()
            .map_err(ForwardError::Allocation)?;

        let pod_name = tokio::select! {
            biased;
            err = ctx.done() => return Err(ForwardError::Cancelled(err)),
            resolved = resolve_pod_name(self.directory.as_ref(), &target) => resolved?,
        };

        let tunnel_target = TunnelTarget::new(&self.host, &target.namespace, &pod_name)?;
        let ports = PortPair::new(local_port, target.port);
        tracing::debug!("Resolved {} for port forward {}", tunnel_target.url, ports);

        let session = PortForwardSession::new(&tunnel_target, ports);
        session.watch_context(ctx.clone());
        session.launch(self.tunnel.clone(), tunnel_target);

        Ok(session)
    }
}
