//! Pod tunnels
//!
//! The forwarding primitive: listens on local ports and carries each accepted
//! connection to the pod over the kube crate's websocket port-forward support.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::Api, Client};
use podforward_sync::Signal;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use url::Url;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("no ports to forward")]
    NoPorts,
    #[error("unable to listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("no stream for remote port {0}")]
    StreamUnavailable(u16),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Remote(String),
    #[error("tunnel task aborted: {0}")]
    Aborted(String),
}

/// A `local:remote` port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

impl PortPair {
    pub fn new(local: u16, remote: u16) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// The pod a tunnel dials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub namespace: String,
    pub pod: String,
    /// The API server's port-forward endpoint for this pod
    pub url: Url,
}

impl TunnelTarget {
    pub fn new(host: &str, namespace: &str, pod: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            url: resolve_server_url(host, namespace, pod)?,
        })
    }
}

/// Build the HTTPS port-forward URL for a pod
///
/// Any `http://` or `https://` scheme on `host` is dropped; the endpoint is
/// always HTTPS.
pub fn resolve_server_url(host: &str, namespace: &str, pod: &str) -> Result<Url, url::ParseError> {
    let host = host.strip_prefix("http://").unwrap_or(host);
    let host = host.strip_prefix("https://").unwrap_or(host);
    let host = host.trim_end_matches('/');

    Url::parse(&format!(
        "https://{}/api/v1/namespaces/{}/pods/{}/portforward",
        host, namespace, pod
    ))
}

/// The blocking forwarding operation
///
/// Implementations fire `ready` once local ports accept connections, and
/// return `Ok(())` promptly after `stop` fires. Returning an error means the
/// tunnel is unusable.
#[async_trait]
pub trait PodTunnel: Send + Sync {
    async fn forward(
        &self,
        target: &TunnelTarget,
        ports: &[PortPair],
        stop: Signal,
        ready: Signal,
    ) -> Result<(), TunnelError>;
}

/// Tunnel over the Kubernetes port-forward websocket subprotocol
///
/// Each accepted local connection gets its own port-forward stream. A failing
/// stream is logged and dropped; only listener failures end the tunnel.
#[derive(Clone)]
pub struct WebSocketTunnel {
    client: Client,
    bind_address: IpAddr,
}

impl WebSocketTunnel {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }
}

#[async_trait]
impl PodTunnel for WebSocketTunnel {
    async fn forward(
        &self,
        target: &TunnelTarget,
        ports: &[PortPair],
        stop: Signal,
        ready: Signal,
    ) -> Result<(), TunnelError> {
        if ports.is_empty() {
            return Err(TunnelError::NoPorts);
        }

        let mut listeners = Vec::with_capacity(ports.len());
        for pair in ports {
            let address = SocketAddr::new(self.bind_address, pair.local);
            let listener = TcpListener::bind(address)
                .await
                .map_err(|source| TunnelError::Bind { address, source })?;
            tracing::info!("Forwarding from {} -> {}", address, pair.remote);
            listeners.push((listener, *pair));
        }

        tracing::debug!("Tunnel to {} ready", target.url);
        ready.fire();

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let serving = listeners.into_iter().map(|(listener, pair)| {
            serve(listener, pair, pods.clone(), target.pod.clone(), stop.clone())
        });
        futures::future::try_join_all(serving).await?;

        Ok(())
    }
}

/// Accept loop for one local port
async fn serve(
    listener: TcpListener,
    pair: PortPair,
    pods: Api<Pod>,
    pod: String,
    stop: Signal,
) -> Result<(), TunnelError> {
    let mut connections = JoinSet::new();

    let result = loop {
        tokio::select! {
            _ = stop.wait() => break Ok(()),

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Handling connection for {} from {}", pair.local, peer);
                    let pods = pods.clone();
                    let pod = pod.clone();
                    connections.spawn(async move {
                        if let Err(e) = forward_connection(&pods, &pod, pair.remote, stream).await {
                            tracing::warn!("An error occurred forwarding {}: {}", pair, e);
                        }
                    });
                }
                Err(source) => break Err(TunnelError::Accept { port: pair.local, source }),
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    connections.shutdown().await;
    result
}

async fn forward_connection(
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
    mut local: TcpStream,
) -> Result<(), TunnelError> {
    let mut forwarder = pods.portforward(pod, &[port]).await?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or(TunnelError::StreamUnavailable(port))?;

    tokio::io::copy_bidirectional(&mut local, &mut upstream).await?;
    drop(upstream);

    forwarder
        .join()
        .await
        .map_err(|e| TunnelError::Remote(e.to_string()))?;
    Ok(())
}
