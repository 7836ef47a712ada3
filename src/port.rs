//! Local port allocation

use std::io;
use std::net::{IpAddr, Ipv4Addr, TcpListener};

/// Hands out local TCP ports that are free at the time of the call
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> io::Result<u16>;
}

/// Asks the OS for an ephemeral port by binding port 0 and releasing it
///
/// Another process may grab the port before it is used again; callers accept
/// that window.
#[derive(Debug, Clone)]
pub struct TcpPortAllocator {
    address: IpAddr,
}

impl TcpPortAllocator {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }

    pub fn localhost() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl Default for TcpPortAllocator {
    fn default() -> Self {
        Self::localhost()
    }
}

impl PortAllocator for TcpPortAllocator {
    fn allocate(&self) -> io::Result<u16> {
        let listener = TcpListener::bind((self.address, 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);

        tracing::debug!("Allocated local port {} on {}", port, self.address);
        Ok(port)
    }
}
