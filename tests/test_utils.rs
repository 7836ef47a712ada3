//! Test utilities for podforward
//!
//! Fakes for every collaborator the forwarder talks to, each recording how
//! it was called.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use podforward::kubernetes::{
    build_selector, DirectoryError, KubePod, PodDirectory, PodTunnel, PortPair, TunnelError,
    TunnelTarget,
};
use podforward::{PortAllocator, PortForwarder, Signal};

/// Allocator returning a fixed port, or failing
pub struct FakeAllocator {
    port: Option<u16>,
    calls: AtomicUsize,
}

impl FakeAllocator {
    pub fn returning(port: u16) -> Arc<Self> {
        Arc::new(Self {
            port: Some(port),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            port: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PortAllocator for FakeAllocator {
    fn allocate(&self) -> io::Result<u16> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.port
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no free ports"))
    }
}

/// Directory answering from a fixed pod list
pub struct FakeDirectory {
    pods: Vec<KubePod>,
    delay: Option<Duration>,
    pub get_calls: Mutex<Vec<(String, String)>>,
    pub list_calls: Mutex<Vec<(String, String, String)>>,
}

impl FakeDirectory {
    pub fn with_pods(namespace: &str, names: &[&str]) -> Arc<Self> {
        Arc::new(Self::new(namespace, names, None))
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::new("default", &[], None))
    }

    /// A directory whose lookups take `delay` to answer
    pub fn slow(namespace: &str, names: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(namespace, names, Some(delay)))
    }

    fn new(namespace: &str, names: &[&str], delay: Option<Duration>) -> Self {
        Self {
            pods: names.iter().map(|n| KubePod::new(*n, namespace)).collect(),
            delay,
            get_calls: Mutex::new(Vec::new()),
            list_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.lock().len()
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.lock().len()
    }

    pub fn calls(&self) -> usize {
        self.get_count() + self.list_count()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PodDirectory for FakeDirectory {
    async fn get_by_name(&self, namespace: &str, name: &str) -> Result<KubePod, DirectoryError> {
        self.get_calls
            .lock()
            .push((namespace.to_string(), name.to_string()));
        self.pause().await;

        self.pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned()
            .ok_or_else(|| {
                DirectoryError::PodNotFound(format!(
                    "failed to get pod {} in namespace {}",
                    name, namespace
                ))
            })
    }

    async fn list_by_selector(
        &self,
        namespace: &str,
        label_selector: &BTreeMap<String, String>,
        field_selector: &BTreeMap<String, String>,
    ) -> Result<Vec<KubePod>, DirectoryError> {
        self.list_calls.lock().push((
            namespace.to_string(),
            build_selector(label_selector),
            build_selector(field_selector),
        ));
        self.pause().await;

        Ok(self
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }
}

/// How a [`FakeTunnel`] behaves once invoked
#[derive(Debug, Clone, Copy)]
pub enum TunnelBehavior {
    /// Fire ready, then wait for stop
    RunUntilStopped,
    /// Never fire ready; wait for stop
    NeverReady,
    /// Fire ready, then fail after the delay
    FailAfterReady(Duration),
    /// Fail without ever becoming ready
    FailImmediately,
    /// Fire ready, wait for stop, then report an error while unwinding
    FailOnStop,
    /// Fire ready, wait for stop, then take the delay to unwind
    SlowUnwind(Duration),
}

/// One recorded call of the forwarding primitive
#[derive(Debug, Clone)]
pub struct TunnelCall {
    pub target: TunnelTarget,
    pub ports: Vec<String>,
    pub stop: Signal,
    pub ready: Signal,
}

pub struct FakeTunnel {
    behavior: TunnelBehavior,
    pub calls: Mutex<Vec<TunnelCall>>,
    /// Fires when a call has fully returned
    pub returned: Signal,
}

impl FakeTunnel {
    pub fn new(behavior: TunnelBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            returned: Signal::new(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_call(&self) -> Option<TunnelCall> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl PodTunnel for FakeTunnel {
    async fn forward(
        &self,
        target: &TunnelTarget,
        ports: &[PortPair],
        stop: Signal,
        ready: Signal,
    ) -> Result<(), TunnelError> {
        self.calls.lock().push(TunnelCall {
            target: target.clone(),
            ports: ports.iter().map(|p| p.to_string()).collect(),
            stop: stop.clone(),
            ready: ready.clone(),
        });

        let result = match self.behavior {
            TunnelBehavior::RunUntilStopped => {
                ready.fire();
                stop.wait().await;
                Ok(())
            }
            TunnelBehavior::NeverReady => {
                stop.wait().await;
                Ok(())
            }
            TunnelBehavior::FailAfterReady(delay) => {
                ready.fire();
                tokio::time::sleep(delay).await;
                Err(TunnelError::Remote("lost connection to pod".to_string()))
            }
            TunnelBehavior::FailImmediately => {
                Err(TunnelError::Remote("error upgrading connection".to_string()))
            }
            TunnelBehavior::FailOnStop => {
                ready.fire();
                stop.wait().await;
                Err(TunnelError::Remote("connection reset while stopping".to_string()))
            }
            TunnelBehavior::SlowUnwind(delay) => {
                ready.fire();
                stop.wait().await;
                tokio::time::sleep(delay).await;
                Ok(())
            }
        };

        self.returned.fire();
        result
    }
}

/// Forwarder wired to the given fakes
pub fn forwarder(
    host: &str,
    allocator: Arc<FakeAllocator>,
    directory: Arc<FakeDirectory>,
    tunnel: Arc<FakeTunnel>,
) -> PortForwarder {
    PortForwarder::from_parts(host, allocator, directory, tunnel)
}

/// Await a signal, failing the test if it takes too long
pub async fn within(signal: &Signal, secs: u64) {
    tokio::time::timeout(Duration::from_secs(secs), signal.wait())
        .await
        .expect("signal did not fire in time");
}
