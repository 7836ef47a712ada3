//! Port forward session
//!
//! A [`PortForwardSession`] is the caller's handle on one forwarding attempt.
//! It carries three one-shot signals (started, stop requested, finished) and
//! the first terminal error. Explicit stops, context expiry and tunnel
//! failures all converge on the single stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use podforward_sync::{Context, Signal};
use uuid::Uuid;

use crate::error::SessionError;
use crate::kubernetes::{PodTunnel, PortPair, TunnelError, TunnelTarget};

/// Observable phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, background task not launched yet
    Created,
    /// Tunnel is being established
    Starting,
    /// Tunnel is accepting connections
    Running,
    /// Shutdown requested, tunnel still unwinding
    Stopping,
    /// Tunnel has returned; terminal
    Finished,
}

struct Inner {
    id: Uuid,
    pod: String,
    namespace: String,
    ports: PortPair,
    launched: AtomicBool,
    started: Signal,
    finished: Signal,
    stop: Signal,
    error: Mutex<Option<SessionError>>,
}

/// Handle on a running port forward
///
/// Cheap to clone; every clone observes the same session.
#[derive(Clone)]
pub struct PortForwardSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PortForwardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortForwardSession")
            .field("id", &self.inner.id)
            .field("pod", &self.inner.pod)
            .field("namespace", &self.inner.namespace)
            .field("ports", &self.inner.ports)
            .field("state", &self.state())
            .finish()
    }
}

impl PortForwardSession {
    pub(crate) fn new(target: &TunnelTarget, ports: PortPair) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                pod: target.pod.clone(),
                namespace: target.namespace.clone(),
                ports,
                launched: AtomicBool::new(false),
                started: Signal::new(),
                finished: Signal::new(),
                stop: Signal::new(),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The allocated local port
    pub fn local_port(&self) -> u16 {
        self.inner.ports.local
    }

    /// The port on the pod
    pub fn remote_port(&self) -> u16 {
        self.inner.ports.remote
    }

    pub fn pod(&self) -> &str {
        &self.inner.pod
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Fires once the tunnel accepts local connections
    pub fn started(&self) -> Signal {
        self.inner.started.clone()
    }

    /// Fires once the tunnel has fully shut down
    pub fn finished(&self) -> Signal {
        self.inner.finished.clone()
    }

    /// Request shutdown
    ///
    /// Returns without waiting; await [`finished`](Self::finished) to join.
    /// Repeated or concurrent calls are no-ops.
    pub fn stop(&self) {
        if self.inner.stop.fire() {
            tracing::debug!(session = %self.inner.id, "Stop requested");
        }
    }

    /// The terminal error, if one has been captured
    pub fn err(&self) -> Option<SessionError> {
        self.inner.error.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        if self.inner.finished.is_fired() {
            SessionState::Finished
        } else if self.inner.stop.is_fired() {
            SessionState::Stopping
        } else if self.inner.started.is_fired() {
            SessionState::Running
        } else if self.inner.launched.load(Ordering::Acquire) {
            SessionState::Starting
        } else {
            SessionState::Created
        }
    }

    /// Fire the stop signal on behalf of `err`
    ///
    /// `err` becomes the terminal error only if this call is the one that
    /// stopped the session. The error slot lock is held across both steps.
    pub(crate) fn stop_with(&self, err: SessionError) -> bool {
        let mut slot = self.inner.error.lock();
        if !self.inner.stop.fire() {
            tracing::debug!(session = %self.inner.id, "Already stopping, discarding: {}", err);
            return false;
        }
        if slot.is_none() {
            *slot = Some(err);
        }
        true
    }

    /// Stop the session when `ctx` is done, recording the context's error
    ///
    /// The watcher exits as soon as the session finishes.
    pub(crate) fn watch_context(&self, ctx: Context) {
        let session = self.clone();
        tokio::spawn(async move {
            let finished = session.finished();
            tokio::select! {
                biased;
                _ = finished.wait() => {}
                err = ctx.done() => {
                    if session.stop_with(SessionError::Cancelled(err)) {
                        tracing::info!(session = %session.id(), "Context done: {}", err);
                    }
                }
            }
        });
    }

    /// Launch the background task driving `tunnel`
    pub(crate) fn launch(&self, tunnel: Arc<dyn PodTunnel>, target: TunnelTarget) {
        if self.inner.launched.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            session.run(tunnel, target).await;
        });
    }

    async fn run(&self, tunnel: Arc<dyn PodTunnel>, target: TunnelTarget) {
        let ports = self.inner.ports;
        let stop = self.inner.stop.clone();
        let ready = self.inner.started.clone();

        tracing::info!(
            session = %self.inner.id,
            "Starting port forward {} to pod {} in namespace {}",
            ports,
            target.pod,
            target.namespace
        );

        let mut writer = tokio::spawn(async move {
            tunnel.forward(&target, &[ports], stop, ready).await
        });

        let outcome = tokio::select! {
            biased;
            joined = &mut writer => Some(joined),
            _ = self.inner.stop.wait() => None,
        };

        let joined = match outcome {
            Some(joined) => joined,
            // Stop won the race; the tunnel must still unwind before we report finished.
            None => writer.await,
        };

        if let Some(err) = flatten(joined) {
            self.stop_with(self.tunnel_error(err));
        }

        self.inner.stop.fire();
        {
            // A watcher that won the stop has written its error before releasing the lock.
            let _slot = self.inner.error.lock();
            self.inner.finished.fire();
        }

        match self.err() {
            Some(err) => tracing::warn!(session = %self.inner.id, "Port forward {} finished: {}", ports, err),
            None => tracing::info!(session = %self.inner.id, "Port forward {} finished", ports),
        }
    }

    fn tunnel_error(&self, err: TunnelError) -> SessionError {
        SessionError::Tunnel {
            pod: self.inner.pod.clone(),
            namespace: self.inner.namespace.clone(),
            local_port: self.inner.ports.local,
            remote_port: self.inner.ports.remote,
            source: Arc::new(err),
        }
    }
}

fn flatten(
    joined: Result<Result<(), TunnelError>, tokio::task::JoinError>,
) -> Option<TunnelError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(join_err) => Some(TunnelError::Aborted(join_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podforward_sync::ContextError;
    use std::time::Duration;

    /// Tunnel that becomes ready and then waits for stop, or fails on demand
    struct ScriptedTunnel {
        ready: bool,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl PodTunnel for ScriptedTunnel {
        async fn forward(
            &self,
            _target: &TunnelTarget,
            _ports: &[PortPair],
            stop: Signal,
            ready: Signal,
        ) -> Result<(), TunnelError> {
            if self.ready {
                ready.fire();
            }
            if let Some(msg) = self.fail_with {
                return Err(TunnelError::Remote(msg.to_string()));
            }
            stop.wait().await;
            Ok(())
        }
    }

    fn target() -> TunnelTarget {
        TunnelTarget::new("https://cluster:6443", "kafka-ns", "kafka-pod-0").unwrap()
    }

    fn session() -> PortForwardSession {
        PortForwardSession::new(&target(), PortPair::new(3999, 3000))
    }

    async fn join(signal: Signal) {
        tokio::time::timeout(Duration::from_secs(2), signal.wait())
            .await
            .expect("signal should fire");
    }

    #[test]
    fn test_new_session_state() {
        let session = session();
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.local_port(), 3999);
        assert_eq!(session.remote_port(), 3000);
        assert_eq!(session.pod(), "kafka-pod-0");
        assert_eq!(session.namespace(), "kafka-ns");
        assert!(session.err().is_none());
    }

    #[test]
    fn test_first_stop_cause_wins() {
        let session = session();
        assert!(session.stop_with(SessionError::Cancelled(ContextError::Canceled)));
        assert!(!session.stop_with(SessionError::Cancelled(ContextError::DeadlineExceeded)));
        assert_eq!(
            session.err().and_then(|e| e.context_error()),
            Some(ContextError::Canceled)
        );
    }

    #[test]
    fn test_explicit_stop_blocks_later_errors() {
        let session = session();
        session.stop();
        assert!(!session.stop_with(SessionError::Cancelled(ContextError::Canceled)));
        assert!(session.err().is_none());
    }

    #[test]
    fn test_stop_before_launch_is_stopping() {
        let session = session();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopping);
    }

    #[tokio::test]
    async fn test_lifecycle_start_stop() {
        let session = session();
        session.launch(Arc::new(ScriptedTunnel { ready: true, fail_with: None }), target());

        join(session.started()).await;
        assert_eq!(session.state(), SessionState::Running);

        session.stop();
        join(session.finished()).await;
        assert_eq!(session.state(), SessionState::Finished);
        assert!(session.err().is_none());
    }

    #[tokio::test]
    async fn test_tunnel_failure_is_captured() {
        let session = session();
        session.launch(
            Arc::new(ScriptedTunnel { ready: true, fail_with: Some("lost connection to pod") }),
            target(),
        );

        join(session.finished()).await;
        let err = session.err().expect("tunnel error should be captured");
        assert!(err.to_string().contains("lost connection to pod"));
        assert!(err.to_string().contains("kafka-pod-0"));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[tokio::test]
    async fn test_finished_without_started() {
        let session = session();
        session.launch(
            Arc::new(ScriptedTunnel { ready: false, fail_with: Some("upgrade refused") }),
            target(),
        );

        join(session.finished()).await;
        assert!(!session.started().is_fired());
        assert!(session.err().is_some());
    }

    #[tokio::test]
    async fn test_context_cancel_records_error() {
        let session = session();
        let (ctx, cancel) = Context::background().with_cancel();
        session.watch_context(ctx);
        session.launch(Arc::new(ScriptedTunnel { ready: false, fail_with: None }), target());

        cancel.cancel();
        join(session.finished()).await;
        assert_eq!(
            session.err().and_then(|e| e.context_error()),
            Some(ContextError::Canceled)
        );
    }

    #[tokio::test]
    async fn test_launch_twice_is_ignored() {
        let session = session();
        let tunnel: Arc<dyn PodTunnel> = Arc::new(ScriptedTunnel { ready: true, fail_with: None });
        session.launch(tunnel.clone(), target());
        session.launch(tunnel, target());

        join(session.started()).await;
        session.stop();
        join(session.finished()).await;
    }
}
