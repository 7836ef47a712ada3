pub mod config;
pub mod error;
pub mod forwarder;
pub mod kubernetes;
pub mod port;
pub mod session;
pub mod target;

pub use config::ForwarderConfig;
pub use error::{ErrorKind, ForwardError, SessionError};
pub use forwarder::PortForwarder;
pub use port::{PortAllocator, TcpPortAllocator};
pub use session::{PortForwardSession, SessionState};
pub use target::TargetPod;

pub use podforward_sync::{CancelHandle, Context, ContextError, Signal};
