pub mod process;

pub use process::{PortForwardSession, SessionState};
