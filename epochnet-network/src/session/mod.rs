//! Per-connection state machines
//!
//! Each session is sans-IO: it consumes decoded commands and the current time
//! and hands back the commands to send. Wiring them to a transport is the job
//! of the [`crate::manager`].

pub mod handshake;
pub mod liveness;
pub mod sync;

pub use handshake::HandshakeSession;
pub use liveness::LivenessMonitor;
pub use sync::SyncSession;
