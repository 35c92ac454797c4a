//! Networking stack of an epochnet node
//!
//! The crate is layered bottom-up:
//!
//! - [`protocol`]: wire types, their codecs and the error taxonomy;
//! - [`session`]: sans-IO state machines run once per connection;
//! - [`addressbook`] and [`inflight`]: state shared across connections;
//! - [`manager`]: owns all of the above and turns inbound bytes into
//!   outbound commands;
//! - [`bearer`] and [`node`]: the tokio driver moving bytes between sockets
//!   and the manager.

use std::{fmt, net::SocketAddr};

pub mod addressbook;
pub mod bearer;
pub mod inflight;
pub mod manager;
pub mod node;
pub mod protocol;
pub mod session;

pub use protocol::Error;

/// A unique identifier for a peer connection, its remote socket address
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct PeerId(SocketAddr);

impl PeerId {
    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> protocol::IpAddress {
        self.0.ip().into()
    }
}

impl From<SocketAddr> for PeerId {
    fn from(value: SocketAddr) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
