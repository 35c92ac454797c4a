//! Node configuration
//!
//! Files are parsed into a [`partial::Config`] where every setting is
//! optional. [`Config::from_partial`] then fills the gaps with the
//! [`Defaults`] of the selected [`Environment`].

use std::{net::SocketAddr, time::Duration};

use epochnet_codec::Limits;
use epochnet_network::{
    addressbook::AddressBookConfig,
    manager,
    node::NodeConfig,
    protocol::{Hash, Magic},
    session::sync::SyncConfig,
};
use serde::{Deserialize, Serialize};

use crate::defaults::{Defaults, Mainnet, Testnet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Mainnet,
    Testnet,
}

impl Environment {
    pub fn defaults(&self) -> &'static dyn Defaults {
        match self {
            Environment::Mainnet => &Mainnet,
            Environment::Testnet => &Testnet,
        }
    }
}

/// Configuration exactly as written in a file, nothing filled in
pub mod partial {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Config {
        pub environment: Environment,
        pub connections: Connections,
        pub codec: Codec,
        pub protocol: Protocol,
    }

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Connections {
        pub server_addr: Option<SocketAddr>,
        pub inbound_limit: Option<usize>,
        pub outbound_limit: Option<usize>,
        pub known_peers: Option<Vec<SocketAddr>>,
        pub bootstrap_peers_period_seconds: Option<u64>,
        pub handshake_timeout_seconds: Option<u64>,
        pub connect_timeout_seconds: Option<u64>,
        pub ping_interval_seconds: Option<u64>,
        pub pong_timeout_seconds: Option<u64>,
        pub fetch_timeout_seconds: Option<u64>,
        pub max_inflight_per_peer: Option<usize>,
        pub max_unsolicited_blocks: Option<usize>,
        pub address_book_capacity: Option<usize>,
        pub max_peers_response: Option<usize>,
        pub ban_threshold: Option<u32>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Codec {
        pub max_message_bytes: Option<usize>,
        pub max_sequence_len: Option<usize>,
        pub max_depth: Option<usize>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct Protocol {
        pub magic: Option<Magic>,
        pub version: Option<u32>,
        pub min_version: Option<u32>,
        pub user_agent: Option<String>,
        pub capabilities: Option<u64>,
        pub genesis: Option<Hash>,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub environment: Environment,
    pub connections: Connections,
    pub codec: Limits,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connections {
    pub server_addr: SocketAddr,
    pub inbound_limit: usize,
    pub outbound_limit: usize,
    pub known_peers: Vec<SocketAddr>,
    pub bootstrap_peers_period: Duration,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub fetch_timeout: Duration,
    pub max_inflight_per_peer: usize,
    pub max_unsolicited_blocks: usize,
    pub address_book_capacity: usize,
    pub max_peers_response: usize,
    pub ban_threshold: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    pub magic: Magic,
    pub version: u32,
    pub min_version: u32,
    pub user_agent: String,
    pub capabilities: u64,
    pub genesis: Hash,
}

impl Config {
    pub fn from_partial(config: &partial::Config) -> Self {
        let defaults = config.environment.defaults();

        Self {
            environment: config.environment,
            connections: Connections::from_partial(&config.connections, defaults),
            codec: codec_from_partial(&config.codec, defaults),
            protocol: Protocol::from_partial(&config.protocol, defaults),
        }
    }

    /// Settings of the sans-IO connection manager
    pub fn manager_config(&self) -> manager::Config {
        let connections = &self.connections;

        manager::Config {
            magic: self.protocol.magic,
            protocol_version: self.protocol.version,
            min_protocol_version: self.protocol.min_version,
            capabilities: self.protocol.capabilities,
            user_agent: self.protocol.user_agent.clone(),
            genesis: self.protocol.genesis,
            limits: self.codec,
            handshake_timeout: connections.handshake_timeout,
            ping_interval: connections.ping_interval,
            pong_timeout: connections.pong_timeout,
            sync: SyncConfig {
                max_inflight: connections.max_inflight_per_peer,
                fetch_timeout: connections.fetch_timeout,
                max_unsolicited: connections.max_unsolicited_blocks,
            },
            address_book: AddressBookConfig {
                capacity: connections.address_book_capacity,
                max_peers_response: connections.max_peers_response,
            },
            inbound_limit: connections.inbound_limit,
            outbound_limit: connections.outbound_limit,
            ban_threshold: connections.ban_threshold,
            ..Default::default()
        }
    }

    /// Settings of the tokio driver, listening on `server_addr`
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen_addr: Some(self.connections.server_addr),
            known_peers: self.connections.known_peers.clone(),
            connect_timeout: self.connections.connect_timeout,
            bootstrap_period: self.connections.bootstrap_peers_period,
            manager: self.manager_config(),
            ..Default::default()
        }
    }
}

impl Connections {
    fn from_partial(config: &partial::Connections, defaults: &dyn Defaults) -> Self {
        let seconds =
            |value: Option<u64>, default: u64| Duration::from_secs(value.unwrap_or(default));

        Self {
            server_addr: config
                .server_addr
                .unwrap_or_else(|| defaults.server_addr()),
            inbound_limit: config
                .inbound_limit
                .unwrap_or_else(|| defaults.inbound_limit()),
            outbound_limit: config
                .outbound_limit
                .unwrap_or_else(|| defaults.outbound_limit()),
            known_peers: config
                .known_peers
                .clone()
                .unwrap_or_else(|| defaults.known_peers()),
            bootstrap_peers_period: seconds(
                config.bootstrap_peers_period_seconds,
                defaults.bootstrap_peers_period_seconds(),
            ),
            handshake_timeout: seconds(
                config.handshake_timeout_seconds,
                defaults.handshake_timeout_seconds(),
            ),
            connect_timeout: seconds(
                config.connect_timeout_seconds,
                defaults.connect_timeout_seconds(),
            ),
            ping_interval: seconds(config.ping_interval_seconds, defaults.ping_interval_seconds()),
            pong_timeout: seconds(config.pong_timeout_seconds, defaults.pong_timeout_seconds()),
            fetch_timeout: seconds(config.fetch_timeout_seconds, defaults.fetch_timeout_seconds()),
            max_inflight_per_peer: config
                .max_inflight_per_peer
                .unwrap_or_else(|| defaults.max_inflight_per_peer()),
            max_unsolicited_blocks: config
                .max_unsolicited_blocks
                .unwrap_or_else(|| defaults.max_unsolicited_blocks()),
            address_book_capacity: config
                .address_book_capacity
                .unwrap_or_else(|| defaults.address_book_capacity()),
            max_peers_response: config
                .max_peers_response
                .unwrap_or_else(|| defaults.max_peers_response()),
            ban_threshold: config
                .ban_threshold
                .unwrap_or_else(|| defaults.ban_threshold()),
        }
    }
}

fn codec_from_partial(config: &partial::Codec, defaults: &dyn Defaults) -> Limits {
    Limits {
        max_message_bytes: config
            .max_message_bytes
            .unwrap_or_else(|| defaults.max_message_bytes()),
        max_sequence_len: config
            .max_sequence_len
            .unwrap_or_else(|| defaults.max_sequence_len()),
        max_depth: config.max_depth.unwrap_or_else(|| defaults.max_depth()),
    }
}

impl Protocol {
    fn from_partial(config: &partial::Protocol, defaults: &dyn Defaults) -> Self {
        Self {
            magic: config.magic.unwrap_or_else(|| defaults.magic()),
            version: config
                .version
                .unwrap_or_else(|| defaults.protocol_version()),
            min_version: config
                .min_version
                .unwrap_or_else(|| defaults.min_protocol_version()),
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| defaults.user_agent()),
            capabilities: config
                .capabilities
                .unwrap_or_else(|| defaults.capabilities()),
            genesis: config.genesis.unwrap_or_else(|| defaults.genesis()),
        }
    }
}
