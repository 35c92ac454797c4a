//! Values used for every setting the configuration file leaves out
//!
//! Each [`Environment`](crate::config::Environment) has its own set. Most
//! settings are shared; networks differ in their identity (magic, genesis),
//! their default port and their seed peers.

use std::net::SocketAddr;

use epochnet_network::protocol::{Hash, Magic};

pub trait Defaults {
    fn magic(&self) -> Magic;

    fn genesis(&self) -> Hash;

    fn server_addr(&self) -> SocketAddr;

    fn known_peers(&self) -> Vec<SocketAddr> {
        vec![]
    }

    fn inbound_limit(&self) -> usize {
        128
    }

    fn outbound_limit(&self) -> usize {
        8
    }

    fn bootstrap_peers_period_seconds(&self) -> u64 {
        5
    }

    fn handshake_timeout_seconds(&self) -> u64 {
        10
    }

    fn connect_timeout_seconds(&self) -> u64 {
        5
    }

    fn ping_interval_seconds(&self) -> u64 {
        30
    }

    fn pong_timeout_seconds(&self) -> u64 {
        10
    }

    fn fetch_timeout_seconds(&self) -> u64 {
        30
    }

    fn max_inflight_per_peer(&self) -> usize {
        64
    }

    fn max_unsolicited_blocks(&self) -> usize {
        8
    }

    fn address_book_capacity(&self) -> usize {
        1024
    }

    fn max_peers_response(&self) -> usize {
        32
    }

    fn ban_threshold(&self) -> u32 {
        3
    }

    fn max_message_bytes(&self) -> usize {
        4 * 1024 * 1024
    }

    fn max_sequence_len(&self) -> usize {
        65_536
    }

    fn max_depth(&self) -> usize {
        16
    }

    fn protocol_version(&self) -> u32 {
        1
    }

    fn min_protocol_version(&self) -> u32 {
        1
    }

    fn user_agent(&self) -> String {
        concat!("epochnet/", env!("CARGO_PKG_VERSION")).to_string()
    }

    fn capabilities(&self) -> u64 {
        0
    }
}

pub struct Mainnet;

impl Defaults for Mainnet {
    fn magic(&self) -> Magic {
        0x0e01
    }

    fn genesis(&self) -> Hash {
        Hash::Sha256([
            0x6c, 0xa2, 0x67, 0xd6, 0x1b, 0x50, 0x8e, 0x1f, 0x93, 0x5c, 0x02, 0x7a, 0xf4, 0x41,
            0x0c, 0xd8, 0x2e, 0x97, 0x53, 0x0b, 0xa1, 0x6f, 0x3d, 0xc9, 0x74, 0x05, 0xbe, 0x28,
            0x8a, 0xe3, 0x19, 0x60,
        ])
    }

    fn server_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 21337))
    }
}

pub struct Testnet;

impl Defaults for Testnet {
    fn magic(&self) -> Magic {
        0x0e02
    }

    fn genesis(&self) -> Hash {
        Hash::Sha256([
            0x3f, 0x0b, 0x8d, 0x21, 0xc4, 0x77, 0x9e, 0x15, 0x62, 0xad, 0x38, 0xf0, 0x0e, 0x5b,
            0xd3, 0x86, 0x49, 0x1a, 0xc7, 0x2c, 0x90, 0x6e, 0x04, 0xbb, 0x5f, 0x13, 0xe8, 0x72,
            0xa6, 0x39, 0xdd, 0x0c,
        ])
    }

    fn server_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 21338))
    }

    fn outbound_limit(&self) -> usize {
        4
    }
}
