use epochnet_codec::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
};

use super::{Address, Block, CheckpointBeacon, InvVector, Version};

pub type Nonce = u64;

/// Network identifier carried by every message
pub type Magic = u16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Version(Version),
    Verack,
    GetPeers,
    Peers(Vec<Address>),
    Ping(Nonce),
    Pong(Nonce),
    Block(Block),
    Inv(Vec<InvVector>),
    GetData(Vec<InvVector>),
    GetBlocks(CheckpointBeacon),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Version(_) => "Version",
            Command::Verack => "Verack",
            Command::GetPeers => "GetPeers",
            Command::Peers(_) => "Peers",
            Command::Ping(_) => "Ping",
            Command::Pong(_) => "Pong",
            Command::Block(_) => "Block",
            Command::Inv(_) => "Inv",
            Command::GetData(_) => "GetData",
            Command::GetBlocks(_) => "GetBlocks",
        }
    }
}

const EMPTY_FIELDS: &[&str] = &[];
const PEERS_FIELDS: &[&str] = &["peers"];
const NONCE_FIELDS: &[&str] = &["nonce"];
const INVENTORY_FIELDS: &[&str] = &["inventory"];
const GET_BLOCKS_FIELDS: &[&str] = &["highest_block_checkpoint"];

fn decode_empty(d: &mut Decoder<'_>, name: &'static str) -> Result<(), decode::Error> {
    let t = d.table(name, EMPTY_FIELDS)?;
    t.finish(d)
}

fn decode_single<T: Decode>(
    d: &mut Decoder<'_>,
    name: &'static str,
    fields: &'static [&'static str],
) -> Result<T, decode::Error> {
    let mut t = d.table(name, fields)?;
    let value = t.required(d)?;
    t.finish(d)?;

    Ok(value)
}

impl Encode for Command {
    fn encode(&self, e: &mut Encoder) {
        match self {
            Command::Version(x) => {
                e.tag(0).encode(x);
            }
            Command::Verack => {
                e.tag(1).table(0);
            }
            Command::GetPeers => {
                e.tag(2).table(0);
            }
            Command::Peers(x) => {
                e.tag(3).table(1).encode(x);
            }
            Command::Ping(nonce) => {
                e.tag(4).table(1).u64(*nonce);
            }
            Command::Pong(nonce) => {
                e.tag(5).table(1).u64(*nonce);
            }
            Command::Block(x) => {
                e.tag(6).encode(x);
            }
            Command::Inv(x) => {
                e.tag(7).table(1).encode(x);
            }
            Command::GetData(x) => {
                e.tag(8).table(1).encode(x);
            }
            Command::GetBlocks(x) => {
                e.tag(9).table(1).encode(x);
            }
        }
    }
}

impl Decode for Command {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let label = d.tag()?;

        match label {
            0 => Ok(Command::Version(d.decode()?)),
            1 => decode_empty(d, "Verack").map(|_| Command::Verack),
            2 => decode_empty(d, "GetPeers").map(|_| Command::GetPeers),
            3 => decode_single(d, "Peers", PEERS_FIELDS).map(Command::Peers),
            4 => decode_single(d, "Ping", NONCE_FIELDS).map(Command::Ping),
            5 => decode_single(d, "Pong", NONCE_FIELDS).map(Command::Pong),
            6 => Ok(Command::Block(d.decode()?)),
            7 => decode_single(d, "Inv", INVENTORY_FIELDS).map(Command::Inv),
            8 => decode_single(d, "GetData", INVENTORY_FIELDS).map(Command::GetData),
            9 => decode_single(d, "GetBlocks", GET_BLOCKS_FIELDS).map(Command::GetBlocks),
            x => Err(decode::Error::unknown_variant("Command", x)),
        }
    }
}

/// Envelope of everything exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub magic: Magic,
    pub command: Command,
}

impl Message {
    pub fn new(magic: Magic, command: Command) -> Self {
        Self { magic, command }
    }

    /// Reads the network id without touching the rest of the message
    pub fn peek_magic(bytes: &[u8]) -> Result<Magic, decode::Error> {
        Decoder::new(bytes).u16()
    }
}

impl Encode for Message {
    fn encode(&self, e: &mut Encoder) {
        e.u16(self.magic).encode(&self.command);
    }
}

impl Decode for Message {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let magic = d.u16()?;
        let command = d.decode()?;

        Ok(Self { magic, command })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{block::tests::sample_block, Hash, InvType};
    use epochnet_codec::{from_slice, from_slice_with_limits, to_vec, Limits};
    use std::net::SocketAddr;

    const MAGIC: Magic = 0xc0de;

    fn address(text: &str) -> Address {
        text.parse::<SocketAddr>().unwrap().into()
    }

    pub fn sample_version(nonce: u64) -> Version {
        Version {
            version: 3,
            timestamp: 1_700_000_000,
            capabilities: 1,
            sender_address: address("10.0.0.1:21337"),
            receiver_address: address("[2001:db8::7]:21337"),
            user_agent: "epochnet/0.1".into(),
            last_epoch: 12,
            genesis: Hash::Sha256([7; 32]),
            nonce,
        }
    }

    fn inventory() -> Vec<InvVector> {
        vec![
            InvVector::block(Hash::Sha256([1; 32])),
            InvVector {
                inv_type: InvType::Tx,
                hash: Hash::Sha256([2; 32]),
            },
        ]
    }

    #[test]
    fn every_command_survives_the_wire() {
        let commands = vec![
            Command::Version(sample_version(5)),
            Command::Verack,
            Command::GetPeers,
            Command::Peers(vec![address("10.0.0.2:1"), address("[::1]:2")]),
            Command::Ping(42),
            Command::Pong(42),
            Command::Block(sample_block(8, 3)),
            Command::Inv(inventory()),
            Command::GetData(inventory()),
            Command::GetBlocks(CheckpointBeacon {
                checkpoint: 8,
                hash_prev_block: Hash::Sha256([3; 32]),
            }),
        ];

        for command in commands {
            let msg = Message::new(MAGIC, command);
            let bytes = to_vec(&msg);

            assert_eq!(Message::peek_magic(&bytes).unwrap(), MAGIC);
            assert_eq!(from_slice::<Message>(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn unknown_command_tag() {
        let mut e = Encoder::new();
        e.u16(MAGIC).tag(10).table(0);

        let err = from_slice::<Message>(&e.into_inner()).unwrap_err();

        assert_eq!(
            err,
            decode::Error::UnknownVariant {
                union: "Command",
                tag: 10
            }
        );
    }

    #[test]
    fn version_without_user_agent() {
        let v = sample_version(1);

        // every bit set except the one for user_agent
        let mask: u16 = 0b1_1101_1111;

        let mut e = Encoder::new();
        e.u16(MAGIC)
            .tag(0)
            .u16(mask)
            .u32(v.version)
            .i64(v.timestamp)
            .u64(v.capabilities)
            .encode(&v.sender_address)
            .encode(&v.receiver_address)
            .u32(v.last_epoch)
            .encode(&v.genesis)
            .u64(v.nonce);

        let err = from_slice::<Message>(&e.into_inner()).unwrap_err();

        assert_eq!(
            err,
            decode::Error::MissingRequiredField {
                table: "Version",
                field: "user_agent"
            }
        );
    }

    #[test]
    fn peers_over_limit_is_rejected_before_materializing() {
        let limits = Limits {
            max_sequence_len: 10,
            ..Limits::default()
        };

        // a count far beyond the limit and no elements behind it
        let mut e = Encoder::new();
        e.u16(MAGIC).tag(3).table(1).u32(1_000_000);

        let err = from_slice_with_limits::<Message>(&e.into_inner(), limits).unwrap_err();

        assert!(matches!(
            err,
            decode::Error::ResourceLimitExceeded {
                what: "sequence length",
                actual: 1_000_000,
                limit: 10
            }
        ));
    }

    #[test]
    fn empty_payload_with_fields_is_malformed() {
        let mut e = Encoder::new();
        e.u16(MAGIC).tag(1).u16(0b1);

        let err = from_slice::<Message>(&e.into_inner()).unwrap_err();
        assert!(matches!(err, decode::Error::Malformed(_)));
    }
}
