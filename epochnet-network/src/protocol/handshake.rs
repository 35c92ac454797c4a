use epochnet_codec::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
};

use super::{Address, Hash};

/// Payload of the `Version` command, the opening move of every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: u32,
    pub timestamp: i64,
    pub capabilities: u64,
    pub sender_address: Address,
    pub receiver_address: Address,
    pub user_agent: String,
    pub last_epoch: u32,
    pub genesis: Hash,
    pub nonce: u64,
}

const VERSION_FIELDS: &[&str] = &[
    "version",
    "timestamp",
    "capabilities",
    "sender_address",
    "receiver_address",
    "user_agent",
    "last_epoch",
    "genesis",
    "nonce",
];

impl Encode for Version {
    fn encode(&self, e: &mut Encoder) {
        e.table(VERSION_FIELDS.len())
            .u32(self.version)
            .i64(self.timestamp)
            .u64(self.capabilities)
            .encode(&self.sender_address)
            .encode(&self.receiver_address)
            .str(&self.user_agent)
            .u32(self.last_epoch)
            .encode(&self.genesis)
            .u64(self.nonce);
    }
}

impl Decode for Version {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("Version", VERSION_FIELDS)?;

        let version = t.required(d)?;
        let timestamp = t.required(d)?;
        let capabilities = t.required(d)?;
        let sender_address = t.required(d)?;
        let receiver_address = t.required(d)?;
        let user_agent = t.required(d)?;
        let last_epoch = t.required(d)?;
        let genesis = t.required(d)?;
        let nonce = t.required(d)?;

        t.finish(d)?;

        Ok(Self {
            version,
            timestamp,
            capabilities,
            sender_address,
            receiver_address,
            user_agent,
            last_epoch,
            genesis,
            nonce,
        })
    }
}
