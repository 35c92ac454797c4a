use std::{fmt, str::FromStr};

use epochnet_codec::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
    utils::Bytes,
};
use serde::{Deserialize, Serialize};

pub const SHA256_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha256,
}

impl HashType {
    pub fn digest_len(&self) -> usize {
        match self {
            HashType::Sha256 => SHA256_LEN,
        }
    }
}

impl Encode for HashType {
    fn encode(&self, e: &mut Encoder) {
        match self {
            HashType::Sha256 => e.tag(0),
        };
    }
}

impl Decode for HashType {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        match d.tag()? {
            0 => Ok(HashType::Sha256),
            x => Err(decode::Error::unknown_variant("HashType", x)),
        }
    }
}

/// A digest tagged with the function that produced it
///
/// On the wire the digest travels as a length-prefixed byte string; the length
/// must match the digest length of the hash type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String")]
#[serde(try_from = "String")]
pub enum Hash {
    Sha256([u8; SHA256_LEN]),
}

impl Hash {
    pub fn hash_type(&self) -> HashType {
        match self {
            Hash::Sha256(_) => HashType::Sha256,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Hash::Sha256(x) => x,
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.hash_type(), self)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseHashError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;

        if bytes.len() != SHA256_LEN {
            return Err(ParseHashError::Length {
                expected: SHA256_LEN,
                actual: bytes.len(),
            });
        }

        let mut digest = [0u8; SHA256_LEN];
        digest.copy_from_slice(&bytes);

        Ok(Hash::Sha256(digest))
    }
}

impl TryFrom<String> for Hash {
    type Error = ParseHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Hash> for String {
    fn from(value: Hash) -> Self {
        value.to_string()
    }
}

const HASH_FIELDS: &[&str] = &["type", "bytes"];

impl Encode for Hash {
    fn encode(&self, e: &mut Encoder) {
        e.table(2).encode(&self.hash_type()).bytes(self.as_bytes());
    }
}

impl Decode for Hash {
    const MIN_LEN: usize = 2 + 1 + 4 + SHA256_LEN;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("Hash", HASH_FIELDS)?;
        let hash_type: HashType = t.required(d)?;
        let bytes: Bytes = t.required(d)?;
        t.finish(d)?;

        if bytes.len() != hash_type.digest_len() {
            return Err(decode::Error::message(format!(
                "{hash_type:?} digest must be {} bytes, got {}",
                hash_type.digest_len(),
                bytes.len()
            )));
        }

        match hash_type {
            HashType::Sha256 => {
                let mut digest = [0u8; SHA256_LEN];
                digest.copy_from_slice(&bytes);
                Ok(Hash::Sha256(digest))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvType {
    Error,
    Tx,
    Block,
    DataRequest,
    DataResult,
}

impl Encode for InvType {
    fn encode(&self, e: &mut Encoder) {
        let tag = match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::DataRequest => 3,
            InvType::DataResult => 4,
        };

        e.tag(tag);
    }
}

impl Decode for InvType {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        match d.tag()? {
            0 => Ok(InvType::Error),
            1 => Ok(InvType::Tx),
            2 => Ok(InvType::Block),
            3 => Ok(InvType::DataRequest),
            4 => Ok(InvType::DataResult),
            x => Err(decode::Error::unknown_variant("InvType", x)),
        }
    }
}

/// Identifies an item of inventory a peer has or wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvVector {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvVector {
    pub fn block(hash: Hash) -> Self {
        Self {
            inv_type: InvType::Block,
            hash,
        }
    }
}

impl fmt::Display for InvVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.inv_type, self.hash)
    }
}

const INV_VECTOR_FIELDS: &[&str] = &["type", "hash"];

impl Encode for InvVector {
    fn encode(&self, e: &mut Encoder) {
        e.table(2).encode(&self.inv_type).encode(&self.hash);
    }
}

impl Decode for InvVector {
    const MIN_LEN: usize = 2 + 1 + Hash::MIN_LEN;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("InvVector", INV_VECTOR_FIELDS)?;
        let inv_type = t.required(d)?;
        let hash = t.required(d)?;
        t.finish(d)?;

        Ok(Self { inv_type, hash })
    }
}

/// Position of a block in the chain: an epoch and the block it builds upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointBeacon {
    pub checkpoint: u32,
    pub hash_prev_block: Hash,
}

const CHECKPOINT_BEACON_FIELDS: &[&str] = &["checkpoint", "hash_prev_block"];

impl Encode for CheckpointBeacon {
    fn encode(&self, e: &mut Encoder) {
        e.table(2)
            .u32(self.checkpoint)
            .encode(&self.hash_prev_block);
    }
}

impl Decode for CheckpointBeacon {
    const MIN_LEN: usize = 2 + 4 + Hash::MIN_LEN;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("CheckpointBeacon", CHECKPOINT_BEACON_FIELDS)?;
        let checkpoint = t.required(d)?;
        let hash_prev_block = t.required(d)?;
        t.finish(d)?;

        Ok(Self {
            checkpoint,
            hash_prev_block,
        })
    }
}
