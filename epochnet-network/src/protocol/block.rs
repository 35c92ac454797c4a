use cryptoxide::{digest::Digest as _, sha2::Sha256};
use epochnet_codec::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
    to_vec,
    utils::Bytes,
};

use super::{CheckpointBeacon, Hash, InvVector, SHA256_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secp256k1Signature {
    pub r: Bytes,
    pub s: Bytes,
}

const SECP256K1_SIGNATURE_FIELDS: &[&str] = &["r", "s"];

impl Encode for Secp256k1Signature {
    fn encode(&self, e: &mut Encoder) {
        e.table(2).encode(&self.r).encode(&self.s);
    }
}

impl Decode for Secp256k1Signature {
    const MIN_LEN: usize = 2 + 4 + 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("Secp256k1Signature", SECP256K1_SIGNATURE_FIELDS)?;
        let r = t.required(d)?;
        let s = t.required(d)?;
        t.finish(d)?;

        Ok(Self { r, s })
    }
}

/// Signature bytes as produced by the block producer; never verified here
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Secp256k1(Secp256k1Signature),
}

impl Encode for Signature {
    fn encode(&self, e: &mut Encoder) {
        match self {
            Signature::Secp256k1(x) => e.tag(0).encode(x),
        };
    }
}

impl Decode for Signature {
    const MIN_LEN: usize = 1 + Secp256k1Signature::MIN_LEN;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        match d.tag()? {
            0 => Ok(Signature::Secp256k1(d.decode()?)),
            x => Err(decode::Error::unknown_variant("Signature", x)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipProof {
    pub block_sig: Signature,
    pub influence: u64,
}

const LEADERSHIP_PROOF_FIELDS: &[&str] = &["block_sig", "influence"];

impl Encode for LeadershipProof {
    fn encode(&self, e: &mut Encoder) {
        e.table(2).encode(&self.block_sig).u64(self.influence);
    }
}

impl Decode for LeadershipProof {
    const MIN_LEN: usize = 2 + Signature::MIN_LEN + 8;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("LeadershipProof", LEADERSHIP_PROOF_FIELDS)?;
        let block_sig = t.required(d)?;
        let influence = t.required(d)?;
        t.finish(d)?;

        Ok(Self {
            block_sig,
            influence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub beacon: CheckpointBeacon,
    pub hash_merkle_root: Hash,
    pub proof: LeadershipProof,
}

impl BlockHeader {
    /// SHA256 of the encoded header, the identity of the block it heads
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.input(&to_vec(self));

        let mut digest = [0u8; SHA256_LEN];
        hasher.result(&mut digest);

        Hash::Sha256(digest)
    }
}

const BLOCK_HEADER_FIELDS: &[&str] = &["version", "beacon", "hash_merkle_root", "proof"];

impl Encode for BlockHeader {
    fn encode(&self, e: &mut Encoder) {
        e.table(4)
            .u32(self.version)
            .encode(&self.beacon)
            .encode(&self.hash_merkle_root)
            .encode(&self.proof);
    }
}

impl Decode for BlockHeader {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("BlockHeader", BLOCK_HEADER_FIELDS)?;
        let version = t.required(d)?;
        let beacon = t.required(d)?;
        let hash_merkle_root = t.required(d)?;
        let proof = t.required(d)?;
        t.finish(d)?;

        Ok(Self {
            version,
            beacon,
            hash_merkle_root,
            proof,
        })
    }
}

/// Transaction body, carried as an opaque blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction(pub Bytes);

impl Encode for Transaction {
    fn encode(&self, e: &mut Encoder) {
        e.encode(&self.0);
    }
}

impl Decode for Transaction {
    const MIN_LEN: usize = 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        d.decode().map(Transaction)
    }
}

/// A block as relayed between peers
///
/// The transaction count travels explicitly next to the transaction list and
/// both must agree. In memory the count is derived from the list so the two
/// can't drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txns: Vec<Transaction>,
}

impl Block {
    pub fn txn_count(&self) -> u32 {
        self.txns.len() as u32
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn inv_vector(&self) -> InvVector {
        InvVector::block(self.hash())
    }
}

const BLOCK_FIELDS: &[&str] = &["header", "txn_count", "txns"];

impl Encode for Block {
    fn encode(&self, e: &mut Encoder) {
        e.table(3)
            .encode(&self.header)
            .u32(self.txn_count())
            .encode(&self.txns);
    }
}

impl Decode for Block {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        let mut t = d.table("Block", BLOCK_FIELDS)?;
        let header = t.required(d)?;
        let txn_count: u32 = t.required(d)?;
        let txns: Vec<Transaction> = t.required(d)?;
        t.finish(d)?;

        if txn_count as usize != txns.len() {
            return Err(decode::Error::message(format!(
                "block declares {txn_count} transactions but carries {}",
                txns.len()
            )));
        }

        Ok(Self { header, txns })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use epochnet_codec::{from_slice, from_slice_with_limits, Limits};

    pub fn sample_block(checkpoint: u32, txns: usize) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                beacon: CheckpointBeacon {
                    checkpoint,
                    hash_prev_block: Hash::Sha256([checkpoint as u8; 32]),
                },
                hash_merkle_root: Hash::Sha256([0xaa; 32]),
                proof: LeadershipProof {
                    block_sig: Signature::Secp256k1(Secp256k1Signature {
                        r: vec![1; 32].into(),
                        s: vec![2; 32].into(),
                    }),
                    influence: 99,
                },
            },
            txns: (0..txns)
                .map(|i| Transaction(vec![i as u8; 10].into()))
                .collect(),
        }
    }

    #[test]
    fn txn_count_mismatch_is_malformed() {
        let block = sample_block(3, 2);

        let mut e = Encoder::new();
        e.table(3).encode(&block.header).u32(5).encode(&block.txns);

        let err = from_slice::<Block>(&e.into_inner()).unwrap_err();
        assert!(matches!(err, decode::Error::Malformed(_)));
    }

    #[test]
    fn block_identity_follows_header_only() {
        let a = sample_block(3, 2);
        let mut b = a.clone();
        b.txns.pop();

        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), sample_block(4, 2).hash());
    }

    #[test]
    fn deep_block_hits_depth_limit() {
        let bytes = to_vec(&sample_block(1, 1));

        let limits = Limits {
            max_depth: 2,
            ..Limits::default()
        };

        let err = from_slice_with_limits::<Block>(&bytes, limits).unwrap_err();

        assert!(matches!(
            err,
            decode::Error::ResourceLimitExceeded {
                what: "nesting depth",
                ..
            }
        ));

        assert!(from_slice::<Block>(&bytes).is_ok());
    }

    #[test]
    fn unknown_signature_variant() {
        let mut e = Encoder::new();
        e.table(2).tag(7);

        let err = from_slice::<LeadershipProof>(&e.into_inner()).unwrap_err();

        assert_eq!(
            err,
            decode::Error::UnknownVariant {
                union: "Signature",
                tag: 7
            }
        );
    }
}
