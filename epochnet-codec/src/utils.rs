use std::{fmt, ops::Deref, str::FromStr};

use crate::{
    decode::{self, Decode, Decoder},
    encode::{Encode, Encoder},
};

/// Length-prefixed opaque byte string
///
/// Displays as hex.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(xs: Vec<u8>) -> Self {
        Bytes(xs)
    }
}

impl From<&[u8]> for Bytes {
    fn from(xs: &[u8]) -> Self {
        Bytes(xs.to_vec())
    }
}

impl From<Bytes> for Vec<u8> {
    fn from(b: Bytes) -> Self {
        b.0
    }
}

impl Deref for Bytes {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for Bytes {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Bytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(Bytes)
    }
}

impl From<Bytes> for String {
    fn from(b: Bytes) -> Self {
        hex::encode(b.0)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bytes").field(&hex::encode(&self.0)).finish()
    }
}

impl Encode for Bytes {
    fn encode(&self, e: &mut Encoder) {
        e.bytes(&self.0);
    }
}

impl Decode for Bytes {
    const MIN_LEN: usize = 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, decode::Error> {
        d.bytes().map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_hex() {
        let b = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(b.to_string(), "deadbeef");
        assert_eq!("deadbeef".parse::<Bytes>().unwrap(), b);
    }

    #[test]
    fn encodes_with_length_prefix() {
        let b = Bytes::from(vec![1, 2, 3]);
        assert_eq!(crate::to_vec(&b), vec![3, 0, 0, 0, 1, 2, 3]);
    }
}
