//! Binary encoding shared by every epochnet wire type
//!
//! The format is version-locked:
//!
//! - every multi-byte integer is written **little-endian** with a fixed width;
//! - byte strings, UTF-8 strings and sequences carry a `u32` length prefix;
//! - unions carry a one byte discriminant followed by the variant payload;
//! - tables (structs) carry a `u16` presence mask followed by the present
//!   fields in declaration order. Every field of every table is required.
//!
//! Decoding runs against [`Limits`] so that input coming from untrusted peers
//! can't make us allocate or nest beyond what the node is configured for.

/// Bounded decoder and the decode error taxonomy
pub mod decode;

/// Encoder for the wire format
pub mod encode;

/// Round-trip friendly common helper structs
pub mod utils;

pub use decode::{Decode, Decoder, Limits, Table};
pub use encode::{Encode, Encoder};

pub trait Fragment: Sized + Decode + Encode {}

impl<T> Fragment for T where T: Decode + Encode + Sized {}

/// Encodes a value into a fresh buffer
pub fn to_vec<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut e = Encoder::new();
    value.encode(&mut e);
    e.into_inner()
}

/// Decodes a complete value using the default [`Limits`]
pub fn from_slice<T: Decode>(bytes: &[u8]) -> Result<T, decode::Error> {
    from_slice_with_limits(bytes, Limits::default())
}

/// Decodes a complete value, failing if any input is left after it
pub fn from_slice_with_limits<T: Decode>(
    bytes: &[u8],
    limits: Limits,
) -> Result<T, decode::Error> {
    let mut d = Decoder::with_limits(bytes, limits)?;
    let value = d.decode()?;
    d.finish()?;

    Ok(value)
}
