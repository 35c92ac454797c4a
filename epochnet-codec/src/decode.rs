use std::str;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of input at position {position}, {needed} more bytes needed")]
    EndOfInput { position: usize, needed: usize },

    #[error("unknown variant {tag} for {union}")]
    UnknownVariant { union: &'static str, tag: u8 },

    #[error("missing required field {table}.{field}")]
    MissingRequiredField {
        table: &'static str,
        field: &'static str,
    },

    #[error("{what} of {actual} exceeds limit of {limit}")]
    ResourceLimitExceeded {
        what: &'static str,
        actual: usize,
        limit: usize,
    },

    #[error("{0}")]
    Malformed(String),
}

impl Error {
    pub fn message(msg: impl std::fmt::Display) -> Self {
        Self::Malformed(msg.to_string())
    }

    pub fn unknown_variant(union: &'static str, tag: u8) -> Self {
        Self::UnknownVariant { union, tag }
    }

    pub fn is_end_of_input(&self) -> bool {
        matches!(self, Self::EndOfInput { .. })
    }
}

/// Bounds applied while decoding untrusted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a complete encoded message
    pub max_message_bytes: usize,

    /// Maximum element count of any single sequence
    pub max_sequence_len: usize,

    /// Maximum nesting of tables
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_message_bytes: 4 * 1024 * 1024,
            max_sequence_len: 65_536,
            max_depth: 16,
        }
    }
}

/// A value that can be read back from the wire format
pub trait Decode: Sized {
    /// Smallest number of bytes any encoding of this type takes. Used to
    /// reject sequence counts that can't possibly fit in the remaining input
    /// before anything gets allocated.
    const MIN_LEN: usize = 1;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error>;
}

/// Cursor over a borrowed input buffer
pub struct Decoder<'b> {
    input: &'b [u8],
    pos: usize,
    depth: usize,
    limits: Limits,
}

impl<'b> Decoder<'b> {
    pub fn new(input: &'b [u8]) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            limits: Limits::default(),
        }
    }

    /// Builds a decoder, refusing inputs larger than `max_message_bytes`
    pub fn with_limits(input: &'b [u8], limits: Limits) -> Result<Self, Error> {
        if input.len() > limits.max_message_bytes {
            return Err(Error::ResourceLimitExceeded {
                what: "message size",
                actual: input.len(),
                limit: limits.max_message_bytes,
            });
        }

        Ok(Self {
            input,
            pos: 0,
            depth: 0,
            limits,
        })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if there's input left after a complete value
    pub fn finish(&self) -> Result<(), Error> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::message(format!(
                "{n} trailing bytes after position {}",
                self.pos
            ))),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8], Error> {
        if self.remaining() < n {
            return Err(Error::EndOfInput {
                position: self.pos,
                needed: n - self.remaining(),
            });
        }

        let out = &self.input[self.pos..self.pos + n];
        self.pos += n;

        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn u64(&mut self) -> Result<u64, Error> {
        self.take(8).map(LittleEndian::read_u64)
    }

    pub fn i64(&mut self) -> Result<i64, Error> {
        self.take(8).map(LittleEndian::read_i64)
    }

    pub fn bool(&mut self) -> Result<bool, Error> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            x => Err(Error::message(format!("invalid bool value {x}"))),
        }
    }

    /// Reads a union discriminant
    pub fn tag(&mut self) -> Result<u8, Error> {
        self.u8()
    }

    /// Reads a length-prefixed byte string without copying it
    pub fn bytes(&mut self) -> Result<&'b [u8], Error> {
        let len = self.u32()? as usize;

        if len > self.limits.max_message_bytes {
            return Err(Error::ResourceLimitExceeded {
                what: "byte string length",
                actual: len,
                limit: self.limits.max_message_bytes,
            });
        }

        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string without copying it
    pub fn str(&mut self) -> Result<&'b str, Error> {
        let bytes = self.bytes()?;
        str::from_utf8(bytes).map_err(Error::message)
    }

    /// Reads the element count of a sequence and checks it against the
    /// limits and against what's left of the input.
    pub fn array(&mut self, min_item_len: usize) -> Result<usize, Error> {
        let count = self.u32()? as usize;

        if count > self.limits.max_sequence_len {
            return Err(Error::ResourceLimitExceeded {
                what: "sequence length",
                actual: count,
                limit: self.limits.max_sequence_len,
            });
        }

        let needed = count.saturating_mul(min_item_len);

        if needed > self.remaining() {
            return Err(Error::EndOfInput {
                position: self.pos,
                needed: needed - self.remaining(),
            });
        }

        Ok(count)
    }

    pub fn decode<T: Decode>(&mut self) -> Result<T, Error> {
        T::decode(self)
    }

    /// Opens a table, returning a reader that hands out its fields in order
    ///
    /// The table must be closed with [`Table::finish`] once every field has
    /// been read.
    pub fn table(
        &mut self,
        name: &'static str,
        fields: &'static [&'static str],
    ) -> Result<Table, Error> {
        if self.depth >= self.limits.max_depth {
            return Err(Error::ResourceLimitExceeded {
                what: "nesting depth",
                actual: self.depth + 1,
                limit: self.limits.max_depth,
            });
        }

        let mask = self.u16()?;

        if fields.len() < 16 && mask >> fields.len() != 0 {
            return Err(Error::message(format!(
                "{name} carries unknown fields (mask {mask:#06x})"
            )));
        }

        self.depth += 1;

        Ok(Table {
            name,
            fields,
            mask,
            next: 0,
        })
    }
}

/// Field reader for an open table
///
/// This is the only place where required fields are validated: a field whose
/// presence bit is clear is reported as missing instead of being defaulted.
#[derive(Debug)]
pub struct Table {
    name: &'static str,
    fields: &'static [&'static str],
    mask: u16,
    next: usize,
}

impl Table {
    pub fn required<T: Decode>(&mut self, d: &mut Decoder<'_>) -> Result<T, Error> {
        let index = self.next;
        self.next += 1;

        let field = match self.fields.get(index) {
            Some(x) => *x,
            None => {
                return Err(Error::message(format!(
                    "{} has no field at index {index}",
                    self.name
                )))
            }
        };

        if self.mask & (1 << index) == 0 {
            return Err(Error::MissingRequiredField {
                table: self.name,
                field,
            });
        }

        d.decode()
    }

    pub fn finish(self, d: &mut Decoder<'_>) -> Result<(), Error> {
        d.depth = d.depth.saturating_sub(1);
        Ok(())
    }
}

impl Decode for u8 {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.u8()
    }
}

impl Decode for u16 {
    const MIN_LEN: usize = 2;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.u16()
    }
}

impl Decode for u32 {
    const MIN_LEN: usize = 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.u32()
    }
}

impl Decode for u64 {
    const MIN_LEN: usize = 8;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.u64()
    }
}

impl Decode for i64 {
    const MIN_LEN: usize = 8;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.i64()
    }
}

impl Decode for bool {
    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.bool()
    }
}

impl Decode for String {
    const MIN_LEN: usize = 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        d.str().map(ToOwned::to_owned)
    }
}

impl<T: Decode> Decode for Vec<T> {
    const MIN_LEN: usize = 4;

    fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
        let count = d.array(T::MIN_LEN)?;

        // count is bounded by max_sequence_len and by the remaining input
        let mut out = Vec::with_capacity(count);

        for _ in 0..count {
            out.push(d.decode()?);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{to_vec, Encode, Encoder};

    #[derive(Debug, PartialEq)]
    struct Point {
        x: u32,
        y: u32,
    }

    const POINT_FIELDS: &[&str] = &["x", "y"];

    impl Encode for Point {
        fn encode(&self, e: &mut Encoder) {
            e.table(2).u32(self.x).u32(self.y);
        }
    }

    impl Decode for Point {
        const MIN_LEN: usize = 2;

        fn decode(d: &mut Decoder<'_>) -> Result<Self, Error> {
            let mut t = d.table("Point", POINT_FIELDS)?;
            let x = t.required(d)?;
            let y = t.required(d)?;
            t.finish(d)?;

            Ok(Point { x, y })
        }
    }

    #[test]
    fn table_roundtrip() {
        let bytes = to_vec(&Point { x: 7, y: 9 });
        let point: Point = crate::from_slice(&bytes).unwrap();
        assert_eq!(point, Point { x: 7, y: 9 });
    }

    #[test]
    fn absent_field_is_reported_by_name() {
        let mut e = Encoder::new();
        e.u16(0b01).u32(7);

        let err = crate::from_slice::<Point>(&e.into_inner()).unwrap_err();

        assert_eq!(
            err,
            Error::MissingRequiredField {
                table: "Point",
                field: "y"
            }
        );
    }

    #[test]
    fn unknown_presence_bits_are_malformed() {
        let mut e = Encoder::new();
        e.u16(0b111).u32(7).u32(9).u32(11);

        let err = crate::from_slice::<Point>(&e.into_inner()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn sequence_count_over_limit_fails_before_reading_items() {
        let limits = Limits {
            max_sequence_len: 3,
            ..Limits::default()
        };

        let mut e = Encoder::new();
        e.array(4);

        let err =
            crate::from_slice_with_limits::<Vec<Point>>(&e.into_inner(), limits).unwrap_err();

        assert_eq!(
            err,
            Error::ResourceLimitExceeded {
                what: "sequence length",
                actual: 4,
                limit: 3
            }
        );
    }

    #[test]
    fn sequence_count_larger_than_input_is_truncation() {
        let mut e = Encoder::new();
        e.array(60_000).u16(3);

        let err = crate::from_slice::<Vec<Point>>(&e.into_inner()).unwrap_err();
        assert!(err.is_end_of_input());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let limits = Limits {
            max_depth: 1,
            ..Limits::default()
        };

        let nested = vec![vec![Point { x: 1, y: 2 }]];
        let bytes = to_vec(&nested);

        // sequences don't nest, only tables count
        let decoded: Vec<Vec<Point>> = crate::from_slice_with_limits(&bytes, limits).unwrap();
        assert_eq!(decoded, nested);

        let limits = Limits {
            max_depth: 0,
            ..Limits::default()
        };

        let err = crate::from_slice_with_limits::<Point>(&to_vec(&Point { x: 1, y: 2 }), limits)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ResourceLimitExceeded {
                what: "nesting depth",
                ..
            }
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut e = Encoder::new();
        e.bytes(&[0xff, 0xfe]);

        let err = crate::from_slice::<String>(&e.into_inner()).unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }
}
