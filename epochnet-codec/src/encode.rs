use byteorder::{ByteOrder, LittleEndian};

/// A value that knows how to write itself in the wire format
pub trait Encode {
    fn encode(&self, e: &mut Encoder);
}

/// Append-only writer for the wire format
///
/// Writing into memory can't fail, so every method returns the encoder itself
/// and calls can be chained.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, x: u8) -> &mut Self {
        self.buf.push(x);
        self
    }

    pub fn u16(&mut self, x: u16) -> &mut Self {
        let mut out = [0u8; 2];
        LittleEndian::write_u16(&mut out, x);
        self.buf.extend_from_slice(&out);
        self
    }

    pub fn u32(&mut self, x: u32) -> &mut Self {
        let mut out = [0u8; 4];
        LittleEndian::write_u32(&mut out, x);
        self.buf.extend_from_slice(&out);
        self
    }

    pub fn u64(&mut self, x: u64) -> &mut Self {
        let mut out = [0u8; 8];
        LittleEndian::write_u64(&mut out, x);
        self.buf.extend_from_slice(&out);
        self
    }

    pub fn i64(&mut self, x: i64) -> &mut Self {
        let mut out = [0u8; 8];
        LittleEndian::write_i64(&mut out, x);
        self.buf.extend_from_slice(&out);
        self
    }

    pub fn bool(&mut self, x: bool) -> &mut Self {
        self.u8(x as u8)
    }

    /// Writes a union discriminant
    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.u8(tag)
    }

    /// Writes the header of a table whose `fields` fields are all present
    pub fn table(&mut self, fields: usize) -> &mut Self {
        debug_assert!(fields <= 16, "tables hold at most 16 fields");
        let mask = ((1u32 << fields) - 1) as u16;
        self.u16(mask)
    }

    /// Writes the element count of a sequence
    pub fn array(&mut self, len: usize) -> &mut Self {
        debug_assert!(len <= u32::MAX as usize);
        self.u32(len as u32)
    }

    /// Writes a length-prefixed byte string
    pub fn bytes(&mut self, x: &[u8]) -> &mut Self {
        self.array(x.len());
        self.buf.extend_from_slice(x);
        self
    }

    /// Writes a length-prefixed UTF-8 string
    pub fn str(&mut self, x: &str) -> &mut Self {
        self.bytes(x.as_bytes())
    }

    pub fn encode<T: Encode + ?Sized>(&mut self, x: &T) -> &mut Self {
        x.encode(self);
        self
    }
}

impl Encode for u8 {
    fn encode(&self, e: &mut Encoder) {
        e.u8(*self);
    }
}

impl Encode for u16 {
    fn encode(&self, e: &mut Encoder) {
        e.u16(*self);
    }
}

impl Encode for u32 {
    fn encode(&self, e: &mut Encoder) {
        e.u32(*self);
    }
}

impl Encode for u64 {
    fn encode(&self, e: &mut Encoder) {
        e.u64(*self);
    }
}

impl Encode for i64 {
    fn encode(&self, e: &mut Encoder) {
        e.i64(*self);
    }
}

impl Encode for bool {
    fn encode(&self, e: &mut Encoder) {
        e.bool(*self);
    }
}

impl Encode for str {
    fn encode(&self, e: &mut Encoder) {
        e.str(self);
    }
}

impl Encode for String {
    fn encode(&self, e: &mut Encoder) {
        e.str(self);
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, e: &mut Encoder) {
        e.array(self.len());

        for item in self {
            item.encode(e);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, e: &mut Encoder) {
        self.as_slice().encode(e);
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, e: &mut Encoder) {
        (**self).encode(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_mask_sets_one_bit_per_field() {
        let mut e = Encoder::new();
        e.table(3);
        assert_eq!(e.into_inner(), vec![0b0000_0111, 0]);

        let mut e = Encoder::new();
        e.table(0);
        assert_eq!(e.into_inner(), vec![0, 0]);
    }

    #[test]
    fn sequences_are_count_prefixed() {
        let mut e = Encoder::new();
        e.encode(&vec![1u16, 2u16]);

        assert_eq!(e.into_inner(), vec![2, 0, 0, 0, 1, 0, 2, 0]);
    }
}
