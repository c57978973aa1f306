//! Big-endian read and write helpers.
//!
//! Class files are big-endian throughout.  Reads are bounds-checked and fail
//! with `MalformedUnit` instead of panicking, so a truncated class never
//! takes the patcher down.

use crate::error::{ClassError, Result};

/// Cursor over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| ClassError::malformed("length overflow"))?;
        if end > self.data.len() {
            return Err(ClassError::malformed(format!(
                "truncated at offset {} (wanted {} bytes, {} left)",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Skip forward so the position is a multiple of four, measured from
    /// the start of the slice.
    pub fn align4(&mut self) -> Result<()> {
        let pad = (4 - self.pos % 4) % 4;
        self.bytes(pad)?;
        Ok(())
    }
}

pub fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Narrow a length to `u16`, or fail with `EncodingOverflow` naming `what`.
pub fn len_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| ClassError::overflow(format!("{what} has {len} entries")))
}

/// Narrow a length to `u32`.
pub fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ClassError::overflow(format!("{what} is {len} bytes")))
}

/// Write a `u2 attribute_name_index; u4 attribute_length; body` record.
pub fn put_attribute(out: &mut Vec<u8>, name_index: u16, body: &[u8]) -> Result<()> {
    put_u16(out, name_index);
    put_u32(out, len_u32(body.len(), "attribute")?);
    out.extend_from_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_big_endian() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
        let mut r = Reader::new(&data);
        assert_eq!(r.u32().unwrap(), 0xCAFE_BABE);
        assert_eq!(r.u16().unwrap(), 52);
        assert!(r.is_empty());
    }

    #[test]
    fn test_reader_truncated_is_malformed() {
        let mut r = Reader::new(&[0x01]);
        assert!(matches!(r.u16(), Err(ClassError::MalformedUnit(_))));
    }

    #[test]
    fn test_align4() {
        let data = [0u8; 8];
        let mut r = Reader::new(&data);
        r.u8().unwrap();
        r.align4().unwrap();
        assert_eq!(r.position(), 4);
        r.align4().unwrap();
        assert_eq!(r.position(), 4);
    }

    #[test]
    fn test_len_u16_overflow() {
        assert!(len_u16(70_000, "pool").is_err());
        assert_eq!(len_u16(3, "pool").unwrap(), 3);
    }
}
