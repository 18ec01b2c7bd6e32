//! Bounds-checked forward cursor over an immutable byte buffer.
//!
//! All multi-byte integers in UEFI and PE/COFF structures are little-endian.
//! Reads that would run past the end of the buffer fail with
//! [`Error::TruncatedInput`] and leave the cursor where it was.

use binrw::io::Cursor;
use binrw::BinResult;
use byteorder::{ByteOrder, LittleEndian};
use uefi::Guid;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    /// Offset of the next unread byte, relative to the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer. Does not consume it.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::TruncatedInput {
            offset: self.pos,
            needed,
            remaining: self.remaining(),
        }
    }

    pub fn peek_bytes(&self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.truncated(len));
        }
        Ok(&self.buf[self.pos..self.pos + len])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.peek_bytes(len)?;
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_bytes(2).map(LittleEndian::read_u16)
    }

    pub fn peek_u16(&self) -> Result<u16> {
        self.peek_bytes(2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bytes(4).map(LittleEndian::read_u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_bytes(8).map(LittleEndian::read_u64)
    }

    pub fn read_guid(&mut self) -> Result<Guid> {
        self.read_array::<16>().map(Guid::from_bytes)
    }

    /// Reads a `u32` length followed by that many bytes.
    pub fn read_prefixed(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        match self.read_bytes(len) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                self.pos = start;
                Err(err)
            }
        }
    }

    /// Splits off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>> {
        self.read_bytes(len).map(Reader::new)
    }

    /// Bounds-checks the next `size` bytes and hands exactly those bytes to a
    /// `binrw` decoder for a fixed-layout structure.
    pub fn read_struct<T>(
        &mut self,
        size: usize,
        decode: impl FnOnce(&mut Cursor<&'a [u8]>) -> BinResult<T>,
    ) -> Result<T> {
        let bytes = self.peek_bytes(size)?;
        // the slice is exactly `size` long, so the only failure left is a
        // layout that needs more than `size` bytes
        let value = decode(&mut Cursor::new(bytes)).map_err(|_| self.truncated(size))?;
        self.pos += size;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_scalars() {
        let data = [
            0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02,
            0x01,
        ];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0x12345678);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_read_does_not_advance() {
        let data = [1, 2, 3];
        let mut reader = Reader::new(&data);
        reader.skip(1).unwrap();

        let err = reader.read_u32().unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedInput {
                offset: 1,
                needed: 4,
                remaining: 2
            }
        ));
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
    }

    #[test]
    fn guid_uses_mixed_endian_layout() {
        let data = [
            0x26, 0x16, 0xc4, 0xc1, 0x4c, 0x50, 0x92, 0x40, 0xac, 0xa9, 0x41, 0xf9, 0x36, 0x93,
            0x43, 0x28,
        ];
        let mut reader = Reader::new(&data);
        let guid = reader.read_guid().unwrap();
        assert_eq!(guid.to_string(), "c1c41626-504c-4092-aca9-41f936934328");
    }

    #[test]
    fn prefixed_blob() {
        let data = [3, 0, 0, 0, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_prefixed().unwrap(), &[0xaa, 0xbb, 0xcc]);
        assert_eq!(reader.remaining(), 1);

        let short = [9, 0, 0, 0, 1];
        let mut reader = Reader::new(&short);
        assert!(reader.read_prefixed().is_err());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn peek_and_sub_reader() {
        let data = [0x4d, 0x5a, 1, 2, 3];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.peek_u16().unwrap(), 0x5a4d);
        assert_eq!(reader.position(), 0);

        let mut sub = reader.sub_reader(2).unwrap();
        assert_eq!(sub.remaining(), 2);
        assert!(sub.read_bytes(3).is_err());
        assert_eq!(reader.rest(), &[1, 2, 3]);
    }
}
