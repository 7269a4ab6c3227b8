//! Byte cursor and write helpers for the big-endian / uvarint layouts.

use crate::{Error, Result};

/// Maximum encoded length of a u64 uvarint.
const MAX_VARINT_LEN: usize = 10;

/// A forward-only cursor over a decompressed buffer.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Parse(format!(
                "unexpected end of data: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64_be(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Read an unsigned LEB128 varint.
    pub fn read_uvarint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(Error::Parse("uvarint overflows u64".to_string()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(Error::Parse("uvarint overflows u64".to_string()))
    }

    /// Read a uvarint used as a length, bounded by the remaining input.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_uvarint()?;
        usize::try_from(len)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| Error::Parse(format!("length {} exceeds remaining data", len)))
    }

    /// Read a big-endian i64 length. Lengths below `min` are rejected.
    pub fn read_i64_len(&mut self, min: i64) -> Result<usize> {
        let len = self.read_i64_be()?;
        if len < min {
            return Err(Error::Parse(format!("invalid length: {}", len)));
        }
        usize::try_from(len).map_err(|_| Error::Parse(format!("invalid length: {}", len)))
    }

    /// Read a uvarint-length-prefixed byte string.
    pub fn read_uvarint_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_uvarint_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Parse(format!("invalid UTF-8: {}", e)))
    }

    /// Read a uvarint count followed by that many strings.
    pub fn read_string_list(&mut self) -> Result<Vec<String>> {
        let count = self.read_len()?;
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Read a uvarint count followed by that many big-endian u16 values.
    pub fn read_u16_list(&mut self) -> Result<Vec<u16>> {
        let count = self.read_len()?;
        (0..count).map(|_| self.read_u16_be()).collect()
    }

    /// Read a uvarint count followed by that many big-endian u64 words.
    pub fn read_u64_list(&mut self) -> Result<Vec<u64>> {
        let count = self.read_len()?;
        (0..count).map(|_| self.read_u64_be()).collect()
    }
}

/// Append an unsigned LEB128 varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a uvarint length followed by the bytes.
pub fn put_uvarint_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_uvarint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append a uvarint count followed by uvarint-length strings.
pub fn put_string_list(buf: &mut Vec<u8>, values: &[String]) {
    put_uvarint(buf, values.len() as u64);
    for value in values {
        put_uvarint_bytes(buf, value.as_bytes());
    }
}

/// Append a uvarint count followed by big-endian u16 values.
pub fn put_u16_list(buf: &mut Vec<u8>, values: &[u16]) {
    put_uvarint(buf, values.len() as u64);
    for value in values {
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Append a uvarint count followed by big-endian u64 words.
pub fn put_u64_list(buf: &mut Vec<u8>, values: &[u64]) {
    put_uvarint(buf, values.len() as u64);
    for value in values {
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uvarint_encoding() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 0);
        put_uvarint(&mut buf, 127);
        put_uvarint(&mut buf, 300);
        put_uvarint(&mut buf, u64::MAX);
        assert_eq!(&buf[..4], &[0x00, 0x7f, 0xac, 0x02]);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_uvarint().unwrap(), 0);
        assert_eq!(reader.read_uvarint().unwrap(), 127);
        assert_eq!(reader.read_uvarint().unwrap(), 300);
        assert_eq!(reader.read_uvarint().unwrap(), u64::MAX);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_uvarint_overflow() {
        let data = [0xff; 11];
        let mut reader = ByteReader::new(&data);
        assert!(reader.read_uvarint().is_err());
    }

    #[test]
    fn test_truncated_input() {
        let data = [0x00, 0x01];
        let mut reader = ByteReader::new(&data);
        assert!(reader.read_u64_be().is_err());

        let mut buf = Vec::new();
        put_uvarint(&mut buf, 10);
        buf.extend_from_slice(b"abc");
        let mut reader = ByteReader::new(&buf);
        assert!(reader.read_string().is_err());
    }

    #[test]
    fn test_i64_len() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf.extend_from_slice(&(-3i64).to_be_bytes());
        let mut reader = ByteReader::new(&buf);
        assert!(ByteReader::new(&buf).read_i64_len(1).is_err());
        assert_eq!(reader.read_i64_len(0).unwrap(), 0);
        assert!(reader.read_i64_len(0).is_err());
    }

    #[test]
    fn test_lists() {
        let mut buf = Vec::new();
        put_string_list(&mut buf, &["tcp".to_string(), "udp".to_string()]);
        put_u16_list(&mut buf, &[53, 443]);
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_string_list().unwrap(), vec!["tcp", "udp"]);
        assert_eq!(reader.read_u16_list().unwrap(), vec![53, 443]);
    }
}
