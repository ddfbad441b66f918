// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Big-endian primitive encoding shared by every packed structure.
//!
//! Writers append to a `Vec<u8>`; [`ByteReader`] walks a borrowed slice and
//! reports [`Error::Truncated`] instead of panicking on short input.

use crate::error::{Error, Result};

#[inline]
pub(crate) fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

#[inline]
pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
pub(crate) fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

#[inline]
pub(crate) fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Append a `u32` length prefix followed by the bytes.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| Error::Corrupt(format!("field of {} bytes too large", data.len())))?;
    put_u32(buf, len);
    buf.extend_from_slice(data);
    Ok(())
}

/// Cursor over a borrowed byte slice.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, what: &'static str, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated {
                what,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(what, N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.take(what, 1)?[0])
    }

    pub(crate) fn u32(&mut self, what: &'static str) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array(what)?))
    }

    pub(crate) fn i32(&mut self, what: &'static str) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array(what)?))
    }

    pub(crate) fn i64(&mut self, what: &'static str) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array(what)?))
    }

    /// Read a `u32` length prefix and that many bytes.
    pub(crate) fn bytes(&mut self, what: &'static str) -> Result<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(what, len)
    }

    /// Fail unless every byte was consumed.
    pub(crate) fn finish(&self, what: &'static str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Corrupt(format!(
                "{} trailing bytes after {}",
                self.remaining(),
                what
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_big_endian() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 0x0102_0304);
        put_i32(&mut buf, -2);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.u32("a").unwrap(), 0x0102_0304);
        assert_eq!(r.i32("b").unwrap(), -2);
        assert!(r.finish("test").is_ok());
    }

    #[test]
    fn test_reader_truncated() {
        let mut r = ByteReader::new(&[0, 0, 0, 5, 1, 2]);
        match r.bytes("blob") {
            Err(Error::Truncated {
                needed, available, ..
            }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_finish_rejects_trailing() {
        let r = ByteReader::new(&[9]);
        assert!(matches!(r.finish("x"), Err(Error::Corrupt(_))));
    }
}
