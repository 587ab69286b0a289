use byteorder::{BigEndian, ByteOrder};
use core::mem;
use thiserror::Error;

/// Error kinds returned by the writer.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum WriteError {
    /// The destination buffer is too small.
    #[error("insufficient capacity")]
    InsufficientCapacity,
}

/// Interface for writing binary data.
pub trait Writer {
    /// Writes bytes with the given label. If there is no sufficient capacity,
    /// performs no modifications and returns WriteError::InsufficientCapacity.
    fn write(&mut self, label: &'static [u8], src: &[u8]) -> Result<(), WriteError>;

    /// Remaining number of bytes that can be written.
    fn remaining_capacity(&self) -> usize;

    /// Writes a single byte.
    #[inline]
    fn write_u8(&mut self, label: &'static [u8], x: u8) -> Result<(), WriteError> {
        self.write(label, &[x])
    }

    /// Writes a BE32-encoded integer.
    #[inline]
    fn write_u32(&mut self, label: &'static [u8], x: u32) -> Result<(), WriteError> {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, x);
        self.write(label, &buf)
    }

    /// Writes a BE64-encoded integer.
    #[inline]
    fn write_u64(&mut self, label: &'static [u8], x: u64) -> Result<(), WriteError> {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, x);
        self.write(label, &buf)
    }
}

impl Writer for Vec<u8> {
    #[inline]
    fn write(&mut self, _label: &'static [u8], src: &[u8]) -> Result<(), WriteError> {
        self.extend_from_slice(src);
        Ok(())
    }

    #[inline]
    fn write_u8(&mut self, _label: &'static [u8], x: u8) -> Result<(), WriteError> {
        self.push(x);
        Ok(())
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        usize::max_value()
    }
}

impl Writer for &mut [u8] {
    #[inline]
    fn write(&mut self, _label: &'static [u8], src: &[u8]) -> Result<(), WriteError> {
        let n = src.len();
        if n <= self.remaining_capacity() {
            let (a, b) = mem::replace(self, &mut []).split_at_mut(n);
            a.copy_from_slice(&src[..n]);
            *self = b;
            Ok(())
        } else {
            Err(WriteError::InsufficientCapacity)
        }
    }

    #[inline]
    fn remaining_capacity(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_big_endian() {
        let mut v = Vec::new();
        v.write_u32(b"n", 0x0102_0304).unwrap();
        v.write_u64(b"pos", 5).unwrap();
        assert_eq!(v, vec![1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 5]);
    }

    #[test]
    fn slice_capacity() {
        let mut storage = [0u8; 3];
        let mut buf: &mut [u8] = &mut storage;
        assert_eq!(buf.write_u32(b"n", 1), Err(WriteError::InsufficientCapacity));
        buf.write_u8(b"x", 9).unwrap();
        assert_eq!(buf.remaining_capacity(), 2);
        assert_eq!(storage[0], 9);
    }
}
