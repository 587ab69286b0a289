use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Error kinds returned by the reader.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// Not enough bytes left to satisfy the read.
    #[error("insufficient bytes")]
    InsufficientBytes,

    /// The parser completed but some bytes were left unread.
    #[error("trailing bytes")]
    TrailingBytes,

    /// A length prefix exceeds the allowed maximum.
    #[error("length {len} exceeds limit {limit}")]
    LimitExceeded {
        /// Decoded length.
        len: usize,
        /// Maximum permitted length.
        limit: usize,
    },
}

/// An interface for reading binary data.
pub trait Reader {
    /// Copies bytes into a slice. If there is not enough bytes available,
    /// does not consume any byte and returns `ReadError::InsufficientBytes`.
    fn read(&mut self, dst: &mut [u8]) -> Result<(), ReadError>;

    /// Advances the internal cursor by the number of bytes.
    /// If there is not enough bytes, does nothing and returns `ReadError::InsufficientBytes`.
    fn advance(&mut self, cnt: usize) -> Result<(), ReadError>;

    /// Returns remaining number of bytes available for reading.
    fn remaining_bytes(&self) -> usize;

    /// Wraps the reading logic in a block that checks that all bytes have been read.
    /// If some are left unread, returns `Err(From<ReadError::TrailingBytes>)`.
    fn parse<F, T, E>(&mut self, parse_fn: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<ReadError>,
    {
        let result = parse_fn(self)?;
        if self.remaining_bytes() != 0 {
            return Err(ReadError::TrailingBytes.into());
        }
        Ok(result)
    }

    /// Reads a single byte.
    #[inline]
    fn read_u8(&mut self) -> Result<u8, ReadError> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a BE32-encoded integer.
    #[inline]
    fn read_u32(&mut self) -> Result<u32, ReadError> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    /// Reads a BE64-encoded integer.
    #[inline]
    fn read_u64(&mut self) -> Result<u64, ReadError> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        Ok(BigEndian::read_u64(&buf))
    }

    /// Reads a 32-byte string.
    #[inline]
    fn read_u8x32(&mut self) -> Result<[u8; 32], ReadError> {
        let mut buf = [0u8; 32];
        self.read(&mut buf)?;
        Ok(buf)
    }

    /// Reads a BE32 length prefix and checks it against `limit`.
    fn read_size(&mut self, limit: usize) -> Result<usize, ReadError> {
        let len = self.read_u32()? as usize;
        if len > limit {
            return Err(ReadError::LimitExceeded { len, limit });
        }
        Ok(len)
    }

    /// Reads `n` items using the closure, refusing to preallocate
    /// more than the remaining bytes can hold given `min_item_size`.
    fn read_vec<T, F>(&mut self, n: usize, min_item_size: usize, f: F) -> Result<Vec<T>, ReadError>
    where
        F: FnMut(&mut Self) -> Result<T, ReadError>,
    {
        if n.saturating_mul(min_item_size) > self.remaining_bytes() {
            return Err(ReadError::InsufficientBytes);
        }
        let mut f = f;
        let mut v = Vec::with_capacity(n);
        for _ in 0..n {
            v.push(f(self)?);
        }
        Ok(v)
    }
}

impl Reader for &[u8] {
    #[inline]
    fn read(&mut self, dst: &mut [u8]) -> Result<(), ReadError> {
        let n = dst.len();
        if self.len() < n {
            return Err(ReadError::InsufficientBytes);
        }
        let (a, b) = self.split_at(n);
        dst.copy_from_slice(a);
        *self = b;
        Ok(())
    }

    #[inline]
    fn advance(&mut self, n: usize) -> Result<(), ReadError> {
        if self.len() < n {
            return Err(ReadError::InsufficientBytes);
        }
        *self = &self[n..];
        Ok(())
    }

    #[inline]
    fn remaining_bytes(&self) -> usize {
        self.len()
    }
}
