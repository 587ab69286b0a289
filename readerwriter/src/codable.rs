use crate::{ReadError, Reader, WriteError, Writer};

/// A trait for encoding structures using the [Writer] trait.
pub trait Encodable {
    /// Encodes receiver into bytes appending them to a provided writer.
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError>;

    /// Encodes the receiver into a newly allocated vector of bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing to a Vec never fails.
        let _ = self.encode(&mut buf);
        buf
    }
}

/// Encodable type with a precomputed length of the encoding.
pub trait ExactSizeEncodable: Encodable {
    /// Returns precise length in bytes for the serialized representation of the receiver.
    fn encoded_size(&self) -> usize;
}

/// A trait for decoding bytes into structure using the [Reader] trait.
pub trait Decodable: Sized {
    /// Decodes bytes into self by reading bytes from reader.
    fn decode(reader: &mut impl Reader) -> Result<Self, ReadError>;

    /// Decodes a complete buffer, failing if any bytes are left unread.
    fn decode_exact(mut bytes: &[u8]) -> Result<Self, ReadError> {
        bytes.parse(Self::decode)
    }
}
