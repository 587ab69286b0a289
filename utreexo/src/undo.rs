use merkle::Hash;
use readerwriter::{Decodable, Encodable, ExactSizeEncodable, ReadError, Reader, WriteError, Writer};
use serde::{Deserialize, Serialize};

use super::position::Position;

/// Upper bound on the number of deletions accepted from the wire.
pub const MAX_UNDO_ITEMS: usize = 1 << 20;

/// Everything needed to roll back the most recent `Forest::modify`.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct UndoBlock {
    /// Number of leaves the block appended.
    pub num_adds: u32,
    /// Positions of the deleted leaves before the block, ascending.
    pub positions: Vec<Position>,
    /// Hashes of the deleted leaves, matching `positions`.
    pub hashes: Vec<Hash>,
}

impl UndoBlock {
    /// Returns true if the block neither added nor removed anything.
    pub fn is_empty(&self) -> bool {
        self.num_adds == 0 && self.positions.is_empty()
    }
}

impl Encodable for UndoBlock {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        debug_assert_eq!(self.positions.len(), self.hashes.len());
        w.write_u32(b"num_adds", self.num_adds)?;
        w.write_u32(b"num_dels", self.positions.len() as u32)?;
        for p in self.positions.iter() {
            w.write_u64(b"position", *p)?;
        }
        for h in self.hashes.iter() {
            h.encode(w)?;
        }
        Ok(())
    }
}

impl ExactSizeEncodable for UndoBlock {
    fn encoded_size(&self) -> usize {
        8 + self.positions.len() * 8 + self.hashes.len() * 32
    }
}

impl Decodable for UndoBlock {
    fn decode(r: &mut impl Reader) -> Result<Self, ReadError> {
        let num_adds = r.read_u32()?;
        let n = r.read_size(MAX_UNDO_ITEMS)?;
        let positions = r.read_vec(n, 8, |r| r.read_u64())?;
        let hashes = r.read_vec(n, 32, Hash::decode)?;
        Ok(UndoBlock {
            num_adds,
            positions,
            hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let ub = UndoBlock {
            num_adds: 3,
            positions: vec![2, 9],
            hashes: vec![Hash::from([1u8; 32]), Hash::from([2u8; 32])],
        };
        let bytes = ub.encode_to_vec();
        assert_eq!(bytes.len(), 8 + 16 + 64);
        assert_eq!(&bytes[..8], &[0, 0, 0, 3, 0, 0, 0, 2]);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0, 9]);
        assert_eq!(UndoBlock::decode_exact(&bytes), Ok(ub));
    }

    #[test]
    fn truncated_input() {
        let bytes = [0, 0, 0, 0, 0, 0, 0, 1, 0, 0];
        assert_eq!(
            UndoBlock::decode_exact(&bytes),
            Err(ReadError::InsufficientBytes)
        );
    }
}
