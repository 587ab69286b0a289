#![deny(missing_docs)]

//! Hashes and hashing interfaces for merkle binary trees.
use core::marker::PhantomData;
use merlin::Transcript;
use readerwriter::{Decodable, Encodable, ExactSizeEncodable, ReadError, Reader, WriteError, Writer};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Merkle hash of a node.
/// The all-zero value is reserved to mark an empty position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

/// First 12 bytes of a `Hash`, used as a compact lookup key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct MiniHash(pub [u8; 12]);

/// MerkleItem defines an item in the Merkle tree.
pub trait MerkleItem: Sized {
    /// Commits the hash of the item to Transcript.
    fn commit(&self, t: &mut Transcript);
}

/// Compression function combining two child hashes into the parent hash.
///
/// Implementations must be pure and must refuse `Hash::empty()`
/// as either argument.
pub trait NodeHasher {
    /// Computes hash of the inner node from its left and right children.
    fn parent(&self, left: &Hash, right: &Hash) -> Hash;
}

/// Precomputed hash instance.
pub struct Hasher<M: MerkleItem> {
    t: Transcript,
    phantom: PhantomData<M>,
}

impl Hash {
    /// Returns the empty hash (all zeroes).
    pub const fn empty() -> Self {
        Hash([0u8; 32])
    }

    /// Returns true if this is the empty hash.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Returns the 12-byte prefix used as a position map key.
    pub fn mini(&self) -> MiniHash {
        let mut m = [0u8; 12];
        m.copy_from_slice(&self.0[..12]);
        MiniHash(m)
    }

    /// Compares hashes in constant time.
    pub fn ct_eq(&self, other: &Hash) -> bool {
        self.0.ct_eq(&other.0).unwrap_u8() == 1
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::ops::Deref for Hash {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl Encodable for Hash {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write(b"hash", &self.0)
    }
}

impl ExactSizeEncodable for Hash {
    fn encoded_size(&self) -> usize {
        32
    }
}

impl Decodable for Hash {
    fn decode(reader: &mut impl Reader) -> Result<Self, ReadError> {
        reader.read_u8x32().map(Hash)
    }
}

impl MerkleItem for u64 {
    fn commit(&self, t: &mut Transcript) {
        t.append_u64(b"item", *self);
    }
}

impl<M: MerkleItem> Clone for Hasher<M> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            phantom: self.phantom,
        }
    }
}

impl<M: MerkleItem> Hasher<M> {
    /// Creates a new hasher instance.
    pub fn new(label: &'static [u8]) -> Self {
        Self {
            t: Transcript::new(label),
            phantom: PhantomData,
        }
    }

    /// Computes hash of the leaf node in a merkle tree.
    pub fn leaf(&self, item: &M) -> Hash {
        let mut t = self.t.clone();
        item.commit(&mut t);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.leaf", &mut hash.0);
        hash
    }

    /// Computes hash of the inner node in a merkle tree (that contains left/right child nodes).
    pub fn intermediate(&self, left: &Hash, right: &Hash) -> Hash {
        let mut t = self.t.clone();
        t.append_message(b"L", &left);
        t.append_message(b"R", &right);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.node", &mut hash.0);
        hash
    }
}

impl<M: MerkleItem> NodeHasher for Hasher<M> {
    fn parent(&self, left: &Hash, right: &Hash) -> Hash {
        assert!(
            !left.is_empty() && !right.is_empty(),
            "empty hash passed as a child"
        );
        self.intermediate(left, right)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BytesVisitor;

        impl<'de> serde::de::Visitor<'de> for BytesVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                formatter.write_str("a valid 32-byte string")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Hash, E>
            where
                E: serde::de::Error,
            {
                if v.len() == 32 {
                    let mut buf = [0u8; 32];
                    buf[0..32].copy_from_slice(v);
                    Ok(Hash(buf))
                } else {
                    Err(serde::de::Error::invalid_length(v.len(), &self))
                }
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Hash, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut buf = [0u8; 32];
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Hash(buf))
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}
