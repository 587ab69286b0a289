use merkle::Hash;
use readerwriter::ReadError;
use thiserror::Error;

use super::position::Position;

/// Errors returned by the accumulator.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum UtreexoError {
    /// This error occurs when a hash is not present among the leaves.
    #[error("Hash {0} is not in the accumulator")]
    HashNotFound(Hash),

    /// This error occurs when a position lies outside the forest.
    #[error("Position {0} is outside of the forest")]
    PositionOutOfRange(Position),

    /// This error occurs when a proof has the wrong shape, such as a hash count
    /// that does not fit the targets or targets out of order.
    #[error("Batch proof is malformed")]
    ProofMalformed,

    /// This error occurs when the proof does not lead to the roots or carries empty hashes.
    #[error("Batch proof does not match the roots")]
    ProofMismatch,

    /// This error occurs when a sparse forest lacks a node it needs to apply an update.
    #[error("Pollard does not hold the node at position {0}")]
    InsufficientPollardData(Position),

    /// This error occurs when an all-zero hash is offered as a new leaf.
    #[error("Empty hash cannot be added as a leaf")]
    EmptyLeafRejected,

    /// This error occurs when an undo block does not fit the current forest.
    #[error("Undo block does not match the forest")]
    UndoShapeMismatch,

    /// This error occurs when the same leaf is targeted twice in one batch.
    #[error("Position {0} is targeted more than once")]
    DuplicateTarget(Position),

    /// This error occurs when the backing store fails.
    #[error("Store failure: {0}")]
    Store(String),

    /// This error occurs when the configuration cannot be parsed or is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for UtreexoError {
    fn from(e: std::io::Error) -> Self {
        UtreexoError::Store(e.to_string())
    }
}

impl From<ReadError> for UtreexoError {
    fn from(_: ReadError) -> Self {
        UtreexoError::ProofMalformed
    }
}
