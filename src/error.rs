//! `TransferError`: unified error type for the mesh-transfer public APIs.
//!
//! Two classes of condition exist in this crate. Structural violations
//! (dimension mismatches, disjoint domains, malformed blocks, lost messages)
//! are errors and surface here. Expected data conditions (a target point
//! outside the shared box or outside source coverage) are *not* errors; they
//! land in the missed-point registry instead.

use crate::map::GlobalOrdinal;
use thiserror::Error;

/// Unified error type for mesh-transfer operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransferError {
    /// A manager or field had a different spatial dimension than the map.
    #[error("dimension mismatch: map is {expected}-dimensional, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The source and target global bounding boxes do not intersect.
    #[error("source and target bounding boxes are disjoint; no shared domain")]
    DisjointDomains,

    /// Every rank passed a null manager; there is no work to do.
    #[error("no participating ranks hold {side} data")]
    NoParticipants { side: &'static str },

    /// A mesh block failed shape validation.
    #[error("malformed mesh block: {0}")]
    MalformedBlock(String),

    /// Participating ranks disagree on a globally-agreed block property.
    #[error("rank {rank}: block {index} disagrees with root ({detail})")]
    InconsistentBlock {
        rank: usize,
        index: usize,
        detail: String,
    },

    /// A point-to-point exchange failed.
    #[error("communication failure with rank {neighbor}: {detail}")]
    Comm { neighbor: usize, detail: String },

    /// A received message had the wrong byte length.
    #[error("rank {neighbor} sent {got} bytes, expected {expected}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },

    /// An invalid or sentinel ordinal reached persistent map state.
    #[error("invalid global ordinal {0} in map state")]
    InvalidOrdinal(GlobalOrdinal),

    /// A global ordinal arrived that the receiving rank does not own.
    #[error("rank {rank} received ordinal {ordinal} it does not own")]
    UnknownOrdinal { rank: usize, ordinal: GlobalOrdinal },

    /// The evaluator returned a buffer of the wrong shape.
    #[error("evaluator returned {got} values, expected {expected}")]
    EvaluatorShape { expected: usize, got: usize },

    /// A rank holds mapped source points but was given no evaluator.
    #[error("rank {rank} owns {count} mapped points but no evaluator was supplied")]
    MissingEvaluator { rank: usize, count: usize },

    /// The target field buffer does not match the mapped point set.
    #[error("target field holds {got} values, expected {expected}")]
    TargetFieldShape { expected: usize, got: usize },

    /// `apply` was called before `setup` completed.
    #[error("map has not been set up; call setup() first")]
    MapNotBuilt,

    /// Missed-point queries require tracking to be enabled at construction.
    #[error("missed-point tracking was not enabled for this map")]
    MissedPointsNotTracked,
}

impl TransferError {
    /// Shorthand for a communication failure.
    pub fn comm(neighbor: usize, detail: impl Into<String>) -> Self {
        TransferError::Comm {
            neighbor,
            detail: detail.into(),
        }
    }
}
