//! Communication: the backend abstraction, collective helpers, rank
//! indexing, and the many-to-many distributor that every structural exchange
//! in map construction goes through.

pub mod collectives;
pub mod communicator;
pub mod distributor;
pub mod indexer;
pub mod wire;

pub use communicator::{Communicator, LocalComm, NoComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use distributor::Distributor;
pub use indexer::CommIndexer;

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Deterministic tag layout for one map build. Each structural phase gets
/// its own base so overlapping posts can never cross phases.
#[derive(Copy, Clone, Debug)]
pub struct MapCommTags {
    pub indexer: CommTag,
    pub ordinals: CommTag,
    pub boxes: CommTag,
    pub rendezvous: CommTag,
    pub target_to_rendezvous: CommTag,
    pub rendezvous_to_target_for_missed: CommTag,
    pub rendezvous_to_source: CommTag,
    pub exporter: CommTag,
    pub apply: CommTag,
}

impl MapCommTags {
    /// Construct tags from a base, assigning deterministic per-phase
    /// offsets. Phases that run several exchanges (rendezvous shipment in
    /// particular) receive a wide sub-range.
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            indexer: base,
            ordinals: base.offset(4),
            boxes: base.offset(8),
            rendezvous: base.offset(16),
            target_to_rendezvous: base.offset(48),
            rendezvous_to_target_for_missed: base.offset(56),
            rendezvous_to_source: base.offset(64),
            exporter: base.offset(72),
            apply: base.offset(80),
        }
    }
}
