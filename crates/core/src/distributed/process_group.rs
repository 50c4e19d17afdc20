//! Worker group descriptors.
//!
//! A process group identifies this worker's rank and the total number of
//! workers cooperating on one tensor-parallel partition. The descriptor is
//! fixed for the lifetime of any layer built on it.

/// Rank/world-size view of a tensor-parallel worker group.
pub trait ProcessGroup: Send + Sync {
    /// Rank of this worker (0..world_size).
    fn rank(&self) -> usize;

    /// Total number of workers in the group.
    fn world_size(&self) -> usize;

    /// Local rank on this node (for multi-node setups).
    fn local_rank(&self) -> usize;

    /// Whether this is the coordinator (rank 0).
    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    /// Whether this is a single-worker group.
    fn is_single(&self) -> bool {
        self.world_size() == 1
    }
}

/// In-process group descriptor.
///
/// With the default constructor this is the single-worker group where every
/// collective is an identity. `with_rank` stands in for one rank of a larger
/// group, used when simulating multi-worker control flow in one process.
#[derive(Debug, Clone)]
pub struct LocalProcessGroup {
    rank: usize,
    world_size: usize,
}

impl LocalProcessGroup {
    pub fn new() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    /// Descriptor for one rank of a `world_size`-worker group.
    ///
    /// # Panics
    /// Panics if `rank >= world_size`.
    pub fn with_rank(rank: usize, world_size: usize) -> Self {
        assert!(rank < world_size, "rank must be < world_size");
        Self { rank, world_size }
    }
}

impl Default for LocalProcessGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn local_rank(&self) -> usize {
        self.rank
    }
}
