use std::sync::Arc;

use derive_more::Debug;
use types::{
    nonstandard::ExecutionStatus,
    phase0::{
        containers::Checkpoint,
        primitives::{Gwei, Slot, ValidatorIndex, H256},
    },
};

// Weights are stored as `Gwei`, which could overflow with a sufficiently high number of validators.
// `i64` is enough for hundreds of millions of validators at `MAX_EFFECTIVE_BALANCE`.
// `overflow-checks` are enabled in every profile, so the calculations won't break silently.
pub type Difference = i64;

/// The [weight] of a block combined with its root as a [tiebreaker].
///
/// [weight]:     https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_weight
/// [tiebreaker]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head
pub type Score = (Gwei, H256);

/// The parts of a validated block that the fork choice needs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockSummary {
    pub block_root: H256,
    // Ignored for the anchor.
    pub parent_root: H256,
    pub slot: Slot,
}

/// The parts of a post-block state that the fork choice needs.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PostState {
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    /// Effective balances indexed by validator index. Inactive validators have a balance of 0.
    #[debug("[{} balances]", active_balances.len())]
    pub active_balances: Arc<[Gwei]>,
}

/// A block in the fork choice tree.
///
/// `parent`, `best_child` and `best_descendant` are positions in the [`ProtoArray`] the node is
/// stored in. They are only meaningful until the next call to [`ProtoArray::prune`].
///
/// [`ProtoArray`]:        crate::proto_array::ProtoArray
/// [`ProtoArray::prune`]: crate::proto_array::ProtoArray::prune
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProtoNode {
    pub block_root: H256,
    pub parent_root: H256,
    pub slot: Slot,
    pub parent: Option<usize>,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub weight: Gwei,
    pub best_child: Option<usize>,
    pub best_descendant: Option<usize>,
    pub execution_status: ExecutionStatus,
}

impl ProtoNode {
    #[must_use]
    pub const fn new(
        block: BlockSummary,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        execution_status: ExecutionStatus,
    ) -> Self {
        let BlockSummary {
            block_root,
            parent_root,
            slot,
        } = block;

        Self {
            block_root,
            parent_root,
            slot,
            parent: None,
            justified_checkpoint,
            finalized_checkpoint,
            weight: 0,
            best_child: None,
            best_descendant: None,
            execution_status,
        }
    }

    #[must_use]
    pub const fn score(&self) -> Score {
        (self.weight, self.block_root)
    }
}

/// The latest message of a validator along with the part of it already reflected in weights.
///
/// `current_root` and `applied_balance` describe the weight the validator currently contributes to
/// the tree. `next_root` is the latest recorded vote. The two are reconciled in
/// [`Store::update_head`](crate::Store::update_head).
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VoteTracker {
    pub current_root: Option<H256>,
    pub next_root: Option<H256>,
    pub next_slot: Slot,
    pub applied_balance: Gwei,
}

impl VoteTracker {
    #[must_use]
    pub fn is_pending(&self, balance: Gwei) -> bool {
        self.current_root != self.next_root || self.applied_balance != balance
    }
}

/// A vote for the current slot waiting for the clock to move past it.
#[derive(Clone, Copy, Debug)]
pub struct QueuedVote {
    pub validator_index: ValidatorIndex,
    pub beacon_block_root: H256,
    pub slot: Slot,
}
