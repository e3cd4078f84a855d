use anyhow::Error as AnyhowError;
use strum::{AsRefStr, Display};
use thiserror::Error;
use types::phase0::{
    containers::Checkpoint,
    primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
};

use crate::misc::Difference;

/// How a caller should react to a failed operation.
///
/// Invalid blocks and attestations leave the store untouched and can simply be dropped.
/// Fatal errors mean the store has lost an invariant and has to be rebuilt from a trusted anchor.
#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidBlock,
    InvalidAttestation,
    Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "attestation votes for a block from the future \
         (beacon_block_root: {beacon_block_root:?}, attestation_slot: {attestation_slot}, \
         block_slot: {block_slot})"
    )]
    AttestationForFutureBlock {
        beacon_block_root: H256,
        attestation_slot: Slot,
        block_slot: Slot,
    },
    #[error("attestation is from the future (slot: {slot}, current_slot: {current_slot})")]
    AttestationFromFuture { slot: Slot, current_slot: Slot },
    #[error(
        "attestation votes for a block that does not descend from the finalized block \
         (beacon_block_root: {beacon_block_root:?}, finalized_root: {finalized_root:?})"
    )]
    AttestationTargetNotDescendantOfFinalized {
        beacon_block_root: H256,
        finalized_root: H256,
    },
    #[error("attestation has no attesters (beacon_block_root: {beacon_block_root:?}, slot: {slot})")]
    EmptyAttesterSet { beacon_block_root: H256, slot: Slot },
    #[error("attestation votes for an unknown block: {beacon_block_root:?}")]
    UnknownTargetRoot { beacon_block_root: H256 },
    #[error(
        "attester is not in the validator registry \
         (validator_index: {validator_index}, validator_count: {validator_count})"
    )]
    UnknownValidatorIndex {
        validator_index: ValidatorIndex,
        validator_count: usize,
    },
    #[error(
        "block carries a checkpoint that is not in its chain \
         (block_root: {block_root:?}, checkpoint: {checkpoint})"
    )]
    CheckpointNotInChain {
        block_root: H256,
        checkpoint: Checkpoint,
    },
    #[error(
        "block is from the future \
         (block_root: {block_root:?}, slot: {slot}, current_slot: {current_slot})"
    )]
    BlockFromFuture {
        block_root: H256,
        slot: Slot,
        current_slot: Slot,
    },
    #[error(
        "block does not descend from the finalized block \
         (block_root: {block_root:?}, finalized_root: {finalized_root:?})"
    )]
    BlockNotDescendantOfFinalized {
        block_root: H256,
        finalized_root: H256,
    },
    #[error(
        "block is not later than the finalized block \
         (block_root: {block_root:?}, slot: {slot}, finalized_slot: {finalized_slot})"
    )]
    BlockNotLaterThanFinalized {
        block_root: H256,
        slot: Slot,
        finalized_slot: Slot,
    },
    #[error(
        "block is not later than its parent \
         (block_root: {block_root:?}, slot: {slot}, parent_slot: {parent_slot})"
    )]
    BlockNotLaterThanParent {
        block_root: H256,
        slot: Slot,
        parent_slot: Slot,
    },
    #[error(
        "block finalizes a checkpoint that conflicts with its parent \
         (block_root: {block_root:?}, parent_finalized: {parent_finalized}, \
         finalized: {finalized})"
    )]
    FinalizedCheckpointConflict {
        block_root: H256,
        parent_finalized: Checkpoint,
        finalized: Checkpoint,
    },
    #[error(
        "block has an older finalized checkpoint than its parent \
         (block_root: {block_root:?}, parent_finalized_epoch: {parent_finalized_epoch}, \
         finalized_epoch: {finalized_epoch})"
    )]
    FinalizedCheckpointRegressed {
        block_root: H256,
        parent_finalized_epoch: Epoch,
        finalized_epoch: Epoch,
    },
    #[error(
        "block has a justified checkpoint older than its finalized checkpoint \
         (block_root: {block_root:?}, justified_epoch: {justified_epoch}, \
         finalized_epoch: {finalized_epoch})"
    )]
    JustifiedBehindFinalized {
        block_root: H256,
        justified_epoch: Epoch,
        finalized_epoch: Epoch,
    },
    #[error(
        "block has an older justified checkpoint than its parent \
         (block_root: {block_root:?}, parent_justified_epoch: {parent_justified_epoch}, \
         justified_epoch: {justified_epoch})"
    )]
    JustifiedCheckpointRegressed {
        block_root: H256,
        parent_justified_epoch: Epoch,
        justified_epoch: Epoch,
    },
    #[error(
        "parent of block has an invalid execution payload \
         (block_root: {block_root:?}, parent_root: {parent_root:?})"
    )]
    ParentPayloadInvalid { block_root: H256, parent_root: H256 },
    #[error("parent of block is unknown (block_root: {block_root:?}, parent_root: {parent_root:?})")]
    UnknownParent { block_root: H256, parent_root: H256 },
    #[error("finalized checkpoint conflicts with the stored one (old: {old}, new: {new})")]
    ConflictingFinalizedCheckpoint { old: Checkpoint, new: Checkpoint },
    #[error("weight difference of block overflowed: {block_root:?}")]
    DeltaOverflow { block_root: H256 },
    #[error("number of deltas does not match number of nodes (deltas: {deltas}, nodes: {nodes})")]
    DeltaCountMismatch { deltas: usize, nodes: usize },
    #[error("finalized checkpoint epoch decreased (old: {old}, new: {new})")]
    FinalizedEpochRegressed { old: Checkpoint, new: Checkpoint },
    #[error("justified checkpoint epoch decreased (old: {old}, new: {new})")]
    JustifiedEpochRegressed { old: Checkpoint, new: Checkpoint },
    #[error("block expected to be in the fork choice store is missing: {block_root:?}")]
    MissingNode { block_root: H256 },
    #[error("no block descending from {start_root:?} is eligible to be the head")]
    NoViableHead { start_root: H256 },
    #[error("block that received proposer boost is missing: {block_root:?}")]
    ProposerBoostNodeMissing { block_root: H256 },
    #[error(
        "justified checkpoint is older than finalized checkpoint \
         (justified: {justified}, finalized: {finalized})"
    )]
    StoreJustifiedBehindFinalized {
        justified: Checkpoint,
        finalized: Checkpoint,
    },
    #[error("sum of justified balances overflowed")]
    TotalBalanceOverflow,
    #[error(
        "block with a valid execution payload has an ancestor with an invalid one \
         (block_root: {block_root:?}, ancestor_root: {ancestor_root:?})"
    )]
    ValidPayloadHasInvalidAncestor {
        block_root: H256,
        ancestor_root: H256,
    },
    #[error("weight of block overflowed (block_root: {block_root:?}, weight: {weight}, delta: {delta})")]
    WeightOverflow {
        block_root: H256,
        weight: Gwei,
        delta: Difference,
    },
    #[error("weight of block underflowed (block_root: {block_root:?}, weight: {weight}, delta: {delta})")]
    WeightUnderflow {
        block_root: H256,
        weight: Gwei,
        delta: Difference,
    },
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AttestationForFutureBlock { .. }
            | Self::AttestationFromFuture { .. }
            | Self::AttestationTargetNotDescendantOfFinalized { .. }
            | Self::EmptyAttesterSet { .. }
            | Self::UnknownTargetRoot { .. }
            | Self::UnknownValidatorIndex { .. } => ErrorKind::InvalidAttestation,
            Self::BlockFromFuture { .. }
            | Self::CheckpointNotInChain { .. }
            | Self::BlockNotDescendantOfFinalized { .. }
            | Self::BlockNotLaterThanFinalized { .. }
            | Self::BlockNotLaterThanParent { .. }
            | Self::FinalizedCheckpointConflict { .. }
            | Self::FinalizedCheckpointRegressed { .. }
            | Self::JustifiedBehindFinalized { .. }
            | Self::JustifiedCheckpointRegressed { .. }
            | Self::ParentPayloadInvalid { .. }
            | Self::UnknownParent { .. } => ErrorKind::InvalidBlock,
            Self::ConflictingFinalizedCheckpoint { .. }
            | Self::DeltaCountMismatch { .. }
            | Self::DeltaOverflow { .. }
            | Self::FinalizedEpochRegressed { .. }
            | Self::JustifiedEpochRegressed { .. }
            | Self::MissingNode { .. }
            | Self::NoViableHead { .. }
            | Self::ProposerBoostNodeMissing { .. }
            | Self::StoreJustifiedBehindFinalized { .. }
            | Self::TotalBalanceOverflow
            | Self::ValidPayloadHasInvalidAncestor { .. }
            | Self::WeightOverflow { .. }
            | Self::WeightUnderflow { .. } => ErrorKind::Fatal,
        }
    }
}

/// Classifies an error returned by [`Store`](crate::Store).
///
/// Errors that did not originate in this crate (integer conversions, for example) are fatal.
#[must_use]
pub fn classify(error: &AnyhowError) -> ErrorKind {
    error
        .downcast_ref::<Error>()
        .map_or(ErrorKind::Fatal, Error::kind)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn classify_recognizes_errors_of_this_crate() {
        let error = AnyhowError::new(Error::UnknownParent {
            block_root: H256::repeat_byte(1),
            parent_root: H256::repeat_byte(2),
        });

        assert_eq!(classify(&error), ErrorKind::InvalidBlock);
    }

    #[test]
    fn classify_treats_foreign_errors_as_fatal() {
        assert_eq!(classify(&anyhow!("disk on fire")), ErrorKind::Fatal);
    }

    #[test]
    fn classify_sees_through_context() {
        let error = AnyhowError::new(Error::EmptyAttesterSet {
            beacon_block_root: H256::zero(),
            slot: 3,
        })
        .context("while processing gossip");

        assert_eq!(classify(&error), ErrorKind::InvalidAttestation);
    }

    #[test]
    fn error_kinds_are_displayed_in_snake_case() {
        assert_eq!(ErrorKind::InvalidBlock.to_string(), "invalid_block");
        assert_eq!(ErrorKind::Fatal.as_ref(), "fatal");
    }
}
