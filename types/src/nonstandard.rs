use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use strum::AsRefStr;

use crate::phase0::primitives::ExecutionBlockHash;

/// Verdict of the execution layer on the payload of a block.
///
/// Legal transitions for a single block are `PreMerge → Syncing → {Valid, Invalid}`.
/// `Valid` and `Invalid` are terminal. A block may also enter the fork choice directly in any of
/// the terminal states if the execution layer already knows the payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, AsRefStr, Deserialize, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The block has no execution payload.
    PreMerge,
    /// The payload has not been verified yet. Blocks in this state are imported optimistically.
    Syncing(ExecutionBlockHash),
    Valid(ExecutionBlockHash),
    Invalid(ExecutionBlockHash),
}

assert_eq_size!(ExecutionStatus, [u8; 33]);

impl ExecutionStatus {
    #[must_use]
    pub const fn execution_block_hash(self) -> Option<ExecutionBlockHash> {
        match self {
            Self::PreMerge => None,
            Self::Syncing(block_hash) | Self::Valid(block_hash) | Self::Invalid(block_hash) => {
                Some(block_hash)
            }
        }
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub const fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    #[must_use]
    pub const fn is_optimistic(self) -> bool {
        matches!(self, Self::Syncing(_))
    }

    /// Returns the status with the same payload hash but marked valid.
    ///
    /// `PreMerge` blocks have nothing to validate and are returned unchanged.
    #[must_use]
    pub const fn into_valid(self) -> Self {
        match self.execution_block_hash() {
            Some(block_hash) => Self::Valid(block_hash),
            None => Self::PreMerge,
        }
    }

    #[must_use]
    pub const fn into_invalid(self) -> Self {
        match self.execution_block_hash() {
            Some(block_hash) => Self::Invalid(block_hash),
            None => Self::Invalid(ExecutionBlockHash::zero()),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const HASH: ExecutionBlockHash = ExecutionBlockHash::repeat_byte(7);

    #[test_case(ExecutionStatus::PreMerge => None)]
    #[test_case(ExecutionStatus::Syncing(HASH) => Some(HASH))]
    #[test_case(ExecutionStatus::Valid(HASH) => Some(HASH))]
    #[test_case(ExecutionStatus::Invalid(HASH) => Some(HASH))]
    fn execution_block_hash(status: ExecutionStatus) -> Option<ExecutionBlockHash> {
        status.execution_block_hash()
    }

    #[test_case(ExecutionStatus::PreMerge => ExecutionStatus::PreMerge)]
    #[test_case(ExecutionStatus::Syncing(HASH) => ExecutionStatus::Valid(HASH))]
    #[test_case(ExecutionStatus::Valid(HASH) => ExecutionStatus::Valid(HASH))]
    fn into_valid(status: ExecutionStatus) -> ExecutionStatus {
        status.into_valid()
    }

    #[test]
    fn invalidating_keeps_payload_hash() {
        assert_eq!(
            ExecutionStatus::Syncing(HASH).into_invalid(),
            ExecutionStatus::Invalid(HASH),
        );
    }

    #[test]
    fn status_labels_are_snake_case() {
        assert_eq!(ExecutionStatus::PreMerge.as_ref(), "pre_merge");
        assert_eq!(ExecutionStatus::Syncing(HASH).as_ref(), "syncing");
    }
}
