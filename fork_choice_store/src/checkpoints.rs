use anyhow::{ensure, Result};
use log::info;
use types::phase0::{containers::Checkpoint, primitives::H256};

use crate::error::Error;

/// Receives notifications about checkpoint progress.
///
/// Implementations must not call back into the [`Store`](crate::Store) that owns them.
pub trait CheckpointHandler {
    fn on_justified(&mut self, checkpoint: Checkpoint);

    fn on_finalized(&mut self, checkpoint: Checkpoint);
}

impl<H: CheckpointHandler> CheckpointHandler for &mut H {
    fn on_justified(&mut self, checkpoint: Checkpoint) {
        (*self).on_justified(checkpoint);
    }

    fn on_finalized(&mut self, checkpoint: Checkpoint) {
        (*self).on_finalized(checkpoint);
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct NullCheckpointHandler;

impl CheckpointHandler for NullCheckpointHandler {
    fn on_justified(&mut self, _checkpoint: Checkpoint) {}

    fn on_finalized(&mut self, _checkpoint: Checkpoint) {}
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CheckpointChanges {
    pub justified_updated: bool,
    pub finalized_updated: bool,
}

impl CheckpointChanges {
    #[must_use]
    pub const fn any(self) -> bool {
        self.justified_updated || self.finalized_updated
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointStore<H> {
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    best_justified_checkpoint: Checkpoint,
    proposer_boost_root: Option<H256>,
    handler: H,
}

impl<H: CheckpointHandler> CheckpointStore<H> {
    #[must_use]
    pub const fn new(anchor_checkpoint: Checkpoint, handler: H) -> Self {
        Self {
            justified_checkpoint: anchor_checkpoint,
            finalized_checkpoint: anchor_checkpoint,
            best_justified_checkpoint: anchor_checkpoint,
            proposer_boost_root: None,
            handler,
        }
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub const fn best_justified_checkpoint(&self) -> Checkpoint {
        self.best_justified_checkpoint
    }

    #[must_use]
    pub const fn proposer_boost_root(&self) -> Option<H256> {
        self.proposer_boost_root
    }

    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Replaces the stored checkpoints and notifies the handler about the ones that advanced.
    ///
    /// Checkpoints with the same epoch as the stored ones are left unchanged.
    /// Nothing is modified if any of the checks fail.
    pub fn update_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Result<CheckpointChanges> {
        self.replace_checkpoints(justified_checkpoint, finalized_checkpoint, false)
    }

    /// Like [`update_checkpoints`](Self::update_checkpoints), but the justified checkpoint may move
    /// to an older epoch or to a different root in the same epoch.
    ///
    /// Used when finality moves to a chain that does not contain the stored justified checkpoint.
    pub(crate) fn realign_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Result<CheckpointChanges> {
        self.replace_checkpoints(justified_checkpoint, finalized_checkpoint, true)
    }

    fn replace_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        allow_justified_reset: bool,
    ) -> Result<CheckpointChanges> {
        let old_justified = self.justified_checkpoint;
        let old_finalized = self.finalized_checkpoint;

        ensure!(
            allow_justified_reset || justified_checkpoint.epoch >= old_justified.epoch,
            Error::JustifiedEpochRegressed {
                old: old_justified,
                new: justified_checkpoint,
            },
        );

        ensure!(
            finalized_checkpoint.epoch >= old_finalized.epoch,
            Error::FinalizedEpochRegressed {
                old: old_finalized,
                new: finalized_checkpoint,
            },
        );

        ensure!(
            finalized_checkpoint.epoch > old_finalized.epoch
                || finalized_checkpoint.root == old_finalized.root,
            Error::ConflictingFinalizedCheckpoint {
                old: old_finalized,
                new: finalized_checkpoint,
            },
        );

        ensure!(
            justified_checkpoint.epoch >= finalized_checkpoint.epoch,
            Error::StoreJustifiedBehindFinalized {
                justified: justified_checkpoint,
                finalized: finalized_checkpoint,
            },
        );

        let changes = CheckpointChanges {
            justified_updated: justified_checkpoint.epoch > old_justified.epoch
                || (allow_justified_reset && justified_checkpoint != old_justified),
            finalized_updated: finalized_checkpoint.epoch > old_finalized.epoch,
        };

        if changes.justified_updated {
            info!("justified checkpoint updated: {justified_checkpoint}");

            self.justified_checkpoint = justified_checkpoint;

            if self.best_justified_checkpoint.epoch < justified_checkpoint.epoch {
                self.best_justified_checkpoint = justified_checkpoint;
            }

            self.handler.on_justified(justified_checkpoint);
        }

        if changes.finalized_updated {
            info!("finalized checkpoint updated: {finalized_checkpoint}");

            self.finalized_checkpoint = finalized_checkpoint;
            self.handler.on_finalized(finalized_checkpoint);
        }

        Ok(changes)
    }

    /// Raises the best justified checkpoint if `checkpoint` is newer.
    ///
    /// Returns `true` if the checkpoint was updated.
    pub(crate) fn update_best_justified_checkpoint(&mut self, checkpoint: Checkpoint) -> bool {
        let updated = checkpoint.epoch > self.best_justified_checkpoint.epoch;

        if updated {
            self.best_justified_checkpoint = checkpoint;
        }

        updated
    }

    pub(crate) fn reset_best_justified_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.best_justified_checkpoint = checkpoint;
    }

    pub(crate) fn set_proposer_boost_root(&mut self, proposer_boost_root: Option<H256>) {
        self.proposer_boost_root = proposer_boost_root;
    }
}
