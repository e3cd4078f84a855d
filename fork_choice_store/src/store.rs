use core::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use anyhow::{ensure, Result};
use helper_functions::misc;
use im::{HashSet, Vector};
use itertools::Itertools as _;
use log::{debug, info, warn};
use tap::Pipe as _;
use typenum::Unsigned as _;
use types::{
    config::Config as ChainConfig,
    nonstandard::ExecutionStatus,
    phase0::{
        consts::GENESIS_EPOCH,
        containers::Checkpoint,
        primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{
    checkpoints::{CheckpointChanges, CheckpointHandler, CheckpointStore, NullCheckpointHandler},
    error::Error,
    misc::{BlockSummary, Difference, PostState, ProtoNode, QueuedVote, VoteTracker},
    proto_array::{Ancestors, ProposerBoost, ProtoArray},
    store_config::StoreConfig,
};

/// [`Store`] from the Ethereum fork choice rules backed by a [`ProtoArray`].
///
/// Blocks and attestations are cheap to add. Their effect on weights is only realized in
/// [`Store::update_head`], so [`Store::head`] does not reflect attestations received since the
/// last call to it.
///
/// [`Store`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#store
#[derive(Clone)]
pub struct Store<P: Preset, H = NullCheckpointHandler> {
    chain_config: Arc<ChainConfig>,
    store_config: StoreConfig,
    // Supplied by the caller. The fork choice rule does not need a precise timestamp.
    slot: Slot,
    proto_array: ProtoArray,
    checkpoints: CheckpointStore<H>,
    equivocating_indices: HashSet<ValidatorIndex>,
    // Indexed by validator index. Grows when a validator with a higher index votes for the first
    // time.
    votes: Vector<VoteTracker>,
    // Attestations only affect the fork choice of subsequent slots.
    current_slot_votes: Vec<QueuedVote>,
    // Effective balances from the justified state. Votes are weighted with these.
    justified_active_balances: Arc<[Gwei]>,
    // Balances from the state that carried `best_justified_checkpoint`.
    best_justified_active_balances: Arc<[Gwei]>,
    // Cached timely proposer score derived from `Store.justified_active_balances`.
    timely_proposer_score: OnceLock<Gwei>,
    head: H256,
    phantom: PhantomData<P>,
}

impl<P: Preset, H: CheckpointHandler> Store<P, H> {
    /// Creates a store containing only the anchor block.
    ///
    /// The anchor is treated as both justified and finalized regardless of the checkpoints in
    /// `anchor_state`. Only its balances are used.
    #[must_use]
    pub fn new(
        chain_config: Arc<ChainConfig>,
        store_config: StoreConfig,
        anchor_block: BlockSummary,
        anchor_state: &PostState,
        anchor_execution_status: ExecutionStatus,
        checkpoint_handler: H,
    ) -> Self {
        let block_root = anchor_block.block_root;

        let anchor_checkpoint = Checkpoint {
            epoch: misc::compute_epoch_at_slot::<P>(anchor_block.slot),
            root: block_root,
        };

        let anchor = ProtoNode::new(
            anchor_block,
            anchor_checkpoint,
            anchor_checkpoint,
            anchor_execution_status,
        );

        Self {
            chain_config,
            store_config,
            slot: anchor_block.slot,
            proto_array: ProtoArray::new(anchor, anchor_checkpoint, anchor_checkpoint),
            checkpoints: CheckpointStore::new(anchor_checkpoint, checkpoint_handler),
            equivocating_indices: HashSet::new(),
            votes: Vector::new(),
            current_slot_votes: vec![],
            justified_active_balances: Arc::clone(&anchor_state.active_balances),
            best_justified_active_balances: Arc::clone(&anchor_state.active_balances),
            timely_proposer_score: OnceLock::new(),
            head: block_root,
            phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        self.store_config
    }

    #[must_use]
    pub const fn checkpoint_handler(&self) -> &H {
        self.checkpoints.handler()
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.checkpoints.justified_checkpoint()
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.checkpoints.finalized_checkpoint()
    }

    #[must_use]
    pub const fn best_justified_checkpoint(&self) -> Checkpoint {
        self.checkpoints.best_justified_checkpoint()
    }

    #[must_use]
    pub const fn proposer_boost_root(&self) -> Option<H256> {
        self.checkpoints.proposer_boost_root()
    }

    #[must_use]
    pub fn justified_active_balances(&self) -> &[Gwei] {
        &self.justified_active_balances
    }

    /// Returns the head computed by the last call to [`Store::update_head`].
    ///
    /// Invalidations and checkpoint changes also refresh it, but without accounting for votes
    /// received in the meantime.
    #[must_use]
    pub const fn head(&self) -> H256 {
        self.head
    }

    /// Returns the tips of all chains that are eligible to become the head.
    #[must_use]
    pub fn heads(&self) -> Vec<&ProtoNode> {
        self.proto_array.heads()
    }

    #[must_use]
    pub fn block(&self, block_root: H256) -> Option<&ProtoNode> {
        self.proto_array.get(block_root)
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.proto_array.contains(block_root)
    }

    /// Returns an iterator over the block with root `block_root` and its ancestors.
    ///
    /// The iterator ends with the oldest block still in the store.
    /// It is empty if `block_root` is unknown.
    #[must_use]
    pub fn ancestors(&self, block_root: H256) -> Ancestors<'_> {
        self.proto_array.ancestors(block_root)
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, descendant_root: H256) -> bool {
        self.proto_array.is_descendant(ancestor_root, descendant_root)
    }

    #[must_use]
    pub fn weight(&self, block_root: H256) -> Option<Gwei> {
        self.block(block_root).map(|node| node.weight)
    }

    #[must_use]
    pub fn is_optimistic(&self, block_root: H256) -> Option<bool> {
        self.block(block_root)
            .map(|node| node.execution_status.is_optimistic())
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.proto_array.len()
    }

    /// Returns the root of the latest recorded vote of a validator.
    ///
    /// Votes for the current slot are not recorded until the next slot.
    #[must_use]
    pub fn latest_vote(&self, validator_index: ValidatorIndex) -> Option<H256> {
        let index = usize::try_from(validator_index).ok()?;
        self.votes.get(index)?.next_root
    }

    /// [`on_tick`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_tick)
    pub fn on_slot(&mut self, new_slot: Slot) -> Result<()> {
        let old_slot = self.slot;

        // If multiple tick updates are performed in quick succession, they can come in any order.
        if new_slot <= old_slot {
            return Ok(());
        }

        // > update store time
        self.slot = new_slot;

        // > Reset store.proposer_boost_root if this is a new slot
        self.checkpoints.set_proposer_boost_root(None);

        // > Not a new epoch, return
        // > Update store.justified_checkpoint if a better checkpoint on the store.finalized_checkpoint chain
        if misc::compute_epoch_at_slot::<P>(new_slot) > misc::compute_epoch_at_slot::<P>(old_slot) {
            let best_justified_checkpoint = self.best_justified_checkpoint();
            let finalized_checkpoint = self.finalized_checkpoint();

            if best_justified_checkpoint.epoch > self.justified_checkpoint().epoch
                && self.is_descendant(finalized_checkpoint.root, best_justified_checkpoint.root)
            {
                let changes = self
                    .checkpoints
                    .update_checkpoints(best_justified_checkpoint, finalized_checkpoint)?;

                let balances = Arc::clone(&self.best_justified_active_balances);

                self.apply_checkpoint_changes(changes, Some(balances))?;
            }
        }

        for vote in core::mem::take(&mut self.current_slot_votes) {
            let QueuedVote {
                validator_index,
                beacon_block_root,
                slot,
            } = vote;

            if !self.equivocating_indices.contains(&validator_index) {
                self.record_vote(validator_index, beacon_block_root, slot)?;
            }
        }

        Ok(())
    }

    /// [`on_block`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_block)
    ///
    /// `post_state` must be the result of applying the block to the state of its parent.
    /// The block itself is assumed to have been validated by the state transition function.
    pub fn on_block(
        &mut self,
        block: BlockSummary,
        post_state: &PostState,
        execution_status: ExecutionStatus,
    ) -> Result<()> {
        let BlockSummary {
            block_root,
            parent_root,
            slot,
        } = block;

        if self.contains_block(block_root) {
            debug!("ignoring block that is already known: {block_root:?}");
            return Ok(());
        }

        let parent = self
            .block(parent_root)
            .ok_or(Error::UnknownParent {
                block_root,
                parent_root,
            })?;

        // > Blocks cannot be in the future.
        // > If they are, their consideration must be delayed until they are in the past.
        ensure!(
            slot <= self.slot,
            Error::BlockFromFuture {
                block_root,
                slot,
                current_slot: self.slot,
            },
        );

        ensure!(
            slot > parent.slot,
            Error::BlockNotLaterThanParent {
                block_root,
                slot,
                parent_slot: parent.slot,
            },
        );

        // > Check that block is later than the finalized epoch slot
        // > (optimization to reduce calls to get_ancestor)
        let finalized_checkpoint = self.finalized_checkpoint();
        let finalized_slot = misc::compute_start_slot_at_epoch::<P>(finalized_checkpoint.epoch);

        ensure!(
            slot > finalized_slot,
            Error::BlockNotLaterThanFinalized {
                block_root,
                slot,
                finalized_slot,
            },
        );

        ensure!(
            !parent.execution_status.is_invalid(),
            Error::ParentPayloadInvalid {
                block_root,
                parent_root,
            },
        );

        // > Check block is a descendant of the finalized block at the checkpoint finalized slot
        ensure!(
            self.is_descendant(finalized_checkpoint.root, parent_root),
            Error::BlockNotDescendantOfFinalized {
                block_root,
                finalized_root: finalized_checkpoint.root,
            },
        );

        self.validate_post_state_checkpoints(block_root, parent, post_state)?;

        let node = ProtoNode::new(
            block,
            post_state.current_justified_checkpoint,
            post_state.finalized_checkpoint,
            execution_status,
        );

        self.proto_array.insert(node)?;

        // > Add proposer score boost if the block is timely
        if slot == self.slot && self.proposer_boost_root().is_none() {
            self.checkpoints.set_proposer_boost_root(Some(block_root));
        }

        debug!("block accepted (block_root: {block_root:?}, slot: {slot})");

        self.update_checkpoints_after_block(post_state)
    }

    /// [`on_attestation`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attestation)
    pub fn on_attestation(
        &mut self,
        validator_index: ValidatorIndex,
        beacon_block_root: H256,
        slot: Slot,
    ) -> Result<()> {
        self.on_aggregate_attestation([validator_index], beacon_block_root, slot)
    }

    /// Records the same vote for every validator in `attesting_indices`.
    ///
    /// Either all of the votes are recorded or none of them are.
    pub fn on_aggregate_attestation(
        &mut self,
        attesting_indices: impl IntoIterator<Item = ValidatorIndex>,
        beacon_block_root: H256,
        slot: Slot,
    ) -> Result<()> {
        let attesting_indices = attesting_indices.into_iter().collect_vec();

        ensure!(
            !attesting_indices.is_empty(),
            Error::EmptyAttesterSet {
                beacon_block_root,
                slot,
            },
        );

        self.validate_attestation(beacon_block_root, slot)?;

        let validator_count = self.justified_active_balances.len();

        for validator_index in attesting_indices.iter().copied() {
            let is_known = usize::try_from(validator_index)
                .is_ok_and(|validator_index| validator_index < validator_count);

            ensure!(
                is_known,
                Error::UnknownValidatorIndex {
                    validator_index,
                    validator_count,
                },
            );
        }

        for validator_index in attesting_indices {
            // Votes of slashed validators should not be used to compute the head.
            if self.equivocating_indices.contains(&validator_index) {
                continue;
            }

            // > Attestations can only affect the fork choice of subsequent slots.
            // > Delay consideration in the fork choice until their slot is in the past.
            if slot == self.slot {
                self.current_slot_votes.push(QueuedVote {
                    validator_index,
                    beacon_block_root,
                    slot,
                });
            } else {
                self.record_vote(validator_index, beacon_block_root, slot)?;
            }
        }

        Ok(())
    }

    /// [`on_attester_slashing`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attester_slashing)
    ///
    /// The weight of the slashed validators is removed in the next call to [`Store::update_head`].
    pub fn on_attester_slashing(
        &mut self,
        slashable_indices: impl IntoIterator<Item = ValidatorIndex>,
    ) {
        for validator_index in slashable_indices {
            if self.equivocating_indices.insert(validator_index).is_none() {
                debug!("validator {validator_index} equivocated");
            }
        }
    }

    /// Folds all vote changes since the last call into block weights and returns the new head.
    ///
    /// [`get_head`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head)
    pub fn update_head(&mut self) -> Result<H256> {
        let (deltas, votes) = self.vote_deltas()?;

        self.apply_deltas(deltas)?;
        self.votes = votes;

        self.find_head()
    }

    /// Raises the justified checkpoint without a block that carries it.
    ///
    /// The justified balances are left unchanged.
    /// Use [`Store::update_justified_balances`] to replace them.
    pub fn on_justified(&mut self, checkpoint: Checkpoint) -> Result<()> {
        ensure!(
            self.contains_block(checkpoint.root),
            Error::MissingNode {
                block_root: checkpoint.root,
            },
        );

        let changes = self
            .checkpoints
            .update_checkpoints(checkpoint, self.finalized_checkpoint())?;

        self.apply_checkpoint_changes(changes, None)
    }

    /// Raises the finalized checkpoint without a block that carries it.
    ///
    /// The justified checkpoint is moved to `checkpoint` if it is older or not descended from it.
    pub fn on_finalized(&mut self, checkpoint: Checkpoint) -> Result<()> {
        ensure!(
            self.contains_block(checkpoint.root),
            Error::MissingNode {
                block_root: checkpoint.root,
            },
        );

        let justified_checkpoint = self.justified_checkpoint();

        let changes = if checkpoint.epoch > justified_checkpoint.epoch {
            self.checkpoints.update_checkpoints(checkpoint, checkpoint)?
        } else if self.is_descendant(checkpoint.root, justified_checkpoint.root) {
            self.checkpoints
                .update_checkpoints(justified_checkpoint, checkpoint)?
        } else {
            self.checkpoints.realign_checkpoints(checkpoint, checkpoint)?
        };

        self.apply_checkpoint_changes(changes, None)
    }

    /// Marks the payload of a block and all of its descendants invalid and recomputes the head.
    pub fn on_execution_payload_invalidated(&mut self, block_root: H256) -> Result<()> {
        if !self.contains_block(block_root) {
            warn!("ignoring invalidation of unknown block: {block_root:?}");
            return Ok(());
        }

        let invalidated = self.proto_array.invalidate(block_root)?;

        info!("marked payloads of {invalidated} blocks invalid starting with {block_root:?}");

        self.refresh_head()?;

        Ok(())
    }

    /// Marks the payload of a block and all of its optimistic ancestors valid.
    pub fn on_execution_payload_validated(&mut self, block_root: H256) -> Result<()> {
        if !self.contains_block(block_root) {
            warn!("ignoring validation of unknown block: {block_root:?}");
            return Ok(());
        }

        self.proto_array.validate(block_root)
    }

    /// Replaces the balances used to weigh votes.
    ///
    /// Existing votes are reweighed in the next call to [`Store::update_head`].
    pub fn update_justified_balances(&mut self, active_balances: Arc<[Gwei]>) {
        // `Store.timely_proposer_score` is derived from `Store.justified_active_balances`.
        self.timely_proposer_score.take();
        self.justified_active_balances = active_balances;
    }

    fn validate_attestation(&self, beacon_block_root: H256, slot: Slot) -> Result<()> {
        // > Attestations cannot be from future epochs.
        // > If they are, delay consideration until the epoch arrives.
        ensure!(
            slot <= self.slot,
            Error::AttestationFromFuture {
                slot,
                current_slot: self.slot,
            },
        );

        // > Attestations must be for a known block.
        // > If block is unknown, delay consideration until the block is found.
        let block = self
            .block(beacon_block_root)
            .ok_or(Error::UnknownTargetRoot { beacon_block_root })?;

        // > Attestations must not be for blocks in the future. If not, the attestation should not
        // > be considered.
        ensure!(
            block.slot <= slot,
            Error::AttestationForFutureBlock {
                beacon_block_root,
                attestation_slot: slot,
                block_slot: block.slot,
            },
        );

        let finalized_root = self.finalized_checkpoint().root;

        ensure!(
            self.is_descendant(finalized_root, beacon_block_root),
            Error::AttestationTargetNotDescendantOfFinalized {
                beacon_block_root,
                finalized_root,
            },
        );

        Ok(())
    }

    fn validate_post_state_checkpoints(
        &self,
        block_root: H256,
        parent: &ProtoNode,
        post_state: &PostState,
    ) -> Result<()> {
        let justified_checkpoint = post_state.current_justified_checkpoint;
        let finalized_checkpoint = post_state.finalized_checkpoint;

        ensure!(
            justified_checkpoint.epoch >= finalized_checkpoint.epoch,
            Error::JustifiedBehindFinalized {
                block_root,
                justified_epoch: justified_checkpoint.epoch,
                finalized_epoch: finalized_checkpoint.epoch,
            },
        );

        for checkpoint in [justified_checkpoint, finalized_checkpoint] {
            ensure!(
                self.checkpoint_in_chain(checkpoint, block_root, parent.block_root),
                Error::CheckpointNotInChain {
                    block_root,
                    checkpoint,
                },
            );
        }

        // The checkpoints of the oldest block in the store are those of the store itself at the
        // time it became the anchor or was finalized. They cannot be compared with post-states.
        if parent.parent.is_none() {
            return Ok(());
        }

        ensure!(
            justified_checkpoint.epoch >= parent.justified_checkpoint.epoch,
            Error::JustifiedCheckpointRegressed {
                block_root,
                parent_justified_epoch: parent.justified_checkpoint.epoch,
                justified_epoch: justified_checkpoint.epoch,
            },
        );

        ensure!(
            finalized_checkpoint.epoch >= parent.finalized_checkpoint.epoch,
            Error::FinalizedCheckpointRegressed {
                block_root,
                parent_finalized_epoch: parent.finalized_checkpoint.epoch,
                finalized_epoch: finalized_checkpoint.epoch,
            },
        );

        ensure!(
            finalized_checkpoint.epoch > parent.finalized_checkpoint.epoch
                || finalized_checkpoint == parent.finalized_checkpoint,
            Error::FinalizedCheckpointConflict {
                block_root,
                parent_finalized: parent.finalized_checkpoint,
                finalized: finalized_checkpoint,
            },
        );

        Ok(())
    }

    // Roots of checkpoints no newer than the finalized one may be pruned or older than the anchor.
    fn checkpoint_in_chain(
        &self,
        checkpoint: Checkpoint,
        block_root: H256,
        parent_root: H256,
    ) -> bool {
        if checkpoint.epoch == GENESIS_EPOCH || checkpoint.root == block_root {
            return true;
        }

        if self.contains_block(checkpoint.root) {
            return self.is_descendant(checkpoint.root, parent_root);
        }

        checkpoint.epoch <= self.finalized_checkpoint().epoch
    }

    fn update_checkpoints_after_block(&mut self, post_state: &PostState) -> Result<()> {
        let PostState {
            current_justified_checkpoint,
            finalized_checkpoint,
            active_balances,
        } = post_state;

        let old_justified_checkpoint = self.justified_checkpoint();
        let old_finalized_checkpoint = self.finalized_checkpoint();

        let mut justified_checkpoint = old_justified_checkpoint;
        let mut new_finalized_checkpoint = old_finalized_checkpoint;

        // > Update justified checkpoint
        if current_justified_checkpoint.epoch > old_justified_checkpoint.epoch {
            if self
                .checkpoints
                .update_best_justified_checkpoint(*current_justified_checkpoint)
            {
                self.best_justified_active_balances = Arc::clone(active_balances);
            }

            if self.should_update_justified_checkpoint(*current_justified_checkpoint) {
                justified_checkpoint = *current_justified_checkpoint;
            }
        }

        let mut justified_reset = false;

        // > Update finalized checkpoint
        if finalized_checkpoint.epoch > old_finalized_checkpoint.epoch {
            new_finalized_checkpoint = *finalized_checkpoint;

            // > Update justified if new justified is later than store justified
            // > or if store justified is not in chain with finalized checkpoint
            if current_justified_checkpoint.epoch > justified_checkpoint.epoch {
                justified_checkpoint = *current_justified_checkpoint;
            } else if !self.is_descendant(finalized_checkpoint.root, justified_checkpoint.root) {
                debug!(
                    "justified checkpoint {justified_checkpoint} is not in chain with \
                     finalized checkpoint {finalized_checkpoint}",
                );

                justified_checkpoint = *current_justified_checkpoint;
                justified_reset = true;
            }
        }

        if justified_checkpoint == old_justified_checkpoint
            && new_finalized_checkpoint == old_finalized_checkpoint
        {
            return Ok(());
        }

        let changes = if justified_reset {
            self.checkpoints
                .realign_checkpoints(justified_checkpoint, new_finalized_checkpoint)?
        } else {
            self.checkpoints
                .update_checkpoints(justified_checkpoint, new_finalized_checkpoint)?
        };

        self.apply_checkpoint_changes(changes, Some(Arc::clone(active_balances)))
    }

    /// [`should_update_justified_checkpoint`](https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/fork-choice.md#should_update_justified_checkpoint)
    fn should_update_justified_checkpoint(&self, new_justified_checkpoint: Checkpoint) -> bool {
        if misc::slots_since_epoch_start::<P>(self.slot)
            < self.chain_config.safe_slots_to_update_justified
        {
            return true;
        }

        self.is_descendant(
            self.justified_checkpoint().root,
            new_justified_checkpoint.root,
        )
    }

    fn apply_checkpoint_changes(
        &mut self,
        changes: CheckpointChanges,
        justified_active_balances: Option<Arc<[Gwei]>>,
    ) -> Result<()> {
        if changes.justified_updated {
            if let Some(balances) = justified_active_balances {
                self.update_justified_balances(balances);
            }
        }

        if changes.finalized_updated {
            let finalized_root = self.finalized_checkpoint().root;
            let best_justified_checkpoint = self.best_justified_checkpoint();

            if !self.is_descendant(finalized_root, best_justified_checkpoint.root) {
                self.checkpoints
                    .reset_best_justified_checkpoint(self.justified_checkpoint());
                self.best_justified_active_balances = Arc::clone(&self.justified_active_balances);
            }

            self.prune_after_finalization()?;
        }

        if changes.any() {
            self.refresh_head()?;
        }

        Ok(())
    }

    fn prune_after_finalization(&mut self) -> Result<()> {
        let finalized_root = self.finalized_checkpoint().root;

        let finalized_index = self
            .proto_array
            .index_of(finalized_root)
            .ok_or(Error::MissingNode {
                block_root: finalized_root,
            })?;

        if finalized_index < self.store_config.prune_threshold {
            return Ok(());
        }

        let pruned = self.proto_array.prune(finalized_root)?;

        if let Some(proposer_boost_root) = self.proposer_boost_root() {
            if !self.contains_block(proposer_boost_root) {
                self.checkpoints.set_proposer_boost_root(None);
            }
        }

        info!(
            "pruned {pruned} blocks not descending from finalized block {finalized_root:?} \
             ({} blocks remaining)",
            self.proto_array.len(),
        );

        Ok(())
    }

    fn record_vote(
        &mut self,
        validator_index: ValidatorIndex,
        beacon_block_root: H256,
        slot: Slot,
    ) -> Result<()> {
        let index = usize::try_from(validator_index)?;

        // `Vector` has no `resize` method as of `im` version 15.1.0.
        if index >= self.votes.len() {
            let added_vacancies = index + 1 - self.votes.len();
            let vacancies = core::iter::repeat_n(VoteTracker::default(), added_vacancies);
            self.votes.extend(vacancies);
        }

        let vote = &mut self.votes[index];

        // > Update latest messages for attesting indices
        if vote.next_root.is_some() && slot < vote.next_slot {
            debug!(
                "ignoring vote older than the latest one \
                 (validator_index: {validator_index}, slot: {slot}, latest_slot: {})",
                vote.next_slot,
            );

            return Ok(());
        }

        vote.next_root = Some(beacon_block_root);
        vote.next_slot = slot;

        Ok(())
    }

    // Each changed vote is applied at both ends.
    // `ProtoArray::apply_deltas` propagates the differences to ancestors.
    // The updated trackers are returned instead of stored so that they can be committed together
    // with the weights.
    fn vote_deltas(&self) -> Result<(Vec<Difference>, Vector<VoteTracker>)> {
        let mut deltas = vec![Difference::default(); self.proto_array.len()];
        let mut votes = self.votes.clone();

        let proto_array = &self.proto_array;
        let balances = self.justified_active_balances.as_ref();
        let equivocating_indices = &self.equivocating_indices;

        let mut add = |root: Option<H256>, balance: Gwei, subtract: bool| -> Result<()> {
            let Some(root) = root else {
                return Ok(());
            };

            let Some(index) = proto_array.index_of(root) else {
                return Ok(());
            };

            let delta = &mut deltas[index];

            *delta = if subtract {
                delta.checked_sub_unsigned(balance)
            } else {
                delta.checked_add_unsigned(balance)
            }
            .ok_or(Error::DeltaOverflow { block_root: root })?;

            Ok(())
        };

        for (index, vote) in votes.iter_mut().enumerate() {
            let validator_index = ValidatorIndex::try_from(index)?;

            if equivocating_indices.contains(&validator_index) {
                add(vote.current_root, vote.applied_balance, true)?;

                *vote = VoteTracker {
                    next_slot: vote.next_slot,
                    ..VoteTracker::default()
                };

                continue;
            }

            let new_balance = balances.get(index).copied().unwrap_or_default();

            if vote.next_root.is_none() || !vote.is_pending(new_balance) {
                continue;
            }

            add(vote.current_root, vote.applied_balance, true)?;
            add(vote.next_root, new_balance, false)?;

            vote.current_root = vote.next_root;
            vote.applied_balance = new_balance;
        }

        Ok((deltas, votes))
    }

    fn refresh_head(&mut self) -> Result<H256> {
        vec![Difference::default(); self.proto_array.len()]
            .pipe(|deltas| self.apply_deltas(deltas))?;

        self.find_head()
    }

    fn apply_deltas(&mut self, deltas: Vec<Difference>) -> Result<()> {
        let proposer_boost = self.proposer_boost()?;

        self.proto_array.apply_deltas(
            deltas,
            self.justified_checkpoint(),
            self.finalized_checkpoint(),
            proposer_boost,
        )
    }

    fn find_head(&mut self) -> Result<H256> {
        let head = self.proto_array.find_head(self.justified_checkpoint().root)?;

        if head != self.head {
            debug!("head changed (old: {:?}, new: {head:?})", self.head);
            self.head = head;
        }

        Ok(head)
    }

    fn proposer_boost(&self) -> Result<ProposerBoost> {
        let root = self.proposer_boost_root();

        let score = root
            .map(|_| self.timely_proposer_score())
            .transpose()?
            .unwrap_or_default();

        Ok(ProposerBoost { root, score })
    }

    // > Boost is applied if root is an ancestor of node
    // > `proposer_score = (committee_weight * PROPOSER_SCORE_BOOST) // 100`
    fn timely_proposer_score(&self) -> Result<Gwei> {
        if let Some(score) = self.timely_proposer_score.get() {
            return Ok(*score);
        }

        let total_active_balance = self
            .justified_active_balances
            .iter()
            .try_fold(0, |total: Gwei, balance| total.checked_add(*balance))
            .ok_or(Error::TotalBalanceOverflow)?;

        let committee_weight = total_active_balance / P::SlotsPerEpoch::U64;

        let score = committee_weight
            .checked_mul(self.chain_config.proposer_score_boost)
            .ok_or(Error::TotalBalanceOverflow)?
            / 100;

        Ok(*self.timely_proposer_score.get_or_init(|| score))
    }
}
