use core::ops::Range;
use std::sync::Arc;

use anyhow::Result;
use helper_functions::misc;
use types::{
    config::Config,
    nonstandard::ExecutionStatus,
    phase0::{
        consts::GENESIS_SLOT,
        containers::Checkpoint,
        primitives::{Epoch, Gwei, Slot, H256},
    },
    preset::Minimal,
};

use crate::{
    checkpoints::CheckpointHandler,
    error::{classify, ErrorKind},
    misc::{BlockSummary, PostState},
    store::Store,
    store_config::StoreConfig,
};

pub const VALIDATOR_COUNT: usize = 64;
pub const BALANCE: Gwei = 32_000_000_000;

#[derive(Default)]
pub struct CheckpointLog {
    pub justified: Vec<Checkpoint>,
    pub finalized: Vec<Checkpoint>,
}

impl CheckpointHandler for CheckpointLog {
    fn on_justified(&mut self, checkpoint: Checkpoint) {
        self.justified.push(checkpoint);
    }

    fn on_finalized(&mut self, checkpoint: Checkpoint) {
        self.finalized.push(checkpoint);
    }
}

pub struct Status {
    pub head: H256,
    pub justified_epoch: Epoch,
    pub finalized_epoch: Epoch,
    pub node_count: usize,
}

pub struct Context {
    store: Store<Minimal, CheckpointLog>,
    balances: Arc<[Gwei]>,
}

impl Context {
    pub fn minimal() -> Self {
        Self::with_config(Config::minimal().without_proposer_boost(), StoreConfig::default())
    }

    pub fn with_config(chain_config: Config, store_config: StoreConfig) -> Self {
        let balances = Arc::<[Gwei]>::from(vec![BALANCE; VALIDATOR_COUNT]);

        let anchor_block = BlockSummary {
            block_root: anchor_root(),
            parent_root: H256::zero(),
            slot: GENESIS_SLOT,
        };

        let anchor_state = PostState {
            current_justified_checkpoint: genesis_checkpoint(),
            finalized_checkpoint: genesis_checkpoint(),
            active_balances: Arc::clone(&balances),
        };

        let store = Store::new(
            Arc::new(chain_config),
            store_config,
            anchor_block,
            &anchor_state,
            ExecutionStatus::Valid(H256::repeat_byte(0xee)),
            CheckpointLog::default(),
        );

        Self { store, balances }
    }

    pub const fn store(&self) -> &Store<Minimal, CheckpointLog> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<Minimal, CheckpointLog> {
        &mut self.store
    }

    pub fn on_slot(&mut self, slot: Slot) {
        self.store
            .on_slot(slot)
            .expect("ticks are applied in tests only when the store is consistent");
    }

    pub fn post_state(&self, justified: Checkpoint, finalized: Checkpoint) -> PostState {
        PostState {
            current_justified_checkpoint: justified,
            finalized_checkpoint: finalized,
            active_balances: Arc::clone(&self.balances),
        }
    }

    pub fn try_block(
        &mut self,
        block_root: H256,
        parent_root: H256,
        slot: Slot,
        justified: Checkpoint,
        finalized: Checkpoint,
        execution_status: ExecutionStatus,
    ) -> Result<()> {
        let post_state = self.post_state(justified, finalized);

        let block = BlockSummary {
            block_root,
            parent_root,
            slot,
        };

        self.store.on_block(block, &post_state, execution_status)
    }

    /// Adds a block with the same checkpoints as the genesis state.
    pub fn block(&mut self, block_root: H256, parent_root: H256, slot: Slot) {
        self.block_with_checkpoints(
            block_root,
            parent_root,
            slot,
            genesis_checkpoint(),
            genesis_checkpoint(),
        );
    }

    pub fn block_with_checkpoints(
        &mut self,
        block_root: H256,
        parent_root: H256,
        slot: Slot,
        justified: Checkpoint,
        finalized: Checkpoint,
    ) {
        self.try_block(
            block_root,
            parent_root,
            slot,
            justified,
            finalized,
            ExecutionStatus::Syncing(block_root),
        )
        .expect("block should be accepted");
    }

    pub fn attest(&mut self, validators: Range<u64>, beacon_block_root: H256, slot: Slot) {
        self.store
            .on_aggregate_attestation(validators, beacon_block_root, slot)
            .expect("attestation should be accepted");
    }

    pub fn update_head(&mut self) -> H256 {
        self.store
            .update_head()
            .expect("store should remain consistent")
    }

    pub fn assert_status(&self, expected_status: Status) {
        assert_eq!(self.store.head(), expected_status.head);
        assert_eq!(
            self.store.justified_checkpoint().epoch,
            expected_status.justified_epoch,
        );
        assert_eq!(
            self.store.finalized_checkpoint().epoch,
            expected_status.finalized_epoch,
        );
        assert_eq!(self.store.node_count(), expected_status.node_count);

        // The head must always descend from the justified block.
        assert!(self
            .store
            .is_descendant(self.store.justified_checkpoint().root, self.store.head()));
    }
}

pub fn block_root(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

pub fn anchor_root() -> H256 {
    H256::repeat_byte(0xaa)
}

// Genesis states have checkpoints with zero roots.
pub const fn genesis_checkpoint() -> Checkpoint {
    Checkpoint {
        epoch: 0,
        root: H256::zero(),
    }
}

pub const fn checkpoint(epoch: Epoch, root: H256) -> Checkpoint {
    Checkpoint { epoch, root }
}

pub const fn start_of_epoch(epoch: Epoch) -> Slot {
    misc::compute_start_slot_at_epoch::<Minimal>(epoch)
}

pub fn stake(validators: u64) -> Gwei {
    validators * BALANCE
}

pub fn assert_error_kind<T: core::fmt::Debug>(result: Result<T>, expected_kind: ErrorKind) {
    let error = result.expect_err("operation should fail");
    assert_eq!(classify(&error), expected_kind, "{error:?}");
}
