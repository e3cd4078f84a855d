//! Implementation of [Beacon Chain Fork Choice] on top of a [`proto_array`].
//!
//! Blocks are stored in a single vector ordered so that every block comes after its parent.
//! Blocks refer to each other by their position in the vector. Pruning after finalization rebuilds
//! the vector along with the map from block roots to positions.
//!
//! The work is split into cheap mutations and a single expensive step:
//! - [`Store::on_block`] appends a block with a weight of 0.
//! - [`Store::on_attestation`] and [`Store::on_aggregate_attestation`] only record votes.
//! - [`Store::update_head`] converts vote changes since the previous call into per-block weight
//!   differences, propagates them to ancestors in one pass, recomputes the best descendant of
//!   every block and returns the best descendant of the justified block.
//!
//! [`Store::head`] does not reflect votes recorded since the last call to [`Store::update_head`].
//!
//! Blocks may be imported optimistically, before the execution layer has verified their payloads.
//! Blocks with invalid payloads and their descendants are kept in the store but can never become
//! the head.
//!
//! The store performs no I/O and no locking. All mutating calls must be serialized by the caller.
//!
//! Failures are reported as [`anyhow::Error`]s wrapping [`Error`]. Use [`classify`] to tell apart
//! bad inputs from broken invariants.
//!
//! Notes on nomenclature:
//! - Pruning means removing blocks that do not descend from the finalized block.
//! - Viable blocks are ones that may become the head. The rest stay in the store until pruned.
//!
//! [Beacon Chain Fork Choice]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md
//! [`proto_array`]:            https://github.com/protolambda/lmd-ghost/tree/242f0dced3b34feed0d4e9d2fd0e5e66e448c359#array-based-stateful-dag-proto_array

pub use crate::{
    checkpoints::{CheckpointChanges, CheckpointHandler, CheckpointStore, NullCheckpointHandler},
    error::{classify, Error, ErrorKind},
    misc::{BlockSummary, Difference, PostState, ProtoNode, Score, VoteTracker},
    proto_array::{Ancestors, ProposerBoost, ProtoArray},
    store::Store,
    store_config::StoreConfig,
};

mod checkpoints;
mod error;
mod misc;
mod proto_array;
mod store;
mod store_config;

#[cfg(test)]
mod helpers;
