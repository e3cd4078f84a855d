//! An arena of blocks ordered so that parents always precede their children.
//!
//! This is the [`proto_array`] representation of the block tree. Weights are propagated from
//! leaves to the root in a single reverse pass, and each node caches the best leaf reachable from
//! it so that finding the head takes a single lookup.
//!
//! [`proto_array`]: https://github.com/protolambda/lmd-ghost/tree/242f0dced3b34feed0d4e9d2fd0e5e66e448c359#array-based-stateful-dag-proto_array

use core::iter::FusedIterator;

use anyhow::{ensure, Result};
use hash_hasher::HashedMap;
use itertools::{izip, Itertools as _};
use log::warn;
use types::phase0::{
    consts::GENESIS_EPOCH,
    containers::Checkpoint,
    primitives::{Gwei, H256},
};

use crate::{
    error::Error,
    misc::{Difference, ProtoNode},
};

/// Weight temporarily granted to a timely block.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ProposerBoost {
    pub root: Option<H256>,
    pub score: Gwei,
}

#[derive(Clone, Debug)]
pub struct ProtoArray {
    nodes: Vec<ProtoNode>,
    indices: HashedMap<H256, usize>,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    previous_proposer_boost: ProposerBoost,
}

impl ProtoArray {
    /// Creates an array containing only `anchor`.
    ///
    /// The parent of the anchor is never looked up.
    #[must_use]
    pub fn new(
        mut anchor: ProtoNode,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Self {
        anchor.parent = None;
        anchor.best_child = None;
        anchor.best_descendant = None;

        let mut indices = HashedMap::default();
        indices.insert(anchor.block_root, 0);

        Self {
            nodes: vec![anchor],
            indices,
            justified_checkpoint,
            finalized_checkpoint,
            previous_proposer_boost: ProposerBoost::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn index_of(&self, block_root: H256) -> Option<usize> {
        self.indices.get(&block_root).copied()
    }

    #[must_use]
    pub fn contains(&self, block_root: H256) -> bool {
        self.indices.contains_key(&block_root)
    }

    #[must_use]
    pub fn get(&self, block_root: H256) -> Option<&ProtoNode> {
        self.index_of(block_root).and_then(|index| self.nodes.get(index))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ProtoNode> + ExactSizeIterator {
        self.nodes.iter()
    }

    /// Appends `node` to the array as a child of the node with root `node.parent_root`.
    ///
    /// Inserting a block that is already present has no effect.
    /// Weights and best descendants are not updated until the next [`Self::apply_deltas`].
    pub fn insert(&mut self, mut node: ProtoNode) -> Result<usize> {
        if let Some(index) = self.index_of(node.block_root) {
            return Ok(index);
        }

        let parent = self.index_of(node.parent_root).ok_or(Error::UnknownParent {
            block_root: node.block_root,
            parent_root: node.parent_root,
        })?;

        node.parent = Some(parent);
        node.weight = 0;
        node.best_child = None;
        node.best_descendant = None;

        let index = self.nodes.len();

        self.indices.insert(node.block_root, index);
        self.nodes.push(node);

        Ok(index)
    }

    /// Applies weight changes and recomputes the best descendant of every node.
    ///
    /// `deltas` must contain exactly one entry per node.
    /// The previously applied proposer boost is removed before `proposer_boost` is added.
    pub fn apply_deltas(
        &mut self,
        mut deltas: Vec<Difference>,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
        proposer_boost: ProposerBoost,
    ) -> Result<()> {
        ensure!(
            deltas.len() == self.nodes.len(),
            Error::DeltaCountMismatch {
                deltas: deltas.len(),
                nodes: self.nodes.len(),
            },
        );

        // The previously boosted block may have been pruned along with its weight.
        let previous = self.previous_proposer_boost;

        if let Some(index) = previous.root.and_then(|root| self.index_of(root)) {
            let score = Difference::try_from(previous.score)?;
            self.add_to_delta(&mut deltas, index, -score)?;
        }

        if let Some(block_root) = proposer_boost.root {
            let index = self
                .index_of(block_root)
                .ok_or(Error::ProposerBoostNodeMissing { block_root })?;

            let score = Difference::try_from(proposer_boost.score)?;
            self.add_to_delta(&mut deltas, index, score)?;
        }

        // Weights are computed in full before any of them are stored.
        let mut weights = vec![Gwei::default(); self.nodes.len()];

        for index in (0..self.nodes.len()).rev() {
            let delta = deltas[index];
            let node = &self.nodes[index];

            weights[index] = weight_after(node, delta)?;

            if let Some(parent) = node.parent {
                self.add_to_delta(&mut deltas, parent, delta)?;
            }
        }

        for (node, weight) in self.nodes.iter_mut().zip(weights) {
            node.weight = weight;
        }

        self.justified_checkpoint = justified_checkpoint;
        self.finalized_checkpoint = finalized_checkpoint;
        self.previous_proposer_boost = proposer_boost;

        self.update_best_descendants();

        Ok(())
    }

    /// Returns the root of the best viable descendant of `start_root`.
    ///
    /// If no descendant is viable, `start_root` itself is returned unless its payload is invalid,
    /// in which case the closest ancestor that is not invalid is returned instead.
    pub fn find_head(&self, start_root: H256) -> Result<H256> {
        let start = self
            .index_of(start_root)
            .ok_or(Error::MissingNode {
                block_root: start_root,
            })?;

        let node = &self.nodes[start];

        if let Some(best_descendant) = node.best_descendant {
            return Ok(self.nodes[best_descendant].block_root);
        }

        self.ancestors_of_index(Some(start))
            .find(|node| !node.execution_status.is_invalid())
            .map(|node| node.block_root)
            .ok_or_else(|| Error::NoViableHead { start_root }.into())
    }

    /// Removes all blocks that do not descend from `finalized_root`.
    ///
    /// Returns the number of removed blocks.
    pub fn prune(&mut self, finalized_root: H256) -> Result<usize> {
        let finalized_index = self
            .index_of(finalized_root)
            .ok_or(Error::MissingNode {
                block_root: finalized_root,
            })?;

        // Blocks before the finalized one cannot descend from it.
        // Blocks after it may still be on abandoned forks.
        let mut new_indices = vec![None; self.nodes.len()];
        let mut kept = 0;

        for index in finalized_index..self.nodes.len() {
            let descends_from_finalized = index == finalized_index
                || self.nodes[index]
                    .parent
                    .is_some_and(|parent| new_indices[parent].is_some());

            if descends_from_finalized {
                new_indices[index] = Some(kept);
                kept += 1;
            }
        }

        let pruned = self.nodes.len() - kept;

        if pruned == 0 {
            return Ok(0);
        }

        let remap = |index: Option<usize>| index.and_then(|index| new_indices[index]);

        self.nodes = core::mem::take(&mut self.nodes)
            .into_iter()
            .zip(&new_indices)
            .filter(|(_, new_index)| new_index.is_some())
            .map(|(mut node, _)| {
                node.parent = remap(node.parent);
                node.best_child = remap(node.best_child);
                node.best_descendant = remap(node.best_descendant);
                node
            })
            .collect();

        self.indices = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.block_root, index))
            .collect();

        Ok(pruned)
    }

    /// Marks the payload of `block_root` and all of its descendants invalid.
    ///
    /// Returns the number of blocks whose status changed.
    pub fn invalidate(&mut self, block_root: H256) -> Result<usize> {
        let start = self
            .index_of(block_root)
            .ok_or(Error::MissingNode { block_root })?;

        let mut invalidated = vec![false; self.nodes.len() - start];
        let mut changed = 0;

        for index in start..self.nodes.len() {
            let node = &mut self.nodes[index];

            let descends_from_invalid = index == start
                || node
                    .parent
                    .and_then(|parent| parent.checked_sub(start))
                    .is_some_and(|offset| invalidated[offset]);

            if !descends_from_invalid {
                continue;
            }

            invalidated[index - start] = true;

            if node.execution_status.is_invalid() {
                continue;
            }

            if node.execution_status.is_valid() {
                warn!(
                    "block previously reported as valid is now invalid \
                     (block_root: {:?}, invalidated_root: {block_root:?})",
                    node.block_root,
                );
            }

            node.execution_status = node.execution_status.into_invalid();
            changed += 1;
        }

        Ok(changed)
    }

    /// Marks the payload of `block_root` and all of its optimistic ancestors valid.
    pub fn validate(&mut self, block_root: H256) -> Result<()> {
        let mut next = Some(
            self.index_of(block_root)
                .ok_or(Error::MissingNode { block_root })?,
        );

        while let Some(index) = next {
            let node = &mut self.nodes[index];
            let status = node.execution_status;

            match status {
                _ if status.is_optimistic() => node.execution_status = status.into_valid(),
                _ if status.is_invalid() => {
                    return Err(Error::ValidPayloadHasInvalidAncestor {
                        block_root,
                        ancestor_root: node.block_root,
                    }
                    .into());
                }
                // Ancestors of valid and pre-merge blocks cannot be optimistic.
                _ => break,
            }

            next = node.parent;
        }

        Ok(())
    }

    /// Returns an iterator over `block_root` and its ancestors.
    ///
    /// The iterator is empty if `block_root` is unknown.
    #[must_use]
    pub fn ancestors(&self, block_root: H256) -> Ancestors<'_> {
        self.ancestors_of_index(self.index_of(block_root))
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, descendant_root: H256) -> bool {
        let Some(ancestor) = self.get(ancestor_root) else {
            return false;
        };

        self.ancestors(descendant_root)
            .take_while(|node| node.slot >= ancestor.slot)
            .any(|node| node.block_root == ancestor_root)
    }

    /// Returns every viable block that has no children leading to a viable block.
    #[must_use]
    pub fn heads(&self) -> Vec<&ProtoNode> {
        let viable = self.viable_nodes();
        let mut leads_to_viable = viable.clone();
        let mut has_eligible_child = vec![false; self.nodes.len()];

        for (index, node) in self.nodes.iter().enumerate().rev() {
            if let Some(parent) = node.parent.filter(|_| leads_to_viable[index]) {
                leads_to_viable[parent] = true;
                has_eligible_child[parent] = true;
            }
        }

        izip!(&self.nodes, viable, has_eligible_child)
            .filter(|(_, viable, has_eligible_child)| *viable && !has_eligible_child)
            .map(|(node, _, _)| node)
            .collect()
    }

    #[must_use]
    pub const fn previous_proposer_boost(&self) -> ProposerBoost {
        self.previous_proposer_boost
    }

    fn add_to_delta(
        &self,
        deltas: &mut [Difference],
        index: usize,
        addend: Difference,
    ) -> Result<()> {
        deltas[index] = deltas[index]
            .checked_add(addend)
            .ok_or(Error::DeltaOverflow {
                block_root: self.nodes[index].block_root,
            })?;

        Ok(())
    }

    const fn ancestors_of_index(&self, index: Option<usize>) -> Ancestors<'_> {
        Ancestors {
            proto_array: self,
            next: index,
        }
    }

    // > `filter_block_tree`
    //
    // A node is viable if its payload is not invalid, its checkpoints agree with the ones last
    // passed to `apply_deltas` and it descends from the finalized block.
    fn viable_nodes(&self) -> Vec<bool> {
        let finalized_index = self.index_of(self.finalized_checkpoint.root);
        let mut descends_from_finalized = vec![false; self.nodes.len()];

        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let descends = Some(index) == finalized_index
                    || node
                        .parent
                        .is_some_and(|parent| descends_from_finalized[parent]);

                descends_from_finalized[index] = descends;

                descends && !node.execution_status.is_invalid() && self.has_correct_checkpoints(node)
            })
            .collect_vec()
    }

    const fn has_correct_checkpoints(&self, node: &ProtoNode) -> bool {
        let justified_epoch = self.justified_checkpoint.epoch;
        let finalized_epoch = self.finalized_checkpoint.epoch;

        let correct_justified = justified_epoch == GENESIS_EPOCH
            || node.justified_checkpoint.epoch == justified_epoch;

        let correct_finalized = finalized_epoch == GENESIS_EPOCH
            || node.finalized_checkpoint.epoch == finalized_epoch;

        correct_justified && correct_finalized
    }

    fn update_best_descendants(&mut self) {
        let viable = self.viable_nodes();

        for node in &mut self.nodes {
            node.best_child = None;
            node.best_descendant = None;
        }

        // Children always come after their parents, so by the time a node is compared with its
        // siblings its own best descendant is final.
        for index in (0..self.nodes.len()).rev() {
            let node = self.nodes[index];

            let Some(parent) = node.parent else {
                continue;
            };

            if !viable[index] && node.best_descendant.is_none() {
                continue;
            }

            let is_better = self.nodes[parent]
                .best_child
                .is_none_or(|best_child| node.score() > self.nodes[best_child].score());

            if is_better {
                let parent = &mut self.nodes[parent];
                parent.best_child = Some(index);
                parent.best_descendant = Some(node.best_descendant.unwrap_or(index));
            }
        }
    }
}

fn weight_after(node: &ProtoNode, delta: Difference) -> Result<Gwei> {
    let magnitude = delta.unsigned_abs();

    let weight = if delta.is_negative() {
        node.weight.checked_sub(magnitude).ok_or(Error::WeightUnderflow {
            block_root: node.block_root,
            weight: node.weight,
            delta,
        })?
    } else {
        node.weight.checked_add(magnitude).ok_or(Error::WeightOverflow {
            block_root: node.block_root,
            weight: node.weight,
            delta,
        })?
    };

    Ok(weight)
}

/// Iterator over a block and its ancestors, ending with the root of the array.
#[derive(Clone)]
pub struct Ancestors<'array> {
    proto_array: &'array ProtoArray,
    next: Option<usize>,
}

impl<'array> Iterator for Ancestors<'array> {
    type Item = &'array ProtoNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.proto_array.nodes.get(self.next?)?;
        self.next = node.parent;
        Some(node)
    }
}

impl FusedIterator for Ancestors<'_> {}

#[cfg(test)]
mod tests {
    use types::nonstandard::ExecutionStatus;

    use crate::misc::BlockSummary;

    use super::*;

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn node(block_root: u8, parent_root: u8, slot: u64) -> ProtoNode {
        ProtoNode::new(
            BlockSummary {
                block_root: root(block_root),
                parent_root: root(parent_root),
                slot,
            },
            Checkpoint::default(),
            Checkpoint::default(),
            ExecutionStatus::Syncing(root(block_root)),
        )
    }

    fn anchor_checkpoint() -> Checkpoint {
        Checkpoint {
            epoch: 0,
            root: root(1),
        }
    }

    // ```text
    //     1
    //    / \
    //   2   3
    //   |
    //   4
    // ```
    fn fork() -> Result<ProtoArray> {
        let mut proto_array =
            ProtoArray::new(node(1, 0, 0), anchor_checkpoint(), anchor_checkpoint());

        proto_array.insert(node(2, 1, 1))?;
        proto_array.insert(node(3, 1, 1))?;
        proto_array.insert(node(4, 2, 2))?;

        Ok(proto_array)
    }

    fn apply(proto_array: &mut ProtoArray, deltas: Vec<Difference>) -> Result<()> {
        proto_array.apply_deltas(
            deltas,
            anchor_checkpoint(),
            anchor_checkpoint(),
            ProposerBoost::default(),
        )
    }

    fn weights(proto_array: &ProtoArray) -> Vec<Gwei> {
        proto_array.iter().map(|node| node.weight).collect()
    }

    #[test]
    fn insert_rejects_unknown_parent() {
        let mut proto_array =
            ProtoArray::new(node(1, 0, 0), anchor_checkpoint(), anchor_checkpoint());

        let error = proto_array
            .insert(node(2, 9, 1))
            .expect_err("parent is unknown");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::UnknownParent { .. }),
        ));
        assert_eq!(proto_array.len(), 1);
    }

    #[test]
    fn insert_ignores_duplicates() -> Result<()> {
        let mut proto_array = fork()?;

        assert_eq!(proto_array.insert(node(3, 1, 1))?, 2);
        assert_eq!(proto_array.len(), 4);

        Ok(())
    }

    #[test]
    fn apply_deltas_propagates_weight_to_ancestors() -> Result<()> {
        let mut proto_array = fork()?;

        apply(&mut proto_array, vec![0, 0, 5, 3])?;

        assert_eq!(weights(&proto_array), [8, 3, 5, 3]);
        assert_eq!(proto_array.find_head(root(1))?, root(3));

        apply(&mut proto_array, vec![0, 0, -5, 4])?;

        assert_eq!(weights(&proto_array), [7, 7, 0, 7]);
        assert_eq!(proto_array.find_head(root(1))?, root(4));

        Ok(())
    }

    #[test]
    fn apply_deltas_rejects_wrong_number_of_deltas() -> Result<()> {
        let mut proto_array = fork()?;

        let error = apply(&mut proto_array, vec![0; 3]).expect_err("one delta is missing");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::DeltaCountMismatch {
                deltas: 3,
                nodes: 4,
            }),
        ));

        Ok(())
    }

    #[test]
    fn apply_deltas_rejects_underflow() -> Result<()> {
        let mut proto_array = fork()?;

        apply(&mut proto_array, vec![0, 0, 0, 4])?;

        let error = apply(&mut proto_array, vec![0, 0, -1, -1]).expect_err("weight of 3 is 0");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::WeightUnderflow { .. }),
        ));

        // Block 4 comes before block 3 in the reverse pass but keeps its weight.
        assert_eq!(weights(&proto_array), [4, 4, 0, 4]);

        Ok(())
    }

    #[test]
    fn apply_deltas_rejects_delta_overflow() -> Result<()> {
        let mut proto_array = fork()?;

        let error = apply(&mut proto_array, vec![0, 0, Difference::MAX, Difference::MAX])
            .expect_err("differences overflow when combined at block 1");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::DeltaOverflow { .. }),
        ));
        assert_eq!(weights(&proto_array), [0; 4]);

        Ok(())
    }

    #[test]
    fn equal_weights_are_broken_by_greater_root() -> Result<()> {
        let mut proto_array = fork()?;

        for _ in 0..3 {
            apply(&mut proto_array, vec![0; 4])?;
            assert_eq!(proto_array.find_head(root(1))?, root(3));
        }

        Ok(())
    }

    #[test]
    fn proposer_boost_is_replaced_on_next_application() -> Result<()> {
        let mut proto_array = fork()?;
        let anchor = anchor_checkpoint();

        let boost = |byte| ProposerBoost {
            root: Some(root(byte)),
            score: 10,
        };

        proto_array.apply_deltas(vec![0; 4], anchor, anchor, boost(4))?;

        assert_eq!(weights(&proto_array), [10, 10, 0, 10]);

        proto_array.apply_deltas(vec![0; 4], anchor, anchor, boost(3))?;

        assert_eq!(weights(&proto_array), [10, 0, 10, 0]);

        proto_array.apply_deltas(vec![0; 4], anchor, anchor, ProposerBoost::default())?;

        assert_eq!(weights(&proto_array), [0; 4]);

        Ok(())
    }

    #[test]
    fn invalid_blocks_are_skipped() -> Result<()> {
        let mut proto_array = fork()?;

        apply(&mut proto_array, vec![0, 0, 0, 9])?;
        assert_eq!(proto_array.find_head(root(1))?, root(4));

        assert_eq!(proto_array.invalidate(root(2))?, 2);
        apply(&mut proto_array, vec![0; 4])?;

        assert_eq!(proto_array.find_head(root(1))?, root(3));
        assert_eq!(proto_array.find_head(root(2))?, root(1));

        Ok(())
    }

    #[test]
    fn validate_marks_optimistic_ancestors_valid() -> Result<()> {
        let mut proto_array = fork()?;

        proto_array.validate(root(4))?;

        let statuses = proto_array
            .iter()
            .map(|node| node.execution_status.is_valid())
            .collect_vec();

        assert_eq!(statuses, [true, true, false, true]);

        Ok(())
    }

    #[test]
    fn validate_fails_when_ancestor_is_invalid() -> Result<()> {
        let mut proto_array = fork()?;

        proto_array.invalidate(root(2))?;

        let error = proto_array.validate(root(4)).expect_err("ancestor is invalid");

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::ValidPayloadHasInvalidAncestor { .. }),
        ));

        Ok(())
    }

    #[test]
    fn prune_drops_blocks_not_descending_from_finalized() -> Result<()> {
        let mut proto_array = fork()?;

        apply(&mut proto_array, vec![0, 0, 0, 9])?;

        assert_eq!(proto_array.prune(root(2))?, 2);
        assert_eq!(proto_array.len(), 2);
        assert!(!proto_array.contains(root(1)));
        assert!(!proto_array.contains(root(3)));
        assert_eq!(proto_array.index_of(root(4)), Some(1));
        assert_eq!(proto_array.get(root(2)).and_then(|node| node.parent), None);
        assert_eq!(proto_array.find_head(root(2))?, root(4));

        Ok(())
    }

    #[test]
    fn prune_at_root_removes_nothing() -> Result<()> {
        let mut proto_array = fork()?;

        assert_eq!(proto_array.prune(root(1))?, 0);
        assert_eq!(proto_array.len(), 4);

        Ok(())
    }

    #[test]
    fn ancestors_are_restartable() -> Result<()> {
        let proto_array = fork()?;
        let ancestors = proto_array.ancestors(root(4));

        let roots = ancestors.clone().map(|node| node.block_root).collect_vec();

        assert_eq!(roots, [root(4), root(2), root(1)]);
        assert_eq!(ancestors.count(), 3);
        assert_eq!(proto_array.ancestors(root(9)).count(), 0);

        Ok(())
    }

    #[test]
    fn is_descendant_follows_parents() -> Result<()> {
        let proto_array = fork()?;

        assert!(proto_array.is_descendant(root(1), root(4)));
        assert!(proto_array.is_descendant(root(4), root(4)));
        assert!(!proto_array.is_descendant(root(3), root(4)));
        assert!(!proto_array.is_descendant(root(9), root(4)));

        Ok(())
    }

    #[test]
    fn heads_are_competing_tips() -> Result<()> {
        let mut proto_array = fork()?;

        let heads = |proto_array: &ProtoArray| {
            proto_array
                .heads()
                .into_iter()
                .map(|node| node.block_root)
                .collect_vec()
        };

        assert_eq!(heads(&proto_array), [root(3), root(4)]);

        proto_array.invalidate(root(4))?;

        assert_eq!(heads(&proto_array), [root(2), root(3)]);

        Ok(())
    }
}
