use std::{collections::BTreeMap, marker::PhantomData};

use digest::Digest;

use crate::ParticipantId;

use super::{HashId, MerkleProof, ProofTree};

/// Collects the leaves of one node for one round: the sub-roots reported by its children,
/// the client values submitted locally and the hash of the node round log.
#[derive(Debug, Clone)]
pub struct MerkleAggregator<D: Digest> {
    child_roots: BTreeMap<ParticipantId, HashId>,
    values: Vec<HashId>,
    log_hash: Option<HashId>,
    hasher: PhantomData<D>,
}

impl<D: Digest> Default for MerkleAggregator<D> {
    fn default() -> Self {
        Self {
            child_roots: BTreeMap::new(),
            values: vec![],
            log_hash: None,
            hasher: PhantomData,
        }
    }
}

impl<D: Digest> MerkleAggregator<D> {
    /// Empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sub-root reported by a child, replacing any previous one.
    pub fn add_child_root(&mut self, child: ParticipantId, root: HashId) {
        self.child_roots.insert(child, root);
    }

    /// Set the batch of client value hashes introduced by this node.
    pub fn set_local_values(&mut self, values: Vec<HashId>) {
        self.values = values;
    }

    /// Set the hash of this node round log.
    pub fn set_log_hash(&mut self, log_hash: HashId) {
        self.log_hash = Some(log_hash);
    }

    /// Build the local trees and partition their proofs.
    pub fn aggregate(&self) -> MerkleAggregate {
        let local_tree = ProofTree::new::<D>(&self.values);

        let mut leaves: Vec<HashId> = self.child_roots.values().cloned().collect();
        let local_index = leaves.len();
        leaves.push(local_tree.root().clone());
        if let Some(log_hash) = &self.log_hash {
            leaves.push(log_hash.clone());
        }
        let node_tree = ProofTree::new::<D>(&leaves);

        let child_fragments = self
            .child_roots
            .keys()
            .zip(node_tree.proofs().iter())
            .map(|(child, proof)| (child.clone(), proof.clone()))
            .collect();
        let local_fragment = node_tree.proof(local_index).cloned().unwrap_or_default();

        MerkleAggregate {
            root: node_tree.root().clone(),
            child_fragments,
            local_fragment,
            values: self.values.clone(),
            value_proofs: local_tree.proofs().to_vec(),
        }
    }
}

/// Root of a node subtree and the proof fragments it hands out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleAggregate {
    root: HashId,
    child_fragments: BTreeMap<ParticipantId, MerkleProof>,
    local_fragment: MerkleProof,
    values: Vec<HashId>,
    value_proofs: Vec<MerkleProof>,
}

impl MerkleAggregate {
    /// Root of the subtree of this node, reported upward during the commitment
    pub fn root(&self) -> &HashId {
        &self.root
    }

    /// Fragment connecting the sub-root of `child` to the root of this node.
    pub fn child_fragment(&self, child: &str) -> Option<&MerkleProof> {
        self.child_fragments.get(child)
    }

    /// Complete proof of `child` sub-root, given the proof of this node root up to the global root.
    pub fn child_proof(&self, child: &str, upper: &MerkleProof) -> Option<MerkleProof> {
        self.child_fragment(child)
            .map(|fragment| fragment.concat(upper))
    }

    /// Complete proofs of the local client values, given the proof of this node root up to
    /// the global root.
    pub fn value_proofs(&self, upper: &MerkleProof) -> Vec<(HashId, MerkleProof)> {
        let fragment = self.local_fragment.concat(upper);

        self.values
            .iter()
            .zip(self.value_proofs.iter())
            .map(|(value, proof)| (value.clone(), proof.concat(&fragment)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use blake2::{Blake2b, digest::consts::U32};

    use crate::merkle_tree::check_proof;

    use super::*;

    type D = Blake2b<U32>;

    fn hash(value: &str) -> HashId {
        D::digest(value.as_bytes()).to_vec()
    }

    #[test]
    fn leaf_node_without_values_commits_to_its_log() {
        let mut aggregator = MerkleAggregator::<D>::new();
        aggregator.set_log_hash(hash("log"));

        let aggregate = aggregator.aggregate();

        assert!(check_proof::<D>(
            aggregate.root(),
            &vec![0u8; 32],
            &aggregate.local_fragment
        ));
    }

    #[test]
    fn values_of_every_level_verify_against_the_top_root() {
        let mut child = MerkleAggregator::<D>::new();
        child.set_local_values(vec![hash("child-1"), hash("child-2")]);
        child.set_log_hash(hash("child-log"));
        let child_aggregate = child.aggregate();

        let mut parent = MerkleAggregator::<D>::new();
        parent.add_child_root("child".to_string(), child_aggregate.root().clone());
        parent.set_local_values(vec![hash("parent-1")]);
        parent.set_log_hash(hash("parent-log"));
        let parent_aggregate = parent.aggregate();

        let top_proof = MerkleProof::default();
        let child_upper = parent_aggregate
            .child_proof("child", &top_proof)
            .expect("child fragment should exist");

        for (value, proof) in child_aggregate
            .value_proofs(&child_upper)
            .into_iter()
            .chain(parent_aggregate.value_proofs(&top_proof))
        {
            proof
                .verify::<D>(parent_aggregate.root(), &value)
                .expect("value proof should verify against the top root");
        }
        assert!(parent_aggregate.child_fragment("unknown").is_none());
    }

    #[test]
    fn child_insertion_order_does_not_change_the_root() {
        let mut first = MerkleAggregator::<D>::new();
        first.add_child_root("b".to_string(), hash("b"));
        first.add_child_root("a".to_string(), hash("a"));

        let mut second = MerkleAggregator::<D>::new();
        second.add_child_root("a".to_string(), hash("a"));
        second.add_child_root("b".to_string(), hash("b"));

        assert_eq!(first.aggregate().root(), second.aggregate().root());
    }
}
