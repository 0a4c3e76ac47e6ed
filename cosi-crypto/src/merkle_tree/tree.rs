use digest::Digest;

use super::{HashId, MerkleProof, empty_root, hash_pair};

/// Root of a set of leaves together with one inclusion proof per leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTree {
    root: HashId,
    proofs: Vec<MerkleProof>,
}

impl ProofTree {
    /// Build the tree of `leaves`.
    ///
    /// Leaves are sorted before the tree is built, which makes the root independent of the
    /// order in which they were supplied. Proofs are returned in the order of `leaves`.
    /// A single leaf is its own root, no leaf at all gives [empty_root].
    pub fn new<D: Digest>(leaves: &[HashId]) -> Self {
        if leaves.is_empty() {
            return Self {
                root: empty_root::<D>(),
                proofs: vec![],
            };
        }

        let mut order: Vec<usize> = (0..leaves.len()).collect();
        order.sort_by(|a, b| leaves[*a].cmp(&leaves[*b]));
        let sorted: Vec<&[u8]> = order.iter().map(|i| leaves[*i].as_slice()).collect();

        let mut sorted_paths = vec![Vec::new(); leaves.len()];
        let root = split_and_hash::<D>(&sorted, 0, &mut sorted_paths);

        let mut proofs = vec![MerkleProof::default(); leaves.len()];
        for (position, path) in sorted_paths.into_iter().enumerate() {
            proofs[order[position]] = MerkleProof::new(path);
        }

        Self { root, proofs }
    }

    /// Root of the tree
    pub fn root(&self) -> &HashId {
        &self.root
    }

    /// Proofs of the leaves, in input order
    pub fn proofs(&self) -> &[MerkleProof] {
        &self.proofs
    }

    /// Proof of the leaf at `index` in the input order
    pub fn proof(&self, index: usize) -> Option<&MerkleProof> {
        self.proofs.get(index)
    }

    /// Check that every proof leads from its leaf to the root.
    pub fn check_local_proofs<D: Digest>(&self, leaves: &[HashId]) -> bool {
        leaves.len() == self.proofs.len()
            && leaves
                .iter()
                .zip(self.proofs.iter())
                .all(|(leaf, proof)| super::check_proof::<D>(&self.root, leaf, proof))
    }
}

// Recursively split the sorted leaves in two halves, pushing on every path of a half the
// root of the other half.
fn split_and_hash<D: Digest>(leaves: &[&[u8]], offset: usize, paths: &mut [Vec<HashId>]) -> HashId {
    if leaves.len() == 1 {
        return leaves[0].to_vec();
    }

    let middle = leaves.len().div_ceil(2);
    let left = split_and_hash::<D>(&leaves[..middle], offset, paths);
    let right = split_and_hash::<D>(&leaves[middle..], offset + middle, paths);

    for path in &mut paths[offset..offset + middle] {
        path.push(right.clone());
    }
    for path in &mut paths[offset + middle..offset + leaves.len()] {
        path.push(left.clone());
    }

    hash_pair::<D>(&left, &right)
}

#[cfg(test)]
mod tests {
    use blake2::{Blake2b, digest::consts::U32};
    use proptest::{collection::vec, prelude::*};

    use crate::merkle_tree::check_proof;

    use super::*;

    type D = Blake2b<U32>;

    fn leaf(value: &str) -> HashId {
        D::digest(value.as_bytes()).to_vec()
    }

    #[test]
    fn empty_tree_has_a_zero_root() {
        let tree = ProofTree::new::<D>(&[]);

        assert_eq!(tree.root(), &vec![0u8; 32]);
        assert!(tree.proofs().is_empty());
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let tree = ProofTree::new::<D>(&[leaf("alone")]);

        assert_eq!(tree.root(), &leaf("alone"));
        assert_eq!(tree.proof(0), Some(&MerkleProof::default()));
    }

    #[test]
    fn three_leaves_are_split_in_unbalanced_halves() {
        let mut leaves = vec![leaf("a"), leaf("b"), leaf("c")];
        leaves.sort();
        let tree = ProofTree::new::<D>(&leaves);

        let left = hash_pair::<D>(&leaves[0], &leaves[1]);
        assert_eq!(tree.root(), &hash_pair::<D>(&left, &leaves[2]));
        assert_eq!(tree.proof(0).unwrap().len(), 2);
        assert_eq!(tree.proof(2).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_leaves_get_valid_proofs() {
        let leaves = vec![leaf("same"), leaf("same"), leaf("other")];
        let tree = ProofTree::new::<D>(&leaves);

        assert!(tree.check_local_proofs::<D>(&leaves));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn every_input_leaf_has_a_valid_proof(values in vec(any::<[u8; 8]>(), 1..40)) {
            let leaves: Vec<HashId> = values.iter().map(|v| D::digest(v).to_vec()).collect();
            let tree = ProofTree::new::<D>(&leaves);

            prop_assert!(tree.check_local_proofs::<D>(&leaves));
        }

        #[test]
        fn leaf_outside_the_set_is_rejected(values in vec(any::<[u8; 8]>(), 1..40), outsider in any::<[u8; 9]>()) {
            let leaves: Vec<HashId> = values.iter().map(|v| D::digest(v).to_vec()).collect();
            let stranger = D::digest(outsider).to_vec();
            let tree = ProofTree::new::<D>(&leaves);

            for proof in tree.proofs() {
                prop_assert!(!check_proof::<D>(tree.root(), &stranger, proof));
            }
        }

        #[test]
        fn root_does_not_depend_on_leaf_order(values in vec(any::<[u8; 8]>(), 1..20), seed in any::<u64>()) {
            let leaves: Vec<HashId> = values.iter().map(|v| D::digest(v).to_vec()).collect();
            let mut shuffled = leaves.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let tree = ProofTree::new::<D>(&leaves);
            let shuffled_tree = ProofTree::new::<D>(&shuffled);
            prop_assert_eq!(tree.root(), shuffled_tree.root());
        }
    }
}
