//! Merkle groups of commitments.
//!
//! A `GroupState` is an incremental binary Merkle tree of fixed depth. Leaves are appended in
//! order (insertion order defines the leaf index) and empty slots hold a per-tree zero value,
//! `hash(tree_id)`. Only the occupied prefix of every level is stored; the rest of the tree is
//! implied by the precomputed zero nodes.

use crate::constants::MAX_TREE_DEPTH;
use crate::error::CredentialError;
use crate::hash::{hash_pair, hash_u64};
use crate::types::fr_hex;
use crate::types::fr_hex_vec;
use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

/// The three groups every credential owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    /// Grade commitments of every taker.
    Grade,
    /// Identity commitments of takers who passed.
    Credentials,
    /// Identity commitments of takers who failed.
    NoCredentials,
}

impl GroupKind {
    /// Registry-wide group id of this group for `credential_id`.
    pub fn group_id(self, credential_id: u64) -> u64 {
        let base = 3 * credential_id.saturating_sub(1);
        match self {
            GroupKind::Grade => base + 1,
            GroupKind::Credentials => base + 2,
            GroupKind::NoCredentials => base + 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupKind::Grade => "grade",
            GroupKind::Credentials => "credentials",
            GroupKind::NoCredentials => "no-credentials",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grade" => Some(GroupKind::Grade),
            "credentials" => Some(GroupKind::Credentials),
            "no-credentials" => Some(GroupKind::NoCredentials),
            _ => None,
        }
    }
}

/// Value of an empty leaf in every tree identified by `tree_id`.
pub fn zero_value(tree_id: u64) -> Fr {
    hash_u64(tree_id)
}

/// Inclusion proof of one leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "fr_hex")]
    pub root: Fr,
    #[serde(with = "fr_hex")]
    pub leaf: Fr,
    #[serde(with = "fr_hex_vec")]
    pub siblings: Vec<Fr>,
    /// One entry per level, `1` when the running node is the right child.
    pub path_indices: Vec<u8>,
}

impl MerkleProof {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    pub fn leaf_index(&self) -> usize {
        self.path_indices
            .iter()
            .enumerate()
            .map(|(level, bit)| usize::from(*bit & 1) << level)
            .sum()
    }

    /// Root obtained by placing `leaf` at this proof's position.
    pub fn root_with_leaf(&self, leaf: Fr) -> Fr {
        root_from_path(leaf, &self.siblings, &self.path_indices)
    }

    /// Structural sanity: matching lengths, boolean indices and a root consistent with the leaf.
    pub fn check(&self) -> Result<(), CredentialError> {
        if self.siblings.len() != self.path_indices.len() {
            return Err(CredentialError::protocol(format!(
                "merkle proof has {} siblings but {} path indices",
                self.siblings.len(),
                self.path_indices.len()
            )));
        }
        if self.siblings.is_empty() || self.siblings.len() > MAX_TREE_DEPTH {
            return Err(CredentialError::protocol(format!(
                "merkle proof depth must be between 1 and {MAX_TREE_DEPTH}, got {}",
                self.siblings.len()
            )));
        }
        if self.path_indices.iter().any(|bit| *bit > 1) {
            return Err(CredentialError::protocol("merkle path indices must be 0 or 1"));
        }
        if self.root_with_leaf(self.leaf) != self.root {
            return Err(CredentialError::protocol(
                "merkle proof root does not match its leaf and siblings",
            ));
        }
        Ok(())
    }
}

/// Fold a leaf up a path of siblings.
pub fn root_from_path(leaf: Fr, siblings: &[Fr], path_indices: &[u8]) -> Fr {
    siblings
        .iter()
        .zip(path_indices)
        .fold(leaf, |node, (sibling, bit)| {
            if *bit == 1 {
                hash_pair(*sibling, node)
            } else {
                hash_pair(node, *sibling)
            }
        })
}

/// Append/update-only Merkle tree of one group.
#[derive(Clone, Debug)]
pub struct GroupState {
    tree_id: u64,
    depth: usize,
    /// `zeros[level]` is the root of an empty subtree of height `level`.
    zeros: Vec<Fr>,
    /// `nodes[0]` are the leaves; `nodes[depth]` holds the root once a leaf exists.
    nodes: Vec<Vec<Fr>>,
}

impl GroupState {
    pub fn new(tree_id: u64, depth: usize) -> Result<Self, CredentialError> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(CredentialError::protocol(format!(
                "tree depth must be between 1 and {MAX_TREE_DEPTH}, got {depth}"
            )));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(zero_value(tree_id));
        for level in 0..depth {
            let z = zeros[level];
            zeros.push(hash_pair(z, z));
        }

        Ok(Self {
            tree_id,
            depth,
            zeros,
            nodes: vec![Vec::new(); depth + 1],
        })
    }

    /// Rebuild a group from an ordered membership snapshot.
    pub fn with_members(
        tree_id: u64,
        depth: usize,
        members: impl IntoIterator<Item = Fr>,
    ) -> Result<Self, CredentialError> {
        let mut group = Self::new(tree_id, depth)?;
        group.add_members(members)?;
        Ok(group)
    }

    pub fn tree_id(&self) -> u64 {
        self.tree_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn zero_value(&self) -> Fr {
        self.zeros[0]
    }

    pub fn members(&self) -> &[Fr] {
        &self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.nodes[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_empty()
    }

    pub fn capacity(&self) -> usize {
        1usize << self.depth
    }

    pub fn root(&self) -> Fr {
        self.nodes[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    pub fn index_of(&self, leaf: &Fr) -> Option<usize> {
        self.nodes[0].iter().position(|m| m == leaf)
    }

    /// Append a leaf and return its index.
    pub fn add_member(&mut self, leaf: Fr) -> Result<usize, CredentialError> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(CredentialError::protocol(format!(
                "group {} is full ({} leaves)",
                self.tree_id,
                self.capacity()
            )));
        }
        self.nodes[0].push(leaf);
        self.update_path(index);
        Ok(index)
    }

    pub fn add_members(
        &mut self,
        leaves: impl IntoIterator<Item = Fr>,
    ) -> Result<(), CredentialError> {
        for leaf in leaves {
            self.add_member(leaf)?;
        }
        Ok(())
    }

    pub fn update_member(&mut self, index: usize, leaf: Fr) -> Result<(), CredentialError> {
        if index >= self.len() {
            return Err(CredentialError::protocol(format!(
                "leaf {index} does not exist in group {}",
                self.tree_id
            )));
        }
        self.nodes[0][index] = leaf;
        self.update_path(index);
        Ok(())
    }

    /// Reset a leaf to the zero value; indices of other members are unchanged.
    pub fn remove_member(&mut self, index: usize) -> Result<(), CredentialError> {
        let zero = self.zero_value();
        self.update_member(index, zero)
    }

    pub fn merkle_proof(&self, index: usize) -> Result<MerkleProof, CredentialError> {
        if index >= self.len() {
            return Err(CredentialError::protocol(format!(
                "leaf {index} does not exist in group {}",
                self.tree_id
            )));
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        let mut position = index;
        for level in 0..self.depth {
            siblings.push(self.node(level, position ^ 1));
            path_indices.push((position & 1) as u8);
            position >>= 1;
        }

        Ok(MerkleProof {
            root: self.root(),
            leaf: self.nodes[0][index],
            siblings,
            path_indices,
        })
    }

    fn node(&self, level: usize, position: usize) -> Fr {
        self.nodes[level]
            .get(position)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn update_path(&mut self, index: usize) {
        let mut position = index;
        for level in 0..self.depth {
            let left = self.node(level, position & !1);
            let right = self.node(level, position | 1);
            let parent = hash_pair(left, right);
            position >>= 1;

            let row = &mut self.nodes[level + 1];
            if position < row.len() {
                row[position] = parent;
            } else {
                row.push(parent);
            }
        }
    }
}

/// How a caller hands one appended tree to the orchestrator.
#[derive(Clone, Debug)]
pub enum GroupInput {
    /// Full membership snapshot; the orchestrator appends the padding leaf itself.
    Full(GroupState),
    /// Path of a padding leaf the caller already appended, plus the id of the tree it came
    /// from (needed to rebuild the padding value).
    PathOnly { proof: MerkleProof, tree_id: u64 },
}

impl GroupInput {
    /// Resolve the loosely-typed shapes a transport layer receives.
    ///
    /// Exactly one of `group` and `path` must be present, and a path needs its tree id.
    pub fn from_parts(
        group: Option<GroupState>,
        path: Option<MerkleProof>,
        tree_id: Option<u64>,
    ) -> Result<Self, CredentialError> {
        match (group, path) {
            (Some(group), None) => Ok(GroupInput::Full(group)),
            (None, Some(proof)) => {
                let tree_id = tree_id.ok_or_else(|| {
                    CredentialError::protocol("a merkle path was supplied without its tree id")
                })?;
                Ok(GroupInput::PathOnly { proof, tree_id })
            }
            (Some(_), Some(_)) => Err(CredentialError::protocol(
                "supply either a full group or a merkle path, not both",
            )),
            (None, None) => Err(CredentialError::protocol("no group or merkle path supplied")),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            GroupInput::Full(group) => group.depth(),
            GroupInput::PathOnly { proof, .. } => proof.depth(),
        }
    }
}
