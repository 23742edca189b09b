//! R1CS circuits for test solutions, credential ownership and grade claims.
//!
//! What the test-solution circuit proves:
//! 1) The prover knows answers that grade to `grade` under the public test parameters, using the
//!    same arithmetic as `grading::grade`, and `grade >= minimumGrade`.
//! 2) The identity and grade commitments are derived from the prover's secret identity.
//! 3) Replacing the empty leaf at one path with each commitment moves the identity and grade
//!    trees from their public old roots to their public new roots.
//!
//! The ownership and grade-claim circuits are Semaphore-style membership proofs bound to an
//! external nullifier and a signal; the grade claim additionally proves `grade >= threshold`
//! for the committed grade without revealing it.
//!
//! Privacy: answers, the answer key, identity secrets and Merkle paths are witnesses. Only the
//! values listed in the `*_signals` modules are public.

use crate::constants::{poseidon_config, MAX_GRADE};
use crate::hash::{fr_low_u64, hash_pair};
use crate::types::IdentitySecret;
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_ff::{BigInteger, PrimeField};
use ark_r1cs_std::alloc::AllocVar;
use ark_r1cs_std::boolean::Boolean;
use ark_r1cs_std::eq::EqGadget;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::fields::FieldVar;
use ark_r1cs_std::R1CSVar;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

/// Public-signal positions of the test-solution circuit.
pub mod solution_signals {
    pub const MINIMUM_GRADE: usize = 0;
    pub const MULTIPLE_CHOICE_WEIGHT: usize = 1;
    pub const N_QUESTIONS: usize = 2;
    pub const MULTIPLE_CHOICE_ROOT: usize = 3;
    pub const OPEN_ANSWERS_HASHES_ROOT: usize = 4;
    pub const IDENTITY_COMMITMENT_INDEX: usize = 5;
    pub const IDENTITY_COMMITMENT: usize = 6;
    pub const OLD_IDENTITY_TREE_ROOT: usize = 7;
    pub const NEW_IDENTITY_TREE_ROOT: usize = 8;
    pub const GRADE_COMMITMENT_INDEX: usize = 9;
    pub const GRADE_COMMITMENT: usize = 10;
    pub const OLD_GRADE_TREE_ROOT: usize = 11;
    pub const NEW_GRADE_TREE_ROOT: usize = 12;
    pub const COUNT: usize = 13;
}

/// Public-signal positions of the ownership circuit.
pub mod ownership_signals {
    pub const MERKLE_TREE_ROOT: usize = 0;
    pub const NULLIFIER_HASH: usize = 1;
    pub const SIGNAL_HASH: usize = 2;
    pub const EXTERNAL_NULLIFIER: usize = 3;
    pub const COUNT: usize = 4;
}

/// Public-signal positions of the grade-claim circuit.
pub mod grade_claim_signals {
    pub const GRADE_TREE_ROOT: usize = 0;
    pub const NULLIFIER_HASH: usize = 1;
    pub const GRADE_THRESHOLD: usize = 2;
    pub const SIGNAL_HASH: usize = 3;
    pub const EXTERNAL_NULLIFIER: usize = 4;
    pub const COUNT: usize = 5;
}

/// Grades and weights are range checked to this many bits.
const GRADE_BITS: usize = 8;

/// Bound on the open-answer quotient and remainder (numerator <= 100 * 2^6).
const DIVISION_BITS: usize = 16;

/// In-circuit `H(inputs)`; MUST match `hash::poseidon`.
pub fn poseidon_var(
    cs: ConstraintSystemRef<Fr>,
    inputs: &[FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::<Fr>::new(cs, poseidon_config());
    sponge.absorb(&inputs)?;
    Ok(sponge.squeeze_field_elements(1)?.remove(0))
}

/// Witness the low `n` bits of `v` and enforce that they reconstruct it, i.e. `v < 2^n`.
fn constrain_bits(
    cs: &ConstraintSystemRef<Fr>,
    v: &FpVar<Fr>,
    n: usize,
) -> Result<Vec<Boolean<Fr>>, SynthesisError> {
    let bits = (0..n)
        .map(|i| {
            Boolean::new_witness(cs.clone(), || {
                let value = v.value()?;
                Ok(value.into_bigint().get_bit(i))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Boolean::le_bits_to_fp(&bits)?.enforce_equal(v)?;
    Ok(bits)
}

/// Boolean gadget: `a >= b` for values already known to fit in `n` bits.
///
/// `a + 2^n - b` lies in `[0, 2^(n+1))`, and its top bit is set exactly when `a >= b`.
fn is_geq(
    cs: &ConstraintSystemRef<Fr>,
    a: &FpVar<Fr>,
    b: &FpVar<Fr>,
    n: usize,
) -> Result<Boolean<Fr>, SynthesisError> {
    let shifted = a + Fr::from(1u64 << n) - b;
    let bits = constrain_bits(cs, &shifted, n + 1)?;
    Ok(bits[n].clone())
}

fn enforce_geq(
    cs: &ConstraintSystemRef<Fr>,
    a: &FpVar<Fr>,
    b: &FpVar<Fr>,
    n: usize,
) -> Result<(), SynthesisError> {
    is_geq(cs, a, b, n)?.enforce_equal(&Boolean::constant(true))
}

/// Pairwise Poseidon reduction of a power-of-two leaf vector; MUST match
/// `types::root_from_leaves`.
fn root_from_leaves_var(
    cs: &ConstraintSystemRef<Fr>,
    leaves: &[FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    if leaves.is_empty() || !leaves.len().is_power_of_two() {
        return Err(SynthesisError::Unsatisfiable);
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| poseidon_var(cs.clone(), &[pair[0].clone(), pair[1].clone()]))
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(level.remove(0))
}

/// Fold `leaf` up a Merkle path; a set bit means the running node is the right child.
fn merkle_root_var(
    cs: &ConstraintSystemRef<Fr>,
    leaf: &FpVar<Fr>,
    siblings: &[FpVar<Fr>],
    path: &[Boolean<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut node = leaf.clone();
    for (sibling, is_right) in siblings.iter().zip(path) {
        let left = is_right.select(sibling, &node)?;
        let right = is_right.select(&node, sibling)?;
        node = poseidon_var(cs.clone(), &[left, right])?;
    }
    Ok(node)
}

fn witness_vec(
    cs: &ConstraintSystemRef<Fr>,
    values: &[Fr],
) -> Result<Vec<FpVar<Fr>>, SynthesisError> {
    values
        .iter()
        .map(|v| FpVar::<Fr>::new_witness(cs.clone(), || Ok(*v)))
        .collect()
}

fn witness_path(
    cs: &ConstraintSystemRef<Fr>,
    path_indices: &[u8],
) -> Result<Vec<Boolean<Fr>>, SynthesisError> {
    path_indices
        .iter()
        .map(|bit| Boolean::new_witness(cs.clone(), || Ok(*bit == 1)))
        .collect()
}

/// Public output whose value is taken from an already constrained variable.
fn output(cs: &ConstraintSystemRef<Fr>, computed: &FpVar<Fr>) -> Result<(), SynthesisError> {
    let public = FpVar::<Fr>::new_input(cs.clone(), || computed.value())?;
    public.enforce_equal(computed)
}

fn identity_commitment_var(
    cs: &ConstraintSystemRef<Fr>,
    nullifier: &FpVar<Fr>,
    trapdoor: &FpVar<Fr>,
) -> Result<FpVar<Fr>, SynthesisError> {
    poseidon_var(cs.clone(), &[nullifier.clone(), trapdoor.clone()])
}

/// Path of the leaf being replaced in one appended tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeUpdate {
    /// Value the leaf held before the update (the tree's zero value).
    pub empty_leaf: Fr,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
}

impl TreeUpdate {
    pub fn blank(depth: usize) -> Self {
        Self {
            empty_leaf: Fr::from(0u64),
            siblings: vec![Fr::from(0u64); depth],
            path_indices: vec![0; depth],
        }
    }
}

/// Allocate a tree update and enforce `old root -> new root` around `leaf`, emitting
/// `[index, leaf, oldRoot, newRoot]` as public outputs.
fn tree_update_outputs(
    cs: &ConstraintSystemRef<Fr>,
    update: &TreeUpdate,
    leaf: &FpVar<Fr>,
    depth: usize,
) -> Result<(), SynthesisError> {
    if update.siblings.len() != depth || update.path_indices.len() != depth {
        return Err(SynthesisError::Unsatisfiable);
    }

    let empty_leaf = FpVar::<Fr>::new_witness(cs.clone(), || Ok(update.empty_leaf))?;
    let siblings = witness_vec(cs, &update.siblings)?;
    let path = witness_path(cs, &update.path_indices)?;

    let index = Boolean::le_bits_to_fp(&path)?;
    let old_root = merkle_root_var(cs, &empty_leaf, &siblings, &path)?;
    let new_root = merkle_root_var(cs, leaf, &siblings, &path)?;

    output(cs, &index)?;
    output(cs, leaf)?;
    output(cs, &old_root)?;
    output(cs, &new_root)
}

/// Proves a graded test solution and the resulting identity/grade tree updates.
#[derive(Clone, Debug)]
pub struct TestSolutionCircuit {
    pub test_height: u8,
    pub depth: usize,

    // Public test parameters.
    pub minimum_grade: u8,
    pub multiple_choice_weight: u8,
    pub n_questions: u8,
    pub multiple_choice_root: Fr,
    pub open_answers_hashes_root: Fr,

    // Witnesses, each of length `2^test_height`.
    pub multiple_choice_answers: Vec<Fr>,
    /// `hash(text)` of every padded open answer.
    pub open_answers: Vec<Fr>,
    pub open_answers_hashes: Vec<Fr>,

    pub identity: IdentitySecret,
    pub identity_tree: TreeUpdate,
    pub grade_tree: TreeUpdate,
}

impl TestSolutionCircuit {
    /// Shape-only instance used for key generation.
    pub fn blank(test_height: u8, depth: usize) -> Self {
        let slots = 1usize << test_height;
        Self {
            test_height,
            depth,
            minimum_grade: 0,
            multiple_choice_weight: 0,
            n_questions: 0,
            multiple_choice_root: Fr::from(0u64),
            open_answers_hashes_root: Fr::from(0u64),
            multiple_choice_answers: vec![Fr::from(0u64); slots],
            open_answers: vec![Fr::from(0u64); slots],
            open_answers_hashes: vec![Fr::from(0u64); slots],
            identity: IdentitySecret::new(Fr::from(0u64), Fr::from(0u64)),
            identity_tree: TreeUpdate::blank(depth),
            grade_tree: TreeUpdate::blank(depth),
        }
    }
}

impl ConstraintSynthesizer<Fr> for TestSolutionCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let slots = 1usize << self.test_height;
        if self.multiple_choice_answers.len() != slots
            || self.open_answers.len() != slots
            || self.open_answers_hashes.len() != slots
        {
            return Err(SynthesisError::Unsatisfiable);
        }

        // --- Public inputs ---
        // IMPORTANT: allocation order defines `solution_signals`.
        let minimum_grade =
            FpVar::<Fr>::new_input(cs.clone(), || Ok(Fr::from(u64::from(self.minimum_grade))))?;
        let weight = FpVar::<Fr>::new_input(cs.clone(), || {
            Ok(Fr::from(u64::from(self.multiple_choice_weight)))
        })?;
        let n_questions =
            FpVar::<Fr>::new_input(cs.clone(), || Ok(Fr::from(u64::from(self.n_questions))))?;
        let multiple_choice_root =
            FpVar::<Fr>::new_input(cs.clone(), || Ok(self.multiple_choice_root))?;
        let open_answers_hashes_root =
            FpVar::<Fr>::new_input(cs.clone(), || Ok(self.open_answers_hashes_root))?;

        let max_grade = FpVar::<Fr>::constant(Fr::from(u64::from(MAX_GRADE)));
        let slots_var = FpVar::<Fr>::constant(Fr::from(slots as u64));
        let zero = FpVar::<Fr>::constant(Fr::from(0u64));

        constrain_bits(&cs, &minimum_grade, GRADE_BITS)?;
        constrain_bits(&cs, &weight, GRADE_BITS)?;
        constrain_bits(&cs, &n_questions, GRADE_BITS)?;
        enforce_geq(&cs, &max_grade, &weight, GRADE_BITS)?;
        enforce_geq(&cs, &slots_var, &n_questions, GRADE_BITS)?;

        // --- Multiple choice: all or nothing ---
        let multiple_choice_answers = witness_vec(&cs, &self.multiple_choice_answers)?;
        let computed_root = root_from_leaves_var(&cs, &multiple_choice_answers)?;
        let multiple_choice_correct = computed_root.is_eq(&multiple_choice_root)?;
        let multiple_choice_result = multiple_choice_correct.select(&weight, &zero)?;

        // --- Open answers: per question ---
        let open_answers = witness_vec(&cs, &self.open_answers)?;
        let open_answers_hashes = witness_vec(&cs, &self.open_answers_hashes)?;
        root_from_leaves_var(&cs, &open_answers_hashes)?.enforce_equal(&open_answers_hashes_root)?;

        let mut n_correct = zero.clone();
        for (answer, expected) in open_answers.iter().zip(&open_answers_hashes) {
            let hashed = poseidon_var(cs.clone(), std::slice::from_ref(answer))?;
            n_correct += FpVar::from(hashed.is_eq(expected)?);
        }

        // (100 - w) * (nCorrect + nQuestions - 2^h) / nQuestions, clamped at 0.
        let total = &n_correct + &n_questions;
        let positive = is_geq(&cs, &total, &(&slots_var + Fr::from(1u64)), GRADE_BITS)?;
        let numerator = positive.select(&((&max_grade - &weight) * (&total - &slots_var)), &zero)?;
        // A test without open questions divides by one (the numerator is then 0).
        let divisor = &n_questions + FpVar::from(n_questions.is_eq(&zero)?);

        let quotient = FpVar::<Fr>::new_witness(cs.clone(), || {
            let (num, div) = (fr_low_u64(&numerator.value()?), fr_low_u64(&divisor.value()?));
            Ok(Fr::from(num / div.max(1)))
        })?;
        let remainder = FpVar::<Fr>::new_witness(cs.clone(), || {
            let (num, div) = (fr_low_u64(&numerator.value()?), fr_low_u64(&divisor.value()?));
            Ok(Fr::from(num % div.max(1)))
        })?;
        constrain_bits(&cs, &quotient, DIVISION_BITS)?;
        constrain_bits(&cs, &remainder, DIVISION_BITS)?;
        (&quotient * &divisor + &remainder).enforce_equal(&numerator)?;
        enforce_geq(&cs, &divisor, &(&remainder + Fr::from(1u64)), DIVISION_BITS)?;

        let grade = &multiple_choice_result + &quotient;
        enforce_geq(&cs, &grade, &minimum_grade, GRADE_BITS)?;

        // --- Commitments and tree updates ---
        let nullifier = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.nullifier))?;
        let trapdoor = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.trapdoor))?;
        let identity_commitment = identity_commitment_var(&cs, &nullifier, &trapdoor)?;
        let grade_commitment = poseidon_var(cs.clone(), &[identity_commitment.clone(), grade])?;

        tree_update_outputs(&cs, &self.identity_tree, &identity_commitment, self.depth)?;
        tree_update_outputs(&cs, &self.grade_tree, &grade_commitment, self.depth)?;

        Ok(())
    }
}

/// Semaphore-style proof of membership in a credentials group.
#[derive(Clone, Debug)]
pub struct OwnershipCircuit {
    pub depth: usize,
    pub identity: IdentitySecret,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
    pub signal_hash: Fr,
    /// `hash(scope)`.
    pub external_nullifier: Fr,
}

impl OwnershipCircuit {
    pub fn blank(depth: usize) -> Self {
        Self {
            depth,
            identity: IdentitySecret::new(Fr::from(0u64), Fr::from(0u64)),
            siblings: vec![Fr::from(0u64); depth],
            path_indices: vec![0; depth],
            signal_hash: Fr::from(0u64),
            external_nullifier: Fr::from(0u64),
        }
    }
}

impl ConstraintSynthesizer<Fr> for OwnershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        if self.siblings.len() != self.depth || self.path_indices.len() != self.depth {
            return Err(SynthesisError::Unsatisfiable);
        }

        let nullifier = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.nullifier))?;
        let trapdoor = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.trapdoor))?;
        let siblings = witness_vec(&cs, &self.siblings)?;
        let path = witness_path(&cs, &self.path_indices)?;

        let leaf = identity_commitment_var(&cs, &nullifier, &trapdoor)?;
        let root = merkle_root_var(&cs, &leaf, &siblings, &path)?;
        output(&cs, &root)?;

        let nullifier_hash = FpVar::<Fr>::new_input(cs.clone(), || {
            Ok(hash_pair(self.external_nullifier, self.identity.nullifier))
        })?;
        let signal_hash = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.signal_hash))?;
        let external_nullifier = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.external_nullifier))?;

        poseidon_var(cs.clone(), &[external_nullifier, nullifier])?.enforce_equal(&nullifier_hash)?;

        // Bind the signal to the proof.
        let _signal_square = &signal_hash * &signal_hash;

        Ok(())
    }
}

/// Membership in a grade group plus `grade >= gradeThreshold` for the committed grade.
#[derive(Clone, Debug)]
pub struct GradeClaimCircuit {
    pub depth: usize,
    pub identity: IdentitySecret,
    pub grade: u8,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
    pub grade_threshold: u8,
    pub signal_hash: Fr,
    pub external_nullifier: Fr,
}

impl GradeClaimCircuit {
    pub fn blank(depth: usize) -> Self {
        Self {
            depth,
            identity: IdentitySecret::new(Fr::from(0u64), Fr::from(0u64)),
            grade: 0,
            siblings: vec![Fr::from(0u64); depth],
            path_indices: vec![0; depth],
            grade_threshold: 0,
            signal_hash: Fr::from(0u64),
            external_nullifier: Fr::from(0u64),
        }
    }
}

impl ConstraintSynthesizer<Fr> for GradeClaimCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        if self.siblings.len() != self.depth || self.path_indices.len() != self.depth {
            return Err(SynthesisError::Unsatisfiable);
        }

        let nullifier = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.nullifier))?;
        let trapdoor = FpVar::<Fr>::new_witness(cs.clone(), || Ok(self.identity.trapdoor))?;
        let grade = FpVar::<Fr>::new_witness(cs.clone(), || Ok(Fr::from(u64::from(self.grade))))?;
        let siblings = witness_vec(&cs, &self.siblings)?;
        let path = witness_path(&cs, &self.path_indices)?;

        let identity_commitment = identity_commitment_var(&cs, &nullifier, &trapdoor)?;
        let leaf = poseidon_var(cs.clone(), &[identity_commitment, grade.clone()])?;
        let root = merkle_root_var(&cs, &leaf, &siblings, &path)?;
        output(&cs, &root)?;

        let nullifier_hash = FpVar::<Fr>::new_input(cs.clone(), || {
            Ok(hash_pair(self.external_nullifier, self.identity.nullifier))
        })?;
        let grade_threshold = FpVar::<Fr>::new_input(cs.clone(), || {
            Ok(Fr::from(u64::from(self.grade_threshold)))
        })?;
        let signal_hash = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.signal_hash))?;
        let external_nullifier = FpVar::<Fr>::new_input(cs.clone(), || Ok(self.external_nullifier))?;

        poseidon_var(cs.clone(), &[external_nullifier, nullifier])?.enforce_equal(&nullifier_hash)?;

        constrain_bits(&cs, &grade, GRADE_BITS)?;
        constrain_bits(&cs, &grade_threshold, GRADE_BITS)?;
        enforce_geq(&cs, &grade, &grade_threshold, GRADE_BITS)?;

        let _signal_square = &signal_hash * &signal_hash;

        Ok(())
    }
}
