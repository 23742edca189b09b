//! Policy selection and assembly of test-solution, ownership and grade-claim proofs.
//!
//! Every call works on its own `GroupState` values; nothing is shared between concurrent calls.
//! The backend runs on tokio's blocking pool, and the two proofs of a restricted policy are
//! proved concurrently and joined before the result is composed. If either fails the call fails
//! as a whole.

use crate::circuit::{
    grade_claim_signals, ownership_signals, solution_signals, GradeClaimCircuit, OwnershipCircuit,
    TestSolutionCircuit, TreeUpdate,
};
use crate::commitment::{grade_commitment_from_identity, identity_commitment};
use crate::constants::{
    CREDENTIAL_RESTRICTED_TEST_SCOPE, GRADE_RESTRICTED_TEST_SCOPE, MAX_COMMENT_LENGTH, MAX_GRADE,
    RATE_ISSUER_SCOPE,
};
use crate::error::CredentialError;
use crate::grading;
use crate::group::{zero_value, GroupInput, MerkleProof};
use crate::groth16::{CircuitInputs, GeneratedProof, ProofBackend};
use crate::hash::{
    abi_encode_uint_string, abi_encode_words, fr_to_hex, fr_to_u8, fr_to_word, hash_bytes, hash_pair,
    hash_scope, hash_str, keccak256, Word,
};
use crate::types::{
    fr_hex, fr_hex_vec, padded_multiple_choice_answers, padded_open_answers, proof_b64,
    word_hex, GradeResult, IdentitySecret, TestAnswers, TestConfig,
};
use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Restriction policy of a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    Open,
    CredentialRestricted,
    GradeRestricted,
}

impl Policy {
    pub fn of(config: &TestConfig) -> Self {
        if config.required_credential_grade_threshold != 0 {
            Policy::GradeRestricted
        } else if config.required_credential != 0 {
            Policy::CredentialRestricted
        } else {
            Policy::Open
        }
    }

    /// Tag of the policy in an encoded credential update.
    pub fn tag(self) -> u8 {
        match self {
            Policy::Open => 0,
            Policy::CredentialRestricted => 1,
            Policy::GradeRestricted => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Policy::Open),
            1 => Some(Policy::CredentialRestricted),
            2 => Some(Policy::GradeRestricted),
            _ => None,
        }
    }
}

/// The message a test-solution proof is bound to:
/// `keccak256(abi.encode(identityCommitment, newIdentityTreeRoot, gradeCommitment,
/// newGradeTreeRoot))`.
pub fn test_signal(
    identity_commitment: Fr,
    new_identity_tree_root: Fr,
    grade_commitment: Fr,
    new_grade_tree_root: Fr,
) -> Word {
    keccak256(&abi_encode_words(&[
        fr_to_word(&identity_commitment),
        fr_to_word(&new_identity_tree_root),
        fr_to_word(&grade_commitment),
        fr_to_word(&new_grade_tree_root),
    ]))
}

/// The message a rating is bound to: `keccak256(abi.encode(rating, comment))`.
pub fn rating_signal(rating: u8, comment: &str) -> Word {
    keccak256(&abi_encode_uint_string(u64::from(rating), comment))
}

pub fn signal_hash(signal: &Word) -> Fr {
    hash_bytes(signal)
}

/// `H(hash(scope), nullifier)`; independent of any signal.
pub fn nullifier_hash(identity: &IdentitySecret, scope: &str) -> Result<Fr, CredentialError> {
    Ok(hash_pair(hash_scope(scope)?, identity.nullifier))
}

/// Grade previously obtained in the required credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorGrade {
    pub grade: u8,
    /// Leaf index of `H(identityCommitment, grade)` in the required credential's grade group.
    pub index: usize,
}

/// Group of the required credential that a restricted policy proves against.
#[derive(Clone, Debug)]
pub enum RequiredGroup {
    /// Credentials group, for credential-restricted tests.
    Ownership(GroupInput),
    /// Grade group, for grade-restricted tests.
    GradeClaim { group: GroupInput, prior: PriorGrade },
}

/// Everything one solution proof is generated from.
#[derive(Clone, Debug)]
pub struct SolutionRequest {
    pub identity: IdentitySecret,
    pub answers: TestAnswers,
    pub config: TestConfig,
    /// Credentials group when the answers pass, no-credentials group otherwise.
    pub identity_group: GroupInput,
    pub grade_group: GroupInput,
    pub required: Option<RequiredGroup>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestFullProof {
    #[serde(with = "fr_hex")]
    pub identity_commitment: Fr,
    #[serde(with = "fr_hex")]
    pub new_identity_tree_root: Fr,
    #[serde(with = "fr_hex")]
    pub grade_commitment: Fr,
    #[serde(with = "fr_hex")]
    pub new_grade_tree_root: Fr,
    pub test_passed: bool,
    pub test_height: u8,
    pub tree_depth: usize,
    #[serde(with = "fr_hex_vec")]
    pub public_signals: Vec<Fr>,
    #[serde(with = "proof_b64")]
    pub proof: Proof<Bn254>,
}

impl TestFullProof {
    /// Signal the secondary proof of a restricted policy must carry.
    pub fn signal(&self) -> Word {
        test_signal(
            self.identity_commitment,
            self.new_identity_tree_root,
            self.grade_commitment,
            self.new_grade_tree_root,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OwnershipFullProof {
    #[serde(with = "fr_hex")]
    pub merkle_tree_root: Fr,
    #[serde(with = "fr_hex")]
    pub nullifier_hash: Fr,
    #[serde(with = "word_hex")]
    pub signal: Word,
    #[serde(with = "fr_hex")]
    pub external_nullifier: Fr,
    pub tree_depth: usize,
    #[serde(with = "fr_hex_vec")]
    pub public_signals: Vec<Fr>,
    #[serde(with = "proof_b64")]
    pub proof: Proof<Bn254>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeClaimFullProof {
    #[serde(with = "fr_hex")]
    pub grade_tree_root: Fr,
    #[serde(with = "fr_hex")]
    pub nullifier_hash: Fr,
    pub grade_threshold: u8,
    #[serde(with = "word_hex")]
    pub signal: Word,
    #[serde(with = "fr_hex")]
    pub external_nullifier: Fr,
    pub tree_depth: usize,
    #[serde(with = "fr_hex_vec")]
    pub public_signals: Vec<Fr>,
    #[serde(with = "proof_b64")]
    pub proof: Proof<Bn254>,
}

/// Outcome of a solution proof, one variant per policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum ProofResult {
    Open(TestFullProof),
    CredentialRestricted {
        test: TestFullProof,
        ownership: OwnershipFullProof,
    },
    GradeRestricted {
        test: TestFullProof,
        grade_claim: GradeClaimFullProof,
    },
}

impl ProofResult {
    pub fn policy(&self) -> Policy {
        match self {
            ProofResult::Open(_) => Policy::Open,
            ProofResult::CredentialRestricted { .. } => Policy::CredentialRestricted,
            ProofResult::GradeRestricted { .. } => Policy::GradeRestricted,
        }
    }

    pub fn test(&self) -> &TestFullProof {
        match self {
            ProofResult::Open(test)
            | ProofResult::CredentialRestricted { test, .. }
            | ProofResult::GradeRestricted { test, .. } => test,
        }
    }
}

/// Anonymous rating of a credential issuer by one of its holders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateFullProof {
    pub rating: u8,
    pub comment: String,
    pub ownership: OwnershipFullProof,
}

pub fn check_rating(rating: u8, comment: &str) -> Result<(), CredentialError> {
    if rating > MAX_GRADE {
        return Err(CredentialError::validation(format!(
            "rating must be between 0 and 100, got {rating}"
        )));
    }
    if comment.len() > MAX_COMMENT_LENGTH {
        return Err(CredentialError::validation(format!(
            "comment is {} bytes long, the maximum is {MAX_COMMENT_LENGTH}",
            comment.len()
        )));
    }
    Ok(())
}

/// Leaf replaced in an appended tree and the tree's root once the leaf is in place.
struct AppendedLeaf {
    update: TreeUpdate,
    new_root: Fr,
}

/// Append the padding leaf (full group) or accept a path to one (path-only), then place `leaf`.
fn append_leaf(input: GroupInput, leaf: Fr, tree: &str) -> Result<AppendedLeaf, CredentialError> {
    match input {
        GroupInput::Full(mut group) => {
            let empty_leaf = group.zero_value();
            let index = group.add_member(empty_leaf)?;
            let proof = group.merkle_proof(index)?;
            group.update_member(index, leaf)?;
            debug!(tree, index, "appended leaf to full group");
            Ok(AppendedLeaf {
                update: TreeUpdate {
                    empty_leaf,
                    siblings: proof.siblings,
                    path_indices: proof.path_indices,
                },
                new_root: group.root(),
            })
        }
        GroupInput::PathOnly { proof, tree_id } => {
            proof.check()?;
            let empty_leaf = zero_value(tree_id);
            if proof.leaf != empty_leaf {
                return Err(CredentialError::protocol(format!(
                    "{tree} path does not point at an empty leaf of tree {tree_id}"
                )));
            }
            let new_root = proof.root_with_leaf(leaf);
            debug!(tree, index = proof.leaf_index(), "using precomputed path");
            Ok(AppendedLeaf {
                update: TreeUpdate {
                    empty_leaf,
                    siblings: proof.siblings,
                    path_indices: proof.path_indices,
                },
                new_root,
            })
        }
    }
}

/// Inclusion path of an existing member of a required credential's group.
fn member_path(
    input: GroupInput,
    leaf: Fr,
    index: Option<usize>,
    what: &str,
) -> Result<MerkleProof, CredentialError> {
    let missing = || CredentialError::ProofGeneration(format!("{what} is not a member of the group"));
    let proof = match input {
        GroupInput::Full(group) => {
            let index = match index {
                Some(index) => index,
                None => group.index_of(&leaf).ok_or_else(missing)?,
            };
            group.merkle_proof(index).map_err(|_| missing())?
        }
        GroupInput::PathOnly { proof, .. } => {
            proof.check()?;
            proof
        }
    };
    if proof.leaf != leaf {
        return Err(missing());
    }
    Ok(proof)
}

fn check_depths(inputs: &[&GroupInput]) -> Result<usize, CredentialError> {
    let depth = inputs.first().map(|g| g.depth()).unwrap_or_default();
    if let Some(other) = inputs.iter().find(|g| g.depth() != depth) {
        return Err(CredentialError::protocol(format!(
            "all groups must share one tree depth, got {depth} and {}",
            other.depth()
        )));
    }
    Ok(depth)
}

/// Assembles and proves solution and rating proofs.
pub struct ProofOrchestrator<B> {
    backend: Arc<B>,
}

impl<B> Clone for ProofOrchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: ProofBackend> ProofOrchestrator<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Grade the answers and prove the solution under the config's policy.
    pub async fn generate_solution_proof(
        &self,
        request: SolutionRequest,
    ) -> Result<ProofResult, CredentialError> {
        let SolutionRequest {
            identity,
            answers,
            config,
            identity_group,
            grade_group,
            required,
        } = request;

        let grade = grading::grade(&answers, &config)?;
        let policy = Policy::of(&config);

        match (policy, &required) {
            (Policy::Open, None)
            | (Policy::CredentialRestricted, Some(RequiredGroup::Ownership(_)))
            | (Policy::GradeRestricted, Some(RequiredGroup::GradeClaim { .. })) => {}
            (Policy::Open, Some(_)) => {
                return Err(CredentialError::protocol(
                    "open tests take no required credential group",
                ));
            }
            (_, _) => {
                return Err(CredentialError::protocol(format!(
                    "{policy:?} tests need the matching group of credential {}",
                    config.required_credential
                )));
            }
        }

        let mut groups = vec![&identity_group, &grade_group];
        match &required {
            Some(RequiredGroup::Ownership(group)) | Some(RequiredGroup::GradeClaim { group, .. }) => {
                groups.push(group)
            }
            None => {}
        }
        let depth = check_depths(&groups)?;

        info!(
            ?policy,
            grade = grade.grade,
            pass = grade.pass,
            depth,
            "generating solution proof"
        );

        let identity_commitment = identity_commitment(&identity);
        let grade_commitment = grade_commitment_from_identity(identity_commitment, grade.grade);
        let identity_tree = append_leaf(identity_group, identity_commitment, "identity")?;
        let grade_tree = append_leaf(grade_group, grade_commitment, "grade")?;

        let signal = test_signal(
            identity_commitment,
            identity_tree.new_root,
            grade_commitment,
            grade_tree.new_root,
        );
        debug!(signal = %hex::encode(signal), "derived test signal");

        let solution = solution_circuit(
            &config,
            &answers,
            &grade,
            &identity,
            depth,
            identity_tree.update,
            grade_tree.update,
        );

        let secondary = match required {
            None => None,
            Some(RequiredGroup::Ownership(group)) => {
                let path = member_path(group, identity_commitment, None, "identity")?;
                Some(CircuitInputs::Ownership(OwnershipCircuit {
                    depth,
                    identity: identity.clone(),
                    siblings: path.siblings,
                    path_indices: path.path_indices,
                    signal_hash: signal_hash(&signal),
                    external_nullifier: hash_scope(CREDENTIAL_RESTRICTED_TEST_SCOPE)?,
                }))
            }
            Some(RequiredGroup::GradeClaim { group, prior }) => {
                let leaf = grade_commitment_from_identity(identity_commitment, prior.grade);
                let path = member_path(group, leaf, Some(prior.index), "prior grade commitment")?;
                Some(CircuitInputs::GradeClaim(GradeClaimCircuit {
                    depth,
                    identity: identity.clone(),
                    grade: prior.grade,
                    siblings: path.siblings,
                    path_indices: path.path_indices,
                    grade_threshold: config.required_credential_grade_threshold,
                    signal_hash: signal_hash(&signal),
                    external_nullifier: hash_scope(GRADE_RESTRICTED_TEST_SCOPE)?,
                }))
            }
        };

        let (primary, secondary) = match secondary {
            None => (self.prove(CircuitInputs::TestSolution(solution)).await?, None),
            Some(secondary) => {
                let (primary, secondary) = tokio::try_join!(
                    self.prove(CircuitInputs::TestSolution(solution)),
                    self.prove(secondary)
                )?;
                (primary, Some(secondary))
            }
        };

        let test = test_full_proof(primary, grade.pass, config.test_height, depth)?;
        let result = match (policy, secondary) {
            (Policy::Open, None) => ProofResult::Open(test),
            (Policy::CredentialRestricted, Some(ownership)) => ProofResult::CredentialRestricted {
                test,
                ownership: ownership_full_proof(ownership, signal, depth)?,
            },
            (Policy::GradeRestricted, Some(grade_claim)) => ProofResult::GradeRestricted {
                test,
                grade_claim: grade_claim_full_proof(grade_claim, signal, depth)?,
            },
            _ => return Err(CredentialError::protocol("secondary proof does not match the policy")),
        };

        info!(?policy, "solution proof generated");
        Ok(result)
    }

    /// Prove membership in a credentials group while rating its issuer.
    pub async fn generate_rate_issuer_proof(
        &self,
        identity: &IdentitySecret,
        credentials_group: GroupInput,
        rating: u8,
        comment: &str,
    ) -> Result<RateFullProof, CredentialError> {
        check_rating(rating, comment)?;

        let depth = credentials_group.depth();
        let path = member_path(credentials_group, identity_commitment(identity), None, "identity")?;
        let signal = rating_signal(rating, comment);

        info!(rating, depth, "generating rate issuer proof");
        let generated = self
            .prove(CircuitInputs::Ownership(OwnershipCircuit {
                depth,
                identity: identity.clone(),
                siblings: path.siblings,
                path_indices: path.path_indices,
                signal_hash: signal_hash(&signal),
                external_nullifier: hash_scope(RATE_ISSUER_SCOPE)?,
            }))
            .await?;

        Ok(RateFullProof {
            rating,
            comment: comment.to_string(),
            ownership: ownership_full_proof(generated, signal, depth)?,
        })
    }

    async fn prove(&self, inputs: CircuitInputs) -> Result<GeneratedProof, CredentialError> {
        let backend = self.backend.clone();
        let circuit = inputs.id();
        tokio::task::spawn_blocking(move || backend.prove(inputs))
            .await
            .map_err(|e| CredentialError::ProofGeneration(format!("{circuit} prover task: {e}")))?
            .map_err(CredentialError::from)
    }
}

fn solution_circuit(
    config: &TestConfig,
    answers: &TestAnswers,
    grade: &GradeResult,
    identity: &IdentitySecret,
    depth: usize,
    identity_tree: TreeUpdate,
    grade_tree: TreeUpdate,
) -> TestSolutionCircuit {
    TestSolutionCircuit {
        test_height: config.test_height,
        depth,
        minimum_grade: if grade.pass { config.minimum_grade } else { 0 },
        multiple_choice_weight: config.multiple_choice_weight,
        n_questions: config.n_questions,
        multiple_choice_root: config.multiple_choice_root,
        open_answers_hashes_root: config.open_answers_hashes_root,
        multiple_choice_answers: padded_multiple_choice_answers(
            &answers.multiple_choice_answers,
            config.test_height,
        ),
        open_answers: padded_open_answers(&answers.open_answers, config.test_height)
            .iter()
            .map(|answer| hash_str(answer))
            .collect(),
        open_answers_hashes: config.open_answers_hashes.clone(),
        identity: identity.clone(),
        identity_tree,
        grade_tree,
    }
}

fn expect_signals(
    generated: &GeneratedProof,
    count: usize,
    circuit: &str,
) -> Result<(), CredentialError> {
    if generated.public_signals.len() != count {
        return Err(CredentialError::ProofGeneration(format!(
            "{circuit} proof has {} public signals, expected {count}",
            generated.public_signals.len()
        )));
    }
    Ok(())
}

fn test_full_proof(
    generated: GeneratedProof,
    test_passed: bool,
    test_height: u8,
    tree_depth: usize,
) -> Result<TestFullProof, CredentialError> {
    expect_signals(&generated, solution_signals::COUNT, "test solution")?;
    let signals = &generated.public_signals;
    Ok(TestFullProof {
        identity_commitment: signals[solution_signals::IDENTITY_COMMITMENT],
        new_identity_tree_root: signals[solution_signals::NEW_IDENTITY_TREE_ROOT],
        grade_commitment: signals[solution_signals::GRADE_COMMITMENT],
        new_grade_tree_root: signals[solution_signals::NEW_GRADE_TREE_ROOT],
        test_passed,
        test_height,
        tree_depth,
        public_signals: generated.public_signals,
        proof: generated.proof,
    })
}

fn ownership_full_proof(
    generated: GeneratedProof,
    signal: Word,
    tree_depth: usize,
) -> Result<OwnershipFullProof, CredentialError> {
    expect_signals(&generated, ownership_signals::COUNT, "ownership")?;
    let signals = &generated.public_signals;
    Ok(OwnershipFullProof {
        merkle_tree_root: signals[ownership_signals::MERKLE_TREE_ROOT],
        nullifier_hash: signals[ownership_signals::NULLIFIER_HASH],
        signal,
        external_nullifier: signals[ownership_signals::EXTERNAL_NULLIFIER],
        tree_depth,
        public_signals: generated.public_signals,
        proof: generated.proof,
    })
}

fn grade_claim_full_proof(
    generated: GeneratedProof,
    signal: Word,
    tree_depth: usize,
) -> Result<GradeClaimFullProof, CredentialError> {
    expect_signals(&generated, grade_claim_signals::COUNT, "grade claim")?;
    let signals = &generated.public_signals;
    let threshold = signals[grade_claim_signals::GRADE_THRESHOLD];
    let grade_threshold = fr_to_u8(&threshold).ok_or_else(|| {
        CredentialError::protocol(format!(
            "grade claim threshold {} does not fit a grade",
            fr_to_hex(&threshold)
        ))
    })?;
    Ok(GradeClaimFullProof {
        grade_tree_root: signals[grade_claim_signals::GRADE_TREE_ROOT],
        nullifier_hash: signals[grade_claim_signals::NULLIFIER_HASH],
        grade_threshold,
        signal,
        external_nullifier: signals[grade_claim_signals::EXTERNAL_NULLIFIER],
        tree_depth,
        public_signals: generated.public_signals,
        proof: generated.proof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::grade_commitment;
    use crate::fixtures::{answers, identity, sample_config, WitnessOnlyBackend};
    use crate::group::GroupState;

    const DEPTH: usize = 4;

    fn orchestrator() -> ProofOrchestrator<WitnessOnlyBackend> {
        ProofOrchestrator::new(Arc::new(WitnessOnlyBackend))
    }

    fn group(tree_id: u64, members: &[u64]) -> GroupState {
        GroupState::with_members(tree_id, DEPTH, members.iter().map(|m| Fr::from(*m))).unwrap()
    }

    fn open_request() -> SolutionRequest {
        SolutionRequest {
            identity: identity(),
            answers: answers(&[1; 16], &["sneed's", "feed", "wrong"]),
            config: sample_config(),
            identity_group: GroupInput::Full(group(1, &[5, 6])),
            grade_group: GroupInput::Full(group(1, &[7])),
            required: None,
        }
    }

    #[tokio::test]
    async fn open_policy_appends_both_commitments() {
        let result = orchestrator().generate_solution_proof(open_request()).await.unwrap();
        let ProofResult::Open(test) = result else {
            panic!("expected an open result");
        };

        let id = identity();
        assert!(test.test_passed);
        assert_eq!(test.identity_commitment, identity_commitment(&id));
        assert_eq!(test.grade_commitment, grade_commitment(&id, 83));
        assert_eq!(
            test.new_identity_tree_root,
            GroupState::with_members(
                1,
                DEPTH,
                [Fr::from(5u64), Fr::from(6u64), identity_commitment(&id)]
            )
            .unwrap()
            .root()
        );
        assert_eq!(
            test.public_signals[solution_signals::OLD_GRADE_TREE_ROOT],
            {
                let mut g = group(1, &[7]);
                g.add_member(g.zero_value()).unwrap();
                g.root()
            }
        );
        assert_eq!(test.public_signals[solution_signals::MINIMUM_GRADE], Fr::from(50u64));
    }

    #[tokio::test]
    async fn failing_solution_proves_with_zero_minimum_grade() {
        let mut request = open_request();
        request.answers = answers(&[0; 16], &["no", "no", "no"]);
        let result = orchestrator().generate_solution_proof(request).await.unwrap();
        let test = result.test();
        assert!(!test.test_passed);
        assert_eq!(test.public_signals[solution_signals::MINIMUM_GRADE], Fr::from(0u64));
        assert_eq!(test.grade_commitment, grade_commitment(&identity(), 0));
    }

    #[tokio::test]
    async fn path_only_groups_need_an_empty_leaf() {
        let mut identity_group = group(1, &[5, 6]);
        identity_group.add_member(identity_group.zero_value()).unwrap();
        let path = identity_group.merkle_proof(2).unwrap();

        let mut request = open_request();
        request.identity_group = GroupInput::PathOnly { proof: path.clone(), tree_id: 1 };
        let from_path = orchestrator().generate_solution_proof(request).await.unwrap();
        let from_group = orchestrator().generate_solution_proof(open_request()).await.unwrap();
        assert_eq!(
            from_path.test().new_identity_tree_root,
            from_group.test().new_identity_tree_root
        );

        let mut request = open_request();
        request.identity_group = GroupInput::PathOnly { proof: path, tree_id: 2 };
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert!(matches!(err, CredentialError::Protocol(_)));
    }

    #[tokio::test]
    async fn mismatched_depths_are_a_protocol_error() {
        let mut request = open_request();
        request.grade_group = GroupInput::Full(GroupState::new(1, DEPTH + 1).unwrap());
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert!(matches!(err, CredentialError::Protocol(_)));
    }

    #[tokio::test]
    async fn validation_runs_before_proving() {
        let mut request = open_request();
        request.answers.open_answers.pop();
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert_eq!(
            err,
            CredentialError::Validation("some questions were left unanswered".into())
        );
    }

    #[tokio::test]
    async fn restricted_policies_need_their_group() {
        let mut request = open_request();
        request.config.required_credential = 2;
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert!(matches!(err, CredentialError::Protocol(_)));

        let mut request = open_request();
        request.required = Some(RequiredGroup::Ownership(GroupInput::Full(group(2, &[1]))));
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert!(matches!(err, CredentialError::Protocol(_)));
    }

    #[tokio::test]
    async fn credential_restricted_binds_ownership_to_the_test_signal() {
        let id = identity();
        let mut request = open_request();
        request.config.required_credential = 2;
        request.required = Some(RequiredGroup::Ownership(GroupInput::Full(GroupState::with_members(
            2,
            DEPTH,
            [Fr::from(1u64), identity_commitment(&id)],
        )
        .unwrap())));

        let result = orchestrator().generate_solution_proof(request).await.unwrap();
        let ProofResult::CredentialRestricted { test, ownership } = result else {
            panic!("expected a credential-restricted result");
        };
        assert_eq!(ownership.signal, test.signal());
        assert_eq!(
            ownership.public_signals[ownership_signals::SIGNAL_HASH],
            signal_hash(&test.signal())
        );
        assert_eq!(
            ownership.nullifier_hash,
            nullifier_hash(&id, CREDENTIAL_RESTRICTED_TEST_SCOPE).unwrap()
        );
    }

    #[tokio::test]
    async fn non_members_cannot_prove_ownership() {
        let mut request = open_request();
        request.config.required_credential = 2;
        request.required = Some(RequiredGroup::Ownership(GroupInput::Full(group(2, &[1, 2]))));
        let err = orchestrator().generate_solution_proof(request).await.unwrap_err();
        assert!(matches!(err, CredentialError::ProofGeneration(_)));
    }

    fn grade_restricted(prior_grade: u8, threshold: u8) -> SolutionRequest {
        let id = identity();
        let mut request = open_request();
        request.config.required_credential = 2;
        request.config.required_credential_grade_threshold = threshold;
        request.required = Some(RequiredGroup::GradeClaim {
            group: GroupInput::Full(
                GroupState::with_members(
                    2,
                    DEPTH,
                    [Fr::from(3u64), grade_commitment(&id, prior_grade)],
                )
                .unwrap(),
            ),
            prior: PriorGrade { grade: prior_grade, index: 1 },
        });
        request
    }

    #[tokio::test]
    async fn grade_claim_below_threshold_fails_generation() {
        let result = orchestrator()
            .generate_solution_proof(grade_restricted(80, 80))
            .await
            .unwrap();
        let ProofResult::GradeRestricted { grade_claim, test } = result else {
            panic!("expected a grade-restricted result");
        };
        assert_eq!(grade_claim.grade_threshold, 80);
        assert_eq!(grade_claim.signal, test.signal());

        let err = orchestrator()
            .generate_solution_proof(grade_restricted(79, 80))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ProofGeneration(_)));
    }

    #[tokio::test]
    async fn nullifier_hash_ignores_the_signal() {
        let id = identity();
        let members = GroupInput::Full(
            GroupState::with_members(1, DEPTH, [identity_commitment(&id)]).unwrap(),
        );
        let a = orchestrator()
            .generate_rate_issuer_proof(&id, members.clone(), 35, "treefiddy")
            .await
            .unwrap();
        let b = orchestrator()
            .generate_rate_issuer_proof(&id, members, 90, "")
            .await
            .unwrap();
        assert_eq!(a.ownership.nullifier_hash, b.ownership.nullifier_hash);
        assert_ne!(a.ownership.signal, b.ownership.signal);
        assert_eq!(
            a.ownership.nullifier_hash,
            nullifier_hash(&id, RATE_ISSUER_SCOPE).unwrap()
        );
    }

    #[tokio::test]
    async fn ratings_are_validated() {
        let members = GroupInput::Full(group(1, &[1]));
        let err = orchestrator()
            .generate_rate_issuer_proof(&identity(), members.clone(), 101, "")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));

        let err = orchestrator()
            .generate_rate_issuer_proof(&identity(), members, 50, &"x".repeat(1025))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));
    }

    #[test]
    fn policy_follows_restrictions() {
        let mut config = sample_config();
        assert_eq!(Policy::of(&config), Policy::Open);
        config.required_credential = 4;
        assert_eq!(Policy::of(&config), Policy::CredentialRestricted);
        config.required_credential_grade_threshold = 10;
        assert_eq!(Policy::of(&config), Policy::GradeRestricted);
        assert_eq!(Policy::from_tag(Policy::GradeRestricted.tag()), Some(Policy::GradeRestricted));
    }

    #[test]
    fn oversized_grade_threshold_signal_is_refused() {
        let claim = |threshold: u64| {
            let mut public_signals = vec![Fr::from(0u64); grade_claim_signals::COUNT];
            public_signals[grade_claim_signals::GRADE_THRESHOLD] = Fr::from(threshold);
            grade_claim_full_proof(
                GeneratedProof {
                    proof: Proof::default(),
                    public_signals,
                },
                [0u8; 32],
                DEPTH,
            )
        };

        assert_eq!(claim(255).unwrap().grade_threshold, 255);
        assert!(matches!(claim(256), Err(CredentialError::Protocol(_))));
        assert!(matches!(claim(1 << 40), Err(CredentialError::Protocol(_))));
    }

    #[tokio::test]
    async fn results_survive_json_transport() {
        let result = orchestrator().generate_solution_proof(open_request()).await.unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""policy":"open""#));
        let decoded: ProofResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, result);
    }
}
