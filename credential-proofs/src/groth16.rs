//! Groth16 proof backend for the credential circuits.
//!
//! SECURITY NOTE (prototype): Groth16 requires a trusted setup that produces a proving key (PK)
//! and verifying key (VK) per circuit shape. This backend generates keys locally. In production,
//! an MPC ceremony (or a transparent system) should be used.

use crate::circuit::{
    grade_claim_signals, ownership_signals, solution_signals, GradeClaimCircuit, OwnershipCircuit,
    TestSolutionCircuit,
};
use crate::error::CredentialError;
use ark_bn254::{Bn254, Fr};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, ProvingKey, VerifyingKey};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ZkError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("arkworks error: {0}")]
    Ark(String),

    #[error("witness does not satisfy the circuit: {0}")]
    Unsatisfied(String),

    #[error("no keys loaded for circuit {0}")]
    MissingKeys(CircuitId),
}

impl From<ZkError> for CredentialError {
    fn from(e: ZkError) -> Self {
        CredentialError::ProofGeneration(e.to_string())
    }
}

fn ark_err(e: impl fmt::Display) -> ZkError {
    ZkError::Ark(format!("{e}"))
}

/// A circuit together with the shape parameters its keys depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircuitId {
    TestSolution { test_height: u8, depth: usize },
    Ownership { depth: usize },
    GradeClaim { depth: usize },
}

impl CircuitId {
    pub fn public_signal_count(&self) -> usize {
        match self {
            CircuitId::TestSolution { .. } => solution_signals::COUNT,
            CircuitId::Ownership { .. } => ownership_signals::COUNT,
            CircuitId::GradeClaim { .. } => grade_claim_signals::COUNT,
        }
    }

    /// Shape-only circuit instance used for key generation.
    pub fn blank(&self) -> CircuitInputs {
        match *self {
            CircuitId::TestSolution { test_height, depth } => {
                CircuitInputs::TestSolution(TestSolutionCircuit::blank(test_height, depth))
            }
            CircuitId::Ownership { depth } => CircuitInputs::Ownership(OwnershipCircuit::blank(depth)),
            CircuitId::GradeClaim { depth } => {
                CircuitInputs::GradeClaim(GradeClaimCircuit::blank(depth))
            }
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitId::TestSolution { test_height, depth } => {
                write!(f, "test-solution-h{test_height}-d{depth}")
            }
            CircuitId::Ownership { depth } => write!(f, "ownership-d{depth}"),
            CircuitId::GradeClaim { depth } => write!(f, "grade-claim-d{depth}"),
        }
    }
}

/// Fully assigned inputs of one circuit.
#[derive(Clone, Debug)]
pub enum CircuitInputs {
    TestSolution(TestSolutionCircuit),
    Ownership(OwnershipCircuit),
    GradeClaim(GradeClaimCircuit),
}

impl CircuitInputs {
    pub fn id(&self) -> CircuitId {
        match self {
            CircuitInputs::TestSolution(c) => CircuitId::TestSolution {
                test_height: c.test_height,
                depth: c.depth,
            },
            CircuitInputs::Ownership(c) => CircuitId::Ownership { depth: c.depth },
            CircuitInputs::GradeClaim(c) => CircuitId::GradeClaim { depth: c.depth },
        }
    }
}

/// A proof and the public signals it was generated against, in circuit order.
#[derive(Clone, Debug)]
pub struct GeneratedProof {
    pub proof: Proof<Bn254>,
    pub public_signals: Vec<Fr>,
}

/// The SNARK black box used by the orchestrator and the verifier.
///
/// Both calls are CPU bound; async callers run them on the blocking pool.
pub trait ProofBackend: Send + Sync + 'static {
    /// Produce a proof, or fail with the backend's diagnostic. Never retried.
    fn prove(&self, inputs: CircuitInputs) -> Result<GeneratedProof, ZkError>;

    /// `Ok(false)` for a well-formed proof that does not verify.
    fn verify(
        &self,
        circuit: CircuitId,
        proof: &Proof<Bn254>,
        public_signals: &[Fr],
    ) -> Result<bool, ZkError>;
}

/// Synthesize `circuit` with a concrete witness and return its public signals.
///
/// Fails with `ZkError::Unsatisfied` naming the first broken constraint, so that proving never
/// starts on a witness that cannot verify.
pub fn check_witness<C: ConstraintSynthesizer<Fr>>(circuit: C) -> Result<Vec<Fr>, ZkError> {
    let cs = ConstraintSystem::<Fr>::new_ref();
    circuit.generate_constraints(cs.clone()).map_err(ark_err)?;

    if !cs.is_satisfied().map_err(ark_err)? {
        let which = cs
            .which_is_unsatisfied()
            .map_err(ark_err)?
            .unwrap_or_else(|| "unknown constraint".to_string());
        return Err(ZkError::Unsatisfied(which));
    }

    let public_signals = cs
        .borrow()
        .map(|cs| cs.instance_assignment[1..].to_vec())
        .ok_or_else(|| ZkError::Ark("constraint system was dropped".to_string()))?;

    debug!(
        constraints = cs.num_constraints(),
        public = public_signals.len(),
        "witness satisfied"
    );
    Ok(public_signals)
}

#[derive(Clone)]
pub struct CircuitKeys {
    pub pk: Arc<ProvingKey<Bn254>>,
    pub pvk: Arc<PreparedVerifyingKey<Bn254>>,
}

impl CircuitKeys {
    pub fn new(pk: ProvingKey<Bn254>) -> Self {
        let pvk = prepare_verifying_key(&pk.vk);
        Self {
            pk: Arc::new(pk),
            pvk: Arc::new(pvk),
        }
    }

    pub fn vk(&self) -> &VerifyingKey<Bn254> {
        &self.pk.vk
    }
}

/// In-process Groth16 prover/verifier holding one keypair per circuit shape.
#[derive(Default)]
pub struct Groth16Backend {
    keys: RwLock<HashMap<CircuitId, CircuitKeys>>,
}

impl Groth16Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the (prototype) trusted setup for `circuit` and keep the resulting keys.
    pub fn setup<R: RngCore + CryptoRng>(
        &self,
        circuit: CircuitId,
        rng: &mut R,
    ) -> Result<CircuitKeys, ZkError> {
        let pk = match circuit.blank() {
            CircuitInputs::TestSolution(c) => generate_keys(c, rng)?,
            CircuitInputs::Ownership(c) => generate_keys(c, rng)?,
            CircuitInputs::GradeClaim(c) => generate_keys(c, rng)?,
        };
        debug!(%circuit, "generated groth16 keys");
        Ok(self.insert_keys(circuit, pk))
    }

    /// Register keys produced elsewhere (e.g. loaded from disk).
    pub fn insert_keys(&self, circuit: CircuitId, pk: ProvingKey<Bn254>) -> CircuitKeys {
        let keys = CircuitKeys::new(pk);
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(circuit, keys.clone());
        keys
    }

    pub fn keys(&self, circuit: &CircuitId) -> Option<CircuitKeys> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(circuit)
            .cloned()
    }

    fn require_keys(&self, circuit: &CircuitId) -> Result<CircuitKeys, ZkError> {
        self.keys(circuit).ok_or(ZkError::MissingKeys(*circuit))
    }
}

fn generate_keys<C: ConstraintSynthesizer<Fr>, R: RngCore + CryptoRng>(
    circuit: C,
    rng: &mut R,
) -> Result<ProvingKey<Bn254>, ZkError> {
    Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng).map_err(ark_err)
}

fn prove_circuit<C: ConstraintSynthesizer<Fr> + Clone>(
    circuit: C,
    pk: &ProvingKey<Bn254>,
) -> Result<GeneratedProof, ZkError> {
    let public_signals = check_witness(circuit.clone())?;
    let mut rng = OsRng;
    let proof =
        Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, &mut rng).map_err(ark_err)?;
    Ok(GeneratedProof {
        proof,
        public_signals,
    })
}

impl ProofBackend for Groth16Backend {
    fn prove(&self, inputs: CircuitInputs) -> Result<GeneratedProof, ZkError> {
        let circuit = inputs.id();
        let keys = self.require_keys(&circuit)?;
        debug!(%circuit, "proving");

        match inputs {
            CircuitInputs::TestSolution(c) => prove_circuit(c, &keys.pk),
            CircuitInputs::Ownership(c) => prove_circuit(c, &keys.pk),
            CircuitInputs::GradeClaim(c) => prove_circuit(c, &keys.pk),
        }
    }

    fn verify(
        &self,
        circuit: CircuitId,
        proof: &Proof<Bn254>,
        public_signals: &[Fr],
    ) -> Result<bool, ZkError> {
        let keys = self.require_keys(&circuit)?;
        if public_signals.len() != circuit.public_signal_count() {
            debug!(
                %circuit,
                expected = circuit.public_signal_count(),
                got = public_signals.len(),
                "wrong number of public signals"
            );
            return Ok(false);
        }
        Groth16::<Bn254>::verify_proof(&keys.pvk, proof, public_signals).map_err(ark_err)
    }
}

/// Serialize a proving key to bytes.
pub fn serialize_pk(pk: &ProvingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    pk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}

pub fn deserialize_pk(bytes: &[u8]) -> Result<ProvingKey<Bn254>, ZkError> {
    ProvingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ZkError::Serialization(format!("{e}")))
}

pub fn serialize_vk(vk: &VerifyingKey<Bn254>) -> Result<Vec<u8>, ZkError> {
    let mut out = Vec::new();
    vk.serialize_compressed(&mut out)
        .map_err(|e| ZkError::Serialization(format!("{e}")))?;
    Ok(out)
}
