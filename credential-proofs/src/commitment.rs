//! Leaf commitments.

use crate::hash::hash_pair;
use crate::types::IdentitySecret;
use ark_bn254::Fr;

/// `H(nullifier, trapdoor)`: the identity leaf of the credentials/no-credentials groups.
pub fn identity_commitment(secret: &IdentitySecret) -> Fr {
    hash_pair(secret.nullifier, secret.trapdoor)
}

/// `H(identityCommitment, grade)`: the leaf of the grade group.
pub fn grade_commitment(secret: &IdentitySecret, grade: u8) -> Fr {
    grade_commitment_from_identity(identity_commitment(secret), grade)
}

pub fn grade_commitment_from_identity(identity_commitment: Fr, grade: u8) -> Fr {
    hash_pair(identity_commitment, Fr::from(u64::from(grade)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::identity;

    #[test]
    fn commitments_are_deterministic() {
        let id = identity();
        assert_eq!(identity_commitment(&id), identity_commitment(&id.clone()));
        assert_eq!(grade_commitment(&id, 83), grade_commitment(&id, 83));
        assert_eq!(
            grade_commitment(&id, 83),
            grade_commitment_from_identity(identity_commitment(&id), 83)
        );
    }

    #[test]
    fn commitments_bind_every_input() {
        let id = identity();
        let other = IdentitySecret::new(id.trapdoor, id.nullifier);
        assert_ne!(identity_commitment(&id), identity_commitment(&other));
        assert_ne!(grade_commitment(&id, 83), grade_commitment(&id, 84));
        assert_ne!(identity_commitment(&id), grade_commitment(&id, 0));
    }
}
