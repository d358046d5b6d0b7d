/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the [Certificate] trait which specifies the minimal signature for types that serve
//! as evidence that replicas attested to a given block hash. Also defines:
//! 1. The [PartialCertificate] type: a single replica's signed attestation over a block hash.
//! 2. The [QuorumCertificate] type: an accumulation of partial certificates from at least
//!    `nmajority` distinct replicas over the same block hash.
//!
//! Both types implement the capability set the consensus core relies on — clone, borsh
//! serialization, and verification against the replica configuration — so swapping in a different
//! signature scheme (e.g., a threshold or aggregate scheme) means swapping these types while keeping
//! the same capabilities.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::warn;

use crate::config::ReplicaConfig;
use crate::types::basic::*;

/// Evidence that one or more replicas attested to a given object hash. The correctness of a
/// certificate can be validated with [Certificate::is_correct] given the replica configuration.
pub trait Certificate {
    /// The hash of the object (for this protocol: always a block) the certificate attests to.
    fn obj_hash(&self) -> CryptoHash;

    /// Returns whether the certificate is cryptographically correct under the given configuration.
    fn is_correct(&self, config: &ReplicaConfig) -> bool;
}

/// A single replica's signed attestation that it votes for the block identified by `obj_hash`.
/// Carried inside [votes](crate::messages::Vote) and accumulated into [QuorumCertificate]s.
#[derive(Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PartialCertificate {
    pub signer: ReplicaID,
    pub obj_hash: CryptoHash,
    pub signature: SignatureBytes,
}

impl PartialCertificate {
    /// Create a partial certificate that proves `signer`'s vote for the block identified by
    /// `obj_hash`. The signature covers the raw block hash bytes.
    pub fn new(
        signing_key: &SigningKey,
        signer: ReplicaID,
        obj_hash: CryptoHash,
    ) -> PartialCertificate {
        let signature = SignatureBytes::new(signing_key.sign(&obj_hash.bytes()).to_bytes());
        PartialCertificate {
            signer,
            obj_hash,
            signature,
        }
    }

    /// Returns whether the certificate's signature verifies under the given public key.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> bool {
        match Signature::from_slice(&self.signature.bytes()) {
            Ok(signature) => verifying_key
                .verify(&self.obj_hash.bytes(), &signature)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl Certificate for PartialCertificate {
    fn obj_hash(&self) -> CryptoHash {
        self.obj_hash
    }

    fn is_correct(&self, config: &ReplicaConfig) -> bool {
        match config.verifying_key(&self.signer) {
            Some(verifying_key) => self.verify(verifying_key),
            None => false,
        }
    }
}

/// Proof that at least `nmajority` distinct replicas voted for the block identified by `obj_hash`.
///
/// A quorum certificate starts out [incomplete](QuorumCertificate::incomplete), grows one
/// [part](QuorumCertificate::add_part) per vote, and is sealed with
/// [compute](QuorumCertificate::compute) once the quorum count is reached. For the multi-signature
/// scheme implemented here the parts are already in final form, so `compute` is only the point where
/// an aggregation scheme would fold them.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub obj_hash: CryptoHash,
    pub signatures: SignatureSet,
}

impl QuorumCertificate {
    /// Create an empty certificate for the block identified by `obj_hash`, with one signature slot
    /// per replica in the cluster.
    pub fn incomplete(obj_hash: CryptoHash, nreplicas: usize) -> QuorumCertificate {
        QuorumCertificate {
            obj_hash,
            signatures: SignatureSet::new(nreplicas),
        }
    }

    /// Install `cert`'s signature into the slot of its signer. A certificate over a different block
    /// hash is rejected with a warning; the caller is expected to have verified the part beforehand.
    pub fn add_part(&mut self, cert: &PartialCertificate) {
        if cert.obj_hash != self.obj_hash {
            warn!(
                "discarding certificate part for a different block (signer = {})",
                cert.signer
            );
            return;
        }
        self.signatures
            .set(cert.signer.index(), Some(cert.signature));
    }

    /// Seal the certificate. Aggregation schemes fold the accumulated parts here; the
    /// multi-signature scheme keeps them as-is.
    pub fn compute(&mut self) {}

    /// Number of parts accumulated so far.
    pub fn count(&self) -> usize {
        self.signatures.count()
    }
}

impl Certificate for QuorumCertificate {
    fn obj_hash(&self) -> CryptoHash {
        self.obj_hash
    }

    /// Checks if all of the signatures in the certificate are correct, and if enough of them are
    /// present to form a quorum.
    fn is_correct(&self, config: &ReplicaConfig) -> bool {
        if self.signatures.len() != config.len() {
            return false;
        }

        let mut count = 0;
        for (pos, signature) in self.signatures.iter().enumerate() {
            if let Some(signature) = signature {
                let signer = ReplicaID::new(pos as u8);
                let verifying_key = match config.verifying_key(&signer) {
                    Some(verifying_key) => verifying_key,
                    None => return false,
                };
                let signature = match Signature::from_slice(&signature.bytes()) {
                    Ok(signature) => signature,
                    Err(_) => return false,
                };
                if verifying_key
                    .verify(&self.obj_hash.bytes(), &signature)
                    .is_err()
                {
                    // qc contains incorrect signature.
                    return false;
                }
                count += 1;
            }
        }

        count >= config.nmajority()
    }
}
