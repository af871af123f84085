//! Interfaces to the confidential-computation substrate.
//!
//! The clearing core never sees a plaintext except through
//! [`DecryptionOracle::resolve`], and only while a settlement is in flight.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use auction_types::{Address, CiphertextHandle, ConfidentialValue, InputProof};

/// Pending decryption issued by an oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecryptionHandle(pub [u8; 32]);

/// Errors surfaced by a decryption oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Decryption service unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown decryption handle")]
    UnknownHandle,

    #[error("Timed out waiting for decryption")]
    Timeout,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

impl OracleError {
    /// The ciphertext itself is malformed. Retrying cannot help.
    pub fn is_undecryptable(&self) -> bool {
        matches!(self, OracleError::DecryptionFailed(_))
    }
}

/// Validates the proof attached to a bid's two ciphertexts.
pub trait InputVerifier: Send + Sync {
    fn verify_input(
        &self,
        identity: &[u8; 32],
        bidder: &Address,
        quantity: &ConfidentialValue,
        price: &ConfidentialValue,
        proof: &InputProof,
    ) -> bool;
}

/// Staged decryption: request now, resolve later, in any order.
///
/// `request_decryption` must be idempotent per ciphertext so that a retried
/// settlement never creates a second request for the same value.
#[async_trait]
pub trait DecryptionOracle: Send + Sync {
    async fn request_decryption(
        &self,
        identity: &[u8; 32],
        value: &ConfidentialValue,
    ) -> Result<DecryptionHandle, OracleError>;

    async fn resolve(&self, handle: &DecryptionHandle) -> Result<u128, OracleError>;

    /// Drop everything held for `identity`. Called once the auction that
    /// owns it can no longer settle.
    fn forget(&self, _identity: &[u8; 32]) {}
}

/// Verifies Schnorr input proofs over BLS12-381.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlsInputVerifier;

impl InputVerifier for BlsInputVerifier {
    fn verify_input(
        &self,
        identity: &[u8; 32],
        bidder: &Address,
        quantity: &ConfidentialValue,
        price: &ConfidentialValue,
        proof: &InputProof,
    ) -> bool {
        auction_crypto::verify_input_proof(identity, bidder, quantity, price, proof).is_ok()
    }
}

/// Key for remembering issued handles across settlement attempts.
pub(crate) fn ciphertext_key(value: &ConfidentialValue) -> CiphertextHandle {
    value.handle()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Oracle and bid helpers for unit tests.

    use super::*;
    use auction_crypto::{derive_decryption_key, encrypt_value, ibe::random_scalar, prove_input, IbeParams};
    use auction_types::{compute_auction_identity, AuctionId};
    use bls12_381::G2Projective;
    use group::Curve;
    use parking_lot::Mutex;
    use rand::rngs::OsRng;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dealer-held key standing in for the key-holder committee.
    pub struct TestKeys {
        secret: bls12_381::Scalar,
        pub params: IbeParams,
    }

    impl TestKeys {
        pub fn new() -> Self {
            let secret = random_scalar(&mut OsRng);
            let mpk = (G2Projective::generator() * secret).to_affine();
            Self {
                secret,
                params: IbeParams { mpk },
            }
        }

        /// Encrypt and prove a bid for `bidder` in `auction_id`.
        pub fn seal(
            &self,
            auction_id: AuctionId,
            bidder: &Address,
            quantity: u128,
            price: u128,
        ) -> (ConfidentialValue, ConfidentialValue, InputProof) {
            let identity = compute_auction_identity(auction_id);
            let (q, rq) = encrypt_value(&self.params, &identity, quantity, &mut OsRng).unwrap();
            let (p, rp) = encrypt_value(&self.params, &identity, price, &mut OsRng).unwrap();
            let proof = prove_input(&identity, bidder, (&q, &rq), (&p, &rp), &mut OsRng);
            (q, p, proof)
        }

        /// Like `seal`, but the quantity payload is garbage under a valid
        /// ephemeral key and proof.
        pub fn seal_garbled(
            &self,
            auction_id: AuctionId,
            bidder: &Address,
            price: u128,
        ) -> (ConfidentialValue, ConfidentialValue, InputProof) {
            let identity = compute_auction_identity(auction_id);
            let (mut q, rq) = encrypt_value(&self.params, &identity, 1, &mut OsRng).unwrap();
            q.ciphertext = vec![0u8; 32];
            let (p, rp) = encrypt_value(&self.params, &identity, price, &mut OsRng).unwrap();
            let proof = prove_input(&identity, bidder, (&q, &rq), (&p, &rp), &mut OsRng);
            (q, p, proof)
        }
    }

    /// Oracle that decrypts with the dealer key and can be told to fail.
    pub struct TestOracle {
        secret: bls12_381::Scalar,
        pending: Mutex<BTreeMap<DecryptionHandle, ([u8; 32], ConfidentialValue)>>,
        pub requests: AtomicUsize,
        /// Every `request_decryption` call, repeated ciphertexts included
        pub calls: AtomicUsize,
        pub failing_resolves: AtomicUsize,
        pub forgotten: Mutex<Vec<[u8; 32]>>,
    }

    impl TestOracle {
        pub fn new(keys: &TestKeys) -> Self {
            Self {
                secret: keys.secret,
                pending: Mutex::new(BTreeMap::new()),
                requests: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                failing_resolves: AtomicUsize::new(0),
                forgotten: Mutex::new(Vec::new()),
            }
        }

        /// Fail the next `n` resolve calls.
        pub fn fail_next(&self, n: usize) {
            self.failing_resolves.store(n, Ordering::SeqCst);
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DecryptionOracle for TestOracle {
        async fn request_decryption(
            &self,
            identity: &[u8; 32],
            value: &ConfidentialValue,
        ) -> Result<DecryptionHandle, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let handle = DecryptionHandle(ciphertext_key(value));
            let mut pending = self.pending.lock();
            if !pending.contains_key(&handle) {
                self.requests.fetch_add(1, Ordering::SeqCst);
                pending.insert(handle, (*identity, value.clone()));
            }
            Ok(handle)
        }

        async fn resolve(&self, handle: &DecryptionHandle) -> Result<u128, OracleError> {
            let injected = self
                .failing_resolves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(OracleError::Unavailable("injected".into()));
            }
            let (identity, value) = self
                .pending
                .lock()
                .get(handle)
                .cloned()
                .ok_or(OracleError::UnknownHandle)?;
            let key = derive_decryption_key(&self.secret, &identity);
            auction_crypto::decrypt_value(&value, &key)
                .map_err(|e| OracleError::DecryptionFailed(e.to_string()))
        }

        fn forget(&self, identity: &[u8; 32]) {
            self.forgotten.lock().push(*identity);
        }
    }

    /// Oracle whose resolutions never arrive.
    pub struct StalledOracle;

    #[async_trait]
    impl DecryptionOracle for StalledOracle {
        async fn request_decryption(
            &self,
            _identity: &[u8; 32],
            value: &ConfidentialValue,
        ) -> Result<DecryptionHandle, OracleError> {
            Ok(DecryptionHandle(ciphertext_key(value)))
        }

        async fn resolve(&self, _handle: &DecryptionHandle) -> Result<u128, OracleError> {
            futures::future::pending::<Result<u128, OracleError>>().await
        }
    }
}
