//! Threshold Decryption Coordinator
//!
//! This crate serves staged decryption of confidential bid fields by:
//! 1. Recording decryption requests per ciphertext (idempotent)
//! 2. Announcing which auction identities need a key
//! 3. Collecting partial keys from key holders and verifying each by pairing
//! 4. Aggregating the identity key once the threshold is met
//! 5. Decrypting every pending request of that identity and waking waiters
//!
//! [`ThresholdGateway`] implements the module's `DecryptionOracle`, so the
//! clearing core can request now and resolve later.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use auction_crypto::{
    aggregate_partial_keys, deal_key_shares, decrypt_value, verify_partial_key, CryptoError,
    KeyShare,
};
use auction_module::{DecryptionHandle, DecryptionOracle, OracleError};
use auction_types::{ConfidentialValue, EncryptionKey, G1Point, G2Point, PartialKeyShare};

/// Errors that can occur during decryption coordination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("Key setup failed: {0}")]
    Setup(#[from] CryptoError),

    #[error("Unknown key holder {0}")]
    UnknownHolder(u32),

    #[error("Duplicate share from key holder {0}")]
    DuplicateShare(u32),

    #[error("Invalid partial key from key holder {0}")]
    InvalidShare(u32),

    #[error("Unknown decryption request")]
    UnknownRequest,

    #[error("Timed out waiting for key release")]
    Timeout,

    #[error("Key aggregation failed: {0}")]
    Aggregation(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Gateway shut down")]
    Closed,
}

impl From<GatewayError> for OracleError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout => OracleError::Timeout,
            GatewayError::UnknownRequest => OracleError::UnknownHandle,
            GatewayError::Decryption(msg) => OracleError::DecryptionFailed(msg),
            other => OracleError::Unavailable(other.to_string()),
        }
    }
}

/// Gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Partial keys required to release an identity key
    pub threshold: u32,
    /// Number of key holders
    pub total_holders: u32,
    /// How long `resolve` waits before reporting a retryable timeout
    pub resolve_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            total_holders: 3,
            resolve_timeout_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.threshold == 0 || self.threshold > self.total_holders {
            return Err(GatewayError::InvalidConfig(format!(
                "threshold {} of {} holders",
                self.threshold, self.total_holders
            )));
        }
        if self.resolve_timeout_ms == 0 {
            return Err(GatewayError::InvalidConfig("resolve timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// `None` while pending.
type Resolution = Option<Result<u128, GatewayError>>;

struct RequestEntry {
    identity: [u8; 32],
    value: ConfidentialValue,
    result: watch::Sender<Resolution>,
}

#[derive(Default)]
struct IdentityEntry {
    shares: BTreeMap<u32, PartialKeyShare>,
    key: Option<G1Point>,
}

#[derive(Default)]
struct GatewayState {
    requests: HashMap<[u8; 32], RequestEntry>,
    identities: HashMap<[u8; 32], IdentityEntry>,
}

/// Coordinator between decryption requests and the key-holder committee.
#[derive(Clone)]
pub struct ThresholdGateway {
    config: GatewayConfig,
    holder_keys: Arc<BTreeMap<u32, G2Point>>,
    state: Arc<Mutex<GatewayState>>,
    key_requests: broadcast::Sender<[u8; 32]>,
}

impl ThresholdGateway {
    /// Create a gateway for a committee with known holder public keys.
    pub fn new(
        config: GatewayConfig,
        holder_keys: BTreeMap<u32, G2Point>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        if holder_keys.len() != config.total_holders as usize {
            return Err(GatewayError::InvalidConfig(format!(
                "expected {} holder keys, got {}",
                config.total_holders,
                holder_keys.len()
            )));
        }

        let (key_requests, _) = broadcast::channel(256);
        Ok(Self {
            config,
            holder_keys: Arc::new(holder_keys),
            state: Arc::new(Mutex::new(GatewayState::default())),
            key_requests,
        })
    }

    /// Deal a fresh committee locally. For development nodes and tests.
    pub fn deal<R: RngCore + CryptoRng>(
        config: GatewayConfig,
        rng: &mut R,
    ) -> Result<(Self, EncryptionKey, Vec<KeyHolder>), GatewayError> {
        config.validate()?;
        let dealt = deal_key_shares(config.threshold, config.total_holders, rng)?;

        let holder_keys = dealt
            .shares
            .iter()
            .map(|share| (share.index, share.public_key()))
            .collect();
        let gateway = Self::new(config, holder_keys)?;
        let holders = dealt.shares.into_iter().map(KeyHolder::new).collect();

        info!(
            threshold = gateway.config.threshold,
            total_holders = gateway.config.total_holders,
            "Dealt key-holder committee"
        );
        Ok((gateway, dealt.encryption_key, holders))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Identities that need a key are announced here.
    pub fn subscribe_key_requests(&self) -> broadcast::Receiver<[u8; 32]> {
        self.key_requests.subscribe()
    }

    /// Record a decryption request. Requests for the same ciphertext share
    /// one handle.
    pub fn request(&self, identity: &[u8; 32], value: &ConfidentialValue) -> DecryptionHandle {
        let handle = value.handle();
        let mut state = self.state.lock();

        if state.requests.contains_key(&handle) {
            return DecryptionHandle(handle);
        }

        let known_key = state
            .identities
            .get(identity)
            .and_then(|entry| entry.key.clone());
        let (result, _) = watch::channel(None);
        if let Some(key) = &known_key {
            result.send_replace(Some(decrypt(value, key)));
        }
        state.requests.insert(
            handle,
            RequestEntry {
                identity: *identity,
                value: value.clone(),
                result,
            },
        );
        drop(state);

        debug!(
            handle = %hex::encode(handle),
            key_known = known_key.is_some(),
            "Decryption requested"
        );
        if known_key.is_none() {
            self.announce(identity);
        }
        DecryptionHandle(handle)
    }

    fn announce(&self, identity: &[u8; 32]) {
        // No receivers just means no holder is online yet.
        let _ = self.key_requests.send(*identity);
    }

    /// Accept a partial key. Returns true if this share released the key.
    pub fn submit_share(
        &self,
        identity: &[u8; 32],
        share: PartialKeyShare,
    ) -> Result<bool, GatewayError> {
        let holder_index = share.holder_index;
        let holder_key = self
            .holder_keys
            .get(&holder_index)
            .ok_or(GatewayError::UnknownHolder(holder_index))?;

        let mut state = self.state.lock();
        let entry = state.identities.entry(*identity).or_default();
        if entry.key.is_some() {
            // Late share for an already released key
            return Ok(false);
        }
        if entry.shares.contains_key(&holder_index) {
            return Err(GatewayError::DuplicateShare(holder_index));
        }

        if verify_partial_key(&share, identity, holder_key).is_err() {
            warn!(
                holder_index,
                identity = %hex::encode(identity),
                "Rejected invalid partial key"
            );
            return Err(GatewayError::InvalidShare(holder_index));
        }
        entry.shares.insert(holder_index, share);

        debug!(
            holder_index,
            shares_collected = entry.shares.len(),
            threshold = self.config.threshold,
            "Accepted partial key"
        );

        if entry.shares.len() < self.config.threshold as usize {
            return Ok(false);
        }

        let shares: Vec<PartialKeyShare> = entry.shares.values().cloned().collect();
        let key = aggregate_partial_keys(&shares, self.config.threshold as usize)
            .map_err(|e| GatewayError::Aggregation(e.to_string()))?;
        entry.key = Some(key.clone());

        // Release every pending request of this identity
        let mut released = 0usize;
        for request in state.requests.values() {
            if &request.identity == identity && request.result.borrow().is_none() {
                request
                    .result
                    .send_replace(Some(decrypt(&request.value, &key)));
                released += 1;
            }
        }

        info!(
            identity = %hex::encode(identity),
            released,
            "Identity key released"
        );
        Ok(true)
    }

    /// Wait for a request to resolve.
    ///
    /// Re-announces the identity if it is still pending, so holders that came
    /// online after the original request still serve it.
    pub async fn wait(&self, handle: &DecryptionHandle) -> Result<u128, GatewayError> {
        let (mut rx, identity) = {
            let state = self.state.lock();
            let entry = state
                .requests
                .get(&handle.0)
                .ok_or(GatewayError::UnknownRequest)?;
            (entry.result.subscribe(), entry.identity)
        };

        if rx.borrow().is_none() {
            self.announce(&identity);
        }

        let waited =
            tokio::time::timeout(self.config.resolve_timeout(), rx.wait_for(Option::is_some)).await;
        match waited {
            Err(_) => {
                warn!(handle = %hex::encode(handle.0), "Decryption timed out");
                Err(GatewayError::Timeout)
            }
            Ok(Err(_)) => Err(GatewayError::Closed),
            Ok(Ok(resolution)) => resolution.clone().unwrap_or(Err(GatewayError::Closed)),
        }
    }

    /// Drop every request and collected share for `identity`.
    pub fn forget_identity(&self, identity: &[u8; 32]) {
        let mut state = self.state.lock();
        let before = state.requests.len();
        state.requests.retain(|_, request| &request.identity != identity);
        state.identities.remove(identity);

        debug!(
            identity = %hex::encode(identity),
            dropped = before - state.requests.len(),
            "Forgot identity"
        );
    }

    pub fn pending_requests(&self) -> usize {
        self.state
            .lock()
            .requests
            .values()
            .filter(|r| r.result.borrow().is_none())
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn shares_collected(&self, identity: &[u8; 32]) -> usize {
        self.state
            .lock()
            .identities
            .get(identity)
            .map(|entry| entry.shares.len())
            .unwrap_or(0)
    }

    pub fn key_released(&self, identity: &[u8; 32]) -> bool {
        self.state
            .lock()
            .identities
            .get(identity)
            .is_some_and(|entry| entry.key.is_some())
    }
}

fn decrypt(value: &ConfidentialValue, key: &G1Point) -> Result<u128, GatewayError> {
    decrypt_value(value, key).map_err(|e| GatewayError::Decryption(e.to_string()))
}

#[async_trait]
impl DecryptionOracle for ThresholdGateway {
    async fn request_decryption(
        &self,
        identity: &[u8; 32],
        value: &ConfidentialValue,
    ) -> Result<DecryptionHandle, OracleError> {
        Ok(self.request(identity, value))
    }

    async fn resolve(&self, handle: &DecryptionHandle) -> Result<u128, OracleError> {
        self.wait(handle).await.map_err(Into::into)
    }

    fn forget(&self, identity: &[u8; 32]) {
        self.forget_identity(identity);
    }
}

/// One member of the key-holder committee.
pub struct KeyHolder {
    share: KeyShare,
}

impl KeyHolder {
    pub fn new(share: KeyShare) -> Self {
        Self { share }
    }

    pub fn index(&self) -> u32 {
        self.share.index
    }

    pub fn public_key(&self) -> G2Point {
        self.share.public_key()
    }

    pub fn partial_key(&self, identity: &[u8; 32]) -> PartialKeyShare {
        self.share.partial_key(identity)
    }

    /// Serve key requests from the gateway until it shuts down.
    ///
    /// Subscribes before spawning, so no announcement made after this call
    /// returns is missed.
    pub fn spawn(self, gateway: ThresholdGateway) -> JoinHandle<()> {
        let mut requests = gateway.subscribe_key_requests();
        tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(identity) => {
                        match gateway.submit_share(&identity, self.partial_key(&identity)) {
                            Ok(_) | Err(GatewayError::DuplicateShare(_)) => {}
                            Err(e) => warn!(holder_index = self.index(), error = %e, "Share rejected"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(holder_index = self.index(), skipped, "Key requests lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Spawn a serving task for each holder.
pub fn spawn_key_holders(gateway: &ThresholdGateway, holders: Vec<KeyHolder>) -> Vec<JoinHandle<()>> {
    holders
        .into_iter()
        .map(|holder| holder.spawn(gateway.clone()))
        .collect()
}
