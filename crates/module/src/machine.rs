//! Auction state machine.
//!
//! One [`Auction`] is one serialization domain: every mutating operation runs
//! under the instance's lock in [`AuctionHandle`]. Transitions:
//!
//! ```text
//! Unstarted --start--> Live --terminate--> Terminated
//!                       |
//!                       +--finish--> Settling --commit--> Finished
//!                                       |
//!                                       +--abort--> Live
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use auction_types::{
    compute_auction_identity, Address, Amount, AuctionConfig, AuctionId, AuctionPhase,
    AuctionStatus, Bid, BidFill, CiphertextHandle, ConfidentialValue, InputProof,
    SettlementResult,
};

use crate::call::CallContext;
use crate::clearing::{self, ClearingEntry, Revealed};
use crate::config::{validate_config, AuctionConfigUpdate};
use crate::distributor::{DistributionProgress, Distributor};
use crate::error::AuctionError;
use crate::escrow::Escrow;
use crate::handlers::HandlerResult;
use crate::ledger::BidLedger;
use crate::substrate::{DecryptionHandle, DecryptionOracle, InputVerifier};

/// Snapshot taken when settlement begins.
#[derive(Debug)]
pub struct SettlementJob {
    pub auction_id: AuctionId,
    pub identity: [u8; 32],
    pub bids: Vec<Bid>,
    pub known_handles: BTreeMap<CiphertextHandle, DecryptionHandle>,
}

/// One auction instance: configuration, bids, escrow and outcome.
#[derive(Debug)]
pub struct Auction {
    id: AuctionId,
    creator: Address,
    identity: [u8; 32],
    config: AuctionConfig,
    phase: AuctionPhase,
    settle_price_met: bool,
    bidding_closed: bool,
    ledger: BidLedger,
    escrow: Escrow,
    /// Oracle handles by ciphertext. Never plaintext.
    decryption_handles: BTreeMap<CiphertextHandle, DecryptionHandle>,
    settlement: Option<SettlementResult>,
    distribution: Option<DistributionProgress>,
    termination_reason: Option<String>,
}

impl Auction {
    pub fn new(id: AuctionId, creator: Address, config: AuctionConfig) -> HandlerResult<Self> {
        validate_config(&config)?;
        Ok(Self {
            id,
            creator,
            identity: compute_auction_identity(id),
            config,
            phase: AuctionPhase::Unstarted,
            settle_price_met: false,
            bidding_closed: false,
            ledger: BidLedger::new(),
            escrow: Escrow::new(),
            decryption_handles: BTreeMap::new(),
            settlement: None,
            distribution: None,
            termination_reason: None,
        })
    }

    // === Read surface ===

    pub fn id(&self) -> AuctionId {
        self.id
    }

    pub fn creator(&self) -> &Address {
        &self.creator
    }

    /// IBE identity every bid of this auction is encrypted to.
    pub fn identity(&self) -> &[u8; 32] {
        &self.identity
    }

    pub fn phase(&self) -> AuctionPhase {
        self.phase
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }

    pub fn settlement(&self) -> Option<&SettlementResult> {
        self.settlement.as_ref()
    }

    pub fn distribution(&self) -> Option<&DistributionProgress> {
        self.distribution.as_ref()
    }

    pub fn bids(&self) -> &[Bid] {
        self.ledger.all()
    }

    pub fn is_bid_active(&self, sequence_index: u64) -> bool {
        self.ledger.is_active(sequence_index)
    }

    pub fn withdrawable(&self, bidder: &Address) -> Amount {
        self.escrow.withdrawable(bidder)
    }

    pub fn locked_collateral(&self) -> Amount {
        self.escrow.total_locked()
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    /// Derived status; recomputed on every call.
    pub fn status(&self) -> AuctionStatus {
        AuctionStatus {
            started: self.phase != AuctionPhase::Unstarted,
            terminated: self.phase == AuctionPhase::Terminated,
            finished: self.phase == AuctionPhase::Finished,
            winners_calculated: self.settlement.is_some(),
            settle_price_met: self.settle_price_met,
            bid_count: self.ledger.len() as u64,
            settle_price: self
                .settlement
                .as_ref()
                .map(|s| s.clearing_price)
                .or(self.config.settle_threshold)
                .unwrap_or(0),
            auction_id: self.id,
        }
    }

    // === Configuration ===

    fn ensure_configurable(&self) -> HandlerResult<()> {
        if self.phase != AuctionPhase::Unstarted {
            return Err(AuctionError::ConfigLocked);
        }
        Ok(())
    }

    fn ensure_creator(&self, ctx: &CallContext) -> HandlerResult<()> {
        if ctx.sender != self.creator {
            return Err(AuctionError::NotAuthorized);
        }
        Ok(())
    }

    pub fn set_config(
        &mut self,
        ctx: &CallContext,
        update: &AuctionConfigUpdate,
    ) -> HandlerResult<()> {
        self.ensure_configurable()?;
        if ctx.sender != self.creator && !self.config.modifiable {
            return Err(AuctionError::NotAuthorized);
        }

        let next = update.apply(&self.config);
        validate_config(&next)?;
        self.config = next;

        debug!(auction_id = self.id, "Configuration updated");
        Ok(())
    }

    pub fn set_config_modifiable(
        &mut self,
        ctx: &CallContext,
        modifiable: bool,
    ) -> HandlerResult<()> {
        self.ensure_configurable()?;
        self.ensure_creator(ctx)?;
        self.config.modifiable = modifiable;
        Ok(())
    }

    // === Lifecycle ===

    pub fn start(&mut self, ctx: &CallContext) -> HandlerResult<()> {
        if self.phase != AuctionPhase::Unstarted {
            return Err(AuctionError::AlreadyStarted(self.phase));
        }
        self.ensure_creator(ctx)?;
        validate_config(&self.config)?;

        let deadline = ctx
            .timestamp
            .checked_add(self.config.timing.duration)
            .ok_or(AuctionError::ArithmeticOverflow)?;

        self.config.timing.started_at = Some(ctx.timestamp);
        self.config.timing.deadline = Some(deadline);
        self.config.modifiable = false;
        self.phase = AuctionPhase::Live;

        info!(auction_id = self.id, deadline, "Auction started");
        Ok(())
    }

    /// Live-only guard shared by bidding and closing operations.
    fn ensure_live(&self) -> HandlerResult<()> {
        match self.phase {
            AuctionPhase::Live => Ok(()),
            AuctionPhase::Settling => Err(AuctionError::AuctionBusy),
            other => Err(AuctionError::NotLive(other)),
        }
    }

    fn deadline(&self) -> u64 {
        self.config.timing.deadline.unwrap_or(u64::MAX)
    }

    pub fn submit_bid(
        &mut self,
        ctx: &CallContext,
        verifier: &dyn InputVerifier,
        encrypted_quantity: ConfidentialValue,
        encrypted_price_per_unit: ConfidentialValue,
        proof: &InputProof,
    ) -> HandlerResult<u64> {
        self.ensure_live()?;

        // Check bidding window
        let deadline = self.deadline();
        if self.bidding_closed || ctx.timestamp > deadline {
            return Err(AuctionError::BiddingClosed { deadline });
        }

        // Check input proof
        if !verifier.verify_input(
            &self.identity,
            &ctx.sender,
            &encrypted_quantity,
            &encrypted_price_per_unit,
            proof,
        ) {
            return Err(AuctionError::InvalidProof);
        }

        // Check collateral and bid limit
        self.ledger.check_admission(&self.config, &ctx.sender, ctx.value)?;

        let sequence_index = self.ledger.append(
            ctx.sender,
            encrypted_quantity,
            encrypted_price_per_unit,
            ctx.value,
            ctx.timestamp,
        );
        self.escrow.lock(sequence_index, ctx.sender, ctx.value);

        info!(
            auction_id = self.id,
            sequence_index,
            collateral = ctx.value,
            "Bid accepted"
        );
        Ok(sequence_index)
    }

    pub fn cancel_bid(&mut self, ctx: &CallContext, sequence_index: u64) -> HandlerResult<Amount> {
        self.ensure_live()?;

        let bid = self
            .ledger
            .get(sequence_index)
            .filter(|_| self.ledger.is_active(sequence_index))
            .ok_or(AuctionError::BidNotFound(sequence_index))?;
        if bid.bidder != ctx.sender {
            return Err(AuctionError::NotBidOwner(sequence_index));
        }

        let refund = self.escrow.refund(sequence_index)?;
        self.ledger.deactivate(sequence_index);

        info!(auction_id = self.id, sequence_index, refund, "Bid cancelled");
        Ok(refund)
    }

    pub fn terminate(&mut self, ctx: &CallContext, reason: &str) -> HandlerResult<()> {
        self.ensure_live()?;
        self.ensure_creator(ctx)?;

        let active: Vec<u64> = self.ledger.active_bids().map(|b| b.sequence_index).collect();
        for sequence_index in &active {
            self.escrow.ensure_locked(*sequence_index)?;
        }
        let mut refunded: Amount = 0;
        for sequence_index in active {
            refunded = refunded.saturating_add(self.escrow.refund(sequence_index)?);
        }

        self.phase = AuctionPhase::Terminated;
        self.termination_reason = Some(reason.to_string());

        info!(auction_id = self.id, reason, refunded, "Auction terminated");
        Ok(())
    }

    /// Creator attests that the settle threshold has been reached.
    pub fn confirm_settle_price(&mut self, ctx: &CallContext) -> HandlerResult<()> {
        self.ensure_live()?;
        self.ensure_creator(ctx)?;
        if self.config.settle_threshold.is_none() {
            return Err(AuctionError::InvalidConfig("no settle threshold configured".into()));
        }

        self.settle_price_met = true;
        if self.config.terminate_on_settle_price {
            self.bidding_closed = true;
        }

        info!(
            auction_id = self.id,
            bidding_closed = self.bidding_closed,
            "Settle price confirmed"
        );
        Ok(())
    }

    // === Settlement ===

    /// Enter Settling and snapshot what the reveal needs.
    pub fn begin_settlement(&mut self, ctx: &CallContext) -> HandlerResult<SettlementJob> {
        self.ensure_live()?;
        if ctx.timestamp <= self.deadline() && !self.settle_price_met {
            return Err(AuctionError::DeadlineNotReached);
        }

        self.phase = AuctionPhase::Settling;
        let bids: Vec<Bid> = self.ledger.active_bids().cloned().collect();

        info!(auction_id = self.id, bids = bids.len(), "Settlement started");
        Ok(SettlementJob {
            auction_id: self.id,
            identity: self.identity,
            bids,
            known_handles: self.decryption_handles.clone(),
        })
    }

    pub fn remember_handles(&mut self, issued: Vec<(CiphertextHandle, DecryptionHandle)>) {
        self.decryption_handles.extend(issued);
    }

    /// Clear the revealed bids and apply every escrow release, or nothing.
    ///
    /// Undecryptable bids take no part in clearing. They get a zero fill and
    /// their collateral is refunded.
    pub fn commit_settlement(&mut self, revealed: Revealed) -> HandlerResult<SettlementResult> {
        if self.phase != AuctionPhase::Settling {
            return Err(AuctionError::NotLive(self.phase));
        }

        let mut void_fills = Vec::with_capacity(revealed.undecryptable.len());
        for sequence_index in revealed.undecryptable {
            let entry = self.escrow.ensure_locked(sequence_index)?;
            void_fills.push(BidFill {
                sequence_index,
                bidder: entry.bidder,
                quantity: 0,
                payment: 0,
            });
        }

        let mut entries = Vec::with_capacity(revealed.bids.len());
        for bid in revealed.bids {
            let stored = self
                .ledger
                .get(bid.sequence_index)
                .ok_or(AuctionError::BidNotFound(bid.sequence_index))?;
            let entry = self.escrow.ensure_locked(bid.sequence_index)?;
            entries.push(ClearingEntry {
                bidder: stored.bidder,
                locked_collateral: entry.amount,
                revealed: bid,
            });
        }

        let mut result = clearing::clear(self.id, self.config.total_supply, entries)?;
        result.fills.extend(void_fills);

        // Every fill was checked against its locked collateral, so releases
        // below cannot fail.
        for fill in &result.fills {
            if fill.payment > 0 {
                self.escrow.settle(fill.sequence_index, fill.payment)?;
            } else {
                self.escrow.refund(fill.sequence_index)?;
            }
        }

        self.phase = AuctionPhase::Finished;
        self.settlement = Some(result.clone());

        info!(
            auction_id = self.id,
            clearing_price = result.clearing_price,
            total_allocated = result.total_allocated,
            proceeds = result.organizer_proceeds,
            "Auction finished"
        );
        Ok(result)
    }

    /// Return to Live with no side effects.
    pub fn abort_settlement(&mut self, error: &AuctionError) {
        if self.phase == AuctionPhase::Settling {
            self.phase = AuctionPhase::Live;
        }
        warn!(auction_id = self.id, %error, "Settlement rolled back");
    }

    pub fn withdraw(&mut self, ctx: &CallContext) -> HandlerResult<Amount> {
        let amount = self.escrow.withdraw(&ctx.sender)?;
        debug!(auction_id = self.id, amount, "Collateral withdrawn");
        Ok(amount)
    }

    /// Plan on first call, then run the remaining steps.
    pub fn distribute(
        &mut self,
        distributor: &Distributor,
    ) -> HandlerResult<DistributionProgress> {
        if self.phase != AuctionPhase::Finished {
            return Err(AuctionError::NotFinished);
        }
        let settlement = self.settlement.as_ref().ok_or(AuctionError::NotFinished)?;

        let progress = match self.distribution.take() {
            Some(progress) => progress,
            None => distributor.plan(&self.creator, &self.config, settlement)?,
        };
        let progress = self.distribution.insert(progress);
        distributor.run(progress)?;
        Ok(progress.clone())
    }
}

/// Shared, lock-guarded reference to one auction.
#[derive(Clone, Debug)]
pub struct AuctionHandle {
    id: AuctionId,
    inner: Arc<Mutex<Auction>>,
}

impl AuctionHandle {
    pub fn new(auction: Auction) -> Self {
        Self {
            id: auction.id(),
            inner: Arc::new(Mutex::new(auction)),
        }
    }

    pub fn id(&self) -> AuctionId {
        self.id
    }

    /// Run a read-only closure under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&Auction) -> R) -> R {
        f(&*self.inner.lock())
    }

    /// Run a mutating closure under the lock. The whole closure is one
    /// serialized transition.
    pub fn apply<R>(&self, f: impl FnOnce(&mut Auction) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn status(&self) -> AuctionStatus {
        self.read(Auction::status)
    }

    pub fn config(&self) -> AuctionConfig {
        self.read(|a| a.config().clone())
    }

    pub fn settlement(&self) -> Option<SettlementResult> {
        self.read(|a| a.settlement().cloned())
    }

    pub fn identity(&self) -> [u8; 32] {
        self.read(|a| *a.identity())
    }

    /// Reveal, clear and settle.
    ///
    /// The lock is released while the oracle works; the auction sits in
    /// Settling meanwhile, so concurrent mutations fail with `AuctionBusy`.
    /// Dropping the future before it completes rolls the auction back to Live.
    pub async fn finish(
        &self,
        ctx: &CallContext,
        oracle: &dyn DecryptionOracle,
    ) -> HandlerResult<SettlementResult> {
        let job = self.apply(|a| a.begin_settlement(ctx))?;
        let mut guard = SettlingGuard {
            handle: self,
            armed: true,
        };

        let outcome =
            clearing::reveal(oracle, &job.identity, &job.bids, &job.known_handles).await;
        guard.armed = false;

        self.apply(|auction| {
            auction.remember_handles(outcome.issued);
            let committed = outcome
                .revealed
                .and_then(|revealed| auction.commit_settlement(revealed));
            if let Err(e) = &committed {
                auction.abort_settlement(e);
            }
            committed
        })
    }
}

/// Returns an auction left in Settling to Live unless disarmed.
struct SettlingGuard<'a> {
    handle: &'a AuctionHandle,
    armed: bool,
}

impl Drop for SettlingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let cancelled = AuctionError::SettlementIncomplete("settlement cancelled".into());
            self.handle.apply(|a| a.abort_settlement(&cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::InMemoryAssetLedger;
    use crate::platform::PlatformConfig;
    use crate::substrate::testing::{StalledOracle, TestKeys, TestOracle};
    use crate::substrate::BlsInputVerifier;
    use auction_types::CollateralPolicy;
    use std::time::Duration;

    const CREATOR: Address = [0xc0; 32];
    const BOB: Address = [0xb0; 32];
    const CAROL: Address = [0xca; 32];

    fn config() -> AuctionConfig {
        AuctionConfig {
            name: "Tulips".into(),
            symbol: "TLP".into(),
            total_supply: 100,
            max_bids_per_bidder: 2,
            collateral_policy: CollateralPolicy {
                required: true,
                lock_amount_per_bid: 1,
            },
            ..Default::default()
        }
    }

    fn live_auction() -> Auction {
        let mut auction = Auction::new(0, CREATOR, config()).unwrap();
        auction.start(&CallContext::new(CREATOR, 1_000)).unwrap();
        auction
    }

    fn bid(
        auction: &mut Auction,
        keys: &TestKeys,
        bidder: Address,
        quantity: u128,
        price: u128,
        collateral: u128,
    ) -> HandlerResult<u64> {
        let (eq, ep, proof) = keys.seal(auction.id(), &bidder, quantity, price);
        let ctx = CallContext::new(bidder, 1_100).with_value(collateral);
        auction.submit_bid(&ctx, &BlsInputVerifier, eq, ep, &proof)
    }

    #[test]
    fn test_start_freezes_config() {
        let mut auction = Auction::new(0, CREATOR, config()).unwrap();
        let ctx = CallContext::new(CREATOR, 1_000);
        auction.set_config_modifiable(&ctx, true).unwrap();
        auction.start(&ctx).unwrap();

        assert_eq!(auction.config().timing.deadline, Some(1_000 + 86_400));
        assert!(!auction.config().modifiable);
        assert_eq!(
            auction.set_config(&ctx, &AuctionConfigUpdate::default()),
            Err(AuctionError::ConfigLocked)
        );
        assert_eq!(auction.set_config_modifiable(&ctx, true), Err(AuctionError::ConfigLocked));
        assert_eq!(
            auction.start(&ctx),
            Err(AuctionError::AlreadyStarted(AuctionPhase::Live))
        );
    }

    #[test]
    fn test_modifiable_opens_config_to_others() {
        let mut auction = Auction::new(0, CREATOR, config()).unwrap();
        let update = AuctionConfigUpdate {
            total_supply: Some(5),
            ..Default::default()
        };
        let stranger = CallContext::new(BOB, 0);

        assert_eq!(auction.set_config(&stranger, &update), Err(AuctionError::NotAuthorized));
        assert_eq!(
            auction.set_config_modifiable(&stranger, true),
            Err(AuctionError::NotAuthorized)
        );

        auction
            .set_config_modifiable(&CallContext::new(CREATOR, 0), true)
            .unwrap();
        auction.set_config(&stranger, &update).unwrap();
        assert_eq!(auction.config().total_supply, 5);
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut auction = Auction::new(0, CREATOR, config()).unwrap();
        let update = AuctionConfigUpdate {
            total_supply: Some(0),
            ..Default::default()
        };
        assert!(auction.set_config(&CallContext::new(CREATOR, 0), &update).is_err());
        assert_eq!(auction.config().total_supply, 100);
    }

    #[test]
    fn test_submit_requires_live() {
        let keys = TestKeys::new();
        let mut auction = Auction::new(0, CREATOR, config()).unwrap();
        assert_eq!(
            bid(&mut auction, &keys, BOB, 1, 1, 1),
            Err(AuctionError::NotLive(AuctionPhase::Unstarted))
        );
    }

    #[test]
    fn test_submit_checks_proof_collateral_and_limit() {
        let keys = TestKeys::new();
        let mut auction = live_auction();

        // Proof made for Bob, submitted by Carol
        let (eq, ep, proof) = keys.seal(0, &BOB, 1, 1);
        let ctx = CallContext::new(CAROL, 1_100).with_value(1);
        assert_eq!(
            auction.submit_bid(&ctx, &BlsInputVerifier, eq, ep, &proof),
            Err(AuctionError::InvalidProof)
        );

        assert!(matches!(
            bid(&mut auction, &keys, BOB, 1, 1, 0),
            Err(AuctionError::InsufficientCollateral { .. })
        ));

        assert_eq!(bid(&mut auction, &keys, BOB, 1, 1, 1), Ok(0));
        assert_eq!(bid(&mut auction, &keys, BOB, 1, 1, 1), Ok(1));
        assert_eq!(
            bid(&mut auction, &keys, BOB, 1, 1, 1),
            Err(AuctionError::BidLimitExceeded { limit: 2 })
        );
        assert_eq!(auction.status().bid_count, 2);
    }

    #[test]
    fn test_submit_after_deadline_is_rejected() {
        let keys = TestKeys::new();
        let mut auction = live_auction();
        let (eq, ep, proof) = keys.seal(0, &BOB, 1, 1);
        let late = CallContext::new(BOB, 1_000 + 86_401).with_value(1);
        assert_eq!(
            auction.submit_bid(&late, &BlsInputVerifier, eq, ep, &proof),
            Err(AuctionError::BiddingClosed { deadline: 87_400 })
        );
    }

    #[test]
    fn test_cancel_refunds_once() {
        let keys = TestKeys::new();
        let mut auction = live_auction();
        let seq = bid(&mut auction, &keys, BOB, 1, 1, 10).unwrap();

        assert_eq!(
            auction.cancel_bid(&CallContext::new(CAROL, 1_200), seq),
            Err(AuctionError::NotBidOwner(seq))
        );
        let owner = CallContext::new(BOB, 1_200);
        assert_eq!(auction.cancel_bid(&owner, seq), Ok(10));
        assert_eq!(auction.cancel_bid(&owner, seq), Err(AuctionError::BidNotFound(seq)));
        assert_eq!(auction.withdrawable(&BOB), 10);

        // Cancelled bids still count towards bid_count but not the limit
        assert_eq!(bid(&mut auction, &keys, BOB, 1, 1, 1), Ok(1));
        assert_eq!(auction.status().bid_count, 2);
    }

    #[test]
    fn test_terminate_twice_fails() {
        let keys = TestKeys::new();
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 1, 1, 7).unwrap();
        let ctx = CallContext::new(CREATOR, 1_200);

        assert_eq!(
            auction.terminate(&CallContext::new(BOB, 1_200), "no"),
            Err(AuctionError::NotAuthorized)
        );
        auction.terminate(&ctx, "cancelled by organizer").unwrap();
        assert_eq!(
            auction.terminate(&ctx, "again"),
            Err(AuctionError::NotLive(AuctionPhase::Terminated))
        );
        assert_eq!(auction.withdrawable(&BOB), 7);
        assert_eq!(auction.locked_collateral(), 0);
        assert!(auction.status().terminated);
        assert_eq!(auction.termination_reason(), Some("cancelled by organizer"));
    }

    #[test]
    fn test_finish_before_deadline_needs_confirmation() {
        let mut auction = live_auction();
        let early = CallContext::new(BOB, 2_000);
        assert_eq!(
            auction.begin_settlement(&early).map(|_| ()),
            Err(AuctionError::DeadlineNotReached)
        );
        assert_eq!(
            auction.confirm_settle_price(&CallContext::new(CREATOR, 2_000)),
            Err(AuctionError::InvalidConfig("no settle threshold configured".into()))
        );
    }

    #[test]
    fn test_terminate_on_settle_price_closes_bidding() {
        let keys = TestKeys::new();
        let mut cfg = config();
        cfg.settle_threshold = Some(3);
        cfg.terminate_on_settle_price = true;
        let mut auction = Auction::new(0, CREATOR, cfg).unwrap();
        let ctx = CallContext::new(CREATOR, 1_000);
        auction.start(&ctx).unwrap();

        auction.confirm_settle_price(&ctx).unwrap();
        assert!(auction.status().settle_price_met);
        assert_eq!(auction.status().settle_price, 3);
        assert!(matches!(
            bid(&mut auction, &keys, BOB, 1, 1, 1),
            Err(AuctionError::BiddingClosed { .. })
        ));
        assert!(auction.begin_settlement(&ctx).is_ok());
    }

    #[test]
    fn test_settling_rejects_mutations() {
        let keys = TestKeys::new();
        let mut auction = live_auction();
        let seq = bid(&mut auction, &keys, BOB, 1, 1, 1).unwrap();
        let after = CallContext::new(CREATOR, 100_000);
        auction.begin_settlement(&after).unwrap();

        assert_eq!(auction.phase(), AuctionPhase::Settling);
        assert_eq!(
            bid(&mut auction, &keys, CAROL, 1, 1, 1),
            Err(AuctionError::AuctionBusy)
        );
        assert_eq!(
            auction.cancel_bid(&CallContext::new(BOB, 100_000), seq),
            Err(AuctionError::AuctionBusy)
        );
        assert_eq!(auction.terminate(&after, "x"), Err(AuctionError::AuctionBusy));
        assert_eq!(
            auction.begin_settlement(&after).map(|_| ()),
            Err(AuctionError::AuctionBusy)
        );

        auction.abort_settlement(&AuctionError::SettlementIncomplete("test".into()));
        assert_eq!(auction.phase(), AuctionPhase::Live);
    }

    #[tokio::test]
    async fn test_finish_settles_and_refunds() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 60, 5, 400).unwrap();
        bid(&mut auction, &keys, CAROL, 80, 3, 300).unwrap();
        let handle = AuctionHandle::new(auction);

        let result = handle
            .finish(&CallContext::new(BOB, 100_000), &oracle)
            .await
            .unwrap();

        // Bob 60 @ 5, Carol 40 of 80 @ 3 -> price 3
        assert_eq!(result.clearing_price, 3);
        assert_eq!(result.allocations.get(&BOB), Some(&60));
        assert_eq!(result.allocations.get(&CAROL), Some(&40));
        assert_eq!(result.organizer_proceeds, 300);

        handle.read(|a| {
            assert_eq!(a.withdrawable(&BOB), 400 - 180);
            assert_eq!(a.withdrawable(&CAROL), 300 - 120);
            assert_eq!(a.locked_collateral(), 0);
            assert!(a.status().finished);
            assert!(a.status().winners_calculated);
            assert_eq!(a.status().settle_price, 3);
        });

        assert_eq!(
            handle.finish(&CallContext::new(BOB, 100_001), &oracle).await,
            Err(AuctionError::NotLive(AuctionPhase::Finished))
        );
    }

    #[tokio::test]
    async fn test_failed_reveal_rolls_back_and_retries() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 10, 2, 20).unwrap();
        let handle = AuctionHandle::new(auction);
        let ctx = CallContext::new(BOB, 100_000);

        oracle.fail_next(1);
        let err = handle.finish(&ctx, &oracle).await.unwrap_err();
        assert!(err.is_retryable());
        handle.read(|a| {
            assert_eq!(a.phase(), AuctionPhase::Live);
            assert!(a.settlement().is_none());
            assert_eq!(a.locked_collateral(), 20);
        });

        handle.read(|a| assert_eq!(a.decryption_handles.len(), 2));
        assert_eq!(oracle.call_count(), 2);

        let result = handle.finish(&ctx, &oracle).await.unwrap();
        assert_eq!(result.total_allocated, 10);
        // The retry resolved the remembered handles without asking again
        assert_eq!(oracle.call_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_finish_rolls_back() {
        let keys = TestKeys::new();
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 10, 2, 20).unwrap();
        let handle = AuctionHandle::new(auction);
        let ctx = CallContext::new(CREATOR, 100_000);

        let stalled =
            tokio::time::timeout(Duration::from_millis(50), handle.finish(&ctx, &StalledOracle))
                .await;
        assert!(stalled.is_err());
        handle.read(|a| {
            assert_eq!(a.phase(), AuctionPhase::Live);
            assert_eq!(a.locked_collateral(), 20);
        });

        let oracle = TestOracle::new(&keys);
        let result = handle.finish(&ctx, &oracle).await.unwrap();
        assert_eq!(result.total_allocated, 10);
    }

    #[tokio::test]
    async fn test_undecryptable_bid_is_refunded() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 10, 2, 20).unwrap();
        let (eq, ep, proof) = keys.seal_garbled(0, &CAROL, 9);
        let ctx = CallContext::new(CAROL, 1_100).with_value(50);
        let garbled = auction
            .submit_bid(&ctx, &BlsInputVerifier, eq, ep, &proof)
            .unwrap();
        let handle = AuctionHandle::new(auction);

        let result = handle
            .finish(&CallContext::new(CREATOR, 100_000), &oracle)
            .await
            .unwrap();

        assert_eq!(result.clearing_price, 2);
        assert_eq!(result.allocations.get(&BOB), Some(&10));
        assert_eq!(result.allocations.get(&CAROL), None);
        let fill = result
            .fills
            .iter()
            .find(|f| f.sequence_index == garbled)
            .unwrap();
        assert_eq!((fill.quantity, fill.payment), (0, 0));

        handle.read(|a| {
            assert_eq!(a.phase(), AuctionPhase::Finished);
            assert_eq!(a.withdrawable(&CAROL), 50);
            assert_eq!(a.locked_collateral(), 0);
        });
    }

    #[tokio::test]
    async fn test_collateral_shortfall_rolls_back() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 10, 5, 49).unwrap();
        let handle = AuctionHandle::new(auction);

        let err = handle
            .finish(&CallContext::new(BOB, 100_000), &oracle)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::CollateralShortfall { owed: 50, .. }));
        assert!(!err.is_retryable());
        handle.read(|a| {
            assert_eq!(a.phase(), AuctionPhase::Live);
            assert_eq!(a.locked_collateral(), 49);
        });
    }

    #[tokio::test]
    async fn test_distribute_after_finish() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let ledger = Arc::new(InMemoryAssetLedger::new());
        let distributor = Distributor::new(ledger.clone(), PlatformConfig::default());

        let mut auction = live_auction();
        bid(&mut auction, &keys, BOB, 10, 2, 20).unwrap();
        let handle = AuctionHandle::new(auction);

        assert_eq!(
            handle.apply(|a| a.distribute(&distributor)).map(|_| ()),
            Err(AuctionError::NotFinished)
        );

        handle
            .finish(&CallContext::new(BOB, 100_000), &oracle)
            .await
            .unwrap();

        ledger.fail_next(1);
        assert!(handle.apply(|a| a.distribute(&distributor)).is_err());
        let progress = handle.apply(|a| a.distribute(&distributor)).unwrap();

        assert!(progress.is_complete());
        assert_eq!(progress.positions.len(), 1);
        assert_eq!(ledger.transfers().len(), 1);
        // 3% of 20 rounds down to 0, so the creator gets everything
        assert_eq!(ledger.received(&CREATOR), 20);
    }
}
