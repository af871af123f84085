//! End-to-end integration tests for sealed-bid uniform-price auctions.
//!
//! These tests exercise the full auction lifecycle:
//! 1. Committee setup and key dealing
//! 2. Auction creation and start
//! 3. Bid encryption and submission with collateral
//! 4. Staged threshold decryption through the gateway
//! 5. Uniform-price clearing, collateral release and distribution

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use auction_client::create_bid;
use auction_crypto::{encrypt_value, prove_input, IbeParams};
use auction_module::{
    handle_call, AuctionCall, AuctionError, AuctionRuntime, BlsInputVerifier, CallContext,
    CallOutcome, DistributionProgress, Distributor, HandlerResult, InMemoryAssetLedger,
    PlatformConfig,
};
use auction_types::{
    compute_auction_identity, Address, Amount, AuctionConfig, AuctionId, AuctionPhase,
    CollateralPolicy, EncryptionKey, SettlementResult, Timing,
};
use decryption_coordinator::{spawn_key_holders, GatewayConfig, KeyHolder, ThresholdGateway};
use rand::rngs::OsRng;

const CREATOR: Address = [0xc0; 32];
const BOB: Address = [0xb0; 32];
const CAROL: Address = [0xca; 32];
const DAVID: Address = [0xda; 32];

const START: u64 = 1_000;
const DURATION: u64 = 3_600;
const DURING: u64 = START + 10;
const AFTER: u64 = START + DURATION + 1;

struct Harness {
    runtime: AuctionRuntime,
    gateway: ThresholdGateway,
    encryption_key: EncryptionKey,
    ledger: Arc<InMemoryAssetLedger>,
    offline_holders: Vec<KeyHolder>,
}

/// A 2-of-3 committee. Holders stay offline until `bring_holders_online`.
fn harness(resolve_timeout_ms: u64) -> Harness {
    let (gateway, encryption_key, holders) = ThresholdGateway::deal(
        GatewayConfig {
            threshold: 2,
            total_holders: 3,
            resolve_timeout_ms,
        },
        &mut OsRng,
    )
    .unwrap();

    let ledger = Arc::new(InMemoryAssetLedger::new());
    let runtime = AuctionRuntime::new(
        Arc::new(BlsInputVerifier),
        Arc::new(gateway.clone()),
        Distributor::new(ledger.clone(), PlatformConfig::default()),
    );

    Harness {
        runtime,
        gateway,
        encryption_key,
        ledger,
        offline_holders: holders,
    }
}

/// A committee that is serving from the start.
fn online_harness() -> Harness {
    let mut h = harness(5_000);
    h.bring_holders_online();
    h
}

fn config(total_supply: Amount) -> AuctionConfig {
    AuctionConfig {
        name: "Tulips".into(),
        symbol: "TLP".into(),
        total_supply,
        collateral_policy: CollateralPolicy {
            required: true,
            lock_amount_per_bid: 1,
        },
        timing: Timing {
            duration: DURATION,
            ..Default::default()
        },
        ..Default::default()
    }
}

impl Harness {
    fn bring_holders_online(&mut self) {
        spawn_key_holders(&self.gateway, std::mem::take(&mut self.offline_holders));
    }

    async fn call(
        &self,
        sender: Address,
        timestamp: u64,
        value: Amount,
        call: AuctionCall,
    ) -> HandlerResult<CallOutcome> {
        let ctx = CallContext::new(sender, timestamp).with_value(value);
        handle_call(&self.runtime, &ctx, call).await
    }

    async fn create_and_start(&self, config: AuctionConfig) -> AuctionId {
        let CallOutcome::Created(auction_id) = self
            .call(CREATOR, 0, 0, AuctionCall::CreateAuction { config })
            .await
            .unwrap()
        else {
            panic!("expected auction id");
        };
        self.call(CREATOR, START, 0, AuctionCall::Start { auction_id })
            .await
            .unwrap();
        auction_id
    }

    /// Bid with collateral covering the full quantity × price.
    async fn bid(
        &self,
        auction_id: AuctionId,
        bidder: Address,
        quantity: Amount,
        price: Amount,
    ) -> HandlerResult<CallOutcome> {
        let prepared = create_bid(
            &self.encryption_key,
            auction_id,
            &bidder,
            quantity,
            price,
            &mut OsRng,
        )
        .unwrap();
        self.call(
            bidder,
            DURING,
            prepared.covering_collateral(),
            AuctionCall::SubmitBid {
                auction_id,
                encrypted_quantity: prepared.encrypted_quantity,
                encrypted_price_per_unit: prepared.encrypted_price_per_unit,
                proof: prepared.proof,
            },
        )
        .await
    }

    async fn finish(&self, auction_id: AuctionId, timestamp: u64) -> HandlerResult<SettlementResult> {
        match self
            .call(CREATOR, timestamp, 0, AuctionCall::Finish { auction_id })
            .await?
        {
            CallOutcome::Settled(result) => Ok(result),
            other => panic!("expected settlement, got {other:?}"),
        }
    }

    async fn distribute(&self, auction_id: AuctionId) -> HandlerResult<DistributionProgress> {
        match self
            .call(CREATOR, AFTER, 0, AuctionCall::Distribute { auction_id })
            .await?
        {
            CallOutcome::Distributed(progress) => Ok(progress),
            other => panic!("expected distribution, got {other:?}"),
        }
    }

    async fn withdraw(&self, auction_id: AuctionId, bidder: Address) -> HandlerResult<CallOutcome> {
        self.call(bidder, AFTER, 0, AuctionCall::Withdraw { auction_id })
            .await
    }

    fn phase(&self, auction_id: AuctionId) -> AuctionPhase {
        self.runtime
            .registry
            .get_auction(auction_id)
            .unwrap()
            .read(|a| a.phase())
    }

    fn withdrawable(&self, auction_id: AuctionId, bidder: &Address) -> Amount {
        self.runtime
            .registry
            .get_auction(auction_id)
            .unwrap()
            .read(|a| a.withdrawable(bidder))
    }
}

/// Three bidders in wei-scale prices; the marginal bid sets the price.
#[tokio::test]
async fn test_uniform_price_auction_end_to_end() {
    const TWO_THOUSAND_GWEI: Amount = 2_000_000_000_000;
    const EIGHT_THOUSAND_GWEI: Amount = 8_000_000_000_000;
    const TEN_MILLION_WEI: Amount = 10_000_000;

    let h = online_harness();

    // ========================================
    // Phase 1: Create and start
    // ========================================

    let auction_id = h.create_and_start(config(1_000_000)).await;
    assert_eq!(h.phase(auction_id), AuctionPhase::Live);

    // ========================================
    // Phase 2: Bidders submit encrypted bids
    // ========================================

    assert_eq!(
        h.bid(auction_id, BOB, 500_000, TWO_THOUSAND_GWEI).await,
        Ok(CallOutcome::BidAccepted(0))
    );
    assert_eq!(
        h.bid(auction_id, CAROL, 600_000, EIGHT_THOUSAND_GWEI).await,
        Ok(CallOutcome::BidAccepted(1))
    );
    assert_eq!(
        h.bid(auction_id, DAVID, 1_000_000, TEN_MILLION_WEI).await,
        Ok(CallOutcome::BidAccepted(2))
    );

    // ========================================
    // Phase 3: Reveal and clear
    // ========================================

    assert_eq!(
        h.finish(auction_id, START + DURATION).await,
        Err(AuctionError::DeadlineNotReached)
    );
    let result = h.finish(auction_id, AFTER).await.unwrap();

    assert_eq!(result.clearing_price, TWO_THOUSAND_GWEI);
    assert_eq!(result.allocations.get(&CAROL), Some(&600_000));
    assert_eq!(result.allocations.get(&BOB), Some(&400_000));
    assert_eq!(result.allocations.get(&DAVID), None);
    assert_eq!(result.total_allocated, 1_000_000);
    assert_eq!(result.organizer_proceeds, 2_000_000_000_000_000_000);
    assert_eq!(h.phase(auction_id), AuctionPhase::Finished);
    assert_eq!(h.gateway.pending_requests(), 0);

    // ========================================
    // Phase 4: Collateral release
    // ========================================

    // Locked minus payment at the clearing price
    assert_eq!(h.withdrawable(auction_id, &BOB), 200_000_000_000_000_000);
    assert_eq!(h.withdrawable(auction_id, &CAROL), 3_600_000_000_000_000_000);
    assert_eq!(h.withdrawable(auction_id, &DAVID), 10_000_000_000_000);

    assert_eq!(
        h.withdraw(auction_id, CAROL).await,
        Ok(CallOutcome::Withdrawn(3_600_000_000_000_000_000))
    );
    assert_eq!(
        h.withdraw(auction_id, CAROL).await,
        Err(AuctionError::NothingToWithdraw(CAROL))
    );

    // ========================================
    // Phase 5: Distribution
    // ========================================

    let progress = h.distribute(auction_id).await.unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.positions.len(), 2);

    // 3% platform fee on 2 ETH of proceeds
    let treasury = PlatformConfig::default().treasury;
    assert_eq!(h.ledger.received(&treasury), 60_000_000_000_000_000);
    assert_eq!(h.ledger.received(&CREATOR), 1_940_000_000_000_000_000);
}

#[tokio::test]
async fn test_zero_bid_auction_settles_empty() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(100)).await;

    let result = h.finish(auction_id, AFTER).await.unwrap();
    assert_eq!(result, SettlementResult::empty(auction_id));
    assert_eq!(h.gateway.total_requests(), 0);

    let progress = h.distribute(auction_id).await.unwrap();
    assert!(progress.steps.is_empty());
    assert!(h.ledger.positions().is_empty());
}

#[tokio::test]
async fn test_equal_prices_favor_earlier_bid() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(10)).await;

    h.bid(auction_id, BOB, 10, 5).await.unwrap();
    h.bid(auction_id, CAROL, 10, 5).await.unwrap();

    let result = h.finish(auction_id, AFTER).await.unwrap();
    assert_eq!(result.clearing_price, 5);
    assert_eq!(result.allocations.get(&BOB), Some(&10));
    assert_eq!(result.allocations.get(&CAROL), None);

    // Loser gets everything back, winner paid exactly what they locked
    assert_eq!(h.withdrawable(auction_id, &CAROL), 50);
    assert_eq!(h.withdrawable(auction_id, &BOB), 0);
}

#[tokio::test]
async fn test_terminate_refunds_and_is_final() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(10)).await;
    h.bid(auction_id, BOB, 4, 3).await.unwrap();

    let terminate = AuctionCall::Terminate {
        auction_id,
        reason: "lot withdrawn".into(),
    };
    assert_eq!(
        h.call(BOB, DURING, 0, terminate.clone()).await,
        Err(AuctionError::NotAuthorized)
    );
    assert_eq!(
        h.call(CREATOR, DURING, 0, terminate.clone()).await,
        Ok(CallOutcome::Done)
    );
    assert_eq!(
        h.call(CREATOR, DURING, 0, terminate).await,
        Err(AuctionError::NotLive(AuctionPhase::Terminated))
    );

    assert_eq!(h.withdrawable(auction_id, &BOB), 12);
    assert_eq!(
        h.finish(auction_id, AFTER).await,
        Err(AuctionError::NotLive(AuctionPhase::Terminated))
    );
    // Nothing was ever sent for decryption
    assert_eq!(h.gateway.total_requests(), 0);
}

/// While the committee is offline the reveal cannot complete: the auction
/// is busy during the attempt, rolls back afterwards, and a retry reuses the
/// original decryption requests.
#[tokio::test]
async fn test_finish_retries_after_committee_outage() {
    let mut h = harness(300);
    let auction_id = h.create_and_start(config(100)).await;
    h.bid(auction_id, BOB, 60, 7).await.unwrap();
    h.bid(auction_id, CAROL, 60, 4).await.unwrap();

    let concurrent_cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.call(
            BOB,
            AFTER,
            0,
            AuctionCall::CancelBid {
                auction_id,
                sequence_index: 0,
            },
        )
        .await
    };
    let (finished, cancelled) = tokio::join!(h.finish(auction_id, AFTER), concurrent_cancel);

    assert!(matches!(finished, Err(AuctionError::SettlementIncomplete(_))));
    assert!(finished.as_ref().unwrap_err().is_retryable());
    assert_eq!(cancelled, Err(AuctionError::AuctionBusy));
    assert_eq!(h.phase(auction_id), AuctionPhase::Live);
    assert_eq!(h.withdrawable(auction_id, &BOB), 0);
    assert_eq!(h.gateway.total_requests(), 4);

    h.bring_holders_online();
    let result = h.finish(auction_id, AFTER).await.unwrap();

    assert_eq!(result.clearing_price, 4);
    assert_eq!(result.allocations.get(&BOB), Some(&60));
    assert_eq!(result.allocations.get(&CAROL), Some(&40));
    // Settled auctions release their gateway state
    assert_eq!(h.gateway.total_requests(), 0);
}

/// A bid whose payload does not decrypt cannot hold the auction hostage: it
/// is left out of clearing and its collateral is refunded.
#[tokio::test]
async fn test_undecryptable_bid_does_not_block_settlement() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(100)).await;
    h.bid(auction_id, BOB, 60, 7).await.unwrap();

    let params = IbeParams::from_encryption_key(&h.encryption_key).unwrap();
    let identity = compute_auction_identity(auction_id);
    let (mut quantity, rq) = encrypt_value(&params, &identity, 60, &mut OsRng).unwrap();
    quantity.ciphertext = vec![0u8; 32];
    let (price, rp) = encrypt_value(&params, &identity, 9, &mut OsRng).unwrap();
    let proof = prove_input(&identity, &CAROL, (&quantity, &rq), (&price, &rp), &mut OsRng);
    h.call(
        CAROL,
        DURING,
        540,
        AuctionCall::SubmitBid {
            auction_id,
            encrypted_quantity: quantity,
            encrypted_price_per_unit: price,
            proof,
        },
    )
    .await
    .unwrap();

    let result = h.finish(auction_id, AFTER).await.unwrap();

    assert_eq!(result.clearing_price, 7);
    assert_eq!(result.allocations.get(&BOB), Some(&60));
    assert_eq!(result.allocations.get(&CAROL), None);
    assert_eq!(h.phase(auction_id), AuctionPhase::Finished);
    assert_eq!(h.withdrawable(auction_id, &CAROL), 540);
}

#[tokio::test]
async fn test_completed_distribution_is_idempotent() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(10)).await;
    h.bid(auction_id, BOB, 6, 10).await.unwrap();
    h.bid(auction_id, CAROL, 6, 9).await.unwrap();
    h.finish(auction_id, AFTER).await.unwrap();

    let first = h.distribute(auction_id).await.unwrap();
    assert!(first.is_complete());

    let again = h.distribute(auction_id).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(h.ledger.positions().len(), 2);
    assert_eq!(h.ledger.transfers().len(), 2);
}

#[tokio::test]
async fn test_distribution_failure_is_retried_without_duplicates() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(10)).await;
    h.bid(auction_id, BOB, 6, 10).await.unwrap();
    h.bid(auction_id, CAROL, 6, 9).await.unwrap();
    let result = h.finish(auction_id, AFTER).await.unwrap();
    assert_eq!(result.organizer_proceeds, 90);

    h.ledger.fail_next(1);
    assert!(matches!(
        h.distribute(auction_id).await,
        Err(AuctionError::DistributionFailed(_))
    ));

    let progress = h.distribute(auction_id).await.unwrap();
    assert!(progress.is_complete());
    assert_eq!(h.ledger.positions().len(), 2);
    // 3% of 90, rounded down
    assert_eq!(h.ledger.received(&PlatformConfig::default().treasury), 2);
    assert_eq!(h.ledger.received(&CREATOR), 88);
}

#[tokio::test]
async fn test_confirmed_settle_price_closes_early() {
    let h = online_harness();
    let auction_id = h
        .create_and_start(AuctionConfig {
            settle_threshold: Some(5),
            terminate_on_settle_price: true,
            ..config(10)
        })
        .await;
    h.bid(auction_id, BOB, 10, 6).await.unwrap();

    h.call(
        CREATOR,
        DURING,
        0,
        AuctionCall::ConfirmSettlePrice { auction_id },
    )
    .await
    .unwrap();
    assert!(matches!(
        h.bid(auction_id, CAROL, 10, 9).await,
        Err(AuctionError::BiddingClosed { .. })
    ));

    // Finishable before the deadline
    let result = h.finish(auction_id, DURING).await.unwrap();
    assert_eq!(result.clearing_price, 6);
    assert_eq!(result.organizer_proceeds, 60);
}

#[tokio::test]
async fn test_copied_ciphertexts_are_rejected() {
    let h = online_harness();
    let auction_id = h.create_and_start(config(10)).await;

    let prepared = create_bid(&h.encryption_key, auction_id, &BOB, 5, 5, &mut OsRng).unwrap();
    let replay = AuctionCall::SubmitBid {
        auction_id,
        encrypted_quantity: prepared.encrypted_quantity.clone(),
        encrypted_price_per_unit: prepared.encrypted_price_per_unit.clone(),
        proof: prepared.proof.clone(),
    };

    assert_eq!(
        h.call(CAROL, DURING, 25, replay).await,
        Err(AuctionError::InvalidProof)
    );
}
