//! Call handlers for the auction module.
//!
//! [`AuctionRuntime`] bundles the registry with the external collaborators
//! and dispatches [`AuctionCall`] messages to the right auction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use auction_types::{Amount, AuctionId, SettlementResult};

use crate::call::{AuctionCall, CallContext};
use crate::distributor::{DistributionProgress, Distributor};
use crate::error::AuctionError;
use crate::registry::AuctionRegistry;
use crate::substrate::{DecryptionOracle, InputVerifier};

/// Result type for handlers.
pub type HandlerResult<T> = Result<T, AuctionError>;

/// What a successful call produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Created(AuctionId),
    BidAccepted(u64),
    Refunded(Amount),
    Settled(SettlementResult),
    Distributed(DistributionProgress),
    Withdrawn(Amount),
    Done,
}

/// Registry plus the collaborators every auction shares.
pub struct AuctionRuntime {
    pub registry: AuctionRegistry,
    pub verifier: Arc<dyn InputVerifier>,
    pub oracle: Arc<dyn DecryptionOracle>,
    pub distributor: Distributor,
}

impl AuctionRuntime {
    pub fn new(
        verifier: Arc<dyn InputVerifier>,
        oracle: Arc<dyn DecryptionOracle>,
        distributor: Distributor,
    ) -> Self {
        Self {
            registry: AuctionRegistry::new(),
            verifier,
            oracle,
            distributor,
        }
    }
}

/// Handle one call message.
pub async fn handle_call(
    runtime: &AuctionRuntime,
    ctx: &CallContext,
    call: AuctionCall,
) -> HandlerResult<CallOutcome> {
    debug!(call = call_name(&call), "Handling call");

    match call {
        AuctionCall::CreateAuction { config } => runtime
            .registry
            .create_auction(ctx, config)
            .map(CallOutcome::Created),

        AuctionCall::SetConfig { auction_id, update } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.set_config(ctx, &update))
            .map(|_| CallOutcome::Done),

        AuctionCall::SetConfigModifiable {
            auction_id,
            modifiable,
        } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.set_config_modifiable(ctx, modifiable))
            .map(|_| CallOutcome::Done),

        AuctionCall::Start { auction_id } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.start(ctx))
            .map(|_| CallOutcome::Done),

        AuctionCall::SubmitBid {
            auction_id,
            encrypted_quantity,
            encrypted_price_per_unit,
            proof,
        } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| {
                a.submit_bid(
                    ctx,
                    runtime.verifier.as_ref(),
                    encrypted_quantity,
                    encrypted_price_per_unit,
                    &proof,
                )
            })
            .map(CallOutcome::BidAccepted),

        AuctionCall::CancelBid {
            auction_id,
            sequence_index,
        } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.cancel_bid(ctx, sequence_index))
            .map(CallOutcome::Refunded),

        AuctionCall::Terminate { auction_id, reason } => {
            let handle = runtime.registry.get_auction(auction_id)?;
            handle.apply(|a| a.terminate(ctx, &reason))?;
            runtime.oracle.forget(&handle.identity());
            Ok(CallOutcome::Done)
        }

        AuctionCall::ConfirmSettlePrice { auction_id } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.confirm_settle_price(ctx))
            .map(|_| CallOutcome::Done),

        AuctionCall::Finish { auction_id } => {
            let handle = runtime.registry.get_auction(auction_id)?;
            let result = handle.finish(ctx, runtime.oracle.as_ref()).await?;
            runtime.oracle.forget(&handle.identity());
            Ok(CallOutcome::Settled(result))
        }

        AuctionCall::Distribute { auction_id } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.distribute(&runtime.distributor))
            .map(CallOutcome::Distributed),

        AuctionCall::Withdraw { auction_id } => runtime
            .registry
            .get_auction(auction_id)?
            .apply(|a| a.withdraw(ctx))
            .map(CallOutcome::Withdrawn),
    }
}

fn call_name(call: &AuctionCall) -> &'static str {
    match call {
        AuctionCall::CreateAuction { .. } => "create_auction",
        AuctionCall::SetConfig { .. } => "set_config",
        AuctionCall::SetConfigModifiable { .. } => "set_config_modifiable",
        AuctionCall::Start { .. } => "start",
        AuctionCall::SubmitBid { .. } => "submit_bid",
        AuctionCall::CancelBid { .. } => "cancel_bid",
        AuctionCall::Terminate { .. } => "terminate",
        AuctionCall::ConfirmSettlePrice { .. } => "confirm_settle_price",
        AuctionCall::Finish { .. } => "finish",
        AuctionCall::Distribute { .. } => "distribute",
        AuctionCall::Withdraw { .. } => "withdraw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::InMemoryAssetLedger;
    use crate::platform::PlatformConfig;
    use crate::substrate::testing::{TestKeys, TestOracle};
    use crate::substrate::BlsInputVerifier;
    use auction_types::{compute_auction_identity, Address, AuctionConfig, CollateralPolicy};

    const CREATOR: Address = [0xc0; 32];
    const BOB: Address = [0xb0; 32];
    const CAROL: Address = [0xca; 32];

    fn setup(keys: &TestKeys) -> (AuctionRuntime, Arc<InMemoryAssetLedger>, Arc<TestOracle>) {
        let ledger = Arc::new(InMemoryAssetLedger::new());
        let oracle = Arc::new(TestOracle::new(keys));
        let runtime = AuctionRuntime::new(
            Arc::new(BlsInputVerifier),
            oracle.clone(),
            Distributor::new(ledger.clone(), PlatformConfig::default()),
        );
        (runtime, ledger, oracle)
    }

    fn lifecycle_config() -> AuctionConfig {
        AuctionConfig {
            name: "Lifecycle".into(),
            total_supply: 10,
            collateral_policy: CollateralPolicy {
                required: true,
                lock_amount_per_bid: 1,
            },
            ..Default::default()
        }
    }

    async fn submit(
        runtime: &AuctionRuntime,
        keys: &TestKeys,
        bidder: Address,
        quantity: u128,
        price: u128,
    ) -> HandlerResult<CallOutcome> {
        let (encrypted_quantity, encrypted_price_per_unit, proof) =
            keys.seal(0, &bidder, quantity, price);
        handle_call(
            runtime,
            &CallContext::new(bidder, 10).with_value(quantity * price),
            AuctionCall::SubmitBid {
                auction_id: 0,
                encrypted_quantity,
                encrypted_price_per_unit,
                proof,
            },
        )
        .await
    }

    #[tokio::test]
    async fn test_full_lifecycle_through_calls() {
        let keys = TestKeys::new();
        let (runtime, ledger, oracle) = setup(&keys);
        let creator = CallContext::new(CREATOR, 0);

        let config = lifecycle_config();
        assert_eq!(
            handle_call(&runtime, &creator, AuctionCall::CreateAuction { config }).await,
            Ok(CallOutcome::Created(0))
        );
        handle_call(&runtime, &creator, AuctionCall::Start { auction_id: 0 })
            .await
            .unwrap();

        assert_eq!(
            submit(&runtime, &keys, BOB, 6, 4).await,
            Ok(CallOutcome::BidAccepted(0))
        );
        assert_eq!(
            submit(&runtime, &keys, CAROL, 6, 3).await,
            Ok(CallOutcome::BidAccepted(1))
        );

        let after = CallContext::new(CAROL, 100_000);
        let settled = handle_call(&runtime, &after, AuctionCall::Finish { auction_id: 0 })
            .await
            .unwrap();
        let CallOutcome::Settled(result) = settled else {
            panic!("expected settlement, got {settled:?}");
        };
        assert_eq!(result.clearing_price, 3);
        assert_eq!(result.total_allocated, 10);
        assert_eq!(*oracle.forgotten.lock(), vec![compute_auction_identity(0)]);

        handle_call(&runtime, &after, AuctionCall::Distribute { auction_id: 0 })
            .await
            .unwrap();
        assert_eq!(ledger.positions().len(), 2);

        // Carol locked 18, paid 4 × 3 = 12
        assert_eq!(
            handle_call(&runtime, &after, AuctionCall::Withdraw { auction_id: 0 }).await,
            Ok(CallOutcome::Withdrawn(6))
        );
    }

    #[tokio::test]
    async fn test_unknown_auction_is_reported() {
        let keys = TestKeys::new();
        let (runtime, _, _) = setup(&keys);
        assert_eq!(
            handle_call(
                &runtime,
                &CallContext::new(CREATOR, 0),
                AuctionCall::Start { auction_id: 42 }
            )
            .await,
            Err(AuctionError::AuctionNotFound(42))
        );
    }

    #[tokio::test]
    async fn test_terminate_releases_oracle_state() {
        let keys = TestKeys::new();
        let (runtime, _, oracle) = setup(&keys);
        let creator = CallContext::new(CREATOR, 0);

        let config = lifecycle_config();
        handle_call(&runtime, &creator, AuctionCall::CreateAuction { config })
            .await
            .unwrap();
        handle_call(&runtime, &creator, AuctionCall::Start { auction_id: 0 })
            .await
            .unwrap();

        let terminate = AuctionCall::Terminate {
            auction_id: 0,
            reason: "withdrawn".into(),
        };
        handle_call(&runtime, &creator, terminate.clone())
            .await
            .unwrap();
        assert!(handle_call(&runtime, &creator, terminate).await.is_err());
        // Only the successful terminate releases anything
        assert_eq!(*oracle.forgotten.lock(), vec![compute_auction_identity(0)]);
    }
}
