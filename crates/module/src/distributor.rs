//! Settlement distribution.
//!
//! After an auction finishes, its `SettlementResult` is turned into a list of
//! steps (asset transfers, position receipts, platform fee, proceeds) that is
//! executed against an [`AssetTransfer`] collaborator. Progress is recorded
//! per step, so a failed run resumes where it stopped and never repeats a
//! completed transfer or recomputes clearing.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use auction_types::{
    Address, Amount, AssetType, AuctionConfig, AuctionId, PositionReceipt, SettlementResult,
};

use crate::error::AuctionError;
use crate::platform::PlatformConfig;

/// Asset movement for one winner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferInstruction {
    Fungible {
        auction_id: AuctionId,
        to: Address,
        amount: Amount,
    },
    UniqueTokens {
        auction_id: AuctionId,
        to: Address,
        token_ids: Vec<u64>,
    },
    BatchTokens {
        auction_id: AuctionId,
        to: Address,
        token_id: u64,
        amount: Amount,
    },
    VaultShares {
        auction_id: AuctionId,
        to: Address,
        shares: Amount,
    },
    /// Off-ledger offering; the ledger only records the entitlement.
    Custom {
        auction_id: AuctionId,
        to: Address,
        units: Amount,
    },
}

impl TransferInstruction {
    pub fn recipient(&self) -> &Address {
        match self {
            TransferInstruction::Fungible { to, .. }
            | TransferInstruction::UniqueTokens { to, .. }
            | TransferInstruction::BatchTokens { to, .. }
            | TransferInstruction::VaultShares { to, .. }
            | TransferInstruction::Custom { to, .. } => to,
        }
    }
}

/// Turns allocations into transfers for one asset type.
pub trait AssetStrategy: Sync {
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError>;
}

struct FungibleStrategy;
struct UniqueTokenStrategy;
struct BatchTokenStrategy;
struct VaultShareStrategy;
struct CustomStrategy;

impl AssetStrategy for FungibleStrategy {
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError> {
        Ok(settlement
            .allocations
            .iter()
            .map(|(to, amount)| TransferInstruction::Fungible {
                auction_id: settlement.auction_id,
                to: *to,
                amount: *amount,
            })
            .collect())
    }
}

impl AssetStrategy for UniqueTokenStrategy {
    /// Token ids run from 1 upward across winners in address order.
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError> {
        let mut next_id = 1u64;
        let mut out = Vec::with_capacity(settlement.allocations.len());
        for (to, quantity) in &settlement.allocations {
            let count = u64::try_from(*quantity).map_err(|_| AuctionError::ArithmeticOverflow)?;
            let end = next_id
                .checked_add(count)
                .ok_or(AuctionError::ArithmeticOverflow)?;
            out.push(TransferInstruction::UniqueTokens {
                auction_id: settlement.auction_id,
                to: *to,
                token_ids: (next_id..end).collect(),
            });
            next_id = end;
        }
        Ok(out)
    }
}

impl AssetStrategy for BatchTokenStrategy {
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError> {
        Ok(settlement
            .allocations
            .iter()
            .map(|(to, amount)| TransferInstruction::BatchTokens {
                auction_id: settlement.auction_id,
                to: *to,
                token_id: settlement.auction_id,
                amount: *amount,
            })
            .collect())
    }
}

impl AssetStrategy for VaultShareStrategy {
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError> {
        Ok(settlement
            .allocations
            .iter()
            .map(|(to, shares)| TransferInstruction::VaultShares {
                auction_id: settlement.auction_id,
                to: *to,
                shares: *shares,
            })
            .collect())
    }
}

impl AssetStrategy for CustomStrategy {
    fn instructions(
        &self,
        settlement: &SettlementResult,
    ) -> Result<Vec<TransferInstruction>, AuctionError> {
        Ok(settlement
            .allocations
            .iter()
            .map(|(to, units)| TransferInstruction::Custom {
                auction_id: settlement.auction_id,
                to: *to,
                units: *units,
            })
            .collect())
    }
}

/// Strategy for an asset type.
pub fn strategy_for(asset_type: AssetType) -> &'static dyn AssetStrategy {
    match asset_type {
        AssetType::Fungible => &FungibleStrategy,
        AssetType::NonFungibleUnique => &UniqueTokenStrategy,
        AssetType::NonFungibleBatch => &BatchTokenStrategy,
        AssetType::VaultShare => &VaultShareStrategy,
        AssetType::Custom => &CustomStrategy,
    }
}

/// Errors from the asset-transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Asset ledger unavailable")]
    Unavailable,

    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

/// Moves assets and funds once an auction has settled.
pub trait AssetTransfer: Send + Sync {
    fn transfer(&self, instruction: &TransferInstruction) -> Result<(), TransferError>;

    fn forward_proceeds(
        &self,
        auction_id: AuctionId,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Mint a claim token for a winning allocation.
    fn issue_position(
        &self,
        auction_id: AuctionId,
        holder: &Address,
        quantity: Amount,
        clearing_price: Amount,
    ) -> Result<PositionReceipt, TransferError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionStep {
    Transfer(TransferInstruction),
    IssuePosition { holder: Address, quantity: Amount },
    PlatformFee { to: Address, amount: Amount },
    ForwardProceeds { to: Address, amount: Amount },
}

/// Distribution plan of one auction and how far it got.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionProgress {
    pub auction_id: AuctionId,
    pub clearing_price: Amount,
    pub steps: Vec<DistributionStep>,
    /// Steps `[0, completed)` have been applied
    pub completed: usize,
    pub positions: Vec<PositionReceipt>,
}

impl DistributionProgress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.steps.len()
    }
}

/// Runs distribution plans against an asset ledger.
#[derive(Clone)]
pub struct Distributor {
    ledger: Arc<dyn AssetTransfer>,
    platform: PlatformConfig,
}

impl Distributor {
    pub fn new(ledger: Arc<dyn AssetTransfer>, platform: PlatformConfig) -> Self {
        Self { ledger, platform }
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Build the ordered step list for a settled auction.
    pub fn plan(
        &self,
        creator: &Address,
        config: &AuctionConfig,
        settlement: &SettlementResult,
    ) -> Result<DistributionProgress, AuctionError> {
        let mut steps: Vec<DistributionStep> = strategy_for(config.asset_type)
            .instructions(settlement)?
            .into_iter()
            .map(DistributionStep::Transfer)
            .collect();

        steps.extend(settlement.allocations.iter().map(|(holder, quantity)| {
            DistributionStep::IssuePosition {
                holder: *holder,
                quantity: *quantity,
            }
        }));

        let proceeds = settlement.organizer_proceeds;
        let fee = self.platform.fee(
            config.payment_type,
            config.settle_threshold,
            settlement.total_allocated,
            proceeds,
        )?;
        if fee > 0 {
            steps.push(DistributionStep::PlatformFee {
                to: self.platform.treasury,
                amount: fee,
            });
        }
        if proceeds > fee {
            steps.push(DistributionStep::ForwardProceeds {
                to: *creator,
                amount: proceeds - fee,
            });
        }

        Ok(DistributionProgress {
            auction_id: settlement.auction_id,
            clearing_price: settlement.clearing_price,
            steps,
            completed: 0,
            positions: Vec::new(),
        })
    }

    /// Apply the remaining steps. Stops at the first failure.
    pub fn run(&self, progress: &mut DistributionProgress) -> Result<(), AuctionError> {
        let auction_id = progress.auction_id;
        while let Some(step) = progress.steps.get(progress.completed) {
            let applied = match step {
                DistributionStep::Transfer(instruction) => self.ledger.transfer(instruction),
                DistributionStep::IssuePosition { holder, quantity } => self
                    .ledger
                    .issue_position(auction_id, holder, *quantity, progress.clearing_price)
                    .map(|receipt| progress.positions.push(receipt)),
                DistributionStep::PlatformFee { to, amount }
                | DistributionStep::ForwardProceeds { to, amount } => {
                    self.ledger.forward_proceeds(auction_id, to, *amount)
                }
            };

            if let Err(e) = applied {
                warn!(
                    auction_id,
                    step = progress.completed,
                    error = %e,
                    "Distribution step failed"
                );
                return Err(AuctionError::DistributionFailed(e.to_string()));
            }

            debug!(auction_id, step = progress.completed, "Distribution step applied");
            progress.completed += 1;
        }

        info!(
            auction_id,
            steps = progress.steps.len(),
            positions = progress.positions.len(),
            "Distribution complete"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    transfers: Vec<TransferInstruction>,
    proceeds: Vec<(AuctionId, Address, Amount)>,
    positions: Vec<PositionReceipt>,
    next_position_id: u64,
    failing_ops: usize,
}

/// In-process asset ledger. Records every operation.
#[derive(Debug, Default)]
pub struct InMemoryAssetLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryAssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with `Unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().failing_ops = n;
    }

    pub fn transfers(&self) -> Vec<TransferInstruction> {
        self.state.lock().transfers.clone()
    }

    pub fn positions(&self) -> Vec<PositionReceipt> {
        self.state.lock().positions.clone()
    }

    /// Funds forwarded to `to` across all auctions.
    pub fn received(&self, to: &Address) -> Amount {
        self.state
            .lock()
            .proceeds
            .iter()
            .filter(|(_, recipient, _)| recipient == to)
            .map(|(_, _, amount)| amount)
            .sum()
    }

    fn gate(state: &mut LedgerState) -> Result<(), TransferError> {
        if state.failing_ops > 0 {
            state.failing_ops -= 1;
            return Err(TransferError::Unavailable);
        }
        Ok(())
    }
}

impl AssetTransfer for InMemoryAssetLedger {
    fn transfer(&self, instruction: &TransferInstruction) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        Self::gate(&mut state)?;
        state.transfers.push(instruction.clone());
        Ok(())
    }

    fn forward_proceeds(
        &self,
        auction_id: AuctionId,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        Self::gate(&mut state)?;
        state.proceeds.push((auction_id, *to, amount));
        Ok(())
    }

    fn issue_position(
        &self,
        auction_id: AuctionId,
        holder: &Address,
        quantity: Amount,
        clearing_price: Amount,
    ) -> Result<PositionReceipt, TransferError> {
        let mut state = self.state.lock();
        Self::gate(&mut state)?;
        let receipt = PositionReceipt {
            position_id: state.next_position_id,
            auction_id,
            holder: *holder,
            quantity,
            clearing_price,
        };
        state.next_position_id += 1;
        state.positions.push(receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_types::PaymentType;

    const CREATOR: Address = [0xc0; 32];
    const BOB: Address = [0xb0; 32];
    const CAROL: Address = [0xca; 32];

    fn settlement() -> SettlementResult {
        let mut result = SettlementResult::empty(7);
        result.clearing_price = 2;
        result.allocations.insert(BOB, 400);
        result.allocations.insert(CAROL, 600);
        result.total_allocated = 1_000;
        result.organizer_proceeds = 2_000;
        result
    }

    fn distributor(ledger: Arc<InMemoryAssetLedger>) -> Distributor {
        let platform = PlatformConfig {
            treasury: [0xee; 32],
            ..Default::default()
        };
        Distributor::new(ledger, platform)
    }

    #[test]
    fn test_unique_tokens_are_numbered_contiguously() {
        let instructions = strategy_for(AssetType::NonFungibleUnique)
            .instructions(&settlement())
            .unwrap();

        let ids: Vec<Vec<u64>> = instructions
            .iter()
            .map(|i| match i {
                TransferInstruction::UniqueTokens { token_ids, .. } => token_ids.clone(),
                other => panic!("unexpected instruction {other:?}"),
            })
            .collect();
        assert_eq!(ids[0].first(), Some(&1));
        assert_eq!(ids[0].len(), 400);
        assert_eq!(ids[1].first(), Some(&401));
        assert_eq!(ids[1].last(), Some(&1_000));
    }

    #[test]
    fn test_plan_splits_fee_and_proceeds() {
        let ledger = Arc::new(InMemoryAssetLedger::new());
        let distributor = distributor(ledger.clone());
        let config = AuctionConfig {
            payment_type: PaymentType::FinalPriceShare,
            ..Default::default()
        };

        let mut progress = distributor.plan(&CREATOR, &config, &settlement()).unwrap();
        // 2 transfers, 2 positions, fee, proceeds
        assert_eq!(progress.steps.len(), 6);

        distributor.run(&mut progress).unwrap();
        assert!(progress.is_complete());
        assert_eq!(ledger.received(&[0xee; 32]), 60);
        assert_eq!(ledger.received(&CREATOR), 1_940);
        assert_eq!(ledger.positions().len(), 2);
        assert_eq!(ledger.transfers()[0].recipient(), &BOB);
    }

    #[test]
    fn test_failed_run_resumes_without_repeating() {
        let ledger = Arc::new(InMemoryAssetLedger::new());
        let distributor = distributor(ledger.clone());
        let mut progress = distributor
            .plan(&CREATOR, &AuctionConfig::default(), &settlement())
            .unwrap();

        ledger.fail_next(1);
        assert!(matches!(
            distributor.run(&mut progress),
            Err(AuctionError::DistributionFailed(_))
        ));
        assert_eq!(progress.completed, 0);
        assert!(ledger.transfers().is_empty());

        distributor.run(&mut progress).unwrap();
        assert!(progress.is_complete());

        // Running a completed plan again is a no-op
        distributor.run(&mut progress).unwrap();
        assert_eq!(ledger.transfers().len(), 2);
        assert_eq!(ledger.positions().len(), 2);
    }

    #[test]
    fn test_empty_settlement_has_no_steps() {
        let ledger = Arc::new(InMemoryAssetLedger::new());
        let progress = distributor(ledger)
            .plan(&CREATOR, &AuctionConfig::default(), &SettlementResult::empty(1))
            .unwrap();
        assert!(progress.steps.is_empty());
        assert!(progress.is_complete());
    }
}
