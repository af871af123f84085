//! Uniform-price clearing.
//!
//! Clearing runs in two stages:
//! - `reveal`: decrypt both fields of every active bid through the oracle
//! - `clear`: order, allocate and price the revealed bids
//!
//! `clear` is pure. The only suspension point is `reveal`, and it never
//! returns a partially revealed bid set.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{debug, warn};

use auction_types::{
    Address, Amount, AuctionId, Bid, BidFill, CiphertextHandle, RevealedBid, SettlementResult,
};

use crate::error::AuctionError;
use crate::substrate::{ciphertext_key, DecryptionHandle, DecryptionOracle};

/// A revealed bid together with what settlement needs to know about its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearingEntry {
    pub revealed: RevealedBid,
    pub bidder: Address,
    pub locked_collateral: Amount,
}

/// Canonical clearing order: price descending, then earlier bid first.
pub fn clearing_order(a: &RevealedBid, b: &RevealedBid) -> Ordering {
    b.price_per_unit
        .cmp(&a.price_per_unit)
        .then(a.sequence_index.cmp(&b.sequence_index))
}

/// Compute allocations and the clearing price.
///
/// Every winner pays the marginal bid's price. Fails with
/// `CollateralShortfall` if any winner's locked collateral does not cover
/// their payment.
pub fn clear(
    auction_id: AuctionId,
    total_supply: Amount,
    mut entries: Vec<ClearingEntry>,
) -> Result<SettlementResult, AuctionError> {
    entries.sort_by(|a, b| clearing_order(&a.revealed, &b.revealed));

    // Allocate
    let mut remaining = total_supply;
    let mut clearing_price = 0;
    let mut filled = Vec::with_capacity(entries.len());
    for entry in &entries {
        let quantity = entry.revealed.quantity.min(remaining);
        remaining -= quantity;
        if quantity > 0 {
            clearing_price = entry.revealed.price_per_unit;
        }
        filled.push(quantity);
    }

    // Settle
    let mut result = SettlementResult::empty(auction_id);
    result.clearing_price = clearing_price;
    for (entry, quantity) in entries.iter().zip(filled) {
        let payment = quantity
            .checked_mul(clearing_price)
            .ok_or(AuctionError::ArithmeticOverflow)?;
        if payment > entry.locked_collateral {
            return Err(AuctionError::CollateralShortfall {
                sequence_index: entry.revealed.sequence_index,
                locked: entry.locked_collateral,
                owed: payment,
            });
        }

        if quantity > 0 {
            let allocated = result.allocations.entry(entry.bidder).or_insert(0);
            *allocated = allocated
                .checked_add(quantity)
                .ok_or(AuctionError::ArithmeticOverflow)?;
            result.total_allocated += quantity;
        }

        result.fills.push(BidFill {
            sequence_index: entry.revealed.sequence_index,
            bidder: entry.bidder,
            quantity,
            payment,
        });
    }

    result.organizer_proceeds = result
        .total_allocated
        .checked_mul(clearing_price)
        .ok_or(AuctionError::ArithmeticOverflow)?;

    debug!(
        auction_id,
        clearing_price,
        total_allocated = result.total_allocated,
        winners = result.allocations.len(),
        "Cleared auction"
    );

    Ok(result)
}

/// Bids that decrypted, plus bids whose ciphertexts never will.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Revealed {
    pub bids: Vec<RevealedBid>,
    /// Sequence indices of bids with a malformed payload
    pub undecryptable: Vec<u64>,
}

/// Outcome of one reveal attempt.
///
/// `issued` carries every handle the oracle handed out during this attempt,
/// whether or not the attempt succeeded, so a retry can resolve instead of
/// re-requesting.
pub struct RevealOutcome {
    pub issued: Vec<(CiphertextHandle, DecryptionHandle)>,
    pub revealed: Result<Revealed, AuctionError>,
}

/// Decrypt both fields of every bid.
///
/// A transient oracle failure on any field fails the whole attempt. A field
/// that fails to decrypt marks its bid undecryptable instead.
pub async fn reveal(
    oracle: &dyn DecryptionOracle,
    identity: &[u8; 32],
    bids: &[Bid],
    known: &BTreeMap<CiphertextHandle, DecryptionHandle>,
) -> RevealOutcome {
    // Stage 1: obtain a handle for every field (two per bid).
    let fields: Vec<_> = bids
        .iter()
        .flat_map(|bid| [&bid.encrypted_quantity, &bid.encrypted_price_per_unit])
        .collect();

    let requests = fields.iter().map(|value| async move {
        let key = ciphertext_key(value);
        match known.get(&key) {
            Some(handle) => Ok((key, *handle, false)),
            None => oracle
                .request_decryption(identity, value)
                .await
                .map(|handle| (key, handle, true)),
        }
    });

    let mut issued = Vec::new();
    let mut handles = Vec::with_capacity(fields.len());
    let mut request_error = None;
    for result in join_all(requests).await {
        match result {
            Ok((key, handle, fresh)) => {
                if fresh {
                    issued.push((key, handle));
                }
                handles.push(handle);
            }
            Err(e) => request_error = Some(e),
        }
    }
    if let Some(e) = request_error {
        warn!(error = %e, "Decryption request failed");
        return RevealOutcome {
            issued,
            revealed: Err(AuctionError::SettlementIncomplete(e.to_string())),
        };
    }

    // Stage 2: resolve. Completion order does not matter; results come back
    // positionally.
    let resolved = join_all(handles.iter().map(|handle| oracle.resolve(handle))).await;

    let transient = resolved
        .iter()
        .filter_map(|result| result.as_ref().err())
        .find(|e| !e.is_undecryptable());
    if let Some(e) = transient {
        warn!(error = %e, "Decryption did not resolve");
        return RevealOutcome {
            issued,
            revealed: Err(AuctionError::SettlementIncomplete(e.to_string())),
        };
    }

    let mut revealed = Revealed::default();
    for (bid, pair) in bids.iter().zip(resolved.chunks_exact(2)) {
        match (&pair[0], &pair[1]) {
            (Ok(quantity), Ok(price)) => revealed.bids.push(RevealedBid {
                sequence_index: bid.sequence_index,
                quantity: *quantity,
                price_per_unit: *price,
            }),
            _ => {
                warn!(
                    sequence_index = bid.sequence_index,
                    "Bid does not decrypt, excluding it from clearing"
                );
                revealed.undecryptable.push(bid.sequence_index);
            }
        }
    }

    RevealOutcome {
        issued,
        revealed: Ok(revealed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::testing::{TestKeys, TestOracle};
    use auction_types::compute_auction_identity;

    const BOB: Address = [0xb0; 32];
    const CAROL: Address = [0xca; 32];
    const DAVID: Address = [0xda; 32];

    fn entry(sequence_index: u64, bidder: Address, quantity: Amount, price: Amount) -> ClearingEntry {
        ClearingEntry {
            revealed: RevealedBid {
                sequence_index,
                quantity,
                price_per_unit: price,
            },
            bidder,
            locked_collateral: Amount::MAX,
        }
    }

    #[test]
    fn test_uniform_price_scenario() {
        let result = clear(
            0,
            1_000_000,
            vec![
                entry(0, BOB, 500_000, 2),
                entry(1, CAROL, 600_000, 8),
                entry(2, DAVID, 1_000_000, 1),
            ],
        )
        .unwrap();

        assert_eq!(result.clearing_price, 2);
        assert_eq!(result.allocations.get(&CAROL), Some(&600_000));
        assert_eq!(result.allocations.get(&BOB), Some(&400_000));
        assert_eq!(result.allocations.get(&DAVID), None);
        assert_eq!(result.total_allocated, 1_000_000);
        assert_eq!(result.organizer_proceeds, 2_000_000);

        let order: Vec<u64> = result.fills.iter().map(|f| f.sequence_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_payments_sum_to_proceeds() {
        let result = clear(
            0,
            100,
            vec![
                entry(0, BOB, 30, 9),
                entry(1, CAROL, 30, 7),
                entry(2, DAVID, 50, 5),
                entry(3, BOB, 10, 4),
            ],
        )
        .unwrap();

        let paid: Amount = result.fills.iter().map(|f| f.payment).sum();
        assert_eq!(paid, result.organizer_proceeds);
        assert_eq!(result.total_allocated, 100);
        assert_eq!(result.clearing_price, 5);
        // Every winner pays the same price per unit, at most what they named
        for fill in result.fills.iter().filter(|f| f.quantity > 0) {
            assert_eq!(fill.payment, fill.quantity * result.clearing_price);
        }
    }

    #[test]
    fn test_undersubscribed_supply_prices_at_lowest_bid() {
        let result = clear(
            0,
            1_000,
            vec![entry(0, BOB, 100, 9), entry(1, CAROL, 200, 3)],
        )
        .unwrap();

        assert_eq!(result.total_allocated, 300);
        assert_eq!(result.clearing_price, 3);
        assert_eq!(result.organizer_proceeds, 900);
    }

    #[test]
    fn test_equal_price_goes_to_earlier_bid() {
        let result = clear(
            0,
            10,
            vec![entry(5, CAROL, 10, 4), entry(2, BOB, 10, 4)],
        )
        .unwrap();

        assert_eq!(result.allocations.get(&BOB), Some(&10));
        assert_eq!(result.allocations.get(&CAROL), None);
    }

    #[test]
    fn test_zero_quantity_bid_does_not_set_price() {
        let result = clear(
            0,
            10,
            vec![entry(0, BOB, 10, 6), entry(1, CAROL, 0, 1)],
        )
        .unwrap();
        assert_eq!(result.clearing_price, 6);
    }

    #[test]
    fn test_empty_bid_set() {
        let result = clear(4, 10, Vec::new()).unwrap();
        assert_eq!(result, SettlementResult::empty(4));
    }

    #[test]
    fn test_collateral_shortfall() {
        let mut short = entry(0, BOB, 10, 5);
        short.locked_collateral = 49;
        assert_eq!(
            clear(0, 10, vec![short]),
            Err(AuctionError::CollateralShortfall {
                sequence_index: 0,
                locked: 49,
                owed: 50
            })
        );
    }

    #[test]
    fn test_overflowing_payment() {
        assert_eq!(
            clear(0, Amount::MAX, vec![entry(0, BOB, Amount::MAX, 2)]),
            Err(AuctionError::ArithmeticOverflow)
        );
    }

    fn sealed_bids(keys: &TestKeys, plain: &[(Address, Amount, Amount)]) -> Vec<Bid> {
        plain
            .iter()
            .enumerate()
            .map(|(i, (bidder, quantity, price))| {
                let (q, p, _) = keys.seal(0, bidder, *quantity, *price);
                Bid {
                    bidder: *bidder,
                    sequence_index: i as u64,
                    encrypted_quantity: q,
                    encrypted_price_per_unit: p,
                    locked_collateral: 0,
                    accepted_at: 0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reveal_decrypts_every_field() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let bids = sealed_bids(&keys, &[(BOB, 500_000, 2), (CAROL, 600_000, 8)]);

        let outcome = reveal(&oracle, &compute_auction_identity(0), &bids, &BTreeMap::new()).await;
        let revealed = outcome.revealed.unwrap();

        assert_eq!(outcome.issued.len(), 4);
        assert_eq!(revealed.bids[0].quantity, 500_000);
        assert_eq!(revealed.bids[1].price_per_unit, 8);
        assert!(revealed.undecryptable.is_empty());
    }

    #[tokio::test]
    async fn test_garbled_bid_is_set_aside() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let mut bids = sealed_bids(&keys, &[(BOB, 5, 3), (CAROL, 5, 9)]);
        let (garbled, price, _) = keys.seal_garbled(0, &CAROL, 9);
        bids[1].encrypted_quantity = garbled;
        bids[1].encrypted_price_per_unit = price;

        let outcome = reveal(&oracle, &compute_auction_identity(0), &bids, &BTreeMap::new()).await;
        let revealed = outcome.revealed.unwrap();

        assert_eq!(revealed.bids.len(), 1);
        assert_eq!(revealed.bids[0].sequence_index, 0);
        assert_eq!(revealed.undecryptable, vec![1]);
    }

    #[tokio::test]
    async fn test_failed_reveal_keeps_handles_for_retry() {
        let keys = TestKeys::new();
        let oracle = TestOracle::new(&keys);
        let identity = compute_auction_identity(0);
        let bids = sealed_bids(&keys, &[(BOB, 1, 1), (CAROL, 2, 2)]);

        oracle.fail_next(1);
        let first = reveal(&oracle, &identity, &bids, &BTreeMap::new()).await;
        assert!(matches!(first.revealed, Err(AuctionError::SettlementIncomplete(_))));
        assert_eq!(first.issued.len(), 4);

        let known: BTreeMap<_, _> = first.issued.into_iter().collect();
        let second = reveal(&oracle, &identity, &bids, &known).await;
        assert!(second.revealed.is_ok());
        assert!(second.issued.is_empty());
        assert_eq!(oracle.request_count(), 4);
    }
}
