//! Platform-wide configuration.

use serde::{Deserialize, Serialize};

use auction_types::{Address, Amount, PaymentType};

use crate::error::AuctionError;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fee schedule applied to every auction's proceeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Receives platform fees
    pub treasury: Address,
    /// Fee for `PaymentType::FinalPriceShare`, in basis points of proceeds
    pub final_price_share_bps: u16,
    /// Fee for `PaymentType::SettlePriceShare`, in basis points of the
    /// settle-price volume
    pub settle_price_share_bps: u16,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            treasury: [0u8; 32],
            final_price_share_bps: 300,   // 3%
            settle_price_share_bps: 1000, // 10%
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), AuctionError> {
        if u128::from(self.final_price_share_bps) > BPS_DENOMINATOR
            || u128::from(self.settle_price_share_bps) > BPS_DENOMINATOR
        {
            return Err(AuctionError::InvalidConfig("fee exceeds 100%".into()));
        }
        Ok(())
    }

    /// Platform fee owed on an auction's proceeds. Never exceeds `proceeds`.
    pub fn fee(
        &self,
        payment_type: PaymentType,
        settle_threshold: Option<Amount>,
        total_allocated: Amount,
        proceeds: Amount,
    ) -> Result<Amount, AuctionError> {
        let (base, bps) = match payment_type {
            PaymentType::FinalPriceShare => (proceeds, self.final_price_share_bps),
            PaymentType::SettlePriceShare => {
                let volume = match settle_threshold {
                    Some(threshold) => threshold
                        .checked_mul(total_allocated)
                        .ok_or(AuctionError::ArithmeticOverflow)?
                        .min(proceeds),
                    None => proceeds,
                };
                (volume, self.settle_price_share_bps)
            }
        };

        let fee = base
            .checked_mul(u128::from(bps))
            .ok_or(AuctionError::ArithmeticOverflow)?
            / BPS_DENOMINATOR;
        Ok(fee.min(proceeds))
    }
}
