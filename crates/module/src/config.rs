//! Auction configuration validation and pre-start updates.

use auction_types::{Amount, AssetType, AuctionConfig, CollateralPolicy, PaymentType};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::AuctionError;

/// Name length bounds, in characters.
pub const NAME_LEN: (usize, usize) = (4, 8);
/// Symbol length bounds, in characters.
pub const SYMBOL_LEN: (usize, usize) = (1, 4);
/// One receipt and one token per unit for unique non-fungibles.
pub const MAX_UNIQUE_SUPPLY: Amount = 10_000;

/// Check a configuration before it is stored.
pub fn validate_config(config: &AuctionConfig) -> Result<(), AuctionError> {
    let name_len = config.name.chars().count();
    if name_len < NAME_LEN.0 || name_len > NAME_LEN.1 {
        return Err(AuctionError::InvalidConfig(format!(
            "name must be {} to {} characters",
            NAME_LEN.0, NAME_LEN.1
        )));
    }

    let symbol_len = config.symbol.chars().count();
    if symbol_len < SYMBOL_LEN.0 || symbol_len > SYMBOL_LEN.1 {
        return Err(AuctionError::InvalidConfig(format!(
            "symbol must be {} to {} characters",
            SYMBOL_LEN.0, SYMBOL_LEN.1
        )));
    }

    if config.total_supply == 0 {
        return Err(AuctionError::InvalidConfig("total supply must be positive".into()));
    }

    if config.asset_type == AssetType::NonFungibleUnique && config.total_supply > MAX_UNIQUE_SUPPLY {
        return Err(AuctionError::InvalidConfig(format!(
            "unique non-fungible supply is capped at {MAX_UNIQUE_SUPPLY}"
        )));
    }

    if config.max_bids_per_bidder == 0 {
        return Err(AuctionError::InvalidConfig("max bids per bidder must be at least 1".into()));
    }

    if config.collateral_policy.required && config.collateral_policy.lock_amount_per_bid == 0 {
        return Err(AuctionError::InvalidConfig(
            "required collateral needs a positive lock amount".into(),
        ));
    }

    if config.settle_threshold == Some(0) {
        return Err(AuctionError::InvalidConfig("settle threshold must be positive".into()));
    }

    if config.terminate_on_settle_price && config.settle_threshold.is_none() {
        return Err(AuctionError::InvalidConfig(
            "terminate on settle price needs a settle threshold".into(),
        ));
    }

    if config.timing.duration == 0 {
        return Err(AuctionError::InvalidConfig("bidding duration must be set".into()));
    }

    Ok(())
}

/// Partial configuration write. `None` leaves a field unchanged.
///
/// `modifiable` is absent on purpose: it changes only through
/// `set_config_modifiable`, which is creator-only.
#[serde_with::skip_serializing_none]
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AuctionConfigUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub payment_type: Option<PaymentType>,
    #[serde(default)]
    pub total_supply: Option<Amount>,
    /// `Some(None)` clears the threshold.
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub settle_threshold: Option<Option<Amount>>,
    #[serde(default)]
    pub terminate_on_settle_price: Option<bool>,
    #[serde(default)]
    pub collateral_policy: Option<CollateralPolicy>,
    #[serde(default)]
    pub max_bids_per_bidder: Option<u32>,
    #[serde(default)]
    pub duration: Option<u64>,
}

impl AuctionConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce the updated configuration without touching `current`.
    pub fn apply(&self, current: &AuctionConfig) -> AuctionConfig {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(symbol) = &self.symbol {
            next.symbol = symbol.clone();
        }
        if let Some(asset_type) = self.asset_type {
            next.asset_type = asset_type;
        }
        if let Some(payment_type) = self.payment_type {
            next.payment_type = payment_type;
        }
        if let Some(total_supply) = self.total_supply {
            next.total_supply = total_supply;
        }
        if let Some(settle_threshold) = self.settle_threshold {
            next.settle_threshold = settle_threshold;
        }
        if let Some(flag) = self.terminate_on_settle_price {
            next.terminate_on_settle_price = flag;
        }
        if let Some(policy) = &self.collateral_policy {
            next.collateral_policy = policy.clone();
        }
        if let Some(max_bids) = self.max_bids_per_bidder {
            next.max_bids_per_bidder = max_bids;
        }
        if let Some(duration) = self.duration {
            next.timing.duration = duration;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuctionConfig {
        AuctionConfig {
            name: "Tulips".into(),
            symbol: "TLP".into(),
            total_supply: 1_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_shaped_config_is_valid() {
        assert!(validate_config(&config()).is_ok());
        assert!(validate_config(&AuctionConfig::default()).is_ok());
    }

    #[test]
    fn test_name_and_symbol_bounds() {
        let mut c = config();
        c.name = "abc".into();
        assert!(matches!(validate_config(&c), Err(AuctionError::InvalidConfig(_))));

        let mut c = config();
        c.symbol = "TOOLONG".into();
        assert!(matches!(validate_config(&c), Err(AuctionError::InvalidConfig(_))));
    }

    #[test]
    fn test_supply_rules() {
        let mut c = config();
        c.total_supply = 0;
        assert!(validate_config(&c).is_err());

        let mut c = config();
        c.asset_type = AssetType::NonFungibleUnique;
        c.total_supply = MAX_UNIQUE_SUPPLY + 1;
        assert!(validate_config(&c).is_err());
        c.total_supply = MAX_UNIQUE_SUPPLY;
        assert!(validate_config(&c).is_ok());
    }

    #[test]
    fn test_required_collateral_needs_amount() {
        let mut c = config();
        c.collateral_policy = CollateralPolicy {
            required: true,
            lock_amount_per_bid: 0,
        };
        assert!(validate_config(&c).is_err());
    }

    #[test]
    fn test_update_applies_only_given_fields() {
        let mut base = config();
        base.settle_threshold = Some(5);

        let update = AuctionConfigUpdate {
            total_supply: Some(10),
            settle_threshold: Some(None),
            ..Default::default()
        };
        let next = update.apply(&base);

        assert_eq!(next.total_supply, 10);
        assert_eq!(next.settle_threshold, None);
        assert_eq!(next.name, base.name);
        assert!(!update.is_empty());
        assert!(AuctionConfigUpdate::default().is_empty());
    }

    #[test]
    fn test_update_json_distinguishes_clear_from_absent() {
        let clear: AuctionConfigUpdate =
            serde_json::from_str(r#"{"settle_threshold": null}"#).unwrap();
        assert_eq!(clear.settle_threshold, Some(None));

        let absent: AuctionConfigUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.settle_threshold, None);
    }
}
