//! RPC-compatible types for the auction node.
//!
//! Byte-array fields of the core types travel hex-encoded. Types without
//! byte arrays (`AuctionConfig`, `AuctionStatus`, config updates) are used
//! as-is.

use serde::{Deserialize, Serialize};

use auction_module::{AuctionSummary, DistributionProgress};
use auction_types::{
    Address, Amount, AuctionConfig, AuctionId, Bid, ConfidentialValue, EncryptionKey, G2Point,
    InputProof, KnowledgeProof, Scalar, SettlementResult,
};

/// Block info response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
}

/// Committee encryption key for RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionKeyRpc {
    /// Hex-encoded G2 point (96 bytes)
    pub mpk: String,
    pub threshold: u32,
    pub total_holders: u32,
}

impl From<&EncryptionKey> for EncryptionKeyRpc {
    fn from(k: &EncryptionKey) -> Self {
        Self {
            mpk: hex::encode(k.mpk.0),
            threshold: k.threshold,
            total_holders: k.total_holders,
        }
    }
}

/// Confidential value for RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidentialValueRpc {
    /// Hex-encoded G2 point (96 bytes)
    pub ephemeral_pubkey: String,
    /// Hex-encoded ciphertext with tag
    pub ciphertext: String,
    /// Hex-encoded nonce (12 bytes)
    pub nonce: String,
}

impl From<&ConfidentialValue> for ConfidentialValueRpc {
    fn from(v: &ConfidentialValue) -> Self {
        Self {
            ephemeral_pubkey: hex::encode(v.ephemeral_pubkey.0),
            ciphertext: hex::encode(&v.ciphertext),
            nonce: hex::encode(v.nonce),
        }
    }
}

impl TryFrom<&ConfidentialValueRpc> for ConfidentialValue {
    type Error = String;

    fn try_from(v: &ConfidentialValueRpc) -> Result<Self, Self::Error> {
        Ok(Self {
            ephemeral_pubkey: G2Point(decode_fixed(&v.ephemeral_pubkey, "ephemeral_pubkey")?),
            ciphertext: hex::decode(&v.ciphertext).map_err(|e| format!("Invalid ciphertext: {}", e))?,
            nonce: decode_fixed(&v.nonce, "nonce")?,
        })
    }
}

/// Knowledge proof for RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeProofRpc {
    /// Hex-encoded G2 point (96 bytes)
    pub commitment: String,
    /// Hex-encoded scalar (32 bytes)
    pub response: String,
}

impl From<&KnowledgeProof> for KnowledgeProofRpc {
    fn from(p: &KnowledgeProof) -> Self {
        Self {
            commitment: hex::encode(p.commitment.0),
            response: hex::encode(p.response.0),
        }
    }
}

impl TryFrom<&KnowledgeProofRpc> for KnowledgeProof {
    type Error = String;

    fn try_from(p: &KnowledgeProofRpc) -> Result<Self, Self::Error> {
        Ok(Self {
            commitment: G2Point(decode_fixed(&p.commitment, "commitment")?),
            response: Scalar(decode_fixed(&p.response, "response")?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputProofRpc {
    pub quantity: KnowledgeProofRpc,
    pub price: KnowledgeProofRpc,
}

impl From<&InputProof> for InputProofRpc {
    fn from(p: &InputProof) -> Self {
        Self {
            quantity: (&p.quantity).into(),
            price: (&p.price).into(),
        }
    }
}

impl TryFrom<&InputProofRpc> for InputProof {
    type Error = String;

    fn try_from(p: &InputProofRpc) -> Result<Self, Self::Error> {
        Ok(Self {
            quantity: (&p.quantity).try_into()?,
            price: (&p.price).try_into()?,
        })
    }
}

/// Parameters for creating an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuctionParams {
    pub sender: String,
    #[serde(default)]
    pub config: AuctionConfig,
}

/// Parameters for submitting a bid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBidParams {
    pub sender: String,
    pub auction_id: AuctionId,
    pub encrypted_quantity: ConfidentialValueRpc,
    pub encrypted_price_per_unit: ConfidentialValueRpc,
    pub proof: InputProofRpc,
    /// Collateral sent with the bid
    pub collateral: Amount,
}

/// Stored bid for RPC responses. Ciphertexts are reported by handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRpc {
    pub bidder: String,
    pub sequence_index: u64,
    pub locked_collateral: Amount,
    pub accepted_at: u64,
    pub quantity_handle: String,
    pub price_handle: String,
}

impl From<&Bid> for BidRpc {
    fn from(b: &Bid) -> Self {
        Self {
            bidder: hex::encode(b.bidder),
            sequence_index: b.sequence_index,
            locked_collateral: b.locked_collateral,
            accepted_at: b.accepted_at,
            quantity_handle: hex::encode(b.encrypted_quantity.handle()),
            price_handle: hex::encode(b.encrypted_price_per_unit.handle()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRpc {
    pub bidder: String,
    pub quantity: Amount,
    pub payment: Amount,
}

/// Settlement result for RPC responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRpc {
    pub auction_id: AuctionId,
    pub clearing_price: Amount,
    pub allocations: Vec<AllocationRpc>,
    pub total_allocated: Amount,
    pub organizer_proceeds: Amount,
}

impl From<&SettlementResult> for SettlementRpc {
    fn from(r: &SettlementResult) -> Self {
        Self {
            auction_id: r.auction_id,
            clearing_price: r.clearing_price,
            allocations: r
                .allocations
                .iter()
                .map(|(bidder, quantity)| AllocationRpc {
                    bidder: hex::encode(bidder),
                    quantity: *quantity,
                    payment: r.payment_of(bidder),
                })
                .collect(),
            total_allocated: r.total_allocated,
            organizer_proceeds: r.organizer_proceeds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRpc {
    pub position_id: u64,
    pub holder: String,
    pub quantity: Amount,
}

/// Distribution progress for RPC responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRpc {
    pub auction_id: AuctionId,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub complete: bool,
    pub positions: Vec<PositionRpc>,
}

impl From<&DistributionProgress> for DistributionRpc {
    fn from(p: &DistributionProgress) -> Self {
        Self {
            auction_id: p.auction_id,
            completed_steps: p.completed,
            total_steps: p.steps.len(),
            complete: p.is_complete(),
            positions: p
                .positions
                .iter()
                .map(|r| PositionRpc {
                    position_id: r.position_id,
                    holder: hex::encode(r.holder),
                    quantity: r.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionSummaryRpc {
    pub auction_id: AuctionId,
    pub creator: String,
    pub name: String,
    pub symbol: String,
    pub phase: String,
}

impl From<&AuctionSummary> for AuctionSummaryRpc {
    fn from(s: &AuctionSummary) -> Self {
        Self {
            auction_id: s.auction_id,
            creator: hex::encode(s.creator),
            name: s.name.clone(),
            symbol: s.symbol.clone(),
            phase: format!("{:?}", s.phase).to_lowercase(),
        }
    }
}

/// Parse a hex address, with or without a `0x` prefix.
pub fn parse_address(s: &str) -> Result<Address, String> {
    decode_fixed(s.trim_start_matches("0x"), "address")
}

fn decode_fixed<const N: usize>(s: &str, field: &str) -> Result<[u8; N], String> {
    hex::decode(s)
        .map_err(|e| format!("Invalid {}: {}", field, e))?
        .try_into()
        .map_err(|_| format!("{} must be {} bytes", field, N))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let hex_addr = "ab".repeat(32);
        assert_eq!(parse_address(&hex_addr), Ok([0xab; 32]));
        assert_eq!(parse_address(&format!("0x{}", hex_addr)), Ok([0xab; 32]));
        assert!(parse_address("abcd").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_confidential_value_rejects_short_nonce() {
        let rpc = ConfidentialValueRpc {
            ephemeral_pubkey: "00".repeat(96),
            ciphertext: "00".repeat(32),
            nonce: "00".repeat(8),
        };
        let err = ConfidentialValue::try_from(&rpc).unwrap_err();
        assert!(err.contains("nonce"));
    }
}
