//! Client SDK for bidding in sealed-bid uniform-price auctions.
//!
//! This crate provides a high-level API for:
//! - Encrypting quantity and price to an auction's identity
//! - Proving knowledge of the encryption randomness for both fields
//! - Computing the collateral a bid needs to cover its own payment

pub mod bid;

pub use bid::{create_bid, BidBuilder, BidError, PreparedBid};
