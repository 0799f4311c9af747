//! Cross-chain atomic swap coordinator
//!
//! Watches hash-time-locked escrow contracts across chains, coordinates
//! secret disclosure and drives every swap leg to claim or refund before its
//! timeout. The destination leg is always claimed first: that claim is what
//! publishes the preimage, and the source leg's strictly later timeout is the
//! safety margin for finishing the source claim.

pub mod api;
pub mod chain;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod store;
pub mod swap;
pub mod vault;
