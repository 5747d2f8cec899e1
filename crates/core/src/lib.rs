//! Core types and pure computations for the cross-chain price mirror
//!
//! This crate provides the pieces shared by every other component:
//! - Price samples, update events and reconciled series points
//! - The read/transport/subscription error taxonomy
//! - Configuration types with their documented defaults
//! - The refresh backoff policy
//! - Delta, latency and trend math
//! - Series reconciliation

pub mod types;
pub mod errors;
pub mod config;
pub mod retry;
pub mod delta;
pub mod reconcile;
pub mod format;

pub use types::*;
pub use errors::*;
pub use config::*;
pub use retry::*;
pub use delta::*;
pub use reconcile::*;
