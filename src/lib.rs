//! RGS - remote game server settlement core
//!
//! Places provably-fair bets against an operator's remote wallet, keeps owed
//! payouts in an outbox until the wallet accepts them, and tells operators
//! what happened through signed webhooks and a live event stream.

pub mod api;
pub mod compliance;
pub mod config;
pub mod errors;
pub mod events;
pub mod factory;
pub mod games;
pub mod metrics;
pub mod models;
pub mod signing;
pub mod store;
pub mod wallet;
pub mod webhook;
pub mod workers;

pub use config::{ConfigLoader, RgsConfig};
pub use errors::{RgsError, RgsResult, SettlementError};
pub use events::EventBus;
pub use factory::Rgs;
pub use games::{PlaceBetOutcome, PlaceBetRequest, Reconciliation, SettlementPipeline};
pub use store::Store;
