pub mod fairness;
pub mod settlement;

pub use fairness::{generate_outcome, verify_outcome, FairOutcome};
pub use settlement::{PlaceBetOutcome, PlaceBetRequest, Reconciliation, SettlementPipeline};
