//! Settlement: the finalization engine, its error surface, and the
//! post-commit invariant verifier.

pub mod engine;
pub mod error;
pub mod verifier;

pub use engine::{FinalizeOutcome, SettlementEngine};
pub use error::SettlementError;
pub use verifier::FinalizationInvariantError;
