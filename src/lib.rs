//! Settlement Core - P2P fiat/crypto order settlement engine
//!
//! The transactional core of a peer-to-peer settlement marketplace: fiat
//! moves off-band while the crypto side sits under escrow, and this crate
//! owns the order lifecycle from escrow lock to release or refund.
//!
//! # Modules
//!
//! - [`order`] - Status state machine, order models, row store
//! - [`ledger`] - Double-entry ledger and balance book
//! - [`settlement`] - Atomic finalization engine + invariant verifier
//! - [`events`] - Append-only order event log
//! - [`outbox`] - Transactional notification outbox + drainer
//! - [`expiry`] - Deadline sweep worker
//! - [`gateway`] - HTTP command/read surface
//! - [`config`] - App configuration (yaml + env overrides)
//! - [`db`] - PostgreSQL pool management

pub mod config;
pub mod db;
pub mod events;
pub mod expiry;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod order;
pub mod outbox;
pub mod settlement;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use db::Database;
pub use events::{EventLog, OrderEvent};
pub use expiry::ExpiryWorker;
pub use ledger::{BalanceBook, EntityKind, EntityRef, LedgerEntry, LedgerEntryType};
pub use order::{
    Actor, ActorType, Order, OrderStatus, OrderStore, PublicStatus, Side,
};
pub use outbox::{NotificationPayload, Outbox, OutboxDrainer, OutboxRow, OutboxStatus};
pub use settlement::{FinalizeOutcome, SettlementEngine, SettlementError};
