//! Order domain: status machine, models, and the row store.

pub mod models;
pub mod status;
pub mod store;

pub use models::{Actor, EscrowRefs, Order, OrderPatch, PaymentMethod, Side, SpreadPreference};
pub use status::{
    ActorType, OrderStatus, PublicStatus, TransitionDenied, restore_liquidity_on_exit, validate,
};
pub use store::{OrderStore, StoreError};
