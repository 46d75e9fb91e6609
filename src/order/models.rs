//! Order Domain Types
//!
//! The order row is the central entity of the settlement core. Everything
//! here mirrors the `orders` table; mutations go through [`OrderStore`]
//! (`order::store`) so the version counter and write-once guards hold.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{ActorType, OrderStatus, UnknownStatus};
use crate::ledger::{EntityKind, EntityRef};

/// Order side, from the taker's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Off-band fiat rail for this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Bank,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Bank => "bank",
            PaymentMethod::Cash => "cash",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(PaymentMethod::Bank),
            "cash" => Ok(PaymentMethod::Cash),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Spread preference drives the per-order protocol fee percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadPreference {
    Fastest,
    Best,
    Cheap,
}

impl SpreadPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadPreference::Fastest => "fastest",
            SpreadPreference::Best => "best",
            SpreadPreference::Cheap => "cheap",
        }
    }
}

impl FromStr for SpreadPreference {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fastest" => Ok(SpreadPreference::Fastest),
            "best" => Ok(SpreadPreference::Best),
            "cheap" => Ok(SpreadPreference::Cheap),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The tagged identity initiating a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorType,
    pub id: String,
}

impl Actor {
    pub fn new(kind: ActorType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(ActorType::User, id)
    }

    pub fn merchant(id: impl Into<String>) -> Self {
        Self::new(ActorType::Merchant, id)
    }

    pub fn system() -> Self {
        Self::new(ActorType::System, "system")
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// On-chain escrow references supplied at lock time. Opaque to the core;
/// write-once on the order row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRefs {
    pub escrow_address: Option<String>,
    pub escrow_trade_id: Option<String>,
    pub escrow_trade_pda: Option<String>,
    pub escrow_pda: Option<String>,
    pub escrow_creator_wallet: Option<String>,
}

/// Full order snapshot as persisted in the `orders` table.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: i64,
    pub user_id: String,
    pub merchant_id: String,
    pub buyer_merchant_id: Option<String>,
    pub offer_id: String,
    pub side: Side,
    pub payment_method: PaymentMethod,
    pub crypto_amount: Decimal,
    pub crypto_currency: String,
    pub fiat_amount: Decimal,
    pub fiat_currency: String,
    pub rate: Decimal,
    pub platform_fee: Decimal,
    pub network_fee: Decimal,
    pub status: OrderStatus,
    pub order_version: i32,

    pub escrow_tx_hash: Option<String>,
    pub escrow_refs: EscrowRefs,
    pub escrow_debited_entity_type: Option<EntityKind>,
    pub escrow_debited_entity_id: Option<String>,
    pub escrow_debited_amount: Option<Decimal>,
    pub release_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,

    pub buyer_wallet_address: Option<String>,
    pub acceptor_wallet_address: Option<String>,
    pub payment_details: Option<String>,
    pub protocol_fee_amount: Option<Decimal>,
    pub protocol_fee_percentage: Option<Decimal>,
    pub spread_preference: Option<SpreadPreference>,
    pub extension_count: i32,
    pub max_extensions: i32,

    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub escrowed_at: Option<DateTime<Utc>>,
    pub payment_sent_at: Option<DateTime<Utc>>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    pub cancelled_by: Option<ActorType>,
    pub cancellation_reason: Option<String>,
}

impl Order {
    /// The (kind, id, amount) triple recorded at escrow-lock time, when the
    /// escrow was funded from the balance book.
    ///
    /// This triple, not the current role assignment, decides who a refund
    /// credits: merchant reassignment after lock must never redirect it.
    pub fn escrow_debited(&self) -> Option<(EntityRef, Decimal)> {
        match (
            self.escrow_debited_entity_type,
            &self.escrow_debited_entity_id,
            self.escrow_debited_amount,
        ) {
            (Some(kind), Some(id), Some(amount)) => {
                Some((EntityRef::new(kind, id.clone()), amount))
            }
            _ => None,
        }
    }

    /// Who receives the escrow on release. A filled buyer merchant wins;
    /// otherwise buy orders pay the user and sell orders pay the merchant.
    pub fn release_recipient(&self) -> EntityRef {
        if let Some(buyer) = &self.buyer_merchant_id {
            return EntityRef::merchant(buyer.clone());
        }
        match self.side {
            Side::Buy => EntityRef::user(self.user_id.clone()),
            Side::Sell => EntityRef::merchant(self.merchant_id.clone()),
        }
    }

    /// Net amount credited to the recipient on release.
    pub fn release_net_amount(&self) -> Decimal {
        self.crypto_amount - self.protocol_fee_amount.unwrap_or(Decimal::ZERO)
    }

    #[inline]
    pub fn has_escrow(&self) -> bool {
        self.escrow_tx_hash.is_some()
    }
}

/// Partial update applied through `OrderStore::apply`.
///
/// Only `Some` fields are written; the store bumps `order_version` and fills
/// the status-dependent timestamp itself.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub merchant_id: Option<String>,
    pub buyer_merchant_id: Option<String>,
    pub acceptor_wallet_address: Option<String>,

    pub escrow_tx_hash: Option<String>,
    pub escrow_refs: Option<EscrowRefs>,
    pub escrow_debited: Option<(EntityRef, Decimal)>,
    pub release_tx_hash: Option<String>,
    pub refund_tx_hash: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,
    pub extension_count: Option<i32>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,

    pub cancelled_by: Option<ActorType>,
    pub cancellation_reason: Option<String>,
}

impl OrderPatch {
    /// Patch that only moves the status.
    pub fn status(to: OrderStatus) -> Self {
        Self {
            status: Some(to),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            order_number: 1042,
            user_id: "u-1".into(),
            merchant_id: "m-1".into(),
            buyer_merchant_id: None,
            offer_id: "offer-1".into(),
            side: Side::Buy,
            payment_method: PaymentMethod::Bank,
            crypto_amount: Decimal::new(100, 0),
            crypto_currency: "USDC".into(),
            fiat_amount: Decimal::new(9200, 0),
            fiat_currency: "INR".into(),
            rate: Decimal::new(92, 0),
            platform_fee: Decimal::ZERO,
            network_fee: Decimal::ZERO,
            status: OrderStatus::Pending,
            order_version: 1,
            escrow_tx_hash: None,
            escrow_refs: EscrowRefs::default(),
            escrow_debited_entity_type: None,
            escrow_debited_entity_id: None,
            escrow_debited_amount: None,
            release_tx_hash: None,
            refund_tx_hash: None,
            buyer_wallet_address: None,
            acceptor_wallet_address: None,
            payment_details: None,
            protocol_fee_amount: None,
            protocol_fee_percentage: None,
            spread_preference: None,
            extension_count: 0,
            max_extensions: 3,
            created_at: Utc::now(),
            accepted_at: None,
            escrowed_at: None,
            payment_sent_at: None,
            payment_confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            expires_at: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    #[test]
    fn test_release_recipient_buy_goes_to_user() {
        let order = base_order();
        assert_eq!(order.release_recipient(), EntityRef::user("u-1"));
    }

    #[test]
    fn test_release_recipient_sell_goes_to_merchant() {
        let mut order = base_order();
        order.side = Side::Sell;
        assert_eq!(order.release_recipient(), EntityRef::merchant("m-1"));
    }

    #[test]
    fn test_release_recipient_buyer_merchant_wins() {
        let mut order = base_order();
        order.buyer_merchant_id = Some("m-2".into());
        assert_eq!(order.release_recipient(), EntityRef::merchant("m-2"));
        order.side = Side::Sell;
        assert_eq!(order.release_recipient(), EntityRef::merchant("m-2"));
    }

    #[test]
    fn test_release_net_amount() {
        let mut order = base_order();
        assert_eq!(order.release_net_amount(), Decimal::new(100, 0));
        order.protocol_fee_amount = Some(Decimal::new(25, 1)); // 2.5
        assert_eq!(order.release_net_amount(), Decimal::new(975, 1));
    }

    #[test]
    fn test_escrow_debited_requires_full_triple() {
        let mut order = base_order();
        assert!(order.escrow_debited().is_none());

        order.escrow_debited_entity_type = Some(EntityKind::Merchant);
        order.escrow_debited_entity_id = Some("m-1".into());
        assert!(order.escrow_debited().is_none());

        order.escrow_debited_amount = Some(Decimal::new(100, 0));
        let (entity, amount) = order.escrow_debited().unwrap();
        assert_eq!(entity, EntityRef::merchant("m-1"));
        assert_eq!(amount, Decimal::new(100, 0));
    }

    #[test]
    fn test_enum_roundtrips() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!(
            "fastest".parse::<SpreadPreference>().unwrap(),
            SpreadPreference::Fastest
        );
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_actor_display() {
        assert_eq!(Actor::merchant("m-9").to_string(), "merchant:m-9");
        assert_eq!(Actor::system().to_string(), "system:system");
    }
}
