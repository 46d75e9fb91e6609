//! Finalization Engine
//!
//! The atomic units of work of the settlement core: escrow lock, release,
//! refund/cancel, expiry, and general status transitions. Each operation is
//! one database transaction that couples the balance movement, the ledger
//! entry, the order patch, the event row, and the outbox row. Any attempt
//! to split this logic will introduce race conditions.
//!
//! Every operation starts with `SELECT ... FOR UPDATE` on the order row and
//! holds the lock to commit; that row lock serializes all writers per order.

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgConnection;
use sqlx::PgPool;
use tokio::time::timeout;
use uuid::Uuid;

use crate::events::{EventLog, NewOrderEvent};
use crate::ledger::{BalanceBook, EntityKind, EntityRef, LedgerEntryType, NewLedgerEntry};
use crate::order::models::{Actor, EscrowRefs, Order, OrderPatch};
use crate::order::status::{
    ActorType, OrderStatus, restore_liquidity_on_exit, validate,
};
use crate::order::store::OrderStore;
use crate::outbox::{NotificationPayload, Outbox, OutboxRow};

use super::error::SettlementError;
use super::verifier;

/// Escrow entry extends the order deadline to two hours from the event.
const ESCROW_DEADLINE: chrono::Duration = chrono::Duration::minutes(120);
/// Each granted extension adds fifteen minutes.
const EXTENSION_STEP: chrono::Duration = chrono::Duration::minutes(15);

/// Result of a finalization: the post-image and the notifications written
/// in the same transaction (pending until the drainer picks them up).
#[derive(Debug)]
pub struct FinalizeOutcome {
    pub order: Order,
    pub notifications: Vec<OutboxRow>,
}

pub struct SettlementEngine {
    pool: PgPool,
    mock_mode: bool,
    tx_budget: Duration,
}

impl SettlementEngine {
    pub fn new(pool: PgPool, mock_mode: bool) -> Self {
        Self {
            pool,
            mock_mode,
            tx_budget: Duration::from_secs(5),
        }
    }

    pub fn with_tx_budget(mut self, tx_budget: Duration) -> Self {
        self.tx_budget = tx_budget;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock escrow for an order: debit the funder (mock mode), record the
    /// lock, stamp the write-once escrow references, move to `escrowed`.
    pub async fn escrow_lock(
        &self,
        order_id: Uuid,
        actor: &Actor,
        tx_hash: &str,
        refs: EscrowRefs,
        expected_status: Option<OrderStatus>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        self.bounded(self.escrow_lock_inner(order_id, actor, tx_hash, refs, expected_status))
            .await
    }

    async fn escrow_lock_inner(
        &self,
        order_id: Uuid,
        actor: &Actor,
        tx_hash: &str,
        refs: EscrowRefs,
        expected_status: Option<OrderStatus>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderStore::load_for_update(&mut tx, order_id).await?;

        check_expectation(&order, expected_status)?;
        if order.escrow_tx_hash.is_some() {
            // Write-once guard, distinct from the version check: the loser
            // of a double-lock race lands here after taking the row lock,
            // so it must win over the status gate.
            return Err(SettlementError::AlreadyEscrowed);
        }
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Accepted | OrderStatus::EscrowPending
        ) {
            return Err(SettlementError::StatusInvalid {
                current: order.status,
                operation: "escrow_lock",
            });
        }

        let mut patch = OrderPatch::status(OrderStatus::Escrowed);
        patch.escrow_tx_hash = Some(tx_hash.to_string());
        patch.escrow_refs = Some(refs);
        patch.expires_at = Some(Utc::now() + ESCROW_DEADLINE);

        if self.mock_mode {
            let funder = escrow_funder(actor)?;
            BalanceBook::debit(&mut tx, &funder, order.crypto_amount).await?;
            BalanceBook::record_entry(
                &mut tx,
                &NewLedgerEntry {
                    related_order_id: Some(order.id),
                    entry_type: LedgerEntryType::EscrowLock,
                    amount: order.crypto_amount,
                    currency: order.crypto_currency.clone(),
                    debited: Some(funder.clone()),
                    credited: None,
                },
            )
            .await?;
            // The triple decides who a refund credits, even if roles are
            // reassigned afterwards.
            patch.escrow_debited = Some((funder, order.crypto_amount));
        }

        let (post, notification) = self
            .finish_transition(
                &mut tx,
                &order,
                patch,
                actor,
                serde_json::json!({ "tx_hash": tx_hash }),
                Some(tx_hash.to_string()),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            %order_id,
            actor = %actor,
            tx_hash,
            amount = %post.crypto_amount,
            "escrow locked"
        );
        Ok(FinalizeOutcome {
            order: post,
            notifications: vec![notification],
        })
    }

    /// Release the escrow to the buyer, net of platform fee, and complete
    /// the order. Runs the post-commit release invariant check.
    pub async fn release(
        &self,
        order_id: Uuid,
        actor: &Actor,
        release_tx_hash: &str,
        expected_status: Option<OrderStatus>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let outcome = self
            .bounded(self.release_inner(order_id, actor, release_tx_hash, expected_status))
            .await?;

        verifier::verify_release(
            &self.pool,
            order_id,
            release_tx_hash,
            outcome.order.order_version,
        )
        .await?;
        Ok(outcome)
    }

    async fn release_inner(
        &self,
        order_id: Uuid,
        actor: &Actor,
        release_tx_hash: &str,
        expected_status: Option<OrderStatus>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderStore::load_for_update(&mut tx, order_id).await?;

        check_expectation(&order, expected_status)?;
        if order.release_tx_hash.is_some() {
            // The loser of a double release sees the winner's hash here.
            return Err(SettlementError::AlreadyReleased);
        }
        if !matches!(
            order.status,
            OrderStatus::Escrowed
                | OrderStatus::PaymentSent
                | OrderStatus::PaymentConfirmed
                | OrderStatus::Releasing
        ) {
            return Err(SettlementError::StatusInvalid {
                current: order.status,
                operation: "release",
            });
        }

        let net = order.release_net_amount();
        if net <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "release net amount is not positive: {net}"
            )));
        }
        let recipient = order.release_recipient();
        let fee = order.protocol_fee_amount.unwrap_or(Decimal::ZERO);

        // Balance movements mirror the lock: only escrow funded from the
        // balance book (the stored triple) pays out of the book.
        if let Some((funder, _)) = order.escrow_debited() {
            BalanceBook::credit(&mut tx, &recipient, net).await?;
            BalanceBook::record_entry(
                &mut tx,
                &NewLedgerEntry {
                    related_order_id: Some(order.id),
                    entry_type: LedgerEntryType::EscrowRelease,
                    amount: net,
                    currency: order.crypto_currency.clone(),
                    debited: Some(funder.clone()),
                    credited: Some(recipient.clone()),
                },
            )
            .await?;

            if fee > Decimal::ZERO {
                // Platform singleton locked last per the global ordering.
                BalanceBook::collect_platform_fee(
                    &mut tx,
                    order.id,
                    fee,
                    order.protocol_fee_percentage,
                    order.spread_preference.map(|s| s.as_str()),
                )
                .await?;
                BalanceBook::record_entry(
                    &mut tx,
                    &NewLedgerEntry {
                        related_order_id: Some(order.id),
                        entry_type: LedgerEntryType::PlatformFeeCollected,
                        amount: fee,
                        currency: order.crypto_currency.clone(),
                        debited: Some(funder),
                        credited: Some(EntityRef::platform()),
                    },
                )
                .await?;
            }
        }

        BalanceBook::increment_trade_stats(&mut tx, &recipient, order.crypto_amount).await?;
        BalanceBook::record_entry(
            &mut tx,
            &NewLedgerEntry {
                related_order_id: Some(order.id),
                entry_type: LedgerEntryType::TradeStatsAdjust,
                amount: order.crypto_amount,
                currency: order.crypto_currency.clone(),
                debited: None,
                credited: None,
            },
        )
        .await?;

        let mut patch = OrderPatch::status(OrderStatus::Completed);
        patch.release_tx_hash = Some(release_tx_hash.to_string());
        patch.payment_confirmed_at = Some(Utc::now());

        let (post, notification) = self
            .finish_transition(
                &mut tx,
                &order,
                patch,
                actor,
                serde_json::json!({ "release_tx_hash": release_tx_hash }),
                Some(release_tx_hash.to_string()),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            %order_id,
            actor = %actor,
            release_tx_hash,
            recipient = %recipient,
            %net,
            %fee,
            "escrow released, order completed"
        );
        Ok(FinalizeOutcome {
            order: post,
            notifications: vec![notification],
        })
    }

    /// Cancel an order. Escrow-locked orders are refunded to the originally
    /// debited entity in the same transaction; pre-escrow orders restore
    /// their offer's liquidity. Runs the post-commit refund invariant check
    /// when a refund happened.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
        expected_status: Option<OrderStatus>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let (outcome, refunded) = self
            .bounded(self.cancel_outer(order_id, actor, reason, expected_status))
            .await?;

        if refunded {
            verifier::verify_refund(
                &self.pool,
                order_id,
                OrderStatus::Cancelled,
                outcome.order.order_version,
            )
            .await?;
        }
        Ok(outcome)
    }

    async fn cancel_outer(
        &self,
        order_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
        expected_status: Option<OrderStatus>,
    ) -> Result<(FinalizeOutcome, bool), SettlementError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderStore::load_for_update(&mut tx, order_id).await?;

        check_expectation(&order, expected_status)?;
        validate(order.status, OrderStatus::Cancelled, actor.kind)?;

        let (outcome, refunded) = self
            .cancel_inner(&mut tx, order, actor, reason, OrderStatus::Cancelled)
            .await?;
        tx.commit().await?;
        Ok((outcome, refunded))
    }

    /// Shared cancellation/expiry tail. The caller has validated the edge
    /// and holds the row lock. Returns whether an escrow refund happened.
    async fn cancel_inner(
        &self,
        tx: &mut PgConnection,
        order: Order,
        actor: &Actor,
        reason: Option<String>,
        final_status: OrderStatus,
    ) -> Result<(FinalizeOutcome, bool), SettlementError> {
        let mut patch = OrderPatch::status(final_status);
        patch.cancelled_by = Some(actor.kind);
        patch.cancellation_reason = reason.clone();

        let mut refund_hash = None;
        let refunded = match order.escrow_debited() {
            Some((funder, amount)) => {
                BalanceBook::credit(&mut *tx, &funder, amount).await?;
                BalanceBook::record_entry(
                    &mut *tx,
                    &NewLedgerEntry {
                        related_order_id: Some(order.id),
                        entry_type: LedgerEntryType::EscrowRefund,
                        amount,
                        currency: order.crypto_currency.clone(),
                        debited: None,
                        credited: Some(funder.clone()),
                    },
                )
                .await?;
                refund_hash = Some(derived_refund_hash(order.id));
                patch.refund_tx_hash = refund_hash.clone();
                tracing::info!(
                    order_id = %order.id,
                    funder = %funder,
                    %amount,
                    "escrow refunded to original funder"
                );
                true
            }
            None => {
                if restore_liquidity_on_exit(order.status, final_status) {
                    BalanceBook::restore_offer_liquidity(
                        &mut *tx,
                        &order.offer_id,
                        order.crypto_amount,
                    )
                    .await?;
                }
                false
            }
        };

        let (post, notification) = self
            .finish_transition(
                tx,
                &order,
                patch,
                actor,
                serde_json::json!({ "reason": reason }),
                refund_hash,
            )
            .await?;

        Ok((
            FinalizeOutcome {
                order: post,
                notifications: vec![notification],
            },
            refunded,
        ))
    }

    /// General transition for the non-monetary edges. Cancellation and
    /// expiry delegate to the refund-aware tail; completion of a locked
    /// escrow without a release hash is rejected outright.
    pub async fn patch_status(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        actor: &Actor,
        metadata: Value,
        acceptor_wallet: Option<String>,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let (outcome, refunded) = self
            .bounded(self.patch_status_inner(order_id, to, actor, metadata, acceptor_wallet))
            .await?;

        if refunded {
            verifier::verify_refund(&self.pool, order_id, to, outcome.order.order_version).await?;
        }
        Ok(outcome)
    }

    async fn patch_status_inner(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        actor: &Actor,
        metadata: Value,
        acceptor_wallet: Option<String>,
    ) -> Result<(FinalizeOutcome, bool), SettlementError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderStore::load_for_update(&mut tx, order_id).await?;

        // Terminal orders stay frozen; everything else is idempotent on a
        // same-status replay.
        if order.status.is_terminal() {
            return Err(crate::order::status::TransitionDenied::Terminal(order.status).into());
        }
        if order.status == to {
            return Ok((
                FinalizeOutcome {
                    order,
                    notifications: vec![],
                },
                false,
            ));
        }

        validate(order.status, to, actor.kind)?;

        if matches!(to, OrderStatus::Cancelled | OrderStatus::Expired) {
            let reason = metadata
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            let (outcome, refunded) = self.cancel_inner(&mut tx, order, actor, reason, to).await?;
            tx.commit().await?;
            return Ok((outcome, refunded));
        }

        if to == OrderStatus::Completed
            && order.has_escrow()
            && order.release_tx_hash.is_none()
        {
            return Err(SettlementError::CannotCompleteWithoutRelease);
        }

        let mut patch = OrderPatch::status(to);
        if let Some((merchant_id, buyer_merchant_id)) = reassignment(&order, actor, to) {
            patch.merchant_id = merchant_id;
            patch.buyer_merchant_id = buyer_merchant_id;
            patch.acceptor_wallet_address = acceptor_wallet;
        }
        if matches!(to, OrderStatus::Accepted | OrderStatus::PaymentPending) {
            patch.expires_at = Some(Utc::now() + ESCROW_DEADLINE);
        }

        let (post, notification) = self
            .finish_transition(&mut tx, &order, patch, actor, metadata, None)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %order_id,
            actor = %actor,
            from = %order.status,
            %to,
            "order status changed"
        );
        Ok((
            FinalizeOutcome {
                order: post,
                notifications: vec![notification],
            },
            false,
        ))
    }

    /// Grant one deadline extension, capped at `max_extensions`.
    pub async fn extend_expiry(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<FinalizeOutcome, SettlementError> {
        self.bounded(self.extend_expiry_inner(order_id, actor)).await
    }

    async fn extend_expiry_inner(
        &self,
        order_id: Uuid,
        actor: &Actor,
    ) -> Result<FinalizeOutcome, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderStore::load_for_update(&mut tx, order_id).await?;

        if order.status.is_terminal() {
            return Err(crate::order::status::TransitionDenied::Terminal(order.status).into());
        }
        if order.extension_count >= order.max_extensions {
            return Err(SettlementError::Validation(format!(
                "extension limit reached ({}/{})",
                order.extension_count, order.max_extensions
            )));
        }

        let base = order.expires_at.unwrap_or_else(Utc::now).max(Utc::now());
        let mut patch = OrderPatch::default();
        patch.expires_at = Some(base + EXTENSION_STEP);
        patch.extension_count = Some(order.extension_count + 1);

        let post = OrderStore::apply(&mut tx, order.id, order.order_version, &patch).await?;

        EventLog::append(
            &mut tx,
            &NewOrderEvent {
                order_id: order.id,
                event_type: "expiry_extended".to_string(),
                actor_type: actor.kind,
                actor_id: actor.id.clone(),
                old_status: order.status,
                new_status: order.status,
                metadata: serde_json::json!({
                    "extension_count": post.extension_count,
                    "expires_at": post.expires_at,
                }),
            },
        )
        .await?;

        let payload = NotificationPayload::from_order(&post, order.status, None);
        let notification =
            Outbox::enqueue(&mut tx, order.id, "ORDER_EXPIRY_EXTENDED", &payload).await?;
        tx.commit().await?;

        tracing::info!(
            %order_id,
            extension_count = post.extension_count,
            "order deadline extended"
        );
        Ok(FinalizeOutcome {
            order: post,
            notifications: vec![notification],
        })
    }

    /// Common tail of every transition: apply the patch, append the event,
    /// enqueue the outbox row. All inside the caller's transaction.
    async fn finish_transition(
        &self,
        tx: &mut PgConnection,
        order: &Order,
        patch: OrderPatch,
        actor: &Actor,
        metadata: Value,
        payload_tx_hash: Option<String>,
    ) -> Result<(Order, OutboxRow), SettlementError> {
        let to = patch.status.expect("finish_transition requires a status");
        let post = OrderStore::apply(&mut *tx, order.id, order.order_version, &patch).await?;

        EventLog::append(
            &mut *tx,
            &NewOrderEvent {
                order_id: order.id,
                event_type: to.event_type(),
                actor_type: actor.kind,
                actor_id: actor.id.clone(),
                old_status: order.status,
                new_status: to,
                metadata,
            },
        )
        .await?;

        let payload = NotificationPayload::from_order(&post, order.status, payload_tx_hash);
        let notification =
            Outbox::enqueue(&mut *tx, order.id, &to.outbox_event_type(), &payload).await?;

        Ok((post, notification))
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, SettlementError>>,
    ) -> Result<T, SettlementError> {
        match timeout(self.tx_budget, fut).await {
            Ok(result) => result,
            // The transaction is dropped unfinished and rolls back.
            Err(_) => Err(SettlementError::Timeout),
        }
    }
}

/// Mock-mode escrow funder: the acting user or merchant.
fn escrow_funder(actor: &Actor) -> Result<EntityRef, SettlementError> {
    match actor.kind {
        ActorType::User => Ok(EntityRef::new(EntityKind::User, actor.id.clone())),
        ActorType::Merchant => Ok(EntityRef::new(EntityKind::Merchant, actor.id.clone())),
        ActorType::System | ActorType::Compliance => Err(SettlementError::Validation(
            "escrow must be funded by a user or merchant".to_string(),
        )),
    }
}

fn check_expectation(
    order: &Order,
    expected_status: Option<OrderStatus>,
) -> Result<(), SettlementError> {
    match expected_status {
        Some(expected) if expected != order.status => Err(SettlementError::StatusChanged {
            expected,
            actual: order.status,
        }),
        _ => Ok(()),
    }
}

/// Mock refunds have no on-chain transaction; derive a stable marker.
fn derived_refund_hash(order_id: Uuid) -> String {
    format!("refund-{order_id}")
}

/// Merchant reassignment on accept. Returns `(merchant_id, buyer_merchant_id)`
/// patch fields, or `None` when no reassignment applies.
///
/// First-accept from `pending` reassigns ownership to the accepting
/// merchant. A later acceptance (merchant-to-merchant, from `escrowed`)
/// fills the vacant buyer-merchant slot, or reassigns ownership when the
/// slot is taken.
fn reassignment(
    order: &Order,
    actor: &Actor,
    to: OrderStatus,
) -> Option<(Option<String>, Option<String>)> {
    if actor.kind != ActorType::Merchant || to != OrderStatus::Accepted {
        return None;
    }
    if actor.id == order.merchant_id {
        return None;
    }
    match order.status {
        OrderStatus::Pending => Some((Some(actor.id.clone()), None)),
        OrderStatus::Escrowed => match order.buyer_merchant_id {
            None => Some((None, Some(actor.id.clone()))),
            Some(_) => Some((Some(actor.id.clone()), None)),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::models::{PaymentMethod, Side};

    fn order_with(status: OrderStatus, merchant_id: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_number: 7,
            user_id: "u-1".into(),
            merchant_id: merchant_id.into(),
            buyer_merchant_id: None,
            offer_id: "offer-1".into(),
            side: Side::Buy,
            payment_method: PaymentMethod::Bank,
            crypto_amount: Decimal::new(100, 0),
            crypto_currency: "USDC".into(),
            fiat_amount: Decimal::new(9000, 0),
            fiat_currency: "INR".into(),
            rate: Decimal::new(90, 0),
            platform_fee: Decimal::ZERO,
            network_fee: Decimal::ZERO,
            status,
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
    fn test_escrow_funder_follows_actor_kind() {
        let merchant = escrow_funder(&Actor::merchant("m-1")).unwrap();
        assert_eq!(merchant, EntityRef::merchant("m-1"));
        let user = escrow_funder(&Actor::user("u-1")).unwrap();
        assert_eq!(user, EntityRef::user("u-1"));
        assert!(escrow_funder(&Actor::system()).is_err());
    }

    #[test]
    fn test_check_expectation() {
        let order = order_with(OrderStatus::Escrowed, "m-1");
        assert!(check_expectation(&order, None).is_ok());
        assert!(check_expectation(&order, Some(OrderStatus::Escrowed)).is_ok());
        let err = check_expectation(&order, Some(OrderStatus::PaymentSent)).unwrap_err();
        assert_eq!(err.code(), "STATUS_CHANGED");
    }

    #[test]
    fn test_reassignment_first_accept() {
        let order = order_with(OrderStatus::Pending, "m-1");
        let patch = reassignment(&order, &Actor::merchant("m-2"), OrderStatus::Accepted);
        assert_eq!(patch, Some((Some("m-2".into()), None)));
    }

    #[test]
    fn test_reassignment_m2m_fills_vacant_buyer_slot() {
        let order = order_with(OrderStatus::Escrowed, "m-1");
        let patch = reassignment(&order, &Actor::merchant("m-2"), OrderStatus::Accepted);
        assert_eq!(patch, Some((None, Some("m-2".into()))));
    }

    #[test]
    fn test_reassignment_m2m_taken_slot_reassigns_owner() {
        let mut order = order_with(OrderStatus::Escrowed, "m-1");
        order.buyer_merchant_id = Some("m-3".into());
        let patch = reassignment(&order, &Actor::merchant("m-2"), OrderStatus::Accepted);
        assert_eq!(patch, Some((Some("m-2".into()), None)));
    }

    #[test]
    fn test_reassignment_skips_owner_and_non_merchants() {
        let order = order_with(OrderStatus::Pending, "m-1");
        assert!(reassignment(&order, &Actor::merchant("m-1"), OrderStatus::Accepted).is_none());
        assert!(reassignment(&order, &Actor::user("u-1"), OrderStatus::Accepted).is_none());
        assert!(reassignment(&order, &Actor::merchant("m-2"), OrderStatus::PaymentSent).is_none());
    }

    #[test]
    fn test_derived_refund_hash_is_stable() {
        let id = Uuid::nil();
        assert_eq!(derived_refund_hash(id), format!("refund-{id}"));
    }
}
