//! Order Store
//!
//! Single-writer persistence for order rows. Mutating paths load the row
//! with `SELECT ... FOR UPDATE` inside the same transaction that writes,
//! every `apply` bumps `order_version` by exactly one, and the write-once
//! escrow/release fields are guarded here as a last line of defense.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use super::models::{EscrowRefs, Order, OrderPatch, PaymentMethod, Side, SpreadPreference};
use super::status::{ActorType, OrderStatus};
use crate::ledger::EntityKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("order version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i32, actual: i32 },

    #[error("escrow transaction hash is already set")]
    AlreadyEscrowed,

    #[error("release transaction hash is already set")]
    AlreadyReleased,

    #[error("order row holds an invalid {field}: {value}")]
    Corrupt { field: &'static str, value: String },
}

const ORDER_COLUMNS: &str = "id, order_number, user_id, merchant_id, buyer_merchant_id, \
    offer_id, type, payment_method, crypto_amount, crypto_currency, fiat_amount, \
    fiat_currency, rate, platform_fee, network_fee, status, order_version, \
    escrow_tx_hash, escrow_address, escrow_trade_id, escrow_trade_pda, escrow_pda, \
    escrow_creator_wallet, escrow_debited_entity_type, escrow_debited_entity_id, \
    escrow_debited_amount, release_tx_hash, refund_tx_hash, buyer_wallet_address, \
    acceptor_wallet_address, payment_details, protocol_fee_amount, \
    protocol_fee_percentage, spread_preference, extension_count, max_extensions, \
    created_at, accepted_at, escrowed_at, payment_sent_at, payment_confirmed_at, \
    completed_at, cancelled_at, expires_at, cancelled_by, cancellation_reason";

pub struct OrderStore;

impl OrderStore {
    /// Current snapshot, or `None` when the order does not exist.
    pub async fn load(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql).bind(order_id).fetch_optional(pool).await?;
        row.map(|r| row_to_order(&r)).transpose()
    }

    /// Snapshot with a row-level exclusive lock held inside `tx` until commit.
    /// Every mutating path in the core starts here.
    pub async fn load_for_update(
        tx: &mut PgConnection,
        order_id: Uuid,
    ) -> Result<Order, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?;
        match row {
            Some(r) => row_to_order(&r),
            None => Err(StoreError::NotFound(order_id)),
        }
    }

    /// Write the patch, bump `order_version`, stamp the status-dependent
    /// timestamp, and return the post-image.
    ///
    /// `expected_version` must match the locked row (the caller read it
    /// under the same lock); a mismatch means another writer slipped in and
    /// is surfaced as a version conflict.
    pub async fn apply(
        tx: &mut PgConnection,
        order_id: Uuid,
        expected_version: i32,
        patch: &OrderPatch,
    ) -> Result<Order, StoreError> {
        // The row is already locked by the caller; this read is for the
        // write-once guards and the version check.
        let current = Self::load_for_update(&mut *tx, order_id).await?;

        if current.order_version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: current.order_version,
            });
        }
        if patch.escrow_tx_hash.is_some() && current.escrow_tx_hash.is_some() {
            return Err(StoreError::AlreadyEscrowed);
        }
        if patch.release_tx_hash.is_some() && current.release_tx_hash.is_some() {
            return Err(StoreError::AlreadyReleased);
        }

        let now = Utc::now();
        let mut accepted_at = None;
        let mut escrowed_at = None;
        let mut payment_sent_at = None;
        let mut payment_confirmed_at = patch.payment_confirmed_at;
        let mut completed_at = None;
        let mut cancelled_at = None;
        match patch.status {
            Some(OrderStatus::Accepted) => accepted_at = Some(now),
            Some(OrderStatus::Escrowed) => escrowed_at = Some(now),
            Some(OrderStatus::PaymentSent) => payment_sent_at = Some(now),
            Some(OrderStatus::PaymentConfirmed) => {
                payment_confirmed_at = payment_confirmed_at.or(Some(now))
            }
            Some(OrderStatus::Completed) => completed_at = Some(now),
            Some(OrderStatus::Cancelled) | Some(OrderStatus::Expired) => {
                cancelled_at = Some(now)
            }
            _ => {}
        }

        let refs = patch.escrow_refs.clone().unwrap_or_default();
        let (debited_kind, debited_id, debited_amount) = match &patch.escrow_debited {
            Some((entity, amount)) => (
                Some(entity.kind.as_str()),
                Some(entity.id.clone()),
                Some(*amount),
            ),
            None => (None, None, None),
        };

        let sql = format!(
            r#"
            UPDATE orders SET
                status = COALESCE($3, status),
                merchant_id = COALESCE($4, merchant_id),
                buyer_merchant_id = COALESCE($5, buyer_merchant_id),
                acceptor_wallet_address = COALESCE($6, acceptor_wallet_address),
                escrow_tx_hash = COALESCE($7, escrow_tx_hash),
                escrow_address = COALESCE($8, escrow_address),
                escrow_trade_id = COALESCE($9, escrow_trade_id),
                escrow_trade_pda = COALESCE($10, escrow_trade_pda),
                escrow_pda = COALESCE($11, escrow_pda),
                escrow_creator_wallet = COALESCE($12, escrow_creator_wallet),
                escrow_debited_entity_type = COALESCE($13, escrow_debited_entity_type),
                escrow_debited_entity_id = COALESCE($14, escrow_debited_entity_id),
                escrow_debited_amount = COALESCE($15, escrow_debited_amount),
                release_tx_hash = COALESCE($16, release_tx_hash),
                refund_tx_hash = COALESCE($17, refund_tx_hash),
                expires_at = COALESCE($18, expires_at),
                extension_count = COALESCE($19, extension_count),
                cancelled_by = COALESCE($20, cancelled_by),
                cancellation_reason = COALESCE($21, cancellation_reason),
                accepted_at = COALESCE($22, accepted_at),
                escrowed_at = COALESCE($23, escrowed_at),
                payment_sent_at = COALESCE($24, payment_sent_at),
                payment_confirmed_at = COALESCE(payment_confirmed_at, $25),
                completed_at = COALESCE($26, completed_at),
                cancelled_at = COALESCE($27, cancelled_at),
                order_version = order_version + 1
            WHERE id = $1 AND order_version = $2
            RETURNING {ORDER_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(order_id)
            .bind(expected_version)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(&patch.merchant_id)
            .bind(&patch.buyer_merchant_id)
            .bind(&patch.acceptor_wallet_address)
            .bind(&patch.escrow_tx_hash)
            .bind(&refs.escrow_address)
            .bind(&refs.escrow_trade_id)
            .bind(&refs.escrow_trade_pda)
            .bind(&refs.escrow_pda)
            .bind(&refs.escrow_creator_wallet)
            .bind(debited_kind)
            .bind(debited_id)
            .bind(debited_amount)
            .bind(&patch.release_tx_hash)
            .bind(&patch.refund_tx_hash)
            .bind(patch.expires_at)
            .bind(patch.extension_count)
            .bind(patch.cancelled_by.map(|a| a.as_str()))
            .bind(&patch.cancellation_reason)
            .bind(accepted_at)
            .bind(escrowed_at)
            .bind(payment_sent_at)
            .bind(payment_confirmed_at)
            .bind(completed_at)
            .bind(cancelled_at)
            .fetch_optional(&mut *tx)
            .await?;

        match row {
            Some(r) => row_to_order(&r),
            // Guarded above under the same lock; losing here means the
            // predicate raced anyway.
            None => Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: current.order_version,
            }),
        }
    }

    /// Orders whose public status expands to the given internal set.
    pub async fn list_by_status(
        pool: &PgPool,
        statuses: &[OrderStatus],
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ANY($1) \
             ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(&names)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.iter().map(row_to_order).collect()
    }
}

pub(crate) fn parse_col<T: std::str::FromStr>(
    value: String,
    field: &'static str,
) -> Result<T, StoreError> {
    value.parse::<T>().map_err(|_| StoreError::Corrupt {
        field,
        value,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.get("status");
    let side: String = row.get("type");
    let payment_method: String = row.get("payment_method");

    let debited_kind: Option<String> = row.get("escrow_debited_entity_type");
    let debited_kind = debited_kind
        .map(|k| parse_col::<EntityKind>(k, "escrow_debited_entity_type"))
        .transpose()?;

    let spread: Option<String> = row.get("spread_preference");
    let spread = spread
        .map(|s| parse_col::<SpreadPreference>(s, "spread_preference"))
        .transpose()?;

    let cancelled_by: Option<String> = row.get("cancelled_by");
    let cancelled_by = cancelled_by
        .map(|a| parse_col::<ActorType>(a, "cancelled_by"))
        .transpose()?;

    Ok(Order {
        id: row.get("id"),
        order_number: row.get("order_number"),
        user_id: row.get("user_id"),
        merchant_id: row.get("merchant_id"),
        buyer_merchant_id: row.get("buyer_merchant_id"),
        offer_id: row.get("offer_id"),
        side: parse_col::<Side>(side, "type")?,
        payment_method: parse_col::<PaymentMethod>(payment_method, "payment_method")?,
        crypto_amount: row.get("crypto_amount"),
        crypto_currency: row.get("crypto_currency"),
        fiat_amount: row.get("fiat_amount"),
        fiat_currency: row.get("fiat_currency"),
        rate: row.get("rate"),
        platform_fee: row.get("platform_fee"),
        network_fee: row.get("network_fee"),
        status: parse_col::<OrderStatus>(status, "status")?,
        order_version: row.get("order_version"),
        escrow_tx_hash: row.get("escrow_tx_hash"),
        escrow_refs: EscrowRefs {
            escrow_address: row.get("escrow_address"),
            escrow_trade_id: row.get("escrow_trade_id"),
            escrow_trade_pda: row.get("escrow_trade_pda"),
            escrow_pda: row.get("escrow_pda"),
            escrow_creator_wallet: row.get("escrow_creator_wallet"),
        },
        escrow_debited_entity_type: debited_kind,
        escrow_debited_entity_id: row.get("escrow_debited_entity_id"),
        escrow_debited_amount: row.get::<Option<Decimal>, _>("escrow_debited_amount"),
        release_tx_hash: row.get("release_tx_hash"),
        refund_tx_hash: row.get("refund_tx_hash"),
        buyer_wallet_address: row.get("buyer_wallet_address"),
        acceptor_wallet_address: row.get("acceptor_wallet_address"),
        payment_details: row.get("payment_details"),
        protocol_fee_amount: row.get("protocol_fee_amount"),
        protocol_fee_percentage: row.get("protocol_fee_percentage"),
        spread_preference: spread,
        extension_count: row.get("extension_count"),
        max_extensions: row.get("max_extensions"),
        created_at: row.get("created_at"),
        accepted_at: row.get("accepted_at"),
        escrowed_at: row.get("escrowed_at"),
        payment_sent_at: row.get("payment_sent_at"),
        payment_confirmed_at: row.get("payment_confirmed_at"),
        completed_at: row.get("completed_at"),
        cancelled_at: row.get("cancelled_at"),
        expires_at: row.get("expires_at"),
        cancelled_by,
        cancellation_reason: row.get("cancellation_reason"),
    })
}
