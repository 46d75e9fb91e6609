//! Ledger & Balance Book
//!
//! Double-entry record of fund movements plus the balance accounts they
//! move between. Every mutation runs on the caller's transaction handle and
//! locks the account row first; the book never interprets orders, callers
//! decide which account moves.
//!
//! Lock ordering across the core is order -> balances -> offer -> platform.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

use crate::order::status::UnknownStatus;

/// Balance account owner kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Merchant,
    User,
    Platform,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Merchant => "merchant",
            EntityKind::User => "user",
            EntityKind::Platform => "platform",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merchant" => Ok(EntityKind::Merchant),
            "user" => Ok(EntityKind::User),
            "platform" => Ok(EntityKind::Platform),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Tagged reference to a balance account: (kind, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn merchant(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Merchant, id)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    /// The platform singleton account.
    pub fn platform() -> Self {
        Self::new(EntityKind::Platform, PLATFORM_KEY)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Key of the singleton `platform_balance` row.
pub const PLATFORM_KEY: &str = "main";

/// Ledger entry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    EscrowLock,
    EscrowRefund,
    EscrowRelease,
    PlatformFeeCollected,
    TradeStatsAdjust,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::EscrowLock => "escrow_lock",
            LedgerEntryType::EscrowRefund => "escrow_refund",
            LedgerEntryType::EscrowRelease => "escrow_release",
            LedgerEntryType::PlatformFeeCollected => "platform_fee_collected",
            LedgerEntryType::TradeStatsAdjust => "trade_stats_adjust",
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerEntryType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "escrow_lock" => Ok(LedgerEntryType::EscrowLock),
            "escrow_refund" => Ok(LedgerEntryType::EscrowRefund),
            "escrow_release" => Ok(LedgerEntryType::EscrowRelease),
            "platform_fee_collected" => Ok(LedgerEntryType::PlatformFeeCollected),
            "trade_stats_adjust" => Ok(LedgerEntryType::TradeStatsAdjust),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// New ledger row, appended inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub related_order_id: Option<Uuid>,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub currency: String,
    pub debited: Option<EntityRef>,
    pub credited: Option<EntityRef>,
}

/// Persisted ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub related_order_id: Option<Uuid>,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub currency: String,
    pub debited: Option<EntityRef>,
    pub credited: Option<EntityRef>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("insufficient balance on {entity}: need {needed}, have {available}")]
    InsufficientBalance {
        entity: EntityRef,
        needed: Decimal,
        available: Decimal,
    },

    #[error("balance account not found: {0}")]
    AccountNotFound(EntityRef),

    #[error("ledger amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}

fn balance_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Merchant => "merchants",
        EntityKind::User => "users",
        // Platform is keyed differently; handled explicitly below.
        EntityKind::Platform => "platform_balance",
    }
}

/// Balance account operations. All run on the caller's transaction handle
/// and take a row-level lock before reading.
pub struct BalanceBook;

impl BalanceBook {
    /// Lock the account row and return its balance.
    pub async fn lock_balance(
        tx: &mut PgConnection,
        entity: &EntityRef,
    ) -> Result<Decimal, LedgerError> {
        let row = match entity.kind {
            EntityKind::Platform => {
                sqlx::query("SELECT balance FROM platform_balance WHERE key = $1 FOR UPDATE")
                    .bind(PLATFORM_KEY)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            kind => {
                let sql = format!(
                    "SELECT balance FROM {} WHERE id = $1 FOR UPDATE",
                    balance_table(kind)
                );
                sqlx::query(&sql)
                    .bind(&entity.id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };

        row.map(|r| r.get::<Decimal, _>("balance"))
            .ok_or_else(|| LedgerError::AccountNotFound(entity.clone()))
    }

    /// Lock the account row and decrement. Non-platform accounts must hold
    /// at least `amount`.
    pub async fn debit(
        tx: &mut PgConnection,
        entity: &EntityRef,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let available = Self::lock_balance(&mut *tx, entity).await?;
        if entity.kind != EntityKind::Platform && available < amount {
            return Err(LedgerError::InsufficientBalance {
                entity: entity.clone(),
                needed: amount,
                available,
            });
        }

        Self::adjust(&mut *tx, entity, -amount).await?;
        tracing::info!(entity = %entity, %amount, "balance debited");
        Ok(())
    }

    /// Lock the account row and increment. No non-negativity check.
    pub async fn credit(
        tx: &mut PgConnection,
        entity: &EntityRef,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        Self::lock_balance(&mut *tx, entity).await?;
        Self::adjust(&mut *tx, entity, amount).await?;
        tracing::info!(entity = %entity, %amount, "balance credited");
        Ok(())
    }

    async fn adjust(
        tx: &mut PgConnection,
        entity: &EntityRef,
        delta: Decimal,
    ) -> Result<(), LedgerError> {
        match entity.kind {
            EntityKind::Platform => {
                sqlx::query(
                    "UPDATE platform_balance SET balance = balance + $1, updated_at = NOW() \
                     WHERE key = $2",
                )
                .bind(delta)
                .bind(PLATFORM_KEY)
                .execute(&mut *tx)
                .await?;
            }
            kind => {
                let sql = format!(
                    "UPDATE {} SET balance = balance + $1, updated_at = NOW() WHERE id = $2",
                    balance_table(kind)
                );
                sqlx::query(&sql)
                    .bind(delta)
                    .bind(&entity.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        Ok(())
    }

    /// Append a ledger row. Entries are immutable once written.
    pub async fn record_entry(
        tx: &mut PgConnection,
        entry: &NewLedgerEntry,
    ) -> Result<i64, LedgerError> {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO ledger_entries
                (related_order_id, entry_type, amount, currency,
                 debited_entity_type, debited_entity_id,
                 credited_entity_type, credited_entity_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id
            "#,
        )
        .bind(entry.related_order_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(entry.debited.as_ref().map(|e| e.kind.as_str()))
        .bind(entry.debited.as_ref().map(|e| e.id.as_str()))
        .bind(entry.credited.as_ref().map(|e| e.kind.as_str()))
        .bind(entry.credited.as_ref().map(|e| e.id.as_str()))
        .fetch_one(&mut *tx)
        .await?;

        Ok(id)
    }

    /// Credit the platform singleton and append the fee audit row.
    /// Locked last per the global lock ordering.
    pub async fn collect_platform_fee(
        tx: &mut PgConnection,
        order_id: Uuid,
        fee_amount: Decimal,
        fee_percentage: Option<Decimal>,
        spread_preference: Option<&str>,
    ) -> Result<(), LedgerError> {
        if fee_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(fee_amount));
        }

        let balance_after = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE platform_balance
            SET balance = balance + $1,
                total_fees_collected = total_fees_collected + $1,
                updated_at = NOW()
            WHERE key = $2
            RETURNING balance
            "#,
        )
        .bind(fee_amount)
        .bind(PLATFORM_KEY)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO platform_fee_transactions
                (order_id, fee_amount, fee_percentage, spread_preference,
                 platform_balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(order_id)
        .bind(fee_amount)
        .bind(fee_percentage)
        .bind(spread_preference)
        .bind(balance_after)
        .execute(&mut *tx)
        .await?;

        tracing::info!(%order_id, %fee_amount, %balance_after, "platform fee collected");
        Ok(())
    }

    /// Re-increment an offer's available amount after a pre-escrow exit.
    /// Locks the offer row first.
    pub async fn restore_offer_liquidity(
        tx: &mut PgConnection,
        offer_id: &str,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        sqlx::query("SELECT id FROM merchant_offers WHERE id = $1 FOR UPDATE")
            .bind(offer_id)
            .fetch_optional(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE merchant_offers SET available_amount = available_amount + $1, \
             updated_at = NOW() WHERE id = $2",
        )
        .bind(amount)
        .bind(offer_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(offer_id, "liquidity restore skipped: offer not found");
        } else {
            tracing::info!(offer_id, %amount, "offer liquidity restored");
        }
        Ok(())
    }

    /// Bump trade counters on the recipient account after a release.
    pub async fn increment_trade_stats(
        tx: &mut PgConnection,
        entity: &EntityRef,
        volume: Decimal,
    ) -> Result<(), LedgerError> {
        let table = match entity.kind {
            EntityKind::Merchant => "merchants",
            EntityKind::User => "users",
            EntityKind::Platform => return Ok(()),
        };
        let sql = format!(
            "UPDATE {table} SET total_trades = total_trades + 1, \
             total_volume = total_volume + $1, updated_at = NOW() WHERE id = $2"
        );
        sqlx::query(&sql)
            .bind(volume)
            .bind(&entity.id)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    /// Read a balance outside any transaction (reads and reconciliation).
    pub async fn fetch_balance(
        pool: &sqlx::PgPool,
        entity: &EntityRef,
    ) -> Result<Decimal, LedgerError> {
        let row = match entity.kind {
            EntityKind::Platform => {
                sqlx::query("SELECT balance FROM platform_balance WHERE key = $1")
                    .bind(PLATFORM_KEY)
                    .fetch_optional(pool)
                    .await?
            }
            kind => {
                let sql = format!("SELECT balance FROM {} WHERE id = $1", balance_table(kind));
                sqlx::query(&sql).bind(&entity.id).fetch_optional(pool).await?
            }
        };

        row.map(|r| r.get::<Decimal, _>("balance"))
            .ok_or_else(|| LedgerError::AccountNotFound(entity.clone()))
    }

    /// All ledger rows for an order, oldest first.
    pub async fn entries_for_order(
        pool: &sqlx::PgPool,
        order_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, related_order_id, entry_type, amount, currency,
                   debited_entity_type, debited_entity_id,
                   credited_entity_type, credited_entity_id, created_at
            FROM ledger_entries
            WHERE related_order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, LedgerError> {
    let entry_type: String = row.get("entry_type");
    let entry_type = entry_type
        .parse::<LedgerEntryType>()
        .map_err(|_| LedgerError::Database(sqlx::Error::Decode(entry_type.into())))?;

    let entity_at = |kind_col: &str, id_col: &str| -> Option<EntityRef> {
        let kind: Option<String> = row.get(kind_col);
        let id: Option<String> = row.get(id_col);
        match (kind.and_then(|k| k.parse::<EntityKind>().ok()), id) {
            (Some(kind), Some(id)) => Some(EntityRef::new(kind, id)),
            _ => None,
        }
    };

    Ok(LedgerEntry {
        id: row.get("id"),
        related_order_id: row.get("related_order_id"),
        entry_type,
        amount: row.get("amount"),
        currency: row.get("currency"),
        debited: entity_at("debited_entity_type", "debited_entity_id"),
        credited: entity_at("credited_entity_type", "credited_entity_id"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_roundtrip() {
        for t in [
            LedgerEntryType::EscrowLock,
            LedgerEntryType::EscrowRefund,
            LedgerEntryType::EscrowRelease,
            LedgerEntryType::PlatformFeeCollected,
            LedgerEntryType::TradeStatsAdjust,
        ] {
            assert_eq!(t.as_str().parse::<LedgerEntryType>().unwrap(), t);
        }
        assert!("escrow_burn".parse::<LedgerEntryType>().is_err());
    }

    #[test]
    fn test_entity_kind_roundtrip() {
        for k in [EntityKind::Merchant, EntityKind::User, EntityKind::Platform] {
            assert_eq!(k.as_str().parse::<EntityKind>().unwrap(), k);
        }
    }

    #[test]
    fn test_entity_ref_constructors() {
        assert_eq!(
            EntityRef::merchant("m-1"),
            EntityRef::new(EntityKind::Merchant, "m-1")
        );
        assert_eq!(EntityRef::platform().id, PLATFORM_KEY);
        assert_eq!(EntityRef::user("u-7").to_string(), "user:u-7");
    }

    #[test]
    fn test_balance_table_mapping() {
        assert_eq!(balance_table(EntityKind::Merchant), "merchants");
        assert_eq!(balance_table(EntityKind::User), "users");
        assert_eq!(balance_table(EntityKind::Platform), "platform_balance");
    }
}
