//! Order Lifecycle State Machine
//!
//! The single authority on which status transitions are allowed and which
//! actors may invoke each edge. Also owns the mapping between the 12-value
//! internal status alphabet and the 8-value public surface.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Internal order status - the state-machine alphabet.
///
/// Stored in PostgreSQL as snake_case text. Transient statuses
/// (ESCROW_PENDING, PAYMENT_PENDING, PAYMENT_CONFIRMED, RELEASING) are
/// brief intermediaries and are never writable through the public surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    EscrowPending,
    Escrowed,
    PaymentPending,
    PaymentSent,
    PaymentConfirmed,
    Releasing,
    Completed,
    Cancelled,
    Disputed,
    Expired,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::EscrowPending,
        OrderStatus::Escrowed,
        OrderStatus::PaymentPending,
        OrderStatus::PaymentSent,
        OrderStatus::PaymentConfirmed,
        OrderStatus::Releasing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Disputed,
        OrderStatus::Expired,
    ];

    /// Terminal statuses never change afterwards.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// Transient statuses are internal intermediaries, rejected on public writes.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderStatus::EscrowPending
                | OrderStatus::PaymentPending
                | OrderStatus::PaymentConfirmed
                | OrderStatus::Releasing
        )
    }

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::EscrowPending => "escrow_pending",
            OrderStatus::Escrowed => "escrowed",
            OrderStatus::PaymentPending => "payment_pending",
            OrderStatus::PaymentSent => "payment_sent",
            OrderStatus::PaymentConfirmed => "payment_confirmed",
            OrderStatus::Releasing => "releasing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Disputed => "disputed",
            OrderStatus::Expired => "expired",
        }
    }

    /// Event type recorded in the event log for a transition into this status.
    pub fn event_type(&self) -> String {
        format!("status_changed_to_{}", self.as_str())
    }

    /// Outbox event type for a transition into this status (`ORDER_<STATUS>`).
    pub fn outbox_event_type(&self) -> String {
        format!("ORDER_{}", self.as_str().to_uppercase())
    }

    /// Collapse to the 8-value public surface.
    pub fn public(&self) -> PublicStatus {
        match self {
            OrderStatus::Pending => PublicStatus::Open,
            OrderStatus::Accepted | OrderStatus::EscrowPending => PublicStatus::Accepted,
            OrderStatus::Escrowed | OrderStatus::PaymentPending => PublicStatus::Escrowed,
            OrderStatus::PaymentSent | OrderStatus::PaymentConfirmed => PublicStatus::PaymentSent,
            OrderStatus::Releasing | OrderStatus::Completed => PublicStatus::Completed,
            OrderStatus::Cancelled => PublicStatus::Cancelled,
            OrderStatus::Disputed => PublicStatus::Disputed,
            OrderStatus::Expired => PublicStatus::Expired,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Public order status - what consumers see.
///
/// Writes in this enum are denormalized to a canonical internal status;
/// transient internal statuses are unreachable through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Open,
    Accepted,
    Escrowed,
    PaymentSent,
    Completed,
    Cancelled,
    Disputed,
    Expired,
}

impl PublicStatus {
    pub const ALL: [PublicStatus; 8] = [
        PublicStatus::Open,
        PublicStatus::Accepted,
        PublicStatus::Escrowed,
        PublicStatus::PaymentSent,
        PublicStatus::Completed,
        PublicStatus::Cancelled,
        PublicStatus::Disputed,
        PublicStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicStatus::Open => "open",
            PublicStatus::Accepted => "accepted",
            PublicStatus::Escrowed => "escrowed",
            PublicStatus::PaymentSent => "payment_sent",
            PublicStatus::Completed => "completed",
            PublicStatus::Cancelled => "cancelled",
            PublicStatus::Disputed => "disputed",
            PublicStatus::Expired => "expired",
        }
    }

    /// All internal statuses that collapse onto this public value.
    /// Used to expand query filters.
    pub fn expand(&self) -> &'static [OrderStatus] {
        match self {
            PublicStatus::Open => &[OrderStatus::Pending],
            PublicStatus::Accepted => &[OrderStatus::Accepted, OrderStatus::EscrowPending],
            PublicStatus::Escrowed => &[OrderStatus::Escrowed, OrderStatus::PaymentPending],
            PublicStatus::PaymentSent => {
                &[OrderStatus::PaymentSent, OrderStatus::PaymentConfirmed]
            }
            PublicStatus::Completed => &[OrderStatus::Releasing, OrderStatus::Completed],
            PublicStatus::Cancelled => &[OrderStatus::Cancelled],
            PublicStatus::Disputed => &[OrderStatus::Disputed],
            PublicStatus::Expired => &[OrderStatus::Expired],
        }
    }

    /// Canonical write-back: the preferred internal status for a public
    /// write. Never yields a transient status.
    pub fn canonical(&self) -> OrderStatus {
        match self {
            PublicStatus::Open => OrderStatus::Pending,
            PublicStatus::Accepted => OrderStatus::Accepted,
            PublicStatus::Escrowed => OrderStatus::Escrowed,
            PublicStatus::PaymentSent => OrderStatus::PaymentSent,
            PublicStatus::Completed => OrderStatus::Completed,
            PublicStatus::Cancelled => OrderStatus::Cancelled,
            PublicStatus::Disputed => OrderStatus::Disputed,
            PublicStatus::Expired => OrderStatus::Expired,
        }
    }
}

impl fmt::Display for PublicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PublicStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicStatus::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Actor kind initiating a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Merchant,
    System,
    Compliance,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Merchant => "merchant",
            ActorType::System => "system",
            ActorType::Compliance => "compliance",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "merchant" => Ok(ActorType::Merchant),
            "system" => Ok(ActorType::System),
            "compliance" => Ok(ActorType::Compliance),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

use ActorType::{Compliance, Merchant, System, User};
use OrderStatus::*;

/// The full transition table: (from, to, allowed actors).
///
/// Compliance rides the system edges for dispute arbitration; everything
/// else is exactly one row per permitted edge.
static TRANSITIONS: &[(OrderStatus, OrderStatus, &[ActorType])] = &[
    (Pending, Accepted, &[Merchant]),
    (Pending, Escrowed, &[User, Merchant, System]),
    (Pending, Cancelled, &[User, Merchant, System]),
    (Pending, Expired, &[System]),
    (Accepted, EscrowPending, &[Merchant, System]),
    (Accepted, Escrowed, &[User, Merchant, System]),
    (Accepted, PaymentPending, &[Merchant]),
    (Accepted, PaymentSent, &[Merchant]),
    (Accepted, Cancelled, &[User, Merchant, System]),
    (Accepted, Expired, &[System]),
    (EscrowPending, Escrowed, &[System]),
    (EscrowPending, Cancelled, &[System]),
    (EscrowPending, Expired, &[System]),
    (Escrowed, Accepted, &[Merchant]),
    (Escrowed, PaymentPending, &[User, Merchant, System]),
    (Escrowed, PaymentSent, &[User, Merchant]),
    (Escrowed, Completed, &[User, Merchant, System]),
    (Escrowed, Cancelled, &[User, Merchant, System]),
    (Escrowed, Disputed, &[User, Merchant]),
    (Escrowed, Expired, &[System]),
    (PaymentPending, PaymentSent, &[User, Merchant]),
    (PaymentPending, Cancelled, &[User, Merchant, System]),
    (PaymentPending, Disputed, &[User, Merchant]),
    (PaymentPending, Expired, &[System]),
    (PaymentSent, PaymentConfirmed, &[User, Merchant]),
    (PaymentSent, Completed, &[User, Merchant, System]),
    (PaymentSent, Disputed, &[User, Merchant]),
    (PaymentSent, Expired, &[System]),
    (PaymentConfirmed, Releasing, &[System]),
    (PaymentConfirmed, Completed, &[User, Merchant, System]),
    (PaymentConfirmed, Disputed, &[User, Merchant]),
    (Releasing, Completed, &[System]),
    (Releasing, Disputed, &[User, Merchant]),
    (Disputed, Completed, &[System, Compliance]),
    (Disputed, Cancelled, &[System, Compliance]),
];

static EDGES: Lazy<FxHashMap<(OrderStatus, OrderStatus), &'static [ActorType]>> =
    Lazy::new(|| {
        let mut map = FxHashMap::default();
        for (from, to, actors) in TRANSITIONS {
            map.insert((*from, *to), *actors);
        }
        map
    });

/// Reason a transition was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionDenied {
    #[error("order is already {0}")]
    NoOp(OrderStatus),

    #[error("order is {0}, a terminal status")]
    Terminal(OrderStatus),

    #[error("transition {from} -> {to} does not exist")]
    UnknownEdge { from: OrderStatus, to: OrderStatus },

    #[error("{actor} may not move an order from {from} to {to}")]
    ActorNotAllowed {
        from: OrderStatus,
        to: OrderStatus,
        actor: ActorType,
    },
}

/// Validate a status transition for the given actor kind.
///
/// Pure decision function: same-status is a no-op, terminal statuses are
/// frozen, and the edge must exist in the table with the actor allowed.
pub fn validate(
    from: OrderStatus,
    to: OrderStatus,
    actor: ActorType,
) -> Result<(), TransitionDenied> {
    if from == to {
        return Err(TransitionDenied::NoOp(from));
    }
    if from.is_terminal() {
        return Err(TransitionDenied::Terminal(from));
    }
    match EDGES.get(&(from, to)) {
        None => Err(TransitionDenied::UnknownEdge { from, to }),
        Some(actors) if !actors.contains(&actor) => {
            Err(TransitionDenied::ActorNotAllowed { from, to, actor })
        }
        Some(_) => Ok(()),
    }
}

/// True when exiting `from` into `to` should re-increment the originating
/// offer's available amount. Escrow-locked exits are excluded; their refund
/// is handled by the finalization engine instead.
pub fn restore_liquidity_on_exit(from: OrderStatus, to: OrderStatus) -> bool {
    matches!(to, Cancelled | Expired) && matches!(from, Pending | Accepted | EscrowPending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Expired.is_terminal());
        for s in [
            Pending,
            Accepted,
            EscrowPending,
            Escrowed,
            PaymentPending,
            PaymentSent,
            PaymentConfirmed,
            Releasing,
            Disputed,
        ] {
            assert!(!s.is_terminal(), "{s} must not be terminal");
        }
    }

    #[test]
    fn test_transient_classification() {
        for s in [EscrowPending, PaymentPending, PaymentConfirmed, Releasing] {
            assert!(s.is_transient(), "{s} must be transient");
        }
        for s in [
            Pending, Accepted, Escrowed, PaymentSent, Completed, Cancelled, Disputed, Expired,
        ] {
            assert!(!s.is_transient(), "{s} must not be transient");
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        for s in OrderStatus::ALL {
            assert_eq!(
                validate(s, s, ActorType::System),
                Err(TransitionDenied::NoOp(s))
            );
        }
    }

    #[test]
    fn test_terminal_statuses_frozen() {
        for from in [Completed, Cancelled, Expired] {
            for to in OrderStatus::ALL {
                if from == to {
                    continue;
                }
                assert_eq!(
                    validate(from, to, ActorType::System),
                    Err(TransitionDenied::Terminal(from)),
                    "{from} -> {to} must be denied as terminal"
                );
            }
        }
    }

    #[test]
    fn test_allowed_edges() {
        assert!(validate(Pending, Accepted, ActorType::Merchant).is_ok());
        assert!(validate(Pending, Escrowed, ActorType::User).is_ok());
        assert!(validate(Accepted, PaymentSent, ActorType::Merchant).is_ok());
        assert!(validate(Escrowed, PaymentSent, ActorType::User).is_ok());
        assert!(validate(Escrowed, Accepted, ActorType::Merchant).is_ok());
        assert!(validate(PaymentSent, Completed, ActorType::System).is_ok());
        assert!(validate(PaymentConfirmed, Releasing, ActorType::System).is_ok());
        assert!(validate(Releasing, Completed, ActorType::System).is_ok());
        assert!(validate(Disputed, Cancelled, ActorType::Compliance).is_ok());
        assert!(validate(Disputed, Completed, ActorType::System).is_ok());
    }

    #[test]
    fn test_actor_authorization() {
        // Only merchants may accept a pending order.
        assert_eq!(
            validate(Pending, Accepted, ActorType::User),
            Err(TransitionDenied::ActorNotAllowed {
                from: Pending,
                to: Accepted,
                actor: ActorType::User
            })
        );
        // Expiry is system-only.
        assert!(matches!(
            validate(Escrowed, Expired, ActorType::Merchant),
            Err(TransitionDenied::ActorNotAllowed { .. })
        ));
        // Dispute resolution is system/compliance-only.
        assert!(matches!(
            validate(Disputed, Completed, ActorType::User),
            Err(TransitionDenied::ActorNotAllowed { .. })
        ));
        // Users cannot send an order back to accepted.
        assert!(matches!(
            validate(Escrowed, Accepted, ActorType::User),
            Err(TransitionDenied::ActorNotAllowed { .. })
        ));
    }

    #[test]
    fn test_unknown_edges_denied() {
        assert_eq!(
            validate(Pending, Completed, ActorType::System),
            Err(TransitionDenied::UnknownEdge {
                from: Pending,
                to: Completed
            })
        );
        assert!(matches!(
            validate(Disputed, Expired, ActorType::System),
            Err(TransitionDenied::UnknownEdge { .. })
        ));
        assert!(matches!(
            validate(Releasing, Cancelled, ActorType::System),
            Err(TransitionDenied::UnknownEdge { .. })
        ));
    }

    #[test]
    fn test_restore_liquidity_on_exit() {
        assert!(restore_liquidity_on_exit(Pending, Cancelled));
        assert!(restore_liquidity_on_exit(Pending, Expired));
        assert!(restore_liquidity_on_exit(Accepted, Cancelled));
        assert!(restore_liquidity_on_exit(EscrowPending, Expired));

        // Escrow-locked exits are refunded by the engine, not the offer book.
        assert!(!restore_liquidity_on_exit(Escrowed, Cancelled));
        assert!(!restore_liquidity_on_exit(PaymentSent, Expired));
        assert!(!restore_liquidity_on_exit(Disputed, Cancelled));
        // Non-exit edges never restore.
        assert!(!restore_liquidity_on_exit(Pending, Accepted));
        assert!(!restore_liquidity_on_exit(Escrowed, Completed));
    }

    #[test]
    fn test_public_mapping() {
        assert_eq!(Pending.public(), PublicStatus::Open);
        assert_eq!(Accepted.public(), PublicStatus::Accepted);
        assert_eq!(EscrowPending.public(), PublicStatus::Accepted);
        assert_eq!(Escrowed.public(), PublicStatus::Escrowed);
        assert_eq!(PaymentPending.public(), PublicStatus::Escrowed);
        assert_eq!(PaymentSent.public(), PublicStatus::PaymentSent);
        assert_eq!(PaymentConfirmed.public(), PublicStatus::PaymentSent);
        assert_eq!(Releasing.public(), PublicStatus::Completed);
        assert_eq!(Completed.public(), PublicStatus::Completed);
        assert_eq!(Cancelled.public(), PublicStatus::Cancelled);
        assert_eq!(Disputed.public(), PublicStatus::Disputed);
        assert_eq!(Expired.public(), PublicStatus::Expired);
    }

    #[test]
    fn test_expand_covers_every_internal_status_once() {
        let mut seen = Vec::new();
        for p in PublicStatus::ALL {
            for s in p.expand() {
                assert_eq!(s.public(), p, "{s} must expand back to {p}");
                seen.push(*s);
            }
        }
        seen.sort_by_key(|s| s.as_str());
        let mut all: Vec<_> = OrderStatus::ALL.to_vec();
        all.sort_by_key(|s| s.as_str());
        assert_eq!(seen, all);
    }

    #[test]
    fn test_canonical_never_transient() {
        for p in PublicStatus::ALL {
            assert!(!p.canonical().is_transient());
            assert_eq!(p.canonical().public(), p);
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in OrderStatus::ALL {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), s);
        }
        for p in PublicStatus::ALL {
            assert_eq!(p.as_str().parse::<PublicStatus>().unwrap(), p);
        }
        assert!("escrow_pending".parse::<PublicStatus>().is_err());
        assert!("releasing".parse::<PublicStatus>().is_err());
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(Completed.event_type(), "status_changed_to_completed");
        assert_eq!(Escrowed.outbox_event_type(), "ORDER_ESCROWED");
        assert_eq!(PaymentSent.outbox_event_type(), "ORDER_PAYMENT_SENT");
    }

    #[test]
    fn test_actor_type_roundtrip() {
        for a in [
            ActorType::User,
            ActorType::Merchant,
            ActorType::System,
            ActorType::Compliance,
        ] {
            assert_eq!(a.as_str().parse::<ActorType>().unwrap(), a);
        }
        assert!("admin".parse::<ActorType>().is_err());
    }
}
