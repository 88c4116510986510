//! Domain types for the order pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order lifecycle states.
///
/// `Finalized` and `Failed` are terminal: once an order reaches either,
/// its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Reserved,
    Paid,
    Finalized,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Reserved => "reserved",
            OrderStatus::Paid => "paid",
            OrderStatus::Finalized => "finalized",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderStatus::Created),
            "reserved" => Some(OrderStatus::Reserved),
            "paid" => Some(OrderStatus::Paid),
            "finalized" => Some(OrderStatus::Finalized),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Finalized | OrderStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Caller-supplied idempotency key: re-ingesting the same reference
    /// replaces the order's items and total, never duplicates the order.
    pub external_ref: String,
    pub customer_id: i64,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One line of an order: product, quantity, unit price at time of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub price_cents: i64,
}

/// Product stock ledger row.
///
/// `reserved` counts units held by unfulfilled orders; available-to-reserve
/// is `stock - reserved`. The invariant `0 <= reserved <= stock` holds
/// whenever no reservation is mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub stock: i64,
    pub reserved: i64,
}

impl Product {
    pub fn available(&self) -> i64 {
        self.stock - self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundType {
    Full,
    Partial,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundType::Full => "full",
            RefundType::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(RefundType::Full),
            "partial" => Some(RefundType::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Processed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processed => "processed",
            RefundStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RefundStatus::Pending),
            "processed" => Some(RefundStatus::Processed),
            "failed" => Some(RefundStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub order_id: i64,
    /// Idempotency key: exactly one logical refund exists per reference,
    /// regardless of how many times the execution task is delivered.
    pub refund_reference: String,
    pub amount_cents: i64,
    /// Derived from cumulative refunded amount vs. order total, not asserted
    /// by the caller.
    pub refund_type: RefundType,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Generate a system refund reference for callers that did not supply one.
pub fn generate_refund_reference(order_id: i64, amount_cents: i64) -> String {
    format!("refund_{order_id}_{amount_cents}_{}", Utc::now().timestamp())
}
