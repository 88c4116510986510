//! Order intake validation
//!
//! Bulk ingestion delivers loosely-typed records (CSV-derived JSON: numbers
//! may arrive as strings, items either structured or in the legacy
//! `product_id:qty:price|...` format). Everything is converted into a typed
//! [`OrderIntake`] here, before any task touches the workflow; malformed
//! records are rejected with [`WorkflowError::InvalidIntake`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkflowError};

/// One raw record as supplied by the ingestion source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOrderRecord {
    pub external_ref: Option<String>,
    pub customer_id: Option<Value>,
    pub total_cents: Option<Value>,
    /// Either an array of item objects or a legacy-format string.
    pub items: Option<Value>,
}

/// Validated, strongly-typed order intake. This is what the per-order task
/// carries and what the store upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntake {
    pub external_ref: String,
    pub customer_id: i64,
    pub total_cents: i64,
    pub items: Vec<IntakeLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeLine {
    pub product_id: i64,
    pub quantity: i64,
    pub price_cents: i64,
}

impl OrderIntake {
    pub fn from_record(record: &RawOrderRecord) -> Result<Self> {
        let external_ref = record
            .external_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing external_ref"))?
            .to_string();

        let customer_id = coerce_i64(record.customer_id.as_ref())
            .ok_or_else(|| invalid("missing or non-numeric customer_id"))?;
        if customer_id <= 0 {
            return Err(invalid("customer_id must be positive"));
        }

        let total_cents = coerce_i64(record.total_cents.as_ref())
            .ok_or_else(|| invalid("missing or non-numeric total_cents"))?;
        if total_cents < 0 {
            return Err(invalid("total_cents must not be negative"));
        }

        let items = match record.items.as_ref() {
            Some(Value::Array(arr)) => parse_structured_items(arr)?,
            Some(Value::String(s)) => parse_legacy_items(s)?,
            Some(_) => return Err(invalid("items must be an array or a legacy string")),
            None => return Err(invalid("missing items")),
        };
        if items.is_empty() {
            return Err(invalid("order has no items"));
        }

        Ok(OrderIntake {
            external_ref,
            customer_id,
            total_cents,
            items,
        })
    }
}

fn invalid(msg: &str) -> WorkflowError {
    WorkflowError::InvalidIntake(msg.to_string())
}

/// Coerce a JSON value into i64, accepting numbers and numeric strings.
fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_structured_items(arr: &[Value]) -> Result<Vec<IntakeLine>> {
    let mut items = Vec::with_capacity(arr.len());
    for entry in arr {
        let product_id = coerce_i64(entry.get("product_id"))
            .ok_or_else(|| invalid("item missing product_id"))?;
        let quantity =
            coerce_i64(entry.get("quantity")).ok_or_else(|| invalid("item missing quantity"))?;
        // Price field name drifted between ingestion sources.
        let price_cents = coerce_i64(entry.get("unit_price_cents"))
            .or_else(|| coerce_i64(entry.get("price_cents")))
            .ok_or_else(|| invalid("item missing price_cents"))?;

        items.push(validated_line(product_id, quantity, price_cents)?);
    }
    Ok(items)
}

/// Legacy items column: `product_id:qty:price|product_id:qty:price`
fn parse_legacy_items(s: &str) -> Result<Vec<IntakeLine>> {
    let mut items = Vec::new();
    for part in s.split('|').filter(|p| !p.trim().is_empty()) {
        let fields: Vec<&str> = part.split(':').collect();
        if fields.len() != 3 {
            return Err(invalid("legacy item entry must be product_id:qty:price"));
        }
        let parse = |f: &str, what: &str| -> Result<i64> {
            f.trim()
                .parse()
                .map_err(|_| invalid(&format!("non-numeric {what} in legacy item entry")))
        };
        items.push(validated_line(
            parse(fields[0], "product_id")?,
            parse(fields[1], "quantity")?,
            parse(fields[2], "price_cents")?,
        )?);
    }
    Ok(items)
}

fn validated_line(product_id: i64, quantity: i64, price_cents: i64) -> Result<IntakeLine> {
    if product_id <= 0 {
        return Err(invalid("item product_id must be positive"));
    }
    if quantity <= 0 {
        return Err(invalid("item quantity must be positive"));
    }
    if price_cents < 0 {
        return Err(invalid("item price_cents must not be negative"));
    }
    Ok(IntakeLine {
        product_id,
        quantity,
        price_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(items: Value) -> RawOrderRecord {
        RawOrderRecord {
            external_ref: Some("ORD-1001".into()),
            customer_id: Some(json!(42)),
            total_cents: Some(json!("2999")),
            items: Some(items),
        }
    }

    #[test]
    fn structured_items_with_string_numbers() {
        let intake = OrderIntake::from_record(&record(json!([
            { "product_id": "7", "quantity": 2, "unit_price_cents": 1500 }
        ])))
        .unwrap();

        assert_eq!(intake.external_ref, "ORD-1001");
        assert_eq!(intake.customer_id, 42);
        assert_eq!(intake.total_cents, 2999);
        assert_eq!(intake.items.len(), 1);
        assert_eq!(intake.items[0].product_id, 7);
        assert_eq!(intake.items[0].quantity, 2);
        assert_eq!(intake.items[0].price_cents, 1500);
    }

    #[test]
    fn price_cents_fallback_field() {
        let intake = OrderIntake::from_record(&record(json!([
            { "product_id": 7, "quantity": 1, "price_cents": 900 }
        ])))
        .unwrap();
        assert_eq!(intake.items[0].price_cents, 900);
    }

    #[test]
    fn legacy_item_string() {
        let intake = OrderIntake::from_record(&record(json!("7:2:1500|9:1:499"))).unwrap();
        assert_eq!(intake.items.len(), 2);
        assert_eq!(intake.items[1].product_id, 9);
        assert_eq!(intake.items[1].price_cents, 499);
    }

    #[test]
    fn rejects_missing_external_ref() {
        let mut r = record(json!("7:1:100"));
        r.external_ref = Some("   ".into());
        let err = OrderIntake::from_record(&r).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidIntake(_)));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let err = OrderIntake::from_record(&record(json!("7:0:100"))).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidIntake(_)));
    }

    #[test]
    fn rejects_malformed_legacy_entry() {
        let err = OrderIntake::from_record(&record(json!("7:2"))).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidIntake(_)));
    }

    #[test]
    fn rejects_empty_items() {
        let err = OrderIntake::from_record(&record(json!([]))).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidIntake(_)));
    }
}
