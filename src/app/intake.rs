use crate::core::scheduler::OrderScheduler;
use crate::domain::model::{ChannelMap, Column, Item, Order, Row, Slot};
use crate::utils::error::{DispenseError, Result};
use crate::utils::validation::validate_non_empty_string;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Order payload as delivered by the order-intake collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    #[serde(alias = "orderID")]
    pub order_id: String,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
    #[serde(alias = "weight")]
    pub unit_weight_g: f64,
    #[serde(alias = "volume")]
    pub unit_volume: f64,
    pub row: u8,
    pub column: u8,
}

/// Topic the machine listens on for new orders.
pub fn vend_topic(client_id: &str) -> String {
    format!("{}/order/vend", client_id)
}

/// Topic the order outcome is acknowledged on.
pub fn status_topic(client_id: &str) -> String {
    format!("{}/order/status", client_id)
}

impl OrderRequest {
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Validates every line and returns the row-scheduled order. Nothing is
    /// dispensed for a request that fails here.
    pub fn into_order(self, channels: &ChannelMap) -> Result<Order> {
        validate_non_empty_string("order_id", &self.order_id)?;
        if self.items.is_empty() {
            return Err(DispenseError::invalid_order("items", "order contains no items"));
        }

        let mut slots = HashSet::new();
        let mut skus = HashSet::new();
        let mut items = Vec::with_capacity(self.items.len());
        for (index, line) in self.items.into_iter().enumerate() {
            let field = |name: &str| format!("items[{}].{}", index, name);

            validate_non_empty_string(&field("sku"), &line.sku)?;
            if line.quantity == 0 {
                return Err(DispenseError::invalid_order(field("quantity"), "must be at least 1"));
            }
            if !(line.unit_weight_g.is_finite() && line.unit_weight_g > 0.0) {
                return Err(DispenseError::invalid_order(
                    field("unit_weight_g"),
                    format!("must be positive, got {}", line.unit_weight_g),
                ));
            }
            if !(line.unit_volume.is_finite() && line.unit_volume > 0.0) {
                return Err(DispenseError::invalid_order(
                    field("unit_volume"),
                    format!("must be positive, got {}", line.unit_volume),
                ));
            }

            let (Some(row), Some(column)) = (Row::new(line.row), Column::new(line.column)) else {
                return Err(DispenseError::invalid_order(
                    field("row"),
                    format!("row {} / column {} must both be at least 1", line.row, line.column),
                ));
            };
            let slot = Slot { row, column };
            let channel = channels.channel(slot).ok_or_else(|| {
                DispenseError::invalid_order(
                    field("row"),
                    format!(
                        "{} is outside the {}x{} machine",
                        slot,
                        channels.rows(),
                        channels.columns()
                    ),
                )
            })?;
            if !slots.insert(slot) {
                return Err(DispenseError::invalid_order(
                    field("column"),
                    format!("{} appears more than once", slot),
                ));
            }
            if !skus.insert(line.sku.clone()) {
                return Err(DispenseError::invalid_order(
                    field("sku"),
                    format!("{} appears more than once", line.sku),
                ));
            }

            items.push(Item {
                sku: line.sku,
                remaining: line.quantity,
                unit_weight_g: line.unit_weight_g,
                unit_volume: line.unit_volume,
                slot,
                channel,
            });
        }

        Ok(Order::new(self.order_id, OrderScheduler::schedule(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Channel;

    fn channels() -> ChannelMap {
        ChannelMap::from_table(&[vec![0, 3], vec![1, 4], vec![2, 5]]).unwrap()
    }

    fn payload(items: serde_json::Value) -> OrderRequest {
        serde_json::from_value(serde_json::json!({ "order_id": "o-17", "items": items })).unwrap()
    }

    #[test]
    fn test_valid_request_becomes_scheduled_order() {
        let request = payload(serde_json::json!([
            {"sku": "skittles", "quantity": 1, "unit_weight_g": 61.5, "unit_volume": 34.8, "row": 2, "column": 1},
            {"sku": "cheetos", "quantity": 2, "unit_weight_g": 99.2, "unit_volume": 1840.1, "row": 1, "column": 1},
            {"sku": "hershey", "quantity": 1, "unit_weight_g": 45.0, "unit_volume": 46.5, "row": 1, "column": 2}
        ]));

        let order = request.into_order(&channels()).unwrap();
        assert_eq!(order.id(), "o-17");
        assert_eq!(order.remaining_units(), 4);

        let groups: Vec<_> = order.groups().collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].row.get(), 1);
        assert_eq!(groups[0].items[0].sku, "cheetos");
        assert_eq!(groups[0].items[0].channel, Channel(0));
        assert_eq!(groups[0].items[1].channel, Channel(3));
        assert_eq!(groups[1].items[0].channel, Channel(1));
    }

    #[test]
    fn test_legacy_field_names_are_accepted() {
        let request = OrderRequest::from_json(
            br#"{"orderID": "abc", "items": [{"sku": "x", "quantity": 1, "weight": 10.0, "volume": 5.0, "row": 3, "column": 2}]}"#,
        )
        .unwrap();
        let order = request.into_order(&channels()).unwrap();
        assert_eq!(order.current_group().unwrap().items[0].channel, Channel(5));
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let cases = [
            serde_json::json!([{"sku": "x", "quantity": 0, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": 1, "column": 1}]),
            serde_json::json!([{"sku": "x", "quantity": 1, "unit_weight_g": 0.0, "unit_volume": 5.0, "row": 1, "column": 1}]),
            serde_json::json!([{"sku": "x", "quantity": 1, "unit_weight_g": -3.0, "unit_volume": 5.0, "row": 1, "column": 1}]),
            serde_json::json!([{"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 0.0, "row": 1, "column": 1}]),
        ];
        for items in cases {
            let err = payload(items).into_order(&channels()).unwrap_err();
            assert!(matches!(err, DispenseError::InvalidOrder { .. }), "{err}");
        }
    }

    #[test]
    fn test_rejects_slots_outside_the_machine() {
        for (row, column) in [(0, 1), (1, 0), (4, 1), (1, 3)] {
            let request = payload(serde_json::json!([
                {"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": row, "column": column}
            ]));
            assert!(request.into_order(&channels()).is_err());
        }
    }

    #[test]
    fn test_rejects_duplicate_slots_and_empty_orders() {
        let duplicate = payload(serde_json::json!([
            {"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": 1, "column": 1},
            {"sku": "y", "quantity": 1, "unit_weight_g": 20.0, "unit_volume": 5.0, "row": 1, "column": 1}
        ]));
        assert!(duplicate.into_order(&channels()).is_err());

        let same_sku = payload(serde_json::json!([
            {"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": 1, "column": 1},
            {"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": 2, "column": 1}
        ]));
        assert!(same_sku.into_order(&channels()).is_err());

        assert!(payload(serde_json::json!([])).into_order(&channels()).is_err());

        let mut blank_id = payload(serde_json::json!([
            {"sku": "x", "quantity": 1, "unit_weight_g": 10.0, "unit_volume": 5.0, "row": 1, "column": 1}
        ]));
        blank_id.order_id = "  ".to_string();
        assert!(blank_id.into_order(&channels()).is_err());
    }

    #[test]
    fn test_negative_quantity_fails_to_parse() {
        let err = OrderRequest::from_json(
            br#"{"order_id": "a", "items": [{"sku": "x", "quantity": -1, "unit_weight_g": 1.0, "unit_volume": 1.0, "row": 1, "column": 1}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DispenseError::SerializationError(_)));
    }

    #[test]
    fn test_topics() {
        assert_eq!(vend_topic("pi1"), "pi1/order/vend");
        assert_eq!(status_topic("pi1"), "pi1/order/status");
    }
}
