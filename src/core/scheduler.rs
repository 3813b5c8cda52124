use crate::domain::model::{Item, Row, RowGroup};
use std::collections::BTreeMap;

/// Groups an order's items by platform row.
pub struct OrderScheduler;

impl OrderScheduler {
    /// Returns one group per row in increasing row order; items keep their
    /// input order inside a group.
    pub fn schedule(items: Vec<Item>) -> Vec<RowGroup> {
        let mut by_row: BTreeMap<Row, Vec<Item>> = BTreeMap::new();
        for item in items {
            by_row.entry(item.row()).or_default().push(item);
        }

        by_row
            .into_iter()
            .map(|(row, items)| RowGroup { row, items })
            .collect()
    }
}
