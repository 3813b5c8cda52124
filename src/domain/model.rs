use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::utils::error::{DispenseError, Result};

/// Platform stop position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row(u8);

impl Row {
    pub fn new(index: u8) -> Option<Self> {
        (index >= 1).then_some(Self(index))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

/// Lane position within a row, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Column(u8);

impl Column {
    pub fn new(index: u8) -> Option<Self> {
        (index >= 1).then_some(Self(index))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub row: Row,
    pub column: Column,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/column {}", self.row, self.column.0)
    }
}

/// Addressable output of the lane motor bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(pub u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

/// Validated `(row, column) -> channel` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    table: Vec<Vec<Channel>>,
}

impl ChannelMap {
    /// Builds the map from a row-major table; every row must have the same
    /// number of columns and no channel may appear twice.
    pub fn from_table(table: &[Vec<u8>]) -> Result<Self> {
        if table.is_empty() {
            return Err(DispenseError::ConfigValidationError {
                field: "machine.channel_map".to_string(),
                message: "channel map has no rows".to_string(),
            });
        }

        let width = table[0].len();
        let mut seen = HashSet::new();
        for (r, row) in table.iter().enumerate() {
            if row.is_empty() || row.len() != width {
                return Err(DispenseError::ConfigValidationError {
                    field: "machine.channel_map".to_string(),
                    message: format!(
                        "row {} has {} columns, expected {}",
                        r + 1,
                        row.len(),
                        width
                    ),
                });
            }
            for &channel in row {
                if !seen.insert(channel) {
                    return Err(DispenseError::InvalidConfigValueError {
                        field: "machine.channel_map".to_string(),
                        value: channel.to_string(),
                        reason: "channel assigned to more than one slot".to_string(),
                    });
                }
            }
        }

        Ok(Self {
            table: table
                .iter()
                .map(|row| row.iter().copied().map(Channel).collect())
                .collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.table.len()
    }

    pub fn columns(&self) -> usize {
        self.table[0].len()
    }

    pub fn channel(&self, slot: Slot) -> Option<Channel> {
        self.table
            .get(usize::from(slot.row.get()) - 1)?
            .get(usize::from(slot.column.get()) - 1)
            .copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformPosition {
    /// Position lost, e.g. after a failed move; homing required.
    Unknown,
    /// Delivery position where the customer collects items.
    Neutral,
    Row(Row),
}

impl fmt::Display for PlatformPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown position"),
            Self::Neutral => write!(f, "neutral position"),
            Self::Row(row) => write!(f, "{}", row),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub sku: String,
    pub remaining: u32,
    pub unit_weight_g: f64,
    pub unit_volume: f64,
    pub slot: Slot,
    pub channel: Channel,
}

impl Item {
    pub fn row(&self) -> Row {
        self.slot.row
    }

    /// Records one confirmed unit and returns what is left.
    pub fn decrement(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Lowest weight delta accepted as one unit of this item having landed.
    pub fn min_detect_weight(&self, tolerance: f64) -> f64 {
        self.unit_weight_g * (1.0 - tolerance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowGroup {
    pub row: Row,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct Order {
    id: String,
    groups: VecDeque<RowGroup>,
}

impl Order {
    pub fn new(id: impl Into<String>, groups: Vec<RowGroup>) -> Self {
        let mut order = Self {
            id: id.into(),
            groups: groups.into(),
        };
        order.prune();
        order
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_complete(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &RowGroup> {
        self.groups.iter()
    }

    pub fn current_group(&self) -> Option<&RowGroup> {
        self.groups.front()
    }

    pub fn current_group_mut(&mut self) -> Option<&mut RowGroup> {
        self.groups.front_mut()
    }

    /// Removes an item from the current group, dropping the group once empty.
    pub fn take_item(&mut self, index: usize) -> Option<Item> {
        let group = self.groups.front_mut()?;
        if index >= group.items.len() {
            return None;
        }
        let item = group.items.remove(index);
        self.prune();
        Some(item)
    }

    /// Removes every item that still has quantity left, in schedule order.
    pub fn drain_remaining(&mut self) -> Vec<Item> {
        self.groups.drain(..).flat_map(|g| g.items).collect()
    }

    /// Drops items whose quantity reached zero, and groups left empty.
    pub fn remove_dispensed(&mut self) {
        self.prune();
    }

    pub fn remaining_units(&self) -> u32 {
        self.groups
            .iter()
            .flat_map(|g| g.items.iter())
            .map(|i| i.remaining)
            .sum()
    }

    fn prune(&mut self) {
        for group in self.groups.iter_mut() {
            group.items.retain(|i| i.remaining > 0);
        }
        self.groups.retain(|g| !g.items.is_empty());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UndeliveredReason {
    /// Never registered on the scale within its attempt budget.
    DropTimeout,
    LaneFault,
    /// Heavier or bulkier than an empty platform can hold.
    ExceedsPlatformCapacity,
    /// Dispensing stopped because earlier items were never collected.
    PickupTimeout,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndeliveredItem {
    pub sku: String,
    pub remaining_quantity: u32,
    pub reason: UndeliveredReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Success,
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub order_id: String,
    pub status: OrderStatus,
    pub undelivered_items: Vec<UndeliveredItem>,
    /// False when the customer never cleared the platform within the pickup timeout.
    pub pickup_confirmed: bool,
    pub interrupted: bool,
    pub completed_at: DateTime<Utc>,
}

impl OrderOutcome {
    pub fn new(
        order_id: impl Into<String>,
        undelivered_items: Vec<UndeliveredItem>,
        pickup_confirmed: bool,
        interrupted: bool,
    ) -> Self {
        let status = if undelivered_items.is_empty() && !interrupted {
            OrderStatus::Success
        } else {
            OrderStatus::PartialFailure
        };

        Self {
            order_id: order_id.into(),
            status,
            undelivered_items,
            pickup_confirmed,
            interrupted,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OrderStatus::Success
    }
}
