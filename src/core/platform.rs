use crate::core::capacity::{CapacityExceeded, CapacityTracker};
use crate::domain::model::{Item, PlatformPosition};

/// One dispensed unit resting on the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformItem {
    pub sku: String,
    pub unit_weight_g: f64,
    pub unit_volume: f64,
}

/// Physical state of the shared platform. Outlives individual orders and is
/// mutated only by the engine that owns it.
#[derive(Debug, Clone)]
pub struct PlatformState {
    position: PlatformPosition,
    occupancy: Vec<PlatformItem>,
    capacity: CapacityTracker,
    /// Scale reading taken after the most recent confirmed unit.
    loaded_reading_g: Option<f64>,
}

impl PlatformState {
    pub fn new(max_weight_g: f64, max_volume: f64) -> Self {
        Self {
            position: PlatformPosition::Unknown,
            occupancy: Vec::new(),
            capacity: CapacityTracker::new(max_weight_g, max_volume),
            loaded_reading_g: None,
        }
    }

    pub fn position(&self) -> PlatformPosition {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: PlatformPosition) {
        self.position = position;
    }

    pub fn occupancy(&self) -> &[PlatformItem] {
        &self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    pub fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    pub fn available_weight_g(&self) -> f64 {
        self.capacity.available_weight_g()
    }

    pub fn available_volume(&self) -> f64 {
        self.capacity.available_volume()
    }

    pub fn load_weight_g(&self) -> f64 {
        self.occupancy.iter().map(|i| i.unit_weight_g).sum()
    }

    /// Records a confirmed unit. The unit is tracked as resting on the
    /// platform even when the budget refuses it, since it physically landed.
    pub(crate) fn place(&mut self, item: &Item) -> Result<(), CapacityExceeded> {
        let committed = self.capacity.commit(item);
        self.occupancy.push(PlatformItem {
            sku: item.sku.clone(),
            unit_weight_g: item.unit_weight_g,
            unit_volume: item.unit_volume,
        });
        committed
    }

    pub fn loaded_reading_g(&self) -> Option<f64> {
        self.loaded_reading_g
    }

    pub(crate) fn record_loaded_reading(&mut self, grams: f64) {
        self.loaded_reading_g = Some(grams);
    }

    /// Weight the scale must lose before the platform counts as collected.
    pub fn expected_removal_g(&self, tolerance: f64) -> f64 {
        self.load_weight_g() * (1.0 - tolerance)
    }

    pub(crate) fn clear(&mut self) {
        self.occupancy.clear();
        self.capacity.reset();
        self.loaded_reading_g = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Channel, Column, Row, Slot};

    fn item(sku: &str, weight: f64) -> Item {
        Item {
            sku: sku.to_string(),
            remaining: 1,
            unit_weight_g: weight,
            unit_volume: 10.0,
            slot: Slot {
                row: Row::new(1).unwrap(),
                column: Column::new(1).unwrap(),
            },
            channel: Channel(0),
        }
    }

    #[test]
    fn test_place_and_clear_cycle() {
        let mut platform = PlatformState::new(200.0, 100.0);
        assert_eq!(platform.position(), PlatformPosition::Unknown);

        platform.place(&item("a", 50.0)).unwrap();
        platform.place(&item("b", 80.0)).unwrap();

        assert_eq!(platform.occupancy().len(), 2);
        assert_eq!(platform.load_weight_g(), 130.0);
        assert_eq!(platform.available_weight_g(), 70.0);
        assert_eq!(platform.available_volume(), 80.0);
        assert!((platform.expected_removal_g(0.2) - 104.0).abs() < 1e-9);

        platform.record_loaded_reading(130.4);
        assert_eq!(platform.loaded_reading_g(), Some(130.4));

        platform.clear();
        assert!(platform.is_empty());
        assert_eq!(platform.loaded_reading_g(), None);
        assert_eq!(platform.available_weight_g(), 200.0);
    }

    #[test]
    fn test_refused_unit_is_still_tracked_as_resting() {
        let mut platform = PlatformState::new(60.0, 100.0);
        platform.place(&item("a", 50.0)).unwrap();
        assert!(platform.place(&item("b", 50.0)).is_err());

        assert_eq!(platform.occupancy().len(), 2);
        assert_eq!(platform.available_weight_g(), 10.0);
    }
}
