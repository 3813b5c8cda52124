use crate::domain::model::Item;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{sku} needs {weight_g}g/{volume} but only {available_weight_g}g/{available_volume} remain")]
pub struct CapacityExceeded {
    pub sku: String,
    pub weight_g: f64,
    pub volume: f64,
    pub available_weight_g: f64,
    pub available_volume: f64,
}

/// Remaining weight and volume budget of the platform for the current
/// delivery cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityTracker {
    max_weight_g: f64,
    max_volume: f64,
    available_weight_g: f64,
    available_volume: f64,
}

impl CapacityTracker {
    pub fn new(max_weight_g: f64, max_volume: f64) -> Self {
        Self {
            max_weight_g,
            max_volume,
            available_weight_g: max_weight_g,
            available_volume: max_volume,
        }
    }

    pub fn available_weight_g(&self) -> f64 {
        self.available_weight_g
    }

    pub fn available_volume(&self) -> f64 {
        self.available_volume
    }

    pub fn can_accept(&self, item: &Item) -> bool {
        item.unit_weight_g <= self.available_weight_g && item.unit_volume <= self.available_volume
    }

    /// Whether all of `items` fit together, one unit each.
    pub fn can_accept_all(&self, items: &[&Item]) -> bool {
        let weight: f64 = items.iter().map(|i| i.unit_weight_g).sum();
        let volume: f64 = items.iter().map(|i| i.unit_volume).sum();
        weight <= self.available_weight_g && volume <= self.available_volume
    }

    /// Whether one unit would fit on an empty platform at all.
    pub fn fits_empty(&self, item: &Item) -> bool {
        item.unit_weight_g <= self.max_weight_g && item.unit_volume <= self.max_volume
    }

    /// Charges one unit against the budget. A unit that does not fit is not
    /// committed.
    pub fn commit(&mut self, item: &Item) -> Result<(), CapacityExceeded> {
        if !self.can_accept(item) {
            return Err(CapacityExceeded {
                sku: item.sku.clone(),
                weight_g: item.unit_weight_g,
                volume: item.unit_volume,
                available_weight_g: self.available_weight_g,
                available_volume: self.available_volume,
            });
        }
        self.available_weight_g -= item.unit_weight_g;
        self.available_volume -= item.unit_volume;
        Ok(())
    }

    /// Either budget is used up exactly.
    pub fn is_exhausted(&self) -> bool {
        self.available_weight_g <= 0.0 || self.available_volume <= 0.0
    }

    /// Full means the next scheduled unit can no longer be placed.
    pub fn is_full(&self, next: Option<&Item>) -> bool {
        self.is_exhausted() || next.is_some_and(|item| !self.can_accept(item))
    }

    pub fn reset(&mut self) {
        self.available_weight_g = self.max_weight_g;
        self.available_volume = self.max_volume;
    }
}
