pub mod capacity;
pub mod drop_confirmer;
pub mod engine;
pub mod platform;
pub mod scheduler;

pub use crate::domain::model::{Order, OrderOutcome, RowGroup};
pub use crate::domain::ports::{LaneActuator, PlatformActuator, WeightSensor};
pub use crate::utils::error::Result;
