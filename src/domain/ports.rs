use crate::domain::model::{Channel, PlatformPosition};
use crate::utils::error::ActuatorError;
use async_trait::async_trait;

/// Load cell under the platform.
#[async_trait]
pub trait WeightSensor: Send + Sync {
    /// Calibrated reading in grams.
    async fn read_grams(&self) -> f64;

    /// Stores the current reading as the reference for `delta_since_baseline`.
    async fn mark_baseline(&mut self);

    async fn delta_since_baseline(&self) -> f64;

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Bank of lane motors. `advance` may run concurrently for distinct channels.
#[async_trait]
pub trait LaneActuator: Send + Sync {
    async fn advance(&self, channel: Channel, units: u32) -> Result<(), ActuatorError>;

    async fn power_down(&self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Motor carrying the shared platform between row stops and the delivery position.
#[async_trait]
pub trait PlatformActuator: Send + Sync {
    async fn move_to(&mut self, target: PlatformPosition) -> Result<(), ActuatorError>;

    fn current_position(&self) -> PlatformPosition;

    /// Drives to the mechanical stop and zeroes the stored position.
    async fn home(&mut self) -> Result<(), ActuatorError>;

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}
