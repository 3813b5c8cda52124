//! Platform and lane actuators built on raw stepper drivers.
//!
//! The drivers themselves (`StepperMotor`, `LaneDriver`) only know how to turn
//! a shaft. These adapters translate engine positions and unit counts into
//! rotations.

use crate::domain::model::{Channel, PlatformPosition};
use crate::domain::ports::{LaneActuator, PlatformActuator};
use crate::utils::error::ActuatorError;
use async_trait::async_trait;

const PLATFORM: &str = "platform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

/// Single stepper that raises and lowers the platform.
#[async_trait]
pub trait StepperMotor: Send + Sync {
    async fn rotate(
        &mut self,
        direction: Direction,
        speed: u32,
        rotations: f64,
    ) -> Result<(), ActuatorError>;

    /// De-energizes the coils.
    async fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Bank of lane steppers addressed by driver channel.
#[async_trait]
pub trait LaneDriver: Send + Sync {
    async fn rotate(
        &self,
        channel: Channel,
        direction: Direction,
        speed: u32,
        rotations: f64,
    ) -> Result<(), ActuatorError>;

    async fn release_all(&self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Platform travel expressed in motor rotations from the home stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformGeometry {
    /// Index 0 is row 1.
    pub row_positions: Vec<f64>,
    pub neutral_position: f64,
    pub step_speed: u32,
    pub homing_speed: u32,
    pub homing_rotations: f64,
}

impl Default for PlatformGeometry {
    fn default() -> Self {
        Self {
            row_positions: vec![11.8, 5.9, -6.0],
            neutral_position: 0.0,
            step_speed: 35,
            homing_speed: 750,
            homing_rotations: 6.0,
        }
    }
}

pub struct StepperPlatform<M: StepperMotor> {
    motor: M,
    geometry: PlatformGeometry,
    rotations: Option<f64>,
    position: PlatformPosition,
}

impl<M: StepperMotor> StepperPlatform<M> {
    pub fn new(motor: M, geometry: PlatformGeometry) -> Self {
        Self {
            motor,
            geometry,
            rotations: None,
            position: PlatformPosition::Unknown,
        }
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    fn target_rotations(&self, target: PlatformPosition) -> Result<f64, ActuatorError> {
        match target {
            PlatformPosition::Neutral => Ok(self.geometry.neutral_position),
            PlatformPosition::Row(row) => self
                .geometry
                .row_positions
                .get(usize::from(row.get()) - 1)
                .copied()
                .ok_or(ActuatorError::OutOfRange {
                    device: PLATFORM.to_string(),
                    target: target.to_string(),
                }),
            PlatformPosition::Unknown => Err(ActuatorError::OutOfRange {
                device: PLATFORM.to_string(),
                target: target.to_string(),
            }),
        }
    }
}

#[async_trait]
impl<M: StepperMotor> PlatformActuator for StepperPlatform<M> {
    async fn move_to(&mut self, target: PlatformPosition) -> Result<(), ActuatorError> {
        let current = self.rotations.ok_or_else(|| ActuatorError::NotHomed {
            device: PLATFORM.to_string(),
        })?;
        let goal = self.target_rotations(target)?;
        let delta = goal - current;

        if delta.abs() > f64::EPSILON {
            let direction = if delta > 0.0 {
                Direction::CounterClockwise
            } else {
                Direction::Clockwise
            };
            tracing::debug!(
                "Platform {} -> {}: {:.2} rotations {:?}",
                self.position,
                target,
                delta.abs(),
                direction
            );
            if let Err(e) = self
                .motor
                .rotate(direction, self.geometry.step_speed, delta.abs())
                .await
            {
                self.rotations = None;
                self.position = PlatformPosition::Unknown;
                return Err(e);
            }
        }

        self.rotations = Some(goal);
        self.position = target;
        Ok(())
    }

    fn current_position(&self) -> PlatformPosition {
        self.position
    }

    /// Runs against the mechanical stop, which sits at the neutral position.
    async fn home(&mut self) -> Result<(), ActuatorError> {
        self.rotations = None;
        self.position = PlatformPosition::Unknown;
        self.motor
            .rotate(
                Direction::CounterClockwise,
                self.geometry.homing_speed,
                self.geometry.homing_rotations,
            )
            .await?;
        self.rotations = Some(self.geometry.neutral_position);
        self.position = PlatformPosition::Neutral;
        Ok(())
    }

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        self.motor.release().await
    }
}

pub struct StepperLanes<D: LaneDriver> {
    driver: D,
    rotations_per_item: f64,
    step_speed: u32,
}

impl<D: LaneDriver> StepperLanes<D> {
    pub fn new(driver: D, rotations_per_item: f64, step_speed: u32) -> Self {
        Self {
            driver,
            rotations_per_item,
            step_speed,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

#[async_trait]
impl<D: LaneDriver> LaneActuator for StepperLanes<D> {
    async fn advance(&self, channel: Channel, units: u32) -> Result<(), ActuatorError> {
        let rotations = self.rotations_per_item * f64::from(units);
        self.driver
            .rotate(channel, Direction::Clockwise, self.step_speed, rotations)
            .await
    }

    async fn power_down(&self) -> Result<(), ActuatorError> {
        self.driver.release_all().await
    }
}
