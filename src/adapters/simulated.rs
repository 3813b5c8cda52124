//! In-process stand-in for the vending hardware.
//!
//! The sensor, lane bank and platform share one physical state, so a unit
//! released by a lane shows up on the scale and a pickup at the delivery
//! position clears it again. Used for bench runs and by the engine tests.

use crate::domain::model::{Channel, PlatformPosition};
use crate::domain::ports::{LaneActuator, PlatformActuator, WeightSensor};
use crate::utils::error::ActuatorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct SimLane {
    pub stock: u32,
    /// Weight registered on the scale when a unit lands.
    pub fall_weight_g: f64,
    /// Advances that move nothing before the next unit comes loose.
    pub stuck_for: u32,
    pub faulty: bool,
}

impl SimLane {
    pub fn stocked(fall_weight_g: f64, stock: u32) -> Self {
        Self {
            stock,
            fall_weight_g,
            stuck_for: 0,
            faulty: false,
        }
    }

    pub fn stuck_for(mut self, advances: u32) -> Self {
        self.stuck_for = advances;
        self
    }

    pub fn faulty(mut self) -> Self {
        self.faulty = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupBehavior {
    /// Customer empties the platform on the first reading at the delivery position.
    Immediate,
    /// Customer empties the platform on the n-th reading at the delivery position.
    AfterPolls(u32),
    Never,
}

#[derive(Debug)]
struct SimState {
    platform_grams: f64,
    lanes: HashMap<Channel, SimLane>,
    advances: Vec<Channel>,
    moves: Vec<PlatformPosition>,
    position: PlatformPosition,
    failing_target: Option<PlatformPosition>,
    pickup: PickupBehavior,
    neutral_polls: u32,
    pickups: u32,
    homes: u32,
    powered_down: bool,
}

impl SimState {
    fn observe_pickup(&mut self) {
        if self.position != PlatformPosition::Neutral || self.platform_grams <= 0.0 {
            return;
        }
        self.neutral_polls += 1;
        let collected = match self.pickup {
            PickupBehavior::Immediate => true,
            PickupBehavior::AfterPolls(n) => self.neutral_polls >= n,
            PickupBehavior::Never => false,
        };
        if collected {
            self.platform_grams = 0.0;
            self.neutral_polls = 0;
            self.pickups += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedMachine {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                platform_grams: 0.0,
                lanes: HashMap::new(),
                advances: Vec::new(),
                moves: Vec::new(),
                position: PlatformPosition::Unknown,
                failing_target: None,
                pickup: PickupBehavior::Immediate,
                neutral_polls: 0,
                pickups: 0,
                homes: 0,
                powered_down: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // poisoning ignored
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_lane(self, channel: Channel, lane: SimLane) -> Self {
        self.state().lanes.insert(channel, lane);
        self
    }

    pub fn with_pickup(self, pickup: PickupBehavior) -> Self {
        self.state().pickup = pickup;
        self
    }

    pub fn fail_moves_to(&self, target: PlatformPosition) {
        self.state().failing_target = Some(target);
    }

    pub fn set_pickup(&self, pickup: PickupBehavior) {
        self.state().pickup = pickup;
    }

    pub fn sensor(&self) -> SimSensor {
        SimSensor {
            machine: self.clone(),
            baseline: 0.0,
        }
    }

    pub fn lanes(&self) -> SimLanes {
        SimLanes {
            machine: self.clone(),
        }
    }

    pub fn platform(&self) -> SimPlatform {
        SimPlatform {
            machine: self.clone(),
        }
    }

    pub fn platform_grams(&self) -> f64 {
        self.state().platform_grams
    }

    /// Every lane advance in issue order, one entry per unit.
    pub fn advances(&self) -> Vec<Channel> {
        self.state().advances.clone()
    }

    pub fn advance_count(&self, channel: Channel) -> usize {
        self.state().advances.iter().filter(|c| **c == channel).count()
    }

    pub fn moves(&self) -> Vec<PlatformPosition> {
        self.state().moves.clone()
    }

    pub fn pickups(&self) -> u32 {
        self.state().pickups
    }

    pub fn homes(&self) -> u32 {
        self.state().homes
    }

    pub fn is_powered_down(&self) -> bool {
        self.state().powered_down
    }

    pub fn stock(&self, channel: Channel) -> Option<u32> {
        self.state().lanes.get(&channel).map(|l| l.stock)
    }
}

#[derive(Debug)]
pub struct SimSensor {
    machine: SimulatedMachine,
    baseline: f64,
}

#[async_trait]
impl WeightSensor for SimSensor {
    async fn read_grams(&self) -> f64 {
        let mut state = self.machine.state();
        state.observe_pickup();
        state.platform_grams
    }

    async fn mark_baseline(&mut self) {
        self.baseline = self.read_grams().await;
    }

    async fn delta_since_baseline(&self) -> f64 {
        self.read_grams().await - self.baseline
    }

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        self.machine.state().powered_down = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimLanes {
    machine: SimulatedMachine,
}

#[async_trait]
impl LaneActuator for SimLanes {
    async fn advance(&self, channel: Channel, units: u32) -> Result<(), ActuatorError> {
        let mut state = self.machine.state();
        let state = &mut *state;
        let lane = state
            .lanes
            .get_mut(&channel)
            .ok_or_else(|| ActuatorError::fault(channel.to_string(), "no lane motor wired"))?;
        if lane.faulty {
            return Err(ActuatorError::fault(channel.to_string(), "motor driver not responding"));
        }

        for _ in 0..units {
            state.advances.push(channel);
            if lane.stuck_for > 0 {
                lane.stuck_for -= 1;
            } else if lane.stock > 0 {
                lane.stock -= 1;
                state.platform_grams += lane.fall_weight_g;
            }
        }
        Ok(())
    }

    async fn power_down(&self) -> Result<(), ActuatorError> {
        self.machine.state().powered_down = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SimPlatform {
    machine: SimulatedMachine,
}

#[async_trait]
impl PlatformActuator for SimPlatform {
    async fn move_to(&mut self, target: PlatformPosition) -> Result<(), ActuatorError> {
        let mut state = self.machine.state();
        if target == PlatformPosition::Unknown {
            return Err(ActuatorError::OutOfRange {
                device: "platform".to_string(),
                target: target.to_string(),
            });
        }
        if state.failing_target == Some(target) {
            state.position = PlatformPosition::Unknown;
            return Err(ActuatorError::fault("platform", "stepper stalled"));
        }
        state.moves.push(target);
        state.position = target;
        Ok(())
    }

    fn current_position(&self) -> PlatformPosition {
        self.machine.state().position
    }

    async fn home(&mut self) -> Result<(), ActuatorError> {
        let mut state = self.machine.state();
        state.position = PlatformPosition::Neutral;
        state.homes += 1;
        Ok(())
    }

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        self.machine.state().powered_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Row;

    #[tokio::test]
    async fn test_lane_advance_lands_weight_after_stuck_advances() {
        let machine = SimulatedMachine::new().with_lane(Channel(2), SimLane::stocked(40.0, 3).stuck_for(1));
        let lanes = machine.lanes();
        let mut sensor = machine.sensor();
        sensor.mark_baseline().await;

        lanes.advance(Channel(2), 1).await.unwrap();
        assert_eq!(sensor.delta_since_baseline().await, 0.0);

        lanes.advance(Channel(2), 1).await.unwrap();
        assert_eq!(sensor.delta_since_baseline().await, 40.0);
        assert_eq!(machine.stock(Channel(2)), Some(2));
        assert_eq!(machine.advance_count(Channel(2)), 2);
    }

    #[tokio::test]
    async fn test_unwired_and_faulty_lanes_error() {
        let machine = SimulatedMachine::new().with_lane(Channel(1), SimLane::stocked(10.0, 1).faulty());
        let lanes = machine.lanes();
        assert!(lanes.advance(Channel(0), 1).await.is_err());
        assert!(lanes.advance(Channel(1), 1).await.is_err());
        assert!(machine.advances().is_empty());
    }

    #[tokio::test]
    async fn test_pickup_only_happens_at_neutral() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(25.0, 5))
            .with_pickup(PickupBehavior::AfterPolls(2));
        let lanes = machine.lanes();
        let mut platform = machine.platform();
        let sensor = machine.sensor();

        platform.move_to(PlatformPosition::Row(Row::new(1).unwrap())).await.unwrap();
        lanes.advance(Channel(0), 2).await.unwrap();
        assert_eq!(sensor.read_grams().await, 50.0);

        platform.move_to(PlatformPosition::Neutral).await.unwrap();
        assert_eq!(sensor.read_grams().await, 50.0);
        assert_eq!(sensor.read_grams().await, 0.0);
        assert_eq!(machine.pickups(), 1);
    }

    #[tokio::test]
    async fn test_scripted_move_failure_loses_position() {
        let machine = SimulatedMachine::new();
        let mut platform = machine.platform();
        let row2 = PlatformPosition::Row(Row::new(2).unwrap());
        machine.fail_moves_to(row2);

        platform.home().await.unwrap();
        assert_eq!(platform.current_position(), PlatformPosition::Neutral);
        assert!(platform.move_to(row2).await.is_err());
        assert_eq!(platform.current_position(), PlatformPosition::Unknown);
        assert!(machine.moves().is_empty());
    }
}
