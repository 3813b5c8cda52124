use crate::core::drop_confirmer::{DropConfirmer, DropOutcome, DropSettings};
use crate::core::platform::PlatformState;
use crate::domain::model::{
    Item, Order, OrderOutcome, PlatformPosition, Row, UndeliveredItem, UndeliveredReason,
};
use crate::domain::ports::{LaneActuator, PlatformActuator, WeightSensor};
use crate::utils::error::{DispenseError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub drop: DropSettings,
    pub max_weight_g: f64,
    pub max_volume: f64,
    pub pickup_timeout: Duration,
    pub pickup_poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            drop: DropSettings::default(),
            max_weight_g: 14_000.0,
            max_volume: 2_000_000.0,
            pickup_timeout: Duration::from_secs(300),
            pickup_poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    MovingPlatform(Row),
    DroppingGroup(Row),
    DeliverAndWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pickup {
    Collected,
    TimedOut,
}

/// Why the dispense loop stopped early.
enum Halt {
    Interrupted,
    Fatal(DispenseError),
}

/// Drives one order at a time through platform moves, confirmed drops and
/// deliver-and-wait cycles.
pub struct DispenseEngine<S: WeightSensor, L: LaneActuator, P: PlatformActuator> {
    sensor: S,
    lanes: L,
    platform: P,
    platform_state: PlatformState,
    settings: EngineSettings,
    state: EngineState,
}

impl<S: WeightSensor, L: LaneActuator, P: PlatformActuator> DispenseEngine<S, L, P> {
    pub fn new(
        sensor: S,
        lanes: L,
        platform: P,
        platform_state: PlatformState,
        settings: EngineSettings,
    ) -> Self {
        Self {
            sensor,
            lanes,
            platform,
            platform_state,
            settings,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn platform_state(&self) -> &PlatformState {
        &self.platform_state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Homes the platform so later moves start from a known position.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!("Homing platform");
        self.platform.home().await?;
        self.platform_state.set_position(self.platform.current_position());
        self.state = EngineState::Idle;
        Ok(())
    }

    /// Powers down every actuator and the load cell.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Powering down actuators");
        let lanes = self.lanes.power_down().await;
        let platform = self.platform.power_down().await;
        let sensor = self.sensor.power_down().await;
        self.state = EngineState::Idle;
        lanes?;
        platform?;
        sensor?;
        Ok(())
    }

    /// Dispenses `order` and reports exactly which units were not delivered.
    ///
    /// A platform movement failure aborts the order with
    /// [`DispenseError::Movement`]. Stuck items, lane faults, oversize items
    /// and pickup timeouts end up in the outcome's undelivered list instead.
    /// Cancelling `cancel` powers the machine down and yields a partial
    /// outcome.
    pub async fn run_order(
        &mut self,
        mut order: Order,
        cancel: &CancellationToken,
    ) -> Result<OrderOutcome> {
        tracing::info!(
            "Dispensing order {} ({} units)",
            order.id(),
            order.remaining_units()
        );
        let mut undelivered = Vec::new();
        let mut pickup_confirmed = true;

        let halted = self
            .dispense(&mut order, &mut undelivered, &mut pickup_confirmed, cancel)
            .await;
        self.state = EngineState::Idle;

        let interrupted = match halted {
            Ok(()) => false,
            Err(Halt::Interrupted) => {
                tracing::warn!("Order {} interrupted, powering down", order.id());
                if let Err(e) = self.shutdown().await {
                    tracing::error!("Power down failed: {}", e);
                }
                abandon(&mut order, &mut undelivered, UndeliveredReason::Interrupted);
                true
            }
            Err(Halt::Fatal(e)) => {
                tracing::error!("Order {} aborted: {}", order.id(), e);
                return Err(e);
            }
        };

        let outcome = OrderOutcome::new(order.id(), undelivered, pickup_confirmed, interrupted);
        if outcome.is_success() {
            tracing::info!("Order {} delivered", outcome.order_id);
        } else {
            tracing::warn!(
                "Order {} partially delivered, {} item(s) outstanding",
                outcome.order_id,
                outcome.undelivered_items.len()
            );
        }
        Ok(outcome)
    }

    async fn dispense(
        &mut self,
        order: &mut Order,
        undelivered: &mut Vec<UndeliveredItem>,
        pickup_confirmed: &mut bool,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Halt> {
        if self.platform_state.position() == PlatformPosition::Unknown {
            self.initialize().await.map_err(Halt::Fatal)?;
        }

        // leftovers from an earlier order that was never collected
        if !self.platform_state.is_empty() && self.deliver_and_wait(cancel).await? == Pickup::TimedOut {
            *pickup_confirmed = false;
            abandon(order, undelivered, UndeliveredReason::PickupTimeout);
            return Ok(());
        }

        loop {
            if cancel.is_cancelled() {
                return Err(Halt::Interrupted);
            }
            let Some(group) = order.current_group() else {
                break;
            };
            let row = group.row;
            let first = &group.items[0];
            let capacity = self.platform_state.capacity();

            if !capacity.fits_empty(first) {
                tracing::warn!(
                    "{} ({:.1}g) can never fit on the platform",
                    first.sku,
                    first.unit_weight_g
                );
                if let Some(item) = order.take_item(0) {
                    undelivered.push(undelivered_item(&item, UndeliveredReason::ExceedsPlatformCapacity));
                }
                continue;
            }

            if capacity.is_full(Some(first)) {
                tracing::info!(
                    "Platform full ({:.1}g / {:.1} left), delivering before {}",
                    capacity.available_weight_g(),
                    capacity.available_volume(),
                    first.sku
                );
                if self.deliver_and_wait(cancel).await? == Pickup::TimedOut {
                    *pickup_confirmed = false;
                    abandon(order, undelivered, UndeliveredReason::PickupTimeout);
                    return Ok(());
                }
                continue;
            }

            let batch = match group.items.get(1) {
                Some(second) if capacity.can_accept_all(&[first, second]) => 2,
                _ => 1,
            };

            self.move_platform(PlatformPosition::Row(row)).await?;
            self.state = EngineState::DroppingGroup(row);

            let candidates: Vec<&Item> = match order.current_group() {
                Some(group) => group.items[..batch].iter().collect(),
                None => break,
            };
            let dropped = DropConfirmer::new(&mut self.sensor, &self.lanes, &self.settings.drop, cancel)
                .drop_group(&candidates)
                .await;
            let report = match dropped {
                Ok(report) => report,
                Err(interrupted) => {
                    for &index in &interrupted.confirmed {
                        self.place_unit(order, index);
                    }
                    order.remove_dispensed();
                    if !interrupted.confirmed.is_empty() {
                        self.record_load().await;
                    }
                    return Err(Halt::Interrupted);
                }
            };

            self.apply_report(order, undelivered, &report.outcomes);
            if report.outcomes.contains(&DropOutcome::Dropped) {
                self.record_load().await;
            }
        }

        if !self.platform_state.is_empty() && self.deliver_and_wait(cancel).await? == Pickup::TimedOut {
            *pickup_confirmed = false;
        }
        Ok(())
    }

    /// Commits confirmed units and retires failed items. Indices refer to the
    /// front of the current group and are walked back to front so removals do
    /// not shift unvisited entries.
    fn apply_report(
        &mut self,
        order: &mut Order,
        undelivered: &mut Vec<UndeliveredItem>,
        outcomes: &[DropOutcome],
    ) {
        for (index, outcome) in outcomes.iter().enumerate().rev() {
            match outcome {
                DropOutcome::Dropped => self.place_unit(order, index),
                DropOutcome::TimedOut | DropOutcome::LaneFault => {
                    let reason = if *outcome == DropOutcome::LaneFault {
                        UndeliveredReason::LaneFault
                    } else {
                        UndeliveredReason::DropTimeout
                    };
                    if let Some(item) = order.take_item(index) {
                        undelivered.push(undelivered_item(&item, reason));
                    }
                }
            }
        }
        order.remove_dispensed();
    }

    /// Moves one confirmed unit of the `index`-th item of the current group
    /// onto the platform.
    fn place_unit(&mut self, order: &mut Order, index: usize) {
        let Some(item) = order
            .current_group_mut()
            .and_then(|g| g.items.get_mut(index))
        else {
            return;
        };
        if let Err(e) = self.platform_state.place(item) {
            tracing::warn!("Unit landed over budget: {}", e);
        }
        let left = item.decrement();
        tracing::debug!("{} confirmed, {} left", item.sku, left);
    }

    async fn record_load(&mut self) {
        let reading = self.sensor.read_grams().await;
        self.platform_state.record_loaded_reading(reading);
    }

    async fn move_platform(&mut self, target: PlatformPosition) -> std::result::Result<(), Halt> {
        if self.platform_state.position() == target {
            return Ok(());
        }
        if let PlatformPosition::Row(row) = target {
            self.state = EngineState::MovingPlatform(row);
        }
        tracing::info!("Moving platform to {}", target);

        match self.platform.move_to(target).await {
            Ok(()) => {
                self.platform_state.set_position(target);
                Ok(())
            }
            Err(source) => {
                self.platform_state.set_position(PlatformPosition::Unknown);
                Err(Halt::Fatal(DispenseError::Movement { target, source }))
            }
        }
    }

    /// Presents the platform at the delivery position and waits, bounded by
    /// the pickup timeout, until the resting units have been lifted off.
    async fn deliver_and_wait(&mut self, cancel: &CancellationToken) -> std::result::Result<Pickup, Halt> {
        self.state = EngineState::DeliverAndWait;
        if self.platform_state.is_empty() {
            return Ok(Pickup::Collected);
        }

        let expected = self
            .platform_state
            .expected_removal_g(self.settings.drop.weight_tolerance);
        let loaded = match self.platform_state.loaded_reading_g() {
            Some(grams) => grams,
            None => self.sensor.read_grams().await,
        };
        self.move_platform(PlatformPosition::Neutral).await?;
        tracing::info!(
            "Waiting for pickup of {} unit(s), expecting -{:.1}g",
            self.platform_state.occupancy().len(),
            expected
        );

        let poll = self.settings.pickup_poll_interval;
        let timeout = self.settings.pickup_timeout;
        let sensor = &self.sensor;
        let collected = async {
            loop {
                let removed = loaded - sensor.read_grams().await;
                if removed >= expected {
                    break;
                }
                tracing::debug!("Pickup pending, {:.1}g removed", removed);
                tokio::time::sleep(poll).await;
            }
        };

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, collected) => Some(result.is_ok()),
        };

        match waited {
            None => Err(Halt::Interrupted),
            Some(true) => {
                tracing::info!("Items collected");
                self.platform_state.clear();
                Ok(Pickup::Collected)
            }
            Some(false) => {
                tracing::warn!("Items not collected within {:?}", timeout);
                Ok(Pickup::TimedOut)
            }
        }
    }
}

fn undelivered_item(item: &Item, reason: UndeliveredReason) -> UndeliveredItem {
    UndeliveredItem {
        sku: item.sku.clone(),
        remaining_quantity: item.remaining,
        reason,
    }
}

fn abandon(order: &mut Order, undelivered: &mut Vec<UndeliveredItem>, reason: UndeliveredReason) {
    undelivered.extend(order.drain_remaining().iter().map(|i| undelivered_item(i, reason)));
}
