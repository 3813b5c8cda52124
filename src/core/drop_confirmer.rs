//! Actuate, settle, weigh, retry.
//!
//! A drop is confirmed only by the load cell: the weight gained since the
//! baseline taken at the start of the drop must reach the item's unit weight
//! less the tolerance fraction. Two items from the same row may be released
//! together when their weights are far enough apart to tell them apart on the
//! scale; a partial gain is then attributed to the item whose unit weight is
//! nearest to it and the other one is retried alone. Nearest-weight matching
//! is a heuristic and can misattribute when the gain sits near the midpoint
//! of the two weights.

use crate::domain::model::Item;
use crate::domain::ports::{LaneActuator, WeightSensor};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Units released per lane actuation.
const UNITS_PER_ACTUATION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct DropSettings {
    /// Actuations allowed before an item is given up on.
    pub num_attempts: u32,
    /// Fraction of the unit weight that may be missing from a reading.
    pub weight_tolerance: f64,
    pub settle_time: Duration,
    /// Smallest unit-weight difference that allows a paired release.
    pub min_weight_margin_g: f64,
    /// Gains at or below this are treated as nothing having landed.
    pub noise_floor_g: f64,
}

impl Default for DropSettings {
    fn default() -> Self {
        Self {
            num_attempts: 2,
            weight_tolerance: 0.2,
            settle_time: Duration::from_millis(1000),
            min_weight_margin_g: 10.0,
            noise_floor_g: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    Dropped,
    TimedOut,
    LaneFault,
}

/// Result of one `drop_group` call; `outcomes[i]` belongs to the i-th candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct DropReport {
    pub outcomes: Vec<DropOutcome>,
    pub actuations: u32,
}

/// Shutdown cut a drop short. `confirmed` lists the candidates whose unit
/// was already registered on the scale and therefore rests on the platform.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("drop interrupted by shutdown")]
pub struct Interrupted {
    pub confirmed: Vec<usize>,
}

impl Interrupted {
    fn after(outcomes: &[DropOutcome]) -> Self {
        Self {
            confirmed: outcomes
                .iter()
                .enumerate()
                .filter(|(_, o)| **o == DropOutcome::Dropped)
                .map(|(i, _)| i)
                .collect(),
        }
    }
}

/// Working record for one drop call.
struct DropAttempt<'i> {
    candidates: Vec<&'i Item>,
    target_delta_g: f64,
    actuations: u32,
    outcomes: Vec<Option<DropOutcome>>,
}

impl<'i> DropAttempt<'i> {
    fn new(candidates: Vec<&'i Item>, tolerance: f64) -> Self {
        let target_delta_g = candidates
            .iter()
            .map(|i| i.min_detect_weight(tolerance))
            .sum();
        let outcomes = vec![None; candidates.len()];
        Self {
            candidates,
            target_delta_g,
            actuations: 0,
            outcomes,
        }
    }

    fn resolve(&mut self, index: usize, outcome: DropOutcome) {
        self.outcomes[index] = Some(outcome);
    }

    fn interrupted(&self) -> Interrupted {
        let resolved: Vec<DropOutcome> = self
            .outcomes
            .iter()
            .map(|o| o.unwrap_or(DropOutcome::TimedOut))
            .collect();
        Interrupted::after(&resolved)
    }

    fn into_report(self) -> DropReport {
        DropReport {
            outcomes: self
                .outcomes
                .into_iter()
                .map(|o| o.unwrap_or(DropOutcome::TimedOut))
                .collect(),
            actuations: self.actuations,
        }
    }
}

pub struct DropConfirmer<'a, S: WeightSensor, L: LaneActuator> {
    sensor: &'a mut S,
    lanes: &'a L,
    settings: &'a DropSettings,
    cancel: &'a CancellationToken,
}

impl<'a, S: WeightSensor, L: LaneActuator> DropConfirmer<'a, S, L> {
    pub fn new(
        sensor: &'a mut S,
        lanes: &'a L,
        settings: &'a DropSettings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            sensor,
            lanes,
            settings,
            cancel,
        }
    }

    /// Releases one unit of each candidate (1 or 2 items sharing a row).
    pub async fn drop_group(&mut self, items: &[&Item]) -> Result<DropReport, Interrupted> {
        match items {
            [a, b] if (a.unit_weight_g - b.unit_weight_g).abs() >= self.settings.min_weight_margin_g => {
                self.drop_pair(a, b).await
            }
            _ => {
                if items.len() == 2 {
                    tracing::debug!(
                        "{} and {} are too close in weight to release together",
                        items[0].sku,
                        items[1].sku
                    );
                }
                let mut outcomes = Vec::with_capacity(items.len());
                let mut actuations = 0;
                for item in items {
                    let report = self
                        .drop_single(item, self.settings.num_attempts)
                        .await
                        .map_err(|_| Interrupted::after(&outcomes))?;
                    actuations += report.actuations;
                    outcomes.extend(report.outcomes);
                }
                Ok(DropReport {
                    outcomes,
                    actuations,
                })
            }
        }
    }

    /// Advances one lane until the scale gains the item's weight or `budget`
    /// actuations have been spent.
    pub async fn drop_single(&mut self, item: &Item, budget: u32) -> Result<DropReport, Interrupted> {
        let mut attempt = DropAttempt::new(vec![item], self.settings.weight_tolerance);
        self.sensor.mark_baseline().await;
        tracing::debug!(
            "Dropping {} from {} (needs +{:.1}g, {} attempts)",
            item.sku,
            item.channel,
            attempt.target_delta_g,
            budget
        );

        while attempt.actuations < budget {
            attempt.actuations += 1;
            if let Err(e) = self.lanes.advance(item.channel, UNITS_PER_ACTUATION).await {
                tracing::warn!("Lane for {} failed: {}", item.sku, e);
                attempt.resolve(0, DropOutcome::LaneFault);
                return Ok(attempt.into_report());
            }
            self.settle().await?;

            let change = self.sensor.delta_since_baseline().await;
            tracing::debug!(
                "{} attempt {}/{}: +{:.1}g",
                item.sku,
                attempt.actuations,
                budget,
                change
            );
            if change >= attempt.target_delta_g {
                attempt.resolve(0, DropOutcome::Dropped);
                return Ok(attempt.into_report());
            }
        }

        tracing::warn!("{} not detected after {} attempts", item.sku, attempt.actuations);
        attempt.resolve(0, DropOutcome::TimedOut);
        Ok(attempt.into_report())
    }

    async fn drop_pair(&mut self, a: &Item, b: &Item) -> Result<DropReport, Interrupted> {
        let budget = self.settings.num_attempts;
        let mut attempt = DropAttempt::new(vec![a, b], self.settings.weight_tolerance);
        self.sensor.mark_baseline().await;
        tracing::debug!(
            "Dropping {} and {} together (needs +{:.1}g)",
            a.sku,
            b.sku,
            attempt.target_delta_g
        );

        while attempt.actuations < budget {
            attempt.actuations += 1;
            let (ra, rb) = tokio::join!(
                self.lanes.advance(a.channel, UNITS_PER_ACTUATION),
                self.lanes.advance(b.channel, UNITS_PER_ACTUATION),
            );
            self.settle().await?;
            let change = self.sensor.delta_since_baseline().await;
            tracing::debug!(
                "Pair attempt {}/{}: +{:.1}g",
                attempt.actuations,
                budget,
                change
            );

            if ra.is_err() || rb.is_err() {
                for (index, result) in [(0, &ra), (1, &rb)] {
                    if let Err(e) = result {
                        tracing::warn!("Lane for {} failed: {}", attempt.candidates[index].sku, e);
                        attempt.resolve(index, DropOutcome::LaneFault);
                    }
                }
                if let (Ok(()), Err(_)) | (Err(_), Ok(())) = (&ra, &rb) {
                    let survivor = if ra.is_ok() { 0 } else { 1 };
                    let item = attempt.candidates[survivor];
                    if change >= item.min_detect_weight(self.settings.weight_tolerance) {
                        attempt.resolve(survivor, DropOutcome::Dropped);
                    } else {
                        let retry = self
                            .drop_single(item, budget.saturating_sub(attempt.actuations))
                            .await
                            .map_err(|_| attempt.interrupted())?;
                        attempt.actuations += retry.actuations;
                        attempt.resolve(survivor, retry.outcomes[0]);
                    }
                }
                return Ok(attempt.into_report());
            }

            if change <= self.settings.noise_floor_g {
                continue;
            }

            if change >= attempt.target_delta_g {
                attempt.resolve(0, DropOutcome::Dropped);
                attempt.resolve(1, DropOutcome::Dropped);
                return Ok(attempt.into_report());
            }

            // only one landed; credit the closer weight match
            let (fallen, stuck) =
                if (change - a.unit_weight_g).abs() < (change - b.unit_weight_g).abs() {
                    (0, 1)
                } else {
                    (1, 0)
                };
            tracing::info!(
                "+{:.1}g matches {}, retrying {} alone",
                change,
                attempt.candidates[fallen].sku,
                attempt.candidates[stuck].sku
            );
            attempt.resolve(fallen, DropOutcome::Dropped);

            let stuck_item = attempt.candidates[stuck];
            let retry = self
                .drop_single(stuck_item, budget.saturating_sub(1))
                .await
                .map_err(|_| attempt.interrupted())?;
            attempt.actuations += retry.actuations;
            attempt.resolve(stuck, retry.outcomes[0]);
            return Ok(attempt.into_report());
        }

        tracing::warn!(
            "Neither {} nor {} detected after {} attempts",
            a.sku,
            b.sku,
            attempt.actuations
        );
        Ok(attempt.into_report())
    }

    async fn settle(&self) -> Result<(), Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::default()),
            _ = tokio::time::sleep(self.settings.settle_time) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::{SimLane, SimulatedMachine};
    use crate::domain::model::{Channel, Column, Row, Slot};

    fn item(sku: &str, weight: f64, channel: u8) -> Item {
        Item {
            sku: sku.to_string(),
            remaining: 1,
            unit_weight_g: weight,
            unit_volume: 10.0,
            slot: Slot {
                row: Row::new(1).unwrap(),
                column: Column::new(channel + 1).unwrap(),
            },
            channel: Channel(channel),
        }
    }

    fn settings(num_attempts: u32) -> DropSettings {
        DropSettings {
            num_attempts,
            ..DropSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drop_confirms_on_attempt_k() {
        for k in 1..=4u32 {
            let machine = SimulatedMachine::new().with_lane(Channel(0), SimLane::stocked(50.0, 3).stuck_for(k - 1));
            let mut sensor = machine.sensor();
            let lanes = machine.lanes();
            let cfg = settings(4);
            let cancel = CancellationToken::new();
            let a = item("a", 50.0, 0);

            let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
                .drop_single(&a, cfg.num_attempts)
                .await
                .unwrap();

            assert_eq!(report.outcomes, vec![DropOutcome::Dropped]);
            assert_eq!(report.actuations, k);
            assert_eq!(machine.advance_count(Channel(0)), k as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drop_gives_up_after_budget() {
        let machine = SimulatedMachine::new().with_lane(Channel(0), SimLane::stocked(50.0, 3));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let heavy = item("d", 999_999.0, 0);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_single(&heavy, cfg.num_attempts)
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::TimedOut]);
        assert_eq!(report.actuations, 2);
        assert_eq!(machine.advance_count(Channel(0)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drop_accepts_reading_within_tolerance() {
        let machine = SimulatedMachine::new().with_lane(Channel(0), SimLane::stocked(41.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(1);
        let cancel = CancellationToken::new();

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_single(&item("a", 50.0, 0), 1)
            .await
            .unwrap();
        assert_eq!(report.outcomes, vec![DropOutcome::Dropped]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drop_measures_from_baseline_not_absolute() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1))
            .with_lane(Channel(1), SimLane::stocked(10.0, 1).stuck_for(5));
        let lanes = machine.lanes();
        lanes.advance(Channel(0), 1).await.unwrap();

        let mut sensor = machine.sensor();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_single(&item("b", 10.0, 1), 2)
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::TimedOut]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_drop_both_land_together() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(50.0, 2))
            .with_lane(Channel(3), SimLane::stocked(80.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let a = item("a", 50.0, 0);
        let b = item("b", 80.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&a, &b])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::Dropped, DropOutcome::Dropped]);
        assert_eq!(report.actuations, 1);
        assert_eq!(machine.advance_count(Channel(0)), 1);
        assert_eq!(machine.advance_count(Channel(3)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_partial_fall_credits_nearest_weight() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1).stuck_for(1))
            .with_lane(Channel(3), SimLane::stocked(9.5, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let heavy = item("heavy", 100.0, 0);
        let light = item("light", 10.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&heavy, &light])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::Dropped, DropOutcome::Dropped]);
        // the light lane is not touched again; the heavy one is retried alone
        assert_eq!(machine.advance_count(Channel(3)), 1);
        assert_eq!(machine.advance_count(Channel(0)), 2);
        assert_eq!(machine.advances().last(), Some(&Channel(0)));
        assert_eq!(report.actuations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_stuck_retry_uses_one_fewer_attempt() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1).stuck_for(10))
            .with_lane(Channel(3), SimLane::stocked(10.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(3);
        let cancel = CancellationToken::new();
        let heavy = item("heavy", 100.0, 0);
        let light = item("light", 10.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&heavy, &light])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::TimedOut, DropOutcome::Dropped]);
        // one paired actuation plus two solo retries
        assert_eq!(machine.advance_count(Channel(0)), 3);
        assert_eq!(report.actuations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_nothing_falls_shares_one_budget() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1).stuck_for(10))
            .with_lane(Channel(3), SimLane::stocked(10.0, 1).stuck_for(10));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let heavy = item("heavy", 100.0, 0);
        let light = item("light", 10.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&heavy, &light])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::TimedOut, DropOutcome::TimedOut]);
        assert_eq!(report.actuations, 2);
        assert_eq!(machine.advance_count(Channel(0)), 2);
        assert_eq!(machine.advance_count(Channel(3)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_weights_drop_one_after_the_other() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(50.0, 1))
            .with_lane(Channel(3), SimLane::stocked(45.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let a = item("a", 50.0, 0);
        let b = item("b", 45.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&a, &b])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::Dropped, DropOutcome::Dropped]);
        assert_eq!(machine.advances(), vec![Channel(0), Channel(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_fault_in_pair_keeps_the_other_item() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1))
            .with_lane(Channel(3), SimLane::stocked(10.0, 1).faulty());
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let heavy = item("heavy", 100.0, 0);
        let light = item("light", 10.0, 3);

        let report = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&heavy, &light])
            .await
            .unwrap();

        assert_eq!(report.outcomes, vec![DropOutcome::Dropped, DropOutcome::LaneFault]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_settle() {
        let machine = SimulatedMachine::new().with_lane(Channel(0), SimLane::stocked(50.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_single(&item("a", 50.0, 0), 2)
            .await;
        assert_eq!(result, Err(Interrupted::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_retry_keeps_unit_that_already_fell() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(100.0, 1).stuck_for(1))
            .with_lane(Channel(3), SimLane::stocked(10.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let heavy = item("heavy", 100.0, 0);
        let light = item("light", 10.0, 3);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            stopper.cancel();
        });

        let result = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&heavy, &light])
            .await;
        assert_eq!(result, Err(Interrupted { confirmed: vec![1] }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_sequential_drop_keeps_first_unit() {
        let machine = SimulatedMachine::new()
            .with_lane(Channel(0), SimLane::stocked(50.0, 1))
            .with_lane(Channel(3), SimLane::stocked(45.0, 1));
        let mut sensor = machine.sensor();
        let lanes = machine.lanes();
        let cfg = settings(2);
        let cancel = CancellationToken::new();
        let a = item("a", 50.0, 0);
        let b = item("b", 45.0, 3);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            stopper.cancel();
        });

        let result = DropConfirmer::new(&mut sensor, &lanes, &cfg, &cancel)
            .drop_group(&[&a, &b])
            .await;
        assert_eq!(result, Err(Interrupted { confirmed: vec![0] }));
    }
}
