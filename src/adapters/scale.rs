use crate::domain::ports::WeightSensor;
use crate::utils::error::ActuatorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw load-cell amplifier.
#[async_trait]
pub trait LoadCellAdc: Send + Sync {
    async fn read_raw(&self) -> Result<i64, ActuatorError>;

    async fn power_down(&self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Linear mapping from raw counts to grams: `(raw - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub offset: f64,
    pub scale: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl Calibration {
    pub fn to_grams(&self, raw: f64) -> f64 {
        (raw - self.offset) / self.scale
    }
}

/// `WeightSensor` over a raw ADC. Each reading averages `samples` raw
/// values; failed samples are skipped and a reading with no good samples
/// repeats the last good one.
pub struct CalibratedScale<A: LoadCellAdc> {
    adc: A,
    calibration: Calibration,
    samples: u32,
    baseline_g: f64,
    last_good_g: AtomicU64,
}

impl<A: LoadCellAdc> CalibratedScale<A> {
    pub fn new(adc: A, calibration: Calibration, samples: u32) -> Self {
        Self {
            adc,
            calibration,
            samples: samples.max(1),
            baseline_g: 0.0,
            last_good_g: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    async fn average_raw(&self) -> Option<f64> {
        let mut total = 0.0;
        let mut good = 0u32;
        for _ in 0..self.samples {
            match self.adc.read_raw().await {
                Ok(raw) => {
                    total += raw as f64;
                    good += 1;
                }
                Err(e) => tracing::debug!("Load cell sample dropped: {}", e),
            }
        }
        (good > 0).then(|| total / f64::from(good))
    }

    /// Records the current raw average as the empty-platform offset.
    pub async fn tare(&mut self) -> Result<(), ActuatorError> {
        let raw = self
            .average_raw()
            .await
            .ok_or_else(|| ActuatorError::fault("scale", "no samples during tare"))?;
        self.calibration.offset = raw;
        self.last_good_g.store(0f64.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Derives the scale factor from a reference weight resting on a tared
    /// platform.
    pub async fn calibrate(&mut self, reference_g: f64) -> Result<Calibration, ActuatorError> {
        if !reference_g.is_finite() || reference_g <= 0.0 {
            return Err(ActuatorError::fault(
                "scale",
                format!("reference weight must be positive, got {}", reference_g),
            ));
        }
        let raw = self
            .average_raw()
            .await
            .ok_or_else(|| ActuatorError::fault("scale", "no samples during calibration"))?;
        let counts = raw - self.calibration.offset;
        if counts.abs() < f64::EPSILON {
            return Err(ActuatorError::fault("scale", "reference weight not detected"));
        }
        self.calibration.scale = counts / reference_g;
        Ok(self.calibration)
    }
}

#[async_trait]
impl<A: LoadCellAdc> WeightSensor for CalibratedScale<A> {
    async fn read_grams(&self) -> f64 {
        match self.average_raw().await {
            Some(raw) => {
                let grams = self.calibration.to_grams(raw);
                self.last_good_g.store(grams.to_bits(), Ordering::Relaxed);
                grams
            }
            None => {
                let grams = f64::from_bits(self.last_good_g.load(Ordering::Relaxed));
                tracing::warn!("Load cell returned no samples, repeating {:.1}g", grams);
                grams
            }
        }
    }

    async fn mark_baseline(&mut self) {
        self.baseline_g = self.read_grams().await;
    }

    async fn delta_since_baseline(&self) -> f64 {
        self.read_grams().await - self.baseline_g
    }

    async fn power_down(&mut self) -> Result<(), ActuatorError> {
        self.adc.power_down().await
    }
}
