use crate::adapters::scale::Calibration;
use crate::adapters::stepper::PlatformGeometry;
use crate::core::drop_confirmer::DropSettings;
use crate::core::engine::EngineSettings;
use crate::domain::model::ChannelMap;
use crate::utils::error::{DispenseError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_f64, validate_positive_number, validate_range,
    validate_unique, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub machine: MachineSection,
    pub platform: PlatformSection,
    pub lanes: LanesSection,
    pub dispense: DispenseSection,
    pub pickup: PickupSection,
    pub sensor: SensorSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSection {
    pub client_id: String,
    pub rows: usize,
    pub columns: usize,
    /// channel_map[row - 1][column - 1] = 馬達驅動通道
    pub channel_map: Vec<Vec<u8>>,
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            client_id: "pi1".to_string(),
            rows: 3,
            columns: 2,
            channel_map: vec![vec![0, 3], vec![1, 4], vec![2, 5]],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub max_weight_g: f64,
    pub max_volume: f64,
    /// 各層相對於原點的馬達圈數，第一個元素為第 1 層
    pub row_positions: Vec<f64>,
    pub neutral_position: f64,
    pub step_speed: u32,
    pub homing_speed: u32,
    pub homing_rotations: f64,
}

impl Default for PlatformSection {
    fn default() -> Self {
        let geometry = PlatformGeometry::default();
        Self {
            max_weight_g: 14_000.0,
            max_volume: 2_000_000.0,
            row_positions: geometry.row_positions,
            neutral_position: geometry.neutral_position,
            step_speed: geometry.step_speed,
            homing_speed: geometry.homing_speed,
            homing_rotations: geometry.homing_rotations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanesSection {
    pub rotations_per_item: f64,
    pub step_speed: u32,
}

impl Default for LanesSection {
    fn default() -> Self {
        Self {
            rotations_per_item: 6.0,
            step_speed: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenseSection {
    pub num_attempts: u32,
    pub weight_tolerance: f64,
    pub settle_ms: u64,
    pub min_weight_margin_g: f64,
    pub noise_floor_g: f64,
}

impl Default for DispenseSection {
    fn default() -> Self {
        let drop = DropSettings::default();
        Self {
            num_attempts: drop.num_attempts,
            weight_tolerance: drop.weight_tolerance,
            settle_ms: drop.settle_time.as_millis() as u64,
            min_weight_margin_g: drop.min_weight_margin_g,
            noise_floor_g: drop.noise_floor_g,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupSection {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for PickupSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub samples: u32,
    pub offset: f64,
    pub scale: f64,
}

impl Default for SensorSection {
    fn default() -> Self {
        let calibration = Calibration::default();
        Self {
            samples: 5,
            offset: calibration.offset,
            scale: calibration.scale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MachineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(DispenseError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| DispenseError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CLIENT_ID})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| DispenseError::ConfigValidationError {
            field: "environment".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("machine.client_id", &self.machine.client_id)?;
        validate_positive_number("machine.rows", self.machine.rows, 1)?;
        validate_positive_number("machine.columns", self.machine.columns, 1)?;

        // 通道對照表必須與機台的層數和欄數一致
        if self.machine.channel_map.len() != self.machine.rows
            || self
                .machine
                .channel_map
                .iter()
                .any(|row| row.len() != self.machine.columns)
        {
            return Err(DispenseError::ConfigValidationError {
                field: "machine.channel_map".to_string(),
                message: format!(
                    "channel map must have {} rows of {} channels",
                    self.machine.rows, self.machine.columns
                ),
            });
        }
        let channels: Vec<u8> = self.machine.channel_map.iter().flatten().copied().collect();
        validate_unique("machine.channel_map", &channels)?;

        // 平台容量
        validate_positive_f64("platform.max_weight_g", self.platform.max_weight_g)?;
        validate_positive_f64("platform.max_volume", self.platform.max_volume)?;
        if self.platform.row_positions.len() != self.machine.rows {
            return Err(DispenseError::ConfigValidationError {
                field: "platform.row_positions".to_string(),
                message: format!(
                    "expected {} row positions, found {}",
                    self.machine.rows,
                    self.platform.row_positions.len()
                ),
            });
        }
        validate_positive_number("platform.step_speed", self.platform.step_speed as usize, 1)?;
        validate_positive_f64("lanes.rotations_per_item", self.lanes.rotations_per_item)?;
        validate_positive_number("lanes.step_speed", self.lanes.step_speed as usize, 1)?;

        // 掉落確認參數
        validate_positive_number("dispense.num_attempts", self.dispense.num_attempts as usize, 1)?;
        if !(0.0..1.0).contains(&self.dispense.weight_tolerance) {
            return Err(DispenseError::InvalidConfigValueError {
                field: "dispense.weight_tolerance".to_string(),
                value: self.dispense.weight_tolerance.to_string(),
                reason: "Value must be in [0, 1)".to_string(),
            });
        }
        validate_range("dispense.min_weight_margin_g", self.dispense.min_weight_margin_g, 0.0, f64::MAX)?;
        validate_range("dispense.noise_floor_g", self.dispense.noise_floor_g, 0.0, f64::MAX)?;

        // 取貨等待
        validate_positive_number("pickup.timeout_secs", self.pickup.timeout_secs as usize, 1)?;
        validate_positive_number("pickup.poll_interval_ms", self.pickup.poll_interval_ms as usize, 1)?;

        validate_positive_number("sensor.samples", self.sensor.samples as usize, 1)?;
        if !self.sensor.scale.is_finite() || self.sensor.scale == 0.0 {
            return Err(DispenseError::InvalidConfigValueError {
                field: "sensor.scale".to_string(),
                value: self.sensor.scale.to_string(),
                reason: "Scale factor must be finite and non-zero".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(DispenseError::InvalidConfigValueError {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: format!("Valid levels: {}", valid_levels.join(", ")),
            });
        }

        Ok(())
    }

    /// 取得驗證過的通道對照表
    pub fn channel_map(&self) -> Result<ChannelMap> {
        ChannelMap::from_table(&self.machine.channel_map)
    }

    /// 取得出貨引擎參數
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            drop: DropSettings {
                num_attempts: self.dispense.num_attempts,
                weight_tolerance: self.dispense.weight_tolerance,
                settle_time: Duration::from_millis(self.dispense.settle_ms),
                min_weight_margin_g: self.dispense.min_weight_margin_g,
                noise_floor_g: self.dispense.noise_floor_g,
            },
            max_weight_g: self.platform.max_weight_g,
            max_volume: self.platform.max_volume,
            pickup_timeout: Duration::from_secs(self.pickup.timeout_secs),
            pickup_poll_interval: Duration::from_millis(self.pickup.poll_interval_ms),
        }
    }

    /// 取得平台步進馬達的行程設定
    pub fn platform_geometry(&self) -> PlatformGeometry {
        PlatformGeometry {
            row_positions: self.platform.row_positions.clone(),
            neutral_position: self.platform.neutral_position,
            step_speed: self.platform.step_speed,
            homing_speed: self.platform.homing_speed,
            homing_rotations: self.platform.homing_rotations,
        }
    }

    /// 取得秤重校正值
    pub fn calibration(&self) -> Calibration {
        Calibration {
            offset: self.sensor.offset,
            scale: self.sensor.scale,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.machine.client_id
    }
}

impl Validate for MachineConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
