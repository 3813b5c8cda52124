pub mod toml_config;

pub use toml_config::MachineConfig;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "vend-dispense")]
#[command(about = "Dispenses a vending order on the bench machine")]
pub struct CliConfig {
    #[arg(long, default_value = "machine.toml")]
    pub config: String,

    #[arg(long, help = "Path to the order JSON payload")]
    pub order: String,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Validate and print the schedule without dispensing")]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl crate::utils::validation::Validate for CliConfig {
    fn validate(&self) -> crate::utils::error::Result<()> {
        crate::utils::validation::validate_path("config", &self.config)?;
        crate::utils::validation::validate_path("order", &self.order)
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use crate::utils::validation::Validate;

    #[test]
    fn test_cli_flags() {
        let config = CliConfig::try_parse_from([
            "vend-dispense",
            "--order",
            "order.json",
            "--dry-run",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(config.config, "machine.toml");
        assert_eq!(config.order, "order.json");
        assert!(config.dry_run);
        assert!(config.json_logs);
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_order_is_required() {
        assert!(CliConfig::try_parse_from(["vend-dispense"]).is_err());
    }
}
