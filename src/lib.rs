pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::MachineConfig;

pub use app::intake::OrderRequest;
pub use self::core::{
    engine::{DispenseEngine, EngineSettings, EngineState},
    platform::PlatformState,
    scheduler::OrderScheduler,
};
pub use utils::error::{DispenseError, Result};
