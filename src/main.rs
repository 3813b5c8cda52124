use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use vend_dispense::adapters::simulated::{SimLane, SimulatedMachine};
use vend_dispense::app::intake::{status_topic, OrderRequest};
use vend_dispense::core::engine::DispenseEngine;
use vend_dispense::core::platform::PlatformState;
use vend_dispense::domain::model::Order;
use vend_dispense::utils::error::{DispenseError, ErrorSeverity};
use vend_dispense::utils::{logger, validation::Validate};
use vend_dispense::{CliConfig, MachineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match MachineConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(exit_code(&e));
        }
    };

    // 初始化日誌
    if cli.json_logs || config.logging.json {
        logger::init_json_logger(cli.verbose, &config.logging.level);
    } else {
        logger::init_cli_logger(cli.verbose, &config.logging.level);
    }

    tracing::info!("Starting vend-dispense for {}", config.client_id());
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 驗證配置
    if let Err(e) = cli.validate().and_then(|_| config.validate()) {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(exit_code(&e));
    }

    // 讀取並驗證訂單
    let payload = tokio::fs::read(&cli.order)
        .await
        .with_context(|| format!("reading order payload {}", cli.order))?;
    let order = match OrderRequest::from_json(&payload)
        .and_then(|request| request.into_order(&config.channel_map()?))
    {
        Ok(order) => order,
        Err(e) => {
            tracing::error!("❌ Order rejected: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(exit_code(&e));
        }
    };

    if cli.dry_run {
        print_schedule(&order);
        return Ok(());
    }

    // 以模擬機台執行出貨，依訂單內容補貨
    let machine = stocked_machine(&order);
    let settings = config.engine_settings();
    let platform_state = PlatformState::new(settings.max_weight_g, settings.max_volume);
    let mut engine = DispenseEngine::new(
        machine.sensor(),
        machine.lanes(),
        machine.platform(),
        platform_state,
        settings,
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            interrupt.cancel();
        }
    });

    let result = match engine.initialize().await {
        Ok(()) => engine.run_order(order, &cancel).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            let ack = serde_json::to_string_pretty(&outcome)?;
            tracing::info!("📤 Publishing ack on {}", status_topic(config.client_id()));
            println!("{}", ack);
            if outcome.is_success() {
                println!("✅ Order {} delivered", outcome.order_id);
            } else {
                println!(
                    "⚠️ Order {} partially delivered ({} item(s) outstanding)",
                    outcome.order_id,
                    outcome.undelivered_items.len()
                );
            }
        }
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Dispense failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let code = exit_code(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

/// 根據錯誤嚴重程度決定退出碼
fn exit_code(e: &DispenseError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn stocked_machine(order: &Order) -> SimulatedMachine {
    order
        .groups()
        .flat_map(|group| group.items.iter())
        .fold(SimulatedMachine::new(), |machine, item| {
            machine.with_lane(
                item.channel,
                SimLane::stocked(item.unit_weight_g, item.remaining),
            )
        })
}

fn print_schedule(order: &Order) {
    println!("📋 Order {} ({} units)", order.id(), order.remaining_units());
    for group in order.groups() {
        println!("  {}", group.row);
        for item in &group.items {
            println!(
                "    {} x{} from {} ({}g, vol {})",
                item.sku, item.remaining, item.channel, item.unit_weight_g, item.unit_volume
            );
        }
    }
}
