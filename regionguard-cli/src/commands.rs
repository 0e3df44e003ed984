use std::sync::Arc;

use anyhow::{Context, Result};
use regionguard_cli::{Orchestrator, RunOptions, TestReport};
use regionguard_common::{RegionGuardConfig, RegionGuardMetrics};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::Commands;

/// Execute `command`, returning the process exit code.
///
/// `main` exits the process right after, so every command that can emit a
/// failover event waits for its notifications first.
pub async fn handle_command(command: Commands, config: RegionGuardConfig) -> Result<i32> {
    match command {
        Commands::Run {
            report_file,
            skip_e2e,
            metrics_file,
        } => {
            let metrics = Arc::new(RegionGuardMetrics::new("orchestrator")?);
            let orchestrator = Orchestrator::from_config(&config, Some(Arc::clone(&metrics))).await?;
            let report = orchestrator
                .run_evaluation_cycle(&RunOptions { skip_e2e })
                .await;
            orchestrator.manager().flush_notifications().await;

            print_json(&report)?;
            if let Some(path) = report_file {
                report.write_to(&path)?;
                info!("Report written to {}", path.display());
            }
            if let Some(path) = metrics_file {
                std::fs::write(&path, metrics.export()?)
                    .with_context(|| format!("failed to write metrics to {}", path.display()))?;
            }
            Ok(report.exit_code())
        }
        Commands::Watch {
            report_file,
            skip_e2e,
        } => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, shutting down");
                    let _ = shutdown_tx.send(());
                }
            });

            orchestrator
                .run_scheduled(RunOptions { skip_e2e }, shutdown_rx, |report: &TestReport| {
                    if let Some(path) = &report_file {
                        if let Err(e) = report.write_to(path) {
                            error!("{:#}", e);
                        }
                    }
                })
                .await?;
            Ok(0)
        }
        Commands::Status => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            let manager = orchestrator.manager();
            let routing = manager.routing_state().await;
            print_json(&serde_json::json!({
                "state": manager.state(),
                "activeRegion": manager.active_region().await,
                "consecutiveFailureCount": routing.consecutive_failure_count,
                "lastFailoverAt": routing.last_failover_at,
                "lastFailbackAt": routing.last_failback_at,
                "events": routing.history.len(),
            }))?;
            Ok(0)
        }
        Commands::Report => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            print_json(&orchestrator.manager().generate_failover_report().await)?;
            Ok(0)
        }
        Commands::Failover { reason } => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            let result = orchestrator.manager().execute_manual_failover(&reason).await;
            orchestrator.manager().flush_notifications().await;
            print_json(&result?)?;
            Ok(0)
        }
        Commands::Failback { reason } => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            let result = orchestrator.manager().execute_failback(&reason).await;
            orchestrator.manager().flush_notifications().await;
            print_json(&result?)?;
            Ok(0)
        }
        Commands::DrTest => {
            let orchestrator = Orchestrator::from_config(&config, None).await?;
            let result = orchestrator.manager().test_disaster_recovery().await;
            orchestrator.manager().flush_notifications().await;
            let result = result?;
            print_json(&result)?;
            Ok(if result.success { 0 } else { 1 })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
