//! Foreman CLI - cooperative task orchestrator.

use anyhow::Result;
use clap::{Parser, Subcommand};
use foreman_core::{CostCategory, TaskPriority, TaskSpec, TaskStatus};
use foreman_ledger::CostLedger;
use foreman_scheduler::{handler_fn, Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Cooperative task orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo workload through the scheduler
    Demo {
        /// Number of demo tasks
        #[arg(long, default_value = "6")]
        tasks: usize,
        /// Concurrency cap
        #[arg(long, default_value = "3")]
        max_concurrent: usize,
    },
    /// Show the default budget configuration
    Budgets,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            tasks,
            max_concurrent,
        } => demo(tasks, max_concurrent).await?,
        Commands::Budgets => budgets().await,
    }

    Ok(())
}

async fn demo(tasks: usize, max_concurrent: usize) -> Result<()> {
    let config = SchedulerConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_tick_interval(Duration::from_millis(100));
    let scheduler = Arc::new(Scheduler::new(config));

    scheduler
        .register_handler(
            "compute",
            handler_fn(|task| async move {
                // Simulated work, proportional to the estimated cost.
                let millis = 100 + (task.estimated_cost * 20.0) as u64;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(serde_json::json!({ "task": task.name, "slept_ms": millis }))
            }),
        )
        .await;

    let mut ids = Vec::new();
    for i in 0..tasks {
        let priority = match i % 3 {
            0 => TaskPriority::Low,
            1 => TaskPriority::Medium,
            _ => TaskPriority::High,
        };
        let spec = TaskSpec::new(format!("demo task {i}"), "compute")
            .with_priority(priority)
            .with_estimated_cost(1.0 + i as f64)
            .with_cost_category(CostCategory::Compute);
        let id = scheduler.create_task(spec).await?;
        info!(task_id = %id, "demo task admitted");
        ids.push(id);
    }

    // A final task gated on everything above.
    let summary = scheduler
        .create_task(
            TaskSpec::new("demo summary", "compute")
                .with_priority(TaskPriority::Critical)
                .with_dependencies(ids),
        )
        .await?;
    info!(task_id = %summary, "summary task admitted");

    let runner = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    // Poll until every task settled (terminal or budget-paused).
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = scheduler.get_system_status().await;
        let settled = status.task_counts[&TaskStatus::Completed]
            + status.task_counts[&TaskStatus::Failed]
            + status.task_counts[&TaskStatus::Cancelled]
            + status.task_counts[&TaskStatus::Paused];
        if settled == status.total_tasks {
            break;
        }
    }

    scheduler.shutdown().await;
    runner.await?;

    let status = scheduler.get_system_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let report = scheduler
        .ledger()
        .export_report(Duration::from_secs(3600))
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn budgets() {
    let ledger = CostLedger::new();
    println!("Default budgets (daily)");
    for category in CostCategory::ALL {
        if let Some(status) = ledger.budget_status(category).await {
            println!(
                "  {:<16} limit {:>8.2}  used {:>8.2} ({:.1}%)",
                category.to_string(),
                status.limit,
                status.current_usage,
                status.usage_percent,
            );
        }
    }
}
