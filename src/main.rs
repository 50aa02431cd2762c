use simulation::{simulate_carts, simulate_scaling};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

pub mod simulation;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATED ENTITY SIMULATIONS                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Run 1: a few replicas, few entities, heavy contention
    let stats = simulate_carts(3, 200, 2, 1).await;
    stats.print();
    converged &= stats.converged();

    // Run 2: more replicas and entities
    let stats = simulate_carts(6, 500, 10, 2).await;
    stats.print();
    converged &= stats.converged();

    // Run 3: scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (Carts)                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    converged &= simulate_scaling(8, 2).await;

    if converged {
        println!("\n✓ All replicas converged!");
        ExitCode::SUCCESS
    } else {
        println!("\n✗ Some replicas diverged");
        ExitCode::FAILURE
    }
}
