use crate::core::batch::BatchReport;
use crate::models::network::Network;

const MAX_LISTED_FAILURES: usize = 20;

/// Prints the end-of-run summary to stdout.
pub fn print_batch_report(network: &Network, report: &BatchReport) {
    println!("\nOPF Batch Summary");
    println!("=================");
    println!("Zones:              {}", network.zones().len());
    println!("Interconnections:   {}", network.interconnections().len());
    println!("Timesteps:          {}", report.total);
    println!("Converged:          {}", report.converged);
    println!("Not converged:      {}", report.failed_count());
    if report.total > 0 {
        let rate = 100.0 * report.converged as f64 / report.total as f64;
        println!("Convergence rate:   {:.1}%", rate);
    }

    if !report.failed.is_empty() {
        println!("\nTimesteps without a solution:");
        for timestep in report.failed.iter().take(MAX_LISTED_FAILURES) {
            println!("  {timestep}");
        }
        if report.failed.len() > MAX_LISTED_FAILURES {
            println!("  ... and {} more", report.failed.len() - MAX_LISTED_FAILURES);
        }
    }
    println!();
}
