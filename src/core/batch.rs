use anyhow::Result;
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::config::opf_config::OpfConfig;
use crate::core::opf::{OpfOutcome, OpfSolution};
use crate::models::network::Network;
use crate::utils::logging::{self, OperationCategory};

/// Summary of one batch run over the network's datetime index.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub total: usize,
    pub converged: usize,
    /// Timesteps whose OPF hit the iteration cap; they carry no results.
    pub failed: Vec<NaiveDateTime>,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} timesteps ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar
}

/// Solves every timestep of the network's shared datetime index and writes
/// the converged solutions back. Timesteps are independent, so the solve
/// phase can fan out over rayon; persistence always happens in index order.
pub fn run_batch(
    network: &mut Network,
    cfg: &OpfConfig,
    parallel: bool,
    limit: Option<usize>,
) -> Result<BatchReport> {
    let _timing = logging::start_timing("run_batch", OperationCategory::Opf);

    let mut timesteps: Vec<NaiveDateTime> = network.datetime_index().to_vec();
    if let Some(limit) = limit {
        timesteps.truncate(limit);
    }
    info!(
        timesteps = timesteps.len(),
        parallel, "starting OPF batch run"
    );

    let bar = progress_bar(timesteps.len());
    let solve = |&timestep: &NaiveDateTime| -> Result<(NaiveDateTime, OpfOutcome)> {
        let outcome = network.run_opf(timestep, cfg)?;
        bar.inc(1);
        Ok((timestep, outcome))
    };

    let outcomes: Vec<(NaiveDateTime, OpfOutcome)> = if parallel {
        timesteps.par_iter().map(solve).collect::<Result<_>>()?
    } else {
        timesteps.iter().map(solve).collect::<Result<_>>()?
    };
    bar.finish();

    let mut converged: Vec<(NaiveDateTime, OpfSolution)> = Vec::with_capacity(outcomes.len());
    let mut failed = Vec::new();
    for (timestep, outcome) in outcomes {
        match outcome {
            OpfOutcome::Converged(solution) => converged.push((timestep, solution)),
            OpfOutcome::NotConverged => failed.push(timestep),
        }
    }

    // par_iter preserves input order, but sorting keeps persistence
    // independent of the solve schedule.
    converged.sort_by_key(|(timestep, _)| *timestep);
    for (timestep, solution) in &converged {
        network.store_solution(*timestep, solution);
    }

    Ok(BatchReport {
        total: timesteps.len(),
        converged: converged.len(),
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::data::time_series::TimeSeries;
    use crate::models::sector::{Role, SectorPriceModel};
    use crate::models::zone::Zone;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn series(values: &[(u32, f64)]) -> TimeSeries {
        TimeSeries::from_samples(values.iter().map(|&(h, v)| (ts(h), v)).collect())
    }

    fn small_network() -> Network {
        let mut network = Network::new();
        let mut zone = Zone::new("A", series(&[(0, 25.0), (1, 25.0), (2, 25.0)]));
        zone.add_sector(
            "gas",
            Role::Generator,
            true,
            series(&[(0, 100.0), (1, 100.0), (2, 100.0)]),
        );
        zone.add_sector(
            "demand",
            Role::Load,
            false,
            series(&[(0, 40.0), (1, 60.0), (2, 80.0)]),
        );
        zone.sectors_mut()[0]
            .set_price_model(SectorPriceModel::new(10.0, 30.0))
            .unwrap();
        zone.sectors_mut()[1]
            .set_price_model(SectorPriceModel::new(3000.0, 3000.0))
            .unwrap();
        network.add_zone(zone).unwrap();
        network
    }

    #[test]
    fn sequential_run_covers_the_whole_index() {
        let mut network = small_network();
        let report = run_batch(&mut network, &OpfConfig::default(), false, None).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.converged, 3);
        assert!(report.failed.is_empty());
        assert_eq!(network.zone("A").unwrap().simulated_prices().len(), 3);
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let cfg = OpfConfig::default();
        let mut sequential = small_network();
        run_batch(&mut sequential, &cfg, false, None).unwrap();
        let mut parallel = small_network();
        run_batch(&mut parallel, &cfg, true, None).unwrap();

        for hour in 0..3 {
            assert_eq!(
                sequential
                    .zone("A")
                    .unwrap()
                    .simulated_prices()
                    .value_at(ts(hour)),
                parallel
                    .zone("A")
                    .unwrap()
                    .simulated_prices()
                    .value_at(ts(hour)),
            );
        }
    }

    #[test]
    fn limit_truncates_the_run() {
        let mut network = small_network();
        let report = run_batch(&mut network, &OpfConfig::default(), false, Some(1)).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(network.zone("A").unwrap().simulated_prices().len(), 1);
    }
}
