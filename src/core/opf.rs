use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::config::opf_config::OpfConfig;
use crate::core::cost_function::CostFunction;
use crate::core::line_export::{optimise_line_export, total_cost};
use crate::models::network::Network;
use crate::utils::logging::{self, OperationCategory};

/// Converged dispatch of one timestep. Vectors are aligned with the
/// network's zone, sector and interconnection order.
#[derive(Debug, Clone, PartialEq)]
pub struct OpfSolution {
    /// Cleared market price per zone (€/MWh).
    pub prices: Vec<f64>,
    /// Dispatched power per zone per sector: generation positive, loads as
    /// consumption magnitude (MW).
    pub sector_powers: Vec<Vec<f64>>,
    /// Signed flow per interconnection, `zone_from -> zone_to` positive (MW).
    pub flows: Vec<f64>,
    /// Number of full passes over all lines until convergence.
    pub iterations: usize,
    /// Total cost change of each completed pass (€). Every entry must be
    /// non-positive up to the tolerance; a positive one is an optimiser bug.
    pub pass_cost_changes: Vec<f64>,
}

/// Terminal state of one timestep's OPF.
#[derive(Debug, Clone, PartialEq)]
pub enum OpfOutcome {
    Converged(OpfSolution),
    /// The iteration cap was exhausted; the timestep produces no results.
    NotConverged,
}

impl OpfOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, OpfOutcome::Converged(_))
    }
}

/// Working state of one timestep: one node-level cost function per zone and
/// one signed flow per line. The network itself stays immutable, which keeps
/// timesteps independent of each other.
pub struct OpfSolver<'a> {
    network: &'a Network,
    cfg: &'a OpfConfig,
    availabilities: Vec<Vec<f64>>,
    cost_functions: Vec<CostFunction>,
    flows: Vec<f64>,
}

impl<'a> OpfSolver<'a> {
    pub fn new(network: &'a Network, timestep: NaiveDateTime, cfg: &'a OpfConfig) -> Result<Self> {
        let _timing = logging::start_timing("build_cost_functions", OperationCategory::CostModel);
        let mut availabilities = Vec::with_capacity(network.zones().len());
        let mut cost_functions = Vec::with_capacity(network.zones().len());
        for zone in network.zones() {
            let avails = zone.availabilities_at(timestep);
            cost_functions.push(
                zone.cost_function_from(&avails, cfg)
                    .with_context(|| format!("zone '{}' at {timestep}", zone.name()))?,
            );
            availabilities.push(avails);
        }
        Ok(Self {
            network,
            cfg,
            availabilities,
            cost_functions,
            flows: vec![0.0; network.interconnections().len()],
        })
    }

    /// Net power leaving a zone across all its lines, recomputed from the
    /// authoritative flow list on every read.
    fn zone_export(&self, zone: usize) -> f64 {
        self.network
            .interconnections()
            .iter()
            .zip(&self.flows)
            .map(|(line, &flow)| line.export_from(zone, flow))
            .sum()
    }

    /// Re-optimises one line's flow against the current state of both
    /// endpoint zones; returns the cost change (expected <= 0).
    fn optimise_export(&mut self, line_index: usize) -> Result<f64> {
        let _timing = logging::start_timing("optimise_export", OperationCategory::LineOptimisation);
        let line = &self.network.interconnections()[line_index];
        let current = self.flows[line_index];

        let from_other = self.zone_export(line.zone_from()) - current;
        let to_other = self.zone_export(line.zone_to()) + current;
        let from_cf = self.cost_functions[line.zone_from()].to_line_scope(from_other)?;
        let to_cf = self.cost_functions[line.zone_to()].to_line_scope(to_other)?;

        let current_cost = total_cost(&from_cf, &to_cf, current)?;
        let optimum = optimise_line_export(&from_cf, &to_cf, line.power_rating(), self.cfg)
            .with_context(|| {
                format!(
                    "optimising line {} -> {}",
                    line.zone_from_name(),
                    line.zone_to_name()
                )
            })?;

        self.flows[line_index] = optimum.power;
        Ok(optimum.cost - current_cost)
    }

    fn clear_zone(&self, zone: usize) -> Result<crate::models::zone::ZoneClearing> {
        let _timing = logging::start_timing("market_optimisation", OperationCategory::MarketClearing);
        self.network.zones()[zone].market_optimisation(
            &self.cost_functions[zone],
            self.zone_export(zone),
            &self.availabilities[zone],
            self.cfg,
        )
    }

    /// Runs the timestep to a terminal state: autarky clearing, line
    /// convergence loop, final clearing.
    pub fn run(mut self) -> Result<OpfOutcome> {
        let _timing = logging::start_timing("run_opf", OperationCategory::Opf);

        // Initial clearing with zero net export validates every zone's
        // dispatch before any trade happens.
        for zone in 0..self.network.zones().len() {
            self.clear_zone(zone)?;
        }

        let mut iterations = None;
        let mut pass_cost_changes = Vec::new();
        for pass in 1..=self.cfg.iter_max {
            let mut cost_change = 0.0;
            for line_index in 0..self.network.interconnections().len() {
                cost_change += self.optimise_export(line_index)?;
            }
            pass_cost_changes.push(cost_change);
            if cost_change > self.cfg.tol {
                // Mathematically impossible for a correct optimiser; kept as
                // a loud defect signal rather than an abort.
                warn!(
                    pass,
                    cost_change, "line optimisation increased total cost"
                );
            }
            if cost_change.abs() < self.cfg.tol {
                iterations = Some(pass);
                break;
            }
        }
        let Some(iterations) = iterations else {
            debug!(iter_max = self.cfg.iter_max, "OPF did not converge");
            return Ok(OpfOutcome::NotConverged);
        };

        // Final clearing fixes per-sector dispatch consistent with the
        // converged flows.
        let mut prices = Vec::with_capacity(self.network.zones().len());
        let mut sector_powers = Vec::with_capacity(self.network.zones().len());
        for zone in 0..self.network.zones().len() {
            let clearing = self.clear_zone(zone)?;
            prices.push(clearing.price);
            sector_powers.push(clearing.powers);
        }

        Ok(OpfOutcome::Converged(OpfSolution {
            prices,
            sector_powers,
            flows: self.flows,
            iterations,
            pass_cost_changes,
        }))
    }
}

impl Network {
    /// Runs the OPF for a single timestep. Takes `&self`: the solution is
    /// returned, not written back, so independent timesteps can run in
    /// parallel; persist with [`Network::store_solution`].
    pub fn run_opf(&self, timestep: NaiveDateTime, cfg: &OpfConfig) -> Result<OpfOutcome> {
        OpfSolver::new(self, timestep, cfg)?.run()
    }

    /// Appends a converged solution to the zones', sectors' and lines'
    /// simulated series.
    pub fn store_solution(&mut self, timestep: NaiveDateTime, solution: &OpfSolution) {
        for (zone, (&price, powers)) in self
            .zones_mut()
            .iter_mut()
            .zip(solution.prices.iter().zip(&solution.sector_powers))
        {
            zone.record_price(timestep, price);
            for (sector, &power) in zone.sectors_mut().iter_mut().zip(powers) {
                sector.record_power(timestep, power);
            }
        }
        for (line, &flow) in self
            .interconnections_mut()
            .iter_mut()
            .zip(&solution.flows)
        {
            line.record_flow(timestep, flow);
        }
    }
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

    fn constant_series(value: f64) -> TimeSeries {
        TimeSeries::from_samples(vec![(ts(12), value)])
    }

    fn sector_model(zone: &mut Zone, index: usize, no_power: f64, full_power: f64) {
        zone.sectors_mut()[index]
            .set_price_model(SectorPriceModel::new(no_power, full_power))
            .unwrap();
    }

    /// Zone A: flat 20 €/MWh generation, 10 GW available. Zone B: 50 MW of
    /// load valuing energy at 100 €/MWh. Line rating 30 MW.
    fn two_zone_network() -> Network {
        let mut network = Network::new();

        let mut zone_a = Zone::new("A", constant_series(20.0));
        zone_a.add_sector("gas", Role::Generator, true, constant_series(10_000.0));
        sector_model(&mut zone_a, 0, 20.0, 20.0);
        network.add_zone(zone_a).unwrap();

        let mut zone_b = Zone::new("B", constant_series(80.0));
        zone_b.add_sector("demand", Role::Load, true, constant_series(50.0));
        sector_model(&mut zone_b, 0, 100.0, 100.0);
        network.add_zone(zone_b).unwrap();

        network
            .add_interconnection("A", "B", 30.0, TimeSeries::new())
            .unwrap();
        network
    }

    #[test]
    fn two_zone_line_saturates_at_rating() {
        let network = two_zone_network();
        let cfg = OpfConfig::default();
        let outcome = network.run_opf(ts(12), &cfg).unwrap();
        let OpfOutcome::Converged(solution) = outcome else {
            panic!("expected convergence");
        };

        assert!((solution.flows[0] - 30.0).abs() < cfg.tol);
        // Zone A clears at its flat generation price.
        assert!((solution.prices[0] - 20.0).abs() < cfg.tol);
        // Zone B sheds the unserved 20 MW at its demand valuation.
        assert!((solution.prices[1] - 100.0).abs() < cfg.tol);
        assert!((solution.sector_powers[0][0] - 30.0).abs() < cfg.tol);
        assert!((solution.sector_powers[1][0] - 30.0).abs() < cfg.tol);
    }

    #[test]
    fn isolated_zone_converges_in_one_pass() {
        let mut network = Network::new();
        let mut zone = Zone::new("A", constant_series(25.0));
        zone.add_sector("gas", Role::Generator, true, constant_series(100.0));
        zone.add_sector("demand", Role::Load, false, constant_series(60.0));
        sector_model(&mut zone, 0, 10.0, 30.0);
        sector_model(&mut zone, 1, 3000.0, 3000.0);
        network.add_zone(zone).unwrap();

        let cfg = OpfConfig::default();
        let OpfOutcome::Converged(solution) = network.run_opf(ts(12), &cfg).unwrap() else {
            panic!("expected convergence");
        };
        assert_eq!(solution.iterations, 1);
        assert!(solution.flows.is_empty());

        // Identical to clearing the zone once directly at zero export.
        let zone = network.zone("A").unwrap();
        let avails = zone.availabilities_at(ts(12));
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();
        let clearing = zone.market_optimisation(&cf, 0.0, &avails, &cfg).unwrap();
        assert_eq!(solution.prices[0], clearing.price);
        assert_eq!(solution.sector_powers[0], clearing.powers);
    }

    #[test]
    fn rerunning_a_timestep_is_deterministic() {
        let network = two_zone_network();
        let cfg = OpfConfig::default();
        let first = network.run_opf(ts(12), &cfg).unwrap();
        let second = network.run_opf(ts(12), &cfg).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dispatch_balances_in_every_zone() {
        let network = two_zone_network();
        let cfg = OpfConfig::default();
        let OpfOutcome::Converged(solution) = network.run_opf(ts(12), &cfg).unwrap() else {
            panic!("expected convergence");
        };

        for (z, zone) in network.zones().iter().enumerate() {
            let net_dispatch: f64 = zone
                .sectors()
                .iter()
                .zip(&solution.sector_powers[z])
                .map(|(s, &p)| match s.role() {
                    Role::Generator => p,
                    Role::Load => -p,
                })
                .sum();
            let export: f64 = network
                .interconnections()
                .iter()
                .zip(&solution.flows)
                .map(|(line, &flow)| line.export_from(z, flow))
                .sum();
            assert!(
                (net_dispatch - export).abs() < cfg.tol,
                "zone {z}: dispatch {net_dispatch} vs export {export}"
            );
        }
    }

    #[test]
    fn storing_a_solution_appends_all_series() {
        let mut network = two_zone_network();
        let cfg = OpfConfig::default();
        let OpfOutcome::Converged(solution) = network.run_opf(ts(12), &cfg).unwrap() else {
            panic!("expected convergence");
        };
        network.store_solution(ts(12), &solution);

        assert_eq!(
            network.zone("A").unwrap().simulated_prices().value_at(ts(12)),
            Some(solution.prices[0])
        );
        assert_eq!(
            network.zone("B").unwrap().sectors()[0]
                .simulated_power()
                .value_at(ts(12)),
            Some(solution.sector_powers[1][0])
        );
        assert_eq!(
            network.interconnections()[0].simulated_flows().value_at(ts(12)),
            Some(solution.flows[0])
        );
    }
}
