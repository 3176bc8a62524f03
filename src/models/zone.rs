use anyhow::{ensure, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::opf_config::OpfConfig;
use crate::core::cost_function::CostFunction;
use crate::data::time_series::TimeSeries;
use crate::models::sector::{Role, Sector};
use crate::models::storage::Storage;

/// Dispatch of one zone at one clearing price. `powers` is aligned with the
/// zone's sector list: generation in MW for generators, consumption magnitude
/// in MW for loads.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneClearing {
    pub price: f64,
    pub powers: Vec<f64>,
}

/// An aggregated market area with one clearing price per timestep.
///
/// A zone owns its sectors and historical price series. It holds no export
/// cache and no references to its interconnections: the net export is always
/// handed in by the caller, recomputed from the authoritative line flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    name: String,
    sectors: Vec<Sector>,
    historical_prices: TimeSeries,
    simulated_prices: TimeSeries,
}

impl Zone {
    pub fn new(name: &str, historical_prices: TimeSeries) -> Self {
        Self {
            name: name.to_string(),
            sectors: Vec::new(),
            historical_prices,
            simulated_prices: TimeSeries::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut [Sector] {
        &mut self.sectors
    }

    pub fn historical_prices(&self) -> &TimeSeries {
        &self.historical_prices
    }

    pub fn simulated_prices(&self) -> &TimeSeries {
        &self.simulated_prices
    }

    pub fn add_sector(
        &mut self,
        name: &str,
        role: Role,
        controllable: bool,
        historical_power: TimeSeries,
    ) {
        self.sectors
            .push(Sector::new(name.to_string(), role, controllable, historical_power));
    }

    /// Adds a storage as its two sector halves, load first.
    pub fn add_storage(&mut self, name: &str, controllable: bool, historical_power: &TimeSeries) {
        let (load, generator) = Storage::new(name, controllable, historical_power).into_halves();
        self.sectors.push(load);
        self.sectors.push(generator);
    }

    pub fn record_price(&mut self, timestep: NaiveDateTime, price: f64) {
        self.simulated_prices.push(timestep, price);
    }

    /// Available power of every sector at a timestep, aligned with `sectors`.
    pub fn availabilities_at(&self, timestep: NaiveDateTime) -> Vec<f64> {
        self.sectors.iter().map(|s| s.available_at(timestep)).collect()
    }

    /// The net export reachable by fully satisfying all loads and producing
    /// nothing; the low end of the zone's feasible export range.
    pub fn min_net_export(&self, availabilities: &[f64]) -> f64 {
        self.sectors
            .iter()
            .zip(availabilities)
            .map(|(s, &a)| s.floor(a))
            .sum()
    }

    /// All distinct threshold prices of the zone's sector models, sorted.
    fn threshold_prices(&self) -> Result<Vec<f64>> {
        let mut prices = Vec::with_capacity(self.sectors.len() * 2);
        for sector in &self.sectors {
            let model = sector.price_model()?;
            prices.push(model.price_no_power);
            prices.push(model.price_full_power);
        }
        prices.sort_by(f64::total_cmp);
        prices.dedup();
        Ok(prices)
    }

    /// Minimum and maximum net export attainable at a given market price.
    fn export_bounds_at(&self, price: f64, availabilities: &[f64]) -> Result<(f64, f64)> {
        let mut min_export = 0.0;
        let mut max_export = 0.0;
        for (sector, &available) in self.sectors.iter().zip(availabilities) {
            let floor = sector.floor(available);
            let (low, high) = sector.price_model()?.offer_bounds(sector.role(), price, available);
            min_export += floor + low;
            max_export += floor + high;
        }
        Ok((min_export, max_export))
    }

    /// Builds the zone's node-level cost function at a timestep from its
    /// sectors' price models and available powers.
    ///
    /// Sweeping the distinct threshold prices upward, a new `(power, cost)`
    /// point is appended whenever the attainable minimum export grows, with
    /// the cost integrated trapezoidally over the linear price segment.
    /// A degenerate step model contributes a second point at the same price:
    /// a vertical step in the price curve, a kink in the cost curve.
    pub fn build_cost_function(
        &self,
        timestep: NaiveDateTime,
        cfg: &OpfConfig,
    ) -> Result<CostFunction> {
        let availabilities = self.availabilities_at(timestep);
        self.cost_function_from(&availabilities, cfg)
            .with_context(|| format!("building cost function for zone '{}'", self.name))
    }

    pub fn cost_function_from(
        &self,
        availabilities: &[f64],
        cfg: &OpfConfig,
    ) -> Result<CostFunction> {
        let min_net = self.min_net_export(availabilities);
        let mut points = vec![(min_net, 0.0)];
        let mut prices: Vec<(f64, f64)> = Vec::new();

        let thresholds = self.threshold_prices()?;
        let mut cost = 0.0;
        let mut last_power = min_net;
        let mut last_price = thresholds.first().copied().unwrap_or(0.0);

        for &price in &thresholds {
            let (min_export, max_export) = self.export_bounds_at(price, availabilities)?;
            if min_export > last_power + cfg.tol {
                cost += (min_export - last_power) * (price + last_price) / 2.0;
                points.push((min_export, cost));
                prices.push((last_price, price));
                last_power = min_export;
            }
            if max_export > last_power + cfg.tol {
                cost += (max_export - last_power) * price;
                points.push((max_export, cost));
                prices.push((price, price));
                last_power = max_export;
            }
            last_price = price;
        }

        CostFunction::new(points, prices, cfg.tol)
    }

    /// Resolves every sector's dispatched power for a known net export.
    ///
    /// The market price follows from the cost function. Sectors whose ramp
    /// pins them uniquely at this price are set directly; sectors stepping
    /// exactly at the price are resolved by merit-order priority, each pushed
    /// as close to its minimum offer as the remaining margin allows.
    pub fn market_optimisation(
        &self,
        cost_function: &CostFunction,
        export: f64,
        availabilities: &[f64],
        cfg: &OpfConfig,
    ) -> Result<ZoneClearing> {
        ensure!(
            !self.sectors.is_empty(),
            "zone '{}' has no sectors to dispatch",
            self.name
        );
        let price = cost_function
            .compute_price(export)
            .with_context(|| format!("clearing zone '{}' at export {export}", self.name))?;

        let min_net = self.min_net_export(availabilities);
        let target = export - min_net;

        let mut bounds = Vec::with_capacity(self.sectors.len());
        let mut min_offer = 0.0;
        let mut max_offer = 0.0;
        for (sector, &available) in self.sectors.iter().zip(availabilities) {
            let (low, high) = sector.price_model()?.offer_bounds(sector.role(), price, available);
            min_offer += low;
            max_offer += high;
            bounds.push((low, high));
        }
        ensure!(
            min_offer - cfg.tol <= target && target <= max_offer + cfg.tol,
            "zone '{}': export {export} unreachable at price {price} (offers [{min_offer}, {max_offer}], target {target})",
            self.name
        );

        // Stable sort keeps the declaration order within each priority class.
        let mut order: Vec<usize> = (0..self.sectors.len()).collect();
        order.sort_by_key(|&i| self.sectors[i].dispatch_priority());

        let mut margin = (max_offer - target).max(0.0);
        let mut offers = vec![0.0; self.sectors.len()];
        for &i in &order {
            let (low, high) = bounds[i];
            let reduction = margin.min(high - low);
            offers[i] = high - reduction;
            margin -= reduction;
        }
        ensure!(
            margin.abs() <= cfg.tol,
            "zone '{}': dispatch bookkeeping did not converge to the target export (residual {margin})",
            self.name
        );

        let powers = self
            .sectors
            .iter()
            .zip(&offers)
            .zip(availabilities)
            .map(|((sector, &offer), &available)| match sector.role() {
                Role::Generator => offer,
                // The offer is shed power; report the remaining consumption.
                Role::Load => available - offer,
            })
            .collect();

        Ok(ZoneClearing { price, powers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::TOL;
    use crate::models::sector::SectorPriceModel;

    fn set_model(zone: &mut Zone, index: usize, no_power: f64, full_power: f64) {
        zone.sectors_mut()[index]
            .set_price_model(SectorPriceModel::new(no_power, full_power))
            .unwrap();
    }

    /// One ramping generator (10 -> 30 €/MWh, 100 MW) and one fixed load
    /// (80 MW, shedding at 500 €/MWh).
    fn ramp_zone() -> (Zone, Vec<f64>) {
        let mut zone = Zone::new("A", TimeSeries::new());
        zone.add_sector("gas", Role::Generator, true, TimeSeries::new());
        zone.add_sector("demand", Role::Load, false, TimeSeries::new());
        set_model(&mut zone, 0, 10.0, 30.0);
        set_model(&mut zone, 1, 500.0, 500.0);
        (zone, vec![100.0, 80.0])
    }

    #[test]
    fn cost_function_ramp_and_step() {
        let (zone, avails) = ramp_zone();
        let cfg = OpfConfig::default();
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();

        // Floor: full load, no production.
        assert!((cf.min_power() - -80.0).abs() < TOL);
        // Ramp to +20 net export at 30 €/MWh, then an 80 MW shedding step at 500.
        assert!((cf.max_power() - 100.0).abs() < TOL);
        assert_eq!(cf.points().len(), 3);
        assert_eq!(cf.prices()[0], (10.0, 30.0));
        assert_eq!(cf.prices()[1], (500.0, 500.0));

        // Trapezoid over the ramp: 100 MW * (10 + 30)/2.
        assert!((cf.compute_cost(20.0).unwrap() - 2000.0).abs() < TOL);
        // Vertical step: 80 MW shed at 500 €/MWh on top.
        assert!((cf.compute_cost(100.0).unwrap() - 42000.0).abs() < TOL);

        assert!((cf.compute_price(-80.0).unwrap() - 10.0).abs() < TOL);
        assert!((cf.compute_price(-30.0).unwrap() - 20.0).abs() < TOL);
    }

    #[test]
    fn two_sectors_stepping_at_the_same_price() {
        let mut zone = Zone::new("A", TimeSeries::new());
        zone.add_sector("coal_a", Role::Generator, true, TimeSeries::new());
        zone.add_sector("coal_b", Role::Generator, true, TimeSeries::new());
        set_model(&mut zone, 0, 25.0, 25.0);
        set_model(&mut zone, 1, 25.0, 25.0);
        let avails = vec![40.0, 60.0];
        let cfg = OpfConfig::default();

        // Contributions are additive: one 100 MW step at 25 €/MWh.
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();
        assert_eq!(cf.points().len(), 2);
        assert_eq!(cf.prices(), [(25.0, 25.0)]);
        assert!((cf.max_power() - 100.0).abs() < TOL);
        assert!((cf.compute_cost(100.0).unwrap() - 2500.0).abs() < TOL);

        // At 70 MW export both sectors step at 25; the first declared one is
        // pushed to its minimum first.
        let clearing = zone.market_optimisation(&cf, 70.0, &avails, &cfg).unwrap();
        assert!((clearing.price - 25.0).abs() < TOL);
        assert!((clearing.powers.iter().sum::<f64>() - 70.0).abs() < TOL);
        assert!((clearing.powers[0] - 10.0).abs() < TOL);
        assert!((clearing.powers[1] - 60.0).abs() < TOL);
    }

    #[test]
    fn clearing_balances_dispatch_against_export() {
        let (zone, avails) = ramp_zone();
        let cfg = OpfConfig::default();
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();

        for export in [-80.0, -50.0, 0.0, 20.0, 60.0] {
            let clearing = zone.market_optimisation(&cf, export, &avails, &cfg).unwrap();
            let net: f64 = zone
                .sectors()
                .iter()
                .zip(&clearing.powers)
                .map(|(s, &p)| match s.role() {
                    Role::Generator => p,
                    Role::Load => -p,
                })
                .sum();
            assert!(
                (net - export).abs() < TOL,
                "dispatch imbalance at export {export}: {net}"
            );
        }
    }

    #[test]
    fn priority_sheds_storage_before_real_load() {
        // A storage load and a real load both step at the clearing price; the
        // margin must shed the storage's charging first.
        let mut zone = Zone::new("A", TimeSeries::new());
        zone.add_sector("demand", Role::Load, false, TimeSeries::new());
        zone.add_storage("battery", true, &TimeSeries::new());
        set_model(&mut zone, 0, 50.0, 50.0);
        set_model(&mut zone, 1, 50.0, 50.0); // battery load half
        set_model(&mut zone, 2, 50.0, 80.0); // battery generator half
        let avails = vec![60.0, 30.0, 0.0];
        let cfg = OpfConfig::default();
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();

        // Export -60: exactly 30 MW must be shed at price 50. Real demand
        // keeps consuming; the battery stops charging entirely.
        let clearing = zone.market_optimisation(&cf, -60.0, &avails, &cfg).unwrap();
        assert!((clearing.price - 50.0).abs() < TOL);
        assert!((clearing.powers[0] - 60.0).abs() < TOL);
        assert!((clearing.powers[1] - 0.0).abs() < TOL);
    }

    #[test]
    fn unreachable_export_is_an_error() {
        let (zone, avails) = ramp_zone();
        let cfg = OpfConfig::default();
        let cf = zone.cost_function_from(&avails, &cfg).unwrap();
        assert!(zone.market_optimisation(&cf, 150.0, &avails, &cfg).is_err());
    }
}
