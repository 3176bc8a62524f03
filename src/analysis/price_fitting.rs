//! Fits sector price models from historical prices and use ratios.
//!
//! The fit is a brute-force grid search: every `(low, high)` threshold pair on
//! the price grid is scored by the squared error between its modelled use
//! ratio and the observed `power / availability` samples, and the best pair is
//! mapped back to the role's `(price_no_power, price_full_power)` order.

use anyhow::{ensure, Result};

use crate::config::opf_config::FitConfig;
use crate::models::network::{Network, PriceModelSet, SectorModelEntry};
use crate::models::sector::{Role, Sector, SectorPriceModel};
use crate::models::zone::Zone;
use crate::utils::logging::{self, OperationCategory};

/// Fraction of its available power the model commits at `price`. Generators
/// ramp up with price, loads keep consuming until price crosses the ramp.
fn modelled_use_ratio(model: &SectorPriceModel, role: Role, price: f64) -> f64 {
    let (low, high) = model.ramp_bounds(role);
    let committed = if low == high {
        if price >= low { 1.0 } else { 0.0 }
    } else {
        ((price - low) / (high - low)).clamp(0.0, 1.0)
    };
    match role {
        Role::Generator => committed,
        Role::Load => 1.0 - committed,
    }
}

/// Observed `(price, use_ratio)` samples for one sector. Timesteps without
/// availability carry no information and are skipped.
fn use_ratio_samples(zone: &Zone, sector: &Sector, tol: f64) -> Vec<(f64, f64)> {
    zone.historical_prices()
        .iter()
        .filter_map(|&(timestep, price)| {
            let available = sector.available_at(timestep);
            if available < tol {
                return None;
            }
            let power = sector.historical_power().value_at(timestep)?;
            Some((price, (power.abs() / available).clamp(0.0, 1.0)))
        })
        .collect()
}

fn squared_error(model: &SectorPriceModel, role: Role, samples: &[(f64, f64)]) -> f64 {
    samples
        .iter()
        .map(|&(price, observed)| {
            let predicted = modelled_use_ratio(model, role, price);
            (predicted - observed).powi(2)
        })
        .sum()
}

/// Grid-searches the best `(price_no_power, price_full_power)` pair for one
/// sector. `samples` must be non-empty.
pub fn fit_price_model(
    role: Role,
    samples: &[(f64, f64)],
    fit_cfg: &FitConfig,
) -> Result<SectorPriceModel> {
    ensure!(
        fit_cfg.price_min < fit_cfg.price_max,
        "fitting grid needs price_min < price_max, got [{}, {}]",
        fit_cfg.price_min,
        fit_cfg.price_max
    );
    ensure!(!samples.is_empty(), "cannot fit a price model without samples");

    let step = fit_cfg.grid_step()?;
    let grid: Vec<f64> = (0..=fit_cfg.steps)
        .map(|i| fit_cfg.price_min + i as f64 * step)
        .collect();

    let mut best: Option<(f64, SectorPriceModel)> = None;
    for (i, &low) in grid.iter().enumerate() {
        for &high in &grid[i..] {
            let candidate = match role {
                Role::Generator => SectorPriceModel::new(low, high),
                Role::Load => SectorPriceModel::new(high, low),
            };
            let error = squared_error(&candidate, role, samples);
            let better = match &best {
                None => true,
                Some((best_error, _)) => error < *best_error,
            };
            if better {
                best = Some((error, candidate));
            }
        }
    }
    // The grid is non-empty, so a best candidate always exists.
    let (_, model) = best.unwrap();
    model.validate(role)?;
    Ok(model)
}

/// Fits price models for every controllable sector in the network. Sectors
/// with no usable samples (never any availability) are left out; installing
/// the set then fails loudly for them instead of guessing.
pub fn fit_network_models(network: &Network, fit_cfg: &FitConfig, tol: f64) -> Result<PriceModelSet> {
    let _timing = logging::start_timing("fit_network_models", OperationCategory::CostModel);
    let mut models = PriceModelSet::new();
    for zone in network.zones() {
        for sector in zone.sectors() {
            if !sector.controllable() {
                continue;
            }
            let samples = use_ratio_samples(zone, sector, tol);
            if samples.is_empty() {
                continue;
            }
            let model = fit_price_model(sector.role(), &samples, fit_cfg)?;
            let entry: &mut SectorModelEntry = models
                .entry(zone.name().to_string())
                .or_default()
                .entry(sector.name().to_string())
                .or_default();
            match sector.role() {
                Role::Load => entry.load = Some(model),
                Role::Generator => entry.generator = Some(model),
            }
        }
    }
    Ok(models)
}
