use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::config::constants::{
    DEMAND_PRICE, FAKE_CONS_PRICE, FAKE_PROD_PRICE, ITER_MAX, PRICE_GRID_MAX, PRICE_GRID_MIN,
    PRICE_GRID_STEPS, TOL,
};

/// Tunables of the per-timestep OPF. Passed explicitly into the solver so
/// tests can tighten or relax tolerances without touching global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpfConfig {
    /// Slack below which a cost improvement counts as zero (€ and MW).
    pub tol: f64,
    /// Maximum number of full passes over all interconnections per timestep.
    pub iter_max: usize,
    /// Shedding price assigned to non-controllable loads (€/MWh).
    pub demand_price: f64,
    /// Ceiling of any admissible sector price (€/MWh).
    pub fake_prod_price: f64,
    /// Floor of any admissible sector price; must-run generation offers here (€/MWh).
    pub fake_cons_price: f64,
}

impl Default for OpfConfig {
    fn default() -> Self {
        Self {
            tol: TOL,
            iter_max: ITER_MAX,
            demand_price: DEMAND_PRICE,
            fake_prod_price: FAKE_PROD_PRICE,
            fake_cons_price: FAKE_CONS_PRICE,
        }
    }
}

/// Grid-search bounds for fitting sector price models from historical data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub price_min: f64,
    pub price_max: f64,
    /// Number of grid intervals; the grid step is `(price_max - price_min) / steps`.
    pub steps: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            price_min: PRICE_GRID_MIN,
            price_max: PRICE_GRID_MAX,
            steps: PRICE_GRID_STEPS,
        }
    }
}

impl FitConfig {
    pub fn grid_step(&self) -> Result<f64> {
        ensure!(
            self.steps > 0,
            "fitting grid needs at least one step, got {}",
            self.steps
        );
        Ok((self.price_max - self.price_min) / self.steps as f64)
    }
}
