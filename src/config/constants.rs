// Numeric Tolerances
pub const TOL: f64 = 1e-3;                     // Equality / inequality slack for costs and powers

// Market Price Constants (€/MWh)
pub const DEMAND_PRICE: f64 = 3000.0;          // Shedding price for non-controllable loads
pub const FAKE_PROD_PRICE: f64 = 4000.0;       // Upper bound of any admissible price model
pub const FAKE_CONS_PRICE: f64 = -1000.0;      // Lower bound; must-run generation offers here

// OPF Loop
pub const ITER_MAX: usize = 100;               // Full passes over all interconnections per timestep

// Price Model Fitting
pub const PRICE_GRID_MIN: f64 = 0.0;           // Default lower bound of the fitting grid (€/MWh)
pub const PRICE_GRID_MAX: f64 = 300.0;         // Default upper bound of the fitting grid (€/MWh)
pub const PRICE_GRID_STEPS: usize = 10;        // Number of grid intervals between the bounds
