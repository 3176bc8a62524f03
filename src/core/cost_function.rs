use anyhow::{bail, ensure, Result};

/// Piecewise-quadratic cost of a node (or a node and one line) as a function
/// of net exported power.
///
/// The function is defined by threshold `(power, cumulative_cost)` points with
/// strictly increasing power, plus one `(price_start, price_end)` pair per
/// interval between adjacent points. A linear marginal-price segment
/// integrates to a parabola, so each interval carries the `(a, b, c)` of
/// `cost(x) = a*x^2 + b*x + c`.
///
/// A node-scoped function maps a zone's total export to its cost. Shifting
/// the power axis by the export already committed to other lines yields the
/// line-scoped variant whose variable is a single line's flow; that variant
/// is rebuilt, not cached, whenever the other lines' exports change.
#[derive(Debug, Clone, PartialEq)]
pub struct CostFunction {
    points: Vec<(f64, f64)>,
    prices: Vec<(f64, f64)>,
    equations: Vec<(f64, f64, f64)>,
    tol: f64,
}

impl CostFunction {
    pub fn new(points: Vec<(f64, f64)>, prices: Vec<(f64, f64)>, tol: f64) -> Result<Self> {
        ensure!(
            !points.is_empty() && points.len() == prices.len() + 1,
            "cost function needs n >= 1 points and n - 1 price intervals, got {} points and {} intervals",
            points.len(),
            prices.len()
        );
        let equations = build_equations(&points, &prices, tol)?;
        Ok(Self {
            points,
            prices,
            equations,
            tol,
        })
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn prices(&self) -> &[(f64, f64)] {
        &self.prices
    }

    pub fn equations(&self) -> &[(f64, f64, f64)] {
        &self.equations
    }

    pub fn min_power(&self) -> f64 {
        self.points[0].0
    }

    pub fn max_power(&self) -> f64 {
        self.points[self.points.len() - 1].0
    }

    /// A single-point function admits exactly one operating point.
    pub fn is_single_point(&self) -> bool {
        self.points.len() == 1
    }

    /// Index of the first interval containing `power` (within tolerance).
    pub fn interval_index(&self, power: f64) -> Result<usize> {
        ensure!(
            self.min_power() - self.tol <= power && power <= self.max_power() + self.tol,
            "power {power} outside cost function domain [{}, {}]",
            self.min_power(),
            self.max_power()
        );
        for i in 0..self.equations.len() {
            if self.points[i].0 - self.tol <= power && power <= self.points[i + 1].0 + self.tol {
                return Ok(i);
            }
        }
        bail!("no interval found for power {power}");
    }

    /// Cost (€) of exporting `power` MW.
    pub fn compute_cost(&self, power: f64) -> Result<f64> {
        if self.is_single_point() {
            ensure!(
                (power - self.points[0].0).abs() <= self.tol,
                "power {power} outside single-point domain {}",
                self.points[0].0
            );
            return Ok(self.points[0].1);
        }
        let i = self.interval_index(power)?;
        let (a, b, c) = self.equations[i];
        Ok(a * power * power + b * power + c)
    }

    /// Marginal price (€/MWh) at `power`. When two intervals touch at this
    /// power the lower-indexed one wins, so the smallest admissible price is
    /// returned. Within an interval the price is interpolated along the
    /// power axis between the interval's endpoint prices.
    pub fn compute_price(&self, power: f64) -> Result<f64> {
        let i = self.interval_index(power)?;
        let (price_start, price_end) = self.prices[i];
        let power_min = self.points[i].0;
        let power_max = self.points[i + 1].0;
        if price_start == price_end {
            return Ok(price_start);
        }
        let power = bounded_value(power, power_min, power_max);
        Ok(price_start + (price_end - price_start) * (power - power_min) / (power_max - power_min))
    }

    /// Derives the line-scoped function by removing the export already
    /// committed to other lines, so the result depends only on this line's
    /// flow.
    pub fn to_line_scope(&self, to_other_lines_export: f64) -> Result<CostFunction> {
        let points = self
            .points
            .iter()
            .map(|&(power, cost)| (power - to_other_lines_export, cost))
            .collect();
        CostFunction::new(points, self.prices.clone(), self.tol)
    }
}

/// Derives the quadratic coefficients of every interval: a parabola matching
/// both endpoint costs whose marginal price at the left endpoint equals
/// `price_start`.
fn build_equations(
    points: &[(f64, f64)],
    prices: &[(f64, f64)],
    tol: f64,
) -> Result<Vec<(f64, f64, f64)>> {
    let mut equations = Vec::with_capacity(prices.len());
    for i in 0..prices.len() {
        let (x0, c0) = points[i];
        let (x1, c1) = points[i + 1];
        let (p0, p1) = prices[i];
        ensure!(
            x1 > x0,
            "threshold powers must be strictly increasing ({x0} then {x1})"
        );
        // cost(x0 < x < x1) = c0 + (x - x0)*p0 + (x - x0)^2 / 2 * (p1 - p0)/(x1 - x0)
        let a = 0.5 * (p1 - p0) / (x1 - x0);
        let b = p0 - 2.0 * a * x0;
        let c = c0 - x0 * p0 + a * x0 * x0;
        ensure_approx(a * x0 * x0 + b * x0 + c, c0, tol)?;
        ensure_approx(a * x1 * x1 + b * x1 + c, c1, tol)?;
        ensure_approx(2.0 * a * x0 + b, p0, tol)?;
        equations.push((a, b, c));
    }
    Ok(equations)
}

/// Minimum of `a*x^2 + b*x + c` over `[x_min, x_max]`, falling back to
/// `x_default` (clamped) for the fully flat case.
pub fn minimise_trinomial(
    a: f64,
    b: f64,
    c: f64,
    x_min: f64,
    x_max: f64,
    x_default: f64,
) -> (f64, f64) {
    let x = if a == 0.0 {
        if b > 0.0 {
            x_min
        } else if b < 0.0 {
            x_max
        } else {
            bounded_value(x_default, x_min, x_max)
        }
    } else if a > 0.0 {
        bounded_value(-b / (2.0 * a), x_min, x_max)
    } else {
        // Concave: the minimum sits on a boundary.
        if a * x_min * x_min + b * x_min <= a * x_max * x_max + b * x_max {
            x_min
        } else {
            x_max
        }
    };
    (x, a * x * x + b * x + c)
}

/// The number closest to `value` inside `[min_value, max_value]`.
pub fn bounded_value(value: f64, min_value: f64, max_value: f64) -> f64 {
    debug_assert!(max_value >= min_value);
    value.clamp(min_value, max_value)
}

fn ensure_approx(actual: f64, expected: f64, tol: f64) -> Result<()> {
    ensure!(
        (actual - expected).abs() < tol,
        "equation consistency check failed: {actual} != {expected} (tol {tol})"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::TOL;

    fn ramp() -> CostFunction {
        // Price ramps 10 -> 30 over [0, 100], then flat at 30 over [100, 150].
        let points = vec![(0.0, 0.0), (100.0, 2000.0), (150.0, 3500.0)];
        let prices = vec![(10.0, 30.0), (30.0, 30.0)];
        CostFunction::new(points, prices, TOL).unwrap()
    }

    #[test]
    fn costs_match_input_points() {
        let cf = ramp();
        for &(x, c) in cf.points() {
            assert!((cf.compute_cost(x).unwrap() - c).abs() < TOL);
        }
    }

    #[test]
    fn marginal_price_matches_interval_start() {
        let cf = ramp();
        for (i, &(p0, _)) in cf.prices().iter().enumerate() {
            let (a, b, _) = cf.equations()[i];
            let x0 = cf.points()[i].0;
            assert!((2.0 * a * x0 + b - p0).abs() < TOL);
        }
    }

    #[test]
    fn price_interpolates_along_power() {
        let cf = ramp();
        assert!((cf.compute_price(0.0).unwrap() - 10.0).abs() < TOL);
        assert!((cf.compute_price(50.0).unwrap() - 20.0).abs() < TOL);
        assert!((cf.compute_price(120.0).unwrap() - 30.0).abs() < TOL);
    }

    #[test]
    fn tied_threshold_returns_smallest_price() {
        // The boundary at 100 belongs to both intervals; the lower index wins.
        let cf = ramp();
        assert!((cf.compute_price(100.0).unwrap() - 30.0).abs() < TOL);

        let points = vec![(0.0, 0.0), (50.0, 500.0), (80.0, 1400.0)];
        let prices = vec![(10.0, 10.0), (30.0, 30.0)];
        let cf = CostFunction::new(points, prices, TOL).unwrap();
        assert!((cf.compute_price(50.0).unwrap() - 10.0).abs() < TOL);
    }

    #[test]
    fn cost_is_monotonic_for_increasing_prices() {
        let cf = ramp();
        let mut last = f64::NEG_INFINITY;
        let mut x = 0.0;
        while x <= 150.0 {
            let cost = cf.compute_cost(x).unwrap();
            assert!(cost >= last - TOL);
            last = cost;
            x += 5.0;
        }
    }

    #[test]
    fn out_of_domain_power_is_an_error() {
        let cf = ramp();
        assert!(cf.compute_cost(-1.0).is_err());
        assert!(cf.compute_cost(151.0).is_err());
        assert!(cf.compute_price(200.0).is_err());
    }

    #[test]
    fn line_scope_shifts_power_axis() {
        let cf = ramp();
        let shifted = cf.to_line_scope(40.0).unwrap();
        assert!((shifted.min_power() - -40.0).abs() < TOL);
        assert!((shifted.max_power() - 110.0).abs() < TOL);
        // Same cost at the shifted coordinate.
        assert!(
            (shifted.compute_cost(10.0).unwrap() - cf.compute_cost(50.0).unwrap()).abs() < TOL
        );
        assert!(
            (shifted.compute_price(10.0).unwrap() - cf.compute_price(50.0).unwrap()).abs() < TOL
        );
    }

    #[test]
    fn minimise_trinomial_cases() {
        // Interior vertex.
        let (x, _) = minimise_trinomial(1.0, -4.0, 0.0, 0.0, 10.0, 0.0);
        assert!((x - 2.0).abs() < 1e-9);
        // Vertex clamped to the boundary.
        let (x, _) = minimise_trinomial(1.0, -40.0, 0.0, 0.0, 10.0, 0.0);
        assert!((x - 10.0).abs() < 1e-9);
        // Linear pieces.
        let (x, _) = minimise_trinomial(0.0, 2.0, 1.0, -5.0, 5.0, 0.0);
        assert!((x - -5.0).abs() < 1e-9);
        let (x, _) = minimise_trinomial(0.0, -2.0, 1.0, -5.0, 5.0, 0.0);
        assert!((x - 5.0).abs() < 1e-9);
        // Flat: fall back to the default.
        let (x, _) = minimise_trinomial(0.0, 0.0, 1.0, -5.0, 5.0, 0.0);
        assert!((x - 0.0).abs() < 1e-9);
        // Concave: boundary comparison.
        let (x, _) = minimise_trinomial(-1.0, 0.0, 0.0, -2.0, 3.0, 0.0);
        assert!((x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn increasing_powers_are_required() {
        let points = vec![(0.0, 0.0), (0.0, 10.0)];
        let prices = vec![(10.0, 10.0)];
        assert!(CostFunction::new(points, prices, TOL).is_err());
    }
}
