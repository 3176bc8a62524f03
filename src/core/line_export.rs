use anyhow::{ensure, Result};

use crate::config::opf_config::OpfConfig;
use crate::core::cost_function::{minimise_trinomial, CostFunction};

/// Cost-minimising net flow on one line, found from the two endpoint zones'
/// line-scoped cost functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineOptimum {
    /// Net flow from the `from` side to the `to` side, in MW.
    pub power: f64,
    /// Combined cost of both sides at that flow, in €.
    pub cost: f64,
}

/// Combined cost of exporting `x` on the line: the `from` side exports `x`,
/// the `to` side exports `-x`.
pub fn total_cost(from_cf: &CostFunction, to_cf: &CostFunction, x: f64) -> Result<f64> {
    Ok(from_cf.compute_cost(x)? + to_cf.compute_cost(-x)?)
}

/// Finds `x` minimising `from_cost(x) + to_cost(-x)` subject to
/// `|x| <= rating` and both sides' feasible domains.
///
/// Both sides are piecewise-quadratic, so their sum is too, but only within
/// sub-intervals where neither side crosses a threshold point. Every
/// threshold inside the feasible bracket is evaluated once to shrink the
/// bracket to two sub-intervals, each of which is then minimised in closed
/// form. Ties are broken toward the default export of zero.
pub fn optimise_line_export(
    from_cf: &CostFunction,
    to_cf: &CostFunction,
    rating: f64,
    cfg: &OpfConfig,
) -> Result<LineOptimum> {
    let mut x0 = from_cf.min_power().max(-to_cf.max_power()).max(-rating);
    let mut x2 = from_cf.max_power().min(-to_cf.min_power()).min(rating);
    ensure!(
        x0 <= x2 + cfg.tol,
        "no feasible common export on the line: from domain [{}, {}], to domain [{}, {}], rating {rating}",
        from_cf.min_power(),
        from_cf.max_power(),
        to_cf.min_power(),
        to_cf.max_power()
    );

    // A single fixed operating point on either side forces the flow.
    if x2 - x0 <= cfg.tol {
        let x = 0.5 * (x0 + x2);
        return Ok(LineOptimum {
            power: x,
            cost: total_cost(from_cf, to_cf, x)?,
        });
    }

    let c0 = total_cost(from_cf, to_cf, x0)?;
    let c2 = total_cost(from_cf, to_cf, x2)?;
    let (mut x1, mut c1) = if c0 <= c2 { (x0, c0) } else { (x2, c2) };

    // Every threshold power of either side that falls strictly inside the
    // bracket is a potential kink of the combined cost.
    let mut candidates: Vec<f64> = from_cf
        .points()
        .iter()
        .map(|&(power, _)| power)
        .chain(to_cf.points().iter().map(|&(power, _)| -power))
        .filter(|&t| t > x0 && t < x2)
        .collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    for t in candidates {
        if t <= x0 || t >= x2 || t == x1 {
            continue;
        }
        let ct = total_cost(from_cf, to_cf, t)?;
        if t < x1 {
            if ct <= c1 {
                x2 = x1;
                x1 = t;
                c1 = ct;
            } else {
                x0 = t;
            }
        } else if ct <= c1 {
            x0 = x1;
            x1 = t;
            c1 = ct;
        } else {
            x2 = t;
        }
    }

    // Within each final sub-interval the combined quadratic is fixed;
    // minimise it analytically.
    let left = minimise_on(from_cf, to_cf, x0, x1)?;
    let right = minimise_on(from_cf, to_cf, x1, x2)?;

    let best = if (left.cost - right.cost).abs() <= cfg.tol {
        // Cost tie: prefer the flow closest to zero.
        if left.power.abs() <= right.power.abs() {
            left
        } else {
            right
        }
    } else if left.cost < right.cost {
        left
    } else {
        right
    };
    Ok(best)
}

fn minimise_on(
    from_cf: &CostFunction,
    to_cf: &CostFunction,
    lo: f64,
    hi: f64,
) -> Result<LineOptimum> {
    if hi <= lo {
        return Ok(LineOptimum {
            power: lo,
            cost: total_cost(from_cf, to_cf, lo)?,
        });
    }
    let mid = 0.5 * (lo + hi);
    let (a_from, b_from, c_from) = from_cf.equations()[from_cf.interval_index(mid)?];
    let (a_to, b_to, c_to) = to_cf.equations()[to_cf.interval_index(-mid)?];
    // from(x) + to(-x): the to side's linear term flips sign.
    let a = a_from + a_to;
    let b = b_from - b_to;
    let c = c_from + c_to;
    let (power, cost) = minimise_trinomial(a, b, c, lo, hi, 0.0);
    Ok(LineOptimum { power, cost })
}
