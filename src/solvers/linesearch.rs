//! Strong-Wolfe line search (Nocedal & Wright, Algorithms 3.5 and 3.6).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::{cap_row_length, max_force, vdot, Optimizable};

/// Hessian guess (eV/Å²) behind the step taken when a line search fails.
const FALLBACK_STIFFNESS: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Sufficient-decrease (Armijo) constant.
    pub c1: f64,
    /// Curvature constant, `c1 < c2 < 1`.
    pub c2: f64,
    /// Function evaluations allowed per phase.
    pub iteration_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self { c1: 1e-4, c2: 0.9, iteration_limit: 20 }
    }
}

/// A sampled point along the search direction.
#[derive(Debug, Copy, Clone)]
struct Bound {
    alpha: f64,
    value: f64,
    slope: f64,
}

/// Searches `alpha` in `(0, alpha_max]` satisfying the strong Wolfe conditions
/// for `compute(alpha) -> (value, slope)`.
///
/// Returns `Ok(None)` if the initial slope is not downhill or no acceptable
/// point turns up. Errors from `compute` are returned as is.
pub fn linesearch<F>(
    settings: &Settings,
    initial: (f64, f64),
    initial_alpha: f64,
    alpha_max: f64,
    mut compute: F,
) -> Result<Option<f64>>
where
    F: FnMut(f64) -> Result<(f64, f64)>,
{
    let (value0, slope0) = initial;
    if !(slope0 < 0.0) || !(alpha_max > 0.0) {
        return Ok(None);
    }

    let armijo = |b: &Bound| b.value <= value0 + settings.c1 * b.alpha * slope0;
    let curvature = |b: &Bound| b.slope.abs() <= -settings.c2 * slope0;

    let mut prev = Bound { alpha: 0.0, value: value0, slope: slope0 };
    let mut alpha = initial_alpha.min(alpha_max);

    for i in 0..settings.iteration_limit {
        let (value, slope) = compute(alpha)?;
        let cur = Bound { alpha, value, slope };

        if !armijo(&cur) || (i > 0 && cur.value >= prev.value) {
            return zoom(settings, value0, slope0, prev, cur, &mut compute);
        }
        if curvature(&cur) {
            return Ok(Some(cur.alpha));
        }
        if cur.slope >= 0.0 {
            return zoom(settings, value0, slope0, cur, prev, &mut compute);
        }
        if cur.alpha >= alpha_max {
            // Still descending at the cap; the cap is the best we may do.
            return Ok(Some(cur.alpha));
        }
        prev = cur;
        alpha = f64::min(2.0 * alpha, alpha_max);
    }

    Ok(match prev.alpha > 0.0 {
        true => Some(prev.alpha),
        false => None,
    })
}

fn zoom<F>(
    settings: &Settings,
    value0: f64,
    slope0: f64,
    mut lo: Bound,
    mut hi: Bound,
    compute: &mut F,
) -> Result<Option<f64>>
where
    F: FnMut(f64) -> Result<(f64, f64)>,
{
    for _ in 0..settings.iteration_limit {
        let alpha = interpolate(&lo, &hi);
        let (value, slope) = compute(alpha)?;
        let cur = Bound { alpha, value, slope };

        if cur.value > value0 + settings.c1 * alpha * slope0 || cur.value >= lo.value {
            hi = cur;
        } else {
            if cur.slope.abs() <= -settings.c2 * slope0 {
                return Ok(Some(alpha));
            }
            if cur.slope * (hi.alpha - lo.alpha) >= 0.0 {
                hi = lo;
            }
            lo = cur;
        }
        if (hi.alpha - lo.alpha).abs() < 1e-12 * lo.alpha.abs().max(1.0) {
            break;
        }
    }

    // Out of iterations: fall back to the lowest point that still decreased.
    Ok(match lo.alpha > 0.0 && lo.value < value0 {
        true => Some(lo.alpha),
        false => None,
    })
}

/// Minimizer of the cubic through both bounds, safeguarded to stay in the
/// inner 80% of the bracket (bisection otherwise).
fn interpolate(lo: &Bound, hi: &Bound) -> f64 {
    let (a, b) = (lo.alpha.min(hi.alpha), lo.alpha.max(hi.alpha));
    let margin = 0.1 * (b - a);
    let bisect = 0.5 * (lo.alpha + hi.alpha);

    let d1 = lo.slope + hi.slope - 3.0 * (lo.value - hi.value) / (lo.alpha - hi.alpha);
    let disc = d1 * d1 - lo.slope * hi.slope;
    if !(disc >= 0.0) {
        return bisect;
    }
    let d2 = (hi.alpha - lo.alpha).signum() * disc.sqrt();
    let guess = hi.alpha - (hi.alpha - lo.alpha) * (hi.slope + d2 - d1) / (hi.slope - lo.slope + 2.0 * d2);

    if guess.is_finite() && guess > a + margin && guess < b - margin {
        guess
    } else {
        bisect
    }
}

/// Runs [`linesearch`] along `direction` from the current state of `target`
/// and leaves `target` at the accepted point.
///
/// `alpha_max` is derived from `maxstep`, the longest row displacement allowed.
/// Returns the accepted step length, or `None` with `target` restored to its
/// starting positions.
pub(crate) fn search_along(
    settings: &Settings,
    target: &mut dyn Optimizable,
    start: &[Vector3<f64>],
    forces: &[Vector3<f64>],
    direction: &[Vector3<f64>],
    initial_alpha: f64,
    maxstep: f64,
) -> Result<Option<f64>> {
    let value0 = target.energy()?;
    let slope0 = -vdot(forces, direction);
    let longest = max_force(direction);
    if longest == 0.0 {
        return Ok(None);
    }
    let alpha_max = maxstep / longest;

    let displaced = |alpha: f64| -> Vec<Vector3<f64>> {
        start.iter().zip(direction).map(|(r, d)| r + alpha * d).collect()
    };

    let found = linesearch(settings, (value0, slope0), initial_alpha, alpha_max, |alpha| {
        target.set_positions(&displaced(alpha))?;
        let value = target.energy()?;
        let slope = -vdot(&target.forces()?, direction);
        Ok((value, slope))
    })?;

    match found {
        Some(alpha) => target.set_positions(&displaced(alpha))?,
        None => target.set_positions(start)?,
    }
    Ok(found)
}

/// Short steepest-descent move from `start`, used after a failed search.
pub(crate) fn fallback_step(
    target: &mut dyn Optimizable,
    start: &[Vector3<f64>],
    forces: &[Vector3<f64>],
    maxstep: f64,
) -> Result<()> {
    let mut dr: Vec<_> = forces.iter().map(|f| f / FALLBACK_STIFFNESS).collect();
    cap_row_length(&mut dr, maxstep);
    let positions: Vec<_> = start.iter().zip(&dr).map(|(r, d)| r + d).collect();
    target.set_positions(&positions)
}
