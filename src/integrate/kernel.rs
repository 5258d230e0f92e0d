//! Composite Simpson kernel
//!
//! Integrates a contiguous run of equal-width steps. Each step `[l, r]`
//! contributes `(f(l) + 4 f((l + r) / 2) + f(r)) * h / 6`.
//!
//! The kernel slides a window along the steps and carries `f(r)` of one step
//! over as `f(l)` of the next, so every step costs two evaluations instead of
//! three. Abscissas are computed as `start + i * h` rather than by repeated
//! addition, which keeps rounding drift independent of the slice length.

use super::Integrand;

/// Integrate `steps` Simpson steps of width `step_width` starting at `start`
///
/// Returns 0.0 for an empty slice.
///
/// # Example
///
/// ```
/// use quadpulse::integrate::simpson_slice;
///
/// let square = |x: f64| x * x;
/// let value = simpson_slice(&square, 0.0, 0.001, 1000);
/// assert!((value - 1.0 / 3.0).abs() < 1e-12);
/// ```
pub fn simpson_slice<F>(f: &F, start: f64, step_width: f64, steps: u64) -> f64
where
    F: Integrand + ?Sized,
{
    if steps == 0 {
        return 0.0;
    }

    let half = step_width / 2.0;
    let mut left = start;
    let mut f_left = f.eval(left);
    let mut acc = 0.0;

    for i in 0..steps {
        let right = start + (i + 1) as f64 * step_width;
        let f_right = f.eval(right);
        acc += f_left + 4.0 * f.eval(left + half) + f_right;

        f_left = f_right;
        left = right;
    }

    acc * step_width / 6.0
}

/// Reference Simpson sum that evaluates both endpoints of every step
///
/// Produces the same abscissas in the same order as [`simpson_slice`], so the
/// two agree bit for bit for any deterministic integrand.
pub fn simpson_naive<F>(f: &F, start: f64, step_width: f64, steps: u64) -> f64
where
    F: Integrand + ?Sized,
{
    let half = step_width / 2.0;
    let mut acc = 0.0;

    for i in 0..steps {
        let left = start + i as f64 * step_width;
        let right = start + (i + 1) as f64 * step_width;
        acc += f.eval(left) + 4.0 * f.eval(left + half) + f.eval(right);
    }

    acc * step_width / 6.0
}
