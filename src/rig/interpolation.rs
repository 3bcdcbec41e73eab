//! interpolation.rs
//! Quadratic interpolating B-spline for sensor curves.
//!
//! Knots are the Greville-style layout used for even-degree interpolation:
//! triple end knots plus the midpoints between samples, omitting the first
//! and last midpoint. Outside the sampled domain the outermost polynomial
//! piece is continued, so evaluation never fails.

use crate::errors::CalibrationError;

const DEGREE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticSpline {
    knots: Vec<f64>,
    coeffs: Vec<f64>,
}

impl QuadraticSpline {
    /// Fit through `(xs[i], ys[i])`. Samples may come in any order; duplicate
    /// abscissae are rejected.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, CalibrationError> {
        if xs.len() != ys.len() {
            return Err(CalibrationError::AnemometerMismatch { counts: xs.len(), speeds: ys.len() });
        }
        let mut points: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
        if points.len() <= DEGREE {
            return Err(CalibrationError::AnemometerCurve(points.len()));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(CalibrationError::AnemometerCurve(points.len()));
        }

        let n = points.len();
        let x: Vec<f64> = points.iter().map(|p| p.0).collect();
        let y: Vec<f64> = points.iter().map(|p| p.1).collect();

        let mut knots = Vec::with_capacity(n + DEGREE + 1);
        knots.extend([x[0]; DEGREE + 1]);
        for i in 1..n - 2 {
            knots.push((x[i] + x[i + 1]) / 2.0);
        }
        knots.extend([x[n - 1]; DEGREE + 1]);

        let mut spline = Self { knots, coeffs: vec![0.0; n] };

        // Collocation system: row i holds the basis values at x[i].
        let mut matrix = vec![vec![0.0; n]; n];
        for (row, &xi) in matrix.iter_mut().zip(&x) {
            let span = spline.span(xi);
            let basis = spline.basis(span, xi);
            for (r, b) in basis.iter().enumerate() {
                row[span - DEGREE + r] = *b;
            }
        }
        spline.coeffs = solve(matrix, y).ok_or(CalibrationError::AnemometerCurve(n))?;
        Ok(spline)
    }

    pub fn eval(&self, x: f64) -> f64 {
        let span = self.span(x);
        self.basis(span, x)
            .iter()
            .enumerate()
            .map(|(r, b)| b * self.coeffs[span - DEGREE + r])
            .sum()
    }

    /// Index of the knot interval holding `x`, clamped to the outermost
    /// non-degenerate intervals for extrapolation.
    fn span(&self, x: f64) -> usize {
        let last = self.coeffs.len() - 1;
        let mut span = DEGREE;
        while span < last && x >= self.knots[span + 1] {
            span += 1;
        }
        span
    }

    /// Non-zero basis functions of `span` evaluated at `x` (Cox-de Boor).
    fn basis(&self, span: usize, x: f64) -> [f64; DEGREE + 1] {
        let t = &self.knots;
        let mut n = [0.0; DEGREE + 1];
        let mut left = [0.0; DEGREE + 1];
        let mut right = [0.0; DEGREE + 1];
        n[0] = 1.0;
        for j in 1..=DEGREE {
            left[j] = x - t[span + 1 - j];
            right[j] = t[span + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = n[r] / (right[r + 1] + left[j - r]);
                n[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }
        n
    }
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn passes_through_samples() {
        let xs = [184.44912, 217.0184, 227.83344, 235.58, 241.72624, 246.38144];
        let ys = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let spline = QuadraticSpline::fit(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(ys) {
            assert_abs_diff_eq!(spline.eval(*x), y, epsilon = 1e-9);
        }
    }

    #[test]
    fn reproduces_quadratic_inside_and_outside() {
        let xs = [0.0, 1.0, 2.5, 4.0, 7.0];
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 * x * x - x + 3.0).collect();
        let spline = QuadraticSpline::fit(&xs, &ys).unwrap();
        for x in [-3.0, 0.3, 1.7, 3.2, 6.9, 12.0] {
            assert_abs_diff_eq!(spline.eval(x), 0.5 * x * x - x + 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn unsorted_input_is_accepted() {
        let spline = QuadraticSpline::fit(&[2.0, 0.0, 1.0], &[4.0, 0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(spline.eval(3.0), 9.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_short_or_duplicate_curves() {
        assert!(QuadraticSpline::fit(&[0.0, 1.0], &[0.0, 1.0]).is_err());
        assert!(QuadraticSpline::fit(&[0.0, 1.0, 1.0], &[0.0, 1.0, 2.0]).is_err());
    }

    #[test]
    fn mismatched_lengths_are_reported_as_such() {
        assert!(matches!(
            QuadraticSpline::fit(&[0.0, 1.0, 2.0], &[0.0, 1.0]),
            Err(CalibrationError::AnemometerMismatch { counts: 3, speeds: 2 })
        ));
    }
}
