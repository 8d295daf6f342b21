use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;

pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: ArrayView1<Complex64>) -> Complex64 {
        if samples.is_empty() {
            return Complex64::new(0.0, 0.0);
        }
        samples.sum() / samples.len() as f64
    }

    /// Per-point mean over the repetitions stored along axis 0.
    pub fn column_mean(repetitions: ArrayView2<Complex64>) -> Array1<Complex64> {
        let rows = repetitions.nrows();
        if rows == 0 {
            return Array1::zeros(repetitions.ncols());
        }
        repetitions.sum_axis(Axis(0)).mapv(|sum| sum / rows as f64)
    }

    /// Per-point mean after dropping the `truncate` samples farthest from
    /// that point's mean.
    ///
    /// An illegal truncate (zero, or leaving nothing to average) falls back to
    /// the plain mean.
    pub fn truncated_mean(repetitions: ArrayView2<Complex64>, truncate: usize) -> Array1<Complex64> {
        let rows = repetitions.nrows();
        let keep = rows.saturating_sub(truncate);
        if truncate < 1 || keep < 1 {
            if truncate > 0 {
                info!("Not doing illegal truncate of {} from {} values", truncate, rows);
            }
            return Self::column_mean(repetitions);
        }
        debug!("Truncating from {} values to {}", rows, keep);

        repetitions
            .axis_iter(Axis(1))
            .map(|column| {
                let avg = Self::mean(column);
                let mut ranked: Vec<Complex64> = column.to_vec();
                ranked.sort_by(|a, b| (avg - a).norm().total_cmp(&(avg - b).norm()));
                ranked[..keep].iter().sum::<Complex64>() / keep as f64
            })
            .collect()
    }

    /// Savitzky-Golay smoothing with an odd `window` and polynomial `order`.
    ///
    /// Interior samples take the value of the least-squares fit centred on
    /// them; the first and last half windows are evaluated on the edge fits.
    /// Returns `None` when the parameters do not fit the trace.
    pub fn savitzky_golay(
        values: ArrayView1<Complex64>,
        window: usize,
        order: usize,
    ) -> Option<Array1<Complex64>> {
        let len = values.len();
        if window % 2 == 0 || window <= order || window > len {
            warn!(
                "Skipping smoothing: window {} order {} on {} points",
                window, order, len
            );
            return None;
        }
        let weights = fit_projection(window, order)?;
        let half = window / 2;

        let smoothed: Array1<Complex64> = (0..len)
            .map(|k| {
                let (row, first) = if k < half {
                    (k, 0)
                } else if k + half >= len {
                    (k + window - len, len - window)
                } else {
                    (half, k - half)
                };
                weights
                    .row(row)
                    .iter()
                    .zip(values.slice(s![first..first + window]))
                    .map(|(&w, &v)| v * w)
                    .sum::<Complex64>()
            })
            .collect();
        Some(smoothed)
    }
}

/// Hat matrix `A (AᵀA)⁻¹ Aᵀ` of a degree-`order` polynomial over `window`
/// equally spaced points: row `i` evaluates the fit at sample `i`.
fn fit_projection(window: usize, order: usize) -> Option<Array2<f64>> {
    let half = (window / 2) as f64;
    let vandermonde = Array2::from_shape_fn((window, order + 1), |(i, p)| {
        ((i as f64 - half) / half.max(1.0)).powi(p as i32)
    });
    let normal = vandermonde.t().dot(&vandermonde);
    let coefficients = solve(normal, vandermonde.t().to_owned())?;
    Some(vandermonde.dot(&coefficients))
}

/// Gauss-Jordan elimination with partial pivoting; `None` when singular.
fn solve(mut lhs: Array2<f64>, mut rhs: Array2<f64>) -> Option<Array2<f64>> {
    let n = lhs.nrows();
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| lhs[[a, col]].abs().total_cmp(&lhs[[b, col]].abs()))?;
        if lhs[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for c in 0..n {
                lhs.swap([pivot, c], [col, c]);
            }
            for c in 0..rhs.ncols() {
                rhs.swap([pivot, c], [col, c]);
            }
        }
        let scale = lhs[[col, col]];
        lhs.row_mut(col).mapv_inplace(|v| v / scale);
        rhs.row_mut(col).mapv_inplace(|v| v / scale);
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = lhs[[row, col]];
            if factor == 0.0 {
                continue;
            }
            let lhs_pivot = lhs.row(col).to_owned();
            let rhs_pivot = rhs.row(col).to_owned();
            lhs.row_mut(row).scaled_add(-factor, &lhs_pivot);
            rhs.row_mut(row).scaled_add(-factor, &rhs_pivot);
        }
    }
    Some(rhs)
}
