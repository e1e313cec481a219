//! Upper-diagonal sums of a square matrix.
//!
//! `out[k] = Σ_i m[i, i + k]` for every `i + k < n`, main diagonal at `k = 0`.
//! Three host implementations share that contract: a sequential reference
//! loop, the staged strategy (scatter each element into an `(n, n)` staging
//! buffer at `(col - row, col)`, then sum every staging row) and the direct
//! strategy (reduce each diagonal into its own output slot). The parallel
//! variants switch to Rayon above [`PARALLEL_PIXEL_THRESHOLD`] elements.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, XpcsError};

/// Sum of the `k`-th upper diagonal, accumulated in `f64`.
pub fn upper_diagonal_sum(matrix: ArrayView2<'_, f32>, k: usize) -> f64 {
    matrix
        .slice(s![.., k..])
        .diag()
        .iter()
        .map(|&v| v as f64)
        .sum()
}

/// Sequential reference: one diagonal after the other.
pub fn sum_diagonals_reference(matrix: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
    let n = check_square(matrix)?;
    Ok(Array1::from_shape_fn(n, |k| upper_diagonal_sum(matrix, k) as f32))
}

/// Fill `staging` so that row `k` holds the `k`-th upper diagonal of
/// `matrix` at the columns it occupies; everything else is zero.
pub fn scatter_diagonals(matrix: ArrayView2<'_, f32>, staging: &mut Array2<f32>) -> Result<()> {
    let n = check_square(matrix)?;
    if staging.dim() != (n, n) {
        return Err(XpcsError::ShapeMismatch {
            what: "diagonal staging buffer",
            expected: vec![n, n],
            found: vec![staging.nrows(), staging.ncols()],
        });
    }

    let fill = |(k, mut lane): (usize, ArrayViewMut1<'_, f32>)| {
        lane.slice_mut(s![..k]).fill(0.0);
        for col in k..n {
            lane[col] = matrix[[col - k, col]];
        }
    };

    if n * n >= PARALLEL_PIXEL_THRESHOLD {
        staging
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(fill);
    } else {
        staging.axis_iter_mut(Axis(0)).enumerate().for_each(fill);
    }
    Ok(())
}

/// Staged strategy: scatter into `staging`, then sum every staging row.
///
/// `staging` is overwritten and can be reused across calls of the same size.
pub fn sum_diagonals_staged(
    matrix: ArrayView2<'_, f32>,
    staging: &mut Array2<f32>,
) -> Result<Array1<f32>> {
    scatter_diagonals(matrix, staging)?;
    let n = staging.nrows();

    let row_sum = |row: ArrayView1<'_, f32>| row.iter().map(|&v| v as f64).sum::<f64>() as f32;
    let sums: Vec<f32> = if n * n >= PARALLEL_PIXEL_THRESHOLD {
        staging
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(row_sum)
            .collect()
    } else {
        staging.axis_iter(Axis(0)).map(row_sum).collect()
    };
    Ok(Array1::from(sums))
}

/// Direct strategy: every diagonal reduced independently, no staging memory.
pub fn sum_diagonals_direct(matrix: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
    let n = check_square(matrix)?;
    let sums: Vec<f32> = if n * n >= PARALLEL_PIXEL_THRESHOLD {
        (0..n)
            .into_par_iter()
            .map(|k| upper_diagonal_sum(matrix, k) as f32)
            .collect()
    } else {
        (0..n).map(|k| upper_diagonal_sum(matrix, k) as f32).collect()
    };
    Ok(Array1::from(sums))
}

fn check_square(matrix: ArrayView2<'_, f32>) -> Result<usize> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(XpcsError::ShapeMismatch {
            what: "diagonal reduction input",
            expected: vec![rows, rows],
            found: vec![rows, cols],
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn three_by_three_upper_diagonals() {
        let m = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let sums = sum_diagonals_reference(m.view()).unwrap();
        assert_eq!(sums.to_vec(), vec![15.0, 8.0, 3.0]);
    }

    #[test]
    fn staging_layout_is_diagonal_by_column() {
        let m = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let mut staging = Array2::<f32>::from_elem((3, 3), 42.0);
        scatter_diagonals(m.view(), &mut staging).unwrap();
        assert_eq!(
            staging,
            array![[1.0, 5.0, 9.0], [0.0, 2.0, 6.0], [0.0, 0.0, 3.0]]
        );
    }

    #[test]
    fn non_square_input_is_rejected() {
        let m = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            sum_diagonals_direct(m.view()),
            Err(XpcsError::ShapeMismatch { .. })
        ));
    }
}
