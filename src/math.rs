use faer::Mat;
use itertools::izip;
use multiversion::multiversion;

#[multiversion(targets("x86_64+avx+avx2+fma", "x86+sse"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    izip!(a, b).map(|(x, y)| x * y).sum()
}

/// Lower Cholesky factor `L` with `L·Lᵀ = matrix`.
///
/// Returns `None` if a pivot is non-positive or non-finite, so callers can
/// detect numerically non-positive-definite input without a panic.
pub(crate) fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    assert!(matrix.nrows() == dim);

    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                if !(sum > 0f64) || !sum.is_finite() {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                lower[(row, col)] = sum / lower[(col, col)];
            }
        }
    }
    Some(lower)
}

/// Invert the transpose of a lower triangular factor by back-substitution.
///
/// For `L` with `L·Lᵀ = Σ` the result `W = L⁻ᵀ` satisfies `W·Wᵀ = Σ⁻¹`,
/// which is the factor needed to draw momentum from `N(0, Σ⁻¹)`.
pub(crate) fn invert_lower_transpose(lower: &Mat<f64>) -> Mat<f64> {
    let dim = lower.ncols();
    assert!(lower.nrows() == dim);

    // Solve Lᵀ·X = I column by column. Lᵀ is upper triangular, so X is too.
    let mut out = Mat::<f64>::zeros(dim, dim);
    for col in 0..dim {
        out[(col, col)] = lower[(col, col)].recip();
        for row in (0..col).rev() {
            let mut sum = 0f64;
            for k in (row + 1)..=col {
                sum += lower[(k, row)] * out[(k, col)];
            }
            out[(row, col)] = -sum / lower[(row, row)];
        }
    }
    out
}
