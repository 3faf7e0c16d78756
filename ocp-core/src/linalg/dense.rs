//! Dense matrix types and helpers.
//!
//! # Layout
//!
//! Every matrix in this crate is a [`nalgebra::DMatrix<f64>`], which stores
//! its entries in **column-major** order. Callers handing raw buffers to the
//! crate must say which order they use: [`from_row_slice`] takes row-major
//! data, [`from_col_slice`] column-major data. Nothing in the crate ever
//! reinterprets a buffer without going through one of these two.
//!
//! Empty dimensions are legal and meaningful: the first stage of a horizon
//! has no free state, so its state blocks have zero columns.

use nalgebra::{DMatrix, DVector};

use crate::error::{OcpError, OcpResult};

/// Dense matrix (column-major storage).
pub type Mat = DMatrix<f64>;

/// Dense column vector.
pub type Vector = DVector<f64>;

/// Build a matrix from row-major data.
///
/// Returns `DimensionMismatch` (reported at `stage`) if the slice length is
/// not `nrows * ncols`.
pub fn from_row_slice(stage: usize, nrows: usize, ncols: usize, data: &[f64]) -> OcpResult<Mat> {
    if data.len() != nrows * ncols {
        return Err(OcpError::mismatch(
            stage,
            format!(
                "row-major buffer has {} entries, expected {}x{} = {}",
                data.len(),
                nrows,
                ncols,
                nrows * ncols
            ),
        ));
    }
    Ok(DMatrix::from_row_slice(nrows, ncols, data))
}

/// Build a matrix from column-major data.
pub fn from_col_slice(stage: usize, nrows: usize, ncols: usize, data: &[f64]) -> OcpResult<Mat> {
    if data.len() != nrows * ncols {
        return Err(OcpError::mismatch(
            stage,
            format!(
                "column-major buffer has {} entries, expected {}x{} = {}",
                data.len(),
                nrows,
                ncols,
                nrows * ncols
            ),
        ));
    }
    Ok(DMatrix::from_column_slice(nrows, ncols, data))
}

/// Square diagonal matrix with constant `value` on the diagonal.
pub fn scaled_identity(n: usize, value: f64) -> Mat {
    DMatrix::from_diagonal_element(n, n, value)
}

/// Check that `m` has shape `rows x cols`.
pub fn check_shape(stage: usize, name: &str, m: &Mat, rows: usize, cols: usize) -> OcpResult<()> {
    if m.nrows() != rows || m.ncols() != cols {
        return Err(OcpError::mismatch(
            stage,
            format!(
                "{} has shape {}x{}, expected {}x{}",
                name,
                m.nrows(),
                m.ncols(),
                rows,
                cols
            ),
        ));
    }
    Ok(())
}

/// Check that `v` has length `len`.
pub fn check_len(stage: usize, name: &str, v: &Vector, len: usize) -> OcpResult<()> {
    if v.len() != len {
        return Err(OcpError::mismatch(
            stage,
            format!("{} has length {}, expected {}", name, v.len(), len),
        ));
    }
    Ok(())
}

/// Infinity norm of a slice (0 for an empty slice).
pub fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Largest absolute entry of a matrix (0 for an empty matrix).
pub fn max_abs(m: &Mat) -> f64 {
    inf_norm(m.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_and_col_slices_agree() {
        let rm = from_row_slice(0, 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let cm = from_col_slice(0, 2, 3, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        assert_eq!(rm, cm);
        assert_eq!(rm[(0, 2)], 3.0);
        assert_eq!(rm[(1, 0)], 4.0);
    }

    #[test]
    fn test_slice_length_checked() {
        let err = from_row_slice(3, 2, 2, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, OcpError::DimensionMismatch { stage: 3, .. }));
    }

    #[test]
    fn test_empty_shapes() {
        let m = Mat::zeros(4, 0);
        assert!(check_shape(0, "A0", &m, 4, 0).is_ok());
        assert!(check_shape(0, "A0", &m, 0, 0).is_err());
        assert_eq!(max_abs(&m), 0.0);
        assert_eq!(inf_norm(&[]), 0.0);
    }
}
