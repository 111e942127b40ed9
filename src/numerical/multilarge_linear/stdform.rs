//! Conversion of the weighted, regularized problem
//!
//!   min ||y - X c||_W^2 + lambda^2 ||L c||^2,   L = diag(l)
//!
//! to standard form min ||ys - Xs cs||^2 + lambda^2 ||cs||^2 and back.
use crate::numerical::multilarge_errors::{MultilargeError, Result, check_len};
use nalgebra::{DMatrix, DVector};

fn check_diag_l(l: &DVector<f64>) -> Result<()> {
    if l.iter().any(|li| *li == 0.0 || !li.is_finite()) {
        return Err(MultilargeError::InvalidConfig(
            "L must have finite nonzero diagonal entries".to_string(),
        ));
    }
    Ok(())
}

/// Xs = sqrt(W) X L^{-1}, ys = sqrt(W) y for one block of rows.
/// `l = None` means L = I, `w = None` means unit weights.
pub fn wstdform1(
    l: Option<&DVector<f64>>,
    x: &DMatrix<f64>,
    w: Option<&DVector<f64>>,
    y: &DVector<f64>,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let (n, p) = x.shape();
    check_len("right hand side", n, y.len())?;
    let mut xs = x.clone();
    let mut ys = y.clone();

    if let Some(w) = w {
        check_len("weights", n, w.len())?;
        if w.iter().any(|wi| *wi < 0.0 || !wi.is_finite()) {
            return Err(MultilargeError::InvalidConfig(
                "weights must be non-negative".to_string(),
            ));
        }
        for i in 0..n {
            let swi = w[i].sqrt();
            xs.row_mut(i).scale_mut(swi);
            ys[i] *= swi;
        }
    }

    if let Some(l) = l {
        check_len("L", p, l.len())?;
        check_diag_l(l)?;
        for j in 0..p {
            xs.column_mut(j).unscale_mut(l[j]);
        }
    }
    Ok((xs, ys))
}

/// c = L^{-1} cs
pub fn genform1(l: &DVector<f64>, cs: &DVector<f64>) -> Result<DVector<f64>> {
    check_len("solution", l.len(), cs.len())?;
    check_diag_l(l)?;
    Ok(cs.component_div(l))
}
