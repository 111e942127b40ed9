use log::info;
use nalgebra::{DMatrix, DVector};
use strum_macros::{Display, EnumString};

///////////////////////////////////////////////////////////////////////////////////////////////
/////////////////////////SCALING METHODS///////////////////////////////////////////////////////
///////////////////////////////////////////////////////////////////////////////////////////////
/// Scaling of the damping term mu * D^T D in (J^T J + mu D^T D) v = -J^T f.
///
/// Only the diagonal of D^T D is stored. All strategies work from J^T J alone
/// since J is never formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ScalingMethod {
    /// D = I; mu is then initialised relative to max(diag(J^T J))
    Levenberg,
    /// D^T D = diag(J^T J), refreshed every iteration
    Marquardt,
    /// D^T D_j = max(D^T D_j, (J^T J)_jj): never shrinks (More, 1978, Eq. 6.3)
    #[default]
    More,
}

impl ScalingMethod {
    /// initialize diag(D^T D) from J^T J
    pub fn init(&self, jtj: &DMatrix<f64>, dtd: &mut DVector<f64>) {
        match self {
            ScalingMethod::Levenberg => dtd.fill(1.0),
            ScalingMethod::Marquardt => update_marquardt(jtj, dtd),
            ScalingMethod::More => {
                dtd.fill(0.0);
                update_more(jtj, dtd);
            }
        }
        info!("{} scaling initialized: diag(D^T D) = {}", self, dtd.transpose());
    }

    /// update diag(D^T D) with the J^T J of the newly accepted point
    pub fn update(&self, jtj: &DMatrix<f64>, dtd: &mut DVector<f64>) {
        match self {
            // identity never changes
            ScalingMethod::Levenberg => {}
            ScalingMethod::Marquardt => update_marquardt(jtj, dtd),
            ScalingMethod::More => update_more(jtj, dtd),
        }
    }
}

/// (J^T J)_jj with a floor of 1 for non-positive entries, so D^T D stays positive
fn floored_diag(jtj: &DMatrix<f64>, j: usize) -> f64 {
    let jjj = jtj[(j, j)];
    if jjj <= 0.0 { 1.0 } else { jjj }
}

fn update_marquardt(jtj: &DMatrix<f64>, dtd: &mut DVector<f64>) {
    for j in 0..dtd.len() {
        dtd[j] = floored_diag(jtj, j);
    }
}

fn update_more(jtj: &DMatrix<f64>, dtd: &mut DVector<f64>) {
    for j in 0..dtd.len() {
        dtd[j] = dtd[j].max(floored_diag(jtj, j));
    }
}

/// || sqrt(D^T D) * a ||, using `work` as scratch
pub fn scaled_norm(dtd: &DVector<f64>, a: &DVector<f64>, work: &mut DVector<f64>) -> f64 {
    for i in 0..a.len() {
        work[i] = dtd[i].sqrt() * a[i];
    }
    work.norm()
}
