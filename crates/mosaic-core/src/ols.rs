//! R² evaluation for prospective joins.
//!
//! The model is `market_value_proxy ~ intercept + built_area + land_area`
//! over the member parcels of a candidate merged region. The sales gate
//! runs first: regions with too few actual sales score 0 without touching
//! the regression. Solving goes through a capability trait so the solver
//! can be swapped like the geometry kernel.

use nalgebra::{Matrix2, Vector2};

use crate::parcel::ParcelTable;

/// Eigenvalue-ratio ceiling above which the normal equations are treated
/// as ill-conditioned and the pseudoinverse path is taken.
const CONDITION_LIMIT: f64 = 1e12;

/// Memoized evaluation of one prospective join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeScore {
    /// Coefficient of determination in [0, 1]; 0 when gated or degenerate.
    pub r2: f64,
    /// Parcels in the combined region (the ranking tie-break).
    pub n_obs: usize,
    /// Member parcels carrying an actual sale price.
    pub n_sales: usize,
}

impl EdgeScore {
    pub fn zero(n_obs: usize, n_sales: usize) -> Self {
        Self {
            r2: 0.0,
            n_obs,
            n_sales,
        }
    }
}

/// Least-squares capability: R² of a two-regressor model with intercept.
/// Rows are `(response, x1, x2)`.
pub trait LeastSquares: Send + Sync {
    fn r_squared(&self, rows: &[(f64, f64, f64)]) -> f64;
}

/// Default solver: centered normal equations by Cholesky, falling back to
/// an SVD pseudoinverse when the Gram matrix is ill-conditioned or not
/// positive definite. Centering eliminates the intercept column, so the
/// system is 2×2 regardless of region size.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalEquationsSolver;

impl LeastSquares for NormalEquationsSolver {
    fn r_squared(&self, rows: &[(f64, f64, f64)]) -> f64 {
        let n = rows.len();
        if n < 2 {
            return 0.0;
        }
        let nf = n as f64;
        let (mut my, mut m1, mut m2) = (0.0, 0.0, 0.0);
        for &(y, x1, x2) in rows {
            my += y;
            m1 += x1;
            m2 += x2;
        }
        my /= nf;
        m1 /= nf;
        m2 /= nf;

        let (mut s11, mut s22, mut s12) = (0.0, 0.0, 0.0);
        let (mut sy1, mut sy2, mut syy) = (0.0, 0.0, 0.0);
        for &(y, x1, x2) in rows {
            let (yc, c1, c2) = (y - my, x1 - m1, x2 - m2);
            s11 += c1 * c1;
            s22 += c2 * c2;
            s12 += c1 * c2;
            sy1 += c1 * yc;
            sy2 += c2 * yc;
            syy += yc * yc;
        }
        // A constant response scores 0 by convention.
        if !(syy > 0.0) || !syy.is_finite() {
            return 0.0;
        }

        let gram = Matrix2::new(s11, s12, s12, s22);
        let rhs = Vector2::new(sy1, sy2);
        let beta = solve_normal_equations(&gram, &rhs);

        let mut ss_res = 0.0;
        for &(y, x1, x2) in rows {
            let fitted = beta.x * (x1 - m1) + beta.y * (x2 - m2);
            let resid = (y - my) - fitted;
            ss_res += resid * resid;
        }
        let r2 = 1.0 - ss_res / syy;
        if !r2.is_finite() {
            return 0.0;
        }
        r2.clamp(0.0, 1.0)
    }
}

fn solve_normal_equations(gram: &Matrix2<f64>, rhs: &Vector2<f64>) -> Vector2<f64> {
    if well_conditioned(gram) {
        if let Some(chol) = gram.cholesky() {
            return chol.solve(rhs);
        }
    }
    match gram.svd(true, true).pseudo_inverse(1e-12) {
        Ok(pinv) => pinv * rhs,
        Err(_) => Vector2::zeros(),
    }
}

fn well_conditioned(gram: &Matrix2<f64>) -> bool {
    let eigen = gram.symmetric_eigen();
    let mut lo = f64::INFINITY;
    let mut hi = 0.0f64;
    for &lambda in eigen.eigenvalues.iter() {
        lo = lo.min(lambda);
        hi = hi.max(lambda);
    }
    lo > 0.0 && hi / lo <= CONDITION_LIMIT
}

/// Score the candidate region given by `members` (row indices, visited in
/// the given order). The sales gate counts actual sales only.
pub fn score_region(
    table: &ParcelTable,
    members: impl IntoIterator<Item = usize>,
    min_sales: usize,
    solver: &dyn LeastSquares,
) -> EdgeScore {
    let mut n_obs = 0;
    let mut n_sales = 0;
    let mut rows: Vec<(f64, f64, f64)> = Vec::new();
    for row in members {
        n_obs += 1;
        if table.has_sale(row) {
            n_sales += 1;
        }
        if let Some(triple) = table.regression_row(row) {
            rows.push(triple);
        }
    }
    if n_sales < min_sales {
        return EdgeScore::zero(n_obs, n_sales);
    }
    EdgeScore {
        r2: solver.r_squared(&rows),
        n_obs,
        n_sales,
    }
}
