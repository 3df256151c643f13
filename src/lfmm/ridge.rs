use crate::base::*;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_linalg::{Eigh, Inverse, SVD, UPLO};

pub const DEFAULT_LAMBDA: f64 = 1e-5;

// Shrinkage applied to each left singular direction of X: sqrt(lambda / (lambda + s^2))
// along the column space of X and 1 (no shrinkage) on its orthogonal complement
fn ridge_shrinkage(singular_values: &Array1<f64>, n: usize, lambda: f64) -> Array1<f64> {
    let s_max = singular_values.iter().fold(0.0f64, |m, &s| m.max(s));
    let tol = s_max * f64::EPSILON * n as f64;
    let mut shrinkage: Array1<f64> = Array1::ones(n);
    for (i, &s) in singular_values.iter().enumerate() {
        if s > tol {
            shrinkage[i] = (lambda / (lambda + s.powf(2.0))).sqrt();
        }
    }
    shrinkage
}

// Leading k left singular vectors and singular values of m (n x L), from the n x n Gram matrix
fn truncated_svd(m: &Array2<f64>, k: usize) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
    let n = m.nrows();
    let gram = m.dot(&m.t());
    let (eigenvalues, eigenvectors) = gram.eigh(UPLO::Lower)?;
    let mut u_k: Array2<f64> = Array2::zeros((n, k));
    let mut s_k: Array1<f64> = Array1::zeros(k);
    for j in 0..k {
        // eigh sorts in ascending order
        let idx = n - 1 - j;
        s_k[j] = eigenvalues[idx].max(0.0).sqrt();
        u_k.column_mut(j).assign(&eigenvectors.column(idx));
    }
    let mut v_k = m.t().dot(&u_k);
    for j in 0..k {
        let s = s_k[j];
        if s > 0.0 {
            v_k.column_mut(j).mapv_inplace(|x| x / s);
        } else {
            v_k.column_mut(j).fill(0.0);
        }
    }
    Ok((u_k, s_k, v_k))
}

impl LatentFactorRegression for Lfmm {
    fn new(k: usize, lambda: f64, scale: bool) -> Self {
        Lfmm {
            k,
            lambda,
            scale,
            model: None,
        }
    }

    /// Fit the ridge latent factor mixed model Y = X B^T + U V^T + E.
    ///
    /// Y is column-centred; X is column-centred, and scaled to unit variance if
    /// `self.scale`. The latent part W = U V^T is the rank-K approximation of Y
    /// after shrinking its projection onto the column space of X, and B is the
    /// ridge regression of Y - W on X.
    fn estimate_effects(&mut self, y: &Array2<f64>, x: &Array2<f64>) -> Result<&mut Self> {
        let (n, l) = y.dim();
        let (n_, d) = x.dim();
        if n != n_ {
            return Err(OffsetError::DimensionMismatch(format!(
                "the genotype matrix has {} units but the environment matrix has {}",
                n, n_
            )));
        }
        if l == 0 || d == 0 {
            return Err(OffsetError::InvalidParameter(
                "need at least one locus and one environmental variable".to_owned(),
            ));
        }
        if (self.k < 1) || (self.k >= n.min(l)) {
            return Err(OffsetError::InvalidParameter(format!(
                "the number of latent factors K={} must satisfy 1 <= K < min(n, L) = {}",
                self.k,
                n.min(l)
            )));
        }
        if !(self.lambda > 0.0) || !self.lambda.is_finite() {
            return Err(OffsetError::InvalidParameter(format!(
                "the ridge penalty lambda={} must be positive",
                self.lambda
            )));
        }
        if any_non_finite(y) {
            return Err(OffsetError::InvalidParameter(
                "the genotype matrix contains missing values, please impute them first".to_owned(),
            ));
        }
        if any_non_finite(x) {
            return Err(OffsetError::InvalidParameter(
                "the environment matrix contains missing values".to_owned(),
            ));
        }
        info!(
            "Fitting LFMM (ridge) with n={} units, L={} loci, d={} variables, K={}, lambda={}",
            n, l, d, self.k, self.lambda
        );
        let standardisation = Standardisation::new(x, self.scale);
        let x_std = standardisation.transform(&x.view());
        let y_centred = centre_columns(y);
        // Full set of left singular vectors of X
        let (q, s, _) = x_std.svd(true, false)?;
        let q = q.ok_or_else(|| {
            OffsetError::Decomposition("left singular vectors of X were not computed".to_owned())
        })?;
        let shrinkage = ridge_shrinkage(&s, n, self.lambda);
        debug!("Singular values of the environment matrix: {:?}", s);
        // D Q^T Y
        let shrunk = &q.t().dot(&y_centred) * &shrinkage.view().insert_axis(Axis(1));
        let (u_k, s_k, v_k) = truncated_svd(&shrunk, self.k)?;
        // U = Q D^-1 U_K S_K
        let mut scores = u_k * &s_k;
        let inverse_shrinkage = shrinkage.mapv(|x| 1.0 / x);
        scores = &scores * &inverse_shrinkage.insert_axis(Axis(1));
        let u = q.dot(&scores);
        let w = u.dot(&v_k.t());
        // B^T = (X^T X + lambda I)^-1 X^T (Y - W)
        let mut xtx = x_std.t().dot(&x_std);
        for i in 0..d {
            xtx[(i, i)] += self.lambda;
        }
        let bt = xtx.inv()?.dot(&x_std.t()).dot(&(&y_centred - &w));
        let b = bt.reversed_axes();
        debug!("Latent factor singular values: {:?}", s_k);
        self.model = Some(LatentFactorModel {
            b,
            u,
            v: v_k,
            k: self.k,
            lambda: self.lambda,
            standardisation,
        });
        Ok(self)
    }

    fn model(&self) -> Result<&LatentFactorModel> {
        self.model.as_ref().ok_or(OffsetError::UnfittedModel)
    }
}

impl LatentFactorModel {
    pub fn n_units(&self) -> usize {
        self.u.nrows()
    }

    pub fn n_loci(&self) -> usize {
        self.b.nrows()
    }

    pub fn n_variables(&self) -> usize {
        self.b.ncols()
    }
}
