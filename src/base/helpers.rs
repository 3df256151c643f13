use crate::base::*;
use ndarray::prelude::*;

pub fn parse_f64_roundup_and_own(x: f64, n_digits: usize) -> String {
    if x.is_nan() {
        return "NA".to_owned();
    }
    let s = x.to_string();
    if s.len() < n_digits {
        return s;
    }
    match s[0..n_digits].parse::<f64>() {
        Ok(y) => y.to_string(),
        Err(_) => s,
    }
}

pub fn bound_parameters_with_logit(params: &[f64], lower_limit: f64, upper_limit: f64) -> Vec<f64> {
    // Map parameters with a logistic function to bound them between lower_limit and upper_limit
    params
        .iter()
        .map(|x| lower_limit + ((upper_limit - lower_limit) / (1.00 + (-x).exp())))
        .collect::<Vec<f64>>()
}

// Median of the finite values, NaN if there are none
pub fn median(x: &[f64]) -> f64 {
    let mut v = x
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .collect::<Vec<f64>>();
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[(n / 2) - 1] + v[n / 2]) / 2.0
    }
}

pub fn centre_columns(y: &Array2<f64>) -> Array2<f64> {
    let mu = match y.mean_axis(Axis(0)) {
        Some(x) => x,
        None => return y.clone(),
    };
    y - &mu
}

pub fn any_non_finite(x: &Array2<f64>) -> bool {
    x.iter().any(|x| !x.is_finite())
}

impl Standardisation {
    /// Column means and sample standard deviations of `x`. Constant columns
    /// keep a standard deviation of 1 so that they pass through unscaled.
    pub fn new(x: &Array2<f64>, scaled: bool) -> Self {
        let (n, p) = x.dim();
        let mut means: Array1<f64> = Array1::zeros(p);
        let mut sds: Array1<f64> = Array1::ones(p);
        for j in 0..p {
            let column = x.column(j);
            let mu = column.sum() / n as f64;
            means[j] = mu;
            if n > 1 {
                let ss = column.fold(0.0, |sum, &x| sum + (x - mu).powf(2.0));
                let sd = (ss / (n as f64 - 1.0)).sqrt();
                if sd.is_finite() && sd > 0.0 {
                    sds[j] = sd;
                }
            }
        }
        Standardisation { means, sds, scaled }
    }

    pub fn n_variables(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        let centred = x - &self.means;
        if self.scaled {
            centred / &self.sds
        } else {
            centred
        }
    }

    pub fn transform_row(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        let centred = x - &self.means;
        if self.scaled {
            centred / &self.sds
        } else {
            centred
        }
    }
}
