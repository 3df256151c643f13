use crate::base::*;
use log::{info, warn};
use ndarray::prelude::*;
use ndarray::concatenate;
use ndarray_linalg::Inverse;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};

// Intercept followed by the given blocks of covariates
fn design_matrix(blocks: &[ArrayView2<f64>]) -> Result<Array2<f64>> {
    let n = blocks[0].nrows();
    let intercept: Array2<f64> = Array2::ones((n, 1));
    let mut views: Vec<ArrayView2<f64>> = vec![intercept.view()];
    views.extend(blocks.iter().map(|b| b.view()));
    concatenate(Axis(1), &views).map_err(|e| OffsetError::DimensionMismatch(e.to_string()))
}

// Least squares coefficients (p x L), per-locus residual sums of squares (L) and (Z^T Z)^-1
fn ols(z: &Array2<f64>, y: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
    let inv_ztz = z.t().dot(z).inv()?;
    let beta = inv_ztz.dot(&z.t()).dot(y);
    let residuals = y - &z.dot(&beta);
    let rss = residuals
        .axis_iter(Axis(1))
        .into_par_iter()
        .map(|e| e.dot(&e))
        .collect::<Vec<f64>>();
    Ok((beta, Array1::from_vec(rss), inv_ztz))
}

// Median of a continuous null distribution by bisection on its CDF
fn null_median<D: ContinuousCDF<f64, f64>>(dist: &D) -> f64 {
    let mut lower = 0.0;
    let mut upper = 1.0;
    while dist.cdf(upper) < 0.5 {
        upper *= 2.0;
    }
    for _ in 0..200 {
        let mid = (lower + upper) / 2.0;
        if dist.cdf(mid) < 0.5 {
            lower = mid;
        } else {
            upper = mid;
        }
    }
    (lower + upper) / 2.0
}

// Upper tail probability of the test statistic
fn upper_tail_pvalue<D: ContinuousCDF<f64, f64> + Sync>(dist: &D, statistic: &Array1<f64>) -> Array1<f64> {
    let pval = statistic
        .to_vec()
        .into_par_iter()
        .map(|t| {
            if t.is_infinite() {
                0.0
            } else if t.is_nan() {
                1.0
            } else {
                (1.00 - dist.cdf(t.max(0.0))).clamp(0.0, 1.0)
            }
        })
        .collect::<Vec<f64>>();
    Array1::from_vec(pval)
}

// Genomic inflation factor: median of the statistics over the median of their null distribution.
// When calibrating, the statistics are divided by it before computing the p-values.
fn calibrated_pvalues<D: ContinuousCDF<f64, f64> + Sync>(
    dist: &D,
    mut statistic: Array1<f64>,
    calibrate: bool,
) -> (Array1<f64>, Array1<f64>, f64, bool) {
    let gif = median(&statistic.to_vec()) / null_median(dist);
    let calibrated = calibrate && gif.is_finite() && gif > 0.0;
    if calibrated {
        statistic.mapv_inplace(|x| x / gif);
    } else if calibrate {
        warn!("Genomic inflation factor could not be estimated, p-values are left uncalibrated");
    }
    let pval = upper_tail_pvalue(dist, &statistic);
    (statistic, pval, gif, calibrated)
}

impl AssociationTesting for Lfmm {
    /// One p-value per locus testing whether its environmental effects are zero,
    /// conditional on the fitted latent factors.
    fn estimate_significance(
        &self,
        y: &Array2<f64>,
        x: &Array2<f64>,
        mode: TestMode,
        calibrate: bool,
    ) -> Result<AssociationTest> {
        let model = self.model()?;
        let (n, l) = y.dim();
        let (n_, d) = x.dim();
        if (n != n_) || (n != model.n_units()) {
            return Err(OffsetError::DimensionMismatch(format!(
                "the genotype matrix has {} units, the environment matrix {} and the model {}",
                n,
                n_,
                model.n_units()
            )));
        }
        if (l != model.n_loci()) || (d != model.n_variables()) {
            return Err(OffsetError::DimensionMismatch(format!(
                "the data have {} loci and {} variables but the model was fitted on {} and {}",
                l,
                d,
                model.n_loci(),
                model.n_variables()
            )));
        }
        if any_non_finite(y) || any_non_finite(x) {
            return Err(OffsetError::InvalidParameter(
                "the genotype and environment matrices must not contain missing values".to_owned(),
            ));
        }
        let df = n as i64 - 1 - d as i64 - model.k as i64;
        if df < 1 {
            return Err(OffsetError::InvalidParameter(format!(
                "no residual degrees of freedom left with n={}, d={} and K={}",
                n, d, model.k
            )));
        }
        let df = df as f64;
        let x_std = model.standardisation.transform(&x.view());
        let y_centred = centre_columns(y);
        let z_full = design_matrix(&[x_std.view(), model.u.view()])?;
        let (statistic, pval, gif, calibrated) = match mode {
            TestMode::Full => {
                let (_beta, rss_full, _) = ols(&z_full, &y_centred)?;
                let z_reduced = design_matrix(&[model.u.view()])?;
                let (_beta, rss_reduced, _) = ols(&z_reduced, &y_centred)?;
                let f = Array1::from_iter(
                    rss_reduced
                        .iter()
                        .zip(rss_full.iter())
                        .map(|(&r0, &r1)| ((r0 - r1) / d as f64) / (r1 / df)),
                );
                let dist = FisherSnedecor::new(d as f64, df)
                    .map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
                calibrated_pvalues(&dist, f, calibrate)
            }
            TestMode::Single { variable } => {
                if variable >= d {
                    return Err(OffsetError::InvalidParameter(format!(
                        "environmental variable index {} is out of range (d={})",
                        variable, d
                    )));
                }
                let (beta, rss, inv_ztz) = ols(&z_full, &y_centred)?;
                // Skip the intercept
                let idx = variable + 1;
                let c = inv_ztz[(idx, idx)];
                let z2 = Array1::from_iter(
                    beta.row(idx)
                        .iter()
                        .zip(rss.iter())
                        .map(|(&b, &r)| b.powf(2.0) / ((r / df) * c)),
                );
                let dist = ChiSquared::new(1.0)
                    .map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
                calibrated_pvalues(&dist, z2, calibrate)
            }
        };
        info!(
            "Association test ({:?}) over {} loci: genomic inflation factor = {:.4}{}",
            mode,
            l,
            gif,
            if calibrated { " (calibrated)" } else { "" }
        );
        Ok(AssociationTest {
            mode,
            statistic,
            pval,
            gif,
            calibrated,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::*;
    #[test]
    fn test_null_median() {
        let chisq = ChiSquared::new(1.0).unwrap();
        assert!((null_median(&chisq) - 0.454936423119572).abs() < 1e-9);
        let f = FisherSnedecor::new(4.0, 192.0).unwrap();
        let m = null_median(&f);
        assert!((f.cdf(m) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_association() {
        let sim = simulate_gea(120, 150, 2, 2, 5, 7).unwrap();
        let y = sim.genotypes.clone();
        let x = sim.environments.clone();
        let lfmm = Lfmm::new(2, 1e-5, true);
        // Not fitted yet
        assert!(matches!(
            lfmm.estimate_significance(&y, &x, TestMode::Full, true),
            Err(OffsetError::UnfittedModel)
        ));
        let mut lfmm = lfmm;
        lfmm.estimate_effects(&y, &x).unwrap();
        for mode in [TestMode::Full, TestMode::Single { variable: 0 }] {
            for calibrate in [true, false] {
                let test = lfmm.estimate_significance(&y, &x, mode, calibrate).unwrap();
                assert_eq!(test.pval.len(), 150);
                assert!(test.pval.iter().all(|&p| (0.0..=1.0).contains(&p)));
                assert_eq!(test.calibrated, calibrate);
                // the causal loci are the most significant ones
                let causal_mean = sim.causal_loci.iter().map(|&j| test.statistic[j]).sum::<f64>()
                    / sim.causal_loci.len() as f64;
                assert!(causal_mean > 3.0 * median(&test.statistic.to_vec()));
            }
        }
        assert!(matches!(
            lfmm.estimate_significance(&y, &x, TestMode::Single { variable: 2 }, true),
            Err(OffsetError::InvalidParameter(_))
        ));
        assert!(matches!(
            lfmm.estimate_significance(&y.slice(s![0..100, ..]).to_owned(), &x.slice(s![0..100, ..]).to_owned(), TestMode::Full, true),
            Err(OffsetError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_monomorphic_locus() {
        let sim = simulate_gea(60, 40, 2, 1, 3, 11).unwrap();
        let mut y = sim.genotypes.clone();
        y.column_mut(5).fill(1.0);
        let mut lfmm = Lfmm::new(1, 1e-5, false);
        lfmm.estimate_effects(&y, &sim.environments).unwrap();
        let test = lfmm
            .estimate_significance(&y, &sim.environments, TestMode::Full, false)
            .unwrap();
        assert_eq!(test.pval[5], 1.0);
    }

    #[test]
    fn test_selector_empirical_fdr() {
        // Every locus outside the causal set is null, including those driven by latent structure only
        use crate::gea::{qvalues, select_candidates};
        let fdr = 0.2;
        let n_reps = 20;
        let n_causal = 20;
        let mut fdp_sum = 0.0;
        let mut true_positives = 0;
        for seed in 0..n_reps {
            let sim = simulate_gea(100, 200, 2, 2, n_causal, 1000 + seed).unwrap();
            let mut lfmm = Lfmm::new(2, 1e-5, true);
            lfmm.estimate_effects(&sim.genotypes, &sim.environments).unwrap();
            let test = lfmm
                .estimate_significance(&sim.genotypes, &sim.environments, TestMode::Full, true)
                .unwrap();
            let qval = qvalues(&test.pval, FdrMethod::BenjaminiHochberg).unwrap();
            let selected = match select_candidates(&qval, fdr).unwrap() {
                CandidateSet::Loci(idx) => idx,
                CandidateSet::All => panic!("the selector returns explicit loci"),
            };
            let n_true = selected
                .iter()
                .filter(|&j| sim.causal_loci.contains(j))
                .count();
            true_positives += n_true;
            if !selected.is_empty() {
                fdp_sum += (selected.len() - n_true) as f64 / selected.len() as f64;
            }
        }
        let mean_fdp = fdp_sum / n_reps as f64;
        assert!(mean_fdp <= 2.0 * fdr);
        // and the selector has power to find the causal loci
        assert!(true_positives >= (n_reps as usize * n_causal) / 2);
    }
}
