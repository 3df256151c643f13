use crate::base::*;
use log::{debug, info, warn};
use ndarray::prelude::*;
use ndarray_linalg::{Eigh, UPLO};
use rayon::prelude::*;

// Eigen-decomposition of a symmetric matrix with eigenvalues in descending order
fn sorted_eigh(c: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let (values, vectors) = c.eigh(UPLO::Lower)?;
    let d = values.len();
    let mut eigenvalues: Array1<f64> = Array1::zeros(d);
    let mut eigenvectors: Array2<f64> = Array2::zeros((d, d));
    for j in 0..d {
        eigenvalues[j] = values[d - 1 - j];
        eigenvectors.column_mut(j).assign(&vectors.column(d - 1 - j));
    }
    Ok((eigenvalues, eigenvectors))
}

pub fn covariance_to_correlation(c: &Array2<f64>) -> Array2<f64> {
    let d = c.nrows();
    let mut r: Array2<f64> = Array2::zeros((d, d));
    for i in 0..d {
        for j in 0..d {
            let denominator = (c[(i, i)] * c[(j, j)]).sqrt();
            r[(i, j)] = if i == j {
                1.0
            } else if denominator > 0.0 {
                c[(i, j)] / denominator
            } else {
                0.0
            };
        }
    }
    r
}

impl OffsetCalculator {
    /// Covariance C_b = mean_j b_j b_j^T over the candidate rows of B with finite effects.
    pub fn new(model: &LatentFactorModel, candidates: &CandidateSet) -> Result<Self> {
        let idx = candidates.indices(model.n_loci())?;
        let n_candidates = idx.len();
        let idx_finite = idx
            .into_iter()
            .filter(|&j| model.b.row(j).iter().all(|x| x.is_finite()))
            .collect::<Vec<usize>>();
        let n_skipped = n_candidates - idx_finite.len();
        if n_skipped > 0 {
            warn!("Skipping {} loci with missing effect sizes", n_skipped);
        }
        if idx_finite.is_empty() {
            return Err(OffsetError::EmptyCandidateSet);
        }
        let b = model.b.select(Axis(0), &idx_finite);
        let m = idx_finite.len();
        let covariance = b.t().dot(&b) / m as f64;
        let (mut eigenvalues, eigenvectors) = sorted_eigh(&covariance)?;
        // C_b is positive semi-definite
        eigenvalues.mapv_inplace(|x| x.max(0.0));
        debug!("Effect size covariance eigenvalues: {:?}", eigenvalues);
        Ok(OffsetCalculator {
            standardisation: model.standardisation.clone(),
            covariance,
            eigenvalues,
            eigenvectors,
            n_loci: m,
        })
    }

    pub fn n_variables(&self) -> usize {
        self.covariance.nrows()
    }

    fn check_row(&self, x: &ArrayView1<f64>, x_pred: &ArrayView1<f64>) -> Result<()> {
        let d = self.n_variables();
        if x.len() != d || x_pred.len() != d {
            return Err(OffsetError::DimensionMismatch(format!(
                "expected {} environmental variables, found {} (current) and {} (predicted)",
                d,
                x.len(),
                x_pred.len()
            )));
        }
        Ok(())
    }

    // dx C_b dx^T written as a sum of non-negative terms over the eigenvectors of C_b
    fn quadratic_form(&self, dx: &Array1<f64>) -> f64 {
        if dx.iter().any(|x| !x.is_finite()) {
            return f64::NAN;
        }
        self.eigenvalues
            .iter()
            .zip(self.eigenvectors.columns())
            .map(|(&lambda, w)| lambda * w.dot(dx).powf(2.0))
            .sum()
    }

    fn delta(&self, x: &ArrayView1<f64>, x_pred: &ArrayView1<f64>) -> Array1<f64> {
        self.standardisation.transform_row(x_pred) - self.standardisation.transform_row(x)
    }

    /// Genomic offset of one unit: mean over the chosen loci of (dx . b_j)^2, NaN if any
    /// environmental change is missing.
    pub fn offset_row(&self, x: &ArrayView1<f64>, x_pred: &ArrayView1<f64>) -> Result<f64> {
        self.check_row(x, x_pred)?;
        Ok(self.quadratic_form(&self.delta(x, x_pred)))
    }

    /// Squared Euclidean environmental distance with every variable in standard deviation units.
    pub fn distance_row(&self, x: &ArrayView1<f64>, x_pred: &ArrayView1<f64>) -> Result<f64> {
        self.check_row(x, x_pred)?;
        let dx = (x_pred - x) / &self.standardisation.sds;
        if dx.iter().any(|x| !x.is_finite()) {
            return Ok(f64::NAN);
        }
        Ok(dx.iter().map(|x| x.powf(2.0)).sum())
    }

    /// Offsets and distances of every unit, computed in parallel.
    pub fn offsets(&self, x: &Array2<f64>, x_pred: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        if x.dim() != x_pred.dim() {
            return Err(OffsetError::DimensionMismatch(format!(
                "current environment is {:?} but predicted environment is {:?}",
                x.dim(),
                x_pred.dim()
            )));
        }
        if x.ncols() != self.n_variables() {
            return Err(OffsetError::DimensionMismatch(format!(
                "the model has {} environmental variables but the environment matrix has {}",
                self.n_variables(),
                x.ncols()
            )));
        }
        let (offset, distance): (Vec<f64>, Vec<f64>) = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let (a, b) = (x.row(i), x_pred.row(i));
                let offset = self.quadratic_form(&self.delta(&a, &b));
                let distance = self.distance_row(&a, &b).unwrap_or(f64::NAN);
                (offset, distance)
            })
            .unzip();
        let n_missing = offset.iter().filter(|x| x.is_nan()).count();
        if n_missing > 0 {
            warn!("{} units have missing environmental values, their offsets are missing", n_missing);
        }
        Ok((Array1::from_vec(offset), Array1::from_vec(distance)))
    }

    /// Lazily evaluate one offset per (current, predicted) pair, e.g. over a large prediction grid.
    pub fn stream<'a, I>(&'a self, rows: I) -> impl Iterator<Item = Result<f64>> + 'a
    where
        I: IntoIterator<Item = (Array1<f64>, Array1<f64>)> + 'a,
        I::IntoIter: 'a,
    {
        rows.into_iter()
            .map(move |(x, x_pred)| self.offset_row(&x.view(), &x_pred.view()))
    }

    /// Eigenvalues (descending) and eigenvectors of C_b, or of its correlation matrix if `scaled`.
    pub fn diagnostics(&self, scaled: bool) -> Result<(Array1<f64>, Array2<f64>)> {
        if scaled {
            let (mut eigenvalues, eigenvectors) =
                sorted_eigh(&covariance_to_correlation(&self.covariance))?;
            eigenvalues.mapv_inplace(|x| x.max(0.0));
            Ok((eigenvalues, eigenvectors))
        } else {
            Ok((self.eigenvalues.clone(), self.eigenvectors.clone()))
        }
    }
}

impl OffsetResult {
    /// Share of the total effect size variance carried by each eigenvector.
    pub fn proportions(&self) -> Array1<f64> {
        let total = self.eigenvalues.sum();
        if total > 0.0 {
            &self.eigenvalues / total
        } else {
            Array1::zeros(self.eigenvalues.len())
        }
    }
}

impl GeneticGap for Lfmm {
    fn genetic_gap(
        &self,
        x: &Array2<f64>,
        x_pred: &Array2<f64>,
        candidates: &CandidateSet,
        scaled: bool,
    ) -> Result<OffsetResult> {
        let model = self.model()?;
        let calculator = OffsetCalculator::new(model, candidates)?;
        let (offset, distance) = calculator.offsets(x, x_pred)?;
        let (eigenvalues, eigenvectors) = calculator.diagnostics(scaled)?;
        info!(
            "Genomic offset of {} units from {} loci (mean = {:.6})",
            offset.len(),
            calculator.n_loci,
            offset.iter().filter(|x| !x.is_nan()).sum::<f64>()
                / offset.iter().filter(|x| !x.is_nan()).count().max(1) as f64
        );
        Ok(OffsetResult {
            offset,
            distance,
            covariance: calculator.covariance,
            eigenvalues,
            eigenvectors,
            scaled,
            n_loci: calculator.n_loci,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gea::*;
    use crate::simulation::*;
    use approx::assert_relative_eq;

    fn fit(sim: &SimulatedGea, k: usize, scale: bool) -> Lfmm {
        let mut lfmm = Lfmm::new(k, 1e-5, scale);
        lfmm.estimate_effects(&sim.genotypes, &sim.environments).unwrap();
        lfmm
    }

    #[test]
    fn test_offset_definition() {
        // offset(i) = mean_j (dx_i . b_j)^2 computed directly
        let sim = simulate_gea(80, 60, 3, 2, 4, 3).unwrap();
        let lfmm = fit(&sim, 2, false);
        let model = lfmm.model().unwrap();
        let candidates = CandidateSet::Loci(vec![1, 5, 7, 30]);
        let result = lfmm
            .genetic_gap(&sim.environments, &sim.predicted_environments, &candidates, false)
            .unwrap();
        assert_eq!(result.n_loci, 4);
        for i in 0..80 {
            let dx = &sim.predicted_environments.row(i) - &sim.environments.row(i);
            let expected = [1, 5, 7, 30]
                .iter()
                .map(|&j| model.b.row(j).dot(&dx).powf(2.0))
                .sum::<f64>()
                / 4.0;
            assert_relative_eq!(result.offset[i], expected, max_relative = 1e-8, epsilon = 1e-12);
            assert!(result.offset[i] >= 0.0);
        }
        // Eigenvalues sorted in descending order
        for j in 1..3 {
            assert!(result.eigenvalues[j - 1] >= result.eigenvalues[j]);
        }
        assert_relative_eq!(result.proportions().sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_offset_properties() {
        let sim = simulate_gea(100, 80, 2, 2, 5, 17).unwrap();
        let lfmm = fit(&sim, 2, true);
        let x = &sim.environments;
        let x_pred = &sim.predicted_environments;
        // All loci vs the explicit full range
        let all = lfmm.genetic_gap(x, x_pred, &CandidateSet::All, false).unwrap();
        let full_range = lfmm
            .genetic_gap(x, x_pred, &CandidateSet::Loci((0..80).collect()), false)
            .unwrap();
        assert_eq!(all.offset, full_range.offset);
        assert!(all.offset.iter().all(|&x| x >= 0.0));
        // No environmental change
        let unchanged = lfmm.genetic_gap(x, x, &CandidateSet::All, false).unwrap();
        assert!(unchanged.offset.iter().all(|&x| x == 0.0));
        assert!(unchanged.distance.iter().all(|&x| x == 0.0));
        // Scaled diagnostics leave the offsets untouched
        let scaled = lfmm.genetic_gap(x, x_pred, &CandidateSet::All, true).unwrap();
        assert_eq!(all.offset, scaled.offset);
        assert!(scaled.scaled);
        assert_relative_eq!(scaled.eigenvalues.sum(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_offset_scale_invariance() {
        let sim = simulate_gea(150, 120, 3, 2, 6, 5).unwrap();
        let scaled = fit(&sim, 2, true);
        let unscaled = fit(&sim, 2, false);
        let x = &sim.environments;
        let x_pred = &sim.predicted_environments;
        let a = scaled.genetic_gap(x, x_pred, &CandidateSet::All, false).unwrap();
        let b = unscaled.genetic_gap(x, x_pred, &CandidateSet::All, false).unwrap();
        for i in 0..150 {
            assert_relative_eq!(a.offset[i], b.offset[i], max_relative = 1e-4, epsilon = 1e-10);
        }
        assert_eq!(a.distance, b.distance);
    }

    #[test]
    fn test_offset_missing_values() {
        let sim = simulate_gea(60, 50, 2, 1, 4, 8).unwrap();
        let lfmm = fit(&sim, 1, true);
        let x = &sim.environments;
        let complete = lfmm
            .genetic_gap(x, &sim.predicted_environments, &CandidateSet::All, false)
            .unwrap();
        let mut x_pred = sim.predicted_environments.clone();
        x_pred.row_mut(10).fill(f64::NAN);
        x_pred[(20, 1)] = f64::NAN;
        let missing = lfmm
            .genetic_gap(x, &x_pred, &CandidateSet::All, false)
            .unwrap();
        assert!(missing.offset[10].is_nan());
        assert!(missing.offset[20].is_nan());
        assert!(missing.distance[10].is_nan());
        for i in (0..60).filter(|&i| i != 10 && i != 20) {
            assert_eq!(missing.offset[i], complete.offset[i]);
        }
    }

    #[test]
    fn test_offset_errors() {
        let sim = simulate_gea(40, 30, 2, 1, 3, 21).unwrap();
        let x = &sim.environments;
        let x_pred = &sim.predicted_environments;
        let unfitted = Lfmm::new(1, 1e-5, true);
        assert!(matches!(
            unfitted.genetic_gap(x, x_pred, &CandidateSet::All, false),
            Err(OffsetError::UnfittedModel)
        ));
        let lfmm = fit(&sim, 1, true);
        assert!(matches!(
            lfmm.genetic_gap(x, x_pred, &CandidateSet::Loci(vec![]), false),
            Err(OffsetError::EmptyCandidateSet)
        ));
        assert!(matches!(
            lfmm.genetic_gap(x, &x_pred.slice(s![0..39, ..]).to_owned(), &CandidateSet::All, false),
            Err(OffsetError::DimensionMismatch(_))
        ));
        assert!(matches!(
            lfmm.genetic_gap(x, &x_pred.slice(s![.., 0..1]).to_owned(), &CandidateSet::All, false),
            Err(OffsetError::DimensionMismatch(_))
        ));
        // Explicit fallback
        let fallback = CandidateSet::Loci(vec![]).or_all_loci();
        assert!(lfmm.genetic_gap(x, x_pred, &fallback, false).is_ok());
    }

    #[test]
    fn test_offset_stream_and_shared_model() {
        let sim = simulate_gea(50, 40, 2, 1, 3, 4).unwrap();
        let lfmm = fit(&sim, 1, true);
        let model = lfmm.model().unwrap();
        let calculator = OffsetCalculator::new(model, &CandidateSet::All).unwrap();
        let (batch, _) = calculator
            .offsets(&sim.environments, &sim.predicted_environments)
            .unwrap();
        let rows = (0..50).map(|i| {
            (
                sim.environments.row(i).to_owned(),
                sim.predicted_environments.row(i).to_owned(),
            )
        });
        let streamed = calculator
            .stream(rows)
            .collect::<Result<Vec<f64>>>()
            .unwrap();
        for i in 0..50 {
            assert_relative_eq!(streamed[i], batch[i], max_relative = 1e-12);
        }
        // One fitted model shared by concurrent calculators
        let candidate_sets = vec![
            CandidateSet::All,
            CandidateSet::Loci(vec![0, 1, 2]),
            CandidateSet::Loci(sim.causal_loci.clone()),
        ];
        let results = candidate_sets
            .par_iter()
            .map(|c| {
                lfmm.genetic_gap(&sim.environments, &sim.predicted_environments, c, false)
            })
            .collect::<Vec<Result<OffsetResult>>>();
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_genomic_offset_end_to_end() {
        let n = 200;
        let l = 510;
        let d = 4;
        let k = 3;
        let sim = simulate_gea(n, l, d, k, 10, 2023).unwrap();
        let mut lfmm = Lfmm::new(k, 1e-5, true);
        lfmm.estimate_effects(&sim.genotypes, &sim.environments).unwrap();
        let test = lfmm
            .estimate_significance(&sim.genotypes, &sim.environments, TestMode::Full, true)
            .unwrap();
        assert_eq!(test.pval.len(), l);
        assert!(test.pval.iter().all(|&p| (0.0..=1.0).contains(&p)));
        let qval = qvalues(&test.pval, FdrMethod::BenjaminiHochberg).unwrap();
        let candidates = select_candidates(&qval, 0.1).unwrap();
        let n_candidates = candidates.len(l);
        assert!(n_candidates >= 1);
        assert!(n_candidates <= 60);
        let result = lfmm
            .genetic_gap(&sim.environments, &sim.predicted_environments, &candidates, false)
            .unwrap();
        assert_eq!(result.offset.len(), n);
        assert!(result.offset.iter().all(|&x| x.is_finite() && x >= 0.0));
        let (r_offset, _) =
            pearsons_correlation(&result.offset.view(), &sim.fitness_loss.view()).unwrap();
        let (r_distance, _) =
            pearsons_correlation(&result.distance.view(), &sim.fitness_loss.view()).unwrap();
        assert!(r_offset > 0.0);
        assert!(r_offset > r_distance);
    }
}
