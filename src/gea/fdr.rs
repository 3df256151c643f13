use crate::base::*;
use log::{info, warn};
use ndarray::prelude::*;

fn validate_pvalues(pval: &Array1<f64>) -> Result<()> {
    for (i, &p) in pval.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(OffsetError::InvalidParameter(format!(
                "p-value at index {} is out of range [0, 1]: {}",
                i, p
            )));
        }
    }
    Ok(())
}

/// Proportion of true null hypotheses, estimated from the p-values above `lambda`.
pub fn estimate_pi0(pval: &Array1<f64>, lambda: f64) -> Result<f64> {
    validate_pvalues(pval)?;
    if !(0.0..1.0).contains(&lambda) {
        return Err(OffsetError::InvalidParameter(format!(
            "the pi0 tuning parameter lambda={} must be in [0, 1)",
            lambda
        )));
    }
    let m = pval.len();
    if m == 0 {
        return Ok(1.0);
    }
    let n_above = pval.iter().filter(|&&p| p > lambda).count();
    Ok((n_above as f64 / (m as f64 * (1.0 - lambda))).min(1.0))
}

/// q-values in the input order: step-up Benjamini-Hochberg adjusted p-values,
/// multiplied by the estimated null proportion for the Storey method.
pub fn qvalues(pval: &Array1<f64>, method: FdrMethod) -> Result<Array1<f64>> {
    validate_pvalues(pval)?;
    let m = pval.len();
    if m == 0 {
        return Ok(Array1::zeros(0));
    }
    let pi0 = match method {
        FdrMethod::BenjaminiHochberg => 1.0,
        FdrMethod::Storey { lambda } => estimate_pi0(pval, lambda)?,
    };
    let mut idx = (0..m).collect::<Vec<usize>>();
    idx.sort_by(|&a, &b| pval[a].total_cmp(&pval[b]));
    let mut qval: Array1<f64> = Array1::zeros(m);
    // Enforce monotonicity from the largest p-value down
    let mut previous = f64::INFINITY;
    for i in (0..m).rev() {
        let rank = (i + 1) as f64;
        let q = (pi0 * pval[idx[i]] * m as f64 / rank).min(1.0).min(previous);
        qval[idx[i]] = q;
        previous = q;
    }
    Ok(qval)
}

/// Loci with a q-value at or below the target false discovery rate, in ascending order.
pub fn select_candidates(qval: &Array1<f64>, fdr: f64) -> Result<CandidateSet> {
    if !(fdr > 0.0 && fdr < 1.0) {
        return Err(OffsetError::InvalidParameter(format!(
            "the false discovery rate q={} must be in (0, 1)",
            fdr
        )));
    }
    let idx = qval
        .iter()
        .enumerate()
        .filter(|(_, &q)| q <= fdr)
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    info!(
        "Selected {} candidate loci out of {} at q <= {}",
        idx.len(),
        qval.len(),
        fdr
    );
    Ok(CandidateSet::Loci(idx))
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        match self {
            CandidateSet::All => false,
            CandidateSet::Loci(idx) => idx.is_empty(),
        }
    }

    pub fn len(&self, n_loci: usize) -> usize {
        match self {
            CandidateSet::All => n_loci,
            CandidateSet::Loci(idx) => idx.len(),
        }
    }

    /// Explicit fallback: an empty selection becomes the set of all loci.
    pub fn or_all_loci(self) -> Self {
        if self.is_empty() {
            warn!("No candidate locus was selected, falling back to all loci");
            CandidateSet::All
        } else {
            self
        }
    }

    /// Sorted, de-duplicated locus indices, checked against the number of loci.
    pub fn indices(&self, n_loci: usize) -> Result<Vec<usize>> {
        match self {
            CandidateSet::All => Ok((0..n_loci).collect()),
            CandidateSet::Loci(idx) => {
                if idx.is_empty() {
                    return Err(OffsetError::EmptyCandidateSet);
                }
                let mut idx = idx.clone();
                idx.sort_unstable();
                idx.dedup();
                if let Some(&j) = idx.last() {
                    if j >= n_loci {
                        return Err(OffsetError::InvalidParameter(format!(
                            "candidate locus index {} is out of range (L={})",
                            j, n_loci
                        )));
                    }
                }
                Ok(idx)
            }
        }
    }
}
