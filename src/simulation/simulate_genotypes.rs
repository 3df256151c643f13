use crate::base::*;
use log::info;
use ndarray::prelude::*;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use statrs::distribution::{Normal, Uniform};

fn standard_normal_matrix(rng: &mut StdRng, n: usize, p: usize, sd: f64) -> Result<Array2<f64>> {
    let dist = Normal::new(0.0, sd).map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
    Ok(Array2::from_shape_fn((n, p), |_| dist.sample(rng)))
}

/// Simulate allele counts of n diploid units at L loci shaped by d environmental
/// variables and K latent factors of population structure which are themselves
/// correlated with the environment. Only the first two variables have causal
/// effects, carried by `n_causal` loci. The fitness loss of each unit is its true
/// genomic offset between the current and a shifted environment plus some noise.
pub fn simulate_gea(
    n: usize,
    l: usize,
    d: usize,
    k: usize,
    n_causal: usize,
    seed: u64,
) -> Result<SimulatedGea> {
    if n < 3 || l == 0 || d == 0 || k == 0 {
        return Err(OffsetError::InvalidParameter(format!(
            "cannot simulate with n={}, L={}, d={} and K={}",
            n, l, d, k
        )));
    }
    if n_causal == 0 || n_causal > l {
        return Err(OffsetError::InvalidParameter(format!(
            "the number of causal loci ({}) must be between 1 and L={}",
            n_causal, l
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    // Latent structure and the environment confounded with it
    let u = standard_normal_matrix(&mut rng, n, k, 1.0)?;
    let a = standard_normal_matrix(&mut rng, k, d, 0.5)?;
    let environments = u.dot(&a) + standard_normal_matrix(&mut rng, n, d, 1.0)?;
    let v = standard_normal_matrix(&mut rng, l, k, 1.0)?;
    // Causal effects on the first (strong) and second (weak) variables
    let mut causal_loci = sample(&mut rng, l, n_causal).into_vec();
    causal_loci.sort_unstable();
    let mut effects: Array2<f64> = Array2::zeros((l, d));
    let strong = Uniform::new(1.0, 2.0).map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
    let weak = Uniform::new(0.2, 0.5).map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
    for &j in causal_loci.iter() {
        let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        effects[(j, 0)] = sign * strong.sample(&mut rng);
        if d > 1 {
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            effects[(j, 1)] = sign * weak.sample(&mut rng);
        }
    }
    // Baseline allele frequencies on the logit scale
    let baseline = Array1::from_shape_fn(l, |_| {
        let p0: f64 = rng.gen_range(0.1..0.9);
        (p0 / (1.0 - p0)).ln()
    });
    let eta = environments.dot(&effects.t()) + u.dot(&v.t()) + &baseline;
    let p = bound_parameters_with_logit(&eta.iter().copied().collect::<Vec<f64>>(), 0.0, 1.0);
    let genotypes = Array2::from_shape_vec((n, l), p)
        .map_err(|e| OffsetError::DimensionMismatch(e.to_string()))?
        .mapv(|p| (rng.gen_bool(p) as u8 + rng.gen_bool(p) as u8) as f64);
    // Environmental shift and the resulting fitness loss
    let predicted_environments = &environments + &standard_normal_matrix(&mut rng, n, d, 1.0)?;
    let delta = &predicted_environments - &environments;
    let causal_effects = effects.select(Axis(0), &causal_loci);
    let true_offset = delta
        .dot(&causal_effects.t())
        .mapv(|x| x.powf(2.0))
        .mean_axis(Axis(1))
        .ok_or_else(|| OffsetError::InvalidParameter("no causal loci".to_owned()))?;
    let noise = Normal::new(0.0, 0.1).map_err(|e| OffsetError::InvalidParameter(e.to_string()))?;
    let fitness_loss = true_offset.mapv(|x| x + noise.sample(&mut rng));
    info!(
        "Simulated {} units, {} loci ({} causal), {} environmental variables and {} latent factors (seed={})",
        n, l, n_causal, d, k, seed
    );
    Ok(SimulatedGea {
        genotypes,
        environments,
        predicted_environments,
        effects,
        causal_loci,
        true_offset,
        fitness_loss,
    })
}
