use ndarray::prelude::*;

use crate::base::*;

// Replace missing values in each column by the mean of its observed values;
// columns with no observed value are set to zero. Returns the number of imputed cells.
pub fn impute_mean(x: &mut Array2<f64>) -> usize {
    let mut n_imputed: usize = 0;
    for mut column in x.columns_mut() {
        let (sum, count) = column
            .iter()
            .filter(|x| x.is_finite())
            .fold((0.0, 0usize), |(s, c), &x| (s + x, c + 1));
        let mu = if count > 0 { sum / count as f64 } else { 0.0 };
        for x in column.iter_mut() {
            if !x.is_finite() {
                *x = mu;
                n_imputed += 1;
            }
        }
    }
    n_imputed
}

impl GenotypesAndEnvironments {
    pub fn mean_imputation(&mut self) -> Result<&mut Self> {
        self.check()?;
        let n_imputed = impute_mean(&mut self.genotypes);
        if n_imputed > 0 {
            log::warn!(
                "Imputed {} missing genotype values ({:.2}% of the matrix) with locus means",
                n_imputed,
                100.0 * n_imputed as f64 / self.genotypes.len() as f64
            );
        }
        Ok(self)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_impute_mean() {
        let mut x = Array2::from_shape_vec(
            (3, 3),
            vec![0.0, 2.0, f64::NAN, f64::NAN, 1.0, f64::NAN, 2.0, 0.0, f64::NAN],
        )
        .unwrap();
        let n = impute_mean(&mut x);
        assert_eq!(n, 4);
        assert_eq!(x.column(0).to_vec(), vec![0.0, 1.0, 2.0]);
        assert_eq!(x.column(1).to_vec(), vec![2.0, 1.0, 0.0]);
        assert_eq!(x.column(2).to_vec(), vec![0.0, 0.0, 0.0]);

        let file_geno = FileTable {
            filename: "./tests/test_geno.csv".to_owned(),
            delim: ",".to_owned(),
        };
        let file_env = FileTable {
            filename: "./tests/test_env.csv".to_owned(),
            delim: ",".to_owned(),
        };
        let mut genotypes_and_environments = *(file_geno, file_env).lparse().unwrap();
        genotypes_and_environments.mean_imputation().unwrap();
        assert!(!any_non_finite(&genotypes_and_environments.genotypes));
        assert_eq!(genotypes_and_environments.genotypes[(3, 0)], 1.0);
        assert_eq!(genotypes_and_environments.genotypes[(1, 2)], 1.0);
    }
}
