pub use self::simulate_genotypes::*;

mod simulate_genotypes;
