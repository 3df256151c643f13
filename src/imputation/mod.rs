pub use self::mean_imputation::*;

mod mean_imputation;
