use crate::base::Result;
use ndarray::prelude::*;

///////////////////////////////////////////////////////////////////////////////
// STRUCTS
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct FileTable {
    pub filename: String,
    pub delim: String,
}

// Delimited numeric table: header row, first column holds the unit names
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub row_names: Vec<String>,
    pub column_names: Vec<String>,
    pub matrix: Array2<f64>, // n units x p columns
}

#[derive(Debug, Clone)]
pub struct GenotypesAndEnvironments {
    pub unit_names: Vec<String>,          // n
    pub locus_names: Vec<String>,         // L
    pub environment_names: Vec<String>,   // d
    pub genotypes: Array2<f64>,           // n units x L loci
    pub environments: Array2<f64>,        // n units x d variables
}

/// Column centring (and optionally scaling) parameters of the fit-time
/// environment matrix. The same parameters must be applied to every
/// environment matrix compared against the fitted effect sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardisation {
    pub means: Array1<f64>,
    pub sds: Array1<f64>,
    pub scaled: bool,
}

/// Fitted latent factor mixed model.
#[derive(Debug, Clone)]
pub struct LatentFactorModel {
    pub b: Array2<f64>, // L loci x d environmental effect sizes
    pub u: Array2<f64>, // n units x K latent factor scores
    pub v: Array2<f64>, // L loci x K latent factor loadings
    pub k: usize,
    pub lambda: f64,
    pub standardisation: Standardisation,
}

// Ridge LFMM estimator, holds the model once fitted
#[derive(Debug, Clone)]
pub struct Lfmm {
    pub k: usize,
    pub lambda: f64,
    pub scale: bool,
    pub model: Option<LatentFactorModel>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestMode {
    /// F-test of all environmental variables jointly
    Full,
    /// t-test (as a 1 df chi-square on z^2) of a single environmental variable
    Single { variable: usize },
}

#[derive(Debug, Clone)]
pub struct AssociationTest {
    pub mode: TestMode,
    pub statistic: Array1<f64>, // L: F-scores or squared z-scores, after calibration
    pub pval: Array1<f64>,      // L
    pub gif: f64,               // genomic inflation factor
    pub calibrated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FdrMethod {
    BenjaminiHochberg,
    Storey { lambda: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateSet {
    All,
    Loci(Vec<usize>),
}

// Prepared covariance of the effect sizes of the chosen loci
#[derive(Debug, Clone)]
pub struct OffsetCalculator {
    pub standardisation: Standardisation,
    pub covariance: Array2<f64>,  // d x d
    pub eigenvalues: Array1<f64>, // d, descending and non-negative
    pub eigenvectors: Array2<f64>, // d x d, one eigenvector per column
    pub n_loci: usize,
}

#[derive(Debug, Clone)]
pub struct OffsetResult {
    pub offset: Array1<f64>,       // n, NaN where missing
    pub distance: Array1<f64>,     // n, squared standardised environmental distance
    pub covariance: Array2<f64>,   // d x d
    pub eigenvalues: Array1<f64>,  // d, descending
    pub eigenvectors: Array2<f64>, // d x d
    pub scaled: bool,
    pub n_loci: usize,
}

#[derive(Debug, Clone)]
pub struct SimulatedGea {
    pub genotypes: Array2<f64>,              // n x L allele counts
    pub environments: Array2<f64>,           // n x d
    pub predicted_environments: Array2<f64>, // n x d
    pub effects: Array2<f64>,                // L x d true effects
    pub causal_loci: Vec<usize>,
    pub true_offset: Array1<f64>,  // n
    pub fitness_loss: Array1<f64>, // n
}

///////////////////////////////////////////////////////////////////////////////
// TRAITS
///////////////////////////////////////////////////////////////////////////////

pub trait Parse<T> {
    fn lparse(&self) -> Result<Box<T>>;
}

pub trait LatentFactorRegression {
    fn new(k: usize, lambda: f64, scale: bool) -> Self;
    fn estimate_effects(&mut self, y: &Array2<f64>, x: &Array2<f64>) -> Result<&mut Self>;
    fn model(&self) -> Result<&LatentFactorModel>;
}

pub trait AssociationTesting {
    fn estimate_significance(
        &self,
        y: &Array2<f64>,
        x: &Array2<f64>,
        mode: TestMode,
        calibrate: bool,
    ) -> Result<AssociationTest>;
}

pub trait GeneticGap {
    fn genetic_gap(
        &self,
        x: &Array2<f64>,
        x_pred: &Array2<f64>,
        candidates: &CandidateSet,
        scaled: bool,
    ) -> Result<OffsetResult>;
}
