use clap::Parser;
use log::{error, info, warn};
mod base;
mod gea;
mod imputation;
mod io;
mod lfmm;
mod offset;
mod simulation;
use base::*;

// Instatiate arguments struct
#[derive(Parser, Debug)]
#[clap(
    author = "Jeff Paril",
    version = "0.1.0",
    about = "Genomic offsets from genotype-environment associations.",
    long_about = "Genomic offsets from genotype-environment associations: fit a latent factor mixed model of genotypes on environmental variables, select candidate adaptive loci at a target false discovery rate, and measure the genetic gap between current and predicted environments."
)]
struct Args {
    /// Analysis to perform (i.e. "simulate", "lfmm", "offset")
    analysis: String,
    /// Genotype table: units in rows, loci in columns, first column for the unit names
    #[clap(short, long, default_value = "")]
    geno: String,
    /// Current environment table: units in rows, environmental variables in columns
    #[clap(short, long, default_value = "")]
    env: String,
    /// Predicted (e.g. future) environment table of the same units and variables
    #[clap(long, default_value = "")]
    env_pred: String,
    /// Optional fitness loss table (one value per unit) to validate the offsets against
    #[clap(long, default_value = "")]
    fitness: String,
    /// Optional current environmental grid, streamed cell by cell
    #[clap(long, default_value = "")]
    grid_current: String,
    /// Optional predicted environmental grid listing the same cells as --grid-current
    #[clap(long, default_value = "")]
    grid_future: String,
    /// Delimiter of the input tables: comma, tab, etc...
    #[clap(long, default_value = ",")]
    delim: String,
    /// Output filename prefix (a timestamp is used if empty)
    #[clap(short, long, default_value = "")]
    output: String,
    /// Number of latent factors
    #[clap(short, long, default_value_t = 2)]
    k: usize,
    /// Ridge penalty
    #[clap(long, default_value_t = lfmm::DEFAULT_LAMBDA)]
    lambda: f64,
    /// Do not scale the environmental variables to unit variance
    #[clap(long)]
    no_scale: bool,
    /// Test a single environmental variable (0-based index) instead of all of them jointly
    #[clap(long)]
    variable: Option<usize>,
    /// Do not calibrate the test statistics with the genomic inflation factor
    #[clap(long)]
    no_calibrate: bool,
    /// False discovery rate control method: "BH" (Benjamini-Hochberg) or "storey"
    #[clap(long, default_value = "BH")]
    fdr_method: String,
    /// Storey's pi0 tuning parameter
    #[clap(long, default_value_t = 0.5)]
    storey_lambda: f64,
    /// Target false discovery rate for selecting candidate loci
    #[clap(short, long, default_value_t = 0.1)]
    q: f64,
    /// Use every locus for the offset when no candidate locus is selected
    #[clap(long)]
    fallback_all_loci: bool,
    /// Report the eigen-decomposition of the correlation-scaled effect size covariance
    #[clap(long)]
    scaled: bool,
    /// Number of threads to use for parallel processing
    #[clap(long, default_value_t = 1)]
    n_threads: usize,
    /// Logging level (error, warn, info, debug or trace)
    #[clap(long, default_value = "info")]
    log_level: String,
    ////////////////////////////////////////////////////
    ////// Simulation parameters
    ////////////////////////////////////////////////////
    /// Number of simulated units (individuals or populations)
    #[clap(long, default_value_t = 200)]
    n_units: usize,
    /// Number of simulated loci
    #[clap(long, default_value_t = 1_000)]
    n_loci: usize,
    /// Number of simulated environmental variables
    #[clap(long, default_value_t = 4)]
    n_variables: usize,
    /// Number of simulated loci with environmental effects
    #[clap(long, default_value_t = 20)]
    n_causal: usize,
    /// Random seed
    #[clap(long, default_value_t = 42)]
    seed: u64,
}

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| prefix.to_owned() + &(i + 1).to_string())
        .collect::<Vec<String>>()
}

fn simulate(args: &Args) -> Result<String> {
    let sim = simulation::simulate_gea(
        args.n_units,
        args.n_loci,
        args.n_variables,
        args.k,
        args.n_causal,
        args.seed,
    )?;
    let unit_names = names("pop", args.n_units);
    let environment_names = names("env", args.n_variables);
    let tables = vec![
        ("genotypes.csv", names("locus", args.n_loci), sim.genotypes),
        ("env.csv", environment_names.clone(), sim.environments),
        ("env_pred.csv", environment_names, sim.predicted_environments),
        (
            "fitness.csv",
            vec!["fitness_loss".to_owned(), "true_offset".to_owned()],
            ndarray::stack(
                ndarray::Axis(1),
                &[sim.fitness_loss.view(), sim.true_offset.view()],
            )
            .map_err(|e| OffsetError::DimensionMismatch(e.to_string()))?,
        ),
    ];
    let mut out: Vec<String> = vec![];
    for (suffix, column_names, matrix) in tables {
        let table = Table {
            row_names: unit_names.clone(),
            column_names,
            matrix,
        };
        out.push(io::write_table(
            &table,
            &io::output_filename(&args.output, suffix),
        )?);
    }
    info!("Causal loci (0-based): {:?}", sim.causal_loci);
    Ok(out.join("\n"))
}

fn load_data(args: &Args) -> Result<GenotypesAndEnvironments> {
    let file_geno = FileTable {
        filename: args.geno.clone(),
        delim: args.delim.clone(),
    };
    let file_env = FileTable {
        filename: args.env.clone(),
        delim: args.delim.clone(),
    };
    let mut data = *(file_geno, file_env).lparse()?;
    data.mean_imputation()?;
    info!(
        "Loaded {} units, {} loci and {} environmental variables",
        data.unit_names.len(),
        data.locus_names.len(),
        data.environment_names.len()
    );
    Ok(data)
}

// Table whose rows must list the same units in the same order
fn load_matching_table(fname: &str, delim: &str, unit_names: &[String]) -> Result<Table> {
    let table = *FileTable {
        filename: fname.to_owned(),
        delim: delim.to_owned(),
    }
    .lparse()?;
    if table.row_names != unit_names {
        return Err(OffsetError::DimensionMismatch(format!(
            "the units of {} do not match the genotyped units",
            fname
        )));
    }
    Ok(table)
}

// Fit, test and select candidates
fn fit_and_select(
    args: &Args,
    data: &GenotypesAndEnvironments,
) -> Result<(Lfmm, AssociationTest, ndarray::Array1<f64>, CandidateSet)> {
    let mut model = Lfmm::new(args.k, args.lambda, !args.no_scale);
    model.estimate_effects(&data.genotypes, &data.environments)?;
    let mode = match args.variable {
        Some(variable) => TestMode::Single { variable },
        None => TestMode::Full,
    };
    let test = model.estimate_significance(
        &data.genotypes,
        &data.environments,
        mode,
        !args.no_calibrate,
    )?;
    let method = match args.fdr_method.to_lowercase().as_str() {
        "bh" => FdrMethod::BenjaminiHochberg,
        "storey" => FdrMethod::Storey {
            lambda: args.storey_lambda,
        },
        x => {
            return Err(OffsetError::InvalidParameter(format!(
                "unknown false discovery rate method '{}', please use 'BH' or 'storey'",
                x
            )))
        }
    };
    let qval = gea::qvalues(&test.pval, method)?;
    let candidates = gea::select_candidates(&qval, args.q)?;
    Ok((model, test, qval, candidates))
}

fn lfmm(args: &Args) -> Result<String> {
    let data = load_data(args)?;
    let (model, test, qval, candidates) = fit_and_select(args, &data)?;
    io::write_loci(
        &data.locus_names,
        &data.environment_names,
        model.model()?,
        &test,
        &qval,
        &candidates,
        &io::output_filename(&args.output, "loci.csv"),
    )
}

fn offset(args: &Args) -> Result<String> {
    let data = load_data(args)?;
    let env_pred = load_matching_table(&args.env_pred, &args.delim, &data.unit_names)?;
    if env_pred.column_names != data.environment_names {
        return Err(OffsetError::DimensionMismatch(format!(
            "the variables of {} do not match those of {}",
            args.env_pred, args.env
        )));
    }
    let (model, test, qval, candidates) = fit_and_select(args, &data)?;
    let mut out: Vec<String> = vec![io::write_loci(
        &data.locus_names,
        &data.environment_names,
        model.model()?,
        &test,
        &qval,
        &candidates,
        &io::output_filename(&args.output, "loci.csv"),
    )?];
    let candidates = if args.fallback_all_loci {
        candidates.or_all_loci()
    } else {
        candidates
    };
    let result = model.genetic_gap(&data.environments, &env_pred.matrix, &candidates, args.scaled)?;
    out.push(io::write_units(
        &data.unit_names,
        &result,
        &io::output_filename(&args.output, "offsets.csv"),
    )?);
    out.push(io::write_eigen(
        &data.environment_names,
        &result,
        &io::output_filename(&args.output, "eigen.csv"),
    )?);
    out.push(io::write_covariance(
        &data.environment_names,
        &result,
        &io::output_filename(&args.output, "covariance.csv"),
    )?);
    if !args.fitness.is_empty() {
        let fitness = load_matching_table(&args.fitness, &args.delim, &data.unit_names)?;
        let fitness_loss = fitness.matrix.column(0);
        let (r_offset, p_offset) = gea::pearsons_correlation(&result.offset.view(), &fitness_loss)?;
        let (r_distance, p_distance) =
            gea::pearsons_correlation(&result.distance.view(), &fitness_loss)?;
        info!(
            "Correlation with {}: genomic offset r={:.4} (p={:.4e}), environmental distance r={:.4} (p={:.4e})",
            fitness.column_names[0], r_offset, p_offset, r_distance, p_distance
        );
    }
    if !args.grid_current.is_empty() || !args.grid_future.is_empty() {
        let calculator = OffsetCalculator::new(model.model()?, &candidates)?;
        let current = FileTable {
            filename: args.grid_current.clone(),
            delim: args.delim.clone(),
        };
        let future = FileTable {
            filename: args.grid_future.clone(),
            delim: args.delim.clone(),
        };
        let fname = io::output_filename(&args.output, "grid_offsets.csv");
        io::stream_grid_offsets(&calculator, &current, &future, &fname)?;
        out.push(fname);
    }
    Ok(out.join("\n"))
}

fn main() {
    let args = Args::parse();
    let log_level = args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.n_threads)
        .build_global()
    {
        warn!("Could not set the number of threads: {}", e);
    }
    let output = match args.analysis.as_str() {
        "simulate" => simulate(&args),
        "lfmm" => lfmm(&args),
        "offset" => offset(&args),
        x => Err(OffsetError::InvalidParameter(format!(
            "unknown analysis '{}', please use 'simulate', 'lfmm' or 'offset'",
            x
        ))),
    };
    match output {
        Ok(x) => println!("{}", x),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
