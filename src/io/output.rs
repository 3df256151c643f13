use crate::base::*;
use log::info;
use ndarray::prelude::*;
use std::fs::OpenOptions;
use std::io::{prelude::*, BufWriter};
use std::time::{SystemTime, UNIX_EPOCH};

/// Output filename from a prefix and a suffix; an empty prefix is replaced by a timestamp.
pub fn output_filename(prefix: &str, suffix: &str) -> String {
    let prefix = if prefix.is_empty() {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|t| t.as_secs_f64())
            .unwrap_or(0.0);
        "goffset-".to_owned() + &time.to_string()
    } else {
        prefix.to_owned()
    };
    prefix + "-" + suffix
}

pub fn create_output(out: &str) -> Result<BufWriter<std::fs::File>> {
    let file_out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(out)?;
    Ok(BufWriter::new(file_out))
}

// Small magnitudes in scientific notation so that tiny p-values are not truncated to zero
pub fn format_value(x: f64) -> String {
    if x.is_finite() && x != 0.0 && x.abs() < 1e-4 {
        format!("{:e}", x)
    } else {
        parse_f64_roundup_and_own(x, 12)
    }
}

fn format_row(values: &[f64]) -> Vec<String> {
    values
        .iter()
        .map(|&x| format_value(x))
        .collect::<Vec<String>>()
}

/// Numeric table with a header and the row names in the first column.
pub fn write_table(table: &Table, out: &str) -> Result<String> {
    let mut file_out = create_output(out)?;
    file_out.write_all(
        ("unit,".to_owned() + &table.column_names.join(",") + "\n").as_bytes(),
    )?;
    for (name, row) in table.row_names.iter().zip(table.matrix.rows()) {
        let line = name.to_owned() + "," + &format_row(&row.to_vec()).join(",") + "\n";
        file_out.write_all(line.as_bytes())?;
    }
    file_out.flush()?;
    Ok(out.to_owned())
}

/// Per-locus effect sizes, association statistics, q-values and candidate flags.
pub fn write_loci(
    locus_names: &[String],
    environment_names: &[String],
    model: &LatentFactorModel,
    test: &AssociationTest,
    qval: &Array1<f64>,
    candidates: &CandidateSet,
    out: &str,
) -> Result<String> {
    let l = model.n_loci();
    if locus_names.len() != l || test.pval.len() != l || qval.len() != l {
        return Err(OffsetError::DimensionMismatch(format!(
            "{} locus names, {} effect size rows, {} p-values and {} q-values",
            locus_names.len(),
            l,
            test.pval.len(),
            qval.len()
        )));
    }
    let is_candidate = match candidates {
        CandidateSet::All => vec![true; l],
        CandidateSet::Loci(idx) => {
            let mut flags = vec![false; l];
            for &j in idx.iter().filter(|&&j| j < l) {
                flags[j] = true;
            }
            flags
        }
    };
    let mut file_out = create_output(out)?;
    let settings = format!(
        "#test={:?};gif={};calibrated={};K={};lambda={}\n",
        test.mode,
        format_value(test.gif),
        test.calibrated,
        model.k,
        model.lambda
    );
    file_out.write_all(settings.as_bytes())?;
    let header = vec![
        "#locus".to_owned(),
        environment_names
            .iter()
            .map(|x| "effect_".to_owned() + x)
            .collect::<Vec<String>>()
            .join(","),
        "statistic,pvalue,qvalue,candidate".to_owned(),
    ]
    .join(",")
        + "\n";
    file_out.write_all(header.as_bytes())?;
    for j in 0..l {
        let line = vec![
            locus_names[j].to_owned(),
            format_row(&model.b.row(j).to_vec()).join(","),
            format_value(test.statistic[j]),
            format_value(test.pval[j]),
            format_value(qval[j]),
            (is_candidate[j] as u8).to_string(),
        ]
        .join(",")
            + "\n";
        file_out.write_all(line.as_bytes())?;
    }
    file_out.flush()?;
    info!("Wrote {} loci into {}", l, out);
    Ok(out.to_owned())
}

/// Per-unit genomic offsets and environmental distances, missing values as NA.
pub fn write_units(unit_names: &[String], result: &OffsetResult, out: &str) -> Result<String> {
    if unit_names.len() != result.offset.len() {
        return Err(OffsetError::DimensionMismatch(format!(
            "{} unit names but {} offsets",
            unit_names.len(),
            result.offset.len()
        )));
    }
    let mut file_out = create_output(out)?;
    file_out.write_all(b"#unit,offset,distance\n")?;
    for (i, name) in unit_names.iter().enumerate() {
        let line = vec![
            name.to_owned(),
            format_value(result.offset[i]),
            format_value(result.distance[i]),
        ]
        .join(",")
            + "\n";
        file_out.write_all(line.as_bytes())?;
    }
    file_out.flush()?;
    info!("Wrote the offsets of {} units into {}", unit_names.len(), out);
    Ok(out.to_owned())
}

/// Eigenvalues, their proportions and the eigenvector loadings on each variable.
pub fn write_eigen(environment_names: &[String], result: &OffsetResult, out: &str) -> Result<String> {
    let d = result.eigenvalues.len();
    if environment_names.len() != d {
        return Err(OffsetError::DimensionMismatch(format!(
            "{} environmental variable names but {} eigenvalues",
            environment_names.len(),
            d
        )));
    }
    let proportions = result.proportions();
    let mut file_out = create_output(out)?;
    let header = "#component,eigenvalue,proportion,".to_owned()
        + &environment_names.join(",")
        + "\n";
    file_out.write_all(header.as_bytes())?;
    for k in 0..d {
        let line = vec![
            (k + 1).to_string(),
            format_value(result.eigenvalues[k]),
            format_value(proportions[k]),
            format_row(&result.eigenvectors.column(k).to_vec()).join(","),
        ]
        .join(",")
            + "\n";
        file_out.write_all(line.as_bytes())?;
    }
    file_out.flush()?;
    Ok(out.to_owned())
}

/// Covariance of the effect sizes of the loci used for the offset (d x d).
pub fn write_covariance(environment_names: &[String], result: &OffsetResult, out: &str) -> Result<String> {
    let d = result.covariance.nrows();
    if environment_names.len() != d {
        return Err(OffsetError::DimensionMismatch(format!(
            "{} environmental variable names but a {}x{} covariance matrix",
            environment_names.len(),
            d,
            d
        )));
    }
    let table = Table {
        row_names: environment_names.to_vec(),
        column_names: environment_names.to_vec(),
        matrix: result.covariance.clone(),
    };
    write_table(&table, out)?;
    info!("Wrote the effect size covariance of {} loci into {}", result.n_loci, out);
    Ok(out.to_owned())
}
