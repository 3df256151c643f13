use ndarray::prelude::*;
use std::fs::File;
use std::io::{prelude::*, BufReader};

use crate::base::*;

// Missing values are empty cells, "NA" or "NaN"
pub fn parse_value(x: &str) -> std::result::Result<f64, String> {
    match x {
        "" | "NA" | "NaN" | "nan" | "." => Ok(f64::NAN),
        _ => x
            .parse::<f64>()
            .map_err(|_| format!("cannot cast '{}' into float64", x)),
    }
}

pub fn split_line(line: &str, delim: &str) -> Vec<String> {
    line.trim_end_matches(['\n', '\r'])
        .split(delim)
        .map(|x| x.trim()) // remove pesky leading and trailing whitespace
        .map(|x| x.to_owned())
        .collect::<Vec<String>>()
}

/// Parse one data line into the unit name and its numeric values.
pub fn parse_record(
    line: &str,
    delim: &str,
    fname: &str,
    line_number: usize,
) -> Result<(String, Vec<f64>)> {
    let vec_line = split_line(line, delim);
    let name = vec_line[0].clone();
    let mut values: Vec<f64> = Vec::with_capacity(vec_line.len() - 1);
    for x in vec_line[1..].iter() {
        let value = parse_value(x).map_err(|message| OffsetError::Parse {
            fname: fname.to_owned(),
            line: line_number,
            message,
        })?;
        values.push(value);
    }
    Ok((name, values))
}

// Comments start with '#'
pub fn skip_line(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

impl Parse<Table> for FileTable {
    fn lparse(&self) -> Result<Box<Table>> {
        let file = File::open(&self.filename)?;
        let reader = BufReader::new(file);
        let mut column_names: Vec<String> = vec![];
        let mut row_names: Vec<String> = vec![];
        let mut values: Vec<f64> = vec![];
        let mut header = true;
        for (i, l) in reader.lines().enumerate() {
            let line = l?;
            if skip_line(&line) {
                continue;
            }
            if header {
                column_names = split_line(&line, &self.delim)[1..].to_vec();
                header = false;
                continue;
            }
            let (name, mut row) = parse_record(&line, &self.delim, &self.filename, i + 1)?;
            if row.len() != column_names.len() {
                return Err(OffsetError::Parse {
                    fname: self.filename.clone(),
                    line: i + 1,
                    message: format!(
                        "expected {} values but found {}",
                        column_names.len(),
                        row.len()
                    ),
                });
            }
            row_names.push(name);
            values.append(&mut row);
        }
        let n = row_names.len();
        let p = column_names.len();
        let matrix = Array2::from_shape_vec((n, p), values)
            .map_err(|e| OffsetError::DimensionMismatch(e.to_string()))?;
        log::debug!("Parsed {} rows x {} columns from {}", n, p, self.filename);
        Ok(Box::new(Table {
            row_names,
            column_names,
            matrix,
        }))
    }
}

impl Parse<GenotypesAndEnvironments> for (FileTable, FileTable) {
    // Genotypes first, environments second; units must be listed in the same order
    fn lparse(&self) -> Result<Box<GenotypesAndEnvironments>> {
        let geno = self.0.lparse()?;
        let env = self.1.lparse()?;
        if geno.row_names != env.row_names {
            return Err(OffsetError::DimensionMismatch(format!(
                "the units of {} ({}) and {} ({}) do not match",
                self.0.filename,
                geno.row_names.len(),
                self.1.filename,
                env.row_names.len()
            )));
        }
        Ok(Box::new(GenotypesAndEnvironments {
            unit_names: geno.row_names,
            locus_names: geno.column_names,
            environment_names: env.column_names,
            genotypes: geno.matrix,
            environments: env.matrix,
        }))
    }
}

impl GenotypesAndEnvironments {
    pub fn check(&self) -> Result<&Self> {
        let (n, l) = self.genotypes.dim();
        let (n_, d) = self.environments.dim();
        if n != n_ || n != self.unit_names.len() {
            return Err(OffsetError::DimensionMismatch(format!(
                "{} genotyped units, {} environment rows and {} unit names",
                n,
                n_,
                self.unit_names.len()
            )));
        }
        if l != self.locus_names.len() || d != self.environment_names.len() {
            return Err(OffsetError::DimensionMismatch(
                "column names do not match the matrix widths".to_owned(),
            ));
        }
        Ok(self)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_table() {
        let file_env = FileTable {
            filename: "./tests/test_env.csv".to_owned(),
            delim: ",".to_owned(),
        };
        let env = *file_env.lparse().unwrap();
        assert_eq!(
            env.row_names,
            vec!["pop1", "pop2", "pop3", "pop4", "pop5"]
                .into_iter()
                .map(|x| x.to_owned())
                .collect::<Vec<String>>()
        );
        assert_eq!(env.column_names, vec!["bio1".to_owned(), "bio12".to_owned()]);
        assert_eq!(env.matrix.dim(), (5, 2));
        assert_eq!(env.matrix[(0, 0)], 11.2);
        assert_eq!(env.matrix[(4, 1)], 1020.0);

        let file_geno = FileTable {
            filename: "./tests/test_geno.csv".to_owned(),
            delim: ",".to_owned(),
        };
        let output = *(file_geno, file_env).lparse().unwrap();
        output.check().unwrap();
        assert_eq!(output.genotypes.dim(), (5, 4));
        assert_eq!(output.locus_names[3], "locus4".to_owned());
        // empty cell and NA are missing
        assert!(output.genotypes[(1, 2)].is_nan());
        assert!(output.genotypes[(3, 0)].is_nan());
        assert_eq!(output.genotypes[(4, 3)], 2.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_value("NA").unwrap().is_nan());
        assert_eq!(parse_value("0.25").unwrap(), 0.25);
        assert!(parse_value("zero").is_err());
        match parse_record("pop1,1,x", ",", "f.csv", 7) {
            Err(OffsetError::Parse { line, .. }) => assert_eq!(line, 7),
            _ => panic!("expected a parse error"),
        }
        let missing = FileTable {
            filename: "./tests/does_not_exist.csv".to_owned(),
            delim: ",".to_owned(),
        };
        assert!(matches!(missing.lparse(), Err(OffsetError::Io(_))));
    }
}
