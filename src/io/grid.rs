use crate::base::*;
use crate::io::output::{create_output, format_value};
use log::{info, warn};
use ndarray::prelude::*;
use std::fs::{self, File};
use std::io::{prelude::*, BufReader, BufWriter, Lines};

// Next data line (header included) skipping comments, with its 1-based line number
fn next_data_line(lines: &mut Lines<BufReader<File>>, line_number: &mut usize) -> Option<Result<String>> {
    for l in lines.by_ref() {
        *line_number += 1;
        match l {
            Ok(line) => {
                if skip_line(&line) {
                    continue;
                }
                return Some(Ok(line));
            }
            Err(e) => return Some(Err(OffsetError::Io(e))),
        }
    }
    None
}

fn open_grid(file: &FileTable, d: usize) -> Result<GridLines> {
    let mut lines = BufReader::new(File::open(&file.filename)?).lines();
    let mut line_number = 0;
    let header = match next_data_line(&mut lines, &mut line_number) {
        Some(x) => x?,
        None => {
            return Err(OffsetError::Parse {
                fname: file.filename.clone(),
                line: 0,
                message: "empty grid file".to_owned(),
            })
        }
    };
    let n_columns = split_line(&header, &file.delim).len() - 1;
    if n_columns != d {
        return Err(OffsetError::DimensionMismatch(format!(
            "{} has {} environmental variables but the model has {}",
            file.filename, n_columns, d
        )));
    }
    Ok((lines, line_number))
}

type GridLines = (Lines<BufReader<File>>, usize);

fn write_grid_offsets(
    calculator: &OffsetCalculator,
    current: &FileTable,
    future: &FileTable,
    grid_current: &mut GridLines,
    grid_future: &mut GridLines,
    file_out: &mut BufWriter<File>,
) -> Result<usize> {
    file_out.write_all(b"#cell,offset\n")?;
    let mut n_cells: usize = 0;
    loop {
        let a = next_data_line(&mut grid_current.0, &mut grid_current.1);
        let b = next_data_line(&mut grid_future.0, &mut grid_future.1);
        let (line_current, line_future) = match (a, b) {
            (None, None) => break,
            (Some(a), Some(b)) => (a?, b?),
            _ => {
                return Err(OffsetError::DimensionMismatch(format!(
                    "{} and {} do not have the same number of grid cells",
                    current.filename, future.filename
                )))
            }
        };
        let (name, x) = parse_record(&line_current, &current.delim, &current.filename, grid_current.1)?;
        let (name_future, x_pred) =
            parse_record(&line_future, &future.delim, &future.filename, grid_future.1)?;
        if name != name_future {
            return Err(OffsetError::Parse {
                fname: future.filename.clone(),
                line: grid_future.1,
                message: format!("expected grid cell '{}' but found '{}'", name, name_future),
            });
        }
        let x = Array1::from_vec(x);
        let x_pred = Array1::from_vec(x_pred);
        let offset = calculator.offset_row(&x.view(), &x_pred.view())?;
        file_out.write_all((name + "," + &format_value(offset) + "\n").as_bytes())?;
        n_cells += 1;
    }
    file_out.flush()?;
    Ok(n_cells)
}

/// Genomic offsets of every cell of a current and a future environmental grid
/// written into `out` one cell at a time. Both grids list the same cells in the
/// same order. Returns the number of cells processed. On error, `out` is removed.
pub fn stream_grid_offsets(
    calculator: &OffsetCalculator,
    current: &FileTable,
    future: &FileTable,
    out: &str,
) -> Result<usize> {
    let d = calculator.n_variables();
    let mut grid_current = open_grid(current, d)?;
    let mut grid_future = open_grid(future, d)?;
    let mut file_out = create_output(out)?;
    let n_cells = match write_grid_offsets(
        calculator,
        current,
        future,
        &mut grid_current,
        &mut grid_future,
        &mut file_out,
    ) {
        Ok(n) => n,
        Err(e) => {
            drop(file_out);
            fs::remove_file(out)?;
            warn!("Removed the incomplete grid output {}", out);
            return Err(e);
        }
    };
    info!("Streamed the genomic offsets of {} grid cells into {}", n_cells, out);
    Ok(n_cells)
}
