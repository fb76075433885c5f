use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use ndarray::Array2;

use crate::{
    error::Result,
    factors::{FactorAxis, Factors},
};

/// Writes every factor into `dir`, in files named after the factor.
///
/// # Arguments
/// * `dir` - The output directory, created if missing.
/// * `factors` - The factors to save.
pub fn save(dir: &Path, factors: &Factors) -> Result<()> {
    fs::create_dir_all(dir)?;

    for axis in FactorAxis::ALL {
        let path = dir.join(axis.factor_name());
        let mut out = BufWriter::new(File::create(&path)?);
        write_csv(&mut out, factors.get(axis))?;
        out.flush()?;

        info!(rows = factors.get(axis).nrows(); "saved {}", path.display());
    }

    Ok(())
}

/// Writes `matrix` one row per line, with comma separated values.
pub fn write_csv<W: Write>(out: &mut W, matrix: &Array2<f32>) -> Result<()> {
    for row in matrix.rows() {
        let mut values = row.iter();

        if let Some(first) = values.next() {
            write!(out, "{first}")?;
        }
        for value in values {
            write!(out, ",{value}")?;
        }
        writeln!(out)?;
    }

    Ok(())
}
