use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::ArrayView2;

use crate::bins::Bin;
use crate::error::{Result, XpcsError};

/// Write correlation curves as CSV: a `bin,lag_0,lag_1,...` header, then one
/// row per bin.
pub fn write_curves_csv<W: Write>(
    writer: &mut W,
    bins: &[Bin],
    curves: ArrayView2<'_, f32>,
) -> Result<()> {
    if curves.nrows() != bins.len() {
        return Err(XpcsError::ShapeMismatch {
            what: "curve rows",
            expected: vec![bins.len(), curves.ncols()],
            found: vec![curves.nrows(), curves.ncols()],
        });
    }

    write!(writer, "bin")?;
    for lag in 0..curves.ncols() {
        write!(writer, ",lag_{lag}")?;
    }
    writeln!(writer)?;

    for (bin, row) in bins.iter().zip(curves.rows()) {
        write!(writer, "{bin}")?;
        for value in row {
            write!(writer, ",{value}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn save_curves_csv(path: &Path, bins: &[Bin], curves: ArrayView2<'_, f32>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_curves_csv(&mut writer, bins, curves)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn header_and_rows() {
        let curves = array![[1.5f32, 1.25], [2.0, 1.0]];
        let mut out = Vec::new();
        write_curves_csv(&mut out, &[Bin::Label(1), Bin::Label(4)], curves.view()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "bin,lag_0,lag_1\n1,1.5,1.25\n4,2,1\n");
    }

    #[test]
    fn row_count_must_match_bins() {
        let curves = array![[1.0f32]];
        let mut out = Vec::new();
        let err = write_curves_csv(&mut out, &[], curves.view()).unwrap_err();
        assert!(matches!(err, XpcsError::ShapeMismatch { .. }));
    }
}
