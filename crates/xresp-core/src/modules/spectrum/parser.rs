use super::{Spectrum, SpectrumInput};
use crate::domain::{XrespError, XrespResult};
use crate::modules::rmf::{read_channel_bounds, EBOUNDS_EXTENSION};
use crate::modules::table::{parse_ascii_columns, CalibrationSource};
use crate::numerics::GridUnit;

pub const SPECTRUM_EXTENSION: &str = "SPECTRUM";

/// Reads a spectrum from a `SPECTRUM` extension.
///
/// Bin edges come from `BIN_LO`/`BIN_HI` when present and otherwise from an
/// `EBOUNDS` extension of the same source, row for row. A `RATE` column is
/// turned into counts with the `EXPOSURE` keyword.
pub fn read_spectrum(source: &dyn CalibrationSource) -> XrespResult<Spectrum> {
    let origin = source.origin();
    let table = source.require_extension(&[SPECTRUM_EXTENSION])?;
    let exposure = table.require_keyword_f64("EXPOSURE")?;
    let backscal = table.keyword_f64("BACKSCAL").unwrap_or(1.0);

    let counts = match (table.fixed_column("COUNTS")?, table.fixed_column("RATE")?) {
        (Some(counts), _) => counts.to_vec(),
        (None, Some(rate)) => rate.iter().map(|value| value * exposure).collect(),
        (None, None) => {
            return Err(XrespError::input_validation(
                "SPECTRUM.COUNTS",
                format!("'{origin}' SPECTRUM extension has neither COUNTS nor RATE"),
            ));
        }
    };
    let stat_err = match (table.fixed_column("STAT_ERR")?, table.has_column("COUNTS")) {
        (Some(errors), true) => Some(errors.to_vec()),
        (Some(errors), false) => Some(errors.iter().map(|value| value * exposure).collect()),
        (None, _) => None,
    };
    let sys_err = table.fixed_column("SYS_ERR")?.map(<[f64]>::to_vec);
    let quality = table
        .fixed_column("QUALITY")?
        .map(|flags| flags.iter().map(|flag| flag.round() as i64).collect());

    let mut input = SpectrumInput {
        counts,
        stat_err,
        sys_err,
        quality,
        exposure,
        backscal,
        info: table.observation_info(),
        ..SpectrumInput::default()
    };

    match (table.fixed_column("BIN_LO")?, table.fixed_column("BIN_HI")?) {
        (Some(lo), Some(hi)) => {
            input.lo = lo.to_vec();
            input.hi = hi.to_vec();
            input.unit = table.column_unit("BIN_LO", GridUnit::Kev)?;
        }
        _ => {
            let ebounds = source.find_extension(&[EBOUNDS_EXTENSION]).ok_or_else(|| {
                XrespError::input_validation(
                    "SPECTRUM.GRID",
                    format!("'{origin}' has neither BIN_LO/BIN_HI columns nor an EBOUNDS extension"),
                )
            })?;
            let bounds = read_channel_bounds(ebounds)?;
            // The returned grid is ascending; put the rows back in file order.
            let (mut lo, mut hi) = bounds.grid.into_edges();
            if bounds.rows_reversed != bounds.renumbered {
                lo.reverse();
                hi.reverse();
            }
            input.lo = lo;
            input.hi = hi;
            input.unit = GridUnit::Kev;
        }
    }

    Spectrum::new(input).map_err(|error| {
        XrespError::new(
            error.category(),
            error.placeholder(),
            format!("'{origin}': {}", error.message()),
        )
    })
}

/// Parses `lo hi counts [stat_err]` rows with edges in `unit`.
pub fn parse_ascii_spectrum(origin: &str, text: &str, unit: GridUnit) -> XrespResult<Spectrum> {
    let table = parse_ascii_columns(origin, text, 3)?;
    let column = |index: usize| table.column(index).map(<[f64]>::to_vec);
    let (Some(lo), Some(hi), Some(counts)) = (column(0), column(1), column(2)) else {
        return Err(XrespError::input_validation(
            "ASCII.SPECTRUM",
            format!("'{origin}' needs lo, hi and counts columns"),
        ));
    };

    Spectrum::new(SpectrumInput {
        lo,
        hi,
        unit,
        counts,
        stat_err: column(3),
        exposure: 1.0,
        backscal: 1.0,
        ..SpectrumInput::default()
    })
}
