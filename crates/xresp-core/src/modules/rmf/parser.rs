use super::{MatrixBackend, MatrixLayout, RawGroup, RedistributionMatrix};
use crate::domain::{XrespError, XrespResult};
use crate::modules::table::{
    cell_to_usize, CalibrationSource, KeywordValue, RowField, TableExtension,
};
use crate::numerics::{canonicalize, reverse_if, Grid, GridUnit};
use tracing::{debug, warn};

pub const MATRIX_EXTENSIONS: [&str; 2] = ["SPECRESP MATRIX", "MATRIX"];
pub const EBOUNDS_EXTENSION: &str = "EBOUNDS";

/// Channel axis as read from an `EBOUNDS` table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChannelBounds {
    /// Ascending keV grid, index 0 being the lowest-energy channel.
    pub(crate) grid: Grid,
    /// Smallest channel number in the table.
    pub(crate) first_channel: i64,
    /// Table rows were stored in descending channel-number order.
    pub(crate) rows_reversed: bool,
    /// Channel numbers increase with decreasing energy.
    pub(crate) renumbered: bool,
}

pub(crate) fn read_channel_bounds(table: &TableExtension) -> XrespResult<ChannelBounds> {
    let mut e_min = table.require_fixed_column("E_MIN")?.to_vec();
    let mut e_max = table.require_fixed_column("E_MAX")?.to_vec();
    let unit = table.column_unit("E_MIN", GridUnit::Kev)?;
    let mut channels = match table.fixed_column("CHANNEL")? {
        Some(values) => values.to_vec(),
        None => (0..e_min.len()).map(|index| index as f64).collect(),
    };
    if channels.len() != e_min.len() {
        return Err(XrespError::size_mismatch(
            "RMF.EBOUNDS_LENGTH",
            "EBOUNDS CHANNEL column vs E_MIN",
            e_min.len(),
            channels.len(),
        ));
    }

    let rows_reversed = channels.len() > 1 && channels[0] > channels[channels.len() - 1];
    if rows_reversed {
        channels.reverse();
        e_min.reverse();
        e_max.reverse();
    }

    let canonical = canonicalize(&e_min, &e_max, unit)?;
    let first_channel = channels.first().map_or(0, |channel| channel.round() as i64);

    Ok(ChannelBounds {
        grid: canonical.grid,
        first_channel,
        rows_reversed,
        renumbered: canonical.reversed,
    })
}

/// Reads a sparse response matrix from a `SPECRESP MATRIX` (or `MATRIX`)
/// extension and its `EBOUNDS` companion.
///
/// Energy rows are stored in ascending energy order and channels are
/// renumbered so that channel 0 is the lowest-energy channel; the summary
/// records which of the two had to be flipped.
pub fn read_redistribution_matrix(source: &dyn CalibrationSource) -> XrespResult<RedistributionMatrix> {
    let origin = source.origin();
    let table = source.require_extension(&MATRIX_EXTENSIONS)?;
    let ebounds_table = source.require_extension(&[EBOUNDS_EXTENSION])?;

    let energy_lo = table.require_fixed_column("ENERG_LO")?;
    let energy_hi = table.require_fixed_column("ENERG_HI")?;
    let energy_unit = table.column_unit("ENERG_LO", GridUnit::Kev)?;
    let energy = canonicalize(energy_lo, energy_hi, energy_unit)?;
    let rows = energy.grid.len();

    let bounds = read_channel_bounds(ebounds_table)?;
    let channels = bounds.grid.len();
    if let Some(declared) = table.keyword_i64("DETCHANS") {
        if declared != channels as i64 {
            warn!(
                origin,
                declared,
                channels, "DETCHANS disagrees with the EBOUNDS row count; using EBOUNDS"
            );
        }
    }

    let channel_offset = match table
        .column_keyword("F_CHAN", "TLMIN")
        .and_then(KeywordValue::as_i64)
    {
        Some(tlmin) => tlmin,
        None if ebounds_table.has_column("CHANNEL") => bounds.first_channel,
        None => 1,
    };

    let n_grp = table.require_row_field("N_GRP")?;
    let f_chan = table.require_row_field("F_CHAN")?;
    let n_chan = table.require_row_field("N_CHAN")?;
    let weights = table.column("MATRIX").ok_or_else(|| {
        XrespError::input_validation(
            "RMF.MATRIX_COLUMN",
            format!("'{origin}' matrix extension has no MATRIX column"),
        )
    })?;

    for (name, field) in [("N_GRP", &n_grp), ("F_CHAN", &f_chan), ("N_CHAN", &n_chan)] {
        if let RowField::Column(column) = field {
            check_row_count(origin, name, rows, column.row_count())?;
        }
    }
    check_row_count(origin, "MATRIX", rows, weights.row_count())?;

    let mut truncated = 0_usize;
    let mut raw_rows = Vec::with_capacity(rows);
    for row in 0..rows {
        let declared_groups = per_group(n_grp.row(row), 0).unwrap_or(0.0);
        let group_count = cell_to_usize(declared_groups, "N_GRP", row)?;
        let starts = f_chan.row(row);
        let spans = n_chan.row(row);
        let row_weights = weights.row(row);

        let mut groups = Vec::with_capacity(group_count);
        let mut consumed = 0_usize;
        for group in 0..group_count {
            let (Some(start), Some(span)) = (per_group(starts, group), per_group(spans, group)) else {
                truncated += group_count - group;
                break;
            };
            let span = cell_to_usize(span, "N_CHAN", row)?;
            if consumed + span > row_weights.len() {
                truncated += group_count - group;
                break;
            }
            groups.push(RawGroup {
                first_channel: start.round() as i64 - channel_offset,
                weights: row_weights[consumed..consumed + span].to_vec(),
            });
            consumed += span;
        }
        raw_rows.push(groups);
    }

    if truncated > 0 {
        warn!(
            origin,
            count = truncated,
            "response groups without enough MATRIX entries were dropped"
        );
    }

    if energy.reversed {
        debug!(origin, "matrix rows stored in descending energy order");
    }
    reverse_if(energy.reversed, &mut raw_rows);

    if bounds.renumbered {
        debug!(origin, channels, "channel numbers run against energy; renumbering groups");
        for group in raw_rows.iter_mut().flatten() {
            group.first_channel =
                channels as i64 - (group.first_channel + group.weights.len() as i64);
            group.weights.reverse();
        }
    }

    let layout = MatrixLayout {
        channel_offset,
        threshold: table.keyword_f64("LO_THRES").unwrap_or(0.0),
        channels_renumbered: bounds.renumbered,
        ebounds_rows_reversed: bounds.rows_reversed,
        energy_rows_reversed: energy.reversed,
    };

    RedistributionMatrix::from_raw_rows(MatrixBackend::File, energy.grid, bounds.grid, raw_rows, layout)
        .map_err(|error| {
            XrespError::new(
                error.category(),
                error.placeholder(),
                format!("'{origin}': {}", error.message()),
            )
        })
        .map(|matrix| matrix.with_info(table.observation_info()))
}

fn per_group(values: &[f64], group: usize) -> Option<f64> {
    if values.len() == 1 {
        values.first().copied()
    } else {
        values.get(group).copied()
    }
}

fn check_row_count(origin: &str, column: &str, expected: usize, actual: usize) -> XrespResult<()> {
    if expected != actual {
        return Err(XrespError::size_mismatch(
            "RMF.ROW_COUNT",
            &format!("'{origin}' {column} rows vs energy grid"),
            expected,
            actual,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::read_redistribution_matrix;
    use crate::domain::XrespErrorCategory;
    use crate::modules::rmf::MatrixBackend;
    use crate::modules::table::{CalibrationFile, ColumnData, KeywordValue, TableExtension};
    use approx::assert_relative_eq;

    fn ebounds(channels: Vec<f64>, e_min: Vec<f64>, e_max: Vec<f64>) -> TableExtension {
        TableExtension::new("EBOUNDS")
            .with_column("CHANNEL", ColumnData::Fixed(channels))
            .with_column("E_MIN", ColumnData::Fixed(e_min))
            .with_column("E_MAX", ColumnData::Fixed(e_max))
    }

    fn matrix_table(
        f_chan: Vec<Vec<f64>>,
        n_chan: Vec<Vec<f64>>,
        weights: Vec<Vec<f64>>,
    ) -> TableExtension {
        let n_grp = f_chan.iter().map(|groups| groups.len() as f64).collect();
        TableExtension::new("SPECRESP MATRIX")
            .with_column("ENERG_LO", ColumnData::Fixed(vec![0.0, 1.0, 2.0]))
            .with_column("ENERG_HI", ColumnData::Fixed(vec![1.0, 2.0, 3.0]))
            .with_column("N_GRP", ColumnData::Fixed(n_grp))
            .with_column("F_CHAN", ColumnData::Variable(f_chan))
            .with_column("N_CHAN", ColumnData::Variable(n_chan))
            .with_column("MATRIX", ColumnData::Variable(weights))
            .with_column_keyword("F_CHAN", "TLMIN", KeywordValue::Integer(0))
    }

    #[test]
    fn descending_ebounds_are_renumbered_to_ascending_energy() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![
                matrix_table(
                    vec![vec![2.0], vec![1.0], vec![0.0]],
                    vec![vec![1.0], vec![1.0], vec![2.0]],
                    vec![vec![1.0], vec![1.0], vec![0.9, 0.1]],
                ),
                ebounds(vec![0.0, 1.0, 2.0], vec![2.0, 1.0, 0.0], vec![3.0, 2.0, 1.0]),
            ],
        );
        let matrix = read_redistribution_matrix(&file).unwrap();
        assert!(matrix.channels_renumbered());
        assert_eq!(matrix.channel_grid().lo(), &[0.0, 1.0, 2.0]);

        assert_eq!(matrix.dense_row(0), vec![1.0, 0.0, 0.0]);
        assert_eq!(matrix.dense_row(1), vec![0.0, 1.0, 0.0]);
        assert_eq!(matrix.dense_row(2), vec![0.0, 0.1, 0.9]);

        let mut output = vec![0.0; 3];
        matrix.fold(&[2.0, 0.0, 5.0], &mut output).unwrap();
        assert_relative_eq!(output[0], 2.0);
        assert_relative_eq!(output[1], 0.5);
        assert_relative_eq!(output[2], 4.5);
    }

    #[test]
    fn ascending_file_keeps_channel_numbers() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![
                matrix_table(
                    vec![vec![0.0], vec![0.0, 2.0], vec![2.0]],
                    vec![vec![2.0], vec![1.0, 1.0], vec![1.0]],
                    vec![vec![0.8, 0.2], vec![0.5, 0.5], vec![1.0]],
                ),
                ebounds(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]),
            ],
        );
        let matrix = read_redistribution_matrix(&file).unwrap();
        assert_eq!(matrix.backend(), MatrixBackend::File);
        assert!(!matrix.channels_renumbered());
        assert_eq!(matrix.dense_row(0), vec![0.8, 0.2, 0.0]);
        assert_eq!(matrix.dense_row(1), vec![0.5, 0.0, 0.5]);
        assert_eq!(matrix.groups(1).len(), 2);
    }

    #[test]
    fn constant_keyword_fields_and_tlmin_offset() {
        let table = TableExtension::new("MATRIX")
            .with_column("ENERG_LO", ColumnData::Fixed(vec![2.0, 1.0]))
            .with_column("ENERG_HI", ColumnData::Fixed(vec![3.0, 2.0]))
            .with_keyword("N_GRP", KeywordValue::Integer(1))
            .with_keyword("N_CHAN", KeywordValue::Integer(1))
            .with_column("F_CHAN", ColumnData::Fixed(vec![2.0, 1.0]))
            .with_column("MATRIX", ColumnData::Fixed(vec![0.25, 0.75]))
            .with_column_keyword("F_CHAN", "TLMIN", KeywordValue::Integer(1))
            .with_keyword("LO_THRES", KeywordValue::Real(1.0e-6));
        let file = CalibrationFile::new(
            "rmf.json",
            vec![table, ebounds(vec![1.0, 2.0], vec![1.0, 2.0], vec![2.0, 3.0])],
        );
        let matrix = read_redistribution_matrix(&file).unwrap();
        let summary = matrix.summary();
        assert!(summary.energy_rows_reversed);
        assert_eq!(summary.channel_offset, 1);
        assert_eq!(summary.threshold, 1.0e-6);
        assert_eq!(matrix.energy_grid().lo(), &[1.0, 2.0]);
        assert_eq!(matrix.dense_row(0), vec![0.75, 0.0]);
        assert_eq!(matrix.dense_row(1), vec![0.0, 0.25]);
    }

    #[test]
    fn descending_channel_rows_are_put_in_channel_order() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![
                matrix_table(
                    vec![vec![0.0], vec![1.0], vec![2.0]],
                    vec![vec![1.0], vec![1.0], vec![1.0]],
                    vec![vec![1.0], vec![1.0], vec![1.0]],
                ),
                ebounds(vec![2.0, 1.0, 0.0], vec![2.0, 1.0, 0.0], vec![3.0, 2.0, 1.0]),
            ],
        );
        let matrix = read_redistribution_matrix(&file).unwrap();
        let summary = matrix.summary();
        assert!(summary.ebounds_rows_reversed);
        assert!(!summary.channels_renumbered);
        assert_eq!(matrix.dense_row(2), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn short_matrix_rows_drop_groups_but_keep_the_rest() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![
                matrix_table(
                    vec![vec![0.0], vec![1.0], vec![2.0]],
                    vec![vec![1.0], vec![3.0], vec![1.0]],
                    vec![vec![1.0], vec![1.0], vec![1.0]],
                ),
                ebounds(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]),
            ],
        );
        let matrix = read_redistribution_matrix(&file).unwrap();
        assert!(matrix.groups(1).is_empty());
        assert_eq!(matrix.group_count(), 2);
    }

    #[test]
    fn all_groups_out_of_range_is_corrupt() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![
                matrix_table(
                    vec![vec![5.0], vec![6.0], vec![7.0]],
                    vec![vec![1.0], vec![1.0], vec![1.0]],
                    vec![vec![1.0], vec![1.0], vec![1.0]],
                ),
                ebounds(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]),
            ],
        );
        let error = read_redistribution_matrix(&file).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::CorruptGroup);
        assert!(error.message().starts_with("'rmf.json'"));
    }

    #[test]
    fn missing_ebounds_is_reported() {
        let file = CalibrationFile::new(
            "rmf.json",
            vec![matrix_table(
                vec![vec![0.0], vec![1.0], vec![2.0]],
                vec![vec![1.0], vec![1.0], vec![1.0]],
                vec![vec![1.0], vec![1.0], vec![1.0]],
            )],
        );
        let error = read_redistribution_matrix(&file).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::InputValidation);
        assert!(error.message().contains("EBOUNDS"));
    }
}
