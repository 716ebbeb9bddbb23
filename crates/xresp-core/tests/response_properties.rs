use approx::assert_relative_eq;
use xresp_core::modules::rmf::{read_redistribution_matrix, RedistributionMatrix};
use xresp_core::modules::spectrum::{Spectrum, SpectrumInput};
use xresp_core::modules::table::{CalibrationFile, ColumnData, KeywordValue, TableExtension};
use xresp_core::numerics::{canonicalize, reverse_if, Grid, GridUnit};

fn unit_grid(bins: usize) -> Grid {
    Grid::new(
        (0..bins).map(|i| i as f64).collect(),
        (0..bins).map(|i| i as f64 + 1.0).collect(),
    )
    .unwrap()
}

#[test]
fn canonicalizing_twice_changes_nothing() {
    let first = canonicalize(&[3.0, 2.0, 1.0], &[4.0, 3.0, 2.0], GridUnit::Kev).unwrap();
    assert!(first.reversed);
    let second = canonicalize(first.grid.lo(), first.grid.hi(), GridUnit::Kev).unwrap();
    assert!(!second.reversed);
    assert_eq!(second.grid, first.grid);
}

#[test]
fn descending_input_with_reversed_values_matches_ascending_input() {
    let mut values = vec![30.0, 20.0, 10.0];
    let descending = canonicalize(&[3.0, 2.0, 1.0], &[4.0, 3.0, 2.0], GridUnit::Kev).unwrap();
    reverse_if(descending.reversed, &mut values);
    let ascending = canonicalize(&[1.0, 2.0, 3.0], &[2.0, 3.0, 4.0], GridUnit::Kev).unwrap();
    assert_eq!(descending.grid, ascending.grid);
    assert_eq!(values, vec![10.0, 20.0, 30.0]);
}

#[test]
fn identity_matrix_reproduces_its_input() {
    let grid = unit_grid(3);
    let matrix = RedistributionMatrix::delta(&grid, &grid).unwrap();
    let mut output = vec![0.0; 3];
    matrix.fold(&[2.0, 0.0, 5.0], &mut output).unwrap();
    assert_eq!(output, vec![2.0, 0.0, 5.0]);
}

#[test]
fn delta_matrix_conserves_totals_across_offset_grids() {
    let energy = Grid::linear(0.0, 3.0, 7).unwrap();
    let channels = Grid::linear(0.0, 3.0, 4).unwrap();
    let matrix = RedistributionMatrix::delta(&energy, &channels).unwrap();
    let input = [1.0, 0.5, 3.0, 0.0, 2.5, 4.0, 0.25];
    let mut output = vec![0.0; 4];
    matrix.fold(&input, &mut output).unwrap();
    assert_relative_eq!(output.iter().sum::<f64>(), input.iter().sum::<f64>(), epsilon = 1.0e-12);
}

#[test]
fn grouping_conserves_counts() {
    let mut spectrum = Spectrum::new(SpectrumInput {
        lo: vec![1.0, 2.0, 3.0, 4.0],
        hi: vec![2.0, 3.0, 4.0, 5.0],
        unit: GridUnit::Kev,
        counts: vec![1.0, 2.0, 3.0, 4.0],
        exposure: 1.0,
        backscal: 1.0,
        ..SpectrumInput::default()
    })
    .unwrap();
    spectrum.rebin(&[1, 1, -1, -1]).unwrap();
    assert_eq!(spectrum.counts(), &[3.0, 7.0]);
    assert_eq!(spectrum.grid().lo(), &[1.0, 3.0]);
    assert_eq!(spectrum.grid().hi(), &[3.0, 5.0]);
    assert_eq!(spectrum.counts().iter().sum::<f64>(), 10.0);
}

#[test]
fn matrix_rebin_onto_its_own_grid_is_a_no_op() {
    let grid = unit_grid(4);
    let mut matrix = RedistributionMatrix::delta(&grid, &grid).unwrap();
    let before = matrix.clone();
    assert!(!matrix.rebin_channels(&grid, 0.0).unwrap());
    assert_eq!(matrix, before);
}

#[test]
fn descending_ebounds_are_renumbered_to_ascending_energy() {
    let matrix_table = TableExtension::new("MATRIX")
        .with_column("ENERG_LO", ColumnData::Fixed(vec![0.0, 1.0, 2.0]))
        .with_column("ENERG_HI", ColumnData::Fixed(vec![1.0, 2.0, 3.0]))
        .with_keyword("N_GRP", KeywordValue::Integer(1))
        .with_keyword("N_CHAN", KeywordValue::Integer(1))
        // Channel 0 is the highest-energy channel on disk.
        .with_column("F_CHAN", ColumnData::Fixed(vec![2.0, 1.0, 0.0]))
        .with_column("MATRIX", ColumnData::Variable(vec![vec![1.0], vec![1.0], vec![1.0]]))
        .with_column_keyword("F_CHAN", "TLMIN", KeywordValue::Integer(0));
    let ebounds = TableExtension::new("EBOUNDS")
        .with_column("CHANNEL", ColumnData::Fixed(vec![0.0, 1.0, 2.0]))
        .with_column("E_MIN", ColumnData::Fixed(vec![2.0, 1.0, 0.0]))
        .with_column("E_MAX", ColumnData::Fixed(vec![3.0, 2.0, 1.0]));
    let file = CalibrationFile::new("rmf.json", vec![matrix_table, ebounds]);

    let matrix = read_redistribution_matrix(&file).unwrap();
    assert!(matrix.channels_renumbered());
    assert_eq!(matrix.channel_grid().lo(), &[0.0, 1.0, 2.0]);
    let mut output = vec![0.0; 3];
    matrix.fold(&[1.0, 2.0, 3.0], &mut output).unwrap();
    assert_eq!(output, vec![1.0, 2.0, 3.0]);
}
