use super::EffectiveArea;
use crate::domain::{BinValues, XrespError, XrespResult};
use crate::modules::table::{CalibrationSource, ColumnData};
use crate::numerics::{canonicalize, reverse_if, GridUnit};
use tracing::debug;

pub const ARF_COLUMNS: [&str; 5] = ["ENERG_LO", "ENERG_HI", "SPECRESP", "RESP_ERR", "FRACEXPO"];

/// Reads an effective-area curve from the first extension matching
/// `extension_names`.
pub fn read_effective_area(
    source: &dyn CalibrationSource,
    extension_names: &[&str],
) -> XrespResult<EffectiveArea> {
    let table = source.require_extension(extension_names)?;
    let lo = table.require_fixed_column(ARF_COLUMNS[0])?;
    let hi = table.require_fixed_column(ARF_COLUMNS[1])?;
    let area = table.require_fixed_column(ARF_COLUMNS[2])?;
    let unit = table.column_unit(ARF_COLUMNS[0], GridUnit::Kev)?;

    let canonical = canonicalize(lo, hi, unit)?;
    let n = canonical.grid.len();
    if area.len() != n {
        return Err(XrespError::size_mismatch(
            "ARF.READ_LENGTH",
            &format!("'{}' SPECRESP column vs energy grid", source.origin()),
            n,
            area.len(),
        ));
    }

    let mut area = area.to_vec();
    let mut area_err = match table.fixed_column(ARF_COLUMNS[3])? {
        Some(values) if values.len() == n => values.to_vec(),
        Some(values) => {
            return Err(XrespError::size_mismatch(
                "ARF.READ_ERR_LENGTH",
                &format!("'{}' RESP_ERR column vs energy grid", source.origin()),
                n,
                values.len(),
            ));
        }
        None => vec![0.0; n],
    };

    let mut frac_expo = match table.column(ARF_COLUMNS[4]) {
        Some(ColumnData::Fixed(values)) if values.len() == n => BinValues::Vector(values.clone()),
        Some(_) => {
            return Err(XrespError::input_validation(
                "ARF.READ_FRACEXPO",
                format!(
                    "'{}' FRACEXPO column must hold one value per energy bin",
                    source.origin()
                ),
            ));
        }
        None => BinValues::Scalar(table.keyword_f64(ARF_COLUMNS[4]).unwrap_or(1.0)),
    };

    if canonical.reversed {
        debug!(origin = source.origin(), "effective area rows stored in descending energy order");
        frac_expo.reverse();
    }
    reverse_if(canonical.reversed, &mut area);
    reverse_if(canonical.reversed, &mut area_err);

    let exposure = table.require_keyword_f64("EXPOSURE")?;
    let mut arf = EffectiveArea::new(canonical.grid, area, area_err, exposure)
        .map_err(|error| {
            XrespError::new(
                error.category(),
                error.placeholder(),
                format!("'{}': {}", source.origin(), error.message()),
            )
        })?
        .with_info(table.observation_info());
    arf.set_frac_expo(frac_expo)?;
    Ok(arf)
}

#[cfg(test)]
mod tests {
    use super::read_effective_area;
    use crate::domain::{BinValues, XrespErrorCategory};
    use crate::modules::table::{CalibrationFile, ColumnData, KeywordValue, TableExtension};

    fn arf_table(area: Vec<f64>) -> TableExtension {
        TableExtension::new("SPECRESP")
            .with_column("ENERG_LO", ColumnData::Fixed(vec![3.0, 2.0, 1.0]))
            .with_column("ENERG_HI", ColumnData::Fixed(vec![4.0, 3.0, 2.0]))
            .with_column("SPECRESP", ColumnData::Fixed(area))
            .with_column("FRACEXPO", ColumnData::Fixed(vec![0.5, 1.0, 1.0]))
            .with_keyword("EXPOSURE", KeywordValue::Real(2500.0))
            .with_keyword("TG_M", KeywordValue::Integer(-1))
            .with_keyword("GRATING", KeywordValue::Text("HEG".to_string()))
    }

    #[test]
    fn descending_rows_are_reversed_with_every_column() {
        let file = CalibrationFile::new("arf.json", vec![arf_table(vec![30.0, 20.0, 10.0])]);
        let arf = read_effective_area(&file, &["SPECRESP"]).unwrap();
        assert_eq!(arf.grid().lo(), &[1.0, 2.0, 3.0]);
        assert_eq!(arf.area(), &[10.0, 20.0, 30.0]);
        assert_eq!(arf.frac_expo(), &BinValues::Vector(vec![1.0, 1.0, 0.5]));
        assert_eq!(arf.area_err(), &[0.0, 0.0, 0.0]);
        assert_eq!(arf.exposure(), 2500.0);
        assert_eq!(arf.info().order, Some(-1));
        assert_eq!(arf.info().grating.as_deref(), Some("HEG"));
    }

    #[test]
    fn alternate_extension_names_are_honoured() {
        let mut table = arf_table(vec![1.0, 1.0, 1.0]);
        table.name = "AREA".to_string();
        let file = CalibrationFile::new("arf.json", vec![table]);
        assert!(read_effective_area(&file, &["SPECRESP"]).is_err());
        assert!(read_effective_area(&file, &["SPECRESP", "AREA"]).is_ok());
    }

    #[test]
    fn curve_without_positive_area_is_fatal() {
        let file = CalibrationFile::new("arf.json", vec![arf_table(vec![0.0, 0.0, -1.0])]);
        let error = read_effective_area(&file, &["SPECRESP"]).unwrap_err();
        assert_eq!(error.placeholder(), "ARF.NO_POSITIVE_AREA");
        assert!(error.message().contains("arf.json"));
    }

    #[test]
    fn missing_exposure_is_fatal() {
        let mut table = arf_table(vec![1.0, 1.0, 1.0]);
        table.keywords.remove("EXPOSURE");
        let file = CalibrationFile::new("arf.json", vec![table]);
        let error = read_effective_area(&file, &["SPECRESP"]).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::InputValidation);
    }

    #[test]
    fn scalar_fracexpo_keyword_is_accepted() {
        let mut table = arf_table(vec![1.0, 2.0, 3.0]);
        table.columns.remove("FRACEXPO");
        let table = table.with_keyword("FRACEXPO", KeywordValue::Real(0.8));
        let file = CalibrationFile::new("arf.json", vec![table]);
        let arf = read_effective_area(&file, &["SPECRESP"]).unwrap();
        assert_eq!(arf.frac_expo(), &BinValues::Scalar(0.8));
    }
}
