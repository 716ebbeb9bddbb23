use crate::domain::{XrespError, XrespResult};

/// Whitespace separated numeric columns read row by row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AsciiColumns {
    pub columns: Vec<Vec<f64>>,
}

impl AsciiColumns {
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn column(&self, index: usize) -> Option<&[f64]> {
        self.columns.get(index).map(Vec::as_slice)
    }
}

/// Parses `text` into at least `min_columns` columns.
///
/// Blank lines and lines starting with `#` or `!` are skipped. Every data row
/// must carry the same number of values as the first one.
pub fn parse_ascii_columns(origin: &str, text: &str, min_columns: usize) -> XrespResult<AsciiColumns> {
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for (line_index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let mut values = Vec::new();
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| {
                XrespError::input_validation(
                    "ASCII.TOKEN",
                    format!(
                        "'{}' line {}: '{}' is not a number",
                        origin,
                        line_index + 1,
                        token
                    ),
                )
            })?;
            values.push(value);
        }

        if columns.is_empty() {
            if values.len() < min_columns {
                return Err(XrespError::input_validation(
                    "ASCII.COLUMNS",
                    format!(
                        "'{}' line {}: expected at least {} columns, found {}",
                        origin,
                        line_index + 1,
                        min_columns,
                        values.len()
                    ),
                ));
            }
            columns = vec![Vec::new(); values.len()];
        } else if values.len() != columns.len() {
            return Err(XrespError::size_mismatch(
                "ASCII.ROW_WIDTH",
                &format!("'{}' line {} column count", origin, line_index + 1),
                columns.len(),
                values.len(),
            ));
        }

        for (column, value) in columns.iter_mut().zip(values) {
            column.push(value);
        }
    }

    if columns.is_empty() {
        return Err(XrespError::input_validation(
            "ASCII.EMPTY",
            format!("'{origin}' contains no data rows"),
        ));
    }

    Ok(AsciiColumns { columns })
}

#[cfg(test)]
mod tests {
    use super::parse_ascii_columns;
    use crate::domain::XrespErrorCategory;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let parsed = parse_ascii_columns(
            "pha.dat",
            "# lo hi counts\n\n1.0 2.0 5\n2.0 3.0 7\n! trailer\n",
            3,
        )
        .unwrap();
        assert_eq!(parsed.row_count(), 2);
        assert_eq!(parsed.column(2), Some(&[5.0, 7.0][..]));
        assert!(parsed.column(3).is_none());
    }

    #[test]
    fn ragged_rows_are_size_mismatches() {
        let error = parse_ascii_columns("pha.dat", "1 2 3\n1 2\n", 3).unwrap_err();
        assert_eq!(error.category(), XrespErrorCategory::SizeMismatch);
    }

    #[test]
    fn too_few_columns_and_bad_tokens_fail() {
        assert!(parse_ascii_columns("pha.dat", "1 2\n", 3).is_err());
        assert!(parse_ascii_columns("pha.dat", "1 2 x\n", 3).is_err());
        assert!(parse_ascii_columns("pha.dat", "# nothing\n", 3).is_err());
    }
}
