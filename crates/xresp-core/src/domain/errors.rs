use std::error::Error;
use std::fmt::{Display, Formatter};

pub type XrespResult<T> = Result<T, XrespError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XrespErrorCategory {
    GridInvalid,
    SizeMismatch,
    SharedResourceInUse,
    CorruptGroup,
    AllocationFailure,
    InputValidation,
    IoSystem,
    Internal,
}

impl XrespErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InputValidation => 2,
            Self::IoSystem => 3,
            Self::GridInvalid => 4,
            Self::SizeMismatch => 5,
            Self::SharedResourceInUse => 6,
            Self::CorruptGroup => 7,
            Self::AllocationFailure => 8,
            Self::Internal => 9,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GridInvalid => "GridInvalid",
            Self::SizeMismatch => "SizeMismatch",
            Self::SharedResourceInUse => "SharedResourceInUse",
            Self::CorruptGroup => "CorruptGroup",
            Self::AllocationFailure => "AllocationFailure",
            Self::InputValidation => "InputValidation",
            Self::IoSystem => "IoSystem",
            Self::Internal => "Internal",
        }
    }
}

impl Display for XrespErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrespError {
    category: XrespErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl XrespError {
    pub fn new(
        category: XrespErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn grid_invalid(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::GridInvalid, placeholder, message)
    }

    /// Builds a size mismatch error that always reports both lengths.
    pub fn size_mismatch(
        placeholder: &'static str,
        what: &str,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::new(
            XrespErrorCategory::SizeMismatch,
            placeholder,
            format!("{what}: expected {expected}, got {actual}"),
        )
    }

    pub fn shared_in_use(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::SharedResourceInUse, placeholder, message)
    }

    pub fn corrupt_group(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::CorruptGroup, placeholder, message)
    }

    pub fn allocation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::AllocationFailure, placeholder, message)
    }

    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::InputValidation, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::IoSystem, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(XrespErrorCategory::Internal, placeholder, message)
    }

    pub const fn category(&self) -> XrespErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.placeholder, self.message)
    }
}

impl Display for XrespError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for XrespError {}

#[cfg(test)]
mod tests {
    use super::{XrespError, XrespErrorCategory};

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let categories = [
            XrespErrorCategory::GridInvalid,
            XrespErrorCategory::SizeMismatch,
            XrespErrorCategory::SharedResourceInUse,
            XrespErrorCategory::CorruptGroup,
            XrespErrorCategory::AllocationFailure,
            XrespErrorCategory::InputValidation,
            XrespErrorCategory::IoSystem,
            XrespErrorCategory::Internal,
        ];

        let mut codes: Vec<i32> = categories.iter().map(|c| c.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), categories.len());
        assert!(codes.iter().all(|code| *code > 1));
    }

    #[test]
    fn size_mismatch_reports_both_sizes() {
        let error = XrespError::size_mismatch("ARF.PUT_LENGTH", "area array", 4, 3);
        assert_eq!(error.category(), XrespErrorCategory::SizeMismatch);
        assert!(error.message().contains("expected 4"));
        assert!(error.message().contains("got 3"));
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [ARF.PUT_LENGTH] area array: expected 4, got 3"
        );
    }

    #[test]
    fn display_includes_category_and_placeholder() {
        let error = XrespError::shared_in_use("RMF.SHARED", "matrix 3 is used by 2 spectra");
        assert_eq!(
            error.to_string(),
            "SharedResourceInUse [RMF.SHARED] matrix 3 is used by 2 spectra"
        );
    }
}
