pub mod errors;

pub use errors::{XrespError, XrespErrorCategory, XrespResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpectrumId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArfId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RmfId(pub usize);

impl Display for SpectrumId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "spectrum {}", self.0)
    }
}

impl Display for ArfId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "arf {}", self.0)
    }
}

impl Display for RmfId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rmf {}", self.0)
    }
}

/// One effective-area curve paired with the matrix it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponsePair {
    pub arf: ArfId,
    pub rmf: RmfId,
}

impl ResponsePair {
    pub const fn new(arf: ArfId, rmf: RmfId) -> Self {
        Self { arf, rmf }
    }
}

/// A per-bin quantity that may be stored as one value for every bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinValues {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Default for BinValues {
    fn default() -> Self {
        Self::Scalar(1.0)
    }
}

impl BinValues {
    pub fn get(&self, index: usize) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Vector(values) => values[index],
        }
    }

    pub fn to_vec(&self, len: usize) -> Vec<f64> {
        match self {
            Self::Scalar(value) => vec![*value; len],
            Self::Vector(values) => values.clone(),
        }
    }

    pub fn fits(&self, len: usize) -> bool {
        match self {
            Self::Scalar(_) => true,
            Self::Vector(values) => values.len() == len,
        }
    }

    pub fn reverse(&mut self) {
        if let Self::Vector(values) = self {
            values.reverse();
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

/// Observation keywords shared by spectra and calibration products.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObservationInfo {
    pub object: Option<String>,
    pub instrument: Option<String>,
    pub grating: Option<String>,
    pub order: Option<i64>,
    pub part: Option<i64>,
    pub source_id: Option<i64>,
}
