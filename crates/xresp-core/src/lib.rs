//! Instrument-response engine for binned X-ray spectra.
//!
//! Effective areas and redistribution matrices are loaded into a
//! [`Session`], paired with spectra, and used to fold
//! source models into predicted counts or to flux-correct observed data.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;

pub use modules::{FitArrays, FitSpan, FitStatistic, ModelEvaluator, Session};
