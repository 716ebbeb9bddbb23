pub mod arena;
pub mod arf;
pub mod evalgrid;
pub mod flux;
pub mod kernel;
pub mod rmf;
pub mod session;
pub mod spectrum;
pub mod table;

pub use session::{FitArrays, FitSpan, FitStatistic, ModelEvaluator, Session};
